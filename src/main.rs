//! Sightline live classifier
//!
//! Streams the configured camera through the classifier and logs each new
//! label. `SIGUSR1` switches between front and back cameras; Ctrl-C stops.
//! The config file path is taken from `SIGHTLINE_CONFIG`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sightline::capture::{CameraBackend, CameraPosition, SyntheticCamera, SyntheticSource};
use sightline::classifier::{CachedClassifier, ClassifierPort, OnnxClassifier};
use sightline::{
    CaptureBackendKind, CaptureConfig, CaptureSession, Config, InferencePipeline, ResultChannel,
    SessionEvent, SessionHandle,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sightline=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Sightline launching...");

    // Load configuration
    let config_path = std::env::var_os("SIGHTLINE_CONFIG").map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    let backend = build_backend(&config.capture)?;

    let classifier_config = config.classifier.clone();
    let classifier: Arc<dyn ClassifierPort> = Arc::new(CachedClassifier::new(move || {
        OnnxClassifier::load(&classifier_config)
    }));

    let results = ResultChannel::new();
    let pipeline = Arc::new(
        InferencePipeline::new(classifier, results.clone())
            .with_failure_label(config.pipeline.still_failure_label.clone()),
    );

    let session = Arc::new(CaptureSession::new(
        backend,
        pipeline.clone(),
        config.capture.delivery_settings(),
    ));
    let handle = SessionHandle::new(session);
    let events = handle.events();
    let position = handle
        .request_start()
        .await
        .map_err(|e| eyre!("start task failed: {}", e))??;
    info!(%position, "Streaming");

    // Presentation: report each new label
    let mut feed = results.subscribe();
    let _label_task = tokio::spawn(async move {
        loop {
            let prediction = feed.changed().await;
            info!(label = %prediction, "DETECTED");
        }
    });

    // Lifecycle events
    let _event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv_async().await {
            match event {
                SessionEvent::SwitchFailed { target, reason } => {
                    warn!(%target, %reason, "Could not switch camera")
                }
                SessionEvent::StreamFailed { position, reason } => {
                    error!(%position, %reason, "Camera stream failed")
                }
                other => info!(?other, "Session event"),
            }
        }
    });

    if config.pipeline.stats_interval_secs > 0 {
        let pipeline = pipeline.clone();
        let every = Duration::from_secs(config.pipeline.stats_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let stats = pipeline.stats();
                info!(
                    frames = stats.frames_seen,
                    published = stats.published,
                    skipped_adaptation = stats.skipped_adaptation,
                    skipped_inference = stats.skipped_inference,
                    "Pipeline stats"
                );
            }
        });
    }

    let mut switch_requests = signal(SignalKind::user_defined1())?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = switch_requests.recv() => {
                info!("Camera switch requested");
                // Outcome arrives on the event feed
                drop(handle.request_switch());
            }
        }
    }

    handle
        .request_stop()
        .await
        .map_err(|e| eyre!("stop task failed: {}", e))?;
    info!("Sightline shutting down");
    Ok(())
}

fn build_backend(capture: &CaptureConfig) -> Result<Arc<dyn CameraBackend>> {
    match capture.backend {
        CaptureBackendKind::Synthetic => Ok(Arc::new(
            SyntheticCamera::new(capture.width, capture.height, capture.frame_interval())
                .with_device(CameraPosition::Back, SyntheticSource::Solid([96, 128, 64]))
                .with_device(CameraPosition::Front, SyntheticSource::Solid([160, 120, 100])),
        )),
        #[cfg(feature = "v4l2")]
        CaptureBackendKind::V4l2 => Ok(Arc::new(sightline::capture::V4l2Camera::new(
            capture.clone(),
        ))),
        #[cfg(not(feature = "v4l2"))]
        CaptureBackendKind::V4l2 => Err(eyre!(
            "the v4l2 capture backend needs the `v4l2` feature"
        )),
    }
}
