use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use sightline::capture::synthetic::solid_frame;
use sightline::capture::{
    CameraBackend, CameraPosition, DeliverySettings, DeviceInput, SessionState, SyntheticCamera,
    SyntheticSource,
};
use sightline::error::{CaptureError, InferenceError};
use sightline::pipeline::ConformantImage;
use sightline::{
    CaptureSession, ClassifierPort, Error, InferencePipeline, Prediction, ResultChannel,
    SessionEvent, SessionHandle,
};

const RED: [u8; 3] = [220, 10, 10];
const BLUE: [u8; 3] = [10, 10, 220];

/// Red → cat, blue → dog, anything else fails. Keeps every label it returns.
#[derive(Default)]
struct ColorClassifier {
    history: Mutex<Vec<String>>,
}

impl ColorClassifier {
    fn history(&self) -> Vec<String> {
        self.history.lock().unwrap().clone()
    }
}

impl ClassifierPort for ColorClassifier {
    fn predict(&self, image: &ConformantImage) -> Result<Prediction, InferenceError> {
        let [_, r, g, b] = image.pixel(149, 149).unwrap_or_default();
        let label = if r > g && r > b {
            "cat"
        } else if b > r && b > g {
            "dog"
        } else {
            return Err(InferenceError::Runtime("no confident class".into()));
        };
        self.history.lock().unwrap().push(label.to_string());
        Ok(Prediction::new(label))
    }
}

struct Rig {
    classifier: Arc<ColorClassifier>,
    pipeline: Arc<InferencePipeline>,
    session: Arc<CaptureSession>,
}

fn rig(backend: Arc<dyn CameraBackend>) -> Rig {
    let classifier = Arc::new(ColorClassifier::default());
    let pipeline = Arc::new(InferencePipeline::new(
        classifier.clone(),
        ResultChannel::new(),
    ));
    let session = Arc::new(CaptureSession::new(
        backend,
        pipeline.clone(),
        DeliverySettings::default(),
    ));
    Rig {
        classifier,
        pipeline,
        session,
    }
}

fn two_cameras() -> SyntheticCamera {
    SyntheticCamera::new(16, 16, Duration::from_millis(1))
        .with_device(CameraPosition::Back, SyntheticSource::Solid(RED))
        .with_device(CameraPosition::Front, SyntheticSource::Solid(BLUE))
}

fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if done() {
            return;
        }
        thread::sleep(Duration::from_millis(2));
    }
    panic!("condition not reached in time");
}

fn latest_label(pipeline: &InferencePipeline) -> Option<String> {
    pipeline.results().latest().map(|p| p.label.clone())
}

#[test]
fn scripted_frames_publish_in_order() {
    let script = vec![
        solid_frame(16, 16, RED),
        solid_frame(16, 16, RED),
        solid_frame(16, 16, BLUE),
    ];
    let camera = SyntheticCamera::new(16, 16, Duration::from_millis(1))
        .with_device(CameraPosition::Back, SyntheticSource::Script(script));
    let rig = rig(Arc::new(camera));

    rig.session.start().unwrap();
    wait_until(|| rig.pipeline.stats().published == 3);
    rig.session.stop();

    assert_eq!(rig.classifier.history(), vec!["cat", "cat", "dog"]);
    assert_eq!(rig.pipeline.results().consume(), Some(Prediction::new("dog")));
    assert_eq!(rig.pipeline.results().consume(), None);
}

#[test]
fn switch_moves_delivery_to_opposite_camera() {
    let rig = rig(Arc::new(two_cameras()));
    let events = rig.session.events();

    assert_eq!(rig.session.start().unwrap(), CameraPosition::Back);
    wait_until(|| latest_label(&rig.pipeline).as_deref() == Some("cat"));

    assert_eq!(rig.session.switch_camera().unwrap(), CameraPosition::Front);
    let state = rig.session.state();
    assert!(state.running());
    assert_eq!(state.position, Some(CameraPosition::Front));
    assert_eq!(state.input_count, 1);

    wait_until(|| latest_label(&rig.pipeline).as_deref() == Some("dog"));

    // And back again
    assert_eq!(rig.session.switch_camera().unwrap(), CameraPosition::Back);
    wait_until(|| latest_label(&rig.pipeline).as_deref() == Some("cat"));

    let seen: Vec<SessionEvent> = events.try_iter().collect();
    assert_eq!(
        seen,
        vec![
            SessionEvent::Started {
                position: CameraPosition::Back
            },
            SessionEvent::Switched {
                position: CameraPosition::Front
            },
            SessionEvent::Switched {
                position: CameraPosition::Back
            },
        ]
    );
}

#[test]
fn failed_switch_keeps_original_camera_streaming() {
    let camera = Arc::new(two_cameras());
    camera.set_available(CameraPosition::Front, false);
    let rig = rig(camera);
    let events = rig.session.events();

    rig.session.start().unwrap();
    assert!(matches!(
        rig.session.switch_camera(),
        Err(Error::DeviceSwitchFailed {
            target: CameraPosition::Front,
            ..
        })
    ));

    let state = rig.session.state();
    assert_eq!(state.state, SessionState::Running);
    assert_eq!(state.position, Some(CameraPosition::Back));
    assert_eq!(state.input_count, 1);

    let before = rig.pipeline.stats().frames_seen;
    wait_until(|| rig.pipeline.stats().frames_seen > before + 2);
    assert_eq!(latest_label(&rig.pipeline).as_deref(), Some("cat"));

    assert!(events.try_iter().any(|event| matches!(
        event,
        SessionEvent::SwitchFailed {
            target: CameraPosition::Front,
            ..
        }
    )));
}

#[test]
fn undecodable_still_reports_adaptation_failure() {
    let rig = rig(Arc::new(two_cameras()));

    assert!(matches!(
        rig.pipeline.analyze_still(&[0x00, 0x01, 0x02, 0x03]),
        Err(Error::AdaptationFailed(_))
    ));
    assert_eq!(
        rig.pipeline.describe_still(b"not an image").display_text(),
        "Unable to identify"
    );
    assert!(rig.classifier.history().is_empty());
}

/// Holds every open of the front camera until the test lets it through.
struct GatedCamera {
    inner: SyntheticCamera,
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl CameraBackend for GatedCamera {
    fn open(&self, position: CameraPosition) -> Result<Arc<dyn DeviceInput>, CaptureError> {
        if position == CameraPosition::Front {
            self.entered.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
        }
        self.inner.open(position)
    }
}

#[test]
fn concurrent_switch_is_rejected() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let rig = rig(Arc::new(GatedCamera {
        inner: two_cameras(),
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    }));
    rig.session.start().unwrap();

    let session = rig.session.clone();
    let first = thread::spawn(move || session.switch_camera());
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    assert_eq!(rig.session.state().state, SessionState::Configuring);
    assert!(matches!(
        rig.session.switch_camera(),
        Err(Error::SwitchInProgress)
    ));

    release_tx.send(()).unwrap();
    assert_eq!(first.join().unwrap().unwrap(), CameraPosition::Front);
    assert_eq!(rig.session.state().input_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handle_drives_session_off_the_caller() {
    let rig = rig(Arc::new(two_cameras()));
    let handle = SessionHandle::new(rig.session.clone());
    let mut feed = rig.pipeline.results().subscribe();
    let events = handle.events();

    let position = handle.request_start().await.unwrap().unwrap();
    assert_eq!(position, CameraPosition::Back);
    let first = tokio::time::timeout(Duration::from_secs(5), feed.changed())
        .await
        .unwrap();
    assert_eq!(first.label, "cat");

    let switched = handle.request_switch().await.unwrap().unwrap();
    assert_eq!(switched, CameraPosition::Front);
    assert_eq!(handle.state().position, Some(CameraPosition::Front));

    let dog = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let prediction = feed.changed().await;
            if prediction.label == "dog" {
                break prediction;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(dog.label, "dog");

    handle.request_stop().await.unwrap();
    assert_eq!(handle.state().state, SessionState::Stopped);
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen,
        vec![
            SessionEvent::Started {
                position: CameraPosition::Back
            },
            SessionEvent::Switched {
                position: CameraPosition::Front
            },
            SessionEvent::Stopped,
        ]
    );
    // A late subscriber only sees what happens after it joined
    assert!(handle.events().try_recv().is_err());
}
