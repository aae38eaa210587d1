//! Capture session: camera lifecycle, frame delivery and the device-switch protocol
//!
//! Frame delivery runs on one dedicated thread per active input. Every
//! reconfiguration first halts (and joins) that thread, swaps inputs inside a
//! [`ConfigurationTransaction`], then spawns a fresh delivery thread which
//! brings the hardware back up off the caller's thread. No tap callback can
//! observe a half-swapped input list.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use arc_swap::ArcSwap;
use tracing::{debug, error, info, instrument, trace, warn};

use super::device::{CameraBackend, CameraPosition, DeviceInput, FrameTap};
use crate::error::{CaptureError, Error, Result};

/// Default camera selection order.
const PREFERRED_POSITIONS: [CameraPosition; 2] = [CameraPosition::Back, CameraPosition::Front];

/// Undelivered events kept per subscriber before new ones are dropped.
const EVENT_BACKLOG: usize = 64;

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Configuring,
    Running,
    Stopped,
}

/// Point-in-time view of the session, readable without touching hardware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraState {
    pub state: SessionState,
    pub position: Option<CameraPosition>,
    pub device_id: Option<String>,
    pub input_count: usize,
}

impl CameraState {
    fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            position: None,
            device_id: None,
            input_count: 0,
        }
    }

    pub fn running(&self) -> bool {
        self.state == SessionState::Running
    }
}

/// Lifecycle notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Started { position: CameraPosition },
    StartFailed { reason: String },
    Switched { position: CameraPosition },
    SwitchFailed { target: CameraPosition, reason: String },
    StreamFailed { position: CameraPosition, reason: String },
    Stopped,
}

/// Delivery thread tuning.
#[derive(Debug, Clone, Copy)]
pub struct DeliverySettings {
    /// Pause after a failed frame read before retrying
    pub error_backoff: Duration,
    /// Stack size of the delivery thread; the platform default when unset
    pub stack_size: Option<usize>,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            error_backoff: Duration::from_millis(10),
            stack_size: None,
        }
    }
}

/// Fans each [`SessionEvent`] out to every live subscriber.
#[derive(Clone, Default)]
struct EventBus {
    subscribers: Arc<Mutex<Vec<flume::Sender<SessionEvent>>>>,
}

impl EventBus {
    fn subscribe(&self) -> flume::Receiver<SessionEvent> {
        let (tx, rx) = flume::bounded(EVENT_BACKLOG);
        self.lock().push(tx);
        rx
    }

    fn emit(&self, event: SessionEvent) {
        self.lock().retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(flume::TrySendError::Full(_)) => {
                warn!(?event, "Event subscriber is not keeping up, dropping event");
                true
            }
            Err(flume::TrySendError::Disconnected(_)) => false,
        });
    }

    fn lock(&self) -> MutexGuard<'_, Vec<flume::Sender<SessionEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

struct Delivery {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct SessionGraph {
    inputs: Vec<Arc<dyn DeviceInput>>,
    delivery: Option<Delivery>,
}

/// Exclusive window in which the session's inputs may be swapped.
///
/// Dropping the transaction without [`commit`](Self::commit) restores the
/// inputs it started with.
pub struct ConfigurationTransaction<'a> {
    graph: &'a mut SessionGraph,
    original: Vec<Arc<dyn DeviceInput>>,
    committed: bool,
}

impl<'a> ConfigurationTransaction<'a> {
    fn begin(graph: &'a mut SessionGraph) -> Self {
        let original = graph.inputs.clone();
        Self {
            graph,
            original,
            committed: false,
        }
    }

    /// Remove and return the first attached input.
    pub fn remove_first(&mut self) -> Option<Arc<dyn DeviceInput>> {
        if self.graph.inputs.is_empty() {
            None
        } else {
            Some(self.graph.inputs.remove(0))
        }
    }

    pub fn remove_all(&mut self) {
        self.graph.inputs.clear();
    }

    /// Attach an input. The session carries a single input, so this refuses
    /// when one is already attached.
    pub fn add_input(&mut self, input: Arc<dyn DeviceInput>) -> bool {
        if !self.graph.inputs.is_empty() {
            return false;
        }
        self.graph.inputs.push(input);
        true
    }

    pub fn input_count(&self) -> usize {
        self.graph.inputs.len()
    }

    pub fn commit(mut self) {
        self.committed = true;
    }

    /// Put back the inputs present at `begin` and close the window.
    pub fn rollback(mut self) {
        self.graph.inputs = std::mem::take(&mut self.original);
        self.committed = true;
    }
}

impl Drop for ConfigurationTransaction<'_> {
    fn drop(&mut self) {
        if !self.committed {
            warn!("Configuration transaction dropped without commit, restoring inputs");
            self.graph.inputs = std::mem::take(&mut self.original);
        }
    }
}

/// Owns the camera inputs and the frame delivery thread.
pub struct CaptureSession {
    backend: Arc<dyn CameraBackend>,
    tap: Arc<dyn FrameTap>,
    settings: DeliverySettings,
    graph: Mutex<SessionGraph>,
    snapshot: Arc<ArcSwap<CameraState>>,
    reconfiguring: AtomicBool,
    events: EventBus,
}

/// Clears the reconfiguration flag however the switch exits.
struct ReconfigureGuard<'a>(&'a AtomicBool);

impl Drop for ReconfigureGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl CaptureSession {
    pub fn new(
        backend: Arc<dyn CameraBackend>,
        tap: Arc<dyn FrameTap>,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            backend,
            tap,
            settings,
            graph: Mutex::new(SessionGraph::default()),
            snapshot: Arc::new(ArcSwap::from_pointee(CameraState::idle())),
            reconfiguring: AtomicBool::new(false),
            events: EventBus::default(),
        }
    }

    /// Current session state. Never blocks on camera hardware.
    pub fn state(&self) -> Arc<CameraState> {
        self.snapshot.load_full()
    }

    /// Subscribe to lifecycle events emitted from now on.
    ///
    /// Every subscriber receives every event. Dropping the receiver
    /// unsubscribes.
    pub fn events(&self) -> flume::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Open the preferred camera and begin streaming.
    #[instrument(skip(self))]
    pub fn start(&self) -> Result<CameraPosition> {
        let mut graph = self.lock_graph();
        let actual = self.snapshot.load().state;
        if actual != SessionState::Idle {
            return Err(Error::InvalidState {
                expected: SessionState::Idle,
                actual,
            });
        }

        // A stream that faulted leaves its input attached; clear it first
        self.halt_delivery(&mut graph);
        self.publish(&graph, SessionState::Configuring);

        let input = PREFERRED_POSITIONS
            .iter()
            .find_map(|&position| match self.backend.open(position) {
                Ok(input) => Some(input),
                Err(e) => {
                    debug!(%position, error = %e, "Camera not usable");
                    None
                }
            });

        let mut tx = ConfigurationTransaction::begin(&mut graph);
        tx.remove_all();
        let Some(input) = input else {
            tx.commit();
            self.publish(&graph, SessionState::Idle);
            error!("No camera could be opened");
            self.emit(SessionEvent::StartFailed {
                reason: Error::NoCameraAvailable.to_string(),
            });
            return Err(Error::NoCameraAvailable);
        };
        tx.add_input(input.clone());
        tx.commit();

        let position = input.descriptor().position;
        info!(%position, device = %input.descriptor().id, "Capture session starting");
        self.resume(&mut graph, input)
            .map_err(|source| Error::DeliveryFailed { position, source })?;
        self.emit(SessionEvent::Started { position });
        Ok(position)
    }

    /// Swap to the opposite-facing camera.
    ///
    /// Delivery is halted for the whole transaction and resumed on a fresh
    /// thread afterwards. If the opposite camera cannot be opened the original
    /// input is reattached and the session keeps running on it.
    ///
    /// Must not be called from inside the frame tap.
    #[instrument(skip(self))]
    pub fn switch_camera(&self) -> Result<CameraPosition> {
        if self
            .reconfiguring
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::SwitchInProgress);
        }
        let _guard = ReconfigureGuard(&self.reconfiguring);

        let mut graph = self.lock_graph();
        let actual = self.snapshot.load().state;
        if actual != SessionState::Running {
            return Err(Error::InvalidState {
                expected: SessionState::Running,
                actual,
            });
        }

        self.publish(&graph, SessionState::Configuring);
        self.halt_delivery(&mut graph);

        let mut tx = ConfigurationTransaction::begin(&mut graph);
        let Some(current) = tx.remove_first() else {
            tx.commit();
            self.publish(&graph, SessionState::Idle);
            return Err(Error::InvalidState {
                expected: SessionState::Running,
                actual: SessionState::Idle,
            });
        };
        let target = current.descriptor().position.opposite();

        let opened = self.backend.open(target).and_then(|next| {
            if tx.add_input(next.clone()) {
                Ok(next)
            } else {
                Err(CaptureError::Stream("session refused new input".into()))
            }
        });

        match opened {
            Ok(next) => {
                tx.commit();
                info!(from = %current.descriptor().position, to = %target, "Camera switched");
                drop(current);
                self.resume(&mut graph, next).map_err(|source| Error::DeliveryFailed {
                    position: target,
                    source,
                })?;
                metrics::counter!("sightline_camera_switches_total", "outcome" => "switched")
                    .increment(1);
                self.emit(SessionEvent::Switched { position: target });
                Ok(target)
            }
            Err(source) => {
                tx.rollback();
                warn!(%target, error = %source, "Camera switch failed, keeping current input");
                let position = current.descriptor().position;
                self.resume(&mut graph, current)
                    .map_err(|source| Error::DeliveryFailed { position, source })?;
                metrics::counter!("sightline_camera_switches_total", "outcome" => "rolled_back")
                    .increment(1);
                self.emit(SessionEvent::SwitchFailed {
                    target,
                    reason: source.to_string(),
                });
                Err(Error::DeviceSwitchFailed { target, source })
            }
        }
    }

    /// Halt delivery and release every input. The session cannot be restarted.
    #[instrument(skip(self))]
    pub fn stop(&self) {
        let mut graph = self.lock_graph();
        if self.snapshot.load().state == SessionState::Stopped {
            return;
        }
        self.halt_delivery(&mut graph);
        let mut tx = ConfigurationTransaction::begin(&mut graph);
        tx.remove_all();
        tx.commit();
        self.publish(&graph, SessionState::Stopped);
        info!("Capture session stopped");
        self.emit(SessionEvent::Stopped);
    }

    fn lock_graph(&self) -> MutexGuard<'_, SessionGraph> {
        self.graph.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, graph: &SessionGraph, state: SessionState) {
        let active = graph.inputs.first().map(|input| input.descriptor());
        self.snapshot.store(Arc::new(CameraState {
            state,
            position: active.map(|d| d.position),
            device_id: active.map(|d| d.id.clone()),
            input_count: graph.inputs.len(),
        }));
    }

    fn emit(&self, event: SessionEvent) {
        self.events.emit(event);
    }

    /// Signal the delivery thread and wait for its last callback to finish.
    fn halt_delivery(&self, graph: &mut SessionGraph) {
        if let Some(delivery) = graph.delivery.take() {
            delivery.stop.store(true, Ordering::Release);
            if delivery.handle.join().is_err() {
                error!("Frame delivery thread panicked");
            }
        }
    }

    /// Mark the session running and spawn delivery for `input`.
    ///
    /// Hardware start-up happens on the new thread so the caller returns
    /// without waiting for the device. If the thread cannot be spawned the
    /// session falls back to `Idle` and the error is returned.
    fn resume(
        &self,
        graph: &mut SessionGraph,
        input: Arc<dyn DeviceInput>,
    ) -> Result<(), CaptureError> {
        let position = input.descriptor().position;
        let stop = Arc::new(AtomicBool::new(false));
        let worker = DeliveryWorker {
            input,
            tap: self.tap.clone(),
            stop: stop.clone(),
            snapshot: self.snapshot.clone(),
            events: self.events.clone(),
            settings: self.settings,
        };

        let mut builder = thread::Builder::new().name("capture-delivery".into());
        if let Some(size) = self.settings.stack_size {
            builder = builder.stack_size(size);
        }

        self.publish(graph, SessionState::Running);
        match builder.spawn(move || worker.run()) {
            Ok(handle) => {
                graph.delivery = Some(Delivery { stop, handle });
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to spawn frame delivery thread");
                self.publish(graph, SessionState::Idle);
                self.emit(SessionEvent::StreamFailed {
                    position,
                    reason: e.to_string(),
                });
                Err(CaptureError::Io(e))
            }
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        let graph = self.graph.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(delivery) = graph.delivery.take() {
            delivery.stop.store(true, Ordering::Release);
            let _ = delivery.handle.join();
        }
    }
}

struct DeliveryWorker {
    input: Arc<dyn DeviceInput>,
    tap: Arc<dyn FrameTap>,
    stop: Arc<AtomicBool>,
    snapshot: Arc<ArcSwap<CameraState>>,
    events: EventBus,
    settings: DeliverySettings,
}

impl DeliveryWorker {
    fn run(self) {
        let descriptor = self.input.descriptor().clone();
        if let Err(e) = self.input.start_streaming() {
            error!(device = %descriptor.id, error = %e, "Failed to start streaming");
            self.snapshot.rcu(|current| CameraState {
                state: SessionState::Idle,
                ..(**current).clone()
            });
            self.events.emit(SessionEvent::StreamFailed {
                position: descriptor.position,
                reason: e.to_string(),
            });
            return;
        }
        debug!(device = %descriptor.id, "Frame delivery running");

        while !self.stop.load(Ordering::Acquire) {
            let tap = &self.tap;
            match self.input.next_frame(&mut |frame| tap.on_frame(frame)) {
                Ok(()) => {}
                // Lets the loop observe a stop request while the device is stalled
                Err(CaptureError::Timeout) => {
                    trace!(device = %descriptor.id, "No frame within timeout");
                }
                Err(e) => {
                    if self.stop.load(Ordering::Acquire) {
                        break;
                    }
                    warn!(device = %descriptor.id, error = %e, "Capture error");
                    thread::sleep(self.settings.error_backoff);
                }
            }
        }

        self.input.stop_streaming();
        debug!(device = %descriptor.id, "Frame delivery halted");
    }
}

/// Cloneable presentation-side handle to a running session.
///
/// Every operation returns immediately; hardware work runs on Tokio's
/// blocking pool, so these must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct SessionHandle {
    session: Arc<CaptureSession>,
}

impl SessionHandle {
    pub fn new(session: Arc<CaptureSession>) -> Self {
        Self { session }
    }

    pub fn state(&self) -> Arc<CameraState> {
        self.session.state()
    }

    pub fn events(&self) -> flume::Receiver<SessionEvent> {
        self.session.events()
    }

    pub fn request_start(&self) -> tokio::task::JoinHandle<Result<CameraPosition>> {
        let session = self.session.clone();
        tokio::task::spawn_blocking(move || session.start())
    }

    pub fn request_switch(&self) -> tokio::task::JoinHandle<Result<CameraPosition>> {
        let session = self.session.clone();
        tokio::task::spawn_blocking(move || session.switch_camera())
    }

    pub fn request_stop(&self) -> tokio::task::JoinHandle<()> {
        let session = self.session.clone();
        tokio::task::spawn_blocking(move || session.stop())
    }
}
