//! Capture supervisor
//!
//! Owns the device through a dedicated capture thread and implements the
//! STOP / ALIVE / ABORT state machine. Settings changes are applied by
//! asking the running loop to restart capture; the device stays open and
//! stays on that thread the whole time.
//!
//! Locking: the core mutex guards the state, the device identity and the
//! settings store. It is never held across a device call, a socket write
//! or an `.await`.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ServiceConfig;
use crate::device::{self, CaptureDevice, DeviceDriver, REQUIRED_ENCODING};
use crate::distributor::{self, DistributionStats};
use crate::error::{IpcamError, Result};
use crate::notify::{Notification, Notifier};
use crate::registry::{ClientRegistry, FrameStream};
use crate::store::{self, ConfigStore};
use crate::types::{CameraState, ConfigEntry, ControlValue, DeviceIdentity, Frame, Framerate};

/// Name of the OS thread that owns the device
const CAPTURE_THREAD_NAME: &str = "ipcam-capture";

/// Answer to `get_camera_info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    /// Configured device node
    pub device: String,
    pub state: CameraState,
    /// Present only while the device is open
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// In-memory settings change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigMutation {
    ImageSize { width: u32, height: u32 },
    Framerate(Framerate),
    Control { id: u32, value: ControlValue },
}

impl ConfigMutation {
    /// Write the change into `entry`. Returns false for an unknown control.
    fn apply_to(&self, entry: &mut ConfigEntry) -> bool {
        match *self {
            Self::ImageSize { width, height } => {
                entry.image_width = width;
                entry.image_height = height;
                true
            }
            Self::Framerate(rate) => {
                entry.framerate = rate;
                true
            }
            Self::Control { id, value } => match entry.control_mut(id) {
                Some(ctl) => {
                    ctl.set_value(value);
                    true
                }
                None => false,
            },
        }
    }
}

/// Outcome of [`Supervisor::reconfigure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconfigured {
    /// The running capture loop restarted with the change
    Applied,
    /// Kept for the next start; nothing was running, or the restart failed
    Stored,
    /// The mutation names a control the device does not have
    UnknownControl,
}

/// What the capture loop should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Checkpoint {
    Stop,
    Restart(u64),
    Continue,
}

#[derive(Debug, Clone, Copy, Default)]
struct LoopProgress {
    applied: u64,
    finished: bool,
}

/// Cooperative stop/restart signalling between callers and the capture loop
///
/// Restarts are numbered. A caller bumps the requested generation and waits
/// until the loop reports that generation (or a later one) as applied, or
/// until the loop exits.
#[derive(Debug)]
pub(crate) struct LoopControl {
    stop: AtomicBool,
    requested: AtomicU64,
    progress: watch::Sender<LoopProgress>,
}

impl LoopControl {
    pub(crate) fn new() -> Self {
        let (progress, _) = watch::channel(LoopProgress::default());
        Self {
            stop: AtomicBool::new(false),
            requested: AtomicU64::new(0),
            progress,
        }
    }

    /// Decide the next step; stop wins over a pending restart
    pub(crate) fn checkpoint(&self, applied: u64) -> Checkpoint {
        if self.stop.load(Ordering::SeqCst) {
            return Checkpoint::Stop;
        }
        let requested = self.requested.load(Ordering::SeqCst);
        if requested > applied {
            Checkpoint::Restart(requested)
        } else {
            Checkpoint::Continue
        }
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Ask for a restart and return its generation
    pub(crate) fn request_restart(&self) -> u64 {
        self.requested.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn mark_applied(&self, generation: u64) {
        self.progress.send_modify(|p| p.applied = p.applied.max(generation));
    }

    pub(crate) fn finish(&self) {
        self.progress.send_modify(|p| p.finished = true);
    }

    /// Wait until `generation` is applied or the loop has exited. Returns
    /// whether it was applied.
    pub(crate) async fn wait_applied(&self, generation: u64) -> bool {
        let mut rx = self.progress.subscribe();
        match rx
            .wait_for(|p| p.finished || p.applied >= generation)
            .await
        {
            Ok(progress) => progress.applied >= generation,
            Err(_) => false,
        }
    }
}

/// How the capture thread ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    /// Stop was requested and honoured
    Stopped,
    /// Runtime failure; the camera is in ABORT
    Aborted,
    /// Never reached ALIVE
    Failed,
}

struct Core {
    state: CameraState,
    /// Identity of the open device
    identity: Option<DeviceIdentity>,
    /// Identity seen by the most recent session, kept after close
    last_identity: Option<DeviceIdentity>,
    store: ConfigStore,
    control: Option<Arc<LoopControl>>,
}

impl Core {
    fn entry_identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref().or(self.last_identity.as_ref())
    }

    fn active_entry(&self) -> Result<ConfigEntry> {
        self.identity
            .as_ref()
            .and_then(|id| self.store.get(id))
            .cloned()
            .ok_or_else(|| IpcamError::capture("no settings for the open device"))
    }
}

struct Shared {
    device_path: String,
    driver: Arc<dyn DeviceDriver>,
    core: Mutex<Core>,
    /// Serializes whole-file writes of the settings database
    save_lock: Mutex<()>,
    registry: ClientRegistry,
    notifier: Notifier,
}

impl Shared {
    fn state(&self) -> CameraState {
        self.core.lock().state
    }

    /// Move to `to`, publishing `change_state` if it is a real change
    ///
    /// The event is sent while the lock is held so that state events come
    /// out in the same order the transitions happened.
    fn transition(&self, to: CameraState) -> bool {
        let mut core = self.core.lock();
        if core.state == to {
            return false;
        }
        info!("Camera state {} -> {}", core.state, to);
        core.state = to;
        self.notifier.state(to);
        true
    }

    fn require_alive(&self, operation: &'static str) -> Result<()> {
        match self.state() {
            CameraState::Alive => Ok(()),
            state => Err(IpcamError::state_violation(operation, state)),
        }
    }

    /// Snapshot the database under the core lock and write it outside
    fn persist(&self) -> Result<()> {
        let _guard = self.save_lock.lock();
        let (path, bytes): (PathBuf, Vec<u8>) = {
            let core = self.core.lock();
            (core.store.path().to_path_buf(), core.store.snapshot()?)
        };
        store::write_atomic(&path, &bytes)
    }
}

/// Running capture session
struct Session {
    thread: std::thread::JoinHandle<LoopExit>,
    distributor: JoinHandle<DistributionStats>,
    control: Arc<LoopControl>,
}

/// The camera service
///
/// Shared between the gateway and the HTTP endpoint through `Arc`.
pub struct Supervisor {
    shared: Arc<Shared>,
    /// Serializes start/stop; holds the live session
    lifecycle: tokio::sync::Mutex<Option<Session>>,
}

impl Supervisor {
    /// Create a supervisor for `device_path`
    pub fn new(
        device_path: impl Into<String>,
        driver: Arc<dyn DeviceDriver>,
        store: ConfigStore,
    ) -> Self {
        let device_path = device_path.into();
        info!(
            "Supervisor for {} using the {} backend",
            device_path,
            driver.name()
        );

        Self {
            shared: Arc::new(Shared {
                device_path,
                driver,
                core: Mutex::new(Core {
                    state: CameraState::Stop,
                    identity: None,
                    last_identity: None,
                    store,
                    control: None,
                }),
                save_lock: Mutex::new(()),
                registry: ClientRegistry::new(),
                notifier: Notifier::new(),
            }),
            lifecycle: tokio::sync::Mutex::new(None),
        }
    }

    /// Create a supervisor from the service configuration
    pub fn from_config(config: &ServiceConfig, driver: Arc<dyn DeviceDriver>) -> Self {
        let store = ConfigStore::load(&config.database);
        Self::new(config.device.clone(), driver, store)
    }

    /// Current camera state
    pub fn state(&self) -> CameraState {
        self.shared.state()
    }

    pub fn device_path(&self) -> &str {
        &self.shared.device_path
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.shared.registry
    }

    pub fn notifier(&self) -> &Notifier {
        &self.shared.notifier
    }

    /// Receive every state and settings notification published from now on
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.shared.notifier.subscribe()
    }

    /// Receive `update_image` events for frames captured from now on
    pub fn subscribe_images(&self) -> broadcast::Receiver<Notification> {
        self.shared.notifier.subscribe_images()
    }

    /// Attach a frame subscriber to the running session
    pub fn subscribe_frames(&self) -> Result<FrameStream> {
        self.shared.registry.subscribe()
    }

    /// Open the device and start capturing
    ///
    /// Only `StateViolation` and `UnsupportedDevice` come back as errors.
    /// Any other failure leaves the camera in ABORT and is logged; the
    /// resulting state is returned either way.
    pub async fn start(&self) -> Result<CameraState> {
        let mut lifecycle = self.lifecycle.lock().await;

        let state = self.state();
        if !matches!(state, CameraState::Stop | CameraState::Abort) {
            return Err(IpcamError::state_violation("start", state));
        }

        // A session that aborted on its own, or whose start was abandoned,
        // is still waiting to be joined
        if let Some(old) = lifecycle.take() {
            self.retire(old).await;
        }

        let control = Arc::new(LoopControl::new());
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (init_tx, init_rx) = oneshot::channel();

        self.shared.registry.open();
        self.shared.core.lock().control = Some(control.clone());

        let distributor = tokio::spawn(distributor::run(
            frame_rx,
            self.shared.registry.clone(),
            self.shared.notifier.clone(),
        ));

        let shared = self.shared.clone();
        let thread_control = control.clone();
        let spawned = std::thread::Builder::new()
            .name(CAPTURE_THREAD_NAME.to_string())
            .spawn(move || capture_thread(shared, thread_control, frame_tx, init_tx));

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                // The closure (and the frame sender) is gone, so the
                // distributor is already winding down
                error!("Failed to spawn capture thread: {}", e);
                let _ = distributor.await;
                self.shared.core.lock().control = None;
                self.shared.transition(CameraState::Abort);
                return Ok(self.state());
            }
        };

        // Stored before waiting, so a caller that gives up on this future
        // still leaves a session that stop() or shutdown() can reach
        *lifecycle = Some(Session {
            thread,
            distributor,
            control,
        });

        let init = init_rx.await.unwrap_or_else(|_| {
            Err(IpcamError::capture("capture thread exited during startup"))
        });

        match init {
            Ok(()) => Ok(CameraState::Alive),
            Err(e) => {
                if let Some(session) = lifecycle.take() {
                    self.reap(session).await;
                }
                if e.is_caller_visible() {
                    Err(e)
                } else {
                    Ok(self.state())
                }
            }
        }
    }

    /// Stop capturing and close the device
    ///
    /// Returns after the capture thread has been joined and every subscriber
    /// has been sent end-of-stream.
    pub async fn stop(&self) -> Result<CameraState> {
        let mut lifecycle = self.lifecycle.lock().await;

        let state = self.state();
        if state != CameraState::Alive {
            return Err(IpcamError::state_violation("stop", state));
        }
        let Some(session) = lifecycle.take() else {
            return Err(IpcamError::state_violation("stop", state));
        };

        info!("Stopping camera");
        self.retire(session).await;
        Ok(self.state())
    }

    /// Stop the camera if it runs and release everything
    pub async fn shutdown(&self) {
        if self.state() == CameraState::Alive {
            if let Err(e) = self.stop().await {
                warn!("Stop during shutdown failed: {}", e);
            }
        }

        let leftover = self.lifecycle.lock().await.take();
        if let Some(session) = leftover {
            self.retire(session).await;
        }

        self.shared.registry.close_all();
        info!("Supervisor shut down");
    }

    /// Ask a session to stop, join it and record STOP if it honoured the
    /// request
    async fn retire(&self, session: Session) {
        session.control.request_stop();
        if self.reap(session).await == LoopExit::Stopped {
            self.shared.transition(CameraState::Stop);
        }
    }

    /// Join the capture thread and the distributor of a finished session
    async fn reap(&self, session: Session) -> LoopExit {
        let Session {
            thread,
            distributor,
            ..
        } = session;

        let exit = match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(exit)) => exit,
            Ok(Err(_)) => {
                error!("Capture thread panicked");
                self.shared.transition(CameraState::Abort);
                LoopExit::Aborted
            }
            Err(e) => {
                error!("Failed to join capture thread: {}", e);
                LoopExit::Aborted
            }
        };

        match distributor.await {
            Ok(stats) => debug!(
                "Session ended: {:?}, {} frames distributed",
                exit, stats.frames_distributed
            ),
            Err(e) => warn!("Distributor task panicked: {}", e),
        }

        self.shared.core.lock().control = None;
        exit
    }

    /// Change the in-memory settings and apply them
    ///
    /// While ALIVE the capture loop restarts with the new settings before
    /// this returns. Otherwise the change is only stored for the next start.
    pub async fn reconfigure(&self, mutation: ConfigMutation) -> Result<Reconfigured> {
        let control = {
            let mut core = self.shared.core.lock();
            let state = core.state;
            let Some(identity) = core.entry_identity().cloned() else {
                return Err(IpcamError::state_violation("reconfigure", state));
            };
            let Some(entry) = core.store.get_mut(&identity) else {
                return Err(IpcamError::state_violation("reconfigure", state));
            };
            if !mutation.apply_to(entry) {
                debug!("Ignoring {:?}: no such control", mutation);
                return Ok(Reconfigured::UnknownControl);
            }
            if state != CameraState::Alive {
                debug!("Stored {:?} while {}", mutation, state);
                return Ok(Reconfigured::Stored);
            }
            core.control.clone()
        };

        let Some(control) = control else {
            return Ok(Reconfigured::Stored);
        };
        let generation = control.request_restart();
        debug!("Waiting for restart generation {}", generation);
        if control.wait_applied(generation).await {
            Ok(Reconfigured::Applied)
        } else {
            debug!("Capture ended before applying {:?}", mutation);
            Ok(Reconfigured::Stored)
        }
    }

    /// Device node, state and (while open) bus and card name
    pub fn get_camera_info(&self) -> CameraInfo {
        let core = self.shared.core.lock();
        CameraInfo {
            device: self.shared.device_path.clone(),
            state: core.state,
            bus: core.identity.as_ref().map(|id| id.bus.clone()),
            name: core.identity.as_ref().map(|id| id.name.clone()),
        }
    }

    /// `name@bus` of the open device
    pub fn get_ident_string(&self) -> Result<String> {
        let core = self.shared.core.lock();
        match (core.state, core.identity.as_ref()) {
            (CameraState::Alive, Some(id)) => Ok(id.ident_string()),
            (state, _) => Err(IpcamError::state_violation("get_ident_string", state)),
        }
    }

    /// Settings of the open device
    pub fn get_config(&self) -> Result<ConfigEntry> {
        let core = self.shared.core.lock();
        match core.state {
            CameraState::Alive => core
                .active_entry()
                .map_err(|_| IpcamError::state_violation("get_config", core.state)),
            state => Err(IpcamError::state_violation("get_config", state)),
        }
    }

    /// Change the frame size; `update_image_size` goes out only once the
    /// running capture has picked it up
    pub async fn set_image_size(&self, width: u32, height: u32) -> Result<()> {
        self.shared.require_alive("set_image_size")?;
        let outcome = self
            .reconfigure(ConfigMutation::ImageSize { width, height })
            .await?;
        if outcome == Reconfigured::Applied {
            self.shared.notifier.image_size(width, height);
        }
        Ok(())
    }

    pub async fn set_framerate(&self, num: u32, deno: u32) -> Result<()> {
        self.shared.require_alive("set_framerate")?;
        let rate = Framerate::new(num, deno);
        if self.reconfigure(ConfigMutation::Framerate(rate)).await? == Reconfigured::Applied {
            self.shared.notifier.framerate(rate);
        }
        Ok(())
    }

    /// Write a control value; an unknown id changes nothing and notifies
    /// nobody
    pub async fn set_control(&self, id: u32, value: ControlValue) -> Result<()> {
        self.shared.require_alive("set_control")?;
        let outcome = self
            .reconfigure(ConfigMutation::Control { id, value })
            .await?;
        if outcome != Reconfigured::Applied {
            return Ok(());
        }

        let stored = {
            let core = self.shared.core.lock();
            core.entry_identity()
                .and_then(|ident| core.store.get(ident))
                .and_then(|entry| entry.control(id))
                .map(|ctl| ctl.value())
        };
        self.shared.notifier.control(id, stored.unwrap_or(value));
        Ok(())
    }

    /// Persist every device's settings, then publish `save_complete`
    pub async fn save_config(&self) -> Result<()> {
        let shared = self.shared.clone();
        tokio::task::spawn_blocking(move || shared.persist())
            .await
            .map_err(|e| IpcamError::config(format!("save task failed: {}", e)))??;

        info!("Device settings saved");
        self.shared.notifier.save_complete();
        Ok(())
    }

    pub async fn start_camera(&self) -> Result<CameraState> {
        self.start().await
    }

    pub async fn stop_camera(&self) -> Result<CameraState> {
        self.stop().await
    }
}

/// Body of the capture thread
fn capture_thread(
    shared: Arc<Shared>,
    control: Arc<LoopControl>,
    frames: mpsc::UnboundedSender<Frame>,
    init: oneshot::Sender<Result<()>>,
) -> LoopExit {
    info!("Camera thread start");

    let mut device = match shared.driver.open(&shared.device_path) {
        Ok(device) => device,
        Err(e) => {
            fail_startup(&shared, init, e);
            control.finish();
            info!("Camera thread stop");
            return LoopExit::Failed;
        }
    };

    let exit = match prepare(&shared, device.as_mut()) {
        Ok(()) => {
            shared.transition(CameraState::Alive);
            let _ = init.send(Ok(()));
            run_loop(&shared, &control, device.as_mut(), &frames)
        }
        Err(e) => {
            fail_startup(&shared, init, e);
            LoopExit::Failed
        }
    };

    if device.is_capturing() {
        if let Err(e) = device.stop_capture() {
            warn!("Failed to stop capture: {}", e);
        }
    }
    device.close();

    {
        let mut core = shared.core.lock();
        core.identity = None;
    }
    control.finish();
    drop(frames);

    info!("Camera thread stop");
    exit
}

/// Report a startup failure to `start()`
fn fail_startup(shared: &Shared, init: oneshot::Sender<Result<()>>, e: IpcamError) {
    if e.is_caller_visible() {
        warn!("Start refused: {}", e);
    } else {
        error!("Camera error occurred ({})", e);
        shared.transition(CameraState::Abort);
    }
    let _ = init.send(Err(e));
}

/// Validate the device, load or create its settings, apply them and start
/// capturing
fn prepare(shared: &Shared, device: &mut dyn CaptureDevice) -> Result<()> {
    if !device.supports_encoding(REQUIRED_ENCODING) {
        return Err(IpcamError::unsupported_device(format!(
            "{} does not support Motion-JPEG",
            shared.device_path
        )));
    }

    let identity = device.identity();
    let known = shared.core.lock().store.get(&identity).is_some();

    // Enumeration talks to the driver, so it runs without the lock
    let fresh = if known {
        None
    } else {
        let formats = device.enumerate_formats()?;
        let controls = device.enumerate_controls()?;
        Some(store::create_entry(formats, controls)?)
    };

    let entry = {
        let _save = shared.save_lock.lock();
        let mut core = shared.core.lock();
        // Same lock order as persist(), so a concurrent save cannot write
        // a snapshot taken before this entry existed
        let (entry, _) = core.store.get_or_create(&identity, || {
            fresh.ok_or_else(|| IpcamError::capture(format!("no defaults for {}", identity)))
        })?;
        entry.clone()
    };

    apply_settings(device, &entry)?;
    device.start_capture()?;

    let mut core = shared.core.lock();
    core.identity = Some(identity.clone());
    core.last_identity = Some(identity);
    Ok(())
}

/// Frame size and rate are fatal; individual controls are best-effort
fn apply_settings(device: &mut dyn CaptureDevice, entry: &ConfigEntry) -> Result<()> {
    device.apply(entry.image_width, entry.image_height, entry.framerate)?;
    for failure in device::apply_controls(device, &entry.controls) {
        warn!("{}", failure);
    }
    debug!(
        "Applied {}x{} @ {} with {} controls",
        entry.image_width,
        entry.image_height,
        entry.framerate,
        entry.controls.len()
    );
    Ok(())
}

fn run_loop(
    shared: &Shared,
    control: &LoopControl,
    device: &mut dyn CaptureDevice,
    frames: &mpsc::UnboundedSender<Frame>,
) -> LoopExit {
    let mut applied = 0;
    let mut sequence = 0;

    loop {
        match control.checkpoint(applied) {
            Checkpoint::Stop => {
                info!("Accept stop request");
                return LoopExit::Stopped;
            }
            Checkpoint::Restart(generation) => {
                debug!("Restarting capture (generation {})", generation);
                if let Err(e) = restart(shared, device) {
                    return loop_failed(shared, control, e);
                }
                applied = generation;
                control.mark_applied(generation);
            }
            Checkpoint::Continue => match device.capture_one_frame() {
                Ok(data) => {
                    sequence += 1;
                    if frames.send(Frame::new(sequence, data)).is_err() {
                        return loop_failed(
                            shared,
                            control,
                            IpcamError::capture("frame distributor is gone"),
                        );
                    }
                }
                Err(e) => return loop_failed(shared, control, e),
            },
        }
    }
}

fn restart(shared: &Shared, device: &mut dyn CaptureDevice) -> Result<()> {
    device.stop_capture()?;
    let entry = shared.core.lock().active_entry()?;
    apply_settings(device, &entry)?;
    device.start_capture()
}

fn loop_failed(shared: &Shared, control: &LoopControl, e: IpcamError) -> LoopExit {
    if control.stop_requested() {
        info!("Capture interrupted by stop request ({})", e);
        return LoopExit::Stopped;
    }
    error!("Camera error occurred ({})", e);
    shared.transition(CameraState::Abort);
    LoopExit::Aborted
}
