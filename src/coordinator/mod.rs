//! Timeout and single-request coordination.
//!
//! [`UpdateCoordinator`] wraps one backend and turns its raw event stream
//! into the stream consumers actually want:
//!
//! - a regular-updates watchdog that reports staleness once (latched until
//!   the next good fix) instead of flooding;
//! - at-most-one in-flight single request with a one-shot deadline,
//!   candidate buffering, and best-candidate selection;
//! - pass-through of backend errors and satellite snapshots.
//!
//! All timer state lives in a driver task; public operations post commands
//! and return immediately. Dropping the coordinator (or calling
//! [`UpdateCoordinator::shutdown`]) cancels the driver and with it every
//! pending timer.

mod arbiter;

pub use arbiter::SingleRequestArbiter;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, Instant, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::position::{PositionUpdate, SatelliteInfo};
use crate::source::{
    BackendEvent, ConfigValue, PositioningMethods, SourceBackend, SourceError,
};

/// Deadline substituted for a zero single-request timeout, and the grace
/// period added to the update interval by the staleness watchdog. Two
/// minutes covers a cold GNSS start.
pub const COLD_START_TIMEOUT: Duration = Duration::from_secs(120);

/// Watchdog check cadence when the interval is the source default.
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(30);

/// Event republished to coordinator and facade subscribers.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    /// A position fix (continuous, or the winner of a single request).
    PositionUpdated(PositionUpdate),

    /// Full snapshot of satellites in view.
    SatellitesInViewUpdated(Vec<SatelliteInfo>),

    /// Full snapshot of satellites used in the fix.
    SatellitesInUseUpdated(Vec<SatelliteInfo>),

    /// A backend error, or a synthesized update timeout.
    Error(SourceError),

    /// The facade's active flag changed. Emitted by the facade only.
    ActiveChanged(bool),

    /// The supported positioning methods changed at runtime.
    SupportedMethodsChanged,
}

enum Command {
    StartUpdates,
    StopUpdates,
    RequestUpdate(Duration),
    IntervalChanged(Option<Duration>),
}

#[derive(Debug, Default)]
struct SharedStatus {
    last_error: Option<SourceError>,
    running: bool,
    single_pending: bool,
}

/// Wraps a backend with timeout policy and single-request arbitration.
///
/// Must be created within a Tokio runtime; the driver task is spawned on
/// construction.
pub struct UpdateCoordinator {
    backend: Arc<dyn SourceBackend>,
    commands: mpsc::UnboundedSender<Command>,
    events_tx: broadcast::Sender<SourceEvent>,
    status: Arc<Mutex<SharedStatus>>,
    cancel: CancellationToken,
}

impl UpdateCoordinator {
    /// Wrap a backend and start the driver task.
    pub fn new(backend: Arc<dyn SourceBackend>) -> Self {
        let (commands, cmd_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(64);
        let status = Arc::new(Mutex::new(SharedStatus::default()));
        let cancel = CancellationToken::new();

        let driver = Driver {
            backend: Arc::clone(&backend),
            backend_rx: backend.subscribe(),
            backend_closed: false,
            cmd_rx,
            events_tx: events_tx.clone(),
            status: Arc::clone(&status),
            cancel: cancel.clone(),
            running: false,
            stale_latched: false,
            last_update: Instant::now(),
            configured_interval: None,
            request_deadline: None,
            arbiter: SingleRequestArbiter::new(),
        };
        tokio::spawn(driver.run());

        Self {
            backend,
            commands,
            events_tx,
            status,
            cancel,
        }
    }

    /// Name of the wrapped backend.
    pub fn name(&self) -> &str {
        self.backend.name()
    }

    /// Begin continuous updates and arm the staleness watchdog.
    ///
    /// With no preferred positioning methods configured this reports
    /// [`SourceError::UnknownSource`] and stays idle.
    pub fn start_updates(&self) {
        let _ = self.commands.send(Command::StartUpdates);
    }

    /// Stop continuous updates and the watchdog. An in-flight single
    /// request is left to run to its own deadline.
    pub fn stop_updates(&self) {
        let _ = self.commands.send(Command::StopUpdates);
    }

    /// Request exactly one fix within `timeout`.
    ///
    /// `Duration::ZERO` substitutes the cold-start default. A nonzero
    /// timeout below the backend minimum interval reports
    /// [`SourceError::UpdateTimeout`] without contacting the backend. A
    /// second call while one request is pending is ignored.
    pub fn request_update(&self, timeout: Duration) {
        let _ = self.commands.send(Command::RequestUpdate(timeout));
    }

    /// Set the continuous interval, returning the backend's effective
    /// (clamped) value. Zero resets to the backend default.
    pub fn set_update_interval(&self, interval: Duration) -> Duration {
        let effective = self.backend.set_update_interval(interval);
        let configured = (interval != Duration::ZERO).then_some(effective);
        let _ = self.commands.send(Command::IntervalChanged(configured));
        effective
    }

    /// Effective continuous interval.
    pub fn update_interval(&self) -> Duration {
        self.backend.update_interval()
    }

    /// Smallest interval the backend supports.
    pub fn minimum_update_interval(&self) -> Duration {
        self.backend.minimum_update_interval()
    }

    /// Most recent cached fix from the backend.
    pub fn last_known_position(&self, satellite_only: bool) -> Option<PositionUpdate> {
        self.backend.last_known_position(satellite_only)
    }

    /// Method classes the backend can provide.
    pub fn supported_methods(&self) -> PositioningMethods {
        self.backend.supported_methods()
    }

    /// Method classes the consumer prefers.
    pub fn preferred_methods(&self) -> PositioningMethods {
        self.backend.preferred_methods()
    }

    /// Restrict the backend to the given method classes.
    pub fn set_preferred_methods(&self, methods: PositioningMethods) {
        self.backend.set_preferred_methods(methods);
    }

    /// Backend-specific property passthrough.
    pub fn set_backend_property(&self, name: &str, value: ConfigValue) -> bool {
        self.backend.set_backend_property(name, value)
    }

    /// Backend-specific property passthrough.
    pub fn backend_property(&self, name: &str) -> Option<ConfigValue> {
        self.backend.backend_property(name)
    }

    /// Subscribe to the arbitrated event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<SourceEvent> {
        self.events_tx.subscribe()
    }

    /// Most recent reported error; cleared when a good update arrives
    /// after a latched timeout.
    pub fn last_error(&self) -> Option<SourceError> {
        self.status.lock().unwrap().last_error
    }

    /// Whether continuous updates are running.
    pub fn is_running(&self) -> bool {
        self.status.lock().unwrap().running
    }

    /// Whether a single request is pending.
    pub fn is_single_pending(&self) -> bool {
        self.status.lock().unwrap().single_pending
    }

    /// Stop the driver task, disarming every pending timer.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for UpdateCoordinator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Timer and arbitration state, owned by the driver task.
struct Driver {
    backend: Arc<dyn SourceBackend>,
    backend_rx: broadcast::Receiver<BackendEvent>,
    backend_closed: bool,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    events_tx: broadcast::Sender<SourceEvent>,
    status: Arc<Mutex<SharedStatus>>,
    cancel: CancellationToken,

    running: bool,
    stale_latched: bool,
    last_update: Instant,
    /// Explicitly configured interval; `None` while on the source default.
    configured_interval: Option<Duration>,
    request_deadline: Option<Instant>,
    arbiter: SingleRequestArbiter,
}

impl Driver {
    async fn run(mut self) {
        let mut watchdog = Self::make_watchdog(self.watchdog_period());

        loop {
            // Evaluated even when the branch is disabled, so it needs a
            // placeholder value while no request is pending.
            let deadline = self
                .request_deadline
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                _ = self.cancel.cancelled() => break,

                Some(command) = self.cmd_rx.recv() => {
                    self.handle_command(command, &mut watchdog);
                }

                event = self.backend_rx.recv(), if !self.backend_closed => {
                    match event {
                        Ok(event) => self.handle_backend_event(event),
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "backend event stream lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            self.backend_closed = true;
                        }
                    }
                }

                _ = watchdog.tick(), if self.running => {
                    self.check_staleness();
                }

                _ = time::sleep_until(deadline), if self.request_deadline.is_some() => {
                    self.handle_request_deadline();
                }
            }
        }
    }

    fn make_watchdog(period: Duration) -> Interval {
        // interval() would tick immediately; the first check belongs one
        // full period after arming.
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
        interval
    }

    fn watchdog_period(&self) -> Duration {
        self.configured_interval
            .unwrap_or(DEFAULT_WATCHDOG_INTERVAL)
    }

    fn handle_command(&mut self, command: Command, watchdog: &mut Interval) {
        match command {
            Command::StartUpdates => self.start_updates(watchdog),
            Command::StopUpdates => self.stop_updates(),
            Command::RequestUpdate(timeout) => self.request_update(timeout),
            Command::IntervalChanged(configured) => {
                self.configured_interval = configured;
                if self.running {
                    *watchdog = Self::make_watchdog(self.watchdog_period());
                }
            }
        }
    }

    fn start_updates(&mut self, watchdog: &mut Interval) {
        if self.running {
            return;
        }

        if self.backend.preferred_methods().is_empty() {
            self.report_error(SourceError::UnknownSource);
            return;
        }

        self.running = true;
        self.last_update = Instant::now();
        self.stale_latched = false;
        self.status.lock().unwrap().running = true;

        self.backend.start_updates();
        *watchdog = Self::make_watchdog(self.watchdog_period());
        debug!(backend = self.backend.name(), "continuous updates started");
    }

    fn stop_updates(&mut self) {
        if !self.running {
            return;
        }

        self.running = false;
        self.status.lock().unwrap().running = false;
        self.backend.stop_updates();
        debug!(backend = self.backend.name(), "continuous updates stopped");
        // A pending single request keeps its own deadline.
    }

    fn request_update(&mut self, timeout: Duration) {
        if self.request_deadline.is_some() {
            debug!("single request already pending, ignoring");
            return;
        }

        let minimum = self.backend.minimum_update_interval();
        if timeout != Duration::ZERO && timeout < minimum {
            self.report_error(SourceError::UpdateTimeout);
            return;
        }

        let effective = if timeout == Duration::ZERO {
            COLD_START_TIMEOUT
        } else {
            timeout
        };

        self.request_deadline = Some(Instant::now() + effective);
        self.status.lock().unwrap().single_pending = true;

        // Continuous updates at a cadence within the deadline will serve
        // the request; re-triggering the backend would not be faster.
        if self.running && self.backend.update_interval() <= effective {
            debug!("single request will ride on continuous updates");
            return;
        }

        self.backend.request_update(effective);
    }

    fn handle_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::PositionUpdated(fix) => {
                self.note_good_update();
                if self.request_deadline.take().is_some() {
                    // Served the pending single request as well.
                    self.arbiter.clear();
                    self.status.lock().unwrap().single_pending = false;
                }
                self.emit(SourceEvent::PositionUpdated(fix));
            }
            BackendEvent::SinglePositionUpdated(fix) => {
                if self.request_deadline.is_none() {
                    debug!("late single-channel fix, ignoring");
                    return;
                }
                self.arbiter.push(fix);
            }
            BackendEvent::SatellitesInView(satellites) => {
                self.note_good_update();
                self.emit(SourceEvent::SatellitesInViewUpdated(satellites));
            }
            BackendEvent::SatellitesInUse(satellites) => {
                self.emit(SourceEvent::SatellitesInUseUpdated(satellites));
            }
            BackendEvent::Error(error) => {
                // Backend errors surface unchanged.
                self.report_error(error);
            }
            BackendEvent::SupportedMethodsChanged => {
                self.emit(SourceEvent::SupportedMethodsChanged);
            }
        }
    }

    /// A good update refreshes staleness tracking and clears a latched
    /// timeout error.
    fn note_good_update(&mut self) {
        self.last_update = Instant::now();
        self.stale_latched = false;

        let mut status = self.status.lock().unwrap();
        if status.last_error == Some(SourceError::UpdateTimeout) {
            status.last_error = None;
        }
    }

    fn check_staleness(&mut self) {
        if self.stale_latched {
            return;
        }

        let allowance = self.backend.update_interval() + COLD_START_TIMEOUT;
        if self.last_update.elapsed() > allowance {
            self.stale_latched = true;
            warn!(
                backend = self.backend.name(),
                allowance_ms = allowance.as_millis() as u64,
                "no update within the staleness allowance"
            );
            self.report_error(SourceError::UpdateTimeout);
        }
    }

    fn handle_request_deadline(&mut self) {
        self.request_deadline = None;
        self.status.lock().unwrap().single_pending = false;

        match self.arbiter.select_best() {
            Some(best) => self.emit(SourceEvent::PositionUpdated(best)),
            None => self.report_error(SourceError::UpdateTimeout),
        }
    }

    fn report_error(&mut self, error: SourceError) {
        self.status.lock().unwrap().last_error = Some(error);
        self.emit(SourceEvent::Error(error));
    }

    fn emit(&self, event: SourceEvent) {
        let _ = self.events_tx.send(event);
    }
}
