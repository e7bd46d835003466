//! Integration tests for the positioning stack.
//!
//! These tests verify the complete flows across the public API:
//! - Backend → UpdateCoordinator (timeout policy, single-request arbitration)
//! - Coordinator → PositioningService (active bookkeeping, source swaps)
//! - Satellite snapshots → SatelliteModel (diff operations end to end)
//!
//! Run with: `cargo test --test positioning_integration`

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::sync::broadcast;

use geosource::coordinator::{SourceEvent, UpdateCoordinator, COLD_START_TIMEOUT};
use geosource::position::{
    Coordinate, PositionUpdate, SatelliteInfo, SatelliteSystem, UpdateAttribute,
};
use geosource::satellites::{ModelOperation, SatelliteModel};
use geosource::service::PositioningService;
use geosource::source::{
    BackendEvent, ConfigValue, PositioningMethods, SourceBackend, SourceConfig, SourceError,
    SourceFactory,
};

// ============================================================================
// Test Helpers
// ============================================================================

/// Hand-driven backend: does nothing on its own, records calls, and lets
/// the test emit events at precise points.
struct ManualSource {
    shared: Arc<Mutex<ManualState>>,
    events_tx: broadcast::Sender<BackendEvent>,
}

#[derive(Debug)]
struct ManualState {
    interval: Duration,
    preferred: PositioningMethods,
    starts: usize,
    stops: usize,
    requests: usize,
}

/// Cloneable test-side handle into a [`ManualSource`].
#[derive(Clone)]
struct ManualHandle {
    shared: Arc<Mutex<ManualState>>,
    events_tx: broadcast::Sender<BackendEvent>,
}

impl ManualHandle {
    fn emit(&self, event: BackendEvent) {
        let _ = self.events_tx.send(event);
    }

    fn starts(&self) -> usize {
        self.shared.lock().unwrap().starts
    }

    fn requests(&self) -> usize {
        self.shared.lock().unwrap().requests
    }
}

impl ManualSource {
    const MINIMUM_INTERVAL: Duration = Duration::from_millis(50);
    const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

    fn new() -> (Arc<Self>, ManualHandle) {
        let (events_tx, _) = broadcast::channel(64);
        let shared = Arc::new(Mutex::new(ManualState {
            interval: Self::DEFAULT_INTERVAL,
            preferred: PositioningMethods::ALL,
            starts: 0,
            stops: 0,
            requests: 0,
        }));
        let handle = ManualHandle {
            shared: Arc::clone(&shared),
            events_tx: events_tx.clone(),
        };
        (Arc::new(Self { shared, events_tx }), handle)
    }
}

impl SourceBackend for ManualSource {
    fn name(&self) -> &str {
        "manual"
    }

    fn start_updates(&self) {
        self.shared.lock().unwrap().starts += 1;
    }

    fn stop_updates(&self) {
        self.shared.lock().unwrap().stops += 1;
    }

    fn request_update(&self, _timeout: Duration) {
        self.shared.lock().unwrap().requests += 1;
    }

    fn set_update_interval(&self, interval: Duration) -> Duration {
        let effective = if interval == Duration::ZERO {
            Self::DEFAULT_INTERVAL
        } else {
            interval.max(Self::MINIMUM_INTERVAL)
        };
        self.shared.lock().unwrap().interval = effective;
        effective
    }

    fn update_interval(&self) -> Duration {
        self.shared.lock().unwrap().interval
    }

    fn minimum_update_interval(&self) -> Duration {
        Self::MINIMUM_INTERVAL
    }

    fn default_update_interval(&self) -> Duration {
        Self::DEFAULT_INTERVAL
    }

    fn last_known_position(&self, _satellite_only: bool) -> Option<PositionUpdate> {
        None
    }

    fn supported_methods(&self) -> PositioningMethods {
        PositioningMethods::ALL
    }

    fn preferred_methods(&self) -> PositioningMethods {
        self.shared.lock().unwrap().preferred
    }

    fn set_preferred_methods(&self, methods: PositioningMethods) {
        self.shared.lock().unwrap().preferred = methods;
    }

    fn set_backend_property(&self, _name: &str, _value: ConfigValue) -> bool {
        false
    }

    fn backend_property(&self, _name: &str) -> Option<ConfigValue> {
        None
    }

    fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.events_tx.subscribe()
    }
}

/// Coordinator over a fresh manual backend.
fn manual_coordinator() -> (UpdateCoordinator, ManualHandle) {
    let (backend, handle) = ManualSource::new();
    (
        UpdateCoordinator::new(backend as Arc<dyn SourceBackend>),
        handle,
    )
}

/// A fix at the given coordinates with a horizontal accuracy attribute.
fn fix_with_accuracy(lat: f64, lon: f64, accuracy: f64) -> PositionUpdate {
    PositionUpdate::new(Coordinate::new(lat, lon), SystemTime::now())
        .with_attribute(UpdateAttribute::HorizontalAccuracy, accuracy)
}

fn sat(identifier: i32, signal_strength: i32) -> SatelliteInfo {
    SatelliteInfo::new(identifier, signal_strength, SatelliteSystem::Gps)
}

/// Drain every buffered event, tallying by kind.
fn drain(rx: &mut broadcast::Receiver<SourceEvent>) -> HashMap<&'static str, usize> {
    let mut tally = HashMap::new();
    while let Ok(event) = rx.try_recv() {
        let key = match event {
            SourceEvent::PositionUpdated(_) => "position",
            SourceEvent::SatellitesInViewUpdated(_) => "in_view",
            SourceEvent::SatellitesInUseUpdated(_) => "in_use",
            SourceEvent::Error(SourceError::UpdateTimeout) => "timeout",
            SourceEvent::Error(_) => "error",
            SourceEvent::ActiveChanged(_) => "active",
            SourceEvent::SupportedMethodsChanged => "methods",
        };
        *tally.entry(key).or_insert(0) += 1;
    }
    tally
}

/// Let spawned driver tasks process queued commands and events.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// ============================================================================
// Coordinator: single-request policy
// ============================================================================

#[tokio::test(start_paused = true)]
async fn short_timeout_never_contacts_backend() {
    let (coordinator, handle) = manual_coordinator();
    let mut rx = coordinator.subscribe();

    coordinator.request_update(Duration::from_millis(20));
    settle().await;

    assert_eq!(handle.requests(), 0, "backend must not be contacted");
    assert_eq!(drain(&mut rx).get("timeout"), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn double_request_triggers_backend_once() {
    let (coordinator, handle) = manual_coordinator();

    coordinator.request_update(Duration::from_secs(30));
    coordinator.request_update(Duration::from_secs(30));
    settle().await;

    assert_eq!(handle.requests(), 1);
}

#[tokio::test(start_paused = true)]
async fn best_candidate_wins_at_the_deadline() {
    let (coordinator, handle) = manual_coordinator();
    let mut rx = coordinator.subscribe();

    coordinator.request_update(Duration::from_secs(30));
    settle().await;

    // Two equally fresh candidates; the finer accuracy must win.
    let coarse = fix_with_accuracy(53.0, 10.0, 120.0);
    let fine = fix_with_accuracy(53.5, 10.5, 8.0);
    handle.emit(BackendEvent::SinglePositionUpdated(coarse));
    handle.emit(BackendEvent::SinglePositionUpdated(fine));
    settle().await;

    // Nothing escapes before the deadline.
    assert!(drain(&mut rx).is_empty());

    tokio::time::sleep(Duration::from_secs(31)).await;

    let mut winner = None;
    while let Ok(event) = rx.try_recv() {
        if let SourceEvent::PositionUpdated(fix) = event {
            winner = Some(fix);
        }
    }
    let winner = winner.expect("a winner at the deadline");
    assert_eq!(
        winner.attribute(UpdateAttribute::HorizontalAccuracy),
        Some(8.0)
    );
}

#[tokio::test(start_paused = true)]
async fn much_newer_candidate_beats_finer_accuracy() {
    let (coordinator, handle) = manual_coordinator();
    let mut rx = coordinator.subscribe();

    coordinator.request_update(Duration::from_secs(60));
    settle().await;

    let old_but_fine = PositionUpdate::new(
        Coordinate::new(53.0, 10.0),
        SystemTime::now() - Duration::from_secs(45),
    )
    .with_attribute(UpdateAttribute::HorizontalAccuracy, 5.0);
    let fresh_but_coarse = fix_with_accuracy(53.5, 10.5, 200.0);
    handle.emit(BackendEvent::SinglePositionUpdated(old_but_fine));
    handle.emit(BackendEvent::SinglePositionUpdated(fresh_but_coarse));
    settle().await;

    tokio::time::sleep(Duration::from_secs(61)).await;

    let mut winner = None;
    while let Ok(event) = rx.try_recv() {
        if let SourceEvent::PositionUpdated(fix) = event {
            winner = Some(fix);
        }
    }
    let winner = winner.expect("a winner at the deadline");
    assert_eq!(
        winner.attribute(UpdateAttribute::HorizontalAccuracy),
        Some(200.0),
        "a candidate newer by more than 20s wins regardless of accuracy"
    );
}

#[tokio::test(start_paused = true)]
async fn late_single_fix_is_dropped() {
    let (coordinator, handle) = manual_coordinator();
    let mut rx = coordinator.subscribe();

    coordinator.request_update(Duration::from_secs(5));
    settle().await;
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(drain(&mut rx).get("timeout"), Some(&1));

    // Arrives after the deadline already resolved: silently ignored.
    handle.emit(BackendEvent::SinglePositionUpdated(fix_with_accuracy(
        53.0, 10.0, 10.0,
    )));
    settle().await;
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test(start_paused = true)]
async fn continuous_fix_resolves_pending_request() {
    let (coordinator, handle) = manual_coordinator();
    let mut rx = coordinator.subscribe();

    coordinator.start_updates();
    settle().await;
    assert_eq!(handle.starts(), 1);

    // Interval (1s default) is within the 30s deadline: no extra
    // backend contact.
    coordinator.request_update(Duration::from_secs(30));
    settle().await;
    assert_eq!(handle.requests(), 0);

    handle.emit(BackendEvent::PositionUpdated(fix_with_accuracy(
        53.0, 10.0, 10.0,
    )));
    settle().await;

    assert_eq!(drain(&mut rx).get("position"), Some(&1));
    assert!(!coordinator.is_single_pending());

    // And the deadline later stays silent.
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(drain(&mut rx).get("timeout").is_none());
}

// ============================================================================
// Coordinator: staleness watchdog
// ============================================================================

#[tokio::test(start_paused = true)]
async fn silent_source_trips_watchdog_exactly_once() {
    let (coordinator, _handle) = manual_coordinator();
    let mut rx = coordinator.subscribe();

    coordinator.start_updates();
    settle().await;

    tokio::time::sleep(COLD_START_TIMEOUT * 3).await;

    assert_eq!(drain(&mut rx).get("timeout"), Some(&1), "latched, not repeated");
    assert_eq!(coordinator.last_error(), Some(SourceError::UpdateTimeout));
}

#[tokio::test(start_paused = true)]
async fn update_after_staleness_unlatches_watchdog() {
    let (coordinator, handle) = manual_coordinator();
    let mut rx = coordinator.subscribe();

    coordinator.start_updates();
    settle().await;

    tokio::time::sleep(COLD_START_TIMEOUT * 2).await;
    assert_eq!(drain(&mut rx).get("timeout"), Some(&1));

    // Recovery clears the latch and the error.
    handle.emit(BackendEvent::PositionUpdated(fix_with_accuracy(
        53.0, 10.0, 10.0,
    )));
    settle().await;
    assert_eq!(coordinator.last_error(), None);

    // Silence again: the watchdog may fire a second time now.
    tokio::time::sleep(COLD_START_TIMEOUT * 2).await;
    assert_eq!(drain(&mut rx).get("timeout"), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn backend_errors_pass_through() {
    let (coordinator, handle) = manual_coordinator();
    let mut rx = coordinator.subscribe();

    handle.emit(BackendEvent::Error(SourceError::AccessDenied));
    settle().await;

    assert_eq!(drain(&mut rx).get("error"), Some(&1));
    assert_eq!(coordinator.last_error(), Some(SourceError::AccessDenied));
}

// ============================================================================
// Service: lifecycle and source swaps
// ============================================================================

/// Service whose factory knows the manual backend plus the builtins.
fn service_with_manual() -> (PositioningService, ManualHandle) {
    let (backend, handle) = ManualSource::new();
    let backend = Mutex::new(Some(backend));

    let mut factory = SourceFactory::with_builtin_sources();
    factory.register("manual", move |_config| {
        // Single-shot constructor: hands out the one shared instance.
        backend
            .lock()
            .unwrap()
            .take()
            .map(|b| Box::new(ArcBackend(b)) as Box<dyn SourceBackend>)
    });

    let service = PositioningService::with_factory(factory);
    assert!(service.set_source(Some("manual"), &SourceConfig::new()));
    (service, handle)
}

/// Box-compatible wrapper delegating to a shared backend instance.
struct ArcBackend(Arc<ManualSource>);

impl SourceBackend for ArcBackend {
    fn name(&self) -> &str {
        self.0.name()
    }
    fn start_updates(&self) {
        self.0.start_updates()
    }
    fn stop_updates(&self) {
        self.0.stop_updates()
    }
    fn request_update(&self, timeout: Duration) {
        self.0.request_update(timeout)
    }
    fn set_update_interval(&self, interval: Duration) -> Duration {
        self.0.set_update_interval(interval)
    }
    fn update_interval(&self) -> Duration {
        self.0.update_interval()
    }
    fn minimum_update_interval(&self) -> Duration {
        self.0.minimum_update_interval()
    }
    fn default_update_interval(&self) -> Duration {
        self.0.default_update_interval()
    }
    fn last_known_position(&self, satellite_only: bool) -> Option<PositionUpdate> {
        self.0.last_known_position(satellite_only)
    }
    fn supported_methods(&self) -> PositioningMethods {
        self.0.supported_methods()
    }
    fn preferred_methods(&self) -> PositioningMethods {
        self.0.preferred_methods()
    }
    fn set_preferred_methods(&self, methods: PositioningMethods) {
        self.0.set_preferred_methods(methods)
    }
    fn set_backend_property(&self, name: &str, value: ConfigValue) -> bool {
        self.0.set_backend_property(name, value)
    }
    fn backend_property(&self, name: &str) -> Option<ConfigValue> {
        self.0.backend_property(name)
    }
    fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.0.subscribe()
    }
}

#[tokio::test(start_paused = true)]
async fn service_republishes_position_and_satellites() {
    let (service, handle) = service_with_manual();
    let mut rx = service.subscribe();

    service.start();
    settle().await;

    handle.emit(BackendEvent::PositionUpdated(fix_with_accuracy(
        53.0, 10.0, 10.0,
    )));
    handle.emit(BackendEvent::SatellitesInView(vec![sat(1, 30), sat(2, 25)]));
    handle.emit(BackendEvent::SatellitesInUse(vec![sat(1, 30)]));
    settle().await;

    let tally = drain(&mut rx);
    assert_eq!(tally.get("position"), Some(&1));
    assert_eq!(tally.get("in_view"), Some(&1));
    assert_eq!(tally.get("in_use"), Some(&1));
    assert_eq!(tally.get("active"), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn swap_away_from_active_source_stays_active() {
    let (service, handle) = service_with_manual();
    service.set_update_interval(Duration::from_millis(500));
    service.start();
    settle().await;

    let mut rx = service.subscribe();
    assert!(service.set_source(Some("simulated"), &SourceConfig::new()));
    settle().await;

    // Old source is silenced; events it emits now never surface.
    handle.emit(BackendEvent::PositionUpdated(fix_with_accuracy(
        0.0, 0.0, 1.0,
    )));
    settle().await;

    assert!(service.is_active());
    assert_eq!(service.source_name().as_deref(), Some("simulated"));
    assert_eq!(service.update_interval(), Duration::from_millis(500));

    // The new source took over continuous updates on its own.
    tokio::time::sleep(Duration::from_secs(2)).await;
    let tally = drain(&mut rx);
    assert!(tally.get("position").copied().unwrap_or(0) >= 1);
    assert!(tally.get("active").is_none(), "no active blip across the swap");
}

#[tokio::test(start_paused = true)]
async fn single_update_on_service_completes_and_deactivates() {
    let (service, handle) = service_with_manual();
    let mut rx = service.subscribe();

    service.update(Duration::from_secs(30));
    settle().await;
    assert!(service.is_active());

    handle.emit(BackendEvent::SinglePositionUpdated(fix_with_accuracy(
        53.0, 10.0, 10.0,
    )));
    settle().await;
    tokio::time::sleep(Duration::from_secs(31)).await;

    assert!(!service.is_active());
    let tally = drain(&mut rx);
    assert_eq!(tally.get("position"), Some(&1));
    // active: true at request, false at completion
    assert_eq!(tally.get("active"), Some(&2));
}

#[tokio::test(start_paused = true)]
async fn sourceless_service_reports_unknown_source() {
    let factory = SourceFactory::new();
    let service = PositioningService::with_factory(factory);
    let mut rx = service.subscribe();

    // Construction failure surfaces via the return value only.
    assert!(!service.set_source(Some("anything"), &SourceConfig::new()));
    assert!(!service.is_valid());
    settle().await;
    assert!(drain(&mut rx).is_empty());

    // Operating the sourceless facade is what raises the error.
    service.start();
    settle().await;

    assert_eq!(service.last_error(), Some(SourceError::UnknownSource));
    assert_eq!(drain(&mut rx).get("error"), Some(&1));
    assert!(!service.is_active());
}

// ============================================================================
// End to end: satellite snapshots through the model
// ============================================================================

#[tokio::test(start_paused = true)]
async fn satellite_snapshots_reconcile_through_the_service() {
    let (service, handle) = service_with_manual();
    let mut rx = service.subscribe();
    let mut model = SatelliteModel::new();

    service.start();
    settle().await;

    handle.emit(BackendEvent::SatellitesInView(vec![
        sat(1, 30),
        sat(2, 25),
        sat(3, 40),
    ]));
    handle.emit(BackendEvent::SatellitesInUse(vec![sat(1, 30), sat(3, 40)]));
    settle().await;

    while let Ok(event) = rx.try_recv() {
        model.apply_event(&event);
    }
    assert_eq!(model.len(), 3);
    assert_eq!(model.in_use_count(), 2);

    // Second snapshot: 2 drops out, 3 strengthens, 5 appears.
    handle.emit(BackendEvent::SatellitesInView(vec![
        sat(1, 30),
        sat(3, 45),
        sat(5, 20),
    ]));
    settle().await;

    let mut ops = Vec::new();
    while let Ok(event) = rx.try_recv() {
        ops.extend(model.apply_event(&event));
    }
    assert!(ops.contains(&ModelOperation::Removed { index: 1 }));
    assert!(ops.contains(&ModelOperation::Inserted { index: 2 }));
    assert_eq!(model.len(), 3);
    // Identifier 1 and 3 are still marked used, 2's membership is gone.
    assert!(model.is_in_use(1));
    assert!(model.is_in_use(3));
    assert_eq!(model.in_use_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn simulated_source_end_to_end() {
    let service = PositioningService::with_default_source(&SourceConfig::new());
    let mut rx = service.subscribe();
    let mut model = SatelliteModel::new();

    service.start();
    settle().await;
    tokio::time::sleep(Duration::from_secs(3)).await;

    let mut fixes = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, SourceEvent::PositionUpdated(_)) {
            fixes += 1;
        }
        model.apply_event(&event);
    }
    assert!(fixes >= 2, "continuous fixes at the default interval");
    assert!(!model.is_empty(), "satellite snapshots reached the model");
    assert!(model.in_use_count() >= 1);
    assert_eq!(service.last_error(), None);
}
