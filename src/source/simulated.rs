//! Simulated positioning backend.
//!
//! Emits synthetic fixes along a circular track around a configurable
//! centre, plus alternating satellite snapshots, at the configured
//! interval. Useful for development and for exercising consumers without
//! hardware.

use std::f64::consts::TAU;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::position::{
    Coordinate, PositionUpdate, SatelliteInfo, SatelliteSystem, UpdateAttribute,
};

use super::{
    clamp_interval, BackendEvent, ConfigValue, PositioningMethods, SourceBackend, SourceConfig,
};

/// Horizontal accuracy reported for every synthetic fix, in metres.
const SIMULATED_ACCURACY_M: f64 = 10.0;

/// Track radius in degrees (~1 km at mid latitudes).
const TRACK_RADIUS_DEG: f64 = 0.01;

/// Phase steps for one full lap of the circular track.
const STEPS_PER_LAP: u64 = 60;

struct SimulatedState {
    interval: Duration,
    preferred: PositioningMethods,
    center: Coordinate,
    phase: u64,
    last_fix: Option<PositionUpdate>,
    emitter: Option<CancellationToken>,
}

/// Synthetic backend driving a circular track around a centre coordinate.
///
/// Construction parameters (all optional): `center.latitude`,
/// `center.longitude`. Both are also exposed through the backend-property
/// passthrough. Must be created within a Tokio runtime; emission runs on a
/// spawned task started by [`SourceBackend::start_updates`].
pub struct SimulatedSource {
    shared: Arc<Mutex<SimulatedState>>,
    events_tx: broadcast::Sender<BackendEvent>,
}

impl SimulatedSource {
    /// Registered backend name.
    pub const NAME: &'static str = "simulated";

    /// Smallest supported interval.
    pub const MINIMUM_INTERVAL: Duration = Duration::from_millis(50);

    /// Interval used when none is configured.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

    /// Create a simulated source around the default centre (Hamburg).
    pub fn new() -> Self {
        Self::from_config(&SourceConfig::new())
    }

    /// Create a simulated source from construction parameters.
    pub fn from_config(config: &SourceConfig) -> Self {
        let latitude = config
            .get("center.latitude")
            .and_then(ConfigValue::as_float)
            .unwrap_or(53.630278);
        let longitude = config
            .get("center.longitude")
            .and_then(ConfigValue::as_float)
            .unwrap_or(9.988333);

        let (events_tx, _) = broadcast::channel(32);
        Self {
            shared: Arc::new(Mutex::new(SimulatedState {
                interval: Self::DEFAULT_INTERVAL,
                preferred: PositioningMethods::ALL,
                center: Coordinate::new(latitude, longitude),
                phase: 0,
                last_fix: None,
                emitter: None,
            })),
            events_tx,
        }
    }

    /// Compute the fix for the given phase step; also advances satellite data.
    fn make_fix(center: Coordinate, phase: u64) -> PositionUpdate {
        let theta = (phase % STEPS_PER_LAP) as f64 / STEPS_PER_LAP as f64 * TAU;
        let coordinate = Coordinate::with_altitude(
            center.latitude + TRACK_RADIUS_DEG * theta.cos(),
            center.longitude + TRACK_RADIUS_DEG * theta.sin(),
            120.0,
        );
        // Heading is tangent to the circle.
        let direction = (theta.to_degrees() + 90.0) % 360.0;

        PositionUpdate::new(coordinate, SystemTime::now())
            .with_attribute(UpdateAttribute::HorizontalAccuracy, SIMULATED_ACCURACY_M)
            .with_attribute(UpdateAttribute::GroundSpeed, 12.0)
            .with_attribute(UpdateAttribute::Direction, direction)
    }

    /// Two alternating satellite constellation snapshots, so consumers see
    /// inserts and removals rather than a static list.
    fn make_satellites(phase: u64) -> Vec<SatelliteInfo> {
        if phase % 2 == 0 {
            (0..5)
                .map(|i| {
                    SatelliteInfo::new(i, 20 + 5 * i, SatelliteSystem::Gps)
                        .with_bearing((i as f64) * 60.0, 25.0 + (i as f64) * 10.0)
                })
                .collect()
        } else {
            (0..9)
                .map(|i| {
                    SatelliteInfo::new(i * 2, 18 + 4 * i, SatelliteSystem::Gps)
                        .with_bearing((i as f64) * 40.0, 20.0 + (i as f64) * 7.0)
                })
                .collect()
        }
    }

    /// Emit one tick worth of events and advance the phase.
    fn emit_tick(shared: &Mutex<SimulatedState>, events_tx: &broadcast::Sender<BackendEvent>) {
        let (fix, satellites) = {
            let mut state = shared.lock().unwrap();
            let fix = Self::make_fix(state.center, state.phase);
            let satellites = Self::make_satellites(state.phase);
            state.phase += 1;
            state.last_fix = Some(fix.clone());
            (fix, satellites)
        };

        let in_use: Vec<SatelliteInfo> = satellites
            .iter()
            .copied()
            .filter(|sat| sat.signal_strength >= 30)
            .collect();

        let _ = events_tx.send(BackendEvent::PositionUpdated(fix));
        let _ = events_tx.send(BackendEvent::SatellitesInView(satellites));
        let _ = events_tx.send(BackendEvent::SatellitesInUse(in_use));
    }

    fn spawn_emitter(&self, interval: Duration) -> CancellationToken {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let shared = Arc::clone(&self.shared);
        let events_tx = self.events_tx.clone();

        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Self::emit_tick(&shared, &events_tx);
                    }
                    _ = token.cancelled() => {
                        debug!("simulated emitter stopped");
                        break;
                    }
                }
            }
        });

        cancel
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SimulatedSource {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.lock() {
            if let Some(token) = state.emitter.take() {
                token.cancel();
            }
        }
    }
}

impl SourceBackend for SimulatedSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn start_updates(&self) {
        let interval = {
            let state = self.shared.lock().unwrap();
            if state.emitter.is_some() {
                return;
            }
            state.interval
        };

        let token = self.spawn_emitter(interval);
        self.shared.lock().unwrap().emitter = Some(token);
        debug!(interval_ms = interval.as_millis() as u64, "simulated updates started");
    }

    fn stop_updates(&self) {
        let token = self.shared.lock().unwrap().emitter.take();
        if let Some(token) = token {
            token.cancel();
            debug!("simulated updates stopped");
        }
    }

    fn request_update(&self, _timeout: Duration) {
        // One immediate fix on the dedicated single-request channel.
        let fix = {
            let mut state = self.shared.lock().unwrap();
            let fix = Self::make_fix(state.center, state.phase);
            state.phase += 1;
            state.last_fix = Some(fix.clone());
            fix
        };
        let _ = self.events_tx.send(BackendEvent::SinglePositionUpdated(fix));
    }

    fn set_update_interval(&self, interval: Duration) -> Duration {
        let effective = clamp_interval(interval, Self::MINIMUM_INTERVAL, Self::DEFAULT_INTERVAL);
        let restart = {
            let mut state = self.shared.lock().unwrap();
            let changed = state.interval != effective;
            state.interval = effective;
            changed && state.emitter.is_some()
        };

        if restart {
            self.stop_updates();
            self.start_updates();
        }
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
        // Synthetic fixes count as satellite fixes.
        self.shared.lock().unwrap().last_fix.clone()
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

    fn set_backend_property(&self, name: &str, value: ConfigValue) -> bool {
        let Some(value) = value.as_float() else {
            return false;
        };
        let mut state = self.shared.lock().unwrap();
        match name {
            "center.latitude" => {
                state.center.latitude = value;
                true
            }
            "center.longitude" => {
                state.center.longitude = value;
                true
            }
            _ => false,
        }
    }

    fn backend_property(&self, name: &str) -> Option<ConfigValue> {
        let state = self.shared.lock().unwrap();
        match name {
            "center.latitude" => Some(ConfigValue::Float(state.center.latitude)),
            "center.longitude" => Some(ConfigValue::Float(state.center.longitude)),
            _ => None,
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.events_tx.subscribe()
    }
}
