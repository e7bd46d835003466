//! Trace replay backend.
//!
//! Replays a pre-decoded sequence of fixes (for example produced from an
//! NMEA log by an external decoder) at the configured cadence. Emission
//! stops silently at the end of the trace; the last fix stays cached.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::position::PositionUpdate;

use super::{
    clamp_interval, BackendEvent, ConfigValue, PositioningMethods, SourceBackend, SourceConfig,
};

struct ReplayState {
    trace: Vec<PositionUpdate>,
    cursor: usize,
    interval: Duration,
    preferred: PositioningMethods,
    last_fix: Option<PositionUpdate>,
    emitter: Option<CancellationToken>,
}

impl ReplayState {
    /// Take the next fix from the trace, caching it. `None` when exhausted.
    fn next_fix(&mut self) -> Option<PositionUpdate> {
        let fix = self.trace.get(self.cursor)?.clone();
        self.cursor += 1;
        self.last_fix = Some(fix.clone());
        Some(fix)
    }
}

/// Backend that replays a recorded trace of fixes.
///
/// The trace is supplied at construction; this backend does none of the
/// decoding itself. Replay is satellite-method only, mirroring the log
/// sources it stands in for.
pub struct ReplaySource {
    shared: Arc<Mutex<ReplayState>>,
    events_tx: broadcast::Sender<BackendEvent>,
}

impl ReplaySource {
    /// Registered backend name.
    pub const NAME: &'static str = "replay";

    /// Smallest supported interval.
    pub const MINIMUM_INTERVAL: Duration = Duration::from_millis(100);

    /// Interval used when none is configured.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

    /// Create a replay source over a decoded trace.
    pub fn new(trace: Vec<PositionUpdate>) -> Self {
        let (events_tx, _) = broadcast::channel(32);
        Self {
            shared: Arc::new(Mutex::new(ReplayState {
                trace,
                cursor: 0,
                interval: Self::DEFAULT_INTERVAL,
                preferred: PositioningMethods::SATELLITE,
                last_fix: None,
                emitter: None,
            })),
            events_tx,
        }
    }

    /// Factory entry point. The construction map carries no trace, so a
    /// factory-built replay source starts empty; callers that want content
    /// construct it directly with [`ReplaySource::new`].
    pub fn from_config(_config: &SourceConfig) -> Self {
        Self::new(Vec::new())
    }

    /// Number of fixes not yet replayed.
    pub fn remaining(&self) -> usize {
        let state = self.shared.lock().unwrap();
        state.trace.len() - state.cursor
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
                        let fix = shared.lock().unwrap().next_fix();
                        match fix {
                            Some(fix) => {
                                let _ = events_tx.send(BackendEvent::PositionUpdated(fix));
                            }
                            None => {
                                debug!("replay trace exhausted");
                                break;
                            }
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
        });

        cancel
    }
}

impl Drop for ReplaySource {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.lock() {
            if let Some(token) = state.emitter.take() {
                token.cancel();
            }
        }
    }
}

impl SourceBackend for ReplaySource {
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
        debug!(interval_ms = interval.as_millis() as u64, "replay started");
    }

    fn stop_updates(&self) {
        let token = self.shared.lock().unwrap().emitter.take();
        if let Some(token) = token {
            token.cancel();
        }
    }

    fn request_update(&self, _timeout: Duration) {
        // Serve the next trace entry on the single-request channel;
        // an exhausted trace emits nothing and the caller's deadline
        // policy takes over.
        let fix = self.shared.lock().unwrap().next_fix();
        if let Some(fix) = fix {
            let _ = self.events_tx.send(BackendEvent::SinglePositionUpdated(fix));
        }
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
        self.shared.lock().unwrap().last_fix.clone()
    }

    fn supported_methods(&self) -> PositioningMethods {
        PositioningMethods::SATELLITE
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::Coordinate;
    use std::time::SystemTime;

    fn make_trace(count: usize) -> Vec<PositionUpdate> {
        (0..count)
            .map(|i| {
                PositionUpdate::new(
                    Coordinate::new(53.0 + i as f64 * 0.01, 10.0),
                    SystemTime::now(),
                )
            })
            .collect()
    }

    #[test]
    fn test_interval_clamping() {
        let source = ReplaySource::new(Vec::new());
        assert_eq!(
            source.set_update_interval(Duration::from_millis(10)),
            ReplaySource::MINIMUM_INTERVAL
        );
        assert_eq!(
            source.set_update_interval(Duration::ZERO),
            ReplaySource::DEFAULT_INTERVAL
        );
    }

    #[tokio::test]
    async fn test_request_update_steps_through_trace() {
        let source = ReplaySource::new(make_trace(2));
        let mut rx = source.subscribe();

        source.request_update(Duration::ZERO);
        source.request_update(Duration::ZERO);
        // Exhausted: emits nothing
        source.request_update(Duration::ZERO);

        let mut singles = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, BackendEvent::SinglePositionUpdated(_)) {
                singles += 1;
            }
        }
        assert_eq!(singles, 2);
        assert_eq!(source.remaining(), 0);
        assert!(source.last_known_position(true).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_stops_at_end_of_trace() {
        let source = ReplaySource::new(make_trace(3));
        let mut rx = source.subscribe();

        source.set_update_interval(Duration::from_millis(100));
        source.start_updates();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let mut fixes = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, BackendEvent::PositionUpdated(_)) {
                fixes += 1;
            }
        }
        assert_eq!(fixes, 3);
        assert_eq!(source.remaining(), 0);
    }
}
