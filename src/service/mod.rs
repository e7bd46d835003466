//! High-level positioning facade.
//!
//! [`PositioningService`] is the consumer-facing surface: it owns at most
//! one [`UpdateCoordinator`] at a time, lets the underlying source be
//! swapped at runtime without disturbing subscribers, and keeps the
//! active-flag bookkeeping (a single update holds the service active
//! until it completes, unless continuous updates are also on).
//!
//! Consumer-visible state (desired interval, preferred methods, the
//! regular-updates flag) survives a source swap and is re-applied to the
//! new source before it starts.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinator::{SourceEvent, UpdateCoordinator};
use crate::position::PositionUpdate;
use crate::source::{
    ConfigValue, PositioningMethods, SourceConfig, SourceError, SourceFactory,
};

/// Facade over one switchable positioning source.
///
/// All methods take `&self`; state lives behind a mutex so the service
/// can be shared across tasks in an `Arc`. Attaching a source spawns
/// driver and forwarder tasks, so the service must be used within a
/// Tokio runtime.
pub struct PositioningService {
    inner: Arc<Mutex<Inner>>,
    events_tx: broadcast::Sender<SourceEvent>,
    factory: SourceFactory,
}

struct Inner {
    coordinator: Option<Arc<UpdateCoordinator>>,
    forwarder: Option<CancellationToken>,

    /// Interval the consumer asked for, replayed onto a swapped-in
    /// source. `None` means "source default".
    desired_interval: Option<Duration>,
    preferred: PositioningMethods,

    active: bool,
    regular_updates: bool,
    single_update: bool,

    name: Option<String>,
    last_error: Option<SourceError>,
}

impl Inner {
    /// Mark a pending single update as served. Active drops only when
    /// continuous updates are not also running.
    fn complete_single_update(&mut self) -> Option<SourceEvent> {
        if !self.single_update {
            return None;
        }
        self.single_update = false;
        if !self.regular_updates && self.active {
            self.active = false;
            return Some(SourceEvent::ActiveChanged(false));
        }
        None
    }
}

impl PositioningService {
    /// Service with the built-in source factory and no source attached.
    pub fn new() -> Self {
        Self::with_factory(SourceFactory::with_builtin_sources())
    }

    /// Service over a caller-assembled factory.
    pub fn with_factory(factory: SourceFactory) -> Self {
        let (events_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                coordinator: None,
                forwarder: None,
                desired_interval: None,
                preferred: PositioningMethods::ALL,
                active: false,
                regular_updates: false,
                single_update: false,
                name: None,
                last_error: None,
            })),
            events_tx,
            factory,
        }
    }

    /// Attach the factory's default source. Convenience for startup.
    pub fn with_default_source(config: &SourceConfig) -> Self {
        let service = Self::new();
        service.set_source(None, config);
        service
    }

    /// Swap the underlying source.
    ///
    /// `name` selects a factory-registered source; `None` selects the
    /// default. An unknown name falls back to the default; if that also
    /// fails the service is left sourceless ([`Self::is_valid`] turns
    /// false) with no error event raised. Starting or requesting while
    /// sourceless is what reports [`SourceError::UnknownSource`].
    ///
    /// The old source is fully torn down (and its event stream silenced)
    /// before the new one is constructed. Desired interval and preferred
    /// methods carry over, and if continuous updates were running the
    /// new source is started as the final step, so subscribers see no
    /// `ActiveChanged` blip across the swap.
    ///
    /// Returns whether a source is attached afterwards.
    pub fn set_source(&self, name: Option<&str>, config: &SourceConfig) -> bool {
        let mut deferred: Vec<SourceEvent> = Vec::new();
        let attached;
        {
            let mut inner = self.inner.lock().unwrap();

            // Re-selecting the source already in place is a no-op.
            let requested = match name {
                Some(requested) => Some(requested.to_string()),
                None => self.factory.default_source_name(),
            };
            if requested.is_some() && requested == inner.name {
                return true;
            }

            let old_methods = inner
                .coordinator
                .as_ref()
                .map(|coordinator| coordinator.supported_methods());

            // Teardown first: silence before stopping, so subscribers
            // never see the old source wind down.
            if let Some(cancel) = inner.forwarder.take() {
                cancel.cancel();
            }
            if let Some(old) = inner.coordinator.take() {
                old.stop_updates();
                old.shutdown();
                debug!(source = old.name(), "source detached");
            }
            // A single request in flight on the old source can no longer
            // complete.
            if let Some(event) = inner.complete_single_update() {
                deferred.push(event);
            }

            let backend = match name {
                Some(requested) => {
                    let created = self.factory.create_source(requested, config);
                    if created.is_none() {
                        warn!(requested, "unknown source, falling back to default");
                    }
                    created.or_else(|| self.factory.create_default_source(config))
                }
                None => self.factory.create_default_source(config),
            };

            match backend {
                Some(backend) => {
                    let coordinator = Arc::new(UpdateCoordinator::new(Arc::from(backend)));

                    if let Some(interval) = inner.desired_interval {
                        coordinator.set_update_interval(interval);
                    }
                    coordinator.set_preferred_methods(inner.preferred);

                    let cancel = CancellationToken::new();
                    tokio::spawn(forward_events(
                        coordinator.subscribe(),
                        Arc::clone(&self.inner),
                        self.events_tx.clone(),
                        cancel.clone(),
                    ));
                    inner.forwarder = Some(cancel);

                    if old_methods != Some(coordinator.supported_methods()) {
                        deferred.push(SourceEvent::SupportedMethodsChanged);
                    }

                    // Start last: the source only runs once fully wired.
                    if inner.regular_updates {
                        coordinator.start_updates();
                    }

                    info!(source = coordinator.name(), "source attached");
                    inner.name = Some(coordinator.name().to_string());
                    inner.coordinator = Some(coordinator);
                    attached = true;
                }
                None => {
                    // Construction failure is reported by the return
                    // value, not an error event.
                    inner.name = None;
                    inner.regular_updates = false;
                    if inner.active {
                        inner.active = false;
                        deferred.push(SourceEvent::ActiveChanged(false));
                    }
                    attached = false;
                }
            }
        }

        // Notifications go out after the swap is complete and the lock
        // is released.
        for event in deferred {
            let _ = self.events_tx.send(event);
        }
        attached
    }

    /// Begin continuous updates. Sourceless, this reports
    /// [`SourceError::UnknownSource`] and stays inactive.
    pub fn start(&self) {
        let mut deferred = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            match inner.coordinator.clone() {
                Some(coordinator) => {
                    inner.regular_updates = true;
                    if !inner.active {
                        inner.active = true;
                        deferred.push(SourceEvent::ActiveChanged(true));
                    }
                    coordinator.start_updates();
                }
                None => {
                    inner.last_error = Some(SourceError::UnknownSource);
                    deferred.push(SourceEvent::Error(SourceError::UnknownSource));
                }
            }
        }
        for event in deferred {
            let _ = self.events_tx.send(event);
        }
    }

    /// Stop continuous updates. The service stays active while a single
    /// update is still pending.
    pub fn stop(&self) {
        let mut deferred = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            inner.regular_updates = false;
            if let Some(coordinator) = inner.coordinator.clone() {
                coordinator.stop_updates();
            }
            if inner.active && !inner.single_update {
                inner.active = false;
                deferred.push(SourceEvent::ActiveChanged(false));
            }
        }
        for event in deferred {
            let _ = self.events_tx.send(event);
        }
    }

    /// Request one fix within `timeout` (zero means the cold-start
    /// default). Holds the service active until the request resolves.
    pub fn update(&self, timeout: Duration) {
        let mut deferred = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            match inner.coordinator.clone() {
                Some(coordinator) => {
                    inner.single_update = true;
                    if !inner.active {
                        inner.active = true;
                        deferred.push(SourceEvent::ActiveChanged(true));
                    }
                    coordinator.request_update(timeout);
                }
                None => {
                    inner.last_error = Some(SourceError::UnknownSource);
                    deferred.push(SourceEvent::Error(SourceError::UnknownSource));
                }
            }
        }
        for event in deferred {
            let _ = self.events_tx.send(event);
        }
    }

    /// Set the continuous interval, returning the effective value. The
    /// request is remembered and re-applied when the source is swapped.
    pub fn set_update_interval(&self, interval: Duration) -> Duration {
        let mut inner = self.inner.lock().unwrap();
        inner.desired_interval = (interval != Duration::ZERO).then_some(interval);
        match inner.coordinator.as_ref() {
            Some(coordinator) => coordinator.set_update_interval(interval),
            None => interval,
        }
    }

    /// Effective continuous interval of the attached source.
    pub fn update_interval(&self) -> Duration {
        let inner = self.inner.lock().unwrap();
        match inner.coordinator.as_ref() {
            Some(coordinator) => coordinator.update_interval(),
            None => inner.desired_interval.unwrap_or(Duration::ZERO),
        }
    }

    /// Restrict positioning to the given method classes. Carries over
    /// to swapped-in sources.
    pub fn set_preferred_methods(&self, methods: PositioningMethods) {
        let mut inner = self.inner.lock().unwrap();
        inner.preferred = methods;
        if let Some(coordinator) = inner.coordinator.as_ref() {
            coordinator.set_preferred_methods(methods);
        }
    }

    /// Method classes the consumer prefers.
    pub fn preferred_methods(&self) -> PositioningMethods {
        self.inner.lock().unwrap().preferred
    }

    /// Method classes the attached source supports. `NONE` without a
    /// source.
    pub fn supported_methods(&self) -> PositioningMethods {
        let inner = self.inner.lock().unwrap();
        inner
            .coordinator
            .as_ref()
            .map(|coordinator| coordinator.supported_methods())
            .unwrap_or(PositioningMethods::NONE)
    }

    /// Most recent cached fix from the attached source.
    pub fn last_known_position(&self, satellite_only: bool) -> Option<PositionUpdate> {
        let coordinator = self.inner.lock().unwrap().coordinator.clone();
        coordinator.and_then(|c| c.last_known_position(satellite_only))
    }

    /// Backend-specific property passthrough.
    pub fn set_backend_property(&self, name: &str, value: ConfigValue) -> bool {
        let coordinator = self.inner.lock().unwrap().coordinator.clone();
        coordinator
            .map(|c| c.set_backend_property(name, value))
            .unwrap_or(false)
    }

    /// Backend-specific property passthrough.
    pub fn backend_property(&self, name: &str) -> Option<ConfigValue> {
        let coordinator = self.inner.lock().unwrap().coordinator.clone();
        coordinator.and_then(|c| c.backend_property(name))
    }

    /// Whether a source is currently attached.
    pub fn is_valid(&self) -> bool {
        self.inner.lock().unwrap().coordinator.is_some()
    }

    /// Name of the attached source, if any.
    pub fn source_name(&self) -> Option<String> {
        self.inner.lock().unwrap().name.clone()
    }

    /// Names of every source the factory can construct.
    pub fn available_sources(&self) -> Vec<String> {
        self.factory.available_sources()
    }

    /// Whether the service is delivering or awaiting updates.
    pub fn is_active(&self) -> bool {
        self.inner.lock().unwrap().active
    }

    /// Most recent error reported through the service.
    pub fn last_error(&self) -> Option<SourceError> {
        self.inner.lock().unwrap().last_error
    }

    /// Subscribe to the service event stream. Survives source swaps.
    pub fn subscribe(&self) -> broadcast::Receiver<SourceEvent> {
        self.events_tx.subscribe()
    }
}

impl Default for PositioningService {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PositioningService {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(cancel) = inner.forwarder.take() {
            cancel.cancel();
        }
        if let Some(coordinator) = inner.coordinator.take() {
            coordinator.shutdown();
        }
    }
}

/// Republishes coordinator events on the service stream, applying the
/// single-update/active bookkeeping on the way through.
async fn forward_events(
    mut rx: broadcast::Receiver<SourceEvent>,
    inner: Arc<Mutex<Inner>>,
    tx: broadcast::Sender<SourceEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "service event stream lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        let follow_up = {
            let mut inner = inner.lock().unwrap();
            match &event {
                SourceEvent::PositionUpdated(_) => {
                    if inner.last_error == Some(SourceError::UpdateTimeout) {
                        inner.last_error = None;
                    }
                    inner.complete_single_update()
                }
                SourceEvent::Error(error) => {
                    // Any error resolves a pending single update.
                    inner.last_error = Some(*error);
                    inner.complete_single_update()
                }
                _ => None,
            }
        };

        let _ = tx.send(event);
        if let Some(follow_up) = follow_up {
            let _ = tx.send(follow_up);
        }
    }
}
