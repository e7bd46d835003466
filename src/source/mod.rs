//! Source backend contract and concrete backends.
//!
//! A backend is a polymorphic provider of position and satellite data:
//! hardware GPS, NMEA trace replay, simulated. This module defines the
//! capability contract ([`SourceBackend`]), the raw event stream backends
//! emit ([`BackendEvent`]), the error taxonomy ([`SourceError`]), the
//! construction registry ([`SourceFactory`]) and two built-in backends:
//!
//! - [`SimulatedSource`] - synthetic fixes along a circular track
//! - [`ReplaySource`] - replays a pre-decoded fix trace
//!
//! Backends report results asynchronously: operations return immediately
//! and fixes or errors arrive on the broadcast stream returned by
//! [`SourceBackend::subscribe`].

mod config;
mod error;
mod factory;
mod replay;
mod simulated;

pub use config::{ConfigValue, SourceConfig};
pub use error::SourceError;
pub use factory::SourceFactory;
pub use replay::ReplaySource;
pub use simulated::SimulatedSource;

use std::time::Duration;

use tokio::sync::broadcast;

use crate::position::{PositionUpdate, SatelliteInfo};

/// Bitset of positioning method classes a source can use.
///
/// Stored as a plain bit mask so backends can advertise combinations
/// without a dedicated enum per combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositioningMethods(pub u32);

impl PositioningMethods {
    /// No methods; a source configured with this cannot start.
    pub const NONE: Self = Self(0);

    /// Satellite-based methods (GPS, GLONASS, ...).
    pub const SATELLITE: Self = Self(0x0000_00ff);

    /// Non-satellite methods (cell, Wi-Fi, IP).
    pub const NON_SATELLITE: Self = Self(0xffff_ff00);

    /// Any method is acceptable.
    pub const ALL: Self = Self(0xffff_ffff);

    /// True when no method bit is set.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// True when all bits of `other` are set in `self`.
    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when `self` and `other` share at least one bit.
    pub fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl Default for PositioningMethods {
    fn default() -> Self {
        Self::ALL
    }
}

/// Raw event emitted by a backend.
///
/// Whether a position update belongs to the continuous stream or to a
/// dedicated single-request channel is carried in the variant; the
/// coordinator decides how each is arbitrated.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// A fix from the continuous update stream.
    PositionUpdated(PositionUpdate),

    /// A fix from the dedicated single-request channel. Platforms may
    /// deliver several of these for one request (one per provider); the
    /// coordinator buffers them and picks the best.
    SinglePositionUpdated(PositionUpdate),

    /// Full snapshot of satellites currently in view.
    SatellitesInView(Vec<SatelliteInfo>),

    /// Full snapshot of satellites currently used in the fix
    /// (a subset of the in-view snapshot).
    SatellitesInUse(Vec<SatelliteInfo>),

    /// An asynchronous backend error.
    Error(SourceError),

    /// The set of supported positioning methods changed at runtime.
    SupportedMethodsChanged,
}

/// Capability contract every positioning backend implements.
///
/// All methods take `&self`; backends keep their mutable state behind
/// interior mutability so a backend handle can be shared with the
/// coordinator's driver task.
pub trait SourceBackend: Send + Sync {
    /// Unique backend name, as registered with the factory.
    fn name(&self) -> &str;

    /// Begin continuous emission at the configured interval.
    ///
    /// No-op if already running. A backend without positioning capability
    /// reports the failure asynchronously as an [`BackendEvent::Error`]
    /// rather than failing the call.
    fn start_updates(&self);

    /// Halt continuous emission. No-op if not running; never errors.
    fn stop_updates(&self);

    /// Request exactly one fix on the single-request channel.
    ///
    /// `timeout` is advisory for the backend (it may schedule its own
    /// provider accordingly); deadline enforcement is the coordinator's
    /// job. `Duration::ZERO` means "use an implementation default".
    fn request_update(&self, timeout: Duration);

    /// Set the continuous update interval, returning the effective value.
    ///
    /// `Duration::ZERO` resets to [`Self::default_update_interval`];
    /// any other value is clamped to at least
    /// [`Self::minimum_update_interval`], never silently reduced below it.
    /// Reconfigures live if continuous updates are running.
    fn set_update_interval(&self, interval: Duration) -> Duration;

    /// Currently configured update interval.
    fn update_interval(&self) -> Duration;

    /// Smallest interval this backend supports.
    fn minimum_update_interval(&self) -> Duration;

    /// Interval used when none has been configured.
    fn default_update_interval(&self) -> Duration;

    /// Most recent cached fix, optionally restricted to satellite-derived
    /// fixes. `None` when nothing has been cached yet.
    fn last_known_position(&self, satellite_only: bool) -> Option<PositionUpdate>;

    /// Method classes this backend can provide.
    fn supported_methods(&self) -> PositioningMethods;

    /// Method classes the consumer prefers.
    fn preferred_methods(&self) -> PositioningMethods;

    /// Restrict the backend to the given method classes.
    fn set_preferred_methods(&self, methods: PositioningMethods);

    /// Set a backend-specific property. Returns false when the backend
    /// does not know the property.
    fn set_backend_property(&self, name: &str, value: ConfigValue) -> bool;

    /// Read a backend-specific property, if the backend knows it.
    fn backend_property(&self, name: &str) -> Option<ConfigValue>;

    /// Subscribe to the raw event stream.
    fn subscribe(&self) -> broadcast::Receiver<BackendEvent>;
}

/// Clamp an interval request the way every backend is required to.
///
/// Zero resets to `default`; positive values are clamped to `minimum`.
pub(crate) fn clamp_interval(
    requested: Duration,
    minimum: Duration,
    default: Duration,
) -> Duration {
    if requested == Duration::ZERO {
        default
    } else {
        requested.max(minimum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_methods_bitset() {
        assert!(PositioningMethods::NONE.is_empty());
        assert!(!PositioningMethods::SATELLITE.is_empty());
        assert!(PositioningMethods::ALL.contains(PositioningMethods::SATELLITE));
        assert!(PositioningMethods::ALL.contains(PositioningMethods::NON_SATELLITE));
        assert!(!PositioningMethods::SATELLITE.contains(PositioningMethods::ALL));
        assert!(PositioningMethods::SATELLITE.intersects(PositioningMethods::ALL));
        assert!(!PositioningMethods::SATELLITE.intersects(PositioningMethods::NON_SATELLITE));
    }

    #[test]
    fn test_methods_default_is_all() {
        assert_eq!(PositioningMethods::default(), PositioningMethods::ALL);
    }

    #[test]
    fn test_clamp_interval_below_minimum() {
        let min = Duration::from_millis(50);
        let default = Duration::from_millis(1000);
        assert_eq!(
            clamp_interval(Duration::from_millis(10), min, default),
            min
        );
    }

    #[test]
    fn test_clamp_interval_zero_resets_to_default() {
        let min = Duration::from_millis(50);
        let default = Duration::from_millis(1000);
        // Repeated zero-sets stay at the default
        assert_eq!(clamp_interval(Duration::ZERO, min, default), default);
        assert_eq!(clamp_interval(Duration::ZERO, min, default), default);
    }

    #[test]
    fn test_clamp_interval_above_minimum_unchanged() {
        let min = Duration::from_millis(50);
        let default = Duration::from_millis(1000);
        assert_eq!(
            clamp_interval(Duration::from_millis(200), min, default),
            Duration::from_millis(200)
        );
    }
}
