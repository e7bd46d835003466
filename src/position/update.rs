//! Position fix value types.
//!
//! A [`PositionUpdate`] is the envelope for a single fix as reported by a
//! backend: a coordinate, a reported timestamp, and a set of optional named
//! attributes (accuracies, speed, direction). Updates are immutable once
//! emitted; backends create a fresh value per event and consumers only ever
//! supersede them.

use std::collections::HashMap;
use std::time::SystemTime;

/// A geodetic coordinate in degrees, with optional altitude in metres.
///
/// A coordinate constructed via [`Coordinate::invalid`] (or with a
/// non-finite or out-of-range latitude or longitude) reports itself as
/// invalid as a whole; there is no "partially valid" coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    /// Latitude in degrees (-90 to 90).
    pub latitude: f64,

    /// Longitude in degrees (-180 to 180).
    pub longitude: f64,

    /// Altitude above mean sea level in metres, if reported.
    pub altitude: Option<f64>,
}

impl Coordinate {
    /// Create a 2D coordinate.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
        }
    }

    /// Create a 3D coordinate with altitude in metres.
    pub fn with_altitude(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: Some(altitude),
        }
    }

    /// A coordinate carrying no usable position.
    pub fn invalid() -> Self {
        Self {
            latitude: f64::NAN,
            longitude: f64::NAN,
            altitude: None,
        }
    }

    /// True when both latitude and longitude are finite and in range.
    ///
    /// An invalid latitude or longitude makes the whole coordinate invalid;
    /// altitude never affects validity.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl Default for Coordinate {
    fn default() -> Self {
        Self::invalid()
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.is_valid() {
            return write!(f, "invalid");
        }
        match self.altitude {
            Some(alt) => write!(f, "{:.5}, {:.5}, {:.1}m", self.latitude, self.longitude, alt),
            None => write!(f, "{:.5}, {:.5}", self.latitude, self.longitude),
        }
    }
}

/// Named numeric attributes a fix may carry, each independently optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateAttribute {
    /// Bearing of movement in degrees from true north.
    Direction,
    /// Ground speed in metres per second.
    GroundSpeed,
    /// Vertical speed in metres per second.
    VerticalSpeed,
    /// Difference between true north and magnetic north in degrees.
    MagneticVariation,
    /// Horizontal accuracy radius in metres (lower is better).
    HorizontalAccuracy,
    /// Vertical accuracy in metres.
    VerticalAccuracy,
    /// Accuracy of the direction attribute in degrees.
    DirectionAccuracy,
}

/// A single position fix with reported timestamp and optional attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionUpdate {
    coordinate: Coordinate,
    timestamp: SystemTime,
    attributes: HashMap<UpdateAttribute, f64>,
}

impl PositionUpdate {
    /// Create a fix from a coordinate and the time the fix was measured.
    ///
    /// The timestamp is the one reported by the producing backend, not the
    /// time of delivery; late candidates are compared by this value.
    pub fn new(coordinate: Coordinate, timestamp: SystemTime) -> Self {
        Self {
            coordinate,
            timestamp,
            attributes: HashMap::new(),
        }
    }

    /// Builder-style attribute attachment.
    pub fn with_attribute(mut self, attribute: UpdateAttribute, value: f64) -> Self {
        self.attributes.insert(attribute, value);
        self
    }

    /// The fix coordinate.
    pub fn coordinate(&self) -> Coordinate {
        self.coordinate
    }

    /// The reported measurement time.
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Value of a named attribute, if present.
    pub fn attribute(&self, attribute: UpdateAttribute) -> Option<f64> {
        self.attributes.get(&attribute).copied()
    }

    /// Whether a named attribute is present.
    pub fn has_attribute(&self, attribute: UpdateAttribute) -> bool {
        self.attributes.contains_key(&attribute)
    }

    /// True when the fix carries a valid coordinate.
    pub fn is_valid(&self) -> bool {
        self.coordinate.is_valid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_coordinate_validity() {
        assert!(Coordinate::new(53.5, 10.0).is_valid());
        assert!(Coordinate::with_altitude(53.5, 10.0, 120.0).is_valid());
        assert!(!Coordinate::invalid().is_valid());
        assert!(!Coordinate::default().is_valid());

        // Out of range
        assert!(!Coordinate::new(91.0, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, 181.0).is_valid());

        // Invalid latitude alone invalidates the whole coordinate
        assert!(!Coordinate::new(f64::NAN, 10.0).is_valid());
        assert!(!Coordinate::new(53.5, f64::NAN).is_valid());
    }

    #[test]
    fn test_coordinate_display() {
        assert_eq!(Coordinate::new(53.5, 10.0).to_string(), "53.50000, 10.00000");
        assert_eq!(Coordinate::invalid().to_string(), "invalid");
    }

    #[test]
    fn test_update_attributes_independent() {
        let update = PositionUpdate::new(Coordinate::new(53.5, 10.0), SystemTime::now())
            .with_attribute(UpdateAttribute::HorizontalAccuracy, 5.0)
            .with_attribute(UpdateAttribute::GroundSpeed, 12.5);

        assert_eq!(update.attribute(UpdateAttribute::HorizontalAccuracy), Some(5.0));
        assert_eq!(update.attribute(UpdateAttribute::GroundSpeed), Some(12.5));
        assert!(!update.has_attribute(UpdateAttribute::VerticalAccuracy));
        assert_eq!(update.attribute(UpdateAttribute::VerticalAccuracy), None);
    }

    #[test]
    fn test_update_validity_follows_coordinate() {
        let ts = SystemTime::now();
        assert!(PositionUpdate::new(Coordinate::new(53.5, 10.0), ts).is_valid());
        assert!(!PositionUpdate::new(Coordinate::invalid(), ts).is_valid());
    }

    #[test]
    fn test_update_timestamp_is_reported_time() {
        let reported = SystemTime::now() - Duration::from_secs(25);
        let update = PositionUpdate::new(Coordinate::new(53.5, 10.0), reported);
        assert_eq!(update.timestamp(), reported);
    }
}
