//! Satellite visibility value types.

/// GNSS constellation a satellite belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SatelliteSystem {
    /// Constellation not known.
    #[default]
    Undefined,
    /// GPS (USA).
    Gps,
    /// GLONASS (Russia).
    Glonass,
    /// Galileo (EU).
    Galileo,
    /// BeiDou (China).
    BeiDou,
    /// QZSS regional system (Japan).
    Qzss,
    /// Data aggregated over multiple constellations.
    Multiple,
    /// Backend-specific constellation outside the known set.
    Custom,
}

impl std::fmt::Display for SatelliteSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Undefined => "Undefined",
            Self::Gps => "GPS",
            Self::Glonass => "GLONASS",
            Self::Galileo => "GALILEO",
            Self::BeiDou => "BEIDOU",
            Self::Qzss => "QZSS",
            Self::Multiple => "Multiple",
            Self::Custom => "Custom",
        };
        f.write_str(name)
    }
}

/// A single satellite as seen in one snapshot.
///
/// Identity is the `identifier` (unique within a constellation); the same
/// physical satellite keeps its identifier across snapshots, which is what
/// the list reconciler keys on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SatelliteInfo {
    /// Satellite identifier (PRN or equivalent), unique per system.
    pub identifier: i32,

    /// Signal strength in dB-Hz; 0 when unknown.
    pub signal_strength: i32,

    /// Constellation this satellite belongs to.
    pub system: SatelliteSystem,

    /// Azimuth in degrees from true north, if reported.
    pub azimuth: Option<f64>,

    /// Elevation above the horizon in degrees, if reported.
    pub elevation: Option<f64>,
}

impl SatelliteInfo {
    /// Create a satellite entry with identifier and signal strength only.
    pub fn new(identifier: i32, signal_strength: i32, system: SatelliteSystem) -> Self {
        Self {
            identifier,
            signal_strength,
            system,
            azimuth: None,
            elevation: None,
        }
    }

    /// Builder-style azimuth/elevation attachment.
    pub fn with_bearing(mut self, azimuth: f64, elevation: f64) -> Self {
        self.azimuth = Some(azimuth);
        self.elevation = Some(elevation);
        self
    }
}
