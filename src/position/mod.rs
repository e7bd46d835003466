//! Update envelope value types: position fixes and satellite snapshots.
//!
//! These are the immutable values that flow from backends through the
//! coordinator and facade to subscribers:
//!
//! - [`Coordinate`] / [`PositionUpdate`] - a single fix with optional attributes
//! - [`SatelliteInfo`] / [`SatelliteSystem`] - one satellite in a snapshot

mod satellite;
mod update;

pub use satellite::{SatelliteInfo, SatelliteSystem};
pub use update::{Coordinate, PositionUpdate, UpdateAttribute};
