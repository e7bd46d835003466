//! Satellite list reconciliation.
//!
//! Sources hand over full snapshots of the satellites in view and in
//! use. [`SatelliteModel`] turns each snapshot into a minimal list of
//! row operations against its previous state, so a view layer can apply
//! targeted inserts, removes and per-row updates instead of rebuilding
//! on every snapshot.

mod model;

pub use model::{ChangedFields, ModelOperation, SatelliteModel};
