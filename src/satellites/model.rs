use std::collections::{BTreeMap, HashSet};

use tracing::trace;

use crate::coordinator::SourceEvent;
use crate::position::SatelliteInfo;

/// Which per-satellite fields an `Updated` operation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangedFields {
    pub signal_strength: bool,
    pub azimuth: bool,
    pub elevation: bool,
    pub system: bool,
}

impl ChangedFields {
    fn between(old: &SatelliteInfo, new: &SatelliteInfo) -> Self {
        Self {
            signal_strength: old.signal_strength != new.signal_strength,
            azimuth: old.azimuth != new.azimuth,
            elevation: old.elevation != new.elevation,
            system: old.system != new.system,
        }
    }

    pub fn any(&self) -> bool {
        self.signal_strength || self.azimuth || self.elevation || self.system
    }
}

/// One row operation against the model's previous state.
///
/// Indices refer to the row list at the moment the operation applies,
/// assuming earlier operations in the same batch have already been
/// applied in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelOperation {
    /// Row at `index` was removed.
    Removed { index: usize },

    /// A row was inserted at `index`.
    Inserted { index: usize },

    /// Row at `index` changed in place.
    Updated { index: usize, fields: ChangedFields },

    /// The in-use flag of the row at `index` flipped.
    InUseChanged { index: usize },
}

/// Diffing view model over satellite snapshots.
///
/// Rows are kept sorted ascending by identifier, so the same satellite
/// keeps a stable position across snapshots and the emitted operations
/// stay minimal. The in-use identifier set is tracked separately from
/// the in-view rows and survives in-view updates, pruned of satellites
/// that dropped out of view.
#[derive(Debug, Default)]
pub struct SatelliteModel {
    rows: Vec<SatelliteInfo>,
    in_use: HashSet<i32>,
}

impl SatelliteModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current rows, sorted ascending by identifier.
    pub fn satellites(&self) -> &[SatelliteInfo] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether the satellite with `identifier` is used in the fix.
    pub fn is_in_use(&self, identifier: i32) -> bool {
        self.in_use.contains(&identifier)
    }

    /// Number of in-view rows currently used in the fix.
    pub fn in_use_count(&self) -> usize {
        self.rows
            .iter()
            .filter(|row| self.in_use.contains(&row.identifier))
            .count()
    }

    /// Reconcile against a new in-view snapshot.
    ///
    /// Duplicate identifiers in the snapshot keep the last occurrence.
    /// Satellites that left view are pruned from the in-use set as well;
    /// their removal operation already covers the visible change.
    pub fn update_in_view(&mut self, snapshot: &[SatelliteInfo]) -> Vec<ModelOperation> {
        let incoming = normalize(snapshot);
        let mut ops = Vec::new();

        let mut i = 0;
        let mut j = 0;
        while i < self.rows.len() || j < incoming.len() {
            match (self.rows.get(i).copied(), incoming.get(j).copied()) {
                (Some(old), Some(new)) if old.identifier == new.identifier => {
                    let fields = ChangedFields::between(&old, &new);
                    if fields.any() {
                        self.rows[i] = new;
                        ops.push(ModelOperation::Updated { index: i, fields });
                    }
                    i += 1;
                    j += 1;
                }
                (Some(old), Some(new)) if old.identifier < new.identifier => {
                    self.in_use.remove(&old.identifier);
                    self.rows.remove(i);
                    ops.push(ModelOperation::Removed { index: i });
                }
                (Some(_), Some(new)) | (None, Some(new)) => {
                    self.rows.insert(i, new);
                    ops.push(ModelOperation::Inserted { index: i });
                    i += 1;
                    j += 1;
                }
                (Some(old), None) => {
                    self.in_use.remove(&old.identifier);
                    self.rows.remove(i);
                    ops.push(ModelOperation::Removed { index: i });
                }
                (None, None) => break,
            }
        }

        trace!(rows = self.rows.len(), ops = ops.len(), "in-view reconciled");
        ops
    }

    /// Reconcile against a new in-use snapshot.
    ///
    /// Only identifiers matter here; the snapshot's other fields are
    /// ignored. Rows whose in-use flag flips produce an operation. Used
    /// satellites not currently in view are remembered and surface once
    /// they appear in a later in-view snapshot.
    pub fn update_in_use(&mut self, snapshot: &[SatelliteInfo]) -> Vec<ModelOperation> {
        let incoming: HashSet<i32> = snapshot.iter().map(|sat| sat.identifier).collect();

        let mut ops = Vec::new();
        for (index, row) in self.rows.iter().enumerate() {
            if self.in_use.contains(&row.identifier) != incoming.contains(&row.identifier) {
                ops.push(ModelOperation::InUseChanged { index });
            }
        }

        self.in_use = incoming;
        ops
    }

    /// Apply a satellite event from a source stream. Other event kinds
    /// produce no operations.
    pub fn apply_event(&mut self, event: &SourceEvent) -> Vec<ModelOperation> {
        match event {
            SourceEvent::SatellitesInViewUpdated(snapshot) => self.update_in_view(snapshot),
            SourceEvent::SatellitesInUseUpdated(snapshot) => self.update_in_use(snapshot),
            _ => Vec::new(),
        }
    }
}

/// Sort ascending by identifier, keeping the last occurrence of any
/// duplicated identifier.
fn normalize(snapshot: &[SatelliteInfo]) -> Vec<SatelliteInfo> {
    let mut by_id: BTreeMap<i32, SatelliteInfo> = BTreeMap::new();
    for sat in snapshot {
        by_id.insert(sat.identifier, *sat);
    }
    by_id.into_values().collect()
}
