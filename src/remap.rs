//! Remap tables: old temporal ID -> new temporal ID
//!
//! Pass 1 of a sort. For every snapshot the sort permutation decides where
//! each halo lands, and the halo at new position `k` of snapshot `s` gets the
//! ID `encode(s, k)`. The per-snapshot tables are keyed by the decoded local
//! index of the old ID, so a reference is routed by decoding it once:
//!
//!   old ID --decode--> (s, i) --tables[s][i]--> new ID
//!
//! All tables are frozen into one immutable [`RemapTables`] before any field
//! is rewritten, because a reference in one snapshot can point into any
//! other snapshot.

use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;

use crate::error::{Result, SortError};
use crate::snapshot::Snapshot;
use crate::sort_keys::sort_indices;
use crate::temporal_id::{Reference, TemporalIdCodec, NO_REFERENCE};

/// Old local index -> new temporal ID, for one snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotRemap {
    new_ids: FxHashMap<u64, i64>,
}

impl SnapshotRemap {
    /// New ID of the halo whose old ID decoded to `local_index`.
    pub fn get(&self, local_index: u64) -> Option<i64> {
        self.new_ids.get(&local_index).copied()
    }

    pub fn len(&self) -> usize {
        self.new_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.new_ids.is_empty()
    }
}

/// Everything pass 1 learns about one snapshot
#[derive(Debug, Clone)]
pub struct SnapshotPlan {
    pub label: String,
    pub number: u32,
    /// `indices[k]` is the old position of the halo at new position `k`
    pub indices: Vec<usize>,
    pub remap: SnapshotRemap,
}

/// The sort permutation of one snapshot, kept for pass 2
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortOrder {
    pub label: String,
    pub number: u32,
    pub indices: Vec<usize>,
}

/// Build the old -> new table of one snapshot from its sort permutation.
///
/// Every old unique ID must decode to a halo of this snapshot and appear
/// exactly once.
pub fn build_snapshot_remap(
    snapshot: &Snapshot,
    indices: &[usize],
    unique_id_field: &str,
    codec: &TemporalIdCodec,
) -> Result<SnapshotRemap> {
    let old_ids = snapshot.id_values(unique_id_field)?;
    let new_ids = codec.encode_range(snapshot.number, indices.len())?;

    let mut table = FxHashMap::with_capacity_and_hasher(indices.len(), Default::default());
    for (&old_position, new_id) in indices.iter().zip(new_ids) {
        let old_id = old_ids[old_position];
        let local_index = match codec.classify(old_id) {
            Some(Reference::Halo { snapshot: number, local_index })
                if number == snapshot.number =>
            {
                local_index
            }
            _ => {
                return Err(SortError::ForeignUniqueId {
                    snapshot: snapshot.label.clone(),
                    snapshot_number: snapshot.number,
                    id: old_id,
                })
            }
        };

        match table.entry(local_index) {
            Entry::Occupied(_) => {
                return Err(SortError::UniquenessViolation {
                    snapshot: snapshot.label.clone(),
                    id: old_id,
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(new_id);
            }
        }
    }

    Ok(SnapshotRemap { new_ids: table })
}

/// Pass 1 for one snapshot: sort permutation plus remap table.
///
/// Every field must have as many records as `unique_id_field`.
pub fn plan_snapshot(
    snapshot: &Snapshot,
    sort_fields: &[String],
    unique_id_field: &str,
    codec: &TemporalIdCodec,
) -> Result<SnapshotPlan> {
    snapshot.validate_rows(unique_id_field)?;
    let indices = sort_indices(snapshot, sort_fields)?;
    let remap = build_snapshot_remap(snapshot, &indices, unique_id_field, codec)?;
    Ok(SnapshotPlan {
        label: snapshot.label.clone(),
        number: snapshot.number,
        indices,
        remap,
    })
}

/// Why a raw identifier could not be remapped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unmapped {
    /// Negative but not the sentinel
    Malformed,
    /// Decodes to a halo that no table knows about
    Dangling { snapshot: u32, local_index: u64 },
}

impl Unmapped {
    /// Attach the location of the offending value.
    pub fn into_error(self, snapshot: &str, field: &str, value: i64) -> SortError {
        match self {
            Unmapped::Malformed => SortError::MalformedId {
                snapshot: snapshot.to_string(),
                field: field.to_string(),
                value,
            },
            Unmapped::Dangling { snapshot: target_snapshot, local_index } => {
                SortError::ReferenceIntegrity {
                    snapshot: snapshot.to_string(),
                    field: field.to_string(),
                    value,
                    target_snapshot,
                    local_index,
                }
            }
        }
    }
}

/// Frozen, dataset-wide lookup from old to new temporal IDs
#[derive(Debug, Clone)]
pub struct RemapTables {
    codec: TemporalIdCodec,
    tables: FxHashMap<u32, SnapshotRemap>,
}

impl RemapTables {
    /// Aggregate the per-snapshot plans of pass 1.
    ///
    /// Returns the tables together with the sort orders pass 2 still needs.
    pub fn freeze(
        codec: TemporalIdCodec,
        plans: Vec<SnapshotPlan>,
    ) -> Result<(Self, Vec<SortOrder>)> {
        let mut tables: FxHashMap<u32, SnapshotRemap> = FxHashMap::default();
        let mut labels: FxHashMap<u32, String> = FxHashMap::default();
        let mut orders = Vec::with_capacity(plans.len());

        for plan in plans {
            if let Some(first) = labels.get(&plan.number) {
                return Err(SortError::DuplicateSnapshot {
                    first: first.clone(),
                    second: plan.label,
                    number: plan.number,
                });
            }
            labels.insert(plan.number, plan.label.clone());
            tables.insert(plan.number, plan.remap);
            orders.push(SortOrder {
                label: plan.label,
                number: plan.number,
                indices: plan.indices,
            });
        }

        Ok((Self { codec, tables }, orders))
    }

    pub fn codec(&self) -> &TemporalIdCodec {
        &self.codec
    }

    /// Number of snapshots with a table
    pub fn snapshot_count(&self) -> usize {
        self.tables.len()
    }

    /// Number of halos across all tables
    pub fn halo_count(&self) -> usize {
        self.tables.values().map(SnapshotRemap::len).sum()
    }

    /// New value of a raw identifier. The sentinel always maps to itself.
    pub fn remap(&self, raw: i64) -> std::result::Result<i64, Unmapped> {
        match self.codec.classify(raw) {
            Some(Reference::None) => Ok(NO_REFERENCE),
            Some(Reference::Halo { snapshot, local_index }) => self
                .tables
                .get(&snapshot)
                .and_then(|table| table.get(local_index))
                .ok_or(Unmapped::Dangling { snapshot, local_index }),
            None => Err(Unmapped::Malformed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{Column, Field};

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn snapshot(number: u32, ids: Vec<i64>, forest: Vec<i64>) -> Snapshot {
        Snapshot::new(format!("Snap_{number:03}"), number, vec![
            Field::new("ID", Column::I64(ids)),
            Field::new("ForestID", Column::I64(forest)),
        ])
    }

    #[test]
    fn test_plan_assigns_ids_in_sorted_order() {
        let codec = TemporalIdCodec::new(100).unwrap();
        // Old IDs 200, 201, 202 in snapshot 2; forest order is [2, 0, 1].
        let snap = snapshot(2, vec![200, 201, 202], vec![5, 9, 1]);
        let plan = plan_snapshot(&snap, &keys(&["ForestID"]), "ID", &codec).unwrap();

        assert_eq!(plan.indices, vec![2, 0, 1]);
        assert_eq!(plan.remap.get(2), Some(200));
        assert_eq!(plan.remap.get(0), Some(201));
        assert_eq!(plan.remap.get(1), Some(202));
    }

    #[test]
    fn test_duplicate_unique_id_is_rejected() {
        let codec = TemporalIdCodec::new(100).unwrap();
        let snap = snapshot(1, vec![100, 101, 100], vec![1, 2, 3]);
        let err = plan_snapshot(&snap, &keys(&["ForestID"]), "ID", &codec).unwrap_err();
        assert_eq!(
            err,
            SortError::UniquenessViolation { snapshot: "Snap_001".to_string(), id: 100 }
        );
    }

    #[test]
    fn test_unique_id_from_another_snapshot_is_rejected() {
        let codec = TemporalIdCodec::new(100).unwrap();
        let snap = snapshot(1, vec![100, 301], vec![1, 2]);
        let err = plan_snapshot(&snap, &keys(&["ForestID"]), "ID", &codec).unwrap_err();
        assert!(matches!(err, SortError::ForeignUniqueId { id: 301, .. }));

        let sentinel = snapshot(1, vec![100, NO_REFERENCE], vec![1, 2]);
        let err = plan_snapshot(&sentinel, &keys(&["ForestID"]), "ID", &codec).unwrap_err();
        assert!(matches!(err, SortError::ForeignUniqueId { id: -1, .. }));
    }

    #[test]
    fn test_multiplier_too_small_is_range_error() {
        let codec = TemporalIdCodec::new(2).unwrap();
        let snap = snapshot(0, vec![0, 1, 2], vec![1, 1, 1]);
        let err = plan_snapshot(&snap, &keys(&["ForestID"]), "ID", &codec).unwrap_err();
        assert!(matches!(err, SortError::Range { .. }));
    }

    #[test]
    fn test_sort_key_longer_than_unique_ids_is_layout_mismatch() {
        let codec = TemporalIdCodec::new(1000).unwrap();
        let snap = Snapshot::new("Snap_001", 1, vec![
            Field::new("ForestID", Column::I64(vec![3, 2, 1])),
            Field::new("ID", Column::I64(vec![1000, 1001])),
        ]);
        let err = plan_snapshot(&snap, &keys(&["ForestID"]), "ID", &codec).unwrap_err();
        assert!(matches!(err, SortError::LayoutMismatch { ref group, .. } if group == "Snap_001"));
    }

    #[test]
    fn test_sentinel_maps_to_itself() {
        let codec = TemporalIdCodec::new(10).unwrap();
        let (empty, _) = RemapTables::freeze(codec, Vec::new()).unwrap();
        assert_eq!(empty.remap(NO_REFERENCE), Ok(NO_REFERENCE));

        let snap = snapshot(0, vec![0, 1], vec![2, 1]);
        let plan = plan_snapshot(&snap, &keys(&["ForestID"]), "ID", &codec).unwrap();
        let (tables, _) = RemapTables::freeze(codec, vec![plan]).unwrap();
        assert_eq!(tables.remap(NO_REFERENCE), Ok(NO_REFERENCE));
        assert_eq!(tables.remap(0), Ok(1));
        assert_eq!(tables.remap(1), Ok(0));
    }

    #[test]
    fn test_unknown_references_are_reported() {
        let codec = TemporalIdCodec::new(10).unwrap();
        let snap = snapshot(3, vec![30, 31], vec![1, 2]);
        let plan = plan_snapshot(&snap, &keys(&["ForestID"]), "ID", &codec).unwrap();
        let (tables, orders) = RemapTables::freeze(codec, vec![plan]).unwrap();

        assert_eq!(orders[0].indices, vec![0, 1]);
        assert_eq!(tables.snapshot_count(), 1);
        assert_eq!(tables.halo_count(), 2);
        assert_eq!(tables.remap(35), Err(Unmapped::Dangling { snapshot: 3, local_index: 5 }));
        assert_eq!(tables.remap(42), Err(Unmapped::Dangling { snapshot: 4, local_index: 2 }));
        assert_eq!(tables.remap(-5), Err(Unmapped::Malformed));
    }

    #[test]
    fn test_freeze_rejects_duplicate_snapshot_numbers() {
        let codec = TemporalIdCodec::new(10).unwrap();
        let snap = snapshot(1, vec![10], vec![1]);
        let a = plan_snapshot(&snap, &keys(&["ForestID"]), "ID", &codec).unwrap();
        let mut b = a.clone();
        b.label = "Snap_1".to_string();
        let err = RemapTables::freeze(codec, vec![a, b]).unwrap_err();
        assert!(matches!(err, SortError::DuplicateSnapshot { number: 1, .. }));
    }
}
