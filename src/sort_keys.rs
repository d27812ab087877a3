//! Sort-key resolution
//!
//! Turns an ordered list of key fields into the permutation that puts a
//! snapshot in forest order. The first key is the outer-most sort, later keys
//! only break ties, and records equal on every key keep their input order.
//!
//! Example:
//!   keys     = ["ForestID", "Mass_200mean"]
//!   ForestID = [1, 4, 39, 1, 1, 4]
//!   Mass     = [4e9, 1e11, 8e8, 7e9, 3e11, 5e6]
//!   indices  = [0, 3, 4, 5, 1, 2]

use rayon::prelude::*;
use std::cmp::Ordering;

use crate::error::{Result, SortError};
use crate::snapshot::{Column, Snapshot};

/// Key name that switches a sort level off without changing the key list's arity
pub const DISABLED_KEY: &str = "none";

/// Whether a configured key name is switched off.
pub fn is_disabled(key: &str) -> bool {
    let key = key.trim();
    key.is_empty() || key.eq_ignore_ascii_case(DISABLED_KEY)
}

/// Configured keys that actually take part in the sort, outer-most first.
pub fn active_keys(keys: &[String]) -> impl Iterator<Item = &str> {
    keys.iter().map(|k| k.trim()).filter(|k| !is_disabled(k))
}

/// Look up the key columns of a snapshot, checking each is a scalar of the snapshot's length.
pub fn key_columns<'a>(snapshot: &'a Snapshot, keys: &[String]) -> Result<Vec<&'a Column>> {
    let count = snapshot.record_count();
    active_keys(keys)
        .map(|key| {
            let field = snapshot.require_field(key)?;
            if field.width != 1 {
                return Err(SortError::Configuration {
                    snapshot: snapshot.label.clone(),
                    field: key.to_string(),
                    reason: format!("sort keys must be scalar, field has width {}", field.width),
                });
            }
            if field.len() != count {
                return Err(SortError::Configuration {
                    snapshot: snapshot.label.clone(),
                    field: key.to_string(),
                    reason: format!("field has {} records, snapshot has {}", field.len(), count),
                });
            }
            Ok(&field.values)
        })
        .collect()
}

/// Lexicographic comparison of two records over `columns`.
pub fn compare_records(columns: &[&Column], a: usize, b: usize) -> Ordering {
    columns
        .iter()
        .map(|column| column.compare(a, b))
        .find(|ord| ord.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Permutation that stable-sorts `snapshot` by `keys`.
///
/// `indices[k]` is the old position of the record that belongs at position `k`.
/// With no active keys the identity permutation is returned.
pub fn sort_indices(snapshot: &Snapshot, keys: &[String]) -> Result<Vec<usize>> {
    let count = snapshot.record_count();
    if count == 0 {
        return Err(SortError::EmptyInput { snapshot: snapshot.label.clone() });
    }

    let columns = key_columns(snapshot, keys)?;
    let mut indices: Vec<usize> = (0..count).collect();
    if !columns.is_empty() {
        // par_sort_by is stable, which the tie-breaking rule depends on.
        indices.par_sort_by(|&a, &b| compare_records(&columns, a, b));
    }
    Ok(indices)
}
