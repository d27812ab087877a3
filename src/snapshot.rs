//! Snapshots, fields and typed columns
//!
//! A snapshot is one time-step of the catalogue: a set of named fields that
//! all hold the same number of records (halos). A halo has no identity beyond
//! its row index until that index is encoded into a temporal ID.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{Result, SortError};

/// Marker that identifies snapshot groups (e.g. `Snap_063`)
pub const SNAPSHOT_MARKER: &str = "Snap";

/// Element type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    I32,
    I64,
    U32,
    U64,
    F32,
    F64,
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::U32 => "u32",
            DType::U64 => "u64",
            DType::F32 => "f32",
            DType::F64 => "f64",
        };
        f.pad(name)
    }
}

/// Flat, typed storage of one field. Multi-component fields are row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Column {
    I32(Vec<i32>),
    I64(Vec<i64>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

/// Run `$body` with `$v` bound to the inner vector of any column variant.
macro_rules! with_column {
    ($column:expr, $v:ident => $body:expr) => {
        match $column {
            Column::I32($v) => $body,
            Column::I64($v) => $body,
            Column::U32($v) => $body,
            Column::U64($v) => $body,
            Column::F32($v) => $body,
            Column::F64($v) => $body,
        }
    };
}

/// Same as [`with_column!`] but rebuilds a column of the same variant.
macro_rules! map_column {
    ($column:expr, $v:ident => $body:expr) => {
        match $column {
            Column::I32($v) => Column::I32($body),
            Column::I64($v) => Column::I64($body),
            Column::U32($v) => Column::U32($body),
            Column::U64($v) => Column::U64($body),
            Column::F32($v) => Column::F32($body),
            Column::F64($v) => Column::F64($body),
        }
    };
}

/// Total order used for sort keys: NaN sorts after every number and equal to other NaNs.
fn compare_nan_last<T: PartialOrd>(a: &T, b: &T) -> Ordering {
    match a.partial_cmp(b) {
        Some(ord) => ord,
        None => {
            #[allow(clippy::eq_op)]
            let (a_nan, b_nan) = (a != a, b != b);
            match (a_nan, b_nan) {
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                _ => Ordering::Equal,
            }
        }
    }
}

fn gather<T: Copy>(values: &[T], indices: &[usize], width: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(indices.len() * width);
    for &row in indices {
        out.extend_from_slice(&values[row * width..(row + 1) * width]);
    }
    out
}

impl Column {
    pub fn dtype(&self) -> DType {
        match self {
            Column::I32(_) => DType::I32,
            Column::I64(_) => DType::I64,
            Column::U32(_) => DType::U32,
            Column::U64(_) => DType::U64,
            Column::F32(_) => DType::F32,
            Column::F64(_) => DType::F64,
        }
    }

    /// Number of scalar values (not rows)
    pub fn len(&self) -> usize {
        with_column!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compare two scalar entries of this column.
    pub fn compare(&self, a: usize, b: usize) -> Ordering {
        with_column!(self, v => compare_nan_last(&v[a], &v[b]))
    }

    /// Rows of `width` values in the order given by `indices`.
    pub fn gather_rows(&self, indices: &[usize], width: usize) -> Column {
        map_column!(self, v => gather(v, indices, width))
    }
}

/// Shape of a field as recorded in a catalogue manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldLayout {
    pub name: String,
    pub dtype: DType,
    pub width: usize,
    pub len: usize,
}

/// One named array of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    /// Components per record (1 for scalars, 3 for positions, ...)
    pub width: usize,
    pub values: Column,
}

impl Field {
    /// A scalar field.
    pub fn new(name: impl Into<String>, values: Column) -> Self {
        Self::with_width(name, 1, values)
    }

    pub fn with_width(name: impl Into<String>, width: usize, values: Column) -> Self {
        Self { name: name.into(), width, values }
    }

    /// Number of records
    pub fn len(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.values.len() / self.width
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn layout(&self) -> FieldLayout {
        FieldLayout {
            name: self.name.clone(),
            dtype: self.values.dtype(),
            width: self.width,
            len: self.len(),
        }
    }

    /// This field with its records reordered so that row `k` is old row `indices[k]`.
    pub fn permuted(&self, indices: &[usize]) -> Field {
        Field {
            name: self.name.clone(),
            width: self.width,
            values: self.values.gather_rows(indices, self.width),
        }
    }
}

/// One time-step of halos
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub label: String,
    pub number: u32,
    pub fields: Vec<Field>,
}

impl Snapshot {
    pub fn new(label: impl Into<String>, number: u32, fields: Vec<Field>) -> Self {
        Self { label: label.into(), number, fields }
    }

    /// Records of the first field. Every field agrees once
    /// [`Snapshot::validate_rows`] has passed.
    pub fn record_count(&self) -> usize {
        self.fields.first().map(Field::len).unwrap_or(0)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up a field that the configuration says must exist.
    pub fn require_field(&self, name: &str) -> Result<&Field> {
        self.field(name)
            .ok_or_else(|| SortError::missing_field(&self.label, name))
    }

    /// The unique-ID column, which must hold `i64` temporal IDs.
    pub fn id_values(&self, name: &str) -> Result<&[i64]> {
        let field = self.require_field(name)?;
        match &field.values {
            Column::I64(values) if field.width == 1 => Ok(values),
            _ => Err(SortError::Configuration {
                snapshot: self.label.clone(),
                field: name.to_string(),
                reason: format!(
                    "identifier fields must be scalar i64, found {} x{}",
                    field.values.dtype(),
                    field.width
                ),
            }),
        }
    }
}

impl Snapshot {
    /// Check that every field holds whole rows, as many as the unique-ID field.
    ///
    /// Returns the record count taken from the unique-ID field.
    pub fn validate_rows(&self, unique_id_field: &str) -> Result<usize> {
        let count = self.require_field(unique_id_field)?.len();
        for field in &self.fields {
            let problem = if field.width == 0 {
                Some("has width 0".to_string())
            } else if field.values.len() % field.width != 0 {
                Some(format!(
                    "holds {} values, not a whole number of rows of {}",
                    field.values.len(),
                    field.width
                ))
            } else if field.len() != count {
                Some(format!(
                    "has {} records but '{}' has {}",
                    field.len(),
                    unique_id_field,
                    count
                ))
            } else {
                None
            };
            if let Some(problem) = problem {
                return Err(SortError::LayoutMismatch {
                    group: self.label.clone(),
                    reason: format!("field '{}' {}", field.name, problem),
                });
            }
        }
        Ok(count)
    }
}

/// A group label resolved to its snapshot number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotLabel {
    pub label: String,
    pub number: u32,
}

/// Snapshot number encoded in a group label, if the group is a snapshot.
///
/// `Snap_063` -> 63, `Snap063` -> 63, `Header` -> None.
pub fn snapshot_number(label: &str) -> Option<u32> {
    if !label.contains(SNAPSHOT_MARKER) {
        return None;
    }
    let digits_start = label
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(idx, _)| idx)?;
    label[digits_start..].parse().ok()
}

/// Resolve snapshot groups among `groups`, ordered by snapshot number.
///
/// Groups that are not snapshots are left out. Two labels resolving to the
/// same number would merge their remap tables, so that is an error.
pub fn resolve_snapshots<'a, I>(groups: I) -> Result<Vec<SnapshotLabel>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut snapshots: Vec<SnapshotLabel> = groups
        .into_iter()
        .filter_map(|label| {
            snapshot_number(label).map(|number| SnapshotLabel { label: label.to_string(), number })
        })
        .collect();
    snapshots.sort_by_key(|s| s.number);

    for pair in snapshots.windows(2) {
        if pair[0].number == pair[1].number {
            return Err(SortError::DuplicateSnapshot {
                first: pair[0].label.clone(),
                second: pair[1].label.clone(),
                number: pair[0].number,
            });
        }
    }
    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_number_from_label() {
        assert_eq!(snapshot_number("Snap_063"), Some(63));
        assert_eq!(snapshot_number("Snap_000"), Some(0));
        assert_eq!(snapshot_number("Snap12"), Some(12));
        assert_eq!(snapshot_number("Header"), None);
        assert_eq!(snapshot_number("Snap_"), None);
        assert_eq!(snapshot_number("Group_063"), None);
    }

    #[test]
    fn test_resolve_snapshots_orders_by_number() {
        let groups = ["Snap_010", "Header", "Snap_002", "Snap_005"];
        let resolved = resolve_snapshots(groups.iter().copied()).unwrap();
        let numbers: Vec<u32> = resolved.iter().map(|s| s.number).collect();
        assert_eq!(numbers, vec![2, 5, 10]);
        assert_eq!(resolved[0].label, "Snap_002");
    }

    #[test]
    fn test_resolve_snapshots_rejects_duplicate_numbers() {
        let groups = ["Snap_5", "Snap_005"];
        let err = resolve_snapshots(groups.iter().copied()).unwrap_err();
        assert!(matches!(err, SortError::DuplicateSnapshot { number: 5, .. }));
    }

    #[test]
    fn test_permuted_moves_whole_rows() {
        let pos = Field::with_width("Pos", 3, Column::F32(vec![
            0.0, 0.1, 0.2, //
            1.0, 1.1, 1.2, //
            2.0, 2.1, 2.2,
        ]));
        let sorted = pos.permuted(&[2, 0, 1]);
        assert_eq!(sorted.len(), 3);
        assert_eq!(
            sorted.values,
            Column::F32(vec![2.0, 2.1, 2.2, 0.0, 0.1, 0.2, 1.0, 1.1, 1.2])
        );
    }

    #[test]
    fn test_compare_puts_nan_last() {
        let column = Column::F64(vec![f64::NAN, 1.0, f64::NAN]);
        assert_eq!(column.compare(0, 1), Ordering::Greater);
        assert_eq!(column.compare(1, 0), Ordering::Less);
        assert_eq!(column.compare(0, 2), Ordering::Equal);
    }

    #[test]
    fn test_validate_rows_counts_from_unique_id_field() {
        let snap = Snapshot::new("Snap_001", 1, vec![
            Field::new("ForestID", Column::I64(vec![3, 2, 1])),
            Field::new("ID", Column::I64(vec![1000, 1001])),
        ]);
        let err = snap.validate_rows("ID").unwrap_err();
        assert!(matches!(
            err,
            SortError::LayoutMismatch { ref reason, .. } if reason.contains("'ForestID'")
        ));

        let empty_first = Snapshot::new("Snap_001", 1, vec![
            Field::new("Note", Column::U32(vec![])),
            Field::new("ID", Column::I64(vec![1000, 1001])),
        ]);
        assert!(matches!(
            empty_first.validate_rows("ID"),
            Err(SortError::LayoutMismatch { .. })
        ));

        let ragged = Snapshot::new("Snap_001", 1, vec![
            Field::new("ID", Column::I64(vec![1000, 1001])),
            Field::with_width("Pos", 3, Column::F32(vec![0.0; 5])),
        ]);
        assert!(matches!(ragged.validate_rows("ID"), Err(SortError::LayoutMismatch { .. })));

        let good = Snapshot::new("Snap_001", 1, vec![
            Field::new("ID", Column::I64(vec![1000, 1001])),
            Field::with_width("Pos", 3, Column::F32(vec![0.0; 6])),
        ]);
        assert_eq!(good.validate_rows("ID"), Ok(2));
    }

    #[test]
    fn test_id_values_requires_i64() {
        let snap = Snapshot::new("Snap_001", 1, vec![
            Field::new("ID", Column::I32(vec![1, 2])),
        ]);
        assert!(matches!(snap.id_values("ID"), Err(SortError::Configuration { .. })));
        assert!(matches!(snap.id_values("Head"), Err(SortError::Configuration { .. })));
    }
}
