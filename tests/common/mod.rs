//! Shared fixtures for the integration tests
//!
//! The fixture catalogue is small enough to reason about by hand. Every halo
//! carries a `Tag` (its original ID) that is only permuted, never remapped,
//! so tests can check where references point after a sort.

#![allow(dead_code)]

use std::path::Path;

use forest_sorter::catalogue::CatalogueBuilder;
use forest_sorter::snapshot::{Column, Field};
use forest_sorter::{Catalogue, CatalogueSource, SortConfig, TemporalIdCodec};

pub const MULTIPLIER: u64 = 1000;

pub fn config() -> SortConfig {
    SortConfig {
        sort_fields: vec![
            "ForestID".to_string(),
            "hostHaloID".to_string(),
            "Mass_200mean".to_string(),
        ],
        id_fields: vec!["Head".to_string(), "Tail".to_string(), "hostHaloID".to_string()],
        unique_id_field: "ID".to_string(),
        multiplier: MULTIPLIER,
        threads: 2,
    }
}

pub fn codec() -> TemporalIdCodec {
    TemporalIdCodec::new(MULTIPLIER).unwrap()
}

/// Columns of one snapshot, one entry per halo
pub struct SnapshotData {
    pub ids: Vec<i64>,
    pub forest: Vec<i64>,
    pub host: Vec<i64>,
    pub mass: Vec<f64>,
    pub head: Vec<i64>,
    pub tail: Vec<i64>,
}

impl SnapshotData {
    pub fn fields(&self) -> Vec<Field> {
        let n = self.ids.len();
        vec![
            Field::new("ID", Column::I64(self.ids.clone())),
            Field::new("ForestID", Column::I64(self.forest.clone())),
            Field::new("hostHaloID", Column::I64(self.host.clone())),
            Field::new("Mass_200mean", Column::F64(self.mass.clone())),
            Field::new("Head", Column::I64(self.head.clone())),
            Field::new("Tail", Column::I64(self.tail.clone())),
            Field::with_width(
                "Pos",
                3,
                Column::F32((0..n * 3).map(|v| v as f32 * 0.5).collect()),
            ),
            Field::new("Tag", Column::U64(self.ids.iter().map(|&id| id as u64).collect())),
        ]
    }
}

/// Three snapshots of a small merger tree, deliberately out of forest order,
/// plus an empty snapshot and a metadata group.
pub fn snapshots() -> Vec<(&'static str, SnapshotData)> {
    vec![
        ("Snap_000", SnapshotData {
            ids: vec![0, 1, 2],
            forest: vec![3, 1, 2],
            host: vec![-1, -1, -1],
            mass: vec![1.0, 2.0, 3.0],
            head: vec![1002, 1000, 1001],
            tail: vec![0, 1, 2],
        }),
        ("Snap_001", SnapshotData {
            ids: vec![1000, 1001, 1002],
            forest: vec![1, 2, 3],
            host: vec![-1, -1, -1],
            mass: vec![5.0, 6.0, 7.0],
            head: vec![2001, 2000, -1],
            tail: vec![1, 2, 0],
        }),
        ("Snap_002", SnapshotData {
            ids: vec![2000, 2001, 2002],
            forest: vec![2, 1, 2],
            host: vec![-1, -1, 2000],
            mass: vec![9.0, 8.0, 0.5],
            head: vec![-1, -1, -1],
            tail: vec![1001, 1000, 1001],
        }),
        ("Snap_003", SnapshotData {
            ids: vec![],
            forest: vec![],
            host: vec![],
            mass: vec![],
            head: vec![],
            tail: vec![],
        }),
    ]
}

pub fn header() -> Vec<Field> {
    vec![
        Field::new("BoxSize", Column::F64(vec![62.5])),
        Field::new("Redshift", Column::F64(vec![3.0, 2.0, 1.0, 0.0])),
    ]
}

/// Write a catalogue with the given snapshots after a `Header` group.
pub fn write_catalogue(dir: &Path, snapshots: &[(&str, SnapshotData)]) -> Catalogue {
    let mut builder = CatalogueBuilder::create(dir).unwrap();
    builder.add_group("Header", &header()).unwrap();
    for (label, data) in snapshots {
        builder.add_group(label, &data.fields()).unwrap();
    }
    builder.finish().unwrap()
}

pub fn fixture(dir: &Path) -> Catalogue {
    write_catalogue(dir, &snapshots())
}

pub fn i64_field<S: CatalogueSource>(catalogue: &S, group: &str, field: &str) -> Vec<i64> {
    let fields = catalogue.read_group(group).unwrap();
    match &fields.iter().find(|f| f.name == field).unwrap().values {
        Column::I64(values) => values.clone(),
        other => panic!("{group}/{field} is {:?}, not i64", other.dtype()),
    }
}

pub fn tags<S: CatalogueSource>(catalogue: &S, group: &str) -> Vec<u64> {
    let fields = catalogue.read_group(group).unwrap();
    match &fields.iter().find(|f| f.name == "Tag").unwrap().values {
        Column::U64(values) => values.clone(),
        other => panic!("{group}/Tag is {:?}, not u64", other.dtype()),
    }
}

/// Tag of the halo an ID points at, or `None` for the sentinel.
pub fn target_tag<S: CatalogueSource>(catalogue: &S, id: i64) -> Option<u64> {
    if id == -1 {
        return None;
    }
    let (snapshot, local) = codec().decode(id).unwrap();
    let group = format!("Snap_{:03}", snapshot);
    Some(tags(catalogue, &group)[local as usize])
}
