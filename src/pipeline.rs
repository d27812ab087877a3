//! Two-pass forest sort of a whole catalogue
//!
//! ## Strategy
//!
//! 1. **Plan** (pass 1): for every snapshot, compute the sort permutation and
//!    the old -> new ID table. Snapshots are independent and run in parallel.
//! 2. **Freeze**: aggregate all tables into one read-only [`RemapTables`].
//!    Nothing is rewritten before every snapshot has been planned, since any
//!    reference may point into any snapshot.
//! 3. **Rewrite** (pass 2): for every snapshot, renumber identifier fields,
//!    permute every field and write the group. Metadata groups, empty
//!    snapshots and groups without the record schema are copied verbatim.
//!
//! ## Memory Usage
//!
//! The frozen tables hold one entry per halo of the dataset and are the
//! dominant cost. Group data is only held while its snapshot is processed.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::time::{Duration, Instant};

use crate::catalogue::{CatalogueSink, CatalogueSource};
use crate::config::SortConfig;
use crate::error::SortError;
use crate::logging::{format_duration, format_rate};
use crate::remap::{plan_snapshot, RemapTables, SnapshotPlan};
use crate::rewrite::rewrite_snapshot;
use crate::snapshot::{resolve_snapshots, Snapshot, SnapshotLabel};
use crate::sort_keys::active_keys;

/// What happened to each group of a sorted catalogue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortSummary {
    /// Snapshots that were sorted and renumbered
    pub sorted_snapshots: Vec<String>,
    /// Snapshots with no halos (copied as they are)
    pub empty_snapshots: Vec<String>,
    /// Groups copied verbatim: metadata and groups without the record schema
    pub copied_groups: Vec<String>,
    /// Halos renumbered across all snapshots
    pub halos: usize,
    pub plan_time: Duration,
    pub rewrite_time: Duration,
}

/// Outcome of pass 1 for one snapshot group
enum Planned {
    Sorted(SnapshotPlan),
    Empty(String),
    NotRecords(String),
}

fn plan_group<S>(source: &S, label: &SnapshotLabel, config: &SortConfig) -> Result<Planned>
where
    S: CatalogueSource + ?Sized,
{
    let fields = source
        .read_group(&label.label)
        .with_context(|| format!("Failed to read snapshot '{}'", label.label))?;
    let snapshot = Snapshot::new(label.label.clone(), label.number, fields);

    let Some(unique_ids) = snapshot.field(&config.unique_id_field) else {
        warn!(
            "Group '{}' has no '{}' field; copying it unchanged",
            label.label, config.unique_id_field
        );
        return Ok(Planned::NotRecords(label.label.clone()));
    };
    if unique_ids.is_empty() {
        snapshot.validate_rows(&config.unique_id_field)?;
        debug!("Snapshot '{}' has no halos; copying it unchanged", label.label);
        return Ok(Planned::Empty(label.label.clone()));
    }

    let codec = config.codec()?;
    let plan = plan_snapshot(&snapshot, &config.sort_fields, &config.unique_id_field, &codec)?;
    debug!("Planned snapshot '{}': {} halos", plan.label, plan.indices.len());
    Ok(Planned::Sorted(plan))
}

/// Sort every snapshot of `source` into forest order and write the result to `sink`.
///
/// Any fatal error aborts the run; the sink is expected to discard partial
/// output in that case (see [`crate::catalogue::StagedCatalogue`]).
pub fn sort_catalogue<S, K>(source: &S, sink: &K, config: &SortConfig) -> Result<SortSummary>
where
    S: CatalogueSource + ?Sized,
    K: CatalogueSink + ?Sized,
{
    let config = config.clone().validate()?;
    let codec = config.codec()?;

    let group_names = source.group_names();
    let snapshots = resolve_snapshots(group_names.iter().map(String::as_str))?;
    let metadata_groups: Vec<String> = group_names
        .iter()
        .filter(|name| !snapshots.iter().any(|s| &s.label == *name))
        .cloned()
        .collect();

    info!(
        "Sorting {} snapshots on [{}] ({} metadata groups)",
        snapshots.len(),
        active_keys(&config.sort_fields).collect::<Vec<_>>().join(", "),
        metadata_groups.len()
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build()
        .context("Failed to create rayon thread pool")?;

    pool.install(|| -> Result<SortSummary> {
        // Pass 1
        let start_time = Instant::now();
        let outcomes = snapshots
            .par_iter()
            .map(|label| plan_group(source, label, &config))
            .collect::<Result<Vec<_>>>()?;

        let mut summary = SortSummary::default();
        let mut plans = Vec::new();
        let mut copied = metadata_groups;
        for outcome in outcomes {
            match outcome {
                Planned::Sorted(plan) => plans.push(plan),
                Planned::Empty(label) => summary.empty_snapshots.push(label),
                Planned::NotRecords(label) => copied.push(label),
            }
        }

        let (tables, orders) = RemapTables::freeze(codec, plans)?;
        summary.plan_time = start_time.elapsed();
        summary.halos = tables.halo_count();
        info!(
            "Pass 1 complete: remap tables for {} halos in {} snapshots ({})",
            summary.halos,
            tables.snapshot_count(),
            format_duration(summary.plan_time)
        );

        // Pass 2: the tables are frozen and only shared by reference from here on.
        let start_time = Instant::now();
        let tables = &tables;
        copied
            .par_iter()
            .chain(summary.empty_snapshots.par_iter())
            .try_for_each(|name| {
                sink.copy_group(name)
                    .with_context(|| format!("Failed to copy group '{}'", name))
            })?;

        orders.par_iter().try_for_each(|order| -> Result<()> {
            let fields = source
                .read_group(&order.label)
                .with_context(|| format!("Failed to re-read snapshot '{}'", order.label))?;
            let snapshot = Snapshot::new(order.label.clone(), order.number, fields);
            let rewritten = rewrite_snapshot(&snapshot, order, tables, &config)?;
            sink.write_group(&order.label, &rewritten)
                .with_context(|| format!("Failed to write snapshot '{}'", order.label))?;
            debug!("Rewrote snapshot '{}'", order.label);
            Ok(())
        })?;

        summary.rewrite_time = start_time.elapsed();
        summary.sorted_snapshots = orders.into_iter().map(|o| o.label).collect();
        summary.copied_groups = copied;
        info!(
            "Pass 2 complete: {} snapshots rewritten, {} groups copied ({}, {})",
            summary.sorted_snapshots.len(),
            summary.copied_groups.len() + summary.empty_snapshots.len(),
            format_duration(summary.rewrite_time),
            format_rate(summary.halos, summary.rewrite_time, "halos")
        );
        Ok(summary)
    })
}

/// Kind of the core error behind a pipeline failure, if there is one.
pub fn sort_error(error: &anyhow::Error) -> Option<&SortError> {
    error.chain().find_map(|cause| cause.downcast_ref::<SortError>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::{MemoryCatalogue, MemorySink};
    use crate::snapshot::{Column, Field};

    fn config() -> SortConfig {
        SortConfig {
            sort_fields: vec!["ForestID".to_string(), "Mass".to_string()],
            id_fields: vec!["ID".to_string(), "Head".to_string()],
            unique_id_field: "ID".to_string(),
            multiplier: 1000,
            threads: 2,
        }
    }

    fn snap(ids: Vec<i64>, forest: Vec<i64>, head: Vec<i64>, mass: Vec<f64>) -> Vec<Field> {
        vec![
            Field::new("ID", Column::I64(ids)),
            Field::new("ForestID", Column::I64(forest)),
            Field::new("Head", Column::I64(head)),
            Field::new("Mass", Column::F64(mass)),
        ]
    }

    fn catalogue() -> MemoryCatalogue {
        MemoryCatalogue::new()
            .with_group("Header", vec![Field::new("Redshift", Column::F64(vec![0.0, 1.0]))])
            .with_group(
                "Snap_001",
                snap(vec![1000, 1001], vec![2, 1], vec![2001, 2000], vec![1.0, 2.0]),
            )
            .with_group(
                "Snap_002",
                snap(vec![2000, 2001], vec![1, 2], vec![-1, -1], vec![5.0, 4.0]),
            )
            .with_group("Snap_003", snap(vec![], vec![], vec![], vec![]))
    }

    #[test]
    fn test_sort_catalogue_in_memory() {
        let source = catalogue();
        let sink = MemorySink::new(&source);
        let summary = sort_catalogue(&source, &sink, &config()).unwrap();

        assert_eq!(summary.sorted_snapshots, vec!["Snap_001", "Snap_002"]);
        assert_eq!(summary.empty_snapshots, vec!["Snap_003"]);
        assert_eq!(summary.copied_groups, vec!["Header"]);
        assert_eq!(summary.halos, 4);

        let out = sink.into_catalogue().unwrap();
        assert_eq!(out.group("Header"), source.group("Header"));
        assert_eq!(out.group("Snap_003"), source.group("Snap_003"));

        let snap1 = out.group("Snap_001").unwrap();
        assert_eq!(snap1[0].values, Column::I64(vec![1000, 1001]));
        assert_eq!(snap1[1].values, Column::I64(vec![1, 2]));
        // Snapshot 2 is already in order, so its IDs keep their values.
        assert_eq!(snap1[2].values, Column::I64(vec![2000, 2001]));
        assert_eq!(snap1[3].values, Column::F64(vec![2.0, 1.0]));
    }

    #[test]
    fn test_dangling_reference_aborts_the_run() {
        let source = MemoryCatalogue::new()
            .with_group("Snap_001", snap(vec![1000], vec![1], vec![2005], vec![1.0]))
            .with_group("Snap_002", snap(vec![2000], vec![1], vec![-1], vec![1.0]));
        let sink = MemorySink::new(&source);

        let err = sort_catalogue(&source, &sink, &config()).unwrap_err();
        assert!(matches!(
            sort_error(&err),
            Some(SortError::ReferenceIntegrity { target_snapshot: 2, local_index: 5, .. })
        ));
    }

    #[test]
    fn test_short_leading_field_is_layout_mismatch() {
        let mut fields = snap(vec![1000, 1001], vec![2, 1], vec![-1, -1], vec![1.0, 2.0]);
        fields.insert(0, Field::new("Note", Column::U32(vec![])));
        let source = MemoryCatalogue::new().with_group("Snap_001", fields);
        let sink = MemorySink::new(&source);

        let err = sort_catalogue(&source, &sink, &config()).unwrap_err();
        assert!(matches!(sort_error(&err), Some(SortError::LayoutMismatch { .. })));
    }

    #[test]
    fn test_sort_key_longer_than_unique_ids_is_an_error() {
        let mut fields = snap(vec![1000, 1001], vec![2, 1], vec![-1, -1], vec![1.0, 2.0]);
        fields[1] = Field::new("ForestID", Column::I64(vec![3, 2, 1]));
        let source = MemoryCatalogue::new().with_group("Snap_001", fields);
        let sink = MemorySink::new(&source);

        let err = sort_catalogue(&source, &sink, &config()).unwrap_err();
        assert!(matches!(sort_error(&err), Some(SortError::LayoutMismatch { .. })));
    }

    #[test]
    fn test_group_without_record_schema_is_copied() {
        let source = MemoryCatalogue::new()
            .with_group("Snap_000", vec![Field::new("Note", Column::U32(vec![7]))])
            .with_group("Snap_001", snap(vec![1000], vec![1], vec![-1], vec![1.0]));
        let sink = MemorySink::new(&source);

        let summary = sort_catalogue(&source, &sink, &config()).unwrap();
        assert_eq!(summary.copied_groups, vec!["Snap_000"]);
        assert_eq!(summary.sorted_snapshots, vec!["Snap_001"]);
        let out = sink.into_catalogue().unwrap();
        assert_eq!(out.group("Snap_000"), source.group("Snap_000"));
    }
}
