//! Verification of a forest-sorted catalogue
//!
//! Checks what a successful sort guarantees, without trusting the run that
//! produced the catalogue:
//! - the unique-ID field of snapshot `s` reads `encode(s, 0..count)`;
//! - every snapshot is non-decreasing under the sort keys;
//! - every identifier value is `-1` or points at an existing halo.
//!
//! Violations are collected (a bounded number per snapshot) instead of
//! stopping at the first one.

use anyhow::{Context, Result};
use log::info;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::fmt;

use crate::catalogue::CatalogueSource;
use crate::config::SortConfig;
use crate::snapshot::{resolve_snapshots, Column, Snapshot};
use crate::sort_keys::{compare_records, key_columns};
use crate::temporal_id::Reference;

/// Violations kept per snapshot before the rest are only counted
pub const MAX_VIOLATIONS_PER_SNAPSHOT: usize = 20;

/// One broken guarantee
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A required field is missing or unusable
    MissingField { snapshot: String, field: String, reason: String },
    /// Fields disagree on the number of records
    Layout { snapshot: String, reason: String },
    /// Position `position` cannot be encoded under the multiplier
    OutOfRange { snapshot: String, position: usize, reason: String },
    /// The unique ID at `position` is not `encode(snapshot, position)`
    UnexpectedId { snapshot: String, position: usize, expected: i64, found: i64 },
    /// Record `position` sorts before record `position - 1`
    OutOfOrder { snapshot: String, position: usize },
    /// An identifier value that does not point at any halo
    DanglingReference { snapshot: String, field: String, position: usize, value: i64 },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::MissingField { snapshot, field, reason } => {
                write!(f, "{snapshot}: field '{field}' {reason}")
            }
            Violation::Layout { snapshot, reason } => write!(f, "{snapshot}: {reason}"),
            Violation::OutOfRange { snapshot, position, reason } => {
                write!(f, "{snapshot}: halo {position} has no valid ID ({reason})")
            }
            Violation::UnexpectedId { snapshot, position, expected, found } => {
                write!(f, "{snapshot}: halo {position} has ID {found}, expected {expected}")
            }
            Violation::OutOfOrder { snapshot, position } => {
                write!(f, "{snapshot}: halo {position} sorts before halo {}", position - 1)
            }
            Violation::DanglingReference { snapshot, field, position, value } => {
                write!(f, "{snapshot}: {field}[{position}] = {value} points at no halo")
            }
        }
    }
}

/// Result of [`verify_catalogue`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub snapshots_checked: usize,
    pub halos_checked: usize,
    pub references_checked: usize,
    pub violations: Vec<Violation>,
    /// Violations beyond the per-snapshot cap
    pub suppressed: usize,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty() && self.suppressed == 0
    }

    pub fn violation_count(&self) -> usize {
        self.violations.len() + self.suppressed
    }
}

/// Capped violation list of one snapshot
#[derive(Default)]
struct Findings {
    violations: Vec<Violation>,
    suppressed: usize,
    halos: usize,
    references: usize,
}

impl Findings {
    fn push(&mut self, violation: Violation) {
        if self.violations.len() < MAX_VIOLATIONS_PER_SNAPSHOT {
            self.violations.push(violation);
        } else {
            self.suppressed += 1;
        }
    }
}

fn check_snapshot(
    snapshot: &Snapshot,
    counts: &FxHashMap<u32, usize>,
    config: &SortConfig,
) -> Result<Findings> {
    let codec = config.codec()?;
    let mut findings = Findings::default();
    let label = &snapshot.label;

    if let Err(e) = snapshot.validate_rows(&config.unique_id_field) {
        findings.push(Violation::Layout { snapshot: label.clone(), reason: e.to_string() });
        return Ok(findings);
    }

    match snapshot.id_values(&config.unique_id_field) {
        Ok(ids) => {
            findings.halos = ids.len();
            for (position, &found) in ids.iter().enumerate() {
                let expected = match codec.encode(snapshot.number, position as u64) {
                    Ok(expected) => expected,
                    Err(e) => {
                        // Every later position is out of range too.
                        findings.push(Violation::OutOfRange {
                            snapshot: label.clone(),
                            position,
                            reason: e.to_string(),
                        });
                        break;
                    }
                };
                if found != expected {
                    findings.push(Violation::UnexpectedId {
                        snapshot: label.clone(),
                        position,
                        expected,
                        found,
                    });
                }
            }
        }
        Err(e) => findings.push(Violation::MissingField {
            snapshot: label.clone(),
            field: config.unique_id_field.clone(),
            reason: e.to_string(),
        }),
    }

    match key_columns(snapshot, &config.sort_fields) {
        Ok(columns) => {
            for position in 1..snapshot.record_count() {
                if compare_records(&columns, position - 1, position) == Ordering::Greater {
                    findings.push(Violation::OutOfOrder { snapshot: label.clone(), position });
                }
            }
        }
        Err(e) => findings.push(Violation::MissingField {
            snapshot: label.clone(),
            field: config.sort_fields.join(","),
            reason: e.to_string(),
        }),
    }

    for name in &config.id_fields {
        let values = match snapshot.field(name).map(|f| &f.values) {
            Some(Column::I64(values)) => values,
            Some(other) => {
                findings.push(Violation::MissingField {
                    snapshot: label.clone(),
                    field: name.clone(),
                    reason: format!("holds {} values, expected i64", other.dtype()),
                });
                continue;
            }
            None => {
                findings.push(Violation::MissingField {
                    snapshot: label.clone(),
                    field: name.clone(),
                    reason: "is missing".to_string(),
                });
                continue;
            }
        };

        findings.references += values.len();
        for (position, &value) in values.iter().enumerate() {
            let resolves = match codec.classify(value) {
                Some(Reference::None) => true,
                Some(Reference::Halo { snapshot: target, local_index }) => counts
                    .get(&target)
                    .is_some_and(|&count| local_index < count as u64),
                None => false,
            };
            if !resolves {
                findings.push(Violation::DanglingReference {
                    snapshot: label.clone(),
                    field: name.clone(),
                    position,
                    value,
                });
            }
        }
    }

    Ok(findings)
}

/// Check that `source` is forest-sorted and internally consistent under `config`.
pub fn verify_catalogue<S>(source: &S, config: &SortConfig) -> Result<VerifyReport>
where
    S: CatalogueSource + ?Sized,
{
    let config = config.clone().validate()?;
    let group_names = source.group_names();
    let labels = resolve_snapshots(group_names.iter().map(String::as_str))?;

    // Halo counts first: references may point into any snapshot.
    let counts: FxHashMap<u32, usize> = labels
        .par_iter()
        .map(|label| -> Result<Option<(u32, usize)>> {
            let fields = source
                .read_group(&label.label)
                .with_context(|| format!("Failed to read snapshot '{}'", label.label))?;
            let snapshot = Snapshot::new(label.label.clone(), label.number, fields);
            Ok(snapshot
                .field(&config.unique_id_field)
                .map(|ids| (label.number, ids.len())))
        })
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect();

    let per_snapshot = labels
        .par_iter()
        .filter(|label| counts.contains_key(&label.number))
        .map(|label| -> Result<Findings> {
            let fields = source
                .read_group(&label.label)
                .with_context(|| format!("Failed to read snapshot '{}'", label.label))?;
            let snapshot = Snapshot::new(label.label.clone(), label.number, fields);
            check_snapshot(&snapshot, &counts, &config)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut report = VerifyReport::default();
    for findings in per_snapshot {
        report.snapshots_checked += 1;
        report.halos_checked += findings.halos;
        report.references_checked += findings.references;
        report.suppressed += findings.suppressed;
        report.violations.extend(findings.violations);
    }

    info!(
        "Verified {} snapshots: {} halos, {} references, {} violations",
        report.snapshots_checked,
        report.halos_checked,
        report.references_checked,
        report.violation_count()
    );
    Ok(report)
}
