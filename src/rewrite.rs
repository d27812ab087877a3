//! Field rewriting (pass 2)
//!
//! Every field of a snapshot is put into sorted order; identifier fields are
//! additionally renumbered through the frozen [`RemapTables`]. Values are
//! gathered in new order first and then remapped element by element, for
//! every identifier field alike.

use crate::config::SortConfig;
use crate::error::{Result, SortError};
use crate::remap::{RemapTables, SortOrder};
use crate::snapshot::{Column, DType, Field, Snapshot};

/// How a field is treated when rewritten
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    /// Holds temporal IDs: remap, then permute
    Identifier,
    /// Anything else: permute only
    Plain,
}

/// Role of every field of `snapshot`, in field order.
///
/// Every configured identifier field must exist and hold `i64` values.
pub fn resolve_roles(snapshot: &Snapshot, config: &SortConfig) -> Result<Vec<FieldRole>> {
    for name in &config.id_fields {
        let field = snapshot.require_field(name)?;
        if field.values.dtype() != DType::I64 {
            return Err(SortError::Configuration {
                snapshot: snapshot.label.clone(),
                field: name.clone(),
                reason: format!(
                    "identifier fields must hold i64 values, found {}",
                    field.values.dtype()
                ),
            });
        }
    }

    Ok(snapshot
        .fields
        .iter()
        .map(|field| {
            if config.is_id_field(&field.name) {
                FieldRole::Identifier
            } else {
                FieldRole::Plain
            }
        })
        .collect())
}

/// Sorted (and, for identifiers, renumbered) copy of one field.
pub fn rewrite_field(
    snapshot_label: &str,
    field: &Field,
    role: FieldRole,
    indices: &[usize],
    tables: &RemapTables,
) -> Result<Field> {
    if field.len() != indices.len() {
        return Err(SortError::LayoutMismatch {
            group: snapshot_label.to_string(),
            reason: format!(
                "field '{}' has {} records but the sort order covers {}",
                field.name,
                field.len(),
                indices.len()
            ),
        });
    }

    match (role, &field.values) {
        (FieldRole::Plain, _) => Ok(field.permuted(indices)),
        (FieldRole::Identifier, Column::I64(raw)) => {
            let width = field.width;
            let mut remapped = Vec::with_capacity(raw.len());
            for &row in indices {
                for &value in &raw[row * width..(row + 1) * width] {
                    let new_id = tables
                        .remap(value)
                        .map_err(|why| why.into_error(snapshot_label, &field.name, value))?;
                    remapped.push(new_id);
                }
            }
            Ok(Field::with_width(field.name.clone(), width, Column::I64(remapped)))
        }
        (FieldRole::Identifier, other) => Err(SortError::Configuration {
            snapshot: snapshot_label.to_string(),
            field: field.name.clone(),
            reason: format!("identifier fields must hold i64 values, found {}", other.dtype()),
        }),
    }
}

/// Rewrite every field of a snapshot in its sorted order.
pub fn rewrite_snapshot(
    snapshot: &Snapshot,
    order: &SortOrder,
    tables: &RemapTables,
    config: &SortConfig,
) -> Result<Vec<Field>> {
    debug_assert_eq!(snapshot.number, order.number);
    let roles = resolve_roles(snapshot, config)?;
    snapshot
        .fields
        .iter()
        .zip(roles)
        .map(|(field, role)| rewrite_field(&snapshot.label, field, role, &order.indices, tables))
        .collect()
}
