//! Error taxonomy for sorting and renumbering halo catalogues.
//!
//! Every kind except [`SortError::EmptyInput`] aborts the run. Nothing here is
//! recovered from locally: a silently wrong halo ID would corrupt the forest
//! structure of the whole dataset.

use thiserror::Error;

/// Result type alias for the sorting core
pub type Result<T> = std::result::Result<T, SortError>;

/// Error type for the sorting core
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SortError {
    /// A sort or identifier field is missing from a snapshot, or has the wrong shape
    #[error("Configuration error in snapshot '{snapshot}', field '{field}': {reason}")]
    Configuration {
        /// Snapshot label
        snapshot: String,
        /// The offending field name
        field: String,
        /// Explanation of the problem
        reason: String,
    },

    /// A configuration value is invalid before any snapshot is touched
    #[error("Invalid configuration '{parameter}': {reason}")]
    InvalidConfig {
        /// The parameter name
        parameter: String,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// A local index does not fit under the multiplier
    #[error(
        "Local index {local_index} of snapshot {snapshot} cannot be encoded with multiplier \
         {multiplier} (multiplier too small for this dataset)"
    )]
    Range {
        /// Snapshot number being encoded
        snapshot: u32,
        /// Offending local index
        local_index: u64,
        /// The configured multiplier
        multiplier: u64,
    },

    /// A reference decodes to a record that was never mapped
    #[error(
        "Dangling reference {value} in field '{field}' of snapshot '{snapshot}': \
         no halo at index {local_index} of snapshot {target_snapshot}"
    )]
    ReferenceIntegrity {
        /// Snapshot label holding the reference
        snapshot: String,
        /// Field holding the reference
        field: String,
        /// The raw identifier value
        value: i64,
        /// Snapshot number the value decodes to
        target_snapshot: u32,
        /// Local index the value decodes to
        local_index: u64,
    },

    /// An identifier value is negative but not the sentinel
    #[error("Malformed identifier {value} in field '{field}' of snapshot '{snapshot}'")]
    MalformedId {
        /// Snapshot label holding the value
        snapshot: String,
        /// Field holding the value
        field: String,
        /// The raw identifier value
        value: i64,
    },

    /// The unique-ID field holds the same ID twice
    #[error("Duplicate halo ID {id} in unique-ID field of snapshot '{snapshot}'")]
    UniquenessViolation {
        /// Snapshot label
        snapshot: String,
        /// The duplicated ID
        id: i64,
    },

    /// A unique ID that does not encode a record of its own snapshot
    #[error(
        "Halo ID {id} in snapshot '{snapshot}' (number {snapshot_number}) does not encode a \
         halo of that snapshot"
    )]
    ForeignUniqueId {
        /// Snapshot label
        snapshot: String,
        /// Snapshot number the label resolves to
        snapshot_number: u32,
        /// The offending ID
        id: i64,
    },

    /// Two groups resolve to the same snapshot number
    #[error("Groups '{first}' and '{second}' both resolve to snapshot number {number}")]
    DuplicateSnapshot {
        /// First group label
        first: String,
        /// Second group label
        second: String,
        /// The shared snapshot number
        number: u32,
    },

    /// A rewritten group does not match the layout of the output container
    #[error("Layout mismatch in group '{group}': {reason}")]
    LayoutMismatch {
        /// Group label
        group: String,
        /// Explanation of the mismatch
        reason: String,
    },

    /// The snapshot holds no halos
    #[error("Snapshot '{snapshot}' has no halos")]
    EmptyInput {
        /// Snapshot label
        snapshot: String,
    },
}

impl SortError {
    /// Whether this error must abort the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SortError::EmptyInput { .. })
    }

    /// Short name of the error kind, for log lines and exit reports
    pub fn kind(&self) -> &'static str {
        match self {
            SortError::Configuration { .. } => "configuration",
            SortError::InvalidConfig { .. } => "invalid configuration",
            SortError::Range { .. } => "range",
            SortError::ReferenceIntegrity { .. } => "reference integrity",
            SortError::MalformedId { .. } => "malformed ID",
            SortError::UniquenessViolation { .. } => "uniqueness",
            SortError::ForeignUniqueId { .. } => "foreign unique ID",
            SortError::DuplicateSnapshot { .. } => "duplicate snapshot",
            SortError::LayoutMismatch { .. } => "layout mismatch",
            SortError::EmptyInput { .. } => "empty input",
        }
    }

    pub(crate) fn missing_field(snapshot: &str, field: &str) -> Self {
        SortError::Configuration {
            snapshot: snapshot.to_string(),
            field: field.to_string(),
            reason: "field does not exist in this snapshot".to_string(),
        }
    }
}
