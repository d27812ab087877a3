//! forest-sorter - Re-orders halo catalogues into forest order
//!
//! Every snapshot of a merger-tree catalogue is sorted on a list of keys
//! (by default forest, host halo, then mass), and every temporal halo ID in
//! the dataset is renumbered to match the new positions, so that an ID of
//! the form `snapshot * multiplier + index` keeps pointing at the same halo.

/// Catalogue container: manifest, group files, staged output
pub mod catalogue;
/// Sort configuration and its validation
pub mod config;
pub mod error;
pub mod logging;
/// Two-pass sort of a whole catalogue
pub mod pipeline;
/// Per-snapshot old -> new ID tables (pass 1)
pub mod remap;
/// Field permutation and ID rewriting (pass 2)
pub mod rewrite;
/// Columnar snapshot data and snapshot group discovery
pub mod snapshot;
pub mod sort_keys;
/// Temporal ID encoding
pub mod temporal_id;
/// Post-sort consistency checks
pub mod verify;

pub use catalogue::{Catalogue, CatalogueSink, CatalogueSource, Provenance, StagedCatalogue};
pub use config::SortConfig;
pub use error::{Result, SortError};
pub use pipeline::{sort_catalogue, sort_error, SortSummary};
pub use temporal_id::{Reference, TemporalIdCodec};
pub use verify::{verify_catalogue, VerifyReport};
