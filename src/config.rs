//! Sort configuration
//!
//! Resolved settings for one run. Defaults match the conventions of the
//! Genesis halo catalogues: forests first, then host halo, then mass.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::SortError;
use crate::temporal_id::{TemporalIdCodec, DEFAULT_MULTIPLIER};

pub const DEFAULT_SORT_FIELDS: &str = "ForestID,hostHaloID,Mass_200mean";
pub const DEFAULT_UNIQUE_ID_FIELD: &str = "ID";
pub const DEFAULT_ID_FIELDS: &str = "Head,Tail,RootHead,RootTail,ID,hostHaloID";

/// Settings consumed by the two sorting passes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortConfig {
    /// Sort keys, outer-most first. `"none"` entries are ignored.
    pub sort_fields: Vec<String>,
    /// Fields whose values are temporal IDs and must be renumbered
    pub id_fields: Vec<String>,
    /// Field holding each halo's own temporal ID
    pub unique_id_field: String,
    /// Snapshot number -> temporal ID multiplier
    pub multiplier: u64,
    /// Worker threads for both passes
    pub threads: usize,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            sort_fields: parse_field_list(DEFAULT_SORT_FIELDS),
            id_fields: parse_field_list(DEFAULT_ID_FIELDS),
            unique_id_field: DEFAULT_UNIQUE_ID_FIELD.to_string(),
            multiplier: DEFAULT_MULTIPLIER,
            threads: num_cpus::get(),
        }
    }
}

/// Split a comma-separated list of field names.
pub fn parse_field_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a multiplier given either as an integer or in float notation (`1e12`).
pub fn parse_multiplier(value: &str) -> std::result::Result<u64, String> {
    let value = value.trim();
    if let Ok(m) = value.parse::<u64>() {
        return Ok(m);
    }
    let as_float: f64 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;
    if !as_float.is_finite() || as_float < 1.0 || as_float.fract() != 0.0 {
        return Err(format!("'{value}' is not a positive integer"));
    }
    if as_float > i64::MAX as f64 {
        return Err(format!("'{value}' is too large"));
    }
    Ok(as_float as u64)
}

impl SortConfig {
    /// Load a configuration from a JSON file; missing keys take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: SortConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Check the settings and normalise the identifier field list.
    ///
    /// The unique-ID field always holds temporal IDs, so it is added to
    /// `id_fields` when missing.
    pub fn validate(mut self) -> crate::Result<Self> {
        let invalid = |parameter: &str, reason: &str| SortError::InvalidConfig {
            parameter: parameter.to_string(),
            reason: reason.to_string(),
        };

        self.unique_id_field = self.unique_id_field.trim().to_string();
        if self.unique_id_field.is_empty() {
            return Err(invalid("unique_id_field", "must not be empty"));
        }
        if self.threads == 0 {
            return Err(invalid("threads", "must be at least 1"));
        }
        TemporalIdCodec::new(self.multiplier)?;

        let mut id_fields: Vec<String> = Vec::with_capacity(self.id_fields.len() + 1);
        for name in self.id_fields.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
            if !id_fields.iter().any(|existing| existing == name) {
                id_fields.push(name.to_string());
            }
        }
        if !id_fields.contains(&self.unique_id_field) {
            id_fields.push(self.unique_id_field.clone());
        }
        self.id_fields = id_fields;

        Ok(self)
    }

    pub fn codec(&self) -> crate::Result<TemporalIdCodec> {
        TemporalIdCodec::new(self.multiplier)
    }

    pub fn is_id_field(&self, name: &str) -> bool {
        self.id_fields.iter().any(|f| f == name)
    }
}
