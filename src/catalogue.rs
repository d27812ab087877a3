//! On-disk halo catalogues
//!
//! A catalogue is a directory:
//!
//! ```text
//! catalogue.json     manifest: groups in order, their files, checksums and field layouts
//! group_0000.bin     bincode-encoded fields of the first group
//! group_0001.bin     ...
//! ```
//!
//! Groups are either snapshots (`Snap_063`) or metadata (`Header`). The sort
//! reads a [`Catalogue`] through [`CatalogueSource`] and writes a
//! [`StagedCatalogue`] through [`CatalogueSink`]. The staged output lives in a
//! temporary directory next to its destination until [`StagedCatalogue::commit`];
//! dropping it uncommitted removes everything it wrote.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use memmap2::MmapOptions;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

use crate::error::SortError;
use crate::snapshot::{Field, FieldLayout};

pub const MANIFEST_FILE: &str = "catalogue.json";
pub const FORMAT_VERSION: u32 = 1;

/// Readable side of a catalogue
pub trait CatalogueSource: Sync {
    /// Group names in catalogue order
    fn group_names(&self) -> Vec<String>;
    /// All fields of one group
    fn read_group(&self, name: &str) -> Result<Vec<Field>>;
}

/// Writable side of a catalogue with the same groups as its source
pub trait CatalogueSink: Sync {
    /// Copy a group from the source byte for byte
    fn copy_group(&self, name: &str) -> Result<()>;
    /// Replace a group with rewritten fields of the same layout
    fn write_group(&self, name: &str, fields: &[Field]) -> Result<()>;
}

/// Manifest entry of one group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntry {
    pub name: String,
    pub file: String,
    /// Hex SHA-256 of the group file
    pub sha256: String,
    pub fields: Vec<FieldLayout>,
}

/// How a catalogue was produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub tool: String,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub source: String,
    pub sort_fields: Vec<String>,
    pub multiplier: u64,
}

/// Contents of `catalogue.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogueManifest {
    pub format_version: u32,
    pub groups: Vec<GroupEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
}

impl CatalogueManifest {
    pub fn group(&self, name: &str) -> Option<&GroupEntry> {
        self.groups.iter().find(|g| g.name == name)
    }
}

fn group_file_name(position: usize) -> String {
    format!("group_{:04}.bin", position)
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Write `data` to `path` through a temp file and an atomic rename.
fn write_atomically(path: &Path, data: &[u8]) -> Result<()> {
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_file = PathBuf::from(temp_name);

    std::fs::write(&temp_file, data)
        .with_context(|| format!("Failed to write temp file: {}", temp_file.display()))?;
    std::fs::rename(&temp_file, path)
        .with_context(|| format!("Failed to rename temp file to: {}", path.display()))?;
    Ok(())
}

/// Serialize fields into a group file, returning its checksum.
fn write_group_file(path: &Path, fields: &[Field]) -> Result<String> {
    let data = bincode::serialize(fields).context("Failed to serialize group")?;
    write_atomically(path, &data)?;
    Ok(sha256_hex(&data))
}

fn write_manifest(dir: &Path, manifest: &CatalogueManifest) -> Result<()> {
    let data = serde_json::to_vec_pretty(manifest).context("Failed to serialize manifest")?;
    write_atomically(&dir.join(MANIFEST_FILE), &data)
}

fn check_layout(entry: &GroupEntry, fields: &[Field]) -> std::result::Result<(), SortError> {
    let layouts: Vec<FieldLayout> = fields.iter().map(Field::layout).collect();
    if layouts == entry.fields {
        return Ok(());
    }

    let reason = if layouts.len() != entry.fields.len() {
        format!("expected {} fields, got {}", entry.fields.len(), layouts.len())
    } else {
        let (expected, got) = entry
            .fields
            .iter()
            .zip(&layouts)
            .find(|(expected, got)| expected != got)
            .map(|(e, g)| (format!("{e:?}"), format!("{g:?}")))
            .unwrap_or_default();
        format!("expected {expected}, got {got}")
    };
    Err(SortError::LayoutMismatch { group: entry.name.clone(), reason })
}

/// A catalogue opened for reading
#[derive(Debug, Clone)]
pub struct Catalogue {
    root: PathBuf,
    manifest: CatalogueManifest,
}

impl Catalogue {
    /// Open the catalogue in `dir` by reading its manifest.
    pub fn open(dir: &Path) -> Result<Self> {
        let manifest_file = dir.join(MANIFEST_FILE);
        let content = std::fs::read(&manifest_file).with_context(|| {
            format!("Failed to read catalogue manifest: {}", manifest_file.display())
        })?;
        let manifest: CatalogueManifest = serde_json::from_slice(&content).with_context(|| {
            format!("Failed to parse catalogue manifest: {}", manifest_file.display())
        })?;

        if manifest.format_version != FORMAT_VERSION {
            anyhow::bail!(
                "Unsupported catalogue format version {} in {} (expected {})",
                manifest.format_version,
                manifest_file.display(),
                FORMAT_VERSION
            );
        }

        Ok(Self { root: dir.to_path_buf(), manifest })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> &CatalogueManifest {
        &self.manifest
    }

    fn entry(&self, name: &str) -> Result<&GroupEntry> {
        self.manifest
            .group(name)
            .ok_or_else(|| anyhow::anyhow!("Group '{}' not found in {}", name, self.root.display()))
    }

    fn group_path(&self, entry: &GroupEntry) -> PathBuf {
        self.root.join(&entry.file)
    }
}

impl CatalogueSource for Catalogue {
    fn group_names(&self) -> Vec<String> {
        self.manifest.groups.iter().map(|g| g.name.clone()).collect()
    }

    fn read_group(&self, name: &str) -> Result<Vec<Field>> {
        let entry = self.entry(name)?;
        let path = self.group_path(entry);
        let file = File::open(&path)
            .with_context(|| format!("Failed to open group file: {}", path.display()))?;
        // SAFETY: the catalogue is not modified while it is being read.
        let mmap = unsafe { MmapOptions::new().map(&file) }
            .with_context(|| format!("Failed to map group file: {}", path.display()))?;

        let checksum = sha256_hex(&mmap);
        if checksum != entry.sha256 {
            anyhow::bail!(
                "Checksum mismatch for group '{}' ({}): manifest {}, file {}",
                name,
                path.display(),
                entry.sha256,
                checksum
            );
        }

        let fields: Vec<Field> = bincode::deserialize(&mmap)
            .with_context(|| format!("Failed to deserialize group '{}'", name))?;
        check_layout(entry, &fields)?;
        Ok(fields)
    }
}

/// Writes a new catalogue group by group
#[derive(Debug)]
pub struct CatalogueBuilder {
    root: PathBuf,
    groups: Vec<GroupEntry>,
}

impl CatalogueBuilder {
    /// Start a catalogue in `dir`, which must not already hold one.
    pub fn create(dir: &Path) -> Result<Self> {
        if dir.join(MANIFEST_FILE).exists() {
            anyhow::bail!("Refusing to overwrite existing catalogue: {}", dir.display());
        }
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create catalogue directory: {}", dir.display()))?;
        Ok(Self { root: dir.to_path_buf(), groups: Vec::new() })
    }

    pub fn add_group(&mut self, name: &str, fields: &[Field]) -> Result<&mut Self> {
        if self.groups.iter().any(|g| g.name == name) {
            anyhow::bail!("Group '{}' added twice", name);
        }
        let file = group_file_name(self.groups.len());
        let sha256 = write_group_file(&self.root.join(&file), fields)
            .with_context(|| format!("Failed to write group '{}'", name))?;
        self.groups.push(GroupEntry {
            name: name.to_string(),
            file,
            sha256,
            fields: fields.iter().map(Field::layout).collect(),
        });
        Ok(self)
    }

    /// Write the manifest and reopen the catalogue for reading.
    pub fn finish(self) -> Result<Catalogue> {
        let manifest = CatalogueManifest {
            format_version: FORMAT_VERSION,
            groups: self.groups,
            provenance: None,
        };
        write_manifest(&self.root, &manifest)?;
        Ok(Catalogue { root: self.root, manifest })
    }
}

/// Output catalogue laid out like its source, staged until committed
#[derive(Debug)]
pub struct StagedCatalogue<'a> {
    source: &'a Catalogue,
    staging: TempDir,
    dest: PathBuf,
    overwrite: bool,
    /// group name -> checksum of what was staged
    written: Mutex<FxHashMap<String, String>>,
}

impl<'a> StagedCatalogue<'a> {
    /// Stage an output for `source` that will be committed to `dest`.
    ///
    /// An existing `dest` is only replaced when `overwrite` is set, and only
    /// if it is itself a catalogue.
    pub fn create(source: &'a Catalogue, dest: &Path, overwrite: bool) -> Result<Self> {
        if dest.exists() {
            if !overwrite {
                anyhow::bail!(
                    "Output {} already exists (use --overwrite to replace it)",
                    dest.display()
                );
            }
            if dest.canonicalize()? == source.root.canonicalize()? {
                anyhow::bail!(
                    "Refusing to write the output over its own input: {}",
                    dest.display()
                );
            }
        }

        let parent = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)
            .with_context(|| format!("Failed to create output parent: {}", parent.display()))?;
        let staging = tempfile::Builder::new()
            .prefix(".forest-sorter-")
            .tempdir_in(&parent)
            .with_context(|| {
                format!("Failed to create staging directory in {}", parent.display())
            })?;

        Ok(Self {
            source,
            staging,
            dest: dest.to_path_buf(),
            overwrite,
            written: Mutex::new(FxHashMap::default()),
        })
    }

    pub fn staging_dir(&self) -> &Path {
        self.staging.path()
    }

    fn record(&self, name: &str, sha256: String) -> Result<()> {
        let mut written = self
            .written
            .lock()
            .map_err(|_| anyhow::anyhow!("Staged catalogue lock poisoned"))?;
        if written.insert(name.to_string(), sha256).is_some() {
            anyhow::bail!("Group '{}' written twice", name);
        }
        Ok(())
    }

    /// Write the manifest and move the staged catalogue to its destination.
    ///
    /// Fails if any source group was neither copied nor written.
    pub fn commit(self, provenance: Option<Provenance>) -> Result<Catalogue> {
        let written = self
            .written
            .into_inner()
            .map_err(|_| anyhow::anyhow!("Staged catalogue lock poisoned"))?;

        let mut groups = Vec::with_capacity(self.source.manifest.groups.len());
        for entry in &self.source.manifest.groups {
            let sha256 = written
                .get(&entry.name)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("Group '{}' was never written", entry.name))?;
            groups.push(GroupEntry { sha256, ..entry.clone() });
        }
        let manifest = CatalogueManifest { format_version: FORMAT_VERSION, groups, provenance };
        write_manifest(self.staging.path(), &manifest)?;

        if self.dest.exists() {
            if !self.overwrite || !self.dest.join(MANIFEST_FILE).exists() {
                anyhow::bail!("Refusing to replace {}: not a catalogue", self.dest.display());
            }
            std::fs::remove_dir_all(&self.dest)
                .with_context(|| format!("Failed to remove old output: {}", self.dest.display()))?;
        }

        let staged = self.staging.keep();
        if let Err(e) = std::fs::rename(&staged, &self.dest) {
            let _ = std::fs::remove_dir_all(&staged);
            return Err(e).with_context(|| {
                format!("Failed to move staged catalogue to {}", self.dest.display())
            });
        }

        Ok(Catalogue { root: self.dest, manifest })
    }
}

impl CatalogueSink for StagedCatalogue<'_> {
    fn copy_group(&self, name: &str) -> Result<()> {
        let entry = self.source.entry(name)?;
        let from = self.source.group_path(entry);
        let to = self.staging.path().join(&entry.file);
        std::fs::copy(&from, &to).with_context(|| {
            format!("Failed to copy group '{}' from {}", name, from.display())
        })?;
        self.record(name, entry.sha256.clone())
    }

    fn write_group(&self, name: &str, fields: &[Field]) -> Result<()> {
        let entry = self.source.entry(name)?;
        check_layout(entry, fields)?;
        let sha256 = write_group_file(&self.staging.path().join(&entry.file), fields)
            .with_context(|| format!("Failed to write group '{}'", name))?;
        self.record(name, sha256)
    }
}

/// Catalogue held entirely in memory (tests, benchmarks, small datasets)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryCatalogue {
    groups: Vec<(String, Vec<Field>)>,
}

impl MemoryCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, name: impl Into<String>, fields: Vec<Field>) -> Self {
        self.groups.push((name.into(), fields));
        self
    }

    pub fn group(&self, name: &str) -> Option<&[Field]> {
        self.groups
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, fields)| fields.as_slice())
    }
}

impl CatalogueSource for MemoryCatalogue {
    fn group_names(&self) -> Vec<String> {
        self.groups.iter().map(|(name, _)| name.clone()).collect()
    }

    fn read_group(&self, name: &str) -> Result<Vec<Field>> {
        self.group(name)
            .map(<[Field]>::to_vec)
            .ok_or_else(|| anyhow::anyhow!("Group '{}' not found", name))
    }
}

/// In-memory output for a [`MemoryCatalogue`]
#[derive(Debug)]
pub struct MemorySink<'a> {
    source: &'a MemoryCatalogue,
    written: Mutex<FxHashMap<String, Vec<Field>>>,
}

impl<'a> MemorySink<'a> {
    pub fn new(source: &'a MemoryCatalogue) -> Self {
        Self { source, written: Mutex::new(FxHashMap::default()) }
    }

    fn store(&self, name: &str, fields: Vec<Field>) -> Result<()> {
        let mut written = self
            .written
            .lock()
            .map_err(|_| anyhow::anyhow!("Memory sink lock poisoned"))?;
        if written.insert(name.to_string(), fields).is_some() {
            anyhow::bail!("Group '{}' written twice", name);
        }
        Ok(())
    }

    /// The written groups in source order.
    pub fn into_catalogue(self) -> Result<MemoryCatalogue> {
        let mut written = self
            .written
            .into_inner()
            .map_err(|_| anyhow::anyhow!("Memory sink lock poisoned"))?;
        let mut out = MemoryCatalogue::new();
        for name in self.source.group_names() {
            let fields = written
                .remove(&name)
                .ok_or_else(|| anyhow::anyhow!("Group '{}' was never written", name))?;
            out = out.with_group(name, fields);
        }
        Ok(out)
    }
}

impl CatalogueSink for MemorySink<'_> {
    fn copy_group(&self, name: &str) -> Result<()> {
        let fields = self.source.read_group(name)?;
        self.store(name, fields)
    }

    fn write_group(&self, name: &str, fields: &[Field]) -> Result<()> {
        let original = self
            .source
            .group(name)
            .ok_or_else(|| anyhow::anyhow!("Group '{}' not found", name))?;
        let entry = GroupEntry {
            name: name.to_string(),
            file: String::new(),
            sha256: String::new(),
            fields: original.iter().map(Field::layout).collect(),
        };
        check_layout(&entry, fields)?;
        self.store(name, fields.to_vec())
    }
}
