use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{anyhow, Context};
use indexmap::IndexMap;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, warn};

use super::examples::ExampleStore;
use super::types::{ParseRecord, ParseSource, RenamePlanEntry, TableRow};
use crate::grammar::Fields;

pub const EXAMPLES_KEY: &str = "examples";
pub const RENAME_LOG_KEY: &str = "rename_log";

pub fn is_reserved_key(name: &str) -> bool {
    name == EXAMPLES_KEY || name == RENAME_LOG_KEY
}

/// Durable owner of all parse state. Loaded, mutated and saved by exactly one
/// command per process; concurrent writers are not supported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseCache {
    records: IndexMap<String, ParseRecord>,
    examples: ExampleStore,
    rename_log: Vec<RenamePlanEntry>,
}

impl ParseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the cache at `path`. A missing file is an empty cache; an
    /// unreadable or corrupt one is an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no cache file yet; starting empty");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read cache file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Cache file {} is not a valid cache", path.display()))
    }

    /// Rewrite the whole cache atomically.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self).context("Failed to serialize cache")?;
        write_atomic(path, &content)
            .with_context(|| format!("Failed to write cache file {}", path.display()))
    }

    pub fn get(&self, filename: &str) -> Option<&ParseRecord> {
        self.records.get(filename)
    }

    pub fn get_mut(&mut self, filename: &str) -> Option<&mut ParseRecord> {
        self.records.get_mut(filename)
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.records.contains_key(filename)
    }

    pub fn put(&mut self, filename: impl Into<String>, record: ParseRecord) -> anyhow::Result<()> {
        let filename = filename.into();
        anyhow::ensure!(
            !is_reserved_key(&filename),
            "'{filename}' collides with a reserved cache key"
        );
        self.records.insert(filename, record);
        Ok(())
    }

    /// Move the record stored under `old` to `new`, keeping its position.
    /// Returns false without touching anything when `old` is absent or `new`
    /// is already taken.
    pub fn rename(&mut self, old: &str, new: &str) -> bool {
        if old == new || !self.records.contains_key(old) {
            return false;
        }
        if self.records.contains_key(new) || is_reserved_key(new) {
            warn!(old, new, "rename target already taken; keeping old key");
            return false;
        }

        match self.records.shift_remove_full(old) {
            Some((index, _, record)) => {
                self.records.shift_insert(index, new.to_string(), record);
                true
            }
            None => false,
        }
    }

    /// Record a human correction of a cached parse.
    pub fn apply_correction(
        &mut self,
        filename: &str,
        fields: Fields,
        notes: impl Into<String>,
        corrected_by: Option<String>,
    ) -> anyhow::Result<&ParseRecord> {
        let record = self
            .records
            .get_mut(filename)
            .ok_or_else(|| anyhow!("No cached record for '{filename}'"))?;

        record.fields = fields;
        record.notes = notes.into();
        record.source = ParseSource::UserCorrected;
        record.corrected_by = corrected_by;
        Ok(record)
    }

    /// Keys whose record points at `view_url`, in cache order.
    pub fn keys_with_view_url<'a>(&'a self, view_url: &'a str) -> impl Iterator<Item = &'a String> {
        self.records
            .iter()
            .filter(move |(_, record)| !view_url.is_empty() && record.view_url == view_url)
            .map(|(key, _)| key)
    }

    pub fn records(&self) -> impl Iterator<Item = (&String, &ParseRecord)> {
        self.records.iter()
    }

    pub fn rows(&self) -> Vec<TableRow> {
        self.records
            .iter()
            .map(|(filename, record)| TableRow {
                fields: record.fields.clone(),
                filename: filename.clone(),
                notes: record.notes.clone(),
                view_url: record.view_url.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn examples(&self) -> &ExampleStore {
        &self.examples
    }

    pub fn examples_mut(&mut self) -> &mut ExampleStore {
        &mut self.examples
    }

    pub fn rename_log(&self) -> &[RenamePlanEntry] {
        &self.rename_log
    }

    pub fn replace_rename_log(&mut self, entries: Vec<RenamePlanEntry>) {
        self.rename_log = entries;
    }
}

// On disk the cache is one flat object: filenames map to records and two
// reserved keys carry the example store and the latest rename log.
impl Serialize for ParseCache {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.records.len() + 2))?;
        map.serialize_entry(EXAMPLES_KEY, &self.examples)?;
        for (filename, record) in &self.records {
            map.serialize_entry(filename, record)?;
        }
        map.serialize_entry(RENAME_LOG_KEY, &self.rename_log)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for ParseCache {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CacheVisitor;

        impl<'de> Visitor<'de> for CacheVisitor {
            type Value = ParseCache;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping of filenames to parse records")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<ParseCache, A::Error> {
                let mut cache = ParseCache::default();
                while let Some(key) = access.next_key::<String>()? {
                    match key.as_str() {
                        EXAMPLES_KEY => cache.examples = access.next_value()?,
                        RENAME_LOG_KEY => cache.rename_log = access.next_value()?,
                        _ => {
                            let record: ParseRecord = access.next_value()?;
                            cache.records.insert(key, record);
                        }
                    }
                }
                Ok(cache)
            }
        }

        deserializer.deserialize_map(CacheVisitor)
    }
}

/// Write `content` to a sibling temp file and rename it over `path`, so a
/// reader sees either the previous file or the new one, never a prefix.
pub fn write_atomic(path: &Path, content: &str) -> anyhow::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("{} has no file name", path.display()))?;
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp.{}", std::process::id()));

    let written = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if let Err(err) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}
