use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{ExampleEntry, ParseRecord};

/// Bounded FIFO of confident parses fed back to the model as few-shot context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<ExampleEntry>", into = "Vec<ExampleEntry>")]
pub struct ExampleStore {
    entries: VecDeque<ExampleEntry>,
}

impl ExampleStore {
    pub const CAPACITY: usize = 20;
    /// Examples shown alongside an ad-hoc query explanation.
    pub const QUERY_CONTEXT: usize = 2;
    /// Examples shown when parsing a filename during a batch import.
    pub const BATCH_CONTEXT: usize = 5;

    pub fn new() -> Self {
        Self::default()
    }

    /// Append a snapshot of `record` when all five fields are populated.
    pub fn promote(&mut self, filename: &str, record: &ParseRecord) -> bool {
        if !record.is_complete() {
            return false;
        }

        self.entries.push_back(ExampleEntry::new(
            filename,
            record.fields.clone(),
            record.notes.clone(),
        ));
        self.evict_overflow();
        true
    }

    /// The `n` most recent entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<ExampleEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExampleEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_overflow(&mut self) {
        while self.entries.len() > Self::CAPACITY {
            if let Some(evicted) = self.entries.pop_front() {
                debug!(filename = %evicted.filename, "evicted oldest example");
            }
        }
    }
}

impl From<Vec<ExampleEntry>> for ExampleStore {
    fn from(entries: Vec<ExampleEntry>) -> Self {
        let mut store = Self {
            entries: entries.into(),
        };
        store.evict_overflow();
        store
    }
}

impl From<ExampleStore> for Vec<ExampleEntry> {
    fn from(store: ExampleStore) -> Self {
        store.entries.into()
    }
}
