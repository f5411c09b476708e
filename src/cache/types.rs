use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::grammar::{empty_fields, Fields, FIELD_COUNT};

/// Which strategy produced the current fields of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParseSource {
    Rule,
    /// Older caches tag model parses as `GPT`.
    #[default]
    #[serde(alias = "GPT")]
    Model,
    UserCorrected,
}

impl ParseSource {
    pub fn label(&self) -> &'static str {
        match self {
            ParseSource::Rule => "Rule",
            ParseSource::Model => "Model",
            ParseSource::UserCorrected => "UserCorrected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseRecord {
    #[serde(
        rename = "parsed",
        default = "empty_fields",
        deserialize_with = "deserialize_fields"
    )]
    pub fields: Fields,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub source: ParseSource,
    #[serde(default)]
    pub corrected_by: Option<String>,
    #[serde(default)]
    pub view_url: String,
}

impl ParseRecord {
    pub fn new(fields: Fields, notes: impl Into<String>, source: ParseSource) -> Self {
        Self {
            fields,
            notes: notes.into(),
            source,
            corrected_by: None,
            view_url: String::new(),
        }
    }

    pub fn with_view_url(mut self, view_url: impl Into<String>) -> Self {
        self.view_url = view_url.into();
        self
    }

    pub fn is_complete(&self) -> bool {
        crate::grammar::is_complete(&self.fields)
    }
}

/// Snapshot of a confident parse, replayed to the model as a few-shot example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExampleEntry {
    pub filename: String,
    #[serde(
        rename = "parsed",
        default = "empty_fields",
        deserialize_with = "deserialize_fields"
    )]
    pub fields: Fields,
    #[serde(default)]
    pub notes: String,
}

impl ExampleEntry {
    pub fn new(filename: impl Into<String>, fields: Fields, notes: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            fields,
            notes: notes.into(),
        }
    }
}

/// One executed drive rename. Written once, never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenamePlanEntry {
    pub file_id: String,
    pub old_name: String,
    pub new_name: String,
}

/// Flattened view of a record used by the sheet sync, `show` and queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    pub fields: Fields,
    pub filename: String,
    pub notes: String,
    pub view_url: String,
}

impl TableRow {
    pub const HEADERS: [&'static str; 8] = [
        "Item Code",
        "Brand",
        "Product + Variant",
        "Dimensions",
        "No. of Colours",
        "Filename",
        "Notes",
        "View URL",
    ];

    pub fn cells(&self) -> Vec<String> {
        let mut cells = self.fields.to_vec();
        cells.push(self.filename.clone());
        cells.push(self.notes.clone());
        cells.push(self.view_url.clone());
        cells
    }
}

/// Hand-edited caches may carry a `parsed` list of the wrong length; keep the
/// five-slot invariant instead of refusing the whole file.
fn deserialize_fields<'de, D>(deserializer: D) -> Result<Fields, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<String>::deserialize(deserializer)?;
    if raw.len() != FIELD_COUNT {
        warn!(
            found = raw.len(),
            "parsed list does not hold {FIELD_COUNT} fields; padding/truncating"
        );
    }

    let mut fields = empty_fields();
    for (slot, value) in fields.iter_mut().zip(raw) {
        *slot = value;
    }
    Ok(fields)
}
