pub mod google;
pub mod local;
#[cfg(test)]
pub mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cache::TableRow;

pub use google::{GoogleApi, GoogleDriveClient, GoogleSheetsClient};
pub use local::LocalFolderDrive;

/// A file as the drive lists it right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveFile {
    pub id: String,
    pub name: String,
}

impl DriveFile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

pub fn drive_view_url(file_id: &str) -> String {
    format!("https://drive.google.com/file/d/{file_id}/view?usp=drivesdk")
}

#[async_trait]
pub trait DriveClient: Send + Sync {
    /// Every non-trashed file directly inside `folder_id`, all pages collected.
    async fn list(&self, folder_id: &str) -> anyhow::Result<Vec<DriveFile>>;

    async fn rename(&self, file_id: &str, new_name: &str) -> anyhow::Result<()>;

    fn view_url(&self, file: &DriveFile) -> String {
        drive_view_url(&file.id)
    }
}

pub type SharedDriveClient = Arc<dyn DriveClient>;

#[async_trait]
pub trait SheetSink: Send + Sync {
    /// Create `tab` if needed and overwrite it with a header row plus `rows`.
    async fn write_table(
        &self,
        spreadsheet_id: &str,
        tab: &str,
        rows: &[TableRow],
    ) -> anyhow::Result<()>;
}

pub type SharedSheetSink = Arc<dyn SheetSink>;

/// Header row followed by one row per record.
pub fn table_values(rows: &[TableRow]) -> Vec<Vec<String>> {
    let mut values = Vec::with_capacity(rows.len() + 1);
    values.push(TableRow::HEADERS.iter().map(|h| h.to_string()).collect());
    values.extend(rows.iter().map(TableRow::cells));
    values
}
