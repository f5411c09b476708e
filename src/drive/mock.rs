use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;

use super::{table_values, DriveClient, DriveFile, SheetSink};
use crate::cache::TableRow;

/// In-memory drive folder. Renames update the listing so consecutive runs
/// observe their own effects.
#[derive(Default)]
pub struct MemoryDrive {
    files: Mutex<Vec<DriveFile>>,
    failing_ids: HashSet<String>,
    rename_calls: Mutex<Vec<(String, String)>>,
}

impl MemoryDrive {
    pub fn with_files(files: Vec<DriveFile>) -> Self {
        Self {
            files: Mutex::new(files),
            ..Self::default()
        }
    }

    pub fn failing_renames_for(mut self, file_id: &str) -> Self {
        self.failing_ids.insert(file_id.to_string());
        self
    }

    pub fn files(&self) -> Vec<DriveFile> {
        self.files.lock().expect("drive lock poisoned").clone()
    }

    pub fn rename_calls(&self) -> Vec<(String, String)> {
        self.rename_calls.lock().expect("drive lock poisoned").clone()
    }
}

#[async_trait]
impl DriveClient for MemoryDrive {
    async fn list(&self, _folder_id: &str) -> anyhow::Result<Vec<DriveFile>> {
        Ok(self.files())
    }

    async fn rename(&self, file_id: &str, new_name: &str) -> anyhow::Result<()> {
        self.rename_calls
            .lock()
            .map_err(|_| anyhow!("drive lock poisoned"))?
            .push((file_id.to_string(), new_name.to_string()));

        if self.failing_ids.contains(file_id) {
            return Err(anyhow!("403 insufficient permissions for {file_id}"));
        }

        let mut files = self.files.lock().map_err(|_| anyhow!("drive lock poisoned"))?;
        let file = files
            .iter_mut()
            .find(|file| file.id == file_id)
            .ok_or_else(|| anyhow!("file {file_id} not found"))?;
        file.name = new_name.to_string();
        Ok(())
    }
}

/// Captures every table written to it.
#[derive(Default)]
pub struct MemorySheet {
    fail: bool,
    writes: Mutex<Vec<(String, String, Vec<Vec<String>>)>>,
}

impl MemorySheet {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn writes(&self) -> Vec<(String, String, Vec<Vec<String>>)> {
        self.writes.lock().expect("sheet lock poisoned").clone()
    }
}

#[async_trait]
impl SheetSink for MemorySheet {
    async fn write_table(
        &self,
        spreadsheet_id: &str,
        tab: &str,
        rows: &[TableRow],
    ) -> anyhow::Result<()> {
        if self.fail {
            return Err(anyhow!("sheet {spreadsheet_id} not shared with this account"));
        }
        self.writes
            .lock()
            .map_err(|_| anyhow!("sheet lock poisoned"))?
            .push((spreadsheet_id.to_string(), tab.to_string(), table_values(rows)));
        Ok(())
    }
}
