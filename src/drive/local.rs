use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use async_trait::async_trait;

use super::{DriveClient, DriveFile};

/// A directory on disk standing in for a drive folder. File ids are paths
/// relative to the root, so a rename also changes the id on the next listing.
#[derive(Debug, Clone)]
pub struct LocalFolderDrive {
    root: PathBuf,
}

impl LocalFolderDrive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn folder_path(&self, folder_id: &str) -> PathBuf {
        match folder_id.trim() {
            "" | "." => self.root.clone(),
            sub => self.root.join(sub),
        }
    }

    fn relative_id(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

#[async_trait]
impl DriveClient for LocalFolderDrive {
    async fn list(&self, folder_id: &str) -> anyhow::Result<Vec<DriveFile>> {
        let folder = self.folder_path(folder_id);
        let mut entries = tokio::fs::read_dir(&folder)
            .await
            .with_context(|| format!("Failed to list folder {}", folder.display()))?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            files.push(DriveFile::new(self.relative_id(&entry.path()), name));
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn rename(&self, file_id: &str, new_name: &str) -> anyhow::Result<()> {
        if new_name.is_empty()
            || new_name == "."
            || new_name == ".."
            || new_name.contains(['/', '\\'])
        {
            anyhow::bail!("'{new_name}' is not a plain file name");
        }

        let from = self.root.join(file_id);
        let to = from
            .parent()
            .ok_or_else(|| anyhow!("{} has no parent folder", from.display()))?
            .join(new_name);
        if tokio::fs::try_exists(&to).await.unwrap_or(false) {
            anyhow::bail!("{} already exists", to.display());
        }

        tokio::fs::rename(&from, &to)
            .await
            .with_context(|| format!("Failed to rename {} to {}", from.display(), to.display()))
    }

    fn view_url(&self, file: &DriveFile) -> String {
        format!("file://{}", self.root.join(&file.id).display())
    }
}
