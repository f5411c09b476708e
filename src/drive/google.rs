use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument};

use super::{table_values, DriveClient, DriveFile, SheetSink};
use crate::cache::TableRow;
use crate::config::GoogleConfig;

const DRIVE_FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const SHEETS_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// Minimal authenticated HTTP client for the Google REST surface. Token
/// acquisition happens elsewhere; this only attaches the bearer token.
#[derive(Clone)]
pub struct GoogleApi {
    http: reqwest::Client,
    access_token: String,
}

impl GoogleApi {
    pub fn new(config: &GoogleConfig) -> anyhow::Result<Self> {
        let access_token = config
            .access_token
            .clone()
            .context("Set GOOGLE_ACCESS_TOKEN to talk to Google Drive/Sheets")?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.http_timeout_ms.max(1)))
            .build()
            .context("Failed to build Google HTTP client")?;

        Ok(Self { http, access_token })
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.bearer_auth(&self.access_token)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListPage {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

pub struct GoogleDriveClient {
    api: GoogleApi,
}

impl GoogleDriveClient {
    pub fn new(api: GoogleApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl DriveClient for GoogleDriveClient {
    #[instrument(skip(self))]
    async fn list(&self, folder_id: &str) -> anyhow::Result<Vec<DriveFile>> {
        let query = format!("'{folder_id}' in parents and trashed = false");
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("q", query.as_str()),
                ("fields", "nextPageToken, files(id, name)"),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }
            let url = Url::parse_with_params(DRIVE_FILES_URL, &params)
                .context("Failed to build Drive list URL")?;

            let page = self
                .api
                .authed(self.api.http.get(url))
                .send()
                .await
                .context("Drive list request failed")?
                .error_for_status()
                .context("Drive list returned error status")?
                .json::<FileListPage>()
                .await
                .context("Failed to deserialize Drive list response")?;

            debug!(count = page.files.len(), "received Drive page");
            files.extend(page.files);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(files)
    }

    #[instrument(skip(self))]
    async fn rename(&self, file_id: &str, new_name: &str) -> anyhow::Result<()> {
        let url = format!("{DRIVE_FILES_URL}/{file_id}");
        self.api
            .authed(self.api.http.patch(url))
            .json(&json!({ "name": new_name }))
            .send()
            .await
            .with_context(|| format!("Drive rename request for {file_id} failed"))?
            .error_for_status()
            .with_context(|| format!("Drive rename for {file_id} returned error status"))?;
        Ok(())
    }
}

pub struct GoogleSheetsClient {
    api: GoogleApi,
}

impl GoogleSheetsClient {
    pub fn new(api: GoogleApi) -> Self {
        Self { api }
    }

    /// Returns false when the tab could not be added, which is almost always
    /// because it already exists.
    async fn add_tab(&self, spreadsheet_id: &str, tab: &str) -> bool {
        let url = format!("{SHEETS_URL}/{spreadsheet_id}:batchUpdate");
        let body = json!({
            "requests": [{ "addSheet": { "properties": { "title": tab } } }]
        });

        match self
            .api
            .authed(self.api.http.post(url))
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
        {
            Ok(_) => true,
            Err(err) => {
                debug!(?err, tab, "addSheet failed; assuming tab exists");
                false
            }
        }
    }
}

/// `'tab'!A1`, with any `'` in the tab name doubled as A1 notation requires.
fn a1_range(tab: &str) -> String {
    format!("'{}'!A1", tab.replace('\'', "''"))
}

#[async_trait]
impl SheetSink for GoogleSheetsClient {
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn write_table(
        &self,
        spreadsheet_id: &str,
        tab: &str,
        rows: &[TableRow],
    ) -> anyhow::Result<()> {
        if self.add_tab(spreadsheet_id, tab).await {
            info!(tab, "created sheet tab");
        }

        let range = a1_range(tab);
        let mut url = Url::parse(&format!("{SHEETS_URL}/{spreadsheet_id}/values/"))
            .context("Failed to build Sheets URL")?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Sheets URL cannot carry a range"))?
            .pop_if_empty()
            .push(&range);
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");

        let body = json!({
            "range": range,
            "majorDimension": "ROWS",
            "values": table_values(rows),
        });

        self.api
            .authed(self.api.http.put(url))
            .json(&body)
            .send()
            .await
            .context("Sheets values update request failed")?
            .error_for_status()
            .context("Sheets values update returned error status")?;
        Ok(())
    }
}
