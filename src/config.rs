use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Completion-service settings shared by the batch parser and the query explainer.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub primary_model: String,
    pub fallback_model: String,
    pub max_tokens: u32,
    pub timeout_ms: u64,
}

impl LlmConfig {
    const API_KEY_VARS: [&'static str; 2] = ["OPENAI_KEY", "OPENAI_API_KEY"];
    const BASE_URL_VARS: [&'static str; 1] = ["OPENAI_BASE_URL"];
    const PRIMARY_MODEL_VARS: [&'static str; 1] = ["SPECBOT_PRIMARY_MODEL"];
    const FALLBACK_MODEL_VARS: [&'static str; 1] = ["SPECBOT_FALLBACK_MODEL"];
    const MAX_TOKENS_VARS: [&'static str; 1] = ["SPECBOT_MAX_TOKENS"];
    const TIMEOUT_VARS: [&'static str; 1] = ["SPECBOT_LLM_TIMEOUT_MS"];

    pub const DEFAULT_PRIMARY_MODEL: &'static str = "gpt-4o";
    pub const DEFAULT_FALLBACK_MODEL: &'static str = "gpt-4o-mini";

    pub fn from_env() -> Self {
        Self {
            api_key: read_env(&Self::API_KEY_VARS),
            base_url: read_env(&Self::BASE_URL_VARS),
            primary_model: read_env(&Self::PRIMARY_MODEL_VARS)
                .unwrap_or_else(|| Self::DEFAULT_PRIMARY_MODEL.to_string()),
            fallback_model: read_env(&Self::FALLBACK_MODEL_VARS)
                .unwrap_or_else(|| Self::DEFAULT_FALLBACK_MODEL.to_string()),
            max_tokens: read_env(&Self::MAX_TOKENS_VARS)
                .and_then(|value| value.parse().ok())
                .unwrap_or(256),
            timeout_ms: read_env(&Self::TIMEOUT_VARS)
                .and_then(|value| value.parse().ok())
                .unwrap_or(30_000),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}

/// Google Drive / Sheets collaborator settings.
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub source_folder_id: Option<String>,
    pub sheet_id: Option<String>,
    pub sheet_tab: String,
    pub access_token: Option<String>,
    pub http_timeout_ms: u64,
}

impl GoogleConfig {
    const FOLDER_VARS: [&'static str; 1] = ["SOURCE_FOLDER_ID"];
    const SHEET_VARS: [&'static str; 1] = ["GOOGLE_SHEET_ID"];
    const TAB_VARS: [&'static str; 1] = ["SPECBOT_SHEET_TAB"];
    const TOKEN_VARS: [&'static str; 2] = ["GOOGLE_ACCESS_TOKEN", "GOOGLE_OAUTH_TOKEN"];
    const TIMEOUT_VARS: [&'static str; 1] = ["SPECBOT_HTTP_TIMEOUT_MS"];

    pub fn from_env() -> Self {
        Self {
            source_folder_id: read_env(&Self::FOLDER_VARS).map(|raw| strip_quotes(&raw)),
            sheet_id: read_env(&Self::SHEET_VARS).map(|raw| strip_quotes(&raw)),
            sheet_tab: read_env(&Self::TAB_VARS).unwrap_or_else(|| "Parsed_Files".to_string()),
            access_token: read_env(&Self::TOKEN_VARS),
            http_timeout_ms: read_env(&Self::TIMEOUT_VARS)
                .and_then(|value| value.parse().ok())
                .unwrap_or(10_000),
        }
    }
}

/// Local file locations.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub cache_file: PathBuf,
    pub rename_log_file: PathBuf,
}

impl StorageConfig {
    const CACHE_VARS: [&'static str; 1] = ["SPECBOT_CACHE_FILE"];
    const RENAME_LOG_VARS: [&'static str; 1] = ["SPECBOT_RENAME_LOG"];

    pub fn from_env() -> Self {
        Self {
            cache_file: read_env(&Self::CACHE_VARS)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("gpt_filename_cache.json")),
            rename_log_file: read_env(&Self::RENAME_LOG_VARS)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("drive_rename_log.json")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub google: GoogleConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            llm: LlmConfig::from_env(),
            google: GoogleConfig::from_env(),
            storage: StorageConfig::from_env(),
        }
    }
}

fn read_env(candidates: &[&'static str]) -> Option<String> {
    candidates
        .iter()
        .find_map(|key| env::var(key).ok())
        .filter(|value| !value.trim().is_empty())
}

/// `.env` files frequently wrap ids in quotes; Drive ids never contain them.
fn strip_quotes(raw: &str) -> String {
    raw.replace(['\'', '"'], "").trim().to_string()
}
