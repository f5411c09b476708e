use async_trait::async_trait;
use serde::Deserialize;
use tracing::instrument;

use super::chain::{FilenameParser, ParseFailure, ParsedFilename};
use super::prompt::{build_explain_system_prompt, build_parse_prompt};
use crate::cache::{ExampleEntry, ParseSource};
use crate::grammar::{empty_fields, FIELD_COUNT};
use crate::llm_client::{CompletionRequest, SharedLlmClient};

#[derive(Debug, Deserialize)]
struct ModelReply {
    parsed: Vec<String>,
    #[serde(default)]
    notes: String,
}

/// Asks one completion model to split a filename, replying in JSON.
pub struct CompletionParser {
    llm: SharedLlmClient,
    model: String,
    max_tokens: u32,
}

impl CompletionParser {
    pub fn new(llm: SharedLlmClient, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            llm,
            model: model.into(),
            max_tokens,
        }
    }
}

#[async_trait]
impl FilenameParser for CompletionParser {
    fn name(&self) -> &str {
        &self.model
    }

    fn source(&self) -> ParseSource {
        ParseSource::Model
    }

    #[instrument(skip_all, fields(model = %self.model, filename = %filename))]
    async fn parse(
        &self,
        filename: &str,
        examples: &[ExampleEntry],
    ) -> Result<ParsedFilename, ParseFailure> {
        let request = CompletionRequest {
            system: None,
            prompt: build_parse_prompt(filename, examples),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: 0.0,
        };

        let reply = self
            .llm
            .complete(&request)
            .await
            .map_err(|err| ParseFailure::Service {
                model: self.model.clone(),
                reason: format!("{err:#}"),
            })?;

        parse_model_reply(&reply).map_err(|reason| ParseFailure::MalformedReply {
            model: self.model.clone(),
            reason,
        })
    }
}

/// Decode `{"parsed": [5 strings], "notes": "..."}`, tolerating a Markdown
/// code fence or chatter around the object.
pub fn parse_model_reply(reply: &str) -> Result<ParsedFilename, String> {
    let trimmed = reply.trim();
    let start = trimmed.find('{').ok_or("no JSON object in reply")?;
    let end = trimmed.rfind('}').ok_or("no JSON object in reply")?;
    if end < start {
        return Err("no JSON object in reply".to_string());
    }

    let decoded: ModelReply =
        serde_json::from_str(&trimmed[start..=end]).map_err(|err| err.to_string())?;
    if decoded.parsed.len() != FIELD_COUNT {
        return Err(format!(
            "expected {FIELD_COUNT} parsed fields, got {}",
            decoded.parsed.len()
        ));
    }

    let mut fields = empty_fields();
    for (slot, value) in fields.iter_mut().zip(decoded.parsed) {
        *slot = value.trim().to_string();
    }

    Ok(ParsedFilename {
        fields,
        notes: decoded.notes,
    })
}

/// Answers free-text questions the keyword filter could not.
pub struct QueryExplainer {
    llm: SharedLlmClient,
    model: String,
    max_tokens: u32,
}

impl QueryExplainer {
    pub fn new(llm: SharedLlmClient, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            llm,
            model: model.into(),
            max_tokens,
        }
    }

    #[instrument(skip_all, fields(model = %self.model))]
    pub async fn explain(&self, query: &str, recent: &[ExampleEntry]) -> anyhow::Result<String> {
        let request = CompletionRequest {
            system: Some(build_explain_system_prompt(recent)),
            prompt: query.trim().to_string(),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: 0.0,
        };
        self.llm.complete(&request).await
    }
}
