use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use super::model::CompletionParser;
use crate::cache::{ExampleEntry, ParseSource};
use crate::config::LlmConfig;
use crate::grammar::{self, empty_fields, Fields};
use crate::llm_client::SharedLlmClient;

/// Why a single strategy produced nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    /// Not an error: the filename simply does not follow the convention.
    #[error("filename does not split into 5 non-empty parts")]
    GrammarMismatch,

    #[error("{model}: {reason}")]
    Service { model: String, reason: String },

    #[error("{model}: malformed reply: {reason}")]
    MalformedReply { model: String, reason: String },
}

impl ParseFailure {
    pub fn is_service_failure(&self) -> bool {
        !matches!(self, ParseFailure::GrammarMismatch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFilename {
    pub fields: Fields,
    pub notes: String,
}

#[async_trait]
pub trait FilenameParser: Send + Sync {
    fn name(&self) -> &str;
    fn source(&self) -> ParseSource;
    async fn parse(
        &self,
        filename: &str,
        examples: &[ExampleEntry],
    ) -> Result<ParsedFilename, ParseFailure>;
}

/// The deterministic grammar as a chain strategy.
#[derive(Debug, Default, Clone)]
pub struct GrammarParser;

#[async_trait]
impl FilenameParser for GrammarParser {
    fn name(&self) -> &str {
        "grammar"
    }

    fn source(&self) -> ParseSource {
        ParseSource::Rule
    }

    async fn parse(
        &self,
        filename: &str,
        _examples: &[ExampleEntry],
    ) -> Result<ParsedFilename, ParseFailure> {
        grammar::parse_filename(filename)
            .map(|parsed| ParsedFilename {
                fields: parsed.fields,
                notes: parsed.notes,
            })
            .ok_or(ParseFailure::GrammarMismatch)
    }
}

/// Result of running the whole chain; always usable as a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainOutcome {
    pub fields: Fields,
    pub notes: String,
    pub source: ParseSource,
    pub strategy: Option<String>,
}

impl ChainOutcome {
    pub fn is_degraded(&self) -> bool {
        self.strategy.is_none()
    }
}

/// Priority-ordered parser strategies; the first success wins.
pub struct ParserChain {
    strategies: Vec<Arc<dyn FilenameParser>>,
}

impl ParserChain {
    pub fn new(strategies: Vec<Arc<dyn FilenameParser>>) -> Self {
        Self { strategies }
    }

    /// Grammar first, then the primary model, then the cheaper fallback model.
    pub fn standard(llm: SharedLlmClient, config: &LlmConfig) -> Self {
        Self::new(vec![
            Arc::new(GrammarParser),
            Arc::new(CompletionParser::new(
                llm.clone(),
                config.primary_model.clone(),
                config.max_tokens,
            )),
            Arc::new(CompletionParser::new(
                llm,
                config.fallback_model.clone(),
                config.max_tokens,
            )),
        ])
    }

    pub async fn resolve(&self, filename: &str, examples: &[ExampleEntry]) -> ChainOutcome {
        let mut failures = Vec::new();

        for strategy in &self.strategies {
            match strategy.parse(filename, examples).await {
                Ok(parsed) => {
                    debug!(filename, strategy = strategy.name(), "parsed filename");
                    return ChainOutcome {
                        fields: parsed.fields,
                        notes: parsed.notes,
                        source: strategy.source(),
                        strategy: Some(strategy.name().to_string()),
                    };
                }
                Err(failure) if failure.is_service_failure() => {
                    warn!(filename, strategy = strategy.name(), %failure, "parser failed");
                    failures.push(failure);
                }
                Err(failure) => {
                    debug!(filename, strategy = strategy.name(), %failure, "parser declined");
                }
            }
        }

        ChainOutcome {
            fields: empty_fields(),
            notes: degraded_notes(&failures),
            source: ParseSource::Model,
            strategy: None,
        }
    }
}

fn degraded_notes(failures: &[ParseFailure]) -> String {
    if failures.is_empty() {
        return "No parser produced a result.".to_string();
    }

    let reasons: Vec<String> = failures.iter().map(ToString::to_string).collect();
    format!("Model error: {}", reasons.join("; "))
}
