use std::collections::HashSet;

use tracing::{info, instrument, warn};

use crate::cache::{is_reserved_key, ExampleStore, ParseCache, ParseRecord, ParseSource};
use crate::drive::DriveFile;
use crate::parsing::ParserChain;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// False when nothing changed and the cache need not be saved.
    pub mutated: bool,
    pub parsed_by_rule: usize,
    pub parsed_by_model: usize,
    pub degraded: usize,
    pub refreshed: usize,
    pub unchanged: usize,
    pub promoted: usize,
    /// Records moved to a new key after the file was renamed elsewhere.
    pub retargeted: usize,
    pub skipped: usize,
}

impl ReconcileReport {
    pub fn new_records(&self) -> usize {
        self.parsed_by_rule + self.parsed_by_model + self.degraded
    }
}

/// Aligns a drive listing with the cache. Unseen names get parsed, known names
/// only get their view link refreshed, and records of files renamed outside
/// the tool follow the file to its new name. Cached parses are never redone.
pub struct BatchReconciler {
    chain: ParserChain,
}

impl BatchReconciler {
    pub fn new(chain: ParserChain) -> Self {
        Self { chain }
    }

    /// Process `files` in listing order. Per-file parse failures end up as
    /// degraded records; nothing here aborts the batch.
    #[instrument(skip_all, fields(files = files.len()))]
    pub async fn reconcile<F>(
        &self,
        files: &[DriveFile],
        cache: &mut ParseCache,
        view_url: F,
    ) -> ReconcileReport
    where
        F: Fn(&DriveFile) -> String,
    {
        let mut report = ReconcileReport::default();
        let listed: HashSet<&str> = files.iter().map(|file| file.name.as_str()).collect();

        for file in files {
            let url = view_url(file);

            if let Some(record) = cache.get_mut(&file.name) {
                if record.view_url == url {
                    report.unchanged += 1;
                } else {
                    record.view_url = url;
                    report.refreshed += 1;
                    report.mutated = true;
                }
                continue;
            }

            if is_reserved_key(&file.name) {
                warn!(name = %file.name, "filename collides with a reserved cache key; skipping");
                report.skipped += 1;
                continue;
            }

            // Same drive file under a name no longer listed: it was renamed
            // elsewhere, so keep its record (and any correction) under the new name.
            let stale = cache
                .keys_with_view_url(&url)
                .find(|key| !listed.contains(key.as_str()))
                .cloned();
            if let Some(old) = stale {
                if cache.rename(&old, &file.name) {
                    info!(old = %old, new = %file.name, "retargeted record after external rename");
                    report.retargeted += 1;
                    report.mutated = true;
                    continue;
                }
            }

            let examples = cache.examples().recent(ExampleStore::BATCH_CONTEXT);
            let outcome = self.chain.resolve(&file.name, &examples).await;

            if outcome.is_degraded() {
                report.degraded += 1;
            } else if outcome.source == ParseSource::Rule {
                report.parsed_by_rule += 1;
            } else {
                report.parsed_by_model += 1;
            }
            info!(
                name = %file.name,
                source = outcome.source.label(),
                degraded = outcome.is_degraded(),
                "parsed new file"
            );

            let record =
                ParseRecord::new(outcome.fields, outcome.notes, outcome.source).with_view_url(url);
            if let Err(err) = cache.put(file.name.clone(), record) {
                warn!(?err, name = %file.name, "could not store record");
                report.skipped += 1;
                continue;
            }
            report.mutated = true;

            if let Some(record) = cache.get(&file.name).cloned() {
                if cache.examples_mut().promote(&file.name, &record) {
                    report.promoted += 1;
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::anyhow;

    use super::*;
    use crate::config::LlmConfig;
    use crate::drive::drive_view_url;
    use crate::grammar::empty_fields;
    use crate::llm_client::ScriptedLlmClient;

    fn llm_config() -> LlmConfig {
        LlmConfig {
            api_key: None,
            base_url: None,
            primary_model: "gpt-4o".into(),
            fallback_model: "gpt-4o-mini".into(),
            max_tokens: 256,
            timeout_ms: 1_000,
        }
    }

    fn reconciler(llm: Arc<ScriptedLlmClient>) -> BatchReconciler {
        BatchReconciler::new(ParserChain::standard(llm, &llm_config()))
    }

    fn view(file: &DriveFile) -> String {
        drive_view_url(&file.id)
    }

    #[tokio::test]
    async fn new_standard_file_is_parsed_by_rule_and_promoted() {
        let llm = Arc::new(ScriptedLlmClient::default());
        let mut cache = ParseCache::new();
        let files = vec![DriveFile::new(
            "a1",
            "3103159_Dettol_Soap_Cool_Menthol_96X135MM_9COL.pdf",
        )];

        let report = reconciler(llm.clone())
            .reconcile(&files, &mut cache, view)
            .await;

        assert!(report.mutated);
        assert_eq!(report.parsed_by_rule, 1);
        assert_eq!(report.promoted, 1);
        let record = cache
            .get("3103159_Dettol_Soap_Cool_Menthol_96X135MM_9COL.pdf")
            .expect("record");
        assert_eq!(record.source, ParseSource::Rule);
        assert_eq!(record.view_url, drive_view_url("a1"));
        assert_eq!(cache.examples().len(), 1);
        assert!(llm.calls().is_empty());
    }

    #[tokio::test]
    async fn cached_names_only_refresh_view_url() {
        let llm = Arc::new(ScriptedLlmClient::default());
        let mut cache = ParseCache::new();
        let mut stale = ParseRecord::new(empty_fields(), "Model error: timeout", ParseSource::Model);
        stale.view_url = drive_view_url("old-id");
        cache.put("3103159_Dettol_Soap.pdf", stale).expect("put");

        let files = vec![DriveFile::new("new-id", "3103159_Dettol_Soap.pdf")];
        let engine = reconciler(llm.clone());

        let first = engine.reconcile(&files, &mut cache, view).await;
        assert!(first.mutated);
        assert_eq!(first.refreshed, 1);
        assert_eq!(first.new_records(), 0);

        let record = cache.get("3103159_Dettol_Soap.pdf").expect("record");
        assert_eq!(record.view_url, drive_view_url("new-id"));
        assert_eq!(record.fields, empty_fields());
        assert!(llm.calls().is_empty());

        let second = engine.reconcile(&files, &mut cache, view).await;
        assert!(!second.mutated);
        assert_eq!(second.unchanged, 1);
    }

    #[tokio::test]
    async fn unreachable_model_still_produces_a_record() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Err(anyhow!("connection refused")),
            Err(anyhow!("connection refused")),
        ]));
        let mut cache = ParseCache::new();
        let files = vec![
            DriveFile::new("a1", "3103159_Dettol_Soap.pdf"),
            DriveFile::new("a2", "ITM-GER-004_Germol_Soap_Lemon_174X95MM_5COL.png"),
        ];

        let report = reconciler(llm).reconcile(&files, &mut cache, view).await;

        assert_eq!(report.degraded, 1);
        assert_eq!(report.parsed_by_rule, 1);
        assert_eq!(report.promoted, 1);
        let degraded = cache.get("3103159_Dettol_Soap.pdf").expect("degraded record");
        assert_eq!(degraded.fields, empty_fields());
        assert!(degraded.notes.contains("gpt-4o:"));
        assert!(degraded.notes.contains("gpt-4o-mini:"));
        assert_eq!(cache.examples().len(), 1);
    }

    #[tokio::test]
    async fn model_parse_uses_five_most_recent_examples() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(
            r#"{"parsed": ["9", "Godrej", "Soap", "1X1MM", "2COL"], "notes": "spaces"}"#.to_string(),
        )]));
        let mut cache = ParseCache::new();
        for tag in 0..7 {
            let name = format!("{tag}_Dettol_Soap_96X135MM_9COL.pdf");
            let fields = [
                tag.to_string(),
                "Dettol".into(),
                "Soap".into(),
                "96X135MM".into(),
                "9COL".into(),
            ];
            let record = ParseRecord::new(fields, "", ParseSource::Rule);
            cache.examples_mut().promote(&name, &record);
        }

        let files = vec![DriveFile::new("z", "9 Godrej Soap 1X1MM 2COL.pdf")];
        let report = reconciler(llm.clone())
            .reconcile(&files, &mut cache, view)
            .await;
        assert_eq!(report.parsed_by_model, 1);
        assert_eq!(report.promoted, 1);

        let prompt = &llm.calls()[0].prompt;
        assert!(!prompt.contains("1_Dettol_Soap_96X135MM_9COL.pdf"));
        assert!(prompt.contains("2_Dettol_Soap_96X135MM_9COL.pdf"));
        assert!(prompt.contains("6_Dettol_Soap_96X135MM_9COL.pdf"));
    }

    #[tokio::test]
    async fn externally_renamed_file_keeps_its_record() {
        let llm = Arc::new(ScriptedLlmClient::default());
        let mut cache = ParseCache::new();
        cache
            .put(
                "other.pdf",
                ParseRecord::new(empty_fields(), "", ParseSource::Model)
                    .with_view_url(drive_view_url("f2")),
            )
            .expect("put");
        cache
            .put(
                "old.pdf",
                ParseRecord::new(empty_fields(), "", ParseSource::Model)
                    .with_view_url(drive_view_url("f1")),
            )
            .expect("put");
        cache
            .apply_correction(
                "old.pdf",
                ["X", "Y", "Z", "W", "V"].map(String::from),
                "fixed by hand",
                Some("qa".into()),
            )
            .expect("correct");

        let files = vec![
            DriveFile::new("f2", "other.pdf"),
            DriveFile::new("f1", "X_Y_Z_W_V.pdf"),
        ];
        let report = reconciler(llm.clone())
            .reconcile(&files, &mut cache, view)
            .await;

        assert!(report.mutated);
        assert_eq!(report.retargeted, 1);
        assert_eq!(report.new_records(), 0);
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains("old.pdf"));
        let record = cache.get("X_Y_Z_W_V.pdf").expect("retargeted record");
        assert_eq!(record.source, ParseSource::UserCorrected);
        assert_eq!(record.corrected_by.as_deref(), Some("qa"));
        let keys: Vec<&String> = cache.records().map(|(key, _)| key).collect();
        assert_eq!(keys, ["other.pdf", "X_Y_Z_W_V.pdf"]);
        assert!(llm.calls().is_empty());
    }

    #[tokio::test]
    async fn listed_duplicate_is_not_retargeted() {
        let llm = Arc::new(ScriptedLlmClient::default());
        let mut cache = ParseCache::new();
        let fields = ["1", "Dettol", "Soap", "96X135MM", "9COL"].map(String::from);
        cache
            .put(
                "1_Dettol_Soap_96X135MM_9COL.pdf",
                ParseRecord::new(fields, "", ParseSource::Rule).with_view_url(drive_view_url("f1")),
            )
            .expect("put");

        // Both names still listed under one id: the old key stays put and the
        // second name gets its own record.
        let files = vec![
            DriveFile::new("f1", "1_Dettol_Soap_96X135MM_9COL.pdf"),
            DriveFile::new("f1", "2_Dettol_Soap_96X135MM_9COL.pdf"),
        ];
        let report = reconciler(llm).reconcile(&files, &mut cache, view).await;

        assert_eq!(report.retargeted, 0);
        assert_eq!(report.parsed_by_rule, 1);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn reserved_names_are_skipped() {
        let llm = Arc::new(ScriptedLlmClient::default());
        let mut cache = ParseCache::new();
        let files = vec![DriveFile::new("r", "examples")];

        let report = reconciler(llm).reconcile(&files, &mut cache, view).await;
        assert_eq!(report.skipped, 1);
        assert!(!report.mutated);
        assert!(cache.is_empty());
    }
}
