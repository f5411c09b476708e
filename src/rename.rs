use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use tracing::{debug, info, instrument, warn};

use crate::cache::{write_atomic, ParseCache, ParseRecord, RenamePlanEntry};
use crate::drive::{DriveClient, DriveFile};
use crate::grammar::{split_extension, target_filename, DELIMITER};

/// Renames planned for one listing. Every listed file is resolved to a cached
/// record by its current name or through the target-name index, so files an
/// earlier run already renamed are recognised as canonical.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RenamePlan {
    pub instructions: Vec<RenamePlanEntry>,
    /// Files whose name already matches their record.
    pub already_canonical: usize,
    /// Listed names with no cached record under either lookup.
    pub unmatched: Vec<String>,
    /// Listed names whose record still has empty fields.
    pub incomplete: Vec<String>,
}

impl RenamePlan {
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

/// Extension of `name` as filed under `record`. A name that already starts
/// with the joined fields keeps whatever follows them, so fields containing a
/// dot are never mistaken for an extension.
fn extension_for<'a>(name: &'a str, record: &ParseRecord) -> &'a str {
    let stem = record.fields.join(DELIMITER);
    match name.strip_prefix(stem.as_str()) {
        Some(rest) if rest.is_empty() || rest.starts_with('.') => rest,
        _ => split_extension(name).1,
    }
}

/// Canonical name a record would be filed under, keeping `name`'s extension.
pub fn canonical_name(name: &str, record: &ParseRecord) -> String {
    target_filename(&record.fields, extension_for(name, record))
}

/// Target name → cache key, built once before any file is looked at. When two
/// records share a target the earlier one in cache order keeps the slot.
fn target_index(cache: &ParseCache) -> HashMap<String, String> {
    let mut index = HashMap::new();
    for (key, record) in cache.records() {
        if !record.is_complete() {
            continue;
        }
        index
            .entry(canonical_name(key, record))
            .or_insert_with(|| key.clone());
    }
    index
}

#[instrument(skip_all, fields(files = files.len()))]
pub fn plan_renames(files: &[DriveFile], cache: &ParseCache) -> RenamePlan {
    let index = target_index(cache);
    let mut plan = RenamePlan::default();

    for file in files {
        let record = cache.get(&file.name).or_else(|| {
            index
                .get(&file.name)
                .and_then(|key| cache.get(key.as_str()))
        });

        let Some(record) = record else {
            debug!(name = %file.name, "no cached record; leaving as is");
            plan.unmatched.push(file.name.clone());
            continue;
        };

        if !record.is_complete() {
            debug!(name = %file.name, "record has empty fields; not renaming");
            plan.incomplete.push(file.name.clone());
            continue;
        }

        let target = canonical_name(&file.name, record);
        if target == file.name {
            plan.already_canonical += 1;
            continue;
        }

        plan.instructions.push(RenamePlanEntry {
            file_id: file.id.clone(),
            old_name: file.name.clone(),
            new_name: target,
        });
    }

    plan
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RenameOutcome {
    pub applied: Vec<RenamePlanEntry>,
    pub failed: Vec<(RenamePlanEntry, String)>,
    /// Applied renames whose cache record moved to the new key.
    pub cache_moves: usize,
}

/// Execute `plan` against the drive. A failed rename is recorded and skipped;
/// the cache's rename log is replaced with this run's successes.
pub async fn apply_plan(
    drive: &dyn DriveClient,
    cache: &mut ParseCache,
    plan: &RenamePlan,
) -> RenameOutcome {
    let mut outcome = RenameOutcome::default();

    for entry in &plan.instructions {
        match drive.rename(&entry.file_id, &entry.new_name).await {
            Ok(()) => {
                info!(old = %entry.old_name, new = %entry.new_name, "renamed");
                if cache.rename(&entry.old_name, &entry.new_name) {
                    outcome.cache_moves += 1;
                }
                outcome.applied.push(entry.clone());
            }
            Err(err) => {
                warn!(?err, old = %entry.old_name, "drive rename failed");
                outcome.failed.push((entry.clone(), format!("{err:#}")));
            }
        }
    }

    cache.replace_rename_log(outcome.applied.clone());
    outcome
}

/// Append `entries` to the JSON array at `path`, creating it if needed.
/// Returns the total number of entries now on record.
pub fn append_audit_log(path: &Path, entries: &[RenamePlanEntry]) -> anyhow::Result<usize> {
    let mut log: Vec<RenamePlanEntry> = if path.exists() {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read rename log {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Rename log {} is not a JSON list", path.display()))?
    } else {
        Vec::new()
    };

    if entries.is_empty() {
        return Ok(log.len());
    }

    log.extend_from_slice(entries);
    let content = serde_json::to_string_pretty(&log).context("Failed to serialize rename log")?;
    write_atomic(path, &content)
        .with_context(|| format!("Failed to write rename log {}", path.display()))?;
    Ok(log.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ParseSource;
    use crate::drive::mock::MemoryDrive;
    use crate::grammar::empty_fields;

    fn record(fields: [&str; 5]) -> ParseRecord {
        ParseRecord::new(fields.map(String::from), "", ParseSource::Model)
    }

    fn cache_with(entries: Vec<(&str, ParseRecord)>) -> ParseCache {
        let mut cache = ParseCache::new();
        for (key, record) in entries {
            cache.put(key, record).expect("put");
        }
        cache
    }

    #[test]
    fn plans_canonical_name_from_fields() {
        let cache = cache_with(vec![("old.pdf", record(["X", "Y", "Z", "W", "V"]))]);
        let files = vec![DriveFile::new("f1", "old.pdf")];

        let plan = plan_renames(&files, &cache);
        assert_eq!(
            plan.instructions,
            vec![RenamePlanEntry {
                file_id: "f1".into(),
                old_name: "old.pdf".into(),
                new_name: "X_Y_Z_W_V.pdf".into(),
            }]
        );
    }

    #[tokio::test]
    async fn second_run_renames_nothing() {
        let mut cache = cache_with(vec![("old.pdf", record(["X", "Y", "Z", "W", "V"]))]);
        let drive = MemoryDrive::with_files(vec![DriveFile::new("f1", "old.pdf")]);

        let first = plan_renames(&drive.files(), &cache);
        let outcome = apply_plan(&drive, &mut cache, &first).await;
        assert_eq!(outcome.applied.len(), 1);
        assert_eq!(outcome.cache_moves, 1);
        assert!(cache.contains("X_Y_Z_W_V.pdf"));
        assert!(!cache.contains("old.pdf"));
        assert_eq!(cache.rename_log(), outcome.applied.as_slice());

        let second = plan_renames(&drive.files(), &cache);
        assert!(second.is_empty());
        assert_eq!(second.already_canonical, 1);
    }

    #[tokio::test]
    async fn dotted_fields_without_extension_stay_canonical() {
        let mut cache = cache_with(vec![(
            "legacy-spec",
            record(["1", "Dettol", "Soap", "96.5X135MM", "9COL"]),
        )]);
        let drive = MemoryDrive::with_files(vec![DriveFile::new("f1", "legacy-spec")]);

        let first = plan_renames(&drive.files(), &cache);
        assert_eq!(first.instructions.len(), 1);
        assert_eq!(first.instructions[0].new_name, "1_Dettol_Soap_96.5X135MM_9COL");
        apply_plan(&drive, &mut cache, &first).await;

        let second = plan_renames(&drive.files(), &cache);
        assert!(second.is_empty());
        assert_eq!(second.already_canonical, 1);
    }

    #[test]
    fn dotted_fields_keep_real_extension() {
        let cache = cache_with(vec![(
            "legacy.pdf",
            record(["1", "Dettol", "Soap", "96.5X135MM", "9COL"]),
        )]);
        let files = vec![DriveFile::new("f1", "1_Dettol_Soap_96.5X135MM_9COL.pdf")];

        let plan = plan_renames(&files, &cache);
        assert!(plan.is_empty());
        assert_eq!(plan.already_canonical, 1);
    }

    #[test]
    fn out_of_band_rename_resolves_through_target_index() {
        let cache = cache_with(vec![("old.pdf", record(["X", "Y", "Z", "W", "V"]))]);
        let files = vec![DriveFile::new("f1", "X_Y_Z_W_V.pdf")];

        let plan = plan_renames(&files, &cache);
        assert!(plan.is_empty());
        assert_eq!(plan.already_canonical, 1);
        assert!(plan.unmatched.is_empty());
    }

    #[test]
    fn drive_extension_wins_over_cache_key_extension() {
        let cache = cache_with(vec![("old.pdf", record(["X", "Y", "Z", "W", "V"]))]);
        let files = vec![DriveFile::new("f1", "old.pdf"), DriveFile::new("f2", "X_Y_Z_W_V.pdf")];
        let plan = plan_renames(&files, &cache);
        assert_eq!(plan.instructions.len(), 1);

        let cache = cache_with(vec![("old.png", record(["X", "Y", "Z", "W", "V"]))]);
        let plan = plan_renames(&[DriveFile::new("f1", "old.png")], &cache);
        assert_eq!(plan.instructions[0].new_name, "X_Y_Z_W_V.png");
    }

    #[test]
    fn unmatched_and_incomplete_files_are_left_alone() {
        let cache = cache_with(vec![(
            "3103159_Dettol_Soap.pdf",
            ParseRecord::new(empty_fields(), "Model error", ParseSource::Model),
        )]);
        let files = vec![
            DriveFile::new("f1", "3103159_Dettol_Soap.pdf"),
            DriveFile::new("f2", "stranger.pdf"),
        ];

        let plan = plan_renames(&files, &cache);
        assert!(plan.is_empty());
        assert_eq!(plan.incomplete, vec!["3103159_Dettol_Soap.pdf".to_string()]);
        assert_eq!(plan.unmatched, vec!["stranger.pdf".to_string()]);
    }

    #[test]
    fn current_name_lookup_beats_target_index() {
        // "A_B_C_D_E.pdf" is both a cache key of its own and the target of
        // "old.pdf"; the direct key is used.
        let cache = cache_with(vec![
            ("old.pdf", record(["A", "B", "C", "D", "E"])),
            ("A_B_C_D_E.pdf", record(["P", "Q", "R", "S", "T"])),
        ]);
        let files = vec![DriveFile::new("f1", "A_B_C_D_E.pdf")];

        let plan = plan_renames(&files, &cache);
        assert_eq!(plan.instructions.len(), 1);
        assert_eq!(plan.instructions[0].new_name, "P_Q_R_S_T.pdf");
    }

    #[test]
    fn shared_target_keeps_first_record_in_index() {
        let cache = cache_with(vec![
            ("first.pdf", record(["A", "B", "C", "D", "E"])),
            ("second.pdf", record(["A", "B", "C", "D", "E"])),
        ]);
        let index = target_index(&cache);
        assert_eq!(index.get("A_B_C_D_E.pdf").map(String::as_str), Some("first.pdf"));

        let files = vec![
            DriveFile::new("f1", "first.pdf"),
            DriveFile::new("f2", "second.pdf"),
        ];
        let plan = plan_renames(&files, &cache);
        assert_eq!(plan.instructions.len(), 2);
    }

    #[tokio::test]
    async fn failed_rename_does_not_stop_the_run() {
        let mut cache = cache_with(vec![
            ("a.pdf", record(["1", "B", "C", "D", "E"])),
            ("b.pdf", record(["2", "B", "C", "D", "E"])),
        ]);
        let drive = MemoryDrive::with_files(vec![
            DriveFile::new("fa", "a.pdf"),
            DriveFile::new("fb", "b.pdf"),
        ])
        .failing_renames_for("fa");

        let plan = plan_renames(&drive.files(), &cache);
        let outcome = apply_plan(&drive, &mut cache, &plan).await;

        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0.old_name, "a.pdf");
        assert_eq!(outcome.applied.len(), 1);
        assert!(cache.contains("a.pdf"));
        assert!(cache.contains("2_B_C_D_E.pdf"));
        assert_eq!(drive.rename_calls().len(), 2);
    }

    #[tokio::test]
    async fn existing_target_key_is_not_overwritten() {
        let mut cache = cache_with(vec![
            ("old.pdf", record(["X", "Y", "Z", "W", "V"])),
            ("X_Y_Z_W_V.pdf", record(["X", "Y", "Z", "W", "V"])),
        ]);
        let drive = MemoryDrive::with_files(vec![DriveFile::new("f1", "old.pdf")]);

        let plan = plan_renames(&drive.files(), &cache);
        let outcome = apply_plan(&drive, &mut cache, &plan).await;
        assert_eq!(outcome.applied.len(), 1);
        assert_eq!(outcome.cache_moves, 0);
        assert!(cache.contains("old.pdf"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn audit_log_appends_across_runs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("drive_rename_log.json");
        let entry = |n: &str| RenamePlanEntry {
            file_id: n.into(),
            old_name: format!("{n}.pdf"),
            new_name: format!("{n}_new.pdf"),
        };

        assert_eq!(append_audit_log(&path, &[entry("a")]).expect("first"), 1);
        assert_eq!(append_audit_log(&path, &[]).expect("empty"), 1);
        assert_eq!(append_audit_log(&path, &[entry("b"), entry("c")]).expect("second"), 3);

        let saved: Vec<RenamePlanEntry> =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("parse");
        assert_eq!(saved.iter().map(|e| e.file_id.as_str()).collect::<Vec<_>>(), ["a", "b", "c"]);
    }

    #[test]
    fn corrupt_audit_log_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("drive_rename_log.json");
        fs::write(&path, "{not json").expect("write");
        assert!(append_audit_log(&path, &[]).is_err());
    }
}
