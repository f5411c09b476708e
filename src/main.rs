mod cache;
mod config;
mod drive;
mod grammar;
mod llm_client;
mod parsing;
mod query;
mod reconcile;
mod rename;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use cache::{ParseCache, TableRow};
use clap::{Parser, Subcommand};
use config::AppConfig;
use drive::{
    DriveClient, GoogleApi, GoogleDriveClient, GoogleSheetsClient, LocalFolderDrive,
    SharedDriveClient, SharedSheetSink,
};
use grammar::{Fields, FIELD_LABELS};
use llm_client::{build_llm_client, OfflineLlmClient, SharedLlmClient};
use parsing::{prompt::render_examples, ParserChain, QueryExplainer};
use query::{answer_query, QueryAnswer};
use reconcile::{BatchReconciler, ReconcileReport};
use rename::{append_audit_log, apply_plan, plan_renames};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "specbot",
    about = "Parse, cache and rename packaging-spec files from their filenames"
)]
struct Cli {
    /// Cache file to use instead of SPECBOT_CACHE_FILE.
    #[arg(long, global = true)]
    cache: Option<PathBuf>,

    /// Optional subcommand; if omitted the CLI enters interactive query mode.
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse every new file in the source folder and sync the table to the sheet.
    Import {
        /// Drive folder id (defaults to SOURCE_FOLDER_ID).
        #[arg(long)]
        folder: Option<String>,
        /// Treat a local directory as the source folder (no sheet sync).
        #[arg(long, conflicts_with = "folder")]
        local: Option<PathBuf>,
        /// Skip the Google Sheet update.
        #[arg(long, default_value_t = false)]
        no_sync: bool,
        /// Never call the completion service; unparsable names are stored degraded.
        #[arg(long, default_value_t = false)]
        offline: bool,
    },
    /// Rename files in the source folder to their canonical names.
    Rename {
        /// Drive folder id (defaults to SOURCE_FOLDER_ID).
        #[arg(long)]
        folder: Option<String>,
        /// Treat a local directory as the source folder.
        #[arg(long, conflicts_with = "folder")]
        local: Option<PathBuf>,
        /// Print the plan without renaming anything.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Audit log to append to instead of SPECBOT_RENAME_LOG.
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Filter the table by keywords, or ask the model about it.
    Query {
        /// Query text, e.g. "dettol above 8col".
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Correct the cached parse of one file.
    Edit {
        filename: String,
        /// All five fields, in order.
        #[arg(
            long,
            num_args = 5,
            value_names = ["ITEM_CODE", "BRAND", "PRODUCT_VARIANT", "DIMENSIONS", "COLOURS"]
        )]
        fields: Option<Vec<String>>,
        #[arg(long)]
        notes: Option<String>,
        /// Who made the correction.
        #[arg(long)]
        by: Option<String>,
    },
    /// Print the cached table, or one record in full.
    Show { filename: Option<String> },
    /// List the few-shot examples currently kept for the model.
    Examples,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    let config = AppConfig::from_env();
    let cache_path = cli
        .cache
        .clone()
        .unwrap_or_else(|| config.storage.cache_file.clone());

    let Some(command) = cli.command else {
        let explainer = query_explainer(&config)?;
        return run_repl(&cache_path, &explainer).await;
    };

    match command {
        Commands::Import {
            folder,
            local,
            no_sync,
            offline,
        } => {
            let (drive, folder) = open_drive(&config, folder, local.clone())?;
            let llm: SharedLlmClient = if offline {
                OfflineLlmClient::shared()
            } else {
                build_llm_client(&config.llm, true).context("LLM client initialization failed")?
            };
            let reconciler = BatchReconciler::new(ParserChain::standard(llm, &config.llm));

            let sheet = if no_sync || local.is_some() {
                None
            } else {
                sheet_target(&config)?
            };
            run_import(
                drive.as_ref(),
                &folder,
                &reconciler,
                &cache_path,
                sheet.as_ref(),
            )
            .await?;
        }
        Commands::Rename {
            folder,
            local,
            dry_run,
            log,
        } => {
            let (drive, folder) = open_drive(&config, folder, local)?;
            let log_path = log.unwrap_or_else(|| config.storage.rename_log_file.clone());
            run_rename(drive.as_ref(), &folder, &cache_path, &log_path, dry_run).await?;
        }
        Commands::Query { text } => {
            let explainer = query_explainer(&config)?;
            run_query(&cache_path, &explainer, &text.join(" ")).await?;
        }
        Commands::Edit {
            filename,
            fields,
            notes,
            by,
        } => {
            run_edit(&cache_path, &filename, fields, notes, by)?;
        }
        Commands::Show { filename } => run_show(&cache_path, filename.as_deref())?,
        Commands::Examples => run_examples(&cache_path)?,
    }

    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}

/// A local directory when `--local` is given, otherwise the Drive folder from
/// the flag or the environment.
fn open_drive(
    config: &AppConfig,
    folder: Option<String>,
    local: Option<PathBuf>,
) -> anyhow::Result<(SharedDriveClient, String)> {
    if let Some(dir) = local {
        info!(dir = %dir.display(), "using local folder as drive");
        let drive: SharedDriveClient = Arc::new(LocalFolderDrive::new(dir));
        return Ok((drive, ".".to_string()));
    }

    let folder = folder
        .or_else(|| config.google.source_folder_id.clone())
        .context("Set SOURCE_FOLDER_ID or pass --folder / --local")?;
    let api = GoogleApi::new(&config.google)?;
    let drive: SharedDriveClient = Arc::new(GoogleDriveClient::new(api));
    Ok((drive, folder))
}

struct SheetTarget {
    sink: SharedSheetSink,
    spreadsheet_id: String,
    tab: String,
}

fn sheet_target(config: &AppConfig) -> anyhow::Result<Option<SheetTarget>> {
    let Some(spreadsheet_id) = config.google.sheet_id.clone() else {
        warn!("GOOGLE_SHEET_ID not set; skipping sheet sync");
        return Ok(None);
    };
    let api = GoogleApi::new(&config.google)?;
    Ok(Some(SheetTarget {
        sink: Arc::new(GoogleSheetsClient::new(api)),
        spreadsheet_id,
        tab: config.google.sheet_tab.clone(),
    }))
}

fn query_explainer(config: &AppConfig) -> anyhow::Result<QueryExplainer> {
    let llm = build_llm_client(&config.llm, true).context("LLM client initialization failed")?;
    Ok(QueryExplainer::new(
        llm,
        config.llm.primary_model.clone(),
        config.llm.max_tokens,
    ))
}

async fn run_import(
    drive: &dyn DriveClient,
    folder: &str,
    reconciler: &BatchReconciler,
    cache_path: &Path,
    sheet: Option<&SheetTarget>,
) -> anyhow::Result<ReconcileReport> {
    let files = drive
        .list(folder)
        .await
        .context("Failed to list source folder")?;
    println!("Found {} files in folder.", files.len());

    let mut cache = ParseCache::load(cache_path)?;
    let report = reconciler
        .reconcile(&files, &mut cache, |file| drive.view_url(file))
        .await;

    if report.mutated {
        cache.save(cache_path)?;
        println!(
            "Cache updated: {} new ({} by rule, {} by model, {} degraded), {} links refreshed, {} retargeted after renames, {} promoted to examples.",
            report.new_records(),
            report.parsed_by_rule,
            report.parsed_by_model,
            report.degraded,
            report.refreshed,
            report.retargeted,
            report.promoted
        );
    } else {
        println!("No new files; cache unchanged.");
    }
    if report.skipped > 0 {
        println!("Skipped {} files with reserved names.", report.skipped);
    }

    if let Some(target) = sheet {
        let rows = cache.rows();
        match target
            .sink
            .write_table(&target.spreadsheet_id, &target.tab, &rows)
            .await
        {
            Ok(()) => println!("Sheet '{}' updated with {} rows.", target.tab, rows.len()),
            Err(err) => {
                error!(?err, "sheet sync failed");
                println!("Sheet sync failed: {err:#}");
            }
        }
    }

    Ok(report)
}

async fn run_rename(
    drive: &dyn DriveClient,
    folder: &str,
    cache_path: &Path,
    log_path: &Path,
    dry_run: bool,
) -> anyhow::Result<usize> {
    let files = drive
        .list(folder)
        .await
        .context("Failed to list source folder")?;
    let mut cache = ParseCache::load(cache_path)?;
    let plan = plan_renames(&files, &cache);

    println!(
        "{} to rename, {} already canonical, {} incomplete, {} not in cache.",
        plan.instructions.len(),
        plan.already_canonical,
        plan.incomplete.len(),
        plan.unmatched.len()
    );
    for name in &plan.unmatched {
        println!("  not in cache: {name}");
    }

    if dry_run {
        for entry in &plan.instructions {
            println!("  would rename: {} -> {}", entry.old_name, entry.new_name);
        }
        return Ok(0);
    }

    let outcome = apply_plan(drive, &mut cache, &plan).await;
    for entry in &outcome.applied {
        println!("  renamed: {} -> {}", entry.old_name, entry.new_name);
    }
    for (entry, reason) in &outcome.failed {
        println!("  failed: {} ({reason})", entry.old_name);
    }

    cache.save(cache_path)?;
    let total = append_audit_log(log_path, &outcome.applied)?;
    println!(
        "Renamed {} files; {} entries in {}.",
        outcome.applied.len(),
        total,
        log_path.display()
    );
    Ok(outcome.applied.len())
}

async fn run_query(
    cache_path: &Path,
    explainer: &QueryExplainer,
    text: &str,
) -> anyhow::Result<()> {
    let cache = ParseCache::load(cache_path)?;
    match answer_query(text, &cache, explainer).await {
        QueryAnswer::Rows(rows) => {
            println!("{} matching files:", rows.len());
            print!("{}", render_table(&rows));
        }
        QueryAnswer::Explanation(text) => println!("Model says:\n{text}"),
        QueryAnswer::Failed(reason) => println!("Query failed: {reason}"),
    }
    Ok(())
}

async fn run_repl(cache_path: &Path, explainer: &QueryExplainer) -> anyhow::Result<()> {
    println!("SpecBot ready. Ask about your files, or type 'exit' to quit.\n");
    let stdin = io::stdin();

    loop {
        print!("Query > ");
        io::stdout().flush()?;

        let mut buffer = String::new();
        if stdin.read_line(&mut buffer)? == 0 {
            break;
        }
        let trimmed = buffer.trim();

        if trimmed.eq_ignore_ascii_case("exit") {
            info!("User exited CLI");
            break;
        }
        if trimmed.is_empty() {
            continue;
        }

        run_query(cache_path, explainer, trimmed).await?;
    }

    Ok(())
}

fn run_edit(
    cache_path: &Path,
    filename: &str,
    fields: Option<Vec<String>>,
    notes: Option<String>,
    corrected_by: Option<String>,
) -> anyhow::Result<()> {
    if fields.is_none() && notes.is_none() {
        bail!("Nothing to change; pass --fields and/or --notes");
    }

    let mut cache = ParseCache::load(cache_path)?;
    let current = cache
        .get(filename)
        .with_context(|| format!("No cached record for '{filename}'"))?
        .clone();

    let fields: Fields = match fields {
        Some(values) => values
            .try_into()
            .map_err(|values: Vec<String>| {
                anyhow::anyhow!("Expected 5 fields, got {}", values.len())
            })?,
        None => current.fields,
    };
    let notes = notes.unwrap_or(current.notes);

    let record = cache.apply_correction(filename, fields, notes, corrected_by)?;
    println!("Updated entry for {filename}:");
    print!("{}", render_record(filename, record));
    cache.save(cache_path)
}

fn run_show(cache_path: &Path, filename: Option<&str>) -> anyhow::Result<()> {
    let cache = ParseCache::load(cache_path)?;
    match filename {
        Some(name) => {
            let record = cache
                .get(name)
                .with_context(|| format!("No cached record for '{name}'"))?;
            print!("{}", render_record(name, record));
        }
        None => {
            println!("{} files in cache.", cache.len());
            print!("{}", render_table(&cache.rows()));
        }
    }
    Ok(())
}

fn run_examples(cache_path: &Path) -> anyhow::Result<()> {
    let cache = ParseCache::load(cache_path)?;
    let examples: Vec<_> = cache.examples().iter().cloned().collect();
    println!(
        "{} of {} example slots used (oldest first):",
        examples.len(),
        cache::ExampleStore::CAPACITY
    );
    println!("{}", render_examples(&examples));
    Ok(())
}

/// Fixed-width table of the five fields plus filename.
fn render_table(rows: &[TableRow]) -> String {
    const COLUMNS: usize = 6;
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.cells().into_iter().take(COLUMNS).collect())
        .collect();

    let mut widths: Vec<usize> = TableRow::HEADERS[..COLUMNS]
        .iter()
        .map(|h| h.chars().count())
        .collect();
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |values: Vec<&str>| -> String {
        let padded: Vec<String> = values
            .iter()
            .zip(&widths)
            .map(|(value, &width)| format!("{value:<width$}"))
            .collect();
        format!("{}\n", padded.join(" | ").trim_end())
    };

    let mut out = line(TableRow::HEADERS[..COLUMNS].to_vec());
    out.push_str(&format!(
        "{}\n",
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-")
    ));
    for row in &cells {
        out.push_str(&line(row.iter().map(String::as_str).collect()));
    }
    out
}

fn render_record(filename: &str, record: &cache::ParseRecord) -> String {
    let mut out = format!("{filename}\n");
    for (label, value) in FIELD_LABELS.iter().zip(&record.fields) {
        out.push_str(&format!("  {label:<18} {value}\n"));
    }
    out.push_str(&format!("  {:<18} {}\n", "Notes", record.notes));
    out.push_str(&format!("  {:<18} {}\n", "Source", record.source.label()));
    if let Some(by) = &record.corrected_by {
        out.push_str(&format!("  {:<18} {by}\n", "Corrected by"));
    }
    if !record.view_url.is_empty() {
        out.push_str(&format!("  {:<18} {}\n", "View URL", record.view_url));
    }
    out
}
