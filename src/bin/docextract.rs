//! CLI binary for edgequake-extract.
//!
//! A thin shim over the library crate: stores and journal live under
//! `--data-dir`, flags map onto `PipelineConfig`, results go to stdout.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edgequake_extract::{
    parse_document, resolve_source, run_batch, DocumentId, DocumentStatus, FsByteStore,
    FsJournal, FsStatusStore, Intake, LlmCompletion, Orchestrator, PageSeparator, PdfBackend,
    PdfiumBackend, PipelineConfig, PipelineError, PipelineObserver, ResultId, RunOutcome,
    StageExecutors, StageKind,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

fn short(id: DocumentId) -> String {
    id.to_string().chars().take(8).collect()
}

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Renders one spinner for the batch and a log line per stage event.
/// Runs complete out of order when `--concurrency` > 1.
struct CliObserver {
    bar: ProgressBar,
    stage_started: Mutex<HashMap<(DocumentId, StageKind), Instant>>,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl CliObserver {
    fn new(total: usize) -> Arc<Self> {
        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Extracting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            stage_started: Mutex::new(HashMap::new()),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        })
    }

    fn elapsed(&self, doc: DocumentId, stage: StageKind) -> f64 {
        self.stage_started
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(doc, stage))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
        let completed = self.completed.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        let mark = if failed == 0 { green("✔") } else { cyan("⚠") };
        eprintln!(
            "{} {} completed  {} failed",
            mark,
            bold(&completed.to_string()),
            red(&failed.to_string())
        );
    }
}

impl PipelineObserver for CliObserver {
    fn on_run_start(&self, doc: DocumentId, _result_id: ResultId, resumed: bool) {
        let verb = if resumed { "Resuming" } else { "Starting" };
        self.bar
            .println(format!("{} {} {}", cyan("◆"), verb, bold(&short(doc))));
    }

    fn on_stage_start(&self, doc: DocumentId, stage: StageKind, _attempt: u32) {
        self.stage_started
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((doc, stage), Instant::now());
        self.bar.set_message(format!("{} {stage}", short(doc)));
    }

    fn on_stage_retry(&self, doc: DocumentId, stage: StageKind, attempt: u32, error: &str) {
        let msg: String = error.chars().take(80).collect();
        self.bar.println(format!(
            "  {} {}  {:<8} attempt {}  {}",
            cyan("↻"),
            short(doc),
            stage,
            attempt,
            dim(&msg)
        ));
    }

    fn on_stage_complete(&self, doc: DocumentId, stage: StageKind) {
        let secs = self.elapsed(doc, stage);
        self.bar.println(format!(
            "  {} {}  {:<8} {}",
            green("✓"),
            short(doc),
            stage,
            dim(&format!("{secs:.1}s"))
        ));
    }

    fn on_run_complete(&self, outcome: &RunOutcome) {
        match outcome.status {
            DocumentStatus::Completed => self.completed.fetch_add(1, Ordering::SeqCst),
            _ => self.failed.fetch_add(1, Ordering::SeqCst),
        };
        self.bar.inc(1);
    }

    fn on_run_error(&self, doc: DocumentId, error: &str) {
        let msg: String = error.chars().take(80).collect();
        self.bar
            .println(format!("  {} {}  {}", red("✗"), short(doc), red(&msg)));
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.bar.inc(1);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Submit and process a contract in one go
  docextract run contract.pdf

  # Submit several files, process later
  docextract submit a.pdf b.pdf https://example.com/nda.pdf
  docextract resume <DOCUMENT_ID> <DOCUMENT_ID> --concurrency 4

  # Poll a document
  docextract status <DOCUMENT_ID> --json

  # Check what the parser sees (no API key needed)
  docextract inspect contract.pdf

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  EXTRACT_DATA_DIR        Where stores and the run journal live (default ./data)
  EXTRACT_MAX_PAGES       Page ceiling (default 100)
  EXTRACT_MAX_FILE_MB     Size ceiling in MiB (default 25)
  PDFIUM_LIB_PATH         Path to libpdfium
"#;

/// Extract structured contract data from PDFs with a durable pipeline.
#[derive(Parser, Debug)]
#[command(
    name = "docextract",
    version,
    about = "Extract structured contract data from PDFs with a durable pipeline",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding uploads, results, status rows and the run journal.
    #[arg(long, global = true, env = "EXTRACT_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// LLM model ID (e.g. gpt-4o-mini, claude-3-5-haiku).
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Pipelines run at once by `run` and `resume`.
    #[arg(short, long, global = true, env = "EXTRACT_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Page separator in the stored text: blank, formfeed, marker, or custom string.
    #[arg(long, global = true, env = "EXTRACT_SEPARATOR", default_value = "blank")]
    separator: String,

    /// Let the parse stage retry corrupt-PDF errors instead of failing fast.
    #[arg(long, global = true)]
    retry_parse_errors: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, global = true, env = "EXTRACT_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Output JSON instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "EXTRACT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "EXTRACT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "EXTRACT_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store files or URLs as pending documents and print their ids.
    Submit { inputs: Vec<String> },
    /// Submit, then run the pipeline for each input.
    Run { inputs: Vec<String> },
    /// Start or resume the pipeline for existing document ids.
    Resume { ids: Vec<DocumentId> },
    /// Show a document's status and, once completed, its result.
    Status { id: DocumentId },
    /// Parse a local PDF and report what the parser sees.
    Inspect { input: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli)?;
    let bytes = Arc::new(FsByteStore::new(&cli.data_dir));
    let status = Arc::new(FsStatusStore::new(&cli.data_dir));
    let intake = Intake::new(bytes.clone(), status.clone(), &config.uploads_bucket);

    match &cli.command {
        Command::Submit { inputs } => {
            for id in submit_all(&intake, inputs, &cli).await? {
                println!("{id}");
            }
        }
        Command::Status { id } => {
            let report = intake.status(*id).await.context("Failed to read status")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Document:  {}", report.document_id);
                println!("File:      {}", report.filename);
                println!("Status:    {}", report.status);
                if let Some(p) = report.page_count {
                    println!("Pages:     {p}");
                }
                if let Some(ref e) = report.error_message {
                    println!("Error:     {e}");
                }
                if let Some(ref r) = report.result {
                    println!("Result:    {} ({})", r.id, r.model_used);
                    println!("Artifact:  {}", r.artifact_location);
                    println!("{}", serde_json::to_string_pretty(&r.structured_payload)?);
                }
            }
        }
        Command::Inspect { input } => {
            let src = resolve_source(input, cli.download_timeout).await?;
            let backend = PdfiumBackend::new()?;
            let info = backend.inspect(&src.bytes);
            let parsed = parse_document(&src.bytes, &config.parser, &backend);
            if cli.json {
                let value = serde_json::json!({
                    "file": src.filename,
                    "size_bytes": src.bytes.len(),
                    "page_count": info.as_ref().ok().map(|i| i.page_count),
                    "encrypted": info.as_ref().ok().map(|i| i.encrypted),
                    "text_chars": parsed.as_ref().ok().map(|p| p.text.chars().count()),
                    "error": parsed.as_ref().err().map(|e| e.to_string()),
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("File:         {}", src.filename);
                println!("Size:         {} bytes", src.bytes.len());
                if let Ok(i) = &info {
                    println!("Pages:        {}", i.page_count);
                    println!("Encrypted:    {}", i.encrypted);
                }
                match &parsed {
                    Ok(p) => println!("Text:         {} chars", p.text.chars().count()),
                    Err(e) => println!("Rejected:     {e}"),
                }
            }
        }
        Command::Run { inputs } => {
            let ids = submit_all(&intake, inputs, &cli).await?;
            let orchestrator = build_orchestrator(&config, bytes, status, &cli.data_dir)?;
            process(&orchestrator, &ids, &cli).await?;
        }
        Command::Resume { ids } => {
            let orchestrator = build_orchestrator(&config, bytes, status, &cli.data_dir)?;
            process(&orchestrator, ids, &cli).await?;
        }
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`, on top of `EXTRACT_*` env overrides.
fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .apply_env(|key| std::env::var(key).ok())
        .context("Invalid environment configuration")?
        .concurrency(cli.concurrency)
        .page_separator(parse_separator(&cli.separator))
        .download_timeout_secs(cli.download_timeout)
        .retry_parse_errors(cli.retry_parse_errors);
    if let Some(ref m) = cli.model {
        builder = builder.model(m);
    }
    if let Some(ref p) = cli.provider {
        builder = builder.provider_name(p);
    }
    builder.build().context("Invalid configuration")
}

fn build_orchestrator(
    config: &PipelineConfig,
    bytes: Arc<FsByteStore>,
    status: Arc<FsStatusStore>,
    data_dir: &std::path::Path,
) -> Result<Orchestrator> {
    let pdf = PdfiumBackend::new()?;
    let completion = LlmCompletion::from_config(config)?;
    let stages = StageExecutors::new(
        config,
        bytes,
        status,
        Arc::new(pdf),
        Arc::new(completion),
    );
    Ok(Orchestrator::new(
        Arc::new(stages),
        Arc::new(FsJournal::new(data_dir)),
        config.policies.clone(),
    ))
}

async fn submit_all(intake: &Intake, inputs: &[String], cli: &Cli) -> Result<Vec<DocumentId>> {
    let mut ids = Vec::with_capacity(inputs.len());
    for input in inputs {
        let src = resolve_source(input, cli.download_timeout)
            .await
            .with_context(|| format!("Failed to read '{input}'"))?;
        let doc = intake
            .submit(src.bytes, src.filename)
            .await
            .context("Failed to submit document")?;
        if !cli.quiet && !cli.json {
            eprintln!("{} {} → {}", cyan("◆"), input, bold(&doc.id.to_string()));
        }
        ids.push(doc.id);
    }
    Ok(ids)
}

async fn process(orchestrator: &Orchestrator, ids: &[DocumentId], cli: &Cli) -> Result<()> {
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let observer = show_progress.then(|| CliObserver::new(ids.len()));
    let orchestrator = match &observer {
        Some(obs) => orchestrator
            .clone()
            .with_observer(obs.clone() as Arc<dyn PipelineObserver>),
        None => orchestrator.clone(),
    };

    let results = run_batch(&orchestrator, ids, cli.concurrency).await;
    if let Some(obs) = &observer {
        obs.finish();
    }

    let mut aborted = 0usize;
    for (id, result) in &results {
        match result {
            Ok(outcome) if cli.json => println!("{}", serde_json::to_string(outcome)?),
            Ok(outcome) => match (&outcome.result_id, &outcome.error_message) {
                (Some(rid), _) => println!("{id}  {}  result {rid}", green("completed")),
                (None, Some(msg)) => println!("{id}  {}  {msg}", red("failed")),
                (None, None) => println!("{id}  {}", outcome.status),
            },
            Err(e) => {
                aborted += 1;
                if cli.json {
                    let value = serde_json::json!({
                        "document_id": id,
                        "error": e.to_string(),
                        "resumable": !matches!(e, PipelineError::AlreadyRunning(_)),
                    });
                    println!("{value}");
                } else {
                    println!("{id}  {}  {}", red("error"), e);
                }
            }
        }
    }

    if aborted > 0 {
        anyhow::bail!("{aborted} run(s) aborted; retry with `docextract resume <ID>`");
    }
    Ok(())
}

/// Parse `--separator` string into `PageSeparator`.
fn parse_separator(s: &str) -> PageSeparator {
    match s.to_lowercase().as_str() {
        "blank" | "none" => PageSeparator::BlankLine,
        "formfeed" | "ff" => PageSeparator::FormFeed,
        "marker" => PageSeparator::Marker,
        _ => PageSeparator::Custom(s.to_string()),
    }
}
