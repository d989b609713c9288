use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use pdf_chunk_core::{CancellationToken, NormalizerKind, Pipeline, PipelineConfig, RunReport};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "report2chunks", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert every PDF in the reports folder into JSON chunk records.
    Chunk(RunArgs),
    /// Only extract text artifacts; a later `chunk --resume` picks them up.
    Extract(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Folder the document supplier fills with PDF reports.
    #[arg(long, env = "REPORTS_DIR", default_value = "dtm_reports")]
    reports_dir: PathBuf,

    /// Destination folder for chunk records.
    #[arg(long, env = "CHUNKS_DIR", default_value = "dtm_chunks")]
    chunks_dir: PathBuf,

    /// Folder for intermediate text artifacts.
    #[arg(long, env = "TEXT_DIR", default_value = "text_files")]
    text_dir: PathBuf,

    /// Do not write intermediate text artifacts.
    #[arg(long, default_value_t = false, conflicts_with = "resume")]
    no_text_artifacts: bool,

    /// Maximum characters per chunk.
    #[arg(long, env = "CHUNK_SIZE", default_value_t = 512)]
    chunk_size: usize,

    /// Characters shared by consecutive chunks.
    #[arg(long, env = "CHUNK_OVERLAP", default_value_t = 0)]
    chunk_overlap: usize,

    /// Drop chunks whose alphabetic share is below --min-alpha-ratio.
    #[arg(long, env = "KEEP_ALPHA_CHUNKS", default_value_t = true, action = ArgAction::Set)]
    keep_alpha_chunks: bool,

    #[arg(long, env = "MIN_ALPHA_RATIO", default_value_t = 0.7)]
    min_alpha_ratio: f64,

    /// Text cleanup applied before chunking: identity or whitespace.
    #[arg(long, env = "NORMALIZER", default_value = "identity")]
    normalizer: NormalizerKind,

    /// Documents processed concurrently.
    #[arg(long, env = "WORKERS", default_value_t = 1)]
    workers: usize,

    /// Give up on a single document after this many seconds.
    #[arg(long, env = "DOCUMENT_TIMEOUT_SECS")]
    document_timeout_secs: Option<u64>,

    /// Reuse text artifacts whose source PDF is unchanged.
    #[arg(long, default_value_t = false)]
    resume: bool,

    /// Report per-document progress.
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

impl RunArgs {
    fn into_config(self) -> PipelineConfig {
        PipelineConfig {
            reports_dir: self.reports_dir,
            chunks_dir: self.chunks_dir,
            text_dir: (!self.no_text_artifacts).then_some(self.text_dir),
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            keep_alpha_chunks: self.keep_alpha_chunks,
            min_alpha_ratio: self.min_alpha_ratio,
            normalizer: self.normalizer,
            workers: self.workers,
            document_timeout: self.document_timeout_secs.map(Duration::from_secs),
            resume: self.resume,
            verbose: self.verbose,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");
    let cli = Cli::parse();
    let (args, extract_only) = match cli.command {
        Command::Chunk(args) => (args, false),
        Command::Extract(args) => (args, true),
    };

    let default_level = if args.verbose { "info" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer())
        .init();

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "report2chunks boot"
    );

    let pipeline = Pipeline::new(args.into_config())?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing documents already in progress");
            on_interrupt.cancel();
        }
    });

    let report = if extract_only {
        println!("--- Extracting text from PDF reports");
        pipeline.extract_all(cancel).await?
    } else {
        println!("--- Converting PDF into chunks");
        pipeline.run(cancel).await?
    };

    for (path, kind, reason) in report.skipped() {
        warn!(path = %path.display(), kind, reason, "skipped pdf");
    }
    print_summary(&report, extract_only);

    Ok(())
}

fn print_summary(report: &RunReport, extract_only: bool) {
    println!(
        "{} of {} documents processed ({} skipped, {} cancelled) in {}s",
        report.documents_processed(),
        report.documents_total(),
        report.documents_skipped(),
        report.documents_cancelled(),
        (report.finished_at - report.started_at).num_seconds()
    );
    if !extract_only {
        println!(
            "{} chunks written, {} filtered as low quality, {} failed to write",
            report.chunks_written(),
            report.chunks_filtered(),
            report.chunks_failed()
        );
    }
    for (path, kind, reason) in report.skipped() {
        println!("  skipped {} [{kind}]: {reason}", path.display());
    }
}
