//! CaptionForge CLI
//!
//! Submits videos, edits their captions and runs the background workers that
//! transcribe and burn them.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;

use captionforge_lib::core::settings::{Settings, SettingsManager};

mod commands;

use commands::{
    BurnArgs, CancelArgs, ExportArgs, JobArgs, OwnerCommand, SubmitArgs, UsageArgs,
};

#[derive(Parser)]
#[command(
    name = "captionforge",
    version,
    about = "Transcribe, edit and burn captions into videos",
    after_help = "EXAMPLES:\n  \
                  captionforge migrate\n  \
                  captionforge worker\n  \
                  captionforge submit alice talk.mp4 --resolution 1080x1920\n  \
                  captionforge edit alice <JOB_ID> > captions.json\n  \
                  captionforge burn alice <JOB_ID> --captions captions.srt --format ass\n  \
                  captionforge status alice <JOB_ID>"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (defaults to the platform config directory)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    Migrate,

    /// Manage owner entitlements
    #[command(subcommand)]
    Owner(OwnerCommand),

    /// Upload a video and queue its transcription
    Submit(SubmitArgs),

    /// Open a transcribed job for editing and print its captions as JSON
    Edit(JobArgs),

    /// Submit edited captions (JSON or SRT) and queue the burn
    Burn(BurnArgs),

    /// Show a job's progress
    Status(JobArgs),

    /// List an owner's jobs
    Jobs(UsageArgs),

    /// Cancel a job
    Cancel(CancelArgs),

    /// Show an owner's processed videos per day
    Usage(UsageArgs),

    /// Show queue occupancy
    QueueStats,

    /// Run the transcription and burn workers until Ctrl-C
    Worker,

    /// Print a job's captions as SRT
    ExportSrt(ExportArgs),

    /// Print a job's captions as a styled ASS script
    ExportAss(ExportArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let manager = match &cli.config {
        Some(path) => SettingsManager::at_path(path.clone()),
        None => SettingsManager::new(SettingsManager::default_dir()),
    };
    let settings = manager.load();

    let _guard = init_logging(&settings.storage.log_dir, cli.verbose);
    tracing::debug!("Settings from {}", manager.settings_path().display());

    run(cli.command, settings).await
}

async fn run(command: Commands, settings: Settings) -> Result<()> {
    if let Commands::Migrate = command {
        return commands::migrate(&settings);
    }

    let app = captionforge_lib::AppContext::open(settings).context("Failed to open CaptionForge")?;

    match command {
        Commands::Migrate => Ok(()),
        Commands::Owner(cmd) => cmd.execute(&app),
        Commands::Submit(args) => args.execute(&app).await,
        Commands::Edit(args) => commands::edit(&app, &args),
        Commands::Burn(args) => args.execute(&app),
        Commands::Status(args) => commands::status(&app, &args),
        Commands::Jobs(args) => commands::jobs(&app, &args),
        Commands::Cancel(args) => args.execute(&app),
        Commands::Usage(args) => commands::usage(&app, &args),
        Commands::QueueStats => commands::queue_stats(&app),
        Commands::Worker => commands::worker(&app).await,
        Commands::ExportSrt(args) => commands::export_srt(&app, &args),
        Commands::ExportAss(args) => commands::export_ass(&app, &args).await,
    }
}

/// Console logs go to stderr so command output on stdout stays parseable;
/// a daily rolling file keeps the full history.
fn init_logging(log_dir: &Path, verbose: bool) -> Option<WorkerGuard> {
    use tracing_subscriber::prelude::*;

    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let (file_layer, guard) = match std::fs::create_dir_all(log_dir) {
        Ok(()) => {
            let file_appender = tracing_appender::rolling::daily(log_dir, "captionforge.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        Err(e) => {
            eprintln!("Logging to file disabled ({}): {}", log_dir.display(), e);
            (None, None)
        }
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer);

    // Ignore a subscriber installed earlier in the process
    let _ = tracing::subscriber::set_global_default(subscriber);
    guard
}
