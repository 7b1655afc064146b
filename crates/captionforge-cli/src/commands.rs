//! Subcommand arguments and handlers

use std::path::PathBuf;

use anyhow::{bail, Context as _, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use captionforge_lib::core::captions::TimedText;
use captionforge_lib::core::pipeline::{EditContent, EditRequest, SubmitOptions};
use captionforge_lib::core::render::{CaptionFormat, QualityTier};
use captionforge_lib::core::settings::Settings;
use captionforge_lib::core::store::{DailyLimit, JobStore, OwnerLimits};
use captionforge_lib::core::{AnchorPosition, Resolution};
use captionforge_lib::AppContext;

/// Rejected command-line values
#[derive(Debug, thiserror::Error)]
pub enum ArgError {
    #[error("expected a non-negative number or 'unlimited', got {0:?}")]
    Limit(String),
}

/// A limit given on the command line; `None` is unlimited
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limit(pub Option<u32>);

/// `N`, `unlimited` or `-1`
fn parse_limit(value: &str) -> Result<Limit, ArgError> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("unlimited") || trimmed == "-1" {
        return Ok(Limit(None));
    }
    trimmed
        .parse::<u32>()
        .map(|n| Limit(Some(n)))
        .map_err(|_| ArgError::Limit(value.to_string()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn anchor_from(x: Option<f64>, y: Option<f64>) -> Result<Option<AnchorPosition>> {
    if x.is_none() && y.is_none() {
        return Ok(None);
    }
    let default = AnchorPosition::default();
    let anchor = AnchorPosition::new(
        x.unwrap_or(default.x_percent),
        y.unwrap_or(default.y_percent),
    )?;
    Ok(Some(anchor))
}

// =============================================================================
// Shared Arguments
// =============================================================================

#[derive(Args)]
pub struct JobArgs {
    /// Owner id
    pub owner: String,
    /// Job id
    pub job: String,
}

#[derive(Args)]
pub struct UsageArgs {
    /// Owner id
    pub owner: String,
}

#[derive(Args)]
pub struct ExportArgs {
    #[command(flatten)]
    pub job: JobArgs,

    /// Write to a file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

/// Caption anchor in percent of the frame
#[derive(Args)]
pub struct AnchorArgs {
    /// Horizontal centre (0-100)
    #[arg(long)]
    pub anchor_x: Option<f64>,
    /// Distance from the bottom edge (0-100)
    #[arg(long)]
    pub anchor_y: Option<f64>,
}

// =============================================================================
// migrate
// =============================================================================

pub fn migrate(settings: &Settings) -> Result<()> {
    let path = &settings.storage.database_path;
    let store = JobStore::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    let version = store.migrate()?;
    println!("Database {} at schema version {}", path.display(), version);
    Ok(())
}

// =============================================================================
// owner
// =============================================================================

#[derive(Subcommand)]
pub enum OwnerCommand {
    /// Create or update an owner's limits
    Set {
        /// Owner id
        owner: String,

        /// Maximum source duration in minutes, or 'unlimited'
        #[arg(long, value_parser = parse_limit, allow_negative_numbers = true)]
        max_minutes: Option<Limit>,

        /// Uploads allowed per day, or 'unlimited'
        #[arg(long, value_parser = parse_limit, allow_negative_numbers = true)]
        daily_limit: Option<Limit>,
    },

    /// Show an owner's limits and today's tries
    Show {
        /// Owner id
        owner: String,
    },
}

impl OwnerCommand {
    pub fn execute(self, app: &AppContext) -> Result<()> {
        let store = app.store();
        match self {
            Self::Set {
                owner,
                max_minutes,
                daily_limit,
            } => {
                let current = store
                    .get_owner(&owner)?
                    .map(|o| o.limits)
                    .unwrap_or(app.settings().quota.default_limits);

                let limits = OwnerLimits {
                    max_duration_minutes: max_minutes
                        .map(|Limit(m)| m)
                        .unwrap_or(current.max_duration_minutes),
                    daily_limit: match daily_limit {
                        Some(Limit(Some(n))) => DailyLimit::Limited(n),
                        Some(Limit(None)) => DailyLimit::Unlimited,
                        None => current.daily_limit,
                    },
                };
                print_json(&store.upsert_owner(&owner, &limits)?)
            }
            Self::Show { owner } => match store.get_owner(&owner)? {
                Some(owner) => print_json(&owner),
                None => bail!("Unknown owner {owner}"),
            },
        }
    }
}

// =============================================================================
// submit
// =============================================================================

#[derive(Args)]
pub struct SubmitArgs {
    /// Owner id
    pub owner: String,

    /// Video file to upload
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Name recorded for the upload (defaults to the file name)
    #[arg(long)]
    pub name: Option<String>,

    /// Output resolution: 'original' or WIDTHxHEIGHT
    #[arg(long, default_value = "original")]
    pub resolution: Resolution,

    /// Spoken language hint ('auto' to detect)
    #[arg(long)]
    pub language: Option<String>,

    /// Caption format: drawtext, srt, ass or none
    #[arg(long)]
    pub format: Option<CaptionFormat>,

    /// Quality tier: standard, high or ultra
    #[arg(long)]
    pub quality: Option<QualityTier>,

    #[command(flatten)]
    pub anchor: AnchorArgs,
}

impl SubmitArgs {
    pub async fn execute(self, app: &AppContext) -> Result<()> {
        let name = match self.name {
            Some(name) => name,
            None => self
                .file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .context("Upload path has no file name")?,
        };

        let options = SubmitOptions {
            resolution: self.resolution,
            language: self.language,
            caption_format: self.format,
            quality: self.quality,
            anchor: anchor_from(self.anchor.anchor_x, self.anchor.anchor_y)?,
        };

        let job = app
            .service()
            .submit(&self.owner, &self.file, &name, options)
            .await?;
        print_json(&job)
    }
}

// =============================================================================
// edit / burn
// =============================================================================

pub fn edit(app: &AppContext, args: &JobArgs) -> Result<()> {
    let timed_text = app.service().open_for_edit(&args.owner, &args.job)?;
    print_json(&timed_text)
}

#[derive(Args)]
pub struct BurnArgs {
    #[command(flatten)]
    pub job: JobArgs,

    /// Edited captions: a .srt file or timed-text JSON
    #[arg(long, value_name = "FILE")]
    pub captions: PathBuf,

    /// Output resolution: 'original' or WIDTHxHEIGHT
    #[arg(long)]
    pub resolution: Option<Resolution>,

    /// Caption format: drawtext, srt, ass or none
    #[arg(long)]
    pub format: Option<CaptionFormat>,

    /// Quality tier: standard, high or ultra
    #[arg(long)]
    pub quality: Option<QualityTier>,

    #[command(flatten)]
    pub anchor: AnchorArgs,
}

impl BurnArgs {
    pub fn execute(self, app: &AppContext) -> Result<()> {
        let content = std::fs::read_to_string(&self.captions)
            .with_context(|| format!("Failed to read {}", self.captions.display()))?;

        let is_srt = self
            .captions
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("srt"));
        let content = if is_srt {
            EditContent::Srt(content)
        } else {
            EditContent::TimedText(TimedText::from_json(&content)?)
        };

        let mut request = EditRequest::new(content);
        request.resolution = self.resolution;
        request.caption_format = self.format;
        request.quality = self.quality;
        request.anchor = anchor_from(self.anchor.anchor_x, self.anchor.anchor_y)?;

        let task_id = app
            .service()
            .submit_edit(&self.job.owner, &self.job.job, request)?;
        println!("{task_id}");
        Ok(())
    }
}

// =============================================================================
// status / jobs / cancel / usage
// =============================================================================

pub fn status(app: &AppContext, args: &JobArgs) -> Result<()> {
    print_json(&app.service().status(&args.owner, &args.job)?)
}

pub fn jobs(app: &AppContext, args: &UsageArgs) -> Result<()> {
    for job in app.service().jobs(&args.owner)? {
        println!(
            "{}  {:<11}  {}  {}",
            job.id,
            job.status,
            job.created_at,
            job.original_filename
        );
    }
    Ok(())
}

#[derive(Args)]
pub struct CancelArgs {
    #[command(flatten)]
    pub job: JobArgs,
}

impl CancelArgs {
    pub fn execute(self, app: &AppContext) -> Result<()> {
        let status = app.service().cancel(&self.job.owner, &self.job.job)?;
        println!("{status}");
        Ok(())
    }
}

pub fn usage(app: &AppContext, args: &UsageArgs) -> Result<()> {
    print_json(&app.service().usage_history(&args.owner)?)
}

pub fn queue_stats(app: &AppContext) -> Result<()> {
    print_json(&app.service().queue_stats()?)
}

// =============================================================================
// worker
// =============================================================================

pub async fn worker(app: &AppContext) -> Result<()> {
    let dispatcher = app.start_dispatcher()?;
    let handles = dispatcher.spawn_workers();
    tracing::info!("{} workers running, press Ctrl-C to stop", dispatcher.num_workers());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    tracing::info!("Shutting down after running tasks finish");
    dispatcher.shutdown();
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!("Worker exited abnormally: {}", e);
        }
    }
    Ok(())
}

// =============================================================================
// exports
// =============================================================================

fn write_output(output: Option<&PathBuf>, content: &str) -> Result<()> {
    match output {
        Some(path) => std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            print!("{content}");
            Ok(())
        }
    }
}

pub fn export_srt(app: &AppContext, args: &ExportArgs) -> Result<()> {
    let srt = app.service().export_srt(&args.job.owner, &args.job.job)?;
    write_output(args.output.as_ref(), &srt)
}

pub async fn export_ass(app: &AppContext, args: &ExportArgs) -> Result<()> {
    let ass = app
        .service()
        .export_ass(&args.job.owner, &args.job.job)
        .await?;
    write_output(args.output.as_ref(), &ass)
}
