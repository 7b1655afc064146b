//! Settings Persistence System
//!
//! Provides persistent service settings with:
//! - Atomic file writes (temp file + rename)
//! - Per-section defaults for partial files
//! - Normalisation of out-of-range values instead of load failures
//!
//! Storage location: {config_dir}/captionforge/settings.json

use std::fs;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::captions::LayoutOptions;
use crate::core::fs::atomic_write_json_pretty;
use crate::core::jobs::DispatcherConfig;
use crate::core::pipeline::PipelineSettings;
use crate::core::render::{CaptionFormat, CaptionStyle, QualityTier, DEFAULT_FPS, FALLBACK_FRAME};
use crate::core::store::{OwnerLimits, QuotaPolicy};
use crate::core::{CoreError, CoreResult, FrameSize};

/// Settings schema version for migration support
pub const SETTINGS_VERSION: u32 = 1;

/// Settings file name
pub const SETTINGS_FILE: &str = "settings.json";

/// Lock file name (advisory lock to prevent concurrent writers)
pub const SETTINGS_LOCK_FILE: &str = "settings.json.lock";

/// Service settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Schema version for migrations
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub storage: StorageSettings,

    /// External tools
    #[serde(default)]
    pub tools: ToolSettings,

    /// Queue workers
    #[serde(default)]
    pub workers: WorkerSettings,

    /// Caption rendering defaults
    #[serde(default)]
    pub render: RenderSettings,

    /// Usage accounting
    #[serde(default)]
    pub quota: QuotaSettings,
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            storage: StorageSettings::default(),
            tools: ToolSettings::default(),
            workers: WorkerSettings::default(),
            render: RenderSettings::default(),
            quota: QuotaSettings::default(),
        }
    }
}

impl Settings {
    /// Normalizes and clamps settings so persisted state is always valid.
    ///
    /// Tolerant: bad values are corrected rather than rejected.
    pub fn normalize(&mut self) {
        self.version = SETTINGS_VERSION;

        let defaults = StorageSettings::default();
        if self.storage.media_root.as_os_str().is_empty() {
            self.storage.media_root = defaults.media_root;
        }
        if self.storage.database_path.as_os_str().is_empty() {
            self.storage.database_path = defaults.database_path;
        }
        if self.storage.log_dir.as_os_str().is_empty() {
            self.storage.log_dir = defaults.log_dir;
        }

        self.tools.ffmpeg_path = non_empty_path(self.tools.ffmpeg_path.take());
        self.tools.ffprobe_path = non_empty_path(self.tools.ffprobe_path.take());
        self.tools.whisper_model = non_empty_path(self.tools.whisper_model.take());
        self.tools.transcriber_command = self
            .tools
            .transcriber_command
            .take()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        // 0 means "auto".
        self.workers.count = self.workers.count.min(64);
        self.workers.task_timeout_secs = self.workers.task_timeout_secs.clamp(10, 24 * 3600);
        self.workers.max_queue_size = self.workers.max_queue_size.clamp(1, 10_000);
        self.workers.poll_interval_ms = self.workers.poll_interval_ms.clamp(50, 60_000);

        self.render.fps = self.render.fps.clamp(1, 120);
        self.render.fallback_width = self.render.fallback_width.clamp(16, 7680);
        self.render.fallback_height = self.render.fallback_height.clamp(16, 7680);
        self.render.words_per_phrase = self.render.words_per_phrase.clamp(1, 12);
        self.render.max_phrases = self.render.max_phrases.clamp(1, 1000);
        self.render.style.font_scale = clamp_f64(self.render.style.font_scale, 0.01, 0.5);
        self.render.style.highlight_border = self.render.style.highlight_border.min(100);
        if self.render.style.font_name.trim().is_empty() {
            self.render.style.font_name = CaptionStyle::default().font_name;
        }
    }

    /// Worker count with "auto" resolved
    pub fn worker_count(&self) -> usize {
        match self.workers.count {
            0 => num_cpus::get().max(2),
            n => n,
        }
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.workers.task_timeout_secs)
    }

    pub fn fallback_frame(&self) -> FrameSize {
        FrameSize::new(self.render.fallback_width, self.render.fallback_height)
    }

    /// Tunables handed to the pipeline stages and service
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            task_timeout: self.task_timeout(),
            fps: self.render.fps,
            fallback_frame: self.fallback_frame(),
            layout: LayoutOptions {
                words_per_phrase: self.render.words_per_phrase,
                max_phrases: self.render.max_phrases,
            },
            style: self.render.style.clone(),
            default_format: self.render.caption_format,
            default_quality: self.render.quality,
            quota_policy: self.quota.policy,
            default_limits: self.quota.default_limits,
            total_workers: self.worker_count(),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            num_workers: self.worker_count(),
            poll_interval: Duration::from_millis(self.workers.poll_interval_ms),
        }
    }
}

fn clamp_f64(value: f64, min: f64, max: f64) -> f64 {
    if !value.is_finite() {
        return min;
    }
    value.clamp(min, max)
}

fn non_empty_path(path: Option<PathBuf>) -> Option<PathBuf> {
    path.filter(|p| !p.as_os_str().is_empty())
}

/// Application data directory, falling back to the working directory
fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("captionforge"))
        .unwrap_or_else(|| PathBuf::from(".captionforge"))
}

/// Where media and the database live
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Sources, timed-text artifacts, outputs and scratch space
    pub media_root: PathBuf,
    /// SQLite database holding jobs, owners, usage and tasks
    pub database_path: PathBuf,
    /// Directory for the daily rolling log file
    pub log_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        let base = data_dir();
        Self {
            media_root: base.join("media"),
            database_path: base.join("captionforge.db"),
            log_dir: base.join("logs"),
        }
    }
}

/// External tool locations
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolSettings {
    /// Explicit ffmpeg binary; `None` searches the PATH
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    /// Transcriber command line with `{audio}` / `{language}` placeholders
    pub transcriber_command: Option<String>,
    /// ggml model for the in-process whisper engine
    pub whisper_model: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerSettings {
    /// Number of workers (0 = one per CPU, at least two)
    pub count: usize,
    /// Wall-clock limit per stage task
    pub task_timeout_secs: u64,
    pub max_queue_size: usize,
    pub poll_interval_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            count: 0,
            task_timeout_secs: 3600,
            max_queue_size: 100,
            poll_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderSettings {
    pub fps: u32,
    pub quality: QualityTier,
    pub caption_format: CaptionFormat,
    /// Frame assumed when the source cannot be probed
    pub fallback_width: u32,
    pub fallback_height: u32,
    pub words_per_phrase: usize,
    pub max_phrases: usize,
    pub style: CaptionStyle,
}

impl Default for RenderSettings {
    fn default() -> Self {
        let layout = LayoutOptions::default();
        Self {
            fps: DEFAULT_FPS,
            quality: QualityTier::default(),
            caption_format: CaptionFormat::default(),
            fallback_width: FALLBACK_FRAME.width,
            fallback_height: FALLBACK_FRAME.height,
            words_per_phrase: layout.words_per_phrase,
            max_phrases: layout.max_phrases,
            style: CaptionStyle::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct QuotaSettings {
    pub policy: QuotaPolicy,
    /// Limits given to owners on first sight
    pub default_limits: OwnerLimits,
}

/// Settings manager for loading, saving, and resetting settings
pub struct SettingsManager {
    settings_path: PathBuf,
}

impl SettingsManager {
    /// Create a settings manager storing `settings.json` in `config_dir`
    pub fn new(config_dir: PathBuf) -> Self {
        Self {
            settings_path: config_dir.join(SETTINGS_FILE),
        }
    }

    /// Create a settings manager for an explicit settings file
    pub fn at_path(settings_path: PathBuf) -> Self {
        Self { settings_path }
    }

    /// `{config_dir}/captionforge`
    pub fn default_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("captionforge"))
            .unwrap_or_else(|| PathBuf::from(".captionforge"))
    }

    fn lock_path(&self) -> PathBuf {
        self.settings_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(SETTINGS_LOCK_FILE)
    }

    fn with_lock<T>(&self, exclusive: bool, op: impl FnOnce() -> CoreResult<T>) -> CoreResult<T> {
        // The lock file lives next to the settings file
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CoreError::Config(format!("Failed to create settings directory: {}", e))
            })?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())
            .map_err(|e| CoreError::Config(format!("Failed to open settings lock file: {}", e)))?;

        let locked = if exclusive {
            fs2::FileExt::lock_exclusive(&lock_file)
        } else {
            fs2::FileExt::lock_shared(&lock_file)
        };
        locked.map_err(|e| CoreError::Config(format!("Failed to lock settings file: {}", e)))?;

        let result = op();

        if let Err(e) = fs2::FileExt::unlock(&lock_file) {
            warn!("Failed to unlock settings lock file: {}", e);
        }

        result
    }

    /// Get the settings file path
    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// Load settings from disk, returning defaults if the file is missing or
    /// unreadable
    pub fn load(&self) -> Settings {
        let result = self.with_lock(false, || {
            if !self.settings_path.exists() {
                info!("Settings file not found, using defaults");
                return Ok(Settings::default());
            }

            let content = fs::read_to_string(&self.settings_path)?;
            let mut settings = serde_json::from_str::<Settings>(&content)?;

            if settings.version < SETTINGS_VERSION {
                info!(
                    "Migrating settings from version {} to {}",
                    settings.version, SETTINGS_VERSION
                );
            }

            settings.normalize();
            Ok(settings)
        });

        match result {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to load settings, using defaults: {}", e);
                Settings::default()
            }
        }
    }

    /// Normalizes and saves settings atomically; returns what was written
    pub fn save(&self, settings: &Settings) -> CoreResult<Settings> {
        self.with_lock(true, || {
            let mut normalized = settings.clone();
            normalized.normalize();

            atomic_write_json_pretty(&self.settings_path, &normalized)?;

            info!("Settings saved to {:?}", self.settings_path);
            Ok(normalized)
        })
    }

    /// Reset settings to defaults and delete the settings file
    pub fn reset(&self) -> CoreResult<Settings> {
        self.with_lock(true, || {
            if self.settings_path.exists() {
                fs::remove_file(&self.settings_path)?;
                info!("Settings file deleted");
            }
            Ok(Settings::default())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::DailyLimit;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, SETTINGS_VERSION);
        assert_eq!(settings.workers.task_timeout_secs, 3600);
        assert_eq!(settings.render.fallback_width, 1080);
        assert_eq!(settings.render.fallback_height, 1920);
        assert_eq!(settings.render.words_per_phrase, 3);
        assert_eq!(settings.quota.policy, QuotaPolicy::SuccessfulBurnsOnly);
        assert_eq!(settings.quota.default_limits.max_duration_minutes, Some(1));
        assert!(settings.worker_count() >= 2);
    }

    #[test]
    fn test_settings_serialization() {
        let settings = Settings::default();
        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains("\"taskTimeoutSecs\":3600"));
        let deserialized: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(settings, deserialized);
    }

    #[test]
    fn test_load_nonexistent_returns_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(temp_dir.path().to_path_buf());

        assert_eq!(manager.load(), Settings::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(temp_dir.path().to_path_buf());

        let mut settings = Settings::default();
        settings.workers.count = 4;
        settings.render.caption_format = CaptionFormat::Ass;
        settings.quota.default_limits.daily_limit = DailyLimit::Unlimited;

        manager.save(&settings).unwrap();
        let loaded = manager.load();

        assert_eq!(loaded.workers.count, 4);
        assert_eq!(loaded.render.caption_format, CaptionFormat::Ass);
        assert_eq!(loaded.quota.default_limits.daily_limit, DailyLimit::Unlimited);

        // Temp file should not exist after successful write
        assert!(!manager.settings_path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_invalid_json_returns_defaults() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(SETTINGS_FILE), "invalid json {{{").unwrap();

        let manager = SettingsManager::new(temp_dir.path().to_path_buf());
        assert_eq!(manager.load(), Settings::default());
    }

    #[test]
    fn test_partial_json_uses_defaults_for_missing() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(SETTINGS_FILE),
            r#"{"version": 1, "workers": {"maxQueueSize": 7}, "unknown": true}"#,
        )
        .unwrap();

        let manager = SettingsManager::new(temp_dir.path().to_path_buf());
        let settings = manager.load();

        assert_eq!(settings.workers.max_queue_size, 7);
        assert_eq!(settings.workers.poll_interval_ms, 500);
        assert_eq!(settings.render, RenderSettings::default());
    }

    #[test]
    fn test_normalization_clamps_values() {
        let mut settings = Settings::default();
        settings.workers.task_timeout_secs = 0;
        settings.workers.max_queue_size = 0;
        settings.render.fps = 1000;
        settings.render.words_per_phrase = 0;
        settings.render.style.font_scale = f64::NAN;
        settings.tools.transcriber_command = Some("   ".to_string());
        settings.tools.ffmpeg_path = Some(PathBuf::new());
        settings.storage.media_root = PathBuf::new();

        settings.normalize();

        assert_eq!(settings.workers.task_timeout_secs, 10);
        assert_eq!(settings.workers.max_queue_size, 1);
        assert_eq!(settings.render.fps, 120);
        assert_eq!(settings.render.words_per_phrase, 1);
        assert_eq!(settings.render.style.font_scale, 0.01);
        assert!(settings.tools.transcriber_command.is_none());
        assert!(settings.tools.ffmpeg_path.is_none());
        assert_eq!(settings.storage.media_root, StorageSettings::default().media_root);
    }

    #[test]
    fn test_pipeline_settings_follow_file() {
        let mut settings = Settings::default();
        settings.workers.count = 3;
        settings.workers.task_timeout_secs = 120;
        settings.render.max_phrases = 5;
        settings.quota.policy = QuotaPolicy::AllAttempts;

        let pipeline = settings.pipeline_settings();
        assert_eq!(pipeline.task_timeout, Duration::from_secs(120));
        assert_eq!(pipeline.layout.max_phrases, 5);
        assert_eq!(pipeline.total_workers, 3);
        assert_eq!(pipeline.quota_policy, QuotaPolicy::AllAttempts);

        let dispatcher = settings.dispatcher_config();
        assert_eq!(dispatcher.num_workers, 3);
        assert_eq!(dispatcher.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_reset_deletes_file() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(temp_dir.path().to_path_buf());

        manager.save(&Settings::default()).unwrap();
        assert!(manager.settings_path().exists());

        let reset = manager.reset().unwrap();
        assert!(!manager.settings_path().exists());
        assert_eq!(reset, Settings::default());
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("deep").join("custom.json");
        let manager = SettingsManager::at_path(path.clone());

        manager.save(&Settings::default()).unwrap();
        assert!(path.exists());
    }
}
