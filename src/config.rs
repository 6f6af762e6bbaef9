//! Runtime settings.
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `STORY_REEL_*` environment variables.

use crate::cache::DEFAULT_POOL_SIZE;
use crate::error::Result;
use crate::scheduler::DEFAULT_PREPARE_TIMEOUT;
use crate::sim::{self, DEFAULT_CLIP_DURATION};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default settings file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "story-reel.toml";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "STORY_REEL";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Story definition (JSON).
    pub story_path: PathBuf,
    /// Key-value file holding player progress.
    pub progress_path: PathBuf,
    /// Base directory video references are resolved against.
    pub media_dir: PathBuf,
    /// Upper bound on how long a segment start waits for its clip to prepare.
    pub prepare_timeout_ms: u64,
    /// Number of preload cache workers.
    pub preload_workers: usize,
    /// Frame ticks per second.
    pub tick_hz: u32,
    /// Prepare latency of the headless backend.
    pub sim_prepare_ms: u64,
    /// Clip length used by the headless backend when a segment has no duration.
    pub sim_default_duration_secs: f32,
    /// Tracing filter used when `RUST_LOG` is not set.
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            story_path: PathBuf::from("story.json"),
            progress_path: PathBuf::from("progress.json"),
            media_dir: PathBuf::from("media"),
            prepare_timeout_ms: DEFAULT_PREPARE_TIMEOUT.as_millis() as u64,
            preload_workers: DEFAULT_POOL_SIZE,
            tick_hz: 60,
            sim_prepare_ms: 120,
            sim_default_duration_secs: DEFAULT_CLIP_DURATION.as_secs_f32(),
            log_filter: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from `path` (or the default file if present) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize::<Settings>()?;
        Ok(settings)
    }

    pub fn prepare_timeout(&self) -> Duration {
        Duration::from_millis(self.prepare_timeout_ms)
    }

    /// Duration of one frame tick.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_hz.max(1)))
    }

    pub fn sim_prepare_latency(&self) -> Duration {
        Duration::from_millis(self.sim_prepare_ms)
    }

    pub fn sim_default_duration(&self) -> Duration {
        sim::duration_from_secs(self.sim_default_duration_secs, DEFAULT_CLIP_DURATION)
    }
}
