use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::event::FileType;
use crate::frame::{ImageGeometry, PixelFormat};

pub const DEFAULT_TARGET_DIR: &str = "/var/lib/watchpost";
pub const DEFAULT_JPEG_QUALITY: u8 = 75;
pub const DEFAULT_FRAME_LIMIT: u32 = 100;
pub const DEFAULT_WIDTH: u32 = 352;
pub const DEFAULT_HEIGHT: u32 = 288;
pub const DEFAULT_THRESHOLD: u32 = 1500;
pub const DEFAULT_NOISE_LEVEL: u8 = 32;
pub const DEFAULT_EVENT_GAP_SECS: u64 = 60;
pub const DEFAULT_MOVIE_BPS: u32 = 400_000;
pub const DEFAULT_TEXT_EVENT: &str = "%Y%m%d%H%M%S";

/// Root configuration structure. Deserialized from the daemon's TOML file.
#[derive(Debug, Default, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
}

/// Settings shared by every camera pipeline.
#[derive(Debug, Deserialize, Clone)]
pub struct GlobalConfig {
    /// Base directory for pictures and movies.
    #[serde(default = "default_target_dir")]
    pub target_dir: String,
    /// Write stills as PPM instead of JPEG.
    #[serde(default)]
    pub ppm: bool,
    /// JPEG quality, 1-100.
    #[serde(default = "default_quality")]
    pub quality: u8,
    /// Suppress the terminal bell on motion frames.
    #[serde(default = "default_true")]
    pub quiet: bool,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            target_dir: DEFAULT_TARGET_DIR.to_string(),
            ppm: false,
            quality: DEFAULT_JPEG_QUALITY,
            quiet: true,
            database: None,
        }
    }
}

/// Where file records are inserted and which kinds get logged.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// `mysql://...` or `postgres://...`
    pub url: String,
    #[serde(default = "default_true")]
    pub log_image: bool,
    #[serde(default = "default_true")]
    pub log_snapshot: bool,
    #[serde(default)]
    pub log_movie: bool,
    #[serde(default)]
    pub log_timelapse: bool,
}

impl DatabaseConfig {
    /// File types that produce a database row.
    pub fn file_type_mask(&self) -> FileType {
        let mut mask = FileType::NONE;
        if self.log_image {
            mask = mask | FileType::IMAGE | FileType::IMAGE_MOTION;
        }
        if self.log_snapshot {
            mask = mask | FileType::IMAGE_SNAPSHOT;
        }
        if self.log_movie {
            mask = mask | FileType::MOVIE | FileType::MOVIE_MOTION;
        }
        if self.log_timelapse {
            mask = mask | FileType::MOVIE_TIMELAPSE;
        }
        mask
    }
}

/// When the running timelapse movie is finalized and a new one started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelapseRollover {
    Hourly,
    #[default]
    Daily,
    /// Only at shutdown.
    Never,
}

/// One capture pipeline and everything it outputs.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CameraConfig {
    pub id: u32,
    /// Raw frame source (file or FIFO).
    pub input: PathBuf,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Overrides `global.target_dir` for this camera.
    pub target_dir: Option<String>,

    /// Nominal capture rate; movie rate in low-CPU mode.
    pub frame_limit: u32,
    pub low_cpu: bool,

    /// Changed pixels needed to count a frame as motion.
    pub threshold: u32,
    /// Per-pixel luma difference treated as change.
    pub noise_level: u8,
    /// Seconds without motion that end an episode.
    pub event_gap: u64,

    /// Save a still for every motion frame.
    pub output_normal: bool,
    /// Save the motion image as well (`...m.<ext>`).
    pub output_motion: bool,
    pub jpeg_filename: Option<String>,
    pub snapshot_filename: Option<String>,
    /// Seconds between automatic snapshots; 0 disables them.
    pub snapshot_interval: u64,

    /// Record a movie of the captured frames for every episode.
    pub movie_new: bool,
    /// Record a movie of the motion images for every episode.
    pub movie_motion: bool,
    pub movie_filename: Option<String>,
    pub movie_bps: u32,
    pub movie_vbr: u32,

    /// Seconds between timelapse frames; 0 disables timelapse.
    pub timelapse_interval: u64,
    pub timelapse_rollover: TimelapseRollover,
    pub timelapse_filename: Option<String>,

    pub on_event_start: Option<String>,
    pub on_event_end: Option<String>,
    pub on_picture_save: Option<String>,
    pub on_motion_detected: Option<String>,
    pub on_movie_start: Option<String>,
    pub on_movie_end: Option<String>,

    /// Stored with every database row when set.
    pub text_left: Option<String>,
    /// Template rendered at episode start; available as `%C`.
    pub text_event: String,

    pub video_pipe: Option<PathBuf>,
    pub motion_video_pipe: Option<PathBuf>,
    pub live_feed: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            id: 1,
            input: PathBuf::new(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            pixel_format: PixelFormat::default(),
            target_dir: None,
            frame_limit: DEFAULT_FRAME_LIMIT,
            low_cpu: false,
            threshold: DEFAULT_THRESHOLD,
            noise_level: DEFAULT_NOISE_LEVEL,
            event_gap: DEFAULT_EVENT_GAP_SECS,
            output_normal: true,
            output_motion: false,
            jpeg_filename: None,
            snapshot_filename: None,
            snapshot_interval: 0,
            movie_new: true,
            movie_motion: false,
            movie_filename: None,
            movie_bps: DEFAULT_MOVIE_BPS,
            movie_vbr: 0,
            timelapse_interval: 0,
            timelapse_rollover: TimelapseRollover::default(),
            timelapse_filename: None,
            on_event_start: None,
            on_event_end: None,
            on_picture_save: None,
            on_motion_detected: None,
            on_movie_start: None,
            on_movie_end: None,
            text_left: None,
            text_event: DEFAULT_TEXT_EVENT.to_string(),
            video_pipe: None,
            motion_video_pipe: None,
            live_feed: false,
        }
    }
}

impl CameraConfig {
    /// Returns the output directory, falling back to the global one.
    pub fn effective_target_dir(&self, global: &GlobalConfig) -> PathBuf {
        PathBuf::from(self.target_dir.as_deref().unwrap_or(&global.target_dir))
    }

    pub fn geometry(&self) -> Result<ImageGeometry> {
        ImageGeometry::new(self.width, self.height, self.pixel_format)
            .with_context(|| format!("Camera {} has an invalid frame size", self.id))
    }

    /// Checks the settings a pipeline cannot run without.
    pub fn validate(&self) -> Result<()> {
        if self.input.as_os_str().is_empty() {
            bail!("Camera {} has no input configured", self.id);
        }
        self.geometry()?;
        Ok(())
    }
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn default_target_dir() -> String {
    DEFAULT_TARGET_DIR.to_string()
}

fn default_quality() -> u8 {
    DEFAULT_JPEG_QUALITY
}

fn default_true() -> bool {
    true
}
