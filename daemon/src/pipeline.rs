/// Per-camera context threaded through every handler.
///
/// A `Pipeline` owns the camera's output collaborators, its encoder sessions
/// and the per-episode counters. Nothing here is shared between cameras: each
/// camera task builds its own and hands `&mut Pipeline` to the bus on every
/// publish.
use anyhow::Result;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tokio::{runtime::Handle, sync::watch};

use crate::config::{CameraConfig, GlobalConfig};
use crate::database::{Database, SqlDatabase};
use crate::encoder::{self, EncoderBackend};
use crate::event::FileType;
use crate::launcher::{self, Launcher, ShellLauncher};
use crate::picture::{ImageFileWriter, PictureWriter, StillFormat};
use crate::session::SessionManager;
use crate::sinks::{FrameSink, LiveFeed, LiveFrame, PipeDevice};
use crate::timefmt::{self, Placeholders};

/// External collaborators a pipeline writes to.
pub struct Outputs {
    pub pictures: Box<dyn PictureWriter>,
    pub database: Option<Box<dyn Database>>,
    pub video_pipe: Option<Box<dyn FrameSink>>,
    pub motion_pipe: Option<Box<dyn FrameSink>>,
    pub live: Option<Box<dyn FrameSink>>,
    pub launcher: Box<dyn Launcher>,
}

pub struct Pipeline {
    pub camera: CameraConfig,
    pub quiet: bool,
    pub target_dir: PathBuf,
    pub still_format: StillFormat,
    /// Classifiers that produce a database row.
    pub sql_mask: FileType,
    pub outputs: Outputs,
    pub sessions: SessionManager,

    /// Capture time of the frame being processed.
    pub current_time: DateTime<Local>,
    /// Frames seen so far in the current second.
    pub shots: u32,
    /// Frames captured during the previous second.
    pub last_rate: u32,
    pub event_nr: u32,
    /// Changed pixels in the current frame.
    pub diffs: u32,
    /// `text_event` rendered at the start of the current episode.
    pub text_event: String,
    /// Motion image for the current frame, when detection produced one.
    pub motion_image: Option<Vec<u8>>,
    /// Set when a snapshot was requested; cleared by the snapshot writer.
    pub snapshot: bool,
    /// Set on a fatal error; the frame driver stops the camera.
    pub finish: bool,
    pub(crate) dispatch_depth: u32,
}

impl Pipeline {
    pub fn new(
        global: &GlobalConfig,
        camera: CameraConfig,
        outputs: Outputs,
        backend: Box<dyn EncoderBackend>,
    ) -> Result<Self> {
        let geometry = camera.geometry()?;
        let sql_mask = global
            .database
            .as_ref()
            .map(|db| db.file_type_mask())
            .unwrap_or(FileType::NONE);
        Ok(Self {
            target_dir: camera.effective_target_dir(global),
            quiet: global.quiet,
            still_format: StillFormat::from_ppm_flag(global.ppm),
            sql_mask,
            outputs,
            sessions: SessionManager::new(backend, geometry),
            current_time: Local::now(),
            shots: 0,
            last_rate: 0,
            event_nr: 0,
            diffs: 0,
            text_event: String::new(),
            motion_image: None,
            snapshot: false,
            finish: false,
            dispatch_depth: 0,
            camera,
        })
    }

    /// Builds the production collaborators for `camera`. Optional outputs that
    /// fail to open are logged and left disabled.
    /// Returns the live feed receiver when the feed is enabled.
    pub fn from_config(
        global: &GlobalConfig,
        camera: CameraConfig,
        runtime: Handle,
    ) -> Result<(Self, Option<watch::Receiver<LiveFrame>>)> {
        let geometry = camera.geometry()?;
        let id = camera.id;

        let database = global.database.as_ref().and_then(|db| {
            match SqlDatabase::connect_lazy(&db.url, runtime) {
                Ok(d) => Some(Box::new(d) as Box<dyn Database>),
                Err(e) => {
                    log::error!("[database] Camera {id}: database disabled: {e:#}");
                    None
                }
            }
        });

        let (live, live_rx) = if camera.live_feed {
            let feed = LiveFeed::new();
            let rx = feed.subscribe();
            (Some(Box::new(feed) as Box<dyn FrameSink>), Some(rx))
        } else {
            (None, None)
        };

        let outputs = Outputs {
            pictures: Box::new(ImageFileWriter::new(
                StillFormat::from_ppm_flag(global.ppm),
                global.quality,
                geometry,
            )),
            database,
            video_pipe: open_pipe(id, camera.video_pipe.as_deref()),
            motion_pipe: open_pipe(id, camera.motion_video_pipe.as_deref()),
            live,
            launcher: Box::new(ShellLauncher),
        };
        let pipeline = Self::new(global, camera, outputs, encoder::default_backend()?)?;
        Ok((pipeline, live_rx))
    }

    pub fn placeholders(&self) -> Placeholders<'_> {
        Placeholders {
            camera_id: self.camera.id,
            event_nr: self.event_nr,
            shots: self.shots,
            diffs: self.diffs,
            text_event: &self.text_event,
        }
    }

    pub fn render(&self, template: &str, time: &DateTime<Local>) -> String {
        timefmt::render(template, time, &self.placeholders())
    }

    /// `<target_dir>/<rendered template><suffix>.<ext>`, using `default` when
    /// the configured template is missing or blank.
    pub fn artifact_path(
        &self,
        template: Option<&str>,
        default: &str,
        suffix: &str,
        ext: &str,
        time: &DateTime<Local>,
    ) -> PathBuf {
        let template = template.filter(|t| !t.trim().is_empty()).unwrap_or(default);
        let stem = self.render(template, time);
        self.target_dir.join(format!("{stem}{suffix}.{ext}"))
    }

    /// Launches `template` (if configured) with an optional trailing filename.
    pub fn run_command(&self, template: Option<&str>, arg: Option<&Path>, time: &DateTime<Local>) {
        let arg = arg.map(|p| p.to_string_lossy());
        if let Some(line) =
            launcher::command_line(template, arg.as_deref(), time, &self.placeholders())
        {
            self.outputs.launcher.launch(&line);
        }
    }

    /// Advances the per-second frame counters to a frame captured at `now`.
    pub fn begin_frame(&mut self, now: DateTime<Local>) {
        if now.timestamp() != self.current_time.timestamp() {
            self.last_rate = self.shots + 1;
            self.shots = 0;
        } else {
            self.shots += 1;
        }
        self.current_time = now;
    }

    /// Starts a new episode: bumps the event number and renders the event text.
    pub fn begin_event(&mut self, now: &DateTime<Local>) {
        self.event_nr += 1;
        self.text_event = self.render(&self.camera.text_event, now);
    }
}

fn open_pipe(camera: u32, path: Option<&Path>) -> Option<Box<dyn FrameSink>> {
    let path = path?;
    match PipeDevice::open(path) {
        Ok(dev) => Some(Box::new(dev)),
        Err(e) => {
            log::warn!("[pipe] Camera {camera}: pipe disabled: {e:#}");
            None
        }
    }
}
