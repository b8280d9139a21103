use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use tempfile::TempDir;

use crate::bus::EventBus;
use crate::config::{CameraConfig, GlobalConfig};
use crate::database::{Database, SecurityRecord};
use crate::encoder::{EncoderBackend, EncoderParams, Role, VideoEncoder};
use crate::event::FileType;
use crate::frame::YuvPlanes;
use crate::launcher::Launcher;
use crate::picture::PictureWriter;
use crate::pipeline::{Outputs, Pipeline};
use crate::sinks::FrameSink;

/// Shared, clonable call log.
#[derive(Debug)]
pub struct Log<T>(Arc<Mutex<Vec<T>>>);

impl<T> Clone for Log<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Default for Log<T> {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }
}

impl<T: Clone> Log<T> {
    pub fn push(&self, item: T) {
        self.0.lock().unwrap().push(item);
    }

    pub fn calls(&self) -> Vec<T> {
        self.0.lock().unwrap().clone()
    }
}

// ── Encoder ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderCall {
    Open { role: Role, path: PathBuf, fps: u32 },
    Put { path: PathBuf, y: Vec<u8>, u: Vec<u8>, v: Vec<u8> },
    Close { path: PathBuf },
}

pub type EncoderLog = Log<EncoderCall>;

impl EncoderLog {
    pub fn opens(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, EncoderCall::Open { .. })).count()
    }

    pub fn closes(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, EncoderCall::Close { .. })).count()
    }

    pub fn puts_to(&self, path: &Path) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, EncoderCall::Put { path: p, .. } if p == path))
            .count()
    }
}

#[derive(Clone, Default)]
pub struct RecordingBackend {
    pub log: EncoderLog,
    /// Full parameters of every successful open.
    pub params: Log<EncoderParams>,
    pub fail_open: bool,
}

impl EncoderBackend for RecordingBackend {
    fn extension(&self) -> &str {
        "y4m"
    }

    fn open(&self, params: &EncoderParams) -> Result<Box<dyn VideoEncoder>> {
        if self.fail_open {
            bail!("encoder unavailable");
        }
        self.params.push(params.clone());
        self.log.push(EncoderCall::Open {
            role: params.role,
            path: params.path.clone(),
            fps: params.fps,
        });
        Ok(Box::new(RecordingEncoder { path: params.path.clone(), log: self.log.clone() }))
    }
}

struct RecordingEncoder {
    path: PathBuf,
    log: EncoderLog,
}

impl VideoEncoder for RecordingEncoder {
    fn put(&mut self, planes: YuvPlanes<'_>) -> Result<()> {
        self.log.push(EncoderCall::Put {
            path: self.path.clone(),
            y: planes.y.to_vec(),
            u: planes.u.to_vec(),
            v: planes.v.to_vec(),
        });
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.log.push(EncoderCall::Close { path: self.path.clone() });
        Ok(())
    }
}

// ── Launcher ──────────────────────────────────────────────────────────────────

pub type CommandLog = Log<String>;

impl CommandLog {
    pub fn lines(&self) -> Vec<String> {
        self.calls()
    }
}

struct RecordingLauncher(CommandLog);

impl Launcher for RecordingLauncher {
    fn launch(&self, command_line: &str) {
        self.0.push(command_line.to_string());
    }
}

// ── Pictures ──────────────────────────────────────────────────────────────────

/// Writes the raw frame bytes so filesystem effects can be inspected.
#[derive(Clone, Default)]
pub struct RecordingPictures {
    pub log: Log<(PathBuf, FileType)>,
    pub fail: Arc<Mutex<bool>>,
}

impl RecordingPictures {
    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.log.calls().into_iter().map(|(p, _)| p).collect()
    }
}

impl PictureWriter for RecordingPictures {
    fn write(&mut self, path: &Path, frame: &[u8], file_type: FileType) -> Result<()> {
        if *self.fail.lock().unwrap() {
            bail!("disk full");
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, frame)?;
        self.log.push((path.to_path_buf(), file_type));
        Ok(())
    }
}

// ── Database ──────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct RecordingDatabase {
    pub log: Log<SecurityRecord>,
    pub fail: bool,
}

impl Database for RecordingDatabase {
    fn execute_insert(&mut self, record: &SecurityRecord) -> Result<()> {
        if self.fail {
            bail!("connection refused");
        }
        self.log.push(record.clone());
        Ok(())
    }
}

// ── Sinks ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Push(Vec<u8>),
    Stop,
}

#[derive(Clone, Default)]
pub struct RecordingSink {
    pub log: Log<SinkCall>,
    /// Rejects every push after recording it.
    pub fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self { fail: true, ..Default::default() }
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.log
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                SinkCall::Push(f) => Some(f),
                SinkCall::Stop => None,
            })
            .collect()
    }
}

impl FrameSink for RecordingSink {
    fn push(&mut self, frame: &[u8]) -> Result<()> {
        self.log.push(SinkCall::Push(frame.to_vec()));
        if self.fail {
            bail!("broken pipe");
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.log.push(SinkCall::Stop);
    }
}

// ── Harness ───────────────────────────────────────────────────────────────────

/// A pipeline wired to recording collaborators, plus handles on their logs.
pub struct Harness {
    pub pipeline: Pipeline,
    pub bus: EventBus,
    pub encoder: EncoderLog,
    pub encoder_params: Log<EncoderParams>,
    pub commands: CommandLog,
    pub pictures: RecordingPictures,
    pub database: Log<SecurityRecord>,
    pub video_pipe: RecordingSink,
    pub motion_pipe: RecordingSink,
    pub live: RecordingSink,
    pub dir: TempDir,
}

impl Harness {
    pub fn publish(&mut self, n: &crate::event::Notification<'_>) {
        self.bus.publish(&mut self.pipeline, n);
    }
}

/// An 8x4 YUV 4:2:0 camera.
pub fn camera() -> CameraConfig {
    CameraConfig { input: "/dev/null".into(), width: 8, height: 4, ..Default::default() }
}

pub fn frame(camera: &CameraConfig, value: u8) -> Vec<u8> {
    let len = camera.geometry().unwrap().frame_len();
    vec![value; len]
}

pub fn harness(camera: CameraConfig) -> Harness {
    harness_with(GlobalConfig::default(), camera)
}

pub fn harness_with(global: GlobalConfig, camera: CameraConfig) -> Harness {
    build(global, camera, RecordingBackend::default(), Some(RecordingDatabase::default()))
}

pub fn harness_failing_encoder(camera: CameraConfig) -> Harness {
    let backend = RecordingBackend { fail_open: true, ..Default::default() };
    build(GlobalConfig::default(), camera, backend, Some(RecordingDatabase::default()))
}

/// A pipeline whose database was never configured (or failed to set up).
pub fn harness_without_database(global: GlobalConfig, camera: CameraConfig) -> Harness {
    build(global, camera, RecordingBackend::default(), None)
}

/// A pipeline whose pipe devices reject every frame.
pub fn harness_failing_pipes(camera: CameraConfig) -> Harness {
    let mut h = harness(camera);
    h.video_pipe = RecordingSink::failing();
    h.motion_pipe = RecordingSink::failing();
    h.pipeline.outputs.video_pipe = Some(Box::new(h.video_pipe.clone()));
    h.pipeline.outputs.motion_pipe = Some(Box::new(h.motion_pipe.clone()));
    h
}

pub fn build(
    mut global: GlobalConfig,
    camera: CameraConfig,
    backend: RecordingBackend,
    database: Option<RecordingDatabase>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    global.target_dir = dir.path().to_string_lossy().into_owned();

    let commands = CommandLog::default();
    let pictures = RecordingPictures::default();
    let video_pipe = RecordingSink::default();
    let motion_pipe = RecordingSink::default();
    let live = RecordingSink::default();
    let encoder = backend.log.clone();
    let encoder_params = backend.params.clone();
    let database_log = database.as_ref().map(|db| db.log.clone()).unwrap_or_default();

    let outputs = Outputs {
        pictures: Box::new(pictures.clone()),
        database: database.map(|db| Box::new(db) as Box<dyn Database>),
        video_pipe: Some(Box::new(video_pipe.clone())),
        motion_pipe: Some(Box::new(motion_pipe.clone())),
        live: Some(Box::new(live.clone())),
        launcher: Box::new(RecordingLauncher(commands.clone())),
    };
    let pipeline = Pipeline::new(&global, camera, outputs, Box::new(backend)).unwrap();

    Harness {
        pipeline,
        bus: EventBus::standard(),
        encoder,
        encoder_params,
        commands,
        pictures,
        database: database_log,
        video_pipe,
        motion_pipe,
        live,
        dir,
    }
}
