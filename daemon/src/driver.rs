/// Frame driver: reads raw frames for one camera and turns them into bus events.
///
/// Each camera runs on its own blocking task, fed by a reader thread. The
/// driver paces frames to the camera's frame limit, runs a luma
/// frame-difference detector and publishes the per-frame, episode, snapshot
/// and timelapse events. A stop signal, a
/// finished pipeline or end of input ends the loop; shutdown then closes the
/// episode and the timelapse and publishes STOP.
use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, Timelike};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError};
use std::fs::File;
use std::future::Future;
use std::io::{BufReader, ErrorKind, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::{sync::watch, task::JoinSet};

use crate::bus::EventBus;
use crate::config::TimelapseRollover;
use crate::encoder::Role;
use crate::event::{EventTag, Notification};
use crate::frame::ImageGeometry;
use crate::pipeline::Pipeline;

/// Per-frame luma difference against the previous frame.
pub struct MotionDetector {
    noise_level: u8,
    reference: Option<Vec<u8>>,
}

pub struct Detection {
    /// Luma samples that moved by more than the noise level.
    pub diffs: u32,
    /// Full-size frame: changed pixels white, the rest black, neutral chroma.
    pub image: Vec<u8>,
}

impl MotionDetector {
    pub fn new(noise_level: u8) -> Self {
        Self { noise_level, reference: None }
    }

    pub fn detect(&mut self, frame: &[u8], geometry: &ImageGeometry) -> Detection {
        let luma_len = geometry.luma_len().min(frame.len());
        let luma = &frame[..luma_len];
        let mut image = vec![0u8; frame.len()];
        image[luma_len..].fill(128);

        let diffs = match self.reference.as_mut() {
            Some(reference) => {
                let mut diffs = 0;
                for (i, (cur, prev)) in luma.iter().zip(reference.iter_mut()).enumerate() {
                    if cur.abs_diff(*prev) > self.noise_level {
                        image[i] = 255;
                        diffs += 1;
                    }
                    *prev = *cur;
                }
                diffs
            }
            None => {
                self.reference = Some(luma.to_vec());
                0
            }
        };
        Detection { diffs, image }
    }
}

/// Episode and schedule state for one camera.
pub struct Driver {
    geometry: ImageGeometry,
    detector: MotionDetector,
    episode_open: bool,
    last_motion: Option<DateTime<Local>>,
    snapshot_slot: Option<i64>,
    timelapse_slot: Option<i64>,
    timelapse_period: Option<(NaiveDate, u32)>,
}

impl Driver {
    pub fn new(p: &Pipeline) -> Self {
        Self {
            geometry: *p.sessions.geometry(),
            detector: MotionDetector::new(p.camera.noise_level),
            episode_open: false,
            last_motion: None,
            snapshot_slot: None,
            timelapse_slot: None,
            timelapse_period: None,
        }
    }

    pub fn frame_len(&self) -> usize {
        self.geometry.frame_len()
    }

    /// Publishes everything one captured frame produces.
    pub fn process(
        &mut self,
        bus: &EventBus,
        p: &mut Pipeline,
        frame: &[u8],
        now: DateTime<Local>,
    ) {
        p.begin_frame(now);
        let Detection { diffs, image } = self.detector.detect(frame, &self.geometry);
        p.diffs = diffs;

        bus.publish(p, &Notification::new(EventTag::IMAGE).with_frame(frame).at(now));
        bus.publish(p, &Notification::new(EventTag::IMAGEM).with_frame(&image).at(now));
        p.motion_image = Some(image);

        if diffs > p.camera.threshold {
            if !self.episode_open {
                p.begin_event(&now);
                self.episode_open = true;
                log::info!("[motion] Camera {}: event {} started", p.camera.id, p.event_nr);
                bus.publish(p, &Notification::new(EventTag::FIRST_MOTION).at(now));
            }
            bus.publish(p, &Notification::new(EventTag::MOTION).at(now));
            bus.publish(p, &Notification::new(EventTag::IMAGE_DETECTED).with_frame(frame).at(now));
            let motion = p.motion_image.take();
            if let Some(image) = motion.as_deref() {
                let n = Notification::new(EventTag::IMAGEM_DETECTED).with_frame(image).at(now);
                bus.publish(p, &n);
            }
            p.motion_image = motion;
            self.last_motion = Some(now);
        } else if self.episode_open && self.quiet_for(p, now) {
            self.end_episode(bus, p, now);
        }

        if let Some(slot) = slot(now, p.camera.snapshot_interval) {
            let previous = self.snapshot_slot.replace(slot);
            if previous.is_some_and(|prev| prev != slot) {
                p.snapshot = true;
            }
        }
        if p.snapshot {
            let snap = Notification::new(EventTag::IMAGE_SNAPSHOT).with_frame(frame).at(now);
            bus.publish(p, &snap);
        }

        self.timelapse(bus, p, frame, now);

        if p.camera.live_feed {
            bus.publish(p, &Notification::new(EventTag::WEBCAM).with_frame(frame).at(now));
        }
    }

    /// Closes whatever is still open and announces the stop.
    pub fn shutdown(&mut self, bus: &EventBus, p: &mut Pipeline, now: DateTime<Local>) {
        if self.episode_open {
            self.end_episode(bus, p, now);
        }
        bus.publish(p, &Notification::new(EventTag::TIMELAPSE_END).at(now));
        bus.publish(p, &Notification::new(EventTag::STOP).at(now));
    }

    /// Takes frames from `source` until end of input, a stop request or a
    /// finished pipeline, then shuts down. The stop signal is rechecked while
    /// the source is idle.
    pub fn run(
        &mut self,
        bus: &EventBus,
        p: &mut Pipeline,
        source: &FrameSource,
        stop: &watch::Receiver<bool>,
    ) -> Result<()> {
        let min_interval = Duration::from_secs(1) / p.camera.frame_limit.max(1);
        let mut result = Ok(());
        loop {
            if *stop.borrow() || p.finish {
                break;
            }
            let started = Instant::now();
            let frame = match source.next(IDLE_POLL) {
                Next::Frame(frame) => frame,
                Next::Idle => continue,
                Next::Ended => {
                    log::info!("[capture] Camera {}: end of input", p.camera.id);
                    break;
                }
                Next::Failed(e) => {
                    result = Err(e);
                    break;
                }
            };
            self.process(bus, p, &frame, Local::now());
            if let Some(rest) = min_interval.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }
        self.shutdown(bus, p, Local::now());
        result
    }

    fn quiet_for(&self, p: &Pipeline, now: DateTime<Local>) -> bool {
        let gap = i64::try_from(p.camera.event_gap).unwrap_or(i64::MAX);
        self.last_motion.map_or(true, |last| (now - last).num_seconds() >= gap)
    }

    fn end_episode(&mut self, bus: &EventBus, p: &mut Pipeline, now: DateTime<Local>) {
        self.episode_open = false;
        log::info!("[motion] Camera {}: event {} ended", p.camera.id, p.event_nr);
        bus.publish(p, &Notification::new(EventTag::END_MOTION).at(now));
    }

    fn timelapse(&mut self, bus: &EventBus, p: &mut Pipeline, frame: &[u8], now: DateTime<Local>) {
        let Some(slot) = slot(now, p.camera.timelapse_interval) else {
            return;
        };
        let period = rollover_period(p.camera.timelapse_rollover, &now);
        let previous = std::mem::replace(&mut self.timelapse_period, period);
        if previous.is_some() && previous != period && p.sessions.is_open(Role::Timelapse) {
            bus.publish(p, &Notification::new(EventTag::TIMELAPSE_END).at(now));
        }
        if self.timelapse_slot.replace(slot) != Some(slot) {
            bus.publish(p, &Notification::new(EventTag::TIMELAPSE).with_frame(frame).at(now));
        }
    }
}

/// Index of the `interval`-second slot `now` falls in; `None` when disabled.
fn slot(now: DateTime<Local>, interval: u64) -> Option<i64> {
    let interval = i64::try_from(interval).ok().filter(|i| *i > 0)?;
    Some(now.timestamp().div_euclid(interval))
}

fn rollover_period(rollover: TimelapseRollover, now: &DateTime<Local>) -> Option<(NaiveDate, u32)> {
    match rollover {
        TimelapseRollover::Hourly => Some((now.date_naive(), now.hour())),
        TimelapseRollover::Daily => Some((now.date_naive(), 0)),
        TimelapseRollover::Never => None,
    }
}

/// How long the driver waits on an idle source before rechecking the stop
/// signal.
const IDLE_POLL: Duration = Duration::from_millis(100);

pub enum Next {
    Frame(Vec<u8>),
    /// Nothing arrived within the timeout.
    Idle,
    Ended,
    Failed(anyhow::Error),
}

/// Raw frames read on a dedicated thread.
///
/// Opening a FIFO and reading from it both block until a writer shows up, so
/// neither happens on the driver's thread. A reader left blocked after the
/// driver stops exits on its next frame, when it finds the channel closed.
pub struct FrameSource {
    frames: Receiver<Result<Vec<u8>>>,
}

impl FrameSource {
    /// Opens `path` on the reader thread.
    pub fn open(camera: u32, path: PathBuf, frame_len: usize) -> Result<Self> {
        Self::spawn(camera, frame_len, move || {
            let input = File::open(&path)
                .with_context(|| format!("Failed to open input {}", path.display()))?;
            log::info!("[capture] Camera {camera}: reading {}", path.display());
            Ok(BufReader::new(input))
        })
    }

    pub fn from_reader<R>(camera: u32, input: R, frame_len: usize) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        Self::spawn(camera, frame_len, move || Ok(input))
    }

    fn spawn<R, F>(camera: u32, frame_len: usize, open: F) -> Result<Self>
    where
        R: Read,
        F: FnOnce() -> Result<R> + Send + 'static,
    {
        let (tx, frames) = bounded(1);
        thread::Builder::new()
            .name(format!("camera-{camera}-input"))
            .spawn(move || {
                let mut input = match open() {
                    Ok(input) => input,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                };
                loop {
                    let mut frame = vec![0u8; frame_len];
                    let item = match read_frame(&mut input, &mut frame) {
                        Ok(true) => Ok(frame),
                        Ok(false) => return,
                        Err(e) => Err(e),
                    };
                    let failed = item.is_err();
                    if tx.send(item).is_err() || failed {
                        return;
                    }
                }
            })
            .context("Failed to start input reader")?;
        Ok(Self { frames })
    }

    /// Waits up to `timeout` for the next frame.
    pub fn next(&self, timeout: Duration) -> Next {
        match self.frames.recv_timeout(timeout) {
            Ok(Ok(frame)) => Next::Frame(frame),
            Ok(Err(e)) => Next::Failed(e),
            Err(RecvTimeoutError::Timeout) => Next::Idle,
            Err(RecvTimeoutError::Disconnected) => Next::Ended,
        }
    }
}

/// Fills `frame` from `input`. Returns false at end of input; a trailing
/// partial frame is discarded.
fn read_frame(input: &mut impl Read, frame: &mut [u8]) -> Result<bool> {
    match input.read_exact(frame) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e).context("Failed to read frame"),
    }
}

fn run_camera(bus: &EventBus, mut p: Pipeline, stop: &watch::Receiver<bool>) -> Result<()> {
    let mut driver = Driver::new(&p);
    let source = FrameSource::open(p.camera.id, p.camera.input.clone(), driver.frame_len())?;
    driver.run(bus, &mut p, &source, stop)
}

/// Running camera tasks.
pub struct Cameras {
    /// Setting this to `true` signals every camera loop to stop.
    stop_tx: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl Cameras {
    pub fn start(bus: Arc<EventBus>, pipelines: Vec<Pipeline>) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();
        for pipeline in pipelines {
            let bus = Arc::clone(&bus);
            let stop_rx = stop_rx.clone();
            tasks.spawn_blocking(move || {
                let id = pipeline.camera.id;
                match run_camera(&bus, pipeline, &stop_rx) {
                    Ok(()) => log::info!("[capture] Camera {id}: stopped"),
                    Err(e) => log::error!("[capture] Camera {id}: stopped: {e:#}"),
                }
            });
        }
        Self { stop_tx, tasks }
    }

    /// Waits until every camera has stopped on its own, or until `shutdown`
    /// resolves, in which case the cameras are told to stop and awaited.
    pub async fn run_until(mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                next = self.tasks.join_next() => match next {
                    Some(joined) => log_join(joined),
                    None => return,
                },
            }
        }
        let _ = self.stop_tx.send(true);
        while let Some(joined) = self.tasks.join_next().await {
            log_join(joined);
        }
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        log::error!("[capture] Camera task failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraConfig;
    use crate::event::FileType;
    use crate::frame::PixelFormat;
    use crate::testing::{self, Harness, SinkCall};
    use chrono::TimeZone;
    use std::io::Cursor;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 6, h, m, s).unwrap()
    }

    fn sec(s: u32) -> DateTime<Local> {
        at(3, 0, s)
    }

    fn motion_camera() -> CameraConfig {
        CameraConfig {
            threshold: 10,
            noise_level: 5,
            event_gap: 2,
            output_normal: false,
            on_event_start: Some("start".into()),
            on_event_end: Some("end".into()),
            on_movie_start: Some("movstart".into()),
            on_movie_end: Some("movend".into()),
            ..testing::camera()
        }
    }

    fn drive(h: &mut Harness, frames: &[(u8, DateTime<Local>)]) -> Driver {
        let mut d = Driver::new(&h.pipeline);
        for &(value, now) in frames {
            let frame = testing::frame(&h.pipeline.camera, value);
            d.process(&h.bus, &mut h.pipeline, &frame, now);
        }
        d
    }

    #[test]
    fn detector_counts_luma_changes_above_noise() {
        let g = ImageGeometry::new(4, 2, PixelFormat::Yuv420p).unwrap();
        let mut det = MotionDetector::new(10);
        let first = det.detect(&[50u8; 12], &g);
        assert_eq!(first.diffs, 0);

        let mut frame = vec![50u8; 12];
        frame[0] = 61;
        frame[1] = 60;
        frame[8] = 0;
        let d = det.detect(&frame, &g);
        assert_eq!(d.diffs, 1);
        assert_eq!(&d.image[..8], &[255, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&d.image[8..], &[128; 4]);

        // The reference follows the last frame.
        assert_eq!(det.detect(&frame, &g).diffs, 0);
    }

    #[test]
    fn grey_motion_image_has_no_chroma() {
        let g = ImageGeometry::new(4, 2, PixelFormat::Grey).unwrap();
        let mut det = MotionDetector::new(0);
        det.detect(&[0u8; 8], &g);
        let d = det.detect(&[1u8; 8], &g);
        assert_eq!((d.diffs, d.image), (8, vec![255u8; 8]));
    }

    #[test]
    fn episode_runs_from_first_motion_to_gap() {
        let mut h = testing::harness(motion_camera());
        drive(&mut h, &[(0, sec(0)), (100, sec(1)), (100, sec(2))]);
        assert_eq!(h.pipeline.event_nr, 1);
        let movie = h.dir.path().join("01-20240506030001.y4m");
        assert_eq!(
            h.commands.lines(),
            vec!["start".to_string(), format!("movstart {}", movie.display())]
        );
        assert_eq!(h.encoder.puts_to(&movie), 1);

        let mut h = testing::harness(motion_camera());
        drive(&mut h, &[(0, sec(0)), (100, sec(1)), (100, sec(2)), (100, sec(3))]);
        let lines = h.commands.lines();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[2], "end");
        assert!(lines[3].starts_with("movend "));
        assert_eq!(h.encoder.closes(), 1);
    }

    #[test]
    fn continuing_motion_extends_the_episode() {
        let mut h = testing::harness(motion_camera());
        let frames: Vec<(u8, DateTime<Local>)> =
            (0..6).map(|s| (if s % 2 == 0 { 0 } else { 200 }, sec(s))).collect();
        drive(&mut h, &frames);
        assert_eq!(h.pipeline.event_nr, 1);
        assert_eq!(h.encoder.closes(), 0);
        // Every frame after the first differs from its predecessor.
        let movie = h.pipeline.sessions.path(Role::NewRecording).unwrap().to_path_buf();
        assert_eq!(h.encoder.puts_to(&movie), 5);
    }

    #[test]
    fn every_frame_reaches_both_pipes() {
        let mut h = testing::harness(motion_camera());
        drive(&mut h, &[(0, sec(0)), (100, sec(0))]);
        assert_eq!(h.video_pipe.frames().len(), 2);
        let motion = h.motion_pipe.frames();
        assert_eq!(motion.len(), 2);
        assert!(motion[0][..32].iter().all(|&b| b == 0));
        assert!(motion[1][..32].iter().all(|&b| b == 255));
        assert!(h.live.frames().is_empty());
    }

    #[test]
    fn live_feed_gets_every_frame_when_enabled() {
        let cam = CameraConfig { live_feed: true, ..motion_camera() };
        let mut h = testing::harness(cam);
        drive(&mut h, &[(1, sec(0)), (1, sec(0)), (1, sec(1))]);
        assert_eq!(h.live.frames().len(), 3);
    }

    #[test]
    fn snapshots_follow_the_interval() {
        let cam = CameraConfig { snapshot_interval: 2, ..motion_camera() };
        let mut h = testing::harness(cam);
        let frames: Vec<_> = (0..6).map(|s| (7, sec(s))).collect();
        drive(&mut h, &frames);
        let snaps: Vec<_> = h
            .pictures
            .log
            .calls()
            .into_iter()
            .filter(|(_, t)| *t == FileType::IMAGE_SNAPSHOT)
            .collect();
        assert_eq!(snaps.len(), 2);
        assert!(!h.pipeline.snapshot);
    }

    #[test]
    fn timelapse_rolls_over_on_the_hour() {
        let cam = CameraConfig {
            timelapse_interval: 1,
            timelapse_rollover: TimelapseRollover::Hourly,
            timelapse_filename: Some("%H-lapse".into()),
            ..motion_camera()
        };
        let mut h = testing::harness(cam);
        drive(&mut h, &[(1, at(3, 59, 58)), (1, at(3, 59, 59)), (1, at(4, 0, 0))]);

        let first = h.dir.path().join("03-lapse.y4m");
        let second = h.dir.path().join("04-lapse.y4m");
        assert_eq!(h.encoder.puts_to(&first), 2);
        assert_eq!(h.encoder.puts_to(&second), 1);
        assert_eq!(h.encoder.closes(), 1);
        assert_eq!(h.pipeline.sessions.path(Role::Timelapse), Some(second.as_path()));
    }

    #[test]
    fn timelapse_skips_frames_within_a_slot() {
        let cam = CameraConfig {
            timelapse_interval: 10,
            timelapse_rollover: TimelapseRollover::Never,
            ..motion_camera()
        };
        let mut h = testing::harness(cam);
        let frames: Vec<_> = (0..25).map(|s| (1, sec(s))).collect();
        drive(&mut h, &frames);
        let path = h.pipeline.sessions.path(Role::Timelapse).unwrap().to_path_buf();
        assert_eq!(h.encoder.puts_to(&path), 3);
    }

    #[test]
    fn shutdown_closes_episode_and_timelapse() {
        let cam = CameraConfig { timelapse_interval: 1, ..motion_camera() };
        let mut h = testing::harness(cam);
        let mut d = drive(&mut h, &[(0, sec(0)), (100, sec(1))]);
        assert!(h.pipeline.sessions.is_open(Role::NewRecording));
        assert!(h.pipeline.sessions.is_open(Role::Timelapse));

        d.shutdown(&h.bus, &mut h.pipeline, sec(2));
        for role in Role::ALL {
            assert!(!h.pipeline.sessions.is_open(role));
        }
        assert!(h.commands.lines().contains(&"end".to_string()));
        assert_eq!(h.live.log.calls(), vec![SinkCall::Stop]);
    }

    fn stream(camera: &CameraConfig, values: &[u8], trailing: usize) -> Cursor<Vec<u8>> {
        let mut bytes: Vec<u8> =
            values.iter().flat_map(|&v| testing::frame(camera, v)).collect();
        bytes.extend(std::iter::repeat(0).take(trailing));
        Cursor::new(bytes)
    }

    fn source(h: &Harness, input: impl Read + Send + 'static) -> FrameSource {
        let len = h.pipeline.sessions.geometry().frame_len();
        FrameSource::from_reader(h.pipeline.camera.id, input, len).unwrap()
    }

    /// A reader that blocks until its sender is dropped, like a FIFO whose
    /// writer has gone quiet.
    struct Stalled(Receiver<()>);

    impl Read for Stalled {
        fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            let _ = self.0.recv();
            Ok(0)
        }
    }

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::Other, "device gone"))
        }
    }

    #[test]
    fn run_reads_until_end_of_input() {
        let mut h = testing::harness(motion_camera());
        let input = source(&h, stream(&h.pipeline.camera, &[1, 2, 3], 5));
        let (_tx, rx) = watch::channel(false);
        let mut d = Driver::new(&h.pipeline);
        d.run(&h.bus, &mut h.pipeline, &input, &rx).unwrap();
        assert_eq!(h.video_pipe.frames().len(), 3);
        assert_eq!(h.live.log.calls(), vec![SinkCall::Stop]);
    }

    #[test]
    fn run_stops_when_pipeline_finishes() {
        let mut h = testing::harness_failing_encoder(motion_camera());
        let input = source(&h, stream(&h.pipeline.camera, &[0, 100, 0, 100], 0));
        let (_tx, rx) = watch::channel(false);
        let mut d = Driver::new(&h.pipeline);
        d.run(&h.bus, &mut h.pipeline, &input, &rx).unwrap();
        assert!(h.pipeline.finish);
        assert_eq!(h.video_pipe.frames().len(), 2);
    }

    #[test]
    fn run_honours_stop_signal() {
        let mut h = testing::harness(motion_camera());
        let input = source(&h, stream(&h.pipeline.camera, &[1, 2], 0));
        let (tx, rx) = watch::channel(false);
        tx.send_replace(true);
        let mut d = Driver::new(&h.pipeline);
        d.run(&h.bus, &mut h.pipeline, &input, &rx).unwrap();
        assert!(h.video_pipe.frames().is_empty());
        assert_eq!(h.live.log.calls(), vec![SinkCall::Stop]);
    }

    #[test]
    fn run_stops_while_input_is_idle() {
        let mut h = testing::harness(motion_camera());
        let (_hold, stalled) = crossbeam::channel::bounded::<()>(0);
        let frames = stream(&h.pipeline.camera, &[0, 100], 0);
        let input = source(&h, frames.chain(Stalled(stalled)));
        let (tx, rx) = watch::channel(false);
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            tx.send_replace(true);
        });

        let started = Instant::now();
        let mut d = Driver::new(&h.pipeline);
        d.run(&h.bus, &mut h.pipeline, &input, &rx).unwrap();
        stopper.join().unwrap();

        assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
        assert_eq!(h.video_pipe.frames().len(), 2);
        // The episode opened by the second frame is closed on the way out.
        assert_eq!(h.encoder.closes(), 1);
        assert!(h.commands.lines().contains(&"end".to_string()));
        assert_eq!(h.live.log.calls(), vec![SinkCall::Stop]);
    }

    #[test]
    fn unopenable_input_fails_after_shutdown() {
        let mut h = testing::harness(motion_camera());
        let missing = h.dir.path().join("no-such-device");
        let len = h.pipeline.sessions.geometry().frame_len();
        let input = FrameSource::open(1, missing, len).unwrap();
        let (_tx, rx) = watch::channel(false);
        let mut d = Driver::new(&h.pipeline);
        let err = d.run(&h.bus, &mut h.pipeline, &input, &rx).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to open input"));
        assert_eq!(h.live.log.calls(), vec![SinkCall::Stop]);
    }

    #[test]
    fn read_error_ends_the_run() {
        let mut h = testing::harness(motion_camera());
        let frames = stream(&h.pipeline.camera, &[3], 0);
        let input = source(&h, frames.chain(Broken));
        let (_tx, rx) = watch::channel(false);
        let mut d = Driver::new(&h.pipeline);
        let err = d.run(&h.bus, &mut h.pipeline, &input, &rx).unwrap_err();
        assert!(format!("{err:#}").contains("device gone"));
        assert_eq!(h.video_pipe.frames().len(), 1);
    }

    #[test]
    fn failing_pipes_do_not_disturb_the_episode() {
        let mut h = testing::harness_failing_pipes(motion_camera());
        drive(&mut h, &[(0, sec(0)), (100, sec(1))]);
        assert_eq!(h.video_pipe.frames().len(), 2);
        assert_eq!(h.pipeline.event_nr, 1);
        assert_eq!(h.encoder.opens(), 1);
    }

    #[test]
    fn slots_are_disabled_by_zero_interval() {
        assert_eq!(slot(sec(5), 0), None);
        assert_eq!(slot(sec(5), 1), Some(sec(5).timestamp()));
    }
}
