/// Movie handlers: episode recordings and the timelapse.
///
/// The episode roles open on FIRSTMOTION, take one frame per IMAGE_DETECTED
/// and close on ENDMOTION. The timelapse opens on its first tick and stays
/// open across episodes until TIMELAPSEEND. Every successful open is announced
/// with FILECREATE and every close with FILECLOSE.
use anyhow::Result;
use chrono::{DateTime, Local};
use std::path::PathBuf;

use crate::bus::EventBus;
use crate::encoder::{movie_fps, Role, TIMELAPSE_FPS};
use crate::event::{EventTag, FileType, Notification};
use crate::pipeline::Pipeline;
use crate::session::OpenOutcome;

pub const DEFAULT_MOVIE_TEMPLATE: &str = "%v-%Y%m%d%H%M%S";
pub const DEFAULT_TIMELAPSE_TEMPLATE: &str = "%Y%m%d-timelapse";

fn classifier(role: Role) -> FileType {
    match role {
        Role::NewRecording => FileType::MOVIE,
        Role::MotionOnly => FileType::MOVIE_MOTION,
        Role::Timelapse => FileType::MOVIE_TIMELAPSE,
    }
}

/// Opens `role` at `path` and announces the new file. An encoder that cannot
/// be opened stops the camera; returns false in that case.
fn open_and_announce(
    bus: &EventBus,
    p: &mut Pipeline,
    role: Role,
    path: PathBuf,
    fps: u32,
    time: DateTime<Local>,
) -> bool {
    match p.sessions.open(role, path, fps, p.camera.movie_bps, p.camera.movie_vbr) {
        Ok(OpenOutcome::Opened(path)) => {
            let created = Notification::new(EventTag::FILE_CREATE)
                .with_file(&path, classifier(role))
                .at(time);
            bus.publish(p, &created);
            true
        }
        Ok(OpenOutcome::AlreadyOpen) => true,
        Err(e) => {
            log::error!("[encoder] Camera {}: {e:#}; stopping camera", p.camera.id);
            p.finish = true;
            false
        }
    }
}

fn movie_path(
    p: &Pipeline,
    template: Option<&str>,
    default: &str,
    suffix: &str,
    time: &DateTime<Local>,
) -> PathBuf {
    p.artifact_path(template, default, suffix, p.sessions.extension(), time)
}

fn close_and_announce(bus: &EventBus, p: &mut Pipeline, role: Role, time: DateTime<Local>) {
    if let Some(closed) = p.sessions.close(role) {
        if closed.frames == 0 {
            log::warn!("[encoder] Camera {}: {} has no frames", p.camera.id, closed.path.display());
        }
        let n = Notification::new(EventTag::FILE_CLOSE)
            .with_file(&closed.path, classifier(role))
            .at(time);
        bus.publish(p, &n);
    }
}

fn feed(p: &mut Pipeline, role: Role, frame: &[u8]) {
    if let Err(e) = p.sessions.feed(role, frame) {
        let path = p.sessions.path(role).map(|f| f.display().to_string()).unwrap_or_default();
        log::error!("[encoder] Camera {} {role:?} {path}: {e:#}", p.camera.id);
    }
}

pub fn open_episode_movies(bus: &EventBus, p: &mut Pipeline, n: &Notification<'_>) -> Result<()> {
    let time = n.time.unwrap_or(p.current_time);
    let fps = movie_fps(p.camera.low_cpu, p.camera.frame_limit, p.last_rate);
    let wanted = [
        (Role::NewRecording, p.camera.movie_new, ""),
        (Role::MotionOnly, p.camera.movie_motion, "m"),
    ];
    for (role, enabled, suffix) in wanted {
        if !enabled || p.sessions.is_open(role) {
            continue;
        }
        let template = p.camera.movie_filename.as_deref();
        let path = movie_path(p, template, DEFAULT_MOVIE_TEMPLATE, suffix, &time);
        if !open_and_announce(bus, p, role, path, fps, time) {
            break;
        }
    }
    Ok(())
}

/// The recording gets the captured frame, the motion movie the motion image
/// (or the frame when there is none).
pub fn feed_episode_movies(_: &EventBus, p: &mut Pipeline, n: &Notification<'_>) -> Result<()> {
    let Some(frame) = n.frame else {
        return Ok(());
    };
    feed(p, Role::NewRecording, frame);
    if p.sessions.is_open(Role::MotionOnly) {
        let motion = p.motion_image.take();
        feed(p, Role::MotionOnly, motion.as_deref().unwrap_or(frame));
        p.motion_image = motion;
    }
    Ok(())
}

pub fn close_episode_movies(bus: &EventBus, p: &mut Pipeline, n: &Notification<'_>) -> Result<()> {
    let time = n.time.unwrap_or(p.current_time);
    close_and_announce(bus, p, Role::NewRecording, time);
    close_and_announce(bus, p, Role::MotionOnly, time);
    Ok(())
}

pub fn timelapse_frame(bus: &EventBus, p: &mut Pipeline, n: &Notification<'_>) -> Result<()> {
    let Some(frame) = n.frame else {
        return Ok(());
    };
    let time = n.time.unwrap_or(p.current_time);
    if !p.sessions.is_open(Role::Timelapse) {
        let template = p.camera.timelapse_filename.as_deref();
        let path = movie_path(p, template, DEFAULT_TIMELAPSE_TEMPLATE, "", &time);
        if !open_and_announce(bus, p, Role::Timelapse, path, TIMELAPSE_FPS, time) {
            return Ok(());
        }
    }
    feed(p, Role::Timelapse, frame);
    Ok(())
}

pub fn close_timelapse(bus: &EventBus, p: &mut Pipeline, n: &Notification<'_>) -> Result<()> {
    let time = n.time.unwrap_or(p.current_time);
    close_and_announce(bus, p, Role::Timelapse, time);
    Ok(())
}
