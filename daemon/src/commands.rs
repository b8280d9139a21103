/// Handlers that log artifacts and launch the user's `on_*` commands.
use anyhow::Result;
use std::io::Write;

use crate::bus::EventBus;
use crate::event::{FileType, Notification};
use crate::pipeline::Pipeline;

pub fn log_new_file(_: &EventBus, p: &mut Pipeline, n: &Notification<'_>) -> Result<()> {
    if let Some(path) = n.filename {
        log::info!(
            "[event] Camera {}: file of type {} saved to {}",
            p.camera.id,
            n.file_type,
            path.display()
        );
    }
    Ok(())
}

/// `on_picture_save` for stills, `on_movie_start` for movies.
pub fn file_create_command(_: &EventBus, p: &mut Pipeline, n: &Notification<'_>) -> Result<()> {
    let Some(path) = n.filename else {
        return Ok(());
    };
    let time = n.time.unwrap_or(p.current_time);
    if n.file_type.intersects(FileType::IMAGE_ANY) {
        p.run_command(p.camera.on_picture_save.as_deref(), Some(path), &time);
    }
    if n.file_type.intersects(FileType::MOVIE_ANY) {
        p.run_command(p.camera.on_movie_start.as_deref(), Some(path), &time);
    }
    Ok(())
}

/// Terminal bell on every motion frame unless `quiet`.
pub fn beep(_: &EventBus, p: &mut Pipeline, _: &Notification<'_>) -> Result<()> {
    if !p.quiet {
        let mut out = std::io::stdout();
        out.write_all(b"\x07")?;
        out.flush()?;
    }
    Ok(())
}

pub fn motion_command(_: &EventBus, p: &mut Pipeline, n: &Notification<'_>) -> Result<()> {
    let time = n.time.unwrap_or(p.current_time);
    p.run_command(p.camera.on_motion_detected.as_deref(), None, &time);
    Ok(())
}

pub fn event_start_command(_: &EventBus, p: &mut Pipeline, n: &Notification<'_>) -> Result<()> {
    let time = n.time.unwrap_or(p.current_time);
    p.run_command(p.camera.on_event_start.as_deref(), None, &time);
    Ok(())
}

pub fn event_end_command(_: &EventBus, p: &mut Pipeline, n: &Notification<'_>) -> Result<()> {
    let time = n.time.unwrap_or(p.current_time);
    p.run_command(p.camera.on_event_end.as_deref(), None, &time);
    Ok(())
}

/// `on_movie_end` with the finalized movie path.
pub fn movie_end_command(_: &EventBus, p: &mut Pipeline, n: &Notification<'_>) -> Result<()> {
    let Some(path) = n.filename else {
        return Ok(());
    };
    let time = n.time.unwrap_or(p.current_time);
    p.run_command(p.camera.on_movie_end.as_deref(), Some(path), &time);
    Ok(())
}
