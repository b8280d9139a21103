/// Still-image, snapshot and database writers.
use anyhow::Result;
use chrono::{DateTime, Local};
use std::path::Path;

use crate::bus::EventBus;
use crate::database::SecurityRecord;
use crate::event::{EventTag, FileType, Notification};
use crate::paths::LAST_SNAPSHOT_STEM;
use crate::pipeline::Pipeline;

pub const DEFAULT_IMAGE_TEMPLATE: &str = "%v-%Y%m%d%H%M%S-%q";
pub const DEFAULT_SNAPSHOT_TEMPLATE: &str = "%v-%Y%m%d%H%M%S-snapshot";

/// Inserts a `security` row for artifacts whose classifier is in the
/// configured mask.
pub fn database_insert(_: &EventBus, p: &mut Pipeline, n: &Notification<'_>) -> Result<()> {
    if p.outputs.database.is_none() || !n.file_type.intersects(p.sql_mask) {
        return Ok(());
    }
    let Some(path) = n.filename else {
        return Ok(());
    };
    let time = n.time.unwrap_or(p.current_time);
    let record = SecurityRecord {
        camera: p.camera.id as i32,
        filename: path.to_string_lossy().into_owned(),
        frame: p.shots as i32,
        file_type: n.file_type.bits() as i32,
        time_stamp: time.naive_local(),
        text_left: p.camera.text_left.clone(),
    };
    if let Some(db) = p.outputs.database.as_mut() {
        if let Err(e) = db.execute_insert(&record) {
            log::error!("[database] Camera {}: {e:#} ({})", p.camera.id, record.filename);
        }
    }
    Ok(())
}

/// Saves the motion image and then the current frame for a frame in a
/// motion episode.
pub fn save_detected_images(bus: &EventBus, p: &mut Pipeline, n: &Notification<'_>) -> Result<()> {
    let Some(frame) = n.frame else {
        return Ok(());
    };
    let time = n.time.unwrap_or(p.current_time);
    let ext = p.still_format.extension();
    let template = p.camera.jpeg_filename.clone();

    if p.camera.output_motion {
        if let Some(motion) = p.motion_image.take() {
            let path =
                p.artifact_path(template.as_deref(), DEFAULT_IMAGE_TEMPLATE, "m", ext, &time);
            save_picture(bus, p, &path, &motion, FileType::IMAGE_MOTION, time);
            p.motion_image = Some(motion);
        }
    }
    if p.camera.output_normal {
        let path = p.artifact_path(template.as_deref(), DEFAULT_IMAGE_TEMPLATE, "", ext, &time);
        save_picture(bus, p, &path, frame, FileType::IMAGE, time);
    }
    Ok(())
}

/// Writes a snapshot and points `lastsnap.<ext>` at it. A snapshot template
/// that renders to `lastsnap` overwrites that file directly instead.
pub fn save_snapshot(bus: &EventBus, p: &mut Pipeline, n: &Notification<'_>) -> Result<()> {
    let Some(frame) = n.frame else {
        return Ok(());
    };
    let time = n.time.unwrap_or(p.current_time);
    let ext = p.still_format.extension();
    let template = p
        .camera
        .snapshot_filename
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(DEFAULT_SNAPSHOT_TEMPLATE);
    let stem = p.render(template, &time);
    let latest = p.target_dir.join(format!("{LAST_SNAPSHOT_STEM}.{ext}"));

    if stem == LAST_SNAPSHOT_STEM {
        // Replace rather than write through an old link.
        remove_if_present(&latest);
        save_picture(bus, p, &latest, frame, FileType::IMAGE_SNAPSHOT, time);
    } else {
        let name = format!("{stem}.{ext}");
        let path = p.target_dir.join(&name);
        if save_picture(bus, p, &path, frame, FileType::IMAGE_SNAPSHOT, time) {
            remove_if_present(&latest);
            if let Err(e) = symlink(Path::new(&name), &latest) {
                log::error!("[snapshot] Could not link {} -> {name}: {e}", latest.display());
            }
        }
    }
    p.snapshot = false;
    Ok(())
}

/// Writes one still and announces it. Returns whether the file was written.
fn save_picture(
    bus: &EventBus,
    p: &mut Pipeline,
    path: &Path,
    frame: &[u8],
    file_type: FileType,
    time: DateTime<Local>,
) -> bool {
    match p.outputs.pictures.write(path, frame, file_type) {
        Ok(()) => {
            let created = Notification::new(EventTag::FILE_CREATE)
                .with_file(path, file_type)
                .at(time);
            bus.publish(p, &created);
            true
        }
        Err(e) => {
            log::error!("[picture] Camera {}: {e:#}", p.camera.id);
            false
        }
    }
}

fn remove_if_present(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("[snapshot] Could not remove {}: {e}", path.display());
        }
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    let dir = link.parent().unwrap_or(Path::new("."));
    std::fs::copy(dir.join(target), link).map(|_| ())
}
