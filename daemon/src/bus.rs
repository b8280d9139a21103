/// Masked publish/subscribe dispatch.
///
/// Registrations are scanned in order on every publish and each one whose mask
/// intersects the notification's tag runs to completion before the next. A
/// handler may publish again; the nested dispatch finishes before the outer
/// loop continues. A failing or panicking handler is logged and skipped.
use anyhow::Result;
use std::panic::{self, AssertUnwindSafe};

use crate::event::{EventTag, Notification};
use crate::pipeline::Pipeline;
use crate::{artifacts, commands, movie, sinks};

/// Outer publish plus two levels of derived events.
pub const MAX_DISPATCH_DEPTH: u32 = 3;

pub type Handler = dyn Fn(&EventBus, &mut Pipeline, &Notification<'_>) -> Result<()> + Send + Sync;

struct Registration {
    mask: EventTag,
    name: &'static str,
    handler: Box<Handler>,
}

pub struct EventBus {
    registrations: Vec<Registration>,
}

impl EventBus {
    pub fn new() -> Self {
        Self { registrations: Vec::new() }
    }

    pub fn register<F>(&mut self, mask: EventTag, name: &'static str, handler: F)
    where
        F: Fn(&EventBus, &mut Pipeline, &Notification<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.registrations.push(Registration { mask, name, handler: Box::new(handler) });
    }

    /// The daemon's handler table.
    pub fn standard() -> Self {
        let mut bus = Self::new();
        bus.register(EventTag::FILE_CREATE, "newfile", commands::log_new_file);
        bus.register(EventTag::FILE_CREATE, "file_create_command", commands::file_create_command);
        bus.register(EventTag::FILE_CREATE, "database", artifacts::database_insert);
        bus.register(EventTag::MOTION, "beep", commands::beep);
        bus.register(EventTag::MOTION, "motion_command", commands::motion_command);
        bus.register(EventTag::FIRST_MOTION, "event_start_command", commands::event_start_command);
        bus.register(EventTag::END_MOTION, "event_end_command", commands::event_end_command);
        bus.register(EventTag::IMAGE_DETECTED, "image_save", artifacts::save_detected_images);
        bus.register(EventTag::IMAGE_SNAPSHOT, "snapshot", artifacts::save_snapshot);
        bus.register(EventTag::IMAGE | EventTag::IMAGEM, "pipe", sinks::pipe_put);
        bus.register(EventTag::WEBCAM, "live_put", sinks::live_put);
        bus.register(EventTag::FIRST_MOTION, "movie_open", movie::open_episode_movies);
        bus.register(EventTag::IMAGE_DETECTED, "movie_feed", movie::feed_episode_movies);
        bus.register(EventTag::END_MOTION, "movie_close", movie::close_episode_movies);
        bus.register(EventTag::TIMELAPSE, "timelapse", movie::timelapse_frame);
        bus.register(EventTag::TIMELAPSE_END, "timelapse_close", movie::close_timelapse);
        bus.register(EventTag::FILE_CLOSE, "movie_end_command", commands::movie_end_command);
        bus.register(EventTag::STOP, "live_stop", sinks::live_stop);
        bus
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Names of the handlers `tag` would reach, in dispatch order.
    #[cfg(test)]
    pub fn handlers_for(&self, tag: EventTag) -> Vec<&'static str> {
        self.registrations
            .iter()
            .filter(|r| r.mask.intersects(tag))
            .map(|r| r.name)
            .collect()
    }

    pub fn publish(&self, pipeline: &mut Pipeline, n: &Notification<'_>) {
        if pipeline.dispatch_depth >= MAX_DISPATCH_DEPTH {
            log::error!(
                "[bus] Dropping event {} for camera {}: nested too deeply",
                n.tag,
                pipeline.camera.id
            );
            return;
        }
        pipeline.dispatch_depth += 1;
        for r in self.registrations.iter().filter(|r| r.mask.intersects(n.tag)) {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (r.handler)(self, pipeline, n)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::error!("[bus] Handler '{}' failed on event {}: {e:#}", r.name, n.tag)
                }
                Err(_) => log::error!("[bus] Handler '{}' panicked on event {}", r.name, n.tag),
            }
        }
        pipeline.dispatch_depth -= 1;
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
