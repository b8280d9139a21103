/// Downstream frame sinks: pass-through pipe devices and the live feed.
use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

use crate::bus::EventBus;
use crate::event::{EventTag, Notification};
use crate::pipeline::Pipeline;

pub trait FrameSink: Send {
    fn push(&mut self, frame: &[u8]) -> Result<()>;
    /// Called once when the pipeline stops.
    fn stop(&mut self) {}
}

/// Loopback or FIFO device fed one raw frame per write.
pub struct PipeDevice {
    path: PathBuf,
    file: File,
}

impl PipeDevice {
    /// Opens `path` for non-blocking writes. A FIFO needs a reader already
    /// attached, otherwise this fails.
    pub fn open(path: &Path) -> Result<Self> {
        let mut opts = OpenOptions::new();
        opts.write(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.custom_flags(libc::O_NONBLOCK);
        }
        let file = opts
            .open(path)
            .with_context(|| format!("Failed to open video pipe {}", path.display()))?;
        log::info!("[pipe] Opened video pipe {}", path.display());
        Ok(Self { path: path.to_path_buf(), file })
    }
}

impl FrameSink for PipeDevice {
    fn push(&mut self, frame: &[u8]) -> Result<()> {
        match self.file.write(frame) {
            Ok(n) if n < frame.len() => {
                log::debug!("[pipe] Short write to {}: {n}/{}", self.path.display(), frame.len());
                Ok(())
            }
            Ok(_) => Ok(()),
            // Reader is slow; drop this frame rather than wait.
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to write to {}", self.path.display())),
        }
    }
}

/// Most recent frame; `None` once the pipeline has stopped.
pub type LiveFrame = Option<Arc<[u8]>>;

/// Latest-frame channel that streaming front ends subscribe to.
pub struct LiveFeed {
    tx: watch::Sender<LiveFrame>,
}

impl LiveFeed {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<LiveFrame> {
        self.tx.subscribe()
    }
}

impl Default for LiveFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSink for LiveFeed {
    fn push(&mut self, frame: &[u8]) -> Result<()> {
        self.tx.send_replace(Some(Arc::from(frame)));
        Ok(())
    }

    fn stop(&mut self) {
        self.tx.send_replace(None);
    }
}

/// Forwards IMAGE frames to the video pipe and IMAGEM frames to the motion pipe.
pub fn pipe_put(_: &EventBus, p: &mut Pipeline, n: &Notification<'_>) -> Result<()> {
    let Some(frame) = n.frame else {
        return Ok(());
    };
    let id = p.camera.id;
    let sink = if n.tag.intersects(EventTag::IMAGE) {
        p.outputs.video_pipe.as_mut()
    } else {
        p.outputs.motion_pipe.as_mut()
    };
    if let Some(sink) = sink {
        if let Err(e) = sink.push(frame) {
            log::warn!("[pipe] Camera {id}: {e:#}");
        }
    }
    Ok(())
}

pub fn live_put(_: &EventBus, p: &mut Pipeline, n: &Notification<'_>) -> Result<()> {
    if let (Some(live), Some(frame)) = (p.outputs.live.as_mut(), n.frame) {
        if let Err(e) = live.push(frame) {
            log::warn!("[live] Camera {}: {e:#}", p.camera.id);
        }
    }
    Ok(())
}

pub fn live_stop(_: &EventBus, p: &mut Pipeline, _: &Notification<'_>) -> Result<()> {
    if let Some(live) = p.outputs.live.as_mut() {
        live.stop();
        log::info!("[live] Camera {}: feed stopped", p.camera.id);
    }
    Ok(())
}
