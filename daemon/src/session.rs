/// Encoder session manager: at most one open movie per [`Role`].
///
/// A session owns its encoder and, for grayscale sources, the placeholder
/// chroma it feeds alongside every luma plane. Both are released together when
/// the session closes, so a session can never feed from a buffer that belongs
/// to another role or that has already been freed.
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::encoder::{EncoderBackend, EncoderParams, Role, VideoEncoder};
use crate::frame::{split_planes, ChromaPlanes, ImageGeometry};

struct EncoderSession {
    params: EncoderParams,
    encoder: Box<dyn VideoEncoder>,
    chroma: Option<ChromaPlanes>,
    frames: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    /// A new movie was started at this path.
    Opened(PathBuf),
    /// The role already had an open movie; nothing changed.
    AlreadyOpen,
}

/// A movie that has just been finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedMovie {
    pub path: PathBuf,
    pub frames: u64,
}

pub struct SessionManager {
    backend: Box<dyn EncoderBackend>,
    geometry: ImageGeometry,
    slots: [Option<EncoderSession>; 3],
}

impl SessionManager {
    pub fn new(backend: Box<dyn EncoderBackend>, geometry: ImageGeometry) -> Self {
        Self { backend, geometry, slots: [None, None, None] }
    }

    pub fn geometry(&self) -> &ImageGeometry {
        &self.geometry
    }

    /// Extension the backend writes, e.g. `y4m`.
    pub fn extension(&self) -> &str {
        self.backend.extension()
    }

    pub fn is_open(&self, role: Role) -> bool {
        self.slots[role.index()].is_some()
    }

    pub fn path(&self, role: Role) -> Option<&Path> {
        self.slots[role.index()].as_ref().map(|s| s.params.path.as_path())
    }

    /// Conversion buffer owned by the role's session, if any.
    #[cfg(test)]
    pub fn conversion_buffer(&self, role: Role) -> Option<&ChromaPlanes> {
        self.slots[role.index()].as_ref().and_then(|s| s.chroma.as_ref())
    }

    /// Opens a movie for `role`. Opening an already-open role is a no-op.
    /// On failure the role stays closed and nothing is retained.
    pub fn open(
        &mut self,
        role: Role,
        path: PathBuf,
        fps: u32,
        bitrate: u32,
        vbr: u32,
    ) -> Result<OpenOutcome> {
        let slot = role.index();
        if self.slots[slot].is_some() {
            return Ok(OpenOutcome::AlreadyOpen);
        }

        let chroma = ChromaPlanes::for_geometry(&self.geometry);
        let params = EncoderParams {
            role,
            path,
            width: self.geometry.width,
            height: self.geometry.height,
            fps,
            bitrate,
            vbr,
        };
        let encoder = self
            .backend
            .open(&params)
            .with_context(|| format!("Error creating movie file {}", params.path.display()))?;

        log::info!("[encoder] {role:?} movie opened at {} fps: {}", fps, params.path.display());
        let path = params.path.clone();
        self.slots[slot] = Some(EncoderSession { params, encoder, chroma, frames: 0 });
        Ok(OpenOutcome::Opened(path))
    }

    /// Appends `frame` to the role's movie. Feeding a closed role does nothing.
    pub fn feed(&mut self, role: Role, frame: &[u8]) -> Result<()> {
        let geometry = self.geometry;
        let Some(session) = self.slots[role.index()].as_mut() else {
            return Ok(());
        };
        let planes = split_planes(frame, &geometry, session.chroma.as_ref())?;
        session
            .encoder
            .put(planes)
            .with_context(|| format!("Failed to write to {}", session.params.path.display()))?;
        session.frames += 1;
        Ok(())
    }

    /// Finalizes the role's movie and releases its buffers.
    /// Returns `None` when nothing was open.
    pub fn close(&mut self, role: Role) -> Option<ClosedMovie> {
        let session = self.slots[role.index()].take()?;
        let EncoderSession { params, encoder, chroma, frames } = session;
        if let Err(e) = encoder.close() {
            log::error!("[encoder] Failed to finalize {}: {e:#}", params.path.display());
        }
        drop(chroma);
        log::info!("[encoder] {role:?} movie closed ({frames} frames): {}", params.path.display());
        Some(ClosedMovie { path: params.path, frames })
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        for role in Role::ALL {
            if self.is_open(role) {
                log::warn!("[encoder] {role:?} movie still open at teardown; finalizing");
                self.close(role);
            }
        }
    }
}
