/// Video encoder collaborator: open/put/close over planar YUV 4:2:0 frames.
///
/// Built with the `ffmpeg` feature, movies are MPEG-4 in AVI through FFmpeg and
/// honour the configured bitrate or quality. Without it the bundled backend
/// writes uncompressed YUV4MPEG2 streams (`.y4m`), which every common
/// transcoder reads. Other backends only need to implement [`EncoderBackend`].
use anyhow::{bail, Context, Result};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::frame::YuvPlanes;

pub const MIN_MOVIE_FPS: u32 = 2;
pub const MAX_MOVIE_FPS: u32 = 30;
/// Playback rate of timelapse movies, independent of the capture rate.
pub const TIMELAPSE_FPS: u32 = 24;

/// Which recording an encoder session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Captured frames of the current episode.
    NewRecording,
    /// Motion images of the current episode.
    MotionOnly,
    /// One frame per timelapse tick, spanning many episodes.
    Timelapse,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::NewRecording, Role::MotionOnly, Role::Timelapse];

    pub(crate) fn index(self) -> usize {
        match self {
            Role::NewRecording => 0,
            Role::MotionOnly => 1,
            Role::Timelapse => 2,
        }
    }
}

/// Parameters used to open one output movie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderParams {
    pub role: Role,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Target bitrate in bits/s.
    pub bitrate: u32,
    /// Variable-bitrate quality; 0 means constant bitrate.
    pub vbr: u32,
}

/// Frame rate for an episode movie: the configured limit in low-CPU mode,
/// otherwise the rate measured over the last second, clamped to
/// [`MIN_MOVIE_FPS`, `MAX_MOVIE_FPS`].
pub fn movie_fps(low_cpu: bool, frame_limit: u32, last_rate: u32) -> u32 {
    let rate = if low_cpu { frame_limit } else { last_rate };
    rate.clamp(MIN_MOVIE_FPS, MAX_MOVIE_FPS)
}

/// Quantizer range accepted for variable-bitrate movies; 2 is best.
pub const MIN_VBR_QUALITY: u32 = 2;
pub const MAX_VBR_QUALITY: u32 = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateControl {
    /// Constant bitrate in bits/s.
    Bitrate(u32),
    /// Fixed quantizer in [`MIN_VBR_QUALITY`, `MAX_VBR_QUALITY`].
    Quality(u32),
}

impl fmt::Display for RateControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateControl::Bitrate(bps) => write!(f, "{bps} bps"),
            RateControl::Quality(q) => write!(f, "quality {q}"),
        }
    }
}

/// A non-zero `vbr` selects a fixed quantizer and overrides `bitrate`.
pub fn rate_control(bitrate: u32, vbr: u32) -> RateControl {
    if vbr == 0 {
        RateControl::Bitrate(bitrate)
    } else {
        RateControl::Quality(vbr.clamp(MIN_VBR_QUALITY, MAX_VBR_QUALITY))
    }
}

/// An open output movie.
pub trait VideoEncoder: Send {
    fn put(&mut self, planes: YuvPlanes<'_>) -> Result<()>;
    /// Flushes and finalizes the file.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Creates encoders.
pub trait EncoderBackend: Send {
    /// File extension appended to movie paths, without the dot.
    fn extension(&self) -> &str;
    fn open(&self, params: &EncoderParams) -> Result<Box<dyn VideoEncoder>>;
}

/// The backend this build ships with.
pub fn default_backend() -> Result<Box<dyn EncoderBackend>> {
    #[cfg(feature = "ffmpeg")]
    {
        Ok(Box::new(ffmpeg_backend::FfmpegBackend::new()?))
    }
    #[cfg(not(feature = "ffmpeg"))]
    {
        Ok(Box::new(Y4mBackend))
    }
}

// ── YUV4MPEG2 backend ─────────────────────────────────────────────────────────

#[cfg_attr(feature = "ffmpeg", allow(dead_code))]
#[derive(Debug, Default, Clone, Copy)]
pub struct Y4mBackend;

impl EncoderBackend for Y4mBackend {
    fn extension(&self) -> &str {
        "y4m"
    }

    fn open(&self, params: &EncoderParams) -> Result<Box<dyn VideoEncoder>> {
        Ok(Box::new(Y4mWriter::create(params)?))
    }
}

pub struct Y4mWriter {
    out: BufWriter<File>,
    luma_len: usize,
    chroma_len: usize,
    frames: u64,
}

impl Y4mWriter {
    pub fn create(params: &EncoderParams) -> Result<Self> {
        if params.fps == 0 {
            bail!("Frame rate must be non-zero");
        }
        create_parent_dir(&params.path)?;
        let file = File::create(&params.path)
            .with_context(|| format!("Failed to create movie file {}", params.path.display()))?;
        let mut out = BufWriter::new(file);
        writeln!(
            out,
            "YUV4MPEG2 W{} H{} F{}:1 Ip A1:1 C420jpeg",
            params.width, params.height, params.fps
        )?;
        log::debug!(
            "[encoder] {} is uncompressed; {} not applied",
            params.path.display(),
            rate_control(params.bitrate, params.vbr)
        );
        let luma_len = params.width as usize * params.height as usize;
        Ok(Self { out, luma_len, chroma_len: luma_len / 4, frames: 0 })
    }
}

impl VideoEncoder for Y4mWriter {
    fn put(&mut self, planes: YuvPlanes<'_>) -> Result<()> {
        if planes.y.len() != self.luma_len
            || planes.u.len() != self.chroma_len
            || planes.v.len() != self.chroma_len
        {
            bail!(
                "Plane sizes {}/{}/{} do not match the stream ({}/{})",
                planes.y.len(),
                planes.u.len(),
                planes.v.len(),
                self.luma_len,
                self.chroma_len
            );
        }
        self.out.write_all(b"FRAME\n")?;
        self.out.write_all(planes.y)?;
        self.out.write_all(planes.u)?;
        self.out.write_all(planes.v)?;
        self.frames += 1;
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.out.flush().context("Failed to flush movie file")?;
        self.out.get_ref().sync_all().context("Failed to sync movie file")?;
        log::debug!("[encoder] Closed stream after {} frames", self.frames);
        Ok(())
    }
}

// ── FFmpeg backend ────────────────────────────────────────────────────────────

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_backend {
    use anyhow::{anyhow, bail, Context, Result};
    use ffmpeg_next as ffmpeg;
    use ffmpeg::{codec, encoder, format, frame, Packet, Rational};

    use super::{create_parent_dir, rate_control, RateControl};
    use super::{EncoderBackend, EncoderParams, VideoEncoder};
    use crate::frame::YuvPlanes;

    /// Lambda units per quantizer step (`FF_QP2LAMBDA`).
    const QP2LAMBDA: usize = 118;
    const GOP_SIZE: u32 = 12;

    /// MPEG-4 Part 2 in AVI, the format every player handles.
    #[derive(Debug)]
    pub struct FfmpegBackend;

    impl FfmpegBackend {
        pub fn new() -> Result<Self> {
            ffmpeg::init().context("Failed to initialise FFmpeg")?;
            Ok(Self)
        }
    }

    impl EncoderBackend for FfmpegBackend {
        fn extension(&self) -> &str {
            "avi"
        }

        fn open(&self, params: &EncoderParams) -> Result<Box<dyn VideoEncoder>> {
            Ok(Box::new(FfmpegWriter::create(params)?))
        }
    }

    pub struct FfmpegWriter {
        output: format::context::Output,
        encoder: encoder::Video,
        width: u32,
        height: u32,
        encoder_time_base: Rational,
        stream_time_base: Rational,
        next_pts: i64,
    }

    impl FfmpegWriter {
        pub fn create(params: &EncoderParams) -> Result<Self> {
            if params.fps == 0 {
                bail!("Frame rate must be non-zero");
            }
            create_parent_dir(&params.path)?;
            let mut output = format::output(&params.path)
                .with_context(|| format!("Failed to create movie file {}", params.path.display()))?;
            let global_header = output.format().flags().contains(format::Flags::GLOBAL_HEADER);

            let codec = encoder::find(codec::Id::MPEG4)
                .ok_or_else(|| anyhow!("MPEG-4 encoder not available"))?;
            output.add_stream(codec).context("Failed to add video stream")?;

            let fps = i32::try_from(params.fps).context("Frame rate out of range")?;
            let time_base = Rational::new(1, fps);
            let mut video = codec::context::Context::new_with_codec(codec)
                .encoder()
                .video()
                .context("Failed to create video encoder")?;
            video.set_width(params.width);
            video.set_height(params.height);
            video.set_format(format::Pixel::YUV420P);
            video.set_time_base(time_base);
            video.set_frame_rate(Some(Rational::new(fps, 1)));
            video.set_gop(GOP_SIZE);

            let mut flags = codec::Flags::empty();
            match rate_control(params.bitrate, params.vbr) {
                RateControl::Bitrate(bps) => video.set_bit_rate(bps as usize),
                RateControl::Quality(q) => {
                    flags |= codec::Flags::QSCALE;
                    video.set_quality(q as usize * QP2LAMBDA);
                }
            }
            if global_header {
                flags |= codec::Flags::GLOBAL_HEADER;
            }
            video.set_flags(flags);

            let encoder = video.open_as(codec).context("Failed to open MPEG-4 encoder")?;
            {
                let mut stream = output
                    .stream_mut(0)
                    .ok_or_else(|| anyhow!("Video stream missing"))?;
                stream.set_parameters(&encoder);
                stream.set_time_base(time_base);
            }
            output.write_header().context("Failed to write movie header")?;
            let stream_time_base = output.stream(0).map_or(time_base, |s| s.time_base());

            Ok(Self {
                output,
                encoder,
                width: params.width,
                height: params.height,
                encoder_time_base: time_base,
                stream_time_base,
                next_pts: 0,
            })
        }

        fn write_packets(&mut self) -> Result<()> {
            let mut packet = Packet::empty();
            while self.encoder.receive_packet(&mut packet).is_ok() {
                packet.set_stream(0);
                packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
                packet.write_interleaved(&mut self.output).context("Failed to write packet")?;
            }
            Ok(())
        }
    }

    impl VideoEncoder for FfmpegWriter {
        fn put(&mut self, planes: YuvPlanes<'_>) -> Result<()> {
            let (w, h) = (self.width as usize, self.height as usize);
            let mut picture = frame::Video::new(format::Pixel::YUV420P, self.width, self.height);
            copy_plane(&mut picture, 0, planes.y, w, h)?;
            copy_plane(&mut picture, 1, planes.u, w / 2, h / 2)?;
            copy_plane(&mut picture, 2, planes.v, w / 2, h / 2)?;
            picture.set_pts(Some(self.next_pts));
            self.next_pts += 1;
            self.encoder.send_frame(&picture).context("Failed to encode frame")?;
            self.write_packets()
        }

        fn close(mut self: Box<Self>) -> Result<()> {
            self.encoder.send_eof().context("Failed to flush encoder")?;
            self.write_packets()?;
            self.output.write_trailer().context("Failed to finalize movie")?;
            log::debug!("[encoder] Closed stream after {} frames", self.next_pts);
            Ok(())
        }
    }

    /// Copies a tightly packed plane into the frame's strided buffer.
    fn copy_plane(
        picture: &mut frame::Video,
        index: usize,
        src: &[u8],
        width: usize,
        rows: usize,
    ) -> Result<()> {
        if width == 0 || src.len() != width * rows {
            bail!("Plane {index} is {} bytes, expected {width}x{rows}", src.len());
        }
        let stride = picture.stride(index);
        let dst = picture.data_mut(index);
        for (row, line) in src.chunks_exact(width).enumerate() {
            dst[row * stride..row * stride + width].copy_from_slice(line);
        }
        Ok(())
    }

}

pub(crate) fn create_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }
    Ok(())
}
