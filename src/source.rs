//! Reading frames out of video files
//!
//! A source is a decode session bound to one file. Frames come out in decode order,
//! one per [`FrameSource::next_frame`] call, and the sequence can't be restarted.

use crate::error::{CatResult, Error};
use crate::frame::Frame;
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub trait FrameSource {
    /// Frames per second, as reported by the container. May be garbage; see [`delay_ms_for_fps`].
    fn frame_rate(&self) -> f64;

    /// Estimate, if the container knows it
    fn total_frames(&self) -> Option<u64> {
        None
    }

    /// Decodes the frame at the current position and advances past it.
    ///
    /// `Ok(None)` is the end of usable data. That includes a frame that came out empty or truncated.
    fn next_frame(&mut self) -> CatResult<Option<Frame>>;

    /// Releases the decoder. Can be called any number of times, and `next_frame` returns `Ok(None)` afterwards.
    fn close(&mut self);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    #[inline]
    fn frame_rate(&self) -> f64 {
        (**self).frame_rate()
    }

    #[inline]
    fn total_frames(&self) -> Option<u64> {
        (**self).total_frames()
    }

    #[inline]
    fn next_frame(&mut self) -> CatResult<Option<Frame>> {
        (**self).next_frame()
    }

    #[inline]
    fn close(&mut self) {
        (**self).close()
    }
}

/// Display time of a single frame at the given frame rate, `round(1000 / fps)`.
///
/// Containers sometimes report 0 or NaN, which would make the delay meaningless.
pub fn delay_ms_for_fps(fps: f64) -> CatResult<u32> {
    if !fps.is_finite() || fps <= 0. {
        return Err(Error::DegenerateFrameRate(fps));
    }
    Ok((1000. / fps).round().min(f64::from(u32::MAX)) as u32)
}

#[derive(Debug, PartialEq, Eq)]
enum FileType {
    Y4M,
    Other,
}

fn file_type(path: &Path) -> CatResult<FileType> {
    let mut file = File::open(path)
        .map_err(|e| Error::OpenFailed(format!("Can't read {}: {}", path.display(), e)))?;
    let mut buf = [0; 10];
    if file.read_exact(&mut buf).is_err() {
        // too short to be anything we recognize
        return Ok(FileType::Other);
    }
    if &buf == b"YUV4MPEG2 " {
        return Ok(FileType::Y4M);
    }
    Ok(FileType::Other)
}

/// Opens a decode session for the file, picking the decoder by the file's signature rather than its name.
///
/// Anything that can't be decoded is `OpenFailed`, including files with a codec that isn't supported.
pub fn open(path: &Path) -> CatResult<Box<dyn FrameSource>> {
    match file_type(path)? {
        FileType::Y4M => Ok(Box::new(crate::y4m_source::Y4MSource::open(path)?)),
        FileType::Other => open_video(path),
    }
}

#[cfg(feature = "video")]
fn open_video(path: &Path) -> CatResult<Box<dyn FrameSource>> {
    Ok(Box::new(crate::ffmpeg_source::FfmpegSource::open(path)?))
}

#[cfg(not(feature = "video"))]
#[cold]
fn open_video(path: &Path) -> CatResult<Box<dyn FrameSource>> {
    Err(Error::OpenFailed(format!(r"{} is not a Y4M file, and other video formats are disabled in this build.

To enable video decoding you need to recompile vidgif with:
cargo build --release --features=video", path.display())))
}
