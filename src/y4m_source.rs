//! Native decoder for uncompressed YUV4MPEG2 streams, which need no ffmpeg

use crate::error::{CatResult, Error};
use crate::frame::{Frame, ImgVec, RGBA8};
use crate::source::FrameSource;
use log::debug;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use y4m::{Colorspace, Decoder};
use yuv::color::{MatrixCoefficients, Range};
use yuv::convert::RGBConvert;
use yuv::YUV;

enum Samp {
    Mono,
    S1x1,
    S2x1,
    S2x2,
}

pub struct Y4MSource {
    decoder: Option<Decoder<Box<dyn Read>>>,
    fps: f64,
    file_size: u64,
    width: usize,
    height: usize,
    samp: Samp,
    conv: Option<RGBConvert<u8>>,
    next_index: usize,
}

impl Y4MSource {
    pub fn open(path: &Path) -> CatResult<Self> {
        let file = File::open(path)
            .map_err(|e| Error::OpenFailed(format!("Can't read {}: {}", path.display(), e)))?;
        let file_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        Self::new(Box::new(BufReader::new(file)), file_size)
            .map_err(|e| match e {
                Error::OpenFailed(msg) => Error::OpenFailed(format!("{}: {}", path.display(), msg)),
                other => other,
            })
    }

    /// `file_size` is only used to estimate the number of frames
    pub fn new(reader: Box<dyn Read>, file_size: u64) -> CatResult<Self> {
        let decoder = Decoder::new(reader)
            .map_err(|e| Error::OpenFailed(format!("Not a valid Y4M file ({e})")))?;

        let rate = decoder.get_framerate();
        // den = 0 makes it NaN or infinite, which is rejected later
        let fps = rate.num as f64 / rate.den as f64;
        let width = decoder.get_width();
        let height = decoder.get_height();
        if width == 0 || width > u16::MAX as _ || height == 0 || height > u16::MAX as _ {
            return Err(Error::OpenFailed(format!("Unsupported video size {width}×{height}")));
        }

        let raw_params_str = String::from_utf8_lossy(decoder.get_raw_params()).into_owned();
        let range = raw_params_str.split_once("COLORRANGE=").map(|(_, r)| {
            if r.starts_with("LIMIT") { Range::Limited } else { Range::Full }
        });
        let sd_or_hd = if height <= 480 && width <= 720 { MatrixCoefficients::BT601 } else { MatrixCoefficients::BT709 };

        let unsupported = |mode: &str| Err(Error::OpenFailed(format!("Y4M with {mode} is not supported yet")));
        let (samp, conv) = match decoder.get_colorspace() {
            Colorspace::Cmono => (Samp::Mono, None),
            Colorspace::C420 => (Samp::S2x2, Some((range.unwrap_or(Range::Limited), MatrixCoefficients::BT601))),
            Colorspace::C420jpeg => (Samp::S2x2, Some((range.unwrap_or(Range::Full), MatrixCoefficients::BT601))),
            Colorspace::C420paldv => (Samp::S2x2, Some((range.unwrap_or(Range::Limited), MatrixCoefficients::BT601))),
            Colorspace::C420mpeg2 => (Samp::S2x2, Some((range.unwrap_or(Range::Limited), sd_or_hd))),
            Colorspace::C422 => (Samp::S2x1, Some((range.unwrap_or(Range::Limited), sd_or_hd))),
            Colorspace::C444 => (Samp::S1x1, Some((range.unwrap_or(Range::Full), MatrixCoefficients::BT709))),
            Colorspace::Cmono12 => return unsupported("Cmono12"),
            Colorspace::C420p10 => return unsupported("C420p10"),
            Colorspace::C420p12 => return unsupported("C420p12"),
            Colorspace::C422p10 => return unsupported("C422p10"),
            Colorspace::C422p12 => return unsupported("C422p12"),
            Colorspace::C444p10 => return unsupported("C444p10"),
            Colorspace::C444p12 => return unsupported("C444p12"),
            _ => return Err(Error::OpenFailed(format!("Y4M uses unsupported color mode {raw_params_str}"))),
        };
        let conv = match conv {
            Some((range, matrix)) => Some(RGBConvert::<u8>::new(range, matrix)
                .map_err(|e| Error::OpenFailed(format!("Unsupported Y4M color conversion: {e:?}")))?),
            None => None,
        };

        debug!("y4m {width}×{height} at {fps} fps ({raw_params_str})");
        Ok(Self {
            decoder: Some(decoder),
            fps,
            file_size,
            width,
            height,
            samp,
            conv,
            next_index: 0,
        })
    }

    fn frame_size_in_bytes(&self) -> u64 {
        let luma = (self.width * self.height) as u64;
        let chroma = match self.samp {
            Samp::Mono => 0,
            Samp::S1x1 => luma,
            Samp::S2x1 => (((self.width + 1) / 2) * self.height) as u64,
            Samp::S2x2 => (((self.width + 1) / 2) * ((self.height + 1) / 2)) as u64,
        };
        // "FRAME\n"
        luma + 2 * chroma + 6
    }
}

/// Converts the planes to RGBA. `None` when the planes don't add up to a full frame.
fn to_rgba(samp: &Samp, conv: Option<&RGBConvert<u8>>, width: usize, height: usize, y: &[u8], u: &[u8], v: &[u8]) -> CatResult<Option<Vec<RGBA8>>> {
    if y.is_empty() || v.len() != u.len() {
        return Ok(None);
    }

    let mut out = Vec::new();
    out.try_reserve(width * height)?;
    match (samp, conv) {
        (Samp::Mono, _) => {
            out.extend(y.iter().map(|&y| RGBA8::new(y, y, y, 255)));
        },
        (Samp::S1x1, Some(conv)) => {
            if v.len() != y.len() {
                return Ok(None);
            }
            let y = y.chunks_exact(width);
            let u = u.chunks_exact(width);
            let v = v.chunks_exact(width);
            for (y, (u, v)) in y.zip(u.zip(v)) {
                out.extend(
                    y.iter().copied().zip(u.iter().copied().zip(v.iter().copied()))
                    .map(|(y, (u, v))| conv.to_rgb(YUV { y, u, v }).with_alpha(255)));
            }
        },
        (Samp::S2x1, Some(conv)) => {
            let y = y.chunks_exact(width);
            let u = u.chunks_exact((width + 1) / 2);
            let v = v.chunks_exact((width + 1) / 2);
            for (y, (u, v)) in y.zip(u.zip(v)) {
                let u = u.iter().copied().flat_map(|x| [x, x]);
                let v = v.iter().copied().flat_map(|x| [x, x]);
                out.extend(
                    y.iter().copied().zip(u.zip(v))
                    .map(|(y, (u, v))| conv.to_rgb(YUV { y, u, v }).with_alpha(255)));
            }
        },
        (Samp::S2x2, Some(conv)) => {
            let y = y.chunks_exact(width);
            let u = u.chunks_exact((width + 1) / 2).flat_map(|r| [r, r]);
            let v = v.chunks_exact((width + 1) / 2).flat_map(|r| [r, r]);
            for (y, (u, v)) in y.zip(u.zip(v)) {
                let u = u.iter().copied().flat_map(|x| [x, x]);
                let v = v.iter().copied().flat_map(|x| [x, x]);
                out.extend(
                    y.iter().copied().zip(u.zip(v))
                    .map(|(y, (u, v))| conv.to_rgb(YUV { y, u, v }).with_alpha(255)));
            }
        },
        (_, None) => return Err(Error::Decode("Y4M color conversion is missing".into())),
    }

    if out.len() != width * height {
        return Ok(None);
    }
    Ok(Some(out))
}

impl FrameSource for Y4MSource {
    fn frame_rate(&self) -> f64 {
        self.fps
    }

    fn total_frames(&self) -> Option<u64> {
        // "YUV4MPEG2 " + params + "\n"
        let header_len = self.decoder.as_ref()?.get_raw_params().len() as u64 + 11;
        Some(self.file_size.saturating_sub(header_len) / self.frame_size_in_bytes())
    }

    fn next_frame(&mut self) -> CatResult<Option<Frame>> {
        let Self { decoder, width, height, samp, conv, next_index, .. } = self;
        let Some(decoder) = decoder.as_mut() else {
            return Ok(None);
        };
        let pixels = match decoder.read_frame() {
            Ok(frame) => to_rgba(samp, conv.as_ref(), *width, *height, frame.get_y_plane(), frame.get_u_plane(), frame.get_v_plane())?,
            Err(y4m::Error::EOF) => return Ok(None),
            Err(y4m::Error::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(Error::Decode(format!("Can't decode Y4M frame {}: {}", *next_index + 1, e))),
        };

        let Some(pixels) = pixels else {
            debug!("y4m frame {} is incomplete; treating it as the end", *next_index + 1);
            return Ok(None);
        };
        let frame = Frame::new(*next_index, ImgVec::new(pixels, *width, *height));
        *next_index += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) {
        if self.decoder.take().is_some() {
            debug!("closed y4m decoder after {} frames", self.next_index);
        }
    }
}

impl Drop for Y4MSource {
    fn drop(&mut self) {
        self.close();
    }
}
