//! Decoding through FFmpeg, for MP4 and anything else libav can read

use crate::error::{CatResult, Error};
use crate::frame::{Frame, ImgVec, RGBA8};
use crate::source::FrameSource;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling;
use ffmpeg::util::frame::video::Video;
use log::{debug, trace};
use std::path::Path;

struct Decoding {
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    stream_index: usize,
    /// Made on the first frame, when the pixel format is known for sure
    scaler: Option<(scaling::Context, Pixel, u32, u32)>,
    decoded: Video,
    rgba: Video,
    eof_sent: bool,
}

pub struct FfmpegSource {
    /// `None` once closed
    state: Option<Decoding>,
    fps: f64,
    frames: Option<u64>,
    next_index: usize,
}

impl FfmpegSource {
    pub fn open(path: &Path) -> CatResult<Self> {
        let open_failed = |msg: &str, e: ffmpeg::Error| Error::OpenFailed(format!("{}: {msg} ({e})", path.display()));

        ffmpeg::init().map_err(|e| open_failed("Unable to initialize ffmpeg", e))?;
        let input = ffmpeg::format::input(&path).map_err(|e| open_failed("Unable to open video file", e))?;

        let (stream_index, fps, frames, parameters) = {
            let stream = input.streams().best(ffmpeg::media::Type::Video)
                .ok_or_else(|| Error::OpenFailed(format!("{}: The file has no video tracks", path.display())))?;
            let mut rate = stream.avg_frame_rate();
            if rate.numerator() == 0 {
                rate = stream.rate();
            }
            let fps = if rate.denominator() == 0 { 0. } else { f64::from(rate) };
            let frames = u64::try_from(stream.frames()).ok().filter(|&n| n > 0);
            (stream.index(), fps, frames, stream.parameters())
        };

        let decoder = ffmpeg::codec::context::Context::from_parameters(parameters)
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| open_failed("Unable to decode the codec used in the video", e))?;
        debug!("{}: {}×{} at {fps} fps, {frames:?} frames", path.display(), decoder.width(), decoder.height());

        Ok(Self {
            state: Some(Decoding {
                input,
                decoder,
                stream_index,
                scaler: None,
                decoded: Video::empty(),
                rgba: Video::empty(),
                eof_sent: false,
            }),
            fps,
            frames,
            next_index: 0,
        })
    }
}

impl Decoding {
    /// Next decoded picture in display order, or `false` at the end
    fn decode_next(&mut self) -> CatResult<bool> {
        loop {
            match received(self.decoder.receive_frame(&mut self.decoded), self.eof_sent)? {
                Received::Frame => return Ok(true),
                Received::End => return Ok(false),
                Received::NeedsInput => {},
            }

            let mut packet = None;
            for (stream, p) in self.input.packets() {
                if stream.index() == self.stream_index {
                    packet = Some(p);
                    break;
                }
            }
            match packet {
                Some(packet) => self.decoder.send_packet(&packet)
                    .map_err(|e| Error::Decode(format!("Corrupted video data: {e}")))?,
                None => {
                    self.decoder.send_eof().map_err(|e| Error::Decode(e.to_string()))?;
                    self.eof_sent = true;
                },
            }
        }
    }

    fn to_rgba(&mut self) -> CatResult<ImgVec<RGBA8>> {
        let (format, width, height) = (self.decoded.format(), self.decoded.width(), self.decoded.height());
        let scaler = match &mut self.scaler {
            Some((scaler, f, w, h)) if (*f, *w, *h) == (format, width, height) => scaler,
            slot => {
                let scaler = scaling::Context::get(format, width, height, Pixel::RGBA, width, height, scaling::Flags::BILINEAR)
                    .map_err(|e| Error::Decode(format!("Unsupported pixel format {format:?}: {e}")))?;
                &mut slot.insert((scaler, format, width, height)).0
            },
        };
        scaler.run(&self.decoded, &mut self.rgba).map_err(|e| Error::Decode(e.to_string()))?;

        let (width, height) = (width as usize, height as usize);
        let stride = self.rgba.stride(0);
        let data = self.rgba.data(0);
        let mut pixels = Vec::new();
        pixels.try_reserve_exact(width * height)?;
        for row in data.chunks(stride).take(height) {
            pixels.extend(row[..width * 4].chunks_exact(4).map(|c| RGBA8::new(c[0], c[1], c[2], c[3])));
        }
        if pixels.len() != width * height {
            return Err(Error::Decode("Decoded frame is truncated".into()));
        }
        Ok(ImgVec::new(pixels, width, height))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Received {
    Frame,
    NeedsInput,
    End,
}

/// Only `EAGAIN` before the end of input means the decoder wants another packet
fn received(res: Result<(), ffmpeg::Error>, eof_sent: bool) -> CatResult<Received> {
    match res {
        Ok(()) => Ok(Received::Frame),
        Err(ffmpeg::Error::Eof) => Ok(Received::End),
        Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::util::error::EAGAIN && !eof_sent => Ok(Received::NeedsInput),
        Err(e) => Err(Error::Decode(format!("Video decoding failed: {e}"))),
    }
}

impl FrameSource for FfmpegSource {
    fn frame_rate(&self) -> f64 {
        self.fps
    }

    fn total_frames(&self) -> Option<u64> {
        self.frames
    }

    fn next_frame(&mut self) -> CatResult<Option<Frame>> {
        let Some(state) = self.state.as_mut() else {
            return Ok(None);
        };
        if !state.decode_next()? || state.decoded.width() == 0 {
            return Ok(None);
        }
        let image = state.to_rgba()?;
        let index = self.next_index;
        self.next_index += 1;
        trace!("decoded frame {}", index + 1);
        Ok(Some(Frame::new(index, image)))
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            debug!("closed video after {} frames", self.next_index);
        }
    }
}
