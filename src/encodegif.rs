//! GIF output, one frame at a time
//!
//! Each frame is quantized to its own palette as soon as it arrives. From the second frame on,
//! what's already on screen is given to the quantizer as the background, so pixels that haven't
//! visibly changed become transparent and cost almost nothing.

use crate::error::{CatResult, Error};
use crate::frame::{Frame, ImgRef, ImgVec, RGBA8};
use crate::sink::{Delay, FrameSink};
use crate::Settings;
use imagequant::Attributes;
use log::{debug, trace};
use std::cell::Cell;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::rc::Rc;

struct CountingWriter<W> {
    writer: W,
    written: Rc<Cell<u64>>,
}

impl<W: Write> Write for CountingWriter<W> {
    #[inline(always)]
    fn write(&mut self, buf: &[u8]) -> Result<usize, std::io::Error> {
        let len = self.writer.write(buf)?;
        self.written.set(self.written.get() + len as u64);
        Ok(len)
    }

    #[inline(always)]
    fn flush(&mut self) -> Result<(), std::io::Error> {
        self.writer.flush()
    }
}

/// Streaming GIF encoder
///
/// The output is finished when [`FrameSink::finalize`] is called, or when the sink is dropped.
pub struct GifSink<W: Write> {
    /// Until the first frame gives the screen size
    writer: Option<W>,
    gif_enc: Option<gif::Encoder<CountingWriter<W>>>,
    written: Rc<Cell<u64>>,
    /// What the animation shows after the last written frame
    screen: Option<ImgVec<RGBA8>>,
    settings: Settings,
    default_delay_ms: u32,
    elapsed_ms: u64,
    elapsed_cs: u64,
    frames_written: usize,
    finalized: bool,
}

impl GifSink<BufWriter<File>> {
    /// Creates (or truncates) the file
    pub fn create(path: &Path, default_delay_ms: u32, settings: Settings) -> CatResult<Self> {
        let file = File::create(path)
            .map_err(|e| Error::CreateFailed(path.to_path_buf(), e))?;
        debug!("writing {} ({} ms per frame)", path.display(), default_delay_ms);
        Ok(Self::new(BufWriter::new(file), default_delay_ms, settings))
    }
}

impl<W: Write> GifSink<W> {
    /// `writer` can be anything, such as `File` or `&mut Vec<u8>`
    pub fn new(writer: W, default_delay_ms: u32, settings: Settings) -> Self {
        Self {
            writer: Some(writer),
            gif_enc: None,
            written: Rc::new(Cell::new(0)),
            screen: None,
            settings,
            default_delay_ms,
            elapsed_ms: 0,
            elapsed_cs: 0,
            frames_written: 0,
            finalized: false,
        }
    }

    /// GIF counts time in centiseconds. Rounding is done on the total elapsed time,
    /// so that e.g. 33ms frames alternate 3 and 4cs instead of drifting.
    fn delay_in_centiseconds(&mut self, delay_ms: u32) -> u16 {
        let end_ms = self.elapsed_ms + u64::from(delay_ms);
        let end_cs = (end_ms + 5) / 10;
        // 0 would mean "as fast as possible", which browsers slow down anyway
        let delay = end_cs.saturating_sub(self.elapsed_cs).clamp(1, u16::MAX.into()) as u16;
        self.elapsed_ms = end_ms;
        self.elapsed_cs += u64::from(delay);
        delay
    }

    /// `importance_map` says which pixels have changed since the previous frame.
    ///
    /// `background` is the previous frame.
    fn quantize(&self, image: ImgRef<'_, RGBA8>, importance_map: Option<Vec<u8>>, background: Option<ImgRef<'_, RGBA8>>) -> CatResult<(ImgVec<u8>, Vec<RGBA8>)> {
        let mut liq = Attributes::new();
        if self.settings.fast {
            liq.set_speed(10)?;
        }
        let quality = if background.is_some() { // not first frame
            self.settings.quality.clamp(1, 100)
        } else {
            100 // the first frame is too important to ruin it
        };
        liq.set_quality(0, quality)?;
        let (buf, width, height) = image.to_contiguous_buf();
        let mut img = liq.new_image(buf.into_owned(), width, height, 0.)?;
        if let Some(map) = importance_map {
            img.set_importance_map(map)?;
        }
        if let Some(bg) = background {
            let (bg_buf, ..) = bg.to_contiguous_buf();
            img.set_background(liq.new_image(bg_buf.into_owned(), width, height, 0.)?)?;
        }
        img.add_fixed_color(RGBA8::new(0, 0, 0, 0))?;
        let mut res = liq.quantize(&mut img)?;
        res.set_dithering_level(0.5)?;

        let (pal, pal_img) = res.remapped(&mut img)?;
        debug_assert_eq!(width * height, pal_img.len());

        Ok((ImgVec::new(pal_img, width, height), pal))
    }

    fn write_frame(&mut self, frame: &gif::Frame<'_>, screen_width: u16, screen_height: u16) -> CatResult<()> {
        let writer = &mut self.writer;
        let enc = match self.gif_enc {
            None => {
                let w = CountingWriter {
                    writer: writer.take().ok_or(Error::Finalized)?,
                    written: self.written.clone(),
                };
                let mut enc = gif::Encoder::new(w, screen_width, screen_height, &[])?;
                enc.write_extension(gif::ExtensionData::Repetitions(self.settings.repeat))?;
                enc.write_raw_extension(gif::Extension::Comment.into(), &[b"vidgif"])?;
                self.gif_enc.get_or_insert(enc)
            }
            Some(ref mut enc) => enc,
        };

        enc.write_frame(frame)?;
        self.frames_written += 1;
        Ok(())
    }
}

impl<W: Write> FrameSink for GifSink<W> {
    fn default_delay_ms(&self) -> u32 {
        self.default_delay_ms
    }

    fn add_frame(&mut self, frame: Frame, delay: Delay) -> CatResult<()> {
        if self.finalized {
            return Err(Error::Finalized);
        }
        let index = frame.index;
        let image = frame.prepared(self.settings.width, self.settings.height)?.image;
        let (width, height) = (image.width(), image.height());

        if let Some(screen) = &self.screen {
            if screen.width() != width || screen.height() != height {
                return Err(Error::WrongSize(format!("Frame {} has wrong size ({}×{}, expected {}×{})", index + 1,
                    width, height, screen.width(), screen.height())));
            }
        }
        let screen_width = u16::try_from(width).map_err(|_| Error::WrongSize(format!("Frame {} is too wide for GIF", index + 1)))?;
        let screen_height = u16::try_from(height).map_err(|_| Error::WrongSize(format!("Frame {} is too tall for GIF", index + 1)))?;

        let delay = self.delay_in_centiseconds(delay.to_millis(self.default_delay_ms));

        let mut screen = match self.screen.take() {
            Some(screen) => screen,
            None => ImgVec::new(vec![RGBA8::new(0, 0, 0, 0); width * height], width, height),
        };
        let has_prev_frame = self.frames_written > 0;

        let importance_map = if has_prev_frame {
            match importance_map(screen.as_ref(), image.as_ref(), self.settings.quality) {
                Some(map) => Some(map),
                None => {
                    trace!("frame {} doesn't change anything", index + 1);
                    self.screen = Some(screen);
                    return self.write_frame(&unchanged_frame(delay), screen_width, screen_height);
                },
            }
        } else {
            None
        };

        let quantized = {
            let bg = if has_prev_frame { Some(screen.as_ref()) } else { None };
            self.quantize(image.as_ref(), importance_map, bg)
        };
        let (image8, image8_pal) = match quantized {
            Ok(q) => q,
            Err(e) => {
                self.screen = Some(screen);
                return Err(e);
            },
        };
        drop(image);

        let transparent_index = image8_pal.iter().position(|p| p.a == 0).map(|i| i as u8);
        for (px, &idx) in screen.buf_mut().iter_mut().zip(image8.buf().iter()) {
            if Some(idx) != transparent_index {
                if let Some(&color) = image8_pal.get(idx as usize) {
                    *px = color;
                }
            }
        }
        self.screen = Some(screen);

        let mut pal_rgb: Vec<u8> = image8_pal.iter().flat_map(|c| [c.r, c.g, c.b]).collect();
        // Palette should be power-of-two sized
        let needed_size = 3 * image8_pal.len().max(2).next_power_of_two();
        pal_rgb.resize(needed_size, 0);

        let (buffer, _, _) = image8.into_contiguous_buf();
        let frame = gif::Frame {
            delay,
            dispose: gif::DisposalMethod::Keep,
            transparent: transparent_index,
            width: screen_width,
            height: screen_height,
            palette: Some(pal_rgb),
            buffer: buffer.into(),
            ..gif::Frame::default()
        };
        self.write_frame(&frame, screen_width, screen_height)?;
        trace!("frame {} written, {} colors, {}cs", index + 1, image8_pal.len(), delay);
        Ok(())
    }

    fn finalize(&mut self) -> CatResult<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;
        self.screen = None;
        match self.gif_enc.take() {
            Some(enc) => {
                // writes the trailer
                let mut w = enc.into_inner()?;
                w.flush()?;
                debug!("finished GIF: {} frames, {} bytes", self.frames_written, self.written.get());
                Ok(())
            },
            None => {
                if let Some(mut w) = self.writer.take() {
                    w.flush()?;
                }
                Err(Error::NoFrames)
            },
        }
    }

    fn written_bytes(&self) -> u64 {
        self.written.get()
    }

    fn frames_written(&self) -> usize {
        self.frames_written
    }
}

impl<W: Write> Drop for GifSink<W> {
    fn drop(&mut self) {
        if !self.finalized {
            let _ = self.finalize();
        }
    }
}

/// Weights pixels by how much they differ from what's on screen. `None` if nothing differs.
fn importance_map(screen: ImgRef<'_, RGBA8>, image: ImgRef<'_, RGBA8>, quality: u8) -> Option<Vec<u8>> {
    let q = 100 - u32::from(quality.min(100));
    let min_diff = 80 + q * q;
    let mut changed = false;
    let map = screen.pixels().zip(image.pixels()).map(|(a, b)| {
        let diff = colordiff(a, b);
        // if pixels are close or identical, no weight on them
        if diff < min_diff {
            0
        } else {
            changed = true;
            // clip max value, since if something's different it doesn't matter how much, it has to be displayed anyway
            let t = diff / 32;
            (t * t).clamp(1, 255) as u8
        }
    }).collect();
    changed.then_some(map)
}

/// Still counts as an image, but draws nothing
fn unchanged_frame(delay: u16) -> gif::Frame<'static> {
    gif::Frame {
        delay,
        dispose: gif::DisposalMethod::Keep,
        transparent: Some(0),
        width: 1,
        height: 1,
        palette: Some(vec![0; 6]),
        buffer: vec![0].into(),
        ..gif::Frame::default()
    }
}

#[inline]
fn colordiff(a: RGBA8, b: RGBA8) -> u32 {
    if a.a == 0 || b.a == 0 {
        return 255 * 255 * 6;
    }
    (i32::from(i16::from(a.r) - i16::from(b.r)) * i32::from(i16::from(a.r) - i16::from(b.r))) as u32 * 2 +
    (i32::from(i16::from(a.g) - i16::from(b.g)) * i32::from(i16::from(a.g) - i16::from(b.g))) as u32 * 3 +
    (i32::from(i16::from(a.b) - i16::from(b.b)) * i32::from(i16::from(a.b) - i16::from(b.b))) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn solid(index: usize, gray: u8) -> Frame {
        Frame::new(index, ImgVec::new(vec![RGBA8::new(gray, gray, gray, 255); 8 * 6], 8, 6))
    }

    /// (delay, top-left pixel of the composed screen) for every image
    fn decode(data: &[u8]) -> Vec<(u16, RGBA8)> {
        let mut gif_opts = gif::DecodeOptions::new();
        gif_opts.set_color_output(gif::ColorOutput::Indexed);
        let mut decoder = gif_opts.read_info(data).unwrap();
        let mut screen = gif_dispose::Screen::new_decoder(&decoder);
        let mut out = vec![];
        while let Some(frame) = decoder.read_next_frame().unwrap() {
            screen.blit_frame(frame).unwrap();
            out.push((frame.delay, screen.pixels_rgba().buf()[0]));
        }
        out
    }

    fn encode(default_delay_ms: u32, frames: impl IntoIterator<Item = (Frame, Delay)>) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut sink = GifSink::new(&mut out, default_delay_ms, Settings::default());
            for (frame, delay) in frames {
                sink.add_frame(frame, delay).unwrap();
            }
            sink.finalize().unwrap();
        }
        out
    }

    #[track_caller]
    fn assert_gray(px: RGBA8, gray: u8) {
        assert!((i16::from(px.r) - i16::from(gray)).abs() <= 3, "{px:?} isn't {gray}");
        assert_eq!(255, px.a);
    }

    #[test]
    fn frames_keep_order_and_default_delay() {
        let grays = [20, 120, 220, 70];
        let out = encode(40, grays.iter().enumerate().map(|(n, &g)| (solid(n, g), Delay::Default)));
        let decoded = decode(&out);
        assert_eq!(grays.len(), decoded.len());
        for (&(delay, px), &gray) in decoded.iter().zip(grays.iter()) {
            assert_eq!(4, delay);
            assert_gray(px, gray);
        }
    }

    #[test]
    fn delay_override_is_per_frame() {
        let out = encode(40, [
            (solid(0, 10), Delay::Default),
            (solid(1, 90), Delay::Millis(250)),
            (solid(2, 180), Delay::Default),
        ]);
        let delays: Vec<_> = decode(&out).into_iter().map(|(d, _)| d).collect();
        assert_eq!(delays, [4, 25, 4]);
    }

    #[test]
    fn rounding_does_not_drift() {
        let out = encode(33, (0..6).map(|n| (solid(n, (n * 40) as u8), Delay::Default)));
        let delays: Vec<_> = decode(&out).into_iter().map(|(d, _)| d).collect();
        assert_eq!(delays, [3, 4, 3, 3, 4, 3]);
        assert_eq!(20, delays.iter().sum::<u16>());
    }

    #[test]
    fn unchanged_frames_are_still_images() {
        let out = encode(100, [
            (solid(0, 50), Delay::Default),
            (solid(1, 50), Delay::Default),
            (solid(2, 50), Delay::Default),
        ]);
        let decoded = decode(&out);
        assert_eq!(3, decoded.len());
        for (delay, px) in decoded {
            assert_eq!(10, delay);
            assert_gray(px, 50);
        }
    }

    #[test]
    fn finalize_twice() {
        let mut out = Vec::new();
        {
            let mut sink = GifSink::new(&mut out, 100, Settings::default());
            sink.add_frame(solid(0, 1), Delay::Default).unwrap();
            sink.finalize().unwrap();
            let written = sink.written_bytes();
            assert!(written > 0);
            sink.finalize().unwrap();
            assert_eq!(written, sink.written_bytes());

            let err = sink.add_frame(solid(1, 2), Delay::Default).unwrap_err();
            assert_eq!(ErrorKind::EncodeFailed, err.kind());
            assert_eq!(1, sink.frames_written());
        }
        assert_eq!(Some(&0x3B), out.last(), "trailer");
        assert_eq!(1, decode(&out).len());
    }

    #[test]
    fn finalize_on_drop() {
        let mut out = Vec::new();
        {
            let mut sink = GifSink::new(&mut out, 100, Settings::default());
            sink.add_frame(solid(0, 1), Delay::Default).unwrap();
            sink.add_frame(solid(1, 200), Delay::Default).unwrap();
        }
        assert_eq!(2, decode(&out).len());
    }

    #[test]
    fn wrong_size_keeps_previous_frames() {
        let mut out = Vec::new();
        {
            let mut sink = GifSink::new(&mut out, 100, Settings::default());
            sink.add_frame(solid(0, 1), Delay::Default).unwrap();
            let small = Frame::new(1, ImgVec::new(vec![RGBA8::new(0, 0, 0, 255); 4], 2, 2));
            let err = sink.add_frame(small, Delay::Default).unwrap_err();
            assert_eq!(ErrorKind::EncodeFailed, err.kind());
            assert!(err.to_string().contains("Frame 2"));
            sink.finalize().unwrap();
        }
        assert_eq!(1, decode(&out).len());
    }

    #[test]
    fn no_frames() {
        let mut out = Vec::new();
        let mut sink = GifSink::new(&mut out, 100, Settings::default());
        assert!(matches!(sink.finalize(), Err(Error::NoFrames)));
        sink.finalize().unwrap();
    }

    #[test]
    fn resized_to_max_width() {
        let mut out = Vec::new();
        {
            let settings = Settings { width: Some(4), ..Settings::default() };
            let mut sink = GifSink::new(&mut out, 100, settings);
            sink.add_frame(solid(0, 100), Delay::Default).unwrap();
            sink.finalize().unwrap();
        }
        let decoder = gif::DecodeOptions::new().read_info(&out[..]).unwrap();
        assert_eq!((4, 3), (decoder.width(), decoder.height()));
    }

    #[test]
    fn small_changes_are_ignored() {
        let screen = ImgVec::new(vec![RGBA8::new(100, 100, 100, 255); 4], 2, 2);
        let mut image = screen.clone();
        assert!(importance_map(screen.as_ref(), image.as_ref(), 90).is_none());
        image.buf_mut()[3] = RGBA8::new(101, 100, 100, 255);
        assert!(importance_map(screen.as_ref(), image.as_ref(), 90).is_none());
        image.buf_mut()[3] = RGBA8::new(0, 200, 100, 255);
        let map = importance_map(screen.as_ref(), image.as_ref(), 90).unwrap();
        assert_eq!(&map[..3], &[0, 0, 0]);
        assert!(map[3] > 0);
    }
}
