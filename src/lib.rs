/*
 vidgif video to GIF converter
 © 2017 Kornel Lesiński

 This program is free software: you can redistribute it and/or modify
 it under the terms of the GNU Affero General Public License as
 published by the Free Software Foundation, either version 3 of the
 License, or (at your option) any later version.

 This program is distributed in the hope that it will be useful,
 but WITHOUT ANY WARRANTY; without even the implied warranty of
 MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 GNU Affero General Public License for more details.

 You should have received a copy of the GNU Affero General Public License
 along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/
//! Converts a video file into an animated GIF next to it.
//!
//! Frames are decoded, quantized and written one at a time, so a long video doesn't
//! need more memory than a short one.
//!
//! ```no_run
//! use vidgif::{progress::NoProgress, Options};
//!
//! let gif_path = vidgif::convert("clip.mp4", &Options::default(), &mut NoProgress {})?;
//! # Ok::<_, vidgif::Error>(())
//! ```

mod error;
pub use crate::error::*;

mod frame;
pub use crate::frame::{Frame, ImgRef, ImgVec, RGBA8};

pub mod source;
pub mod y4m_source;
#[cfg(feature = "video")]
pub mod ffmpeg_source;

pub mod sink;
pub mod encodegif;
pub mod pipeline;
pub mod progress;
pub mod worker;

pub use crate::pipeline::{ConversionRequest, ConversionState, Converter, Options};
pub use crate::sink::{Delay, FrameSink};
pub use crate::source::FrameSource;
pub use gif::Repeat;

use crate::progress::ProgressReporter;
use std::path::{Path, PathBuf};

/// How the GIF is encoded
#[derive(Copy, Clone, Debug)]
pub struct Settings {
    /// Resize to max this width if set
    pub width: Option<u32>,
    /// Resize to max this height if set
    pub height: Option<u32>,
    /// 1-100. The first frame is always encoded at the highest quality.
    pub quality: u8,
    /// Lower quality, but faster encode
    pub fast: bool,
    pub repeat: Repeat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            quality: 90,
            fast: false,
            repeat: Repeat::Infinite,
        }
    }
}

/// Converts `input` on the current thread and returns the path of the GIF.
///
/// Same as `Converter::new(options.clone()).convert(…)`.
pub fn convert(input: impl AsRef<Path>, options: &Options, reporter: &mut dyn ProgressReporter) -> CatResult<PathBuf> {
    Converter::new(options.clone()).convert(ConversionRequest::new(input.as_ref()), reporter)
}
