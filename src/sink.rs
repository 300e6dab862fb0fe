//! Writing frames into an animation

use crate::error::CatResult;
use crate::frame::Frame;

/// How long a frame stays on screen
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Delay {
    /// The sink's default, derived from the video's frame rate
    #[default]
    Default,
    /// Milliseconds, for this frame only
    Millis(u32),
}

impl Delay {
    #[inline]
    pub(crate) fn to_millis(self, default_ms: u32) -> u32 {
        match self {
            Self::Default => default_ms,
            Self::Millis(ms) => ms,
        }
    }
}

/// Consumes frames in order and appends them to an animation.
///
/// Frames are taken by value and aren't retained after `add_frame` returns.
pub trait FrameSink {
    /// Delay used for [`Delay::Default`]
    fn default_delay_ms(&self) -> u32;

    /// Quantizes the frame and appends it. Frames already written stay written if this fails.
    fn add_frame(&mut self, frame: Frame, delay: Delay) -> CatResult<()>;

    /// Writes the trailer and closes the output. Calling it again does nothing.
    fn finalize(&mut self) -> CatResult<()>;

    /// File size so far
    fn written_bytes(&self) -> u64 {
        0
    }

    fn frames_written(&self) -> usize;
}

#[test]
fn delay_override() {
    assert_eq!(40, Delay::Default.to_millis(40));
    assert_eq!(0, Delay::Millis(0).to_millis(40));
    assert_eq!(250, Delay::Millis(250).to_millis(40));
}
