//! For tracking conversion progress and aborting early

use crate::error::ErrorKind;
use std::path::Path;

/// Coarse state for presentation, e.g. a status color in a GUI
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ConversionStatus {
    #[default]
    Idle,
    Busy,
    Error,
    Success,
}

/// A trait that is used to report progress to some consumer.
///
/// All methods are called from the thread that runs the conversion. If the consumer lives
/// on another thread (a UI thread), the implementation has to pass the signals over,
/// see [`crate::worker::ChannelReporter`].
pub trait ProgressReporter {
    /// The conversion has accepted the input path
    fn started(&mut self, _input: &Path) {}

    fn status(&mut self, _status: ConversionStatus) {}

    /// The video has been opened. The number of frames is an estimate, if known at all.
    fn opened(&mut self, _frame_rate: f64, _total_frames: Option<u64>) {}

    /// Called after each frame has been written.
    ///
    /// This method may return `false` to abort processing.
    fn increase(&mut self) -> bool;

    /// File size so far
    fn written_bytes(&mut self, _current_file_size_in_bytes: u64) {}

    fn succeeded(&mut self, _output: &Path) {}

    fn failed(&mut self, _kind: ErrorKind, _message: &str) {}
}

/// No-op progress reporter
pub struct NoProgress {}

impl ProgressReporter for NoProgress {
    fn increase(&mut self) -> bool {
        true
    }
}
