use std::fmt;
use std::io;
use std::path::PathBuf;
use quick_error::quick_error;

/// Coarse classification of a failed conversion, for callers that react to the
/// kind of failure rather than to its message
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Wrong extension, or the input file doesn't exist
    InvalidInput,
    /// The file isn't a readable video, or its codec is unsupported
    OpenFailed,
    /// The output file can't be created
    CreateFailed,
    /// Decoding failed in the middle of the stream
    DecodeFailed,
    /// Quantization or GIF writing failed
    EncodeFailed,
    /// The video reports a frame rate that is zero, negative or not a number
    DegenerateFrameRate,
    /// Stopped on request, or the conversion thread died
    Aborted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InvalidInput => "invalid input",
            Self::OpenFailed => "can't open video",
            Self::CreateFailed => "can't create output",
            Self::DecodeFailed => "decoding failed",
            Self::EncodeFailed => "encoding failed",
            Self::DegenerateFrameRate => "unusable frame rate",
            Self::Aborted => "aborted",
        })
    }
}

quick_error! {
    #[derive(Debug)]
    pub enum Error {
        InvalidInput(msg: String) {
            display("{}", msg)
        }
        OpenFailed(msg: String) {
            display("{}", msg)
        }
        CreateFailed(path: PathBuf, err: io::Error) {
            display("Can't write to {}: {}", path.display(), err)
            source(err)
        }
        Decode(msg: String) {
            display("{}", msg)
        }
        Encode(msg: String) {
            display("{}", msg)
        }
        DegenerateFrameRate(fps: f64) {
            display("The video reports an unusable frame rate ({} fps)", fps)
        }
        /// Internal error
        ThreadSend {
            display("Internal error; unexpectedly aborted")
        }
        Aborted {
            display("aborted")
        }
        Finalized {
            display("The animation has already been finished")
        }
        Gif(err: gif::EncodingError) {
            display("GIF encoding error: {}", err)
        }
        NoFrames {
            display("Found no usable frames to encode")
        }
        Io(err: io::Error) {
            from()
            from(_oom: std::collections::TryReserveError) -> (io::ErrorKind::OutOfMemory.into())
            display("I/O: {}", err)
            source(err)
        }
        WrongSize(msg: String) {
            display("{}", msg)
            from(e: resize::Error) -> (e.to_string())
        }
        Quant(liq: imagequant::Error) {
            from()
            display("pngquant error: {}", liq)
        }
    }
}

pub type CatResult<T, E = Error> = Result<T, E>;

impl Error {
    /// Which stage of the conversion the error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::OpenFailed(_) => ErrorKind::OpenFailed,
            Self::CreateFailed(..) => ErrorKind::CreateFailed,
            Self::Decode(_) => ErrorKind::DecodeFailed,
            Self::DegenerateFrameRate(_) => ErrorKind::DegenerateFrameRate,
            Self::ThreadSend | Self::Aborted => ErrorKind::Aborted,
            Self::Encode(_) | Self::Finalized | Self::Gif(_) | Self::NoFrames | Self::Io(_) |
            Self::WrongSize(_) | Self::Quant(_) => ErrorKind::EncodeFailed,
        }
    }
}

impl From<gif::EncodingError> for Error {
    #[cold]
    fn from(err: gif::EncodingError) -> Self {
        match err {
            gif::EncodingError::Io(err) => err.into(),
            other => Error::Gif(other),
        }
    }
}

impl<T> From<crossbeam_channel::SendError<T>> for Error {
    #[cold]
    fn from(_: crossbeam_channel::SendError<T>) -> Self {
        Self::ThreadSend
    }
}
