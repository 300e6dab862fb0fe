//! A single video-to-GIF conversion, from validating the path to finishing the file
//!
//! Frames are moved from the source to the sink one at a time, and never collected,
//! so memory use doesn't depend on the length of the video.

use crate::encodegif::GifSink;
use crate::error::{CatResult, Error, ErrorKind};
use crate::progress::{ConversionStatus, ProgressReporter};
use crate::sink::{Delay, FrameSink};
use crate::source::{self, FrameSource};
use crate::Settings;
use log::{debug, info, warn};
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

/// Path of the video to convert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    input: PathBuf,
}

impl ConversionRequest {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self { input: input.into() }
    }

    #[inline]
    pub fn input(&self) -> &Path {
        &self.input
    }

    /// Where the GIF goes: next to the video, with the `.gif` extension
    pub fn output_path(&self) -> PathBuf {
        output_path_for(&self.input)
    }
}

/// `clip.mp4` becomes `clip.gif`
pub fn output_path_for(input: &Path) -> PathBuf {
    input.with_extension("gif")
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConversionState {
    Idle,
    Validating,
    Opening,
    Streaming,
    Finalizing,
    Succeeded,
    Failed(ErrorKind),
}

/// Opens the two ends of the pipeline
pub trait Backend {
    type Source: FrameSource;
    type Sink: FrameSink;

    fn open_source(&self, path: &Path) -> CatResult<Self::Source>;

    fn create_sink(&self, path: &Path, default_delay_ms: u32, settings: Settings) -> CatResult<Self::Sink>;
}

/// Reads video files from disk and writes GIF files
#[derive(Debug, Default, Copy, Clone)]
pub struct FileBackend;

impl Backend for FileBackend {
    type Source = Box<dyn FrameSource>;
    type Sink = GifSink<BufWriter<File>>;

    fn open_source(&self, path: &Path) -> CatResult<Self::Source> {
        source::open(path)
    }

    fn create_sink(&self, path: &Path, default_delay_ms: u32, settings: Settings) -> CatResult<Self::Sink> {
        GifSink::create(path, default_delay_ms, settings)
    }
}

/// Conversion settings
#[derive(Debug, Clone)]
pub struct Options {
    pub settings: Settings,
    /// File extensions accepted as video, compared case-insensitively
    pub extensions: Vec<String>,
    /// If false, a GIF left incomplete by a failure is deleted
    pub keep_partial_output: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            extensions: vec!["mp4".into()],
            keep_partial_output: true,
        }
    }
}

impl Options {
    /// Whether the path's extension is one of the video extensions
    pub fn accepts(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(OsStr::to_str) else {
            return false;
        };
        self.extensions.iter().any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }
}

/// Runs conversions. Each call to [`Converter::convert`] gets its own source and sink,
/// so one `Converter` can be shared by several threads.
pub struct Converter<B = FileBackend> {
    backend: B,
    options: Options,
}

impl Converter {
    pub fn new(options: Options) -> Self {
        Self::with_backend(FileBackend, options)
    }
}

impl<B: Backend> Converter<B> {
    pub fn with_backend(backend: B, options: Options) -> Self {
        Self { backend, options }
    }

    #[inline]
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Converts the video and returns the path of the GIF.
    ///
    /// This blocks until done, so don't call it on a UI thread; see [`crate::worker::spawn`].
    /// The outcome is also reported to the `reporter`.
    pub fn convert(&self, request: ConversionRequest, reporter: &mut dyn ProgressReporter) -> CatResult<PathBuf> {
        Conversion::new(self, request).run(reporter)
    }
}

/// Closes the source however the conversion ends
struct OpenSource<S: FrameSource> {
    source: S,
    closed: bool,
}

impl<S: FrameSource> OpenSource<S> {
    fn new(source: S) -> Self {
        Self { source, closed: false }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.source.close();
        }
    }
}

impl<S: FrameSource> Deref for OpenSource<S> {
    type Target = S;
    fn deref(&self) -> &S { &self.source }
}

impl<S: FrameSource> DerefMut for OpenSource<S> {
    fn deref_mut(&mut self) -> &mut S { &mut self.source }
}

impl<S: FrameSource> Drop for OpenSource<S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Finishes the output however the conversion ends
struct OpenSink<K: FrameSink> {
    sink: K,
    finalized: bool,
}

impl<K: FrameSink> OpenSink<K> {
    fn new(sink: K) -> Self {
        Self { sink, finalized: false }
    }

    fn finalize(&mut self) -> CatResult<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;
        self.sink.finalize()
    }
}

impl<K: FrameSink> Deref for OpenSink<K> {
    type Target = K;
    fn deref(&self) -> &K { &self.sink }
}

impl<K: FrameSink> DerefMut for OpenSink<K> {
    fn deref_mut(&mut self) -> &mut K { &mut self.sink }
}

impl<K: FrameSink> Drop for OpenSink<K> {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            debug!("finishing output after failure: {}", e);
        }
    }
}

/// One run through the state machine
pub struct Conversion<'c, B> {
    converter: &'c Converter<B>,
    input: PathBuf,
    output: PathBuf,
    state: ConversionState,
    output_created: bool,
}

impl<'c, B: Backend> Conversion<'c, B> {
    pub fn new(converter: &'c Converter<B>, request: ConversionRequest) -> Self {
        let output = request.output_path();
        Self {
            converter,
            input: request.input,
            output,
            state: ConversionState::Idle,
            output_created: false,
        }
    }

    #[inline]
    pub fn state(&self) -> ConversionState {
        self.state
    }

    fn set_state(&mut self, state: ConversionState) {
        debug!("{}: {:?} -> {:?}", self.input.display(), self.state, state);
        self.state = state;
    }

    /// Can be run only once
    pub fn run(&mut self, reporter: &mut dyn ProgressReporter) -> CatResult<PathBuf> {
        if self.state != ConversionState::Idle {
            return Err(Error::InvalidInput(format!("The conversion of {} has already been run", self.input.display())));
        }
        info!("converting {}", self.input.display());
        reporter.started(&self.input);
        reporter.status(ConversionStatus::Busy);

        match self.execute(reporter) {
            Ok(frames) => {
                self.set_state(ConversionState::Succeeded);
                info!("created {} ({} frames)", self.output.display(), frames);
                reporter.status(ConversionStatus::Success);
                reporter.succeeded(&self.output);
                Ok(self.output.clone())
            },
            Err(err) => {
                let kind = err.kind();
                self.set_state(ConversionState::Failed(kind));
                warn!("{} failed ({}): {}", self.input.display(), kind, err);
                self.discard_partial_output();
                reporter.status(ConversionStatus::Error);
                reporter.failed(kind, &err.to_string());
                Err(err)
            },
        }
    }

    fn execute(&mut self, reporter: &mut dyn ProgressReporter) -> CatResult<usize> {
        let converter = self.converter;
        let backend = &converter.backend;
        let options = &converter.options;

        self.set_state(ConversionState::Validating);
        validate(&self.input, options)?;

        self.set_state(ConversionState::Opening);
        let mut source = OpenSource::new(backend.open_source(&self.input).map_err(|e| match e.kind() {
            ErrorKind::OpenFailed => e,
            _ => Error::OpenFailed(e.to_string()),
        })?);
        let frame_rate = source.frame_rate();
        let default_delay_ms = source::delay_ms_for_fps(frame_rate)?;
        reporter.opened(frame_rate, source.total_frames());

        let mut sink = OpenSink::new(backend.create_sink(&self.output, default_delay_ms, options.settings).map_err(|e| match e {
            e @ Error::CreateFailed(..) => e,
            e => Error::CreateFailed(self.output.clone(), io::Error::new(io::ErrorKind::Other, e.to_string())),
        })?);
        self.output_created = true;

        self.set_state(ConversionState::Streaming);
        stream(&mut *source, &mut *sink, reporter)?;

        self.set_state(ConversionState::Finalizing);
        sink.finalize()?;
        reporter.written_bytes(sink.written_bytes());
        source.close();
        Ok(sink.frames_written())
    }

    fn discard_partial_output(&mut self) {
        if !self.output_created {
            return;
        }
        if self.converter.options.keep_partial_output {
            warn!("incomplete {} has been left on disk", self.output.display());
            return;
        }
        match fs::remove_file(&self.output) {
            Ok(()) => debug!("removed incomplete {}", self.output.display()),
            Err(e) => warn!("can't remove incomplete {}: {}", self.output.display(), e),
        }
        self.output_created = false;
    }
}

/// Checks the name, and that the file exists. Doesn't read the file.
fn validate(input: &Path, options: &Options) -> CatResult<()> {
    if !options.accepts(input) {
        let expected = options.extensions.iter().map(|e| format!(".{}", e.trim_start_matches('.'))).collect::<Vec<_>>().join(", ");
        return Err(Error::InvalidInput(format!("{} is not a video file (expected {})", input.display(), expected)));
    }
    // case-insensitive, since on some file systems `a.GIF` and `a.gif` are the same file
    if input.extension().and_then(OsStr::to_str).map_or(false, |ext| ext.eq_ignore_ascii_case("gif")) {
        return Err(Error::InvalidInput(format!("{} would be overwritten by its own output", input.display())));
    }
    if !input.is_file() {
        return Err(Error::InvalidInput(format!("Unable to find the input file: \"{}\"", input.display())));
    }
    Ok(())
}

/// Decode, encode, drop. One frame at a time, in decode order.
fn stream<S, K>(source: &mut S, sink: &mut K, reporter: &mut dyn ProgressReporter) -> CatResult<()>
where S: FrameSource + ?Sized, K: FrameSink + ?Sized {
    loop {
        let frame = source.next_frame().map_err(|e| match e.kind() {
            ErrorKind::DecodeFailed | ErrorKind::Aborted => e,
            _ => Error::Decode(e.to_string()),
        })?;
        let Some(frame) = frame else {
            return Ok(());
        };
        sink.add_frame(frame, Delay::Default).map_err(|e| match e.kind() {
            ErrorKind::EncodeFailed | ErrorKind::Aborted => e,
            _ => Error::Encode(e.to_string()),
        })?;
        reporter.written_bytes(sink.written_bytes());
        if !reporter.increase() {
            return Err(Error::Aborted);
        }
    }
}
