//! Running conversions off the calling thread
//!
//! Each request gets its own thread. The thread reports back over a channel, so the
//! caller's thread (e.g. a UI event loop) only ever receives events and never decodes.

use crate::error::{CatResult, Error, ErrorKind};
use crate::pipeline::{ConversionRequest, Converter, Options};
use crate::progress::{ConversionStatus, ProgressReporter};
use crossbeam_channel::Sender;
use log::debug;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Started(PathBuf),
    Status(ConversionStatus),
    /// The video has been opened; the frame count is an estimate
    Opened { total_frames: Option<u64> },
    /// Frames written so far
    Progress(u64),
    Succeeded(PathBuf),
    Failed(ErrorKind, String),
}

/// A signal from the conversion with the given `id`
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionEvent {
    pub id: usize,
    pub signal: Signal,
}

/// Forwards progress over a channel
pub struct ChannelReporter {
    id: usize,
    sender: Sender<ConversionEvent>,
    cancelled: Arc<AtomicBool>,
    frames: u64,
}

impl ChannelReporter {
    pub fn new(id: usize, sender: Sender<ConversionEvent>) -> Self {
        Self::with_cancel_flag(id, sender, Arc::default())
    }

    fn with_cancel_flag(id: usize, sender: Sender<ConversionEvent>, cancelled: Arc<AtomicBool>) -> Self {
        Self { id, sender, cancelled, frames: 0 }
    }

    fn send(&self, signal: Signal) {
        // nobody listening is not a reason to stop converting
        if self.sender.send(ConversionEvent { id: self.id, signal }).is_err() {
            debug!("conversion {}: receiver is gone", self.id);
        }
    }
}

impl ProgressReporter for ChannelReporter {
    fn started(&mut self, input: &Path) {
        self.send(Signal::Started(input.to_path_buf()));
    }

    fn status(&mut self, status: ConversionStatus) {
        self.send(Signal::Status(status));
    }

    fn opened(&mut self, _frame_rate: f64, total_frames: Option<u64>) {
        self.send(Signal::Opened { total_frames });
    }

    fn increase(&mut self) -> bool {
        self.frames += 1;
        self.send(Signal::Progress(self.frames));
        !self.cancelled.load(Ordering::Relaxed)
    }

    fn succeeded(&mut self, output: &Path) {
        self.send(Signal::Succeeded(output.to_path_buf()));
    }

    fn failed(&mut self, kind: ErrorKind, message: &str) {
        self.send(Signal::Failed(kind, message.to_owned()));
    }
}

/// A conversion running in the background
pub struct ConversionHandle {
    id: usize,
    cancelled: Arc<AtomicBool>,
    thread: thread::JoinHandle<CatResult<PathBuf>>,
}

impl ConversionHandle {
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Stops after the frame that is being encoded. The conversion fails with `Aborted`.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the conversion. Not needed otherwise, since the thread doesn't keep the process alive.
    pub fn join(self) -> CatResult<PathBuf> {
        self.thread.join().map_err(|_| Error::ThreadSend)?
    }
}

/// Converts on a new thread, and sends [`ConversionEvent`]s tagged with `id` to `sender`.
///
/// Fails only if the thread can't be started.
pub fn spawn(id: usize, request: ConversionRequest, options: Options, sender: Sender<ConversionEvent>) -> CatResult<ConversionHandle> {
    let cancelled = Arc::new(AtomicBool::new(false));
    let mut reporter = ChannelReporter::with_cancel_flag(id, sender, cancelled.clone());
    let thread = thread::Builder::new()
        .name(format!("convert{id}"))
        .spawn(move || {
            debug!("conversion {id} started on its own thread");
            Converter::new(options).convert(request, &mut reporter)
        })?;
    Ok(ConversionHandle { id, cancelled, thread })
}
