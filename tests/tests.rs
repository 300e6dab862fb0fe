use imgref::ImgRef;
use rgb::RGBA8;
use std::fs;
use std::path::{Path, PathBuf};
use vidgif::progress::{ConversionStatus, NoProgress, ProgressReporter};
use vidgif::worker::{self, Signal};
use vidgif::*;

/// 4:4:4 video where every frame is a flat gray
fn write_y4m(path: &Path, width: usize, height: usize, rate: &str, grays: &[u8]) {
    let mut data = format!("YUV4MPEG2 W{width} H{height} F{rate} Ip A1:1 C444\n").into_bytes();
    for &g in grays {
        data.extend_from_slice(b"FRAME\n");
        data.extend(std::iter::repeat(g).take(width * height));
        data.extend(std::iter::repeat(128).take(2 * width * height));
    }
    fs::write(path, data).unwrap();
}

fn for_each_frame(gif_data: &[u8], mut cb: impl FnMut(&gif::Frame, ImgRef<RGBA8>)) {
    let mut gif_opts = gif::DecodeOptions::new();
    gif_opts.set_color_output(gif::ColorOutput::Indexed);
    let mut decoder = gif_opts.read_info(gif_data).unwrap();
    let mut screen = gif_dispose::Screen::new_decoder(&decoder);

    while let Some(frame) = decoder.read_next_frame().unwrap() {
        screen.blit_frame(frame).unwrap();
        cb(frame, screen.pixels_rgba());
    }
}

#[track_caller]
fn assert_flat_gray(img: ImgRef<RGBA8>, gray: u8) {
    for px in img.pixels() {
        assert!((i16::from(px.g) - i16::from(gray)).abs() <= 4, "{px:?} isn't {gray}");
        assert_eq!(255, px.a);
    }
}

#[derive(Default)]
struct Recorder {
    statuses: Vec<ConversionStatus>,
    frames: usize,
    bytes: u64,
    opened: Option<(f64, Option<u64>)>,
    succeeded: Option<PathBuf>,
    failed: Option<(ErrorKind, String)>,
}

impl ProgressReporter for Recorder {
    fn status(&mut self, status: ConversionStatus) {
        self.statuses.push(status);
    }

    fn opened(&mut self, frame_rate: f64, total_frames: Option<u64>) {
        self.opened = Some((frame_rate, total_frames));
    }

    fn increase(&mut self) -> bool {
        self.frames += 1;
        true
    }

    fn written_bytes(&mut self, bytes: u64) {
        self.bytes = bytes;
    }

    fn succeeded(&mut self, output: &Path) {
        self.succeeded = Some(output.to_path_buf());
    }

    fn failed(&mut self, kind: ErrorKind, message: &str) {
        self.failed = Some((kind, message.to_owned()));
    }
}

#[test]
fn converts_sample_next_to_input() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("sample.mp4");
    let grays = [30, 130, 230];
    write_y4m(&input, 16, 12, "10:1", &grays);

    let mut rec = Recorder::default();
    let output = convert(&input, &Options::default(), &mut rec).unwrap();
    assert_eq!(dir.path().join("sample.gif"), output);
    assert_eq!(Some(output.clone()), rec.succeeded);
    assert!(rec.failed.is_none());
    assert_eq!(rec.statuses, [ConversionStatus::Busy, ConversionStatus::Success]);
    assert_eq!(Some((10., Some(3))), rec.opened);
    assert_eq!(3, rec.frames);

    let data = fs::read(&output).unwrap();
    assert_eq!(data.len() as u64, rec.bytes);
    let mut n = 0;
    for_each_frame(&data, |frame, screen| {
        assert_eq!(10, frame.delay);
        assert_eq!((16, 12), (screen.width(), screen.height()));
        assert_flat_gray(screen, grays[n]);
        n += 1;
    });
    assert_eq!(grays.len(), n);
}

#[test]
fn uppercase_extension_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("CLIP.MP4");
    write_y4m(&input, 4, 4, "25:1", &[10, 200]);

    let output = convert(&input, &Options::default(), &mut NoProgress {}).unwrap();
    assert_eq!(dir.path().join("CLIP.gif"), output);
    let mut delays = vec![];
    for_each_frame(&fs::read(output).unwrap(), |frame, _| delays.push(frame.delay));
    assert_eq!(delays, [4, 4]);
}

#[test]
fn existing_output_is_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("sample.mp4");
    let output = dir.path().join("sample.gif");
    fs::write(&output, vec![b'x'; 100_000]).unwrap();
    write_y4m(&input, 8, 8, "10:1", &[100]);

    convert(&input, &Options::default(), &mut NoProgress {}).unwrap();
    let data = fs::read(&output).unwrap();
    assert!(data.len() < 100_000);
    assert!(data.starts_with(b"GIF89a"));
}

#[test]
fn not_a_video() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("notavideo.mp4");
    fs::write(&input, b"").unwrap();

    let mut rec = Recorder::default();
    let err = convert(&input, &Options::default(), &mut rec).unwrap_err();
    assert_eq!(ErrorKind::OpenFailed, err.kind());
    assert_eq!(Some(ErrorKind::OpenFailed), rec.failed.map(|(k, _)| k));
    assert_eq!(rec.statuses, [ConversionStatus::Busy, ConversionStatus::Error]);
    assert!(!dir.path().join("notavideo.gif").exists());
}

#[test]
fn wrong_extension() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("document.txt");
    write_y4m(&input, 4, 4, "10:1", &[1]);

    let err = convert(&input, &Options::default(), &mut NoProgress {}).unwrap_err();
    assert_eq!(ErrorKind::InvalidInput, err.kind());
    assert!(!dir.path().join("document.gif").exists());

    let options = Options { extensions: vec!["txt".into()], ..Options::default() };
    convert(&input, &options, &mut NoProgress {}).unwrap();
    assert!(dir.path().join("document.gif").exists());
}

#[test]
fn gif_input_is_left_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("clip.gif");
    write_y4m(&input, 4, 4, "10:1", &[1, 2]);
    let before = fs::read(&input).unwrap();

    let options = Options { extensions: vec!["gif".into()], ..Options::default() };
    let mut rec = Recorder::default();
    let err = convert(&input, &options, &mut rec).unwrap_err();
    assert_eq!(ErrorKind::InvalidInput, err.kind());
    assert_eq!(Some(ErrorKind::InvalidInput), rec.failed.map(|(k, _)| k));
    assert_eq!(before, fs::read(&input).unwrap());
}

#[test]
fn zero_frame_rate() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("still.mp4");
    write_y4m(&input, 4, 4, "0:1", &[1, 2]);

    let err = convert(&input, &Options::default(), &mut NoProgress {}).unwrap_err();
    assert_eq!(ErrorKind::DegenerateFrameRate, err.kind());
    assert!(!dir.path().join("still.gif").exists());
}

#[test]
fn empty_video_leaves_partial_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("empty.mp4");
    write_y4m(&input, 4, 4, "10:1", &[]);

    let err = convert(&input, &Options::default(), &mut NoProgress {}).unwrap_err();
    assert_eq!(ErrorKind::EncodeFailed, err.kind());
    assert!(dir.path().join("empty.gif").exists());
}

#[test]
fn partial_output_can_be_removed() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("empty.mp4");
    write_y4m(&input, 4, 4, "10:1", &[]);

    let options = Options { keep_partial_output: false, ..Options::default() };
    let err = convert(&input, &options, &mut NoProgress {}).unwrap_err();
    assert_eq!(ErrorKind::EncodeFailed, err.kind());
    assert!(!dir.path().join("empty.gif").exists());
}

#[test]
fn resized_and_looping_once() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("big.mp4");
    write_y4m(&input, 40, 20, "20:1", &[50, 60]);

    let options = Options {
        settings: Settings { width: Some(10), repeat: Repeat::Finite(1), ..Settings::default() },
        ..Options::default()
    };
    let output = convert(&input, &options, &mut NoProgress {}).unwrap();
    let data = fs::read(output).unwrap();
    let decoder = gif::DecodeOptions::new().read_info(&data[..]).unwrap();
    assert_eq!((10, 5), (decoder.width(), decoder.height()));
    assert_eq!(Repeat::Finite(1), decoder.repeat());
}

#[test]
fn background_workers_report_over_channel() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first.mp4");
    let second = dir.path().join("second.mp4");
    write_y4m(&first, 8, 8, "10:1", &[10, 20, 30, 40]);
    write_y4m(&second, 6, 6, "5:1", &[200, 100]);

    let (tx, rx) = crossbeam_channel::unbounded();
    let a = worker::spawn(0, ConversionRequest::new(&first), Options::default(), tx.clone()).unwrap();
    let b = worker::spawn(1, ConversionRequest::new(&second), Options::default(), tx).unwrap();
    assert_eq!(dir.path().join("first.gif"), a.join().unwrap());
    assert_eq!(dir.path().join("second.gif"), b.join().unwrap());

    let events: Vec<_> = rx.iter().collect();
    for (id, input, frames) in [(0, &first, 4), (1, &second, 2)] {
        let signals: Vec<_> = events.iter().filter(|e| e.id == id).map(|e| e.signal.clone()).collect();
        assert_eq!(signals.first(), Some(&Signal::Started(input.clone())));
        assert_eq!(signals.get(1), Some(&Signal::Status(ConversionStatus::Busy)));
        let progress: Vec<_> = signals.iter().filter_map(|s| match s {
            Signal::Progress(n) => Some(*n),
            _ => None,
        }).collect();
        assert_eq!(progress, (1..=frames).collect::<Vec<u64>>());
        assert_eq!(signals.last(), Some(&Signal::Succeeded(input.with_extension("gif"))));
    }
}
