use clap::{crate_name, crate_version, value_parser, Arg, ArgAction, Command};
use vidgif::worker::{self, ConversionEvent, ConversionHandle, Signal};
use vidgif::{ConversionRequest, Error, Options, Repeat, Settings};

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub type BinResult<T, E = Box<dyn std::error::Error + Send + Sync>> = Result<T, E>;

#[cfg(feature = "video")]
const FILE_ARG_HELP: &str = "Video files supported by FFmpeg, or YUV4MPEG2 streams. Each is converted to a GIF next to it";
#[cfg(not(feature = "video"))]
const FILE_ARG_HELP: &str = "YUV4MPEG2 video files. Each is converted to a GIF next to it";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match bin_main() {
        Ok(0) => {},
        Ok(_) => std::process::exit(1),
        Err(e) => {
            eprintln!("error: {}", e);
            if let Some(e) = e.source() {
                eprintln!("error: {}", e);
            }
            std::process::exit(1);
        },
    }
}

/// Returns the number of failed conversions
fn bin_main() -> BinResult<usize> {
    let matches = Command::new(crate_name!())
        .version(crate_version!())
        .about("Converts videos to animated GIFs")
        .arg_required_else_help(true)
        .allow_negative_numbers(true)
        .arg(Arg::new("quality")
            .long("quality")
            .short('Q')
            .value_name("1-100")
            .value_parser(value_parser!(u8).range(1..=100))
            .default_value("90")
            .help("Lower quality may give smaller file"))
        .arg(Arg::new("fast")
            .long("fast")
            .action(ArgAction::SetTrue)
            .help("Faster encoding, but worse quality and larger file size"))
        .arg(Arg::new("width")
            .long("width")
            .short('W')
            .value_name("px")
            .value_parser(value_parser!(u32).range(1..))
            .help("Maximum width"))
        .arg(Arg::new("height")
            .long("height")
            .short('H')
            .value_name("px")
            .value_parser(value_parser!(u32).range(1..))
            .help("Maximum height (stretches if the width is also set)"))
        .arg(Arg::new("repeat")
            .long("repeat")
            .value_name("num")
            .value_parser(value_parser!(i32).range(-1..=i64::from(u16::MAX)))
            .help("Number of times the animation is repeated (-1 none, 0 forever or <value> repetitions)"))
        .arg(Arg::new("extension")
            .long("extension")
            .short('e')
            .value_name("ext")
            .action(ArgAction::Append)
            .help("Accept files with this extension as video (default: mp4)"))
        .arg(Arg::new("remove-partial")
            .long("remove-partial")
            .action(ArgAction::SetTrue)
            .help("Delete the GIF if the conversion fails half-way"))
        .arg(Arg::new("quiet")
            .long("quiet")
            .short('q')
            .action(ArgAction::SetTrue)
            .help("Do not display anything on standard output/console"))
        .arg(Arg::new("FILE")
            .help(FILE_ARG_HELP)
            .num_args(1..)
            .value_parser(value_parser!(PathBuf))
            .required(true))
        .get_matches_from(wild::args_os());

    let repeat = match matches.get_one::<i32>("repeat").copied().unwrap_or(0) {
        -1 => Repeat::Finite(0),
        0 => Repeat::Infinite,
        n => Repeat::Finite(u16::try_from(n).map_err(|_| "Invalid repeat count")?),
    };
    let settings = Settings {
        width: matches.get_one::<u32>("width").copied(),
        height: matches.get_one::<u32>("height").copied(),
        quality: matches.get_one::<u8>("quality").copied().unwrap_or(90),
        fast: matches.get_flag("fast"),
        repeat,
    };
    let mut options = Options {
        settings,
        keep_partial_output: !matches.get_flag("remove-partial"),
        ..Options::default()
    };
    if let Some(ext) = matches.get_many::<String>("extension") {
        options.extensions = ext.cloned().collect();
    }
    let quiet = matches.get_flag("quiet");

    if settings.quality < 20 && !quiet {
        eprintln!("warning: quality {} will give really bad results", settings.quality);
    }

    let files: Vec<PathBuf> = matches.get_many::<PathBuf>("FILE").ok_or("Missing files")?.cloned().collect();
    check_if_paths_exist(&files)?;

    let (sender, receiver) = crossbeam_channel::unbounded();
    let handles = files.iter().enumerate().map(|(id, path)| {
        worker::spawn(id, ConversionRequest::new(path), options.clone(), sender.clone())
    }).collect::<Result<Vec<ConversionHandle>, _>>()?;
    // the workers hold the remaining senders, so the loop below ends when they're all done
    drop(sender);

    let mut pb = None;
    for ConversionEvent { id, signal } in receiver {
        match signal {
            Signal::Opened { total_frames } if !quiet && files.len() == 1 => {
                let mut bar = pbr::ProgressBar::new(total_frames.unwrap_or(0));
                bar.show_speed = false;
                bar.show_percent = false;
                bar.format(" #_. ");
                bar.message("Frame ");
                bar.set_max_refresh_rate(Some(Duration::from_millis(250)));
                pb = Some(bar);
            },
            Signal::Progress(frames) => if let Some(bar) = &mut pb {
                if frames > bar.total {
                    bar.total = frames;
                }
                bar.set(frames);
            },
            Signal::Succeeded(output) => if !quiet {
                let msg = format!("vidgif created {}", display_path(&output));
                match pb.take() {
                    Some(mut bar) => bar.finish_print(&msg),
                    None => println!("{}", msg),
                }
            },
            Signal::Failed(kind, msg) => {
                if let Some(mut bar) = pb.take() {
                    bar.finish_print("");
                }
                eprintln!("error: {}: {} ({})", files[id].display(), msg, kind);
            },
            Signal::Started(_) | Signal::Status(_) | Signal::Opened { .. } => {},
        }
    }

    let mut failed = 0;
    for handle in handles {
        let id = handle.id();
        match handle.join() {
            Ok(_) => {},
            Err(Error::ThreadSend) => {
                eprintln!("error: conversion of {} crashed", files[id].display());
                failed += 1;
            },
            Err(_) => failed += 1,
        }
    }
    Ok(failed)
}

fn check_if_paths_exist(paths: &[PathBuf]) -> BinResult<()> {
    for path in paths {
        if !path.exists() {
            let mut msg = format!("Unable to find the input file: \"{}\"", path.display());
            if path.to_str().map_or(false, |p| p.contains('*')) {
                msg += "\nThe path contains a literal \"*\" character. If you want to select multiple files, don't put the special wildcard characters in quotes.";
            } else if path.is_relative() {
                msg += &format!(" (searched in \"{}\")", env::current_dir()?.display());
            }
            return Err(msg.into());
        }
    }
    Ok(())
}

fn display_path(path: &Path) -> String {
    let abs_path = dunce::canonicalize(path);
    abs_path.as_deref().unwrap_or(path).display().to_string()
}
