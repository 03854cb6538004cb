#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;
#[cfg(not(target_env = "musl"))]
use mimalloc as _;

use std::{io::prelude::*, path::PathBuf};

use anyhow::{bail, Context, Result};
use elfpress_core::prelude::*;
use elfpress_elf::prelude::*;
use elfpress_link::prelude::*;
use elfpress_pack::prelude::*;
use env_logger::Builder;
use log::{Level, LevelFilter};
use owo_colors::OwoColorize;

mod menu;
use menu::{exactly_one_true, Elfpress, LinkOption, Modules, PackOption};

/// Hard cap on payload and container sizes, matching the runtime stub's scratch space.
const MAX_FILE: usize = elfpress_link::MAX_IMAGE;

fn color_level(level: Level) -> String {
    match level {
        Level::Error => level.red().to_string(),
        Level::Warn => level.yellow().to_string(),
        Level::Info => level.green().to_string(),
        Level::Debug => level.blue().to_string(),
        Level::Trace => level.purple().to_string(),
    }
}

const fn level_filter(verbose: usize) -> LevelFilter {
    match verbose {
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        5 => LevelFilter::Trace,
        //default to off
        _ => LevelFilter::Off,
    }
}

fn main() -> Result<()> {
    //Parse command line input
    let args: Elfpress = argp::parse_args_or_exit(argp::DEFAULT);

    // Build up a logger with custom formatting and set it to the verbosity from the command line
    if args.verbose != 0 {
        Builder::new()
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{}] {} {}",
                    elfpress_core::time::current_time(),
                    color_level(record.level()),
                    record.args()
                )
            })
            .filter(None, level_filter(args.verbose))
            .init();
    }

    match args.nested {
        Modules::Link(params) => link_object(&params)?,
        Modules::Pack(params) => match exactly_one_true(&[params.compress, params.decompress]) {
            Some(0) => pack_file(&params)?,
            Some(1) => unpack_file(&params)?,
            None => bail!("Please select exactly one operation!"),
            _ => unreachable!("Oops! Forgot to cover all operations."),
        },
    }
    Ok(())
}

fn initial_params(text: &Option<String>) -> Result<CompressionParameters> {
    match text {
        Some(text) => {
            text.parse().with_context(|| format!("could not parse parameters '{text}'"))
        }
        None => Ok(CompressionParameters::default()),
    }
}

fn output_or(output: &Option<String>, input: &str, extension: &str) -> String {
    output.clone().unwrap_or_else(|| {
        let mut path = PathBuf::from(input);
        path.set_extension(extension);
        path.to_string_lossy().into_owned()
    })
}

fn link_object(args: &LinkOption) -> Result<()> {
    let image =
        Image::open(&args.input).with_context(|| format!("could not load {}", args.input))?;
    log::info!("Arch: {}", image.arch());

    let options = LinkOptions {
        params: initial_params(&args.params)?,
        strict: args.strict,
        ..LinkOptions::default()
    };
    let out = link(&image, builtin_template(image.arch()), &options)?;

    if let Some(path) = &args.dump_payload {
        log::info!("Dumping {} of raw payload to {path}", format_size(out.payload.len()));
        std::fs::write(path, &out.payload)?;
    }

    let output = args.output.clone().unwrap_or_else(|| String::from("c.out"));
    std::fs::write(&output, &out.image)?;
    log::info!(
        "Squeezed {} of payload into {}",
        format_size(out.payload.len()),
        format_size(out.image.len())
    );
    println!("Wrote {} bytes to {}", out.image.len(), output);
    Ok(())
}

fn pack_file(args: &PackOption) -> Result<()> {
    let input = std::fs::read(&args.input)?;
    let mut params = initial_params(&args.params)?;

    let mut coder = Coder::new();
    let mut stream = search::optimize(
        &mut coder,
        &mut params,
        &input,
        MAX_FILE,
        &SearchConfig::default(),
    )?;
    stream.reverse();

    // Self-describing container: decompressed size, the parameters, then the reversed stream.
    let mut container = Vec::with_capacity(9 + 2 * params.context_count + stream.len());
    container.extend_from_slice(&u32::try_from(input.len()).context("input too large")?.to_le_bytes());
    container.push(params.context_count as u8);
    container.extend_from_slice(&params.weights[..params.context_count]);
    container.extend_from_slice(&params.contexts[..params.context_count]);
    container.extend_from_slice(&stream);

    let output = output_or(&args.output, &args.input, "press");
    std::fs::write(&output, &container)?;
    println!("Wrote {} bytes to {}", container.len(), output);
    Ok(())
}

fn unpack_file(args: &PackOption) -> Result<()> {
    let data = std::fs::read(&args.input)?;
    let mut cursor = DataCursor::new(&data, Endian::Little);

    let size = cursor.read_u32()? as usize;
    anyhow::ensure!(size <= MAX_FILE, "container declares an oversized payload");
    let count = usize::from(cursor.read_u8()?);
    anyhow::ensure!(
        (2..=elfpress_pack::MAX_CONTEXT_COUNT).contains(&count),
        "container declares an invalid context count"
    );
    let mut params = CompressionParameters { context_count: count, ..Default::default() };
    params.weights[..count].copy_from_slice(cursor.read_slice(count)?);
    params.contexts[..count].copy_from_slice(cursor.read_slice(count)?);

    let mut coder = Coder::new();
    let out = coder.decompress(&params, cursor.remaining_slice(), size);

    let output = output_or(&args.output, &args.input, "raw");
    std::fs::write(&output, &out)?;
    println!("Wrote {} bytes to {}", out.len(), output);
    Ok(())
}
