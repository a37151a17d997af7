#![forbid(unsafe_code)]
use std::fs;
use std::io;
use std::io::prelude::*;
use std::process;

use clap::Parser;
use secure_patch::{Compression, Differ, Error, ParallelScheme};

#[derive(Parser, Debug)]
#[clap(
name = "secpatch-diff",
version,
about = "generate an integrity-checked binary patch",
long_about = None,
)]
struct DiffArgs {
    /// source file
    #[clap(value_name = "SOURCE")]
    source_path: String,

    /// target file
    #[clap(value_name = "TARGET")]
    target_path: String,

    /// patch file
    #[clap(value_name = "PATCH")]
    patch_path: String,

    /// skip matches not longer than this
    #[clap(short = 's', value_name = "SMALL")]
    small_match: Option<usize>,

    /// bzip2 compression level (fast, default, best)
    #[clap(short = 'l', value_name = "LEVEL", default_value = "default")]
    level: String,

    /// split the target into this many parallel jobs
    #[clap(short = 'j', value_name = "JOBS")]
    jobs: Option<usize>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .format_target(false)
        .init();
    let args = DiffArgs::parse();
    if let Err(e) = execute(args) {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn execute(args: DiffArgs) -> secure_patch::Result<()> {
    secure_patch::initialize();

    if args.source_path == "-" && args.target_path == "-" {
        return Err(Error::InvalidInput(
            "source and target could not be stdin at the same time".to_string(),
        ));
    }
    let level = parse_level(&args.level)?;

    // setup input/output
    let source = read_input(&args.source_path)?;
    let target = read_input(&args.target_path)?;
    let patch: Box<dyn Write> = if args.patch_path == "-" {
        Box::new(io::stdout())
    } else {
        Box::new(fs::File::create(&args.patch_path)?)
    };

    // setup delta generator
    let mut differ = Differ::new(&source[..], &target[..]).compression_level(level);
    if let Some(small) = args.small_match {
        differ = differ.small_match(small);
    }
    if let Some(jobs) = args.jobs {
        differ = differ.parallel_scheme(ParallelScheme::NumJobs(jobs));
    }

    // execute delta generator
    let size = differ.generate_to(patch)?;
    log::info!("wrote {} byte patch", size);
    Ok(())
}

fn read_input(path: &str) -> secure_patch::Result<Vec<u8>> {
    let mut data;
    if path == "-" {
        data = Vec::new();
        io::stdin().read_to_end(&mut data)?;
    } else {
        data = fs::read(path)?;
    }
    data.shrink_to_fit();
    Ok(data)
}

fn parse_level(expr: &str) -> secure_patch::Result<Compression> {
    match expr {
        "fast" => Ok(Compression::Fastest),
        "default" => Ok(Compression::Default),
        "best" => Ok(Compression::Best),
        _ => Err(Error::InvalidInput(format!("unknown compression level `{}`", expr))),
    }
}
