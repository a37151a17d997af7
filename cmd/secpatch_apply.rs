#![forbid(unsafe_code)]
use std::fs;
use std::io;
use std::io::prelude::*;
use std::process;

use clap::Parser;
use secure_patch::Patcher;

#[derive(Parser, Debug)]
#[clap(
name = "secpatch-apply",
version,
about = "rebuild a target from a source and an integrity-checked patch",
long_about = None,
)]
struct ApplyArgs {
    /// source file
    #[clap(value_name = "SOURCE")]
    source_path: String,

    /// target file
    #[clap(value_name = "TARGET")]
    target_path: String,

    /// patch file
    #[clap(value_name = "PATCH")]
    patch_path: String,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .format_target(false)
        .init();
    let args = ApplyArgs::parse();
    if let Err(e) = execute(args) {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn execute(args: ApplyArgs) -> secure_patch::Result<()> {
    secure_patch::initialize();

    // setup input
    let mut source;
    if args.source_path == "-" {
        source = Vec::new();
        io::stdin().read_to_end(&mut source)?;
    } else {
        source = fs::read(&args.source_path)?;
    }
    source.shrink_to_fit();
    let patch = fs::read(&args.patch_path)?;

    // verify before touching the output
    let patcher = Patcher::new(&patch[..])?;
    let target = patcher.apply(&source[..])?;

    if args.target_path == "-" {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        out.write_all(&target[..])?;
        out.flush()?;
    } else {
        fs::write(&args.target_path, &target[..])?;
    }
    log::info!("rebuilt {} target bytes", target.len());
    Ok(())
}
