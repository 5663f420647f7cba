//! Executable for driving an ordered collection with line oriented commands.
//!
//! Reads commands from a file or stdin and writes the results to a file or stdout. Run with `help` on the input to
//! see the supported commands.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

use clap::{ArgAction, Parser};
use ordered_collection::harness::Harness;
use std::{
    fs::File,
    io::{self, BufRead, BufReader, Write},
    path::PathBuf,
};

#[derive(Parser, Debug)]
struct Args {
    /// Optional path for the input file containing the commands. If not specified, commands are read from stdin.
    input_path: Option<PathBuf>,
    /// Optional path for the output file. If not specified, the output will be printed to stdout.
    #[arg(short, long)]
    output_path: Option<PathBuf>,
    /// Increase logging on stderr, may be repeated.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

/// Builds the stderr logger for the given `-v` count.
fn log_builder(verbose: u8) -> env_logger::Builder {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    let mut builder = env_logger::Builder::new();
    // Slot reuse in the node storage is too chatty even for -vvv.
    builder.filter_level(level).filter_module("ordered_collection::node", level.min(log::LevelFilter::Debug));
    builder
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    log_builder(args.verbose).parse_default_env().try_init().map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    let input: Box<dyn BufRead> = match &args.input_path {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(io::stdin().lock()),
    };

    // Write to standard out if no output file is specified.
    match args.output_path {
        Some(path) => run(input, File::create(path)?),
        None => run(input, io::stdout().lock()),
    }
}

fn run<R: BufRead, W: Write>(input: R, out: W) -> io::Result<()> {
    let mut harness = Harness::new(out);
    harness.run(input).map_err(|e| {
        eprintln!("Error executing commands: {}", e);
        e
    })?;
    harness.finish()?;
    Ok(())
}
