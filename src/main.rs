//! Cycle-stepped simulator of a multi-core shared-memory subsystem under a
//! snooping-bus MESI coherence protocol.
//!
//! This binary wires together [`main_memory`], [`memory_cache`], [`bus`], and
//! [`core`] into a [`system::System`], then drives it from a small REPL: press
//! enter to step every core by one tick, or type a command to inspect state.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod bus;
mod config;
mod core;
mod error;
mod main_memory;
mod memory_cache;
mod repl;
mod system;
mod trace;

use config::Config;
use system::System;

/// Cycle-stepped MESI cache coherence simulator over a snooping bus.
#[derive(Parser, Debug)]
#[command(
    name = "mesi-sim",
    author,
    version,
    about = "Cycle-stepped MESI cache coherence simulator over a snooping bus",
    long_about = "Drives one core per trace file against its own fully-associative, \
                  write-back, write-invalidate cache, all sharing a broadcast bus and \
                  main memory. Press enter at the prompt to advance every core by one \
                  tick; type `help` at the prompt for the rest of the commands."
)]
struct Cli {
    /// Trace file for one core. Pass one per core (at least one), in the
    /// order the cores should be numbered.
    #[arg(required = true, num_args = 1..)]
    trace: Vec<PathBuf>,

    /// Block size in bytes, shared by memory and every cache.
    #[arg(short = 'b', long, default_value_t = 8)]
    block_size: u64,

    /// Number of lines per cache.
    #[arg(short = 'l', long, default_value_t = 3)]
    lines: usize,

    /// Cycles spent in WaitingForMemory after a miss that reaches main
    /// memory.
    #[arg(short = 'w', long, default_value_t = 2)]
    wait_cycles: u32,

    /// PRNG seed for reproducible memory initialization; omit to seed from
    /// entropy.
    #[arg(short = 's', long)]
    seed: Option<u64>,
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        Config {
            block_size: cli.block_size,
            line_count: cli.lines,
            trace_paths: cli.trace,
            wait_cycles: cli.wait_cycles,
            seed: cli.seed,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let config = Config::from(Cli::parse());

    let mut system = match System::new(&config) {
        Ok(system) => system,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };
    info!(
        block_size = config.block_size,
        lines = config.line_count,
        cores = config.num_cores(),
        "simulator ready"
    );

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut input = stdin.lock().lines();

    repl::print_help(&mut out, &config).ok();

    if let Err(e) = repl::run(&mut system, &config, &mut input, &mut out) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}
