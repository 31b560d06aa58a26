//! The interactive command loop described in §6: step the whole system one
//! tick per core at a time, or inspect a cache or memory between steps.
//!
//! Built entirely on [`System`]'s public API (`step`, `is_finished`, its
//! caches and memory) plus the `Display` impls on [`Cache`](crate::memory_cache::Cache)
//! and [`MainMemory`](crate::main_memory::MainMemory) for printing — no REPL
//! state leaks back into the core.

use std::io::{self, Write};

use crate::config::Config;
use crate::error::SimError;
use crate::system::System;

/// Print the banner shown once at startup and on `help`.
pub fn print_help(out: &mut impl Write, config: &Config) -> io::Result<()> {
    writeln!(
        out,
        "Using {} byte blocks, {} lines per cache, {} core(s)",
        config.block_size,
        config.line_count,
        config.num_cores()
    )?;
    writeln!(out, "Press ENTER to step every core by one cycle")?;
    for i in 1..=config.num_cores() {
        writeln!(out, "Type c{i} or cache{i} to print cache {i}")?;
    }
    writeln!(out, "Type mem or memory to print main memory")?;
    writeln!(out, "Type exit to quit")?;
    out.flush()
}

/// Drive the REPL to completion: reads lines from `input` until either the
/// user types `exit` or the input stream ends. Returns the first
/// [`SimError`] raised by stepping the system, if any.
pub fn run(
    system: &mut System,
    config: &Config,
    input: &mut impl Iterator<Item = io::Result<String>>,
    out: &mut impl Write,
) -> Result<(), SimError> {
    let mut announced_finished = system.is_finished();

    loop {
        write!(out, "> ")?;
        out.flush()?;

        let Some(line) = input.next() else {
            return Ok(());
        };
        let line = line?;

        match dispatch(line.trim(), system, config, out)? {
            Command::Exit => return Ok(()),
            Command::Step | Command::Inspected => {}
        }

        if system.is_finished() && !announced_finished {
            writeln!(out, "All cores finished!")?;
            announced_finished = true;
        }
    }
}

enum Command {
    /// The clock advanced by one step.
    Step,
    /// A command printed something or was rejected; the clock did not move.
    Inspected,
    /// The user asked to quit.
    Exit,
}

fn dispatch(
    line: &str,
    system: &mut System,
    config: &Config,
    out: &mut impl Write,
) -> Result<Command, SimError> {
    match line.to_ascii_lowercase().as_str() {
        "" => {
            system.step()?;
            Ok(Command::Step)
        }
        "exit" => Ok(Command::Exit),
        "help" => {
            print_help(out, config)?;
            Ok(Command::Inspected)
        }
        "mem" | "memory" => {
            write!(out, "{}", system.memory)?;
            Ok(Command::Inspected)
        }
        other => {
            if let Some(idx) = cache_index(other) {
                match system.caches.get(idx) {
                    Some(cache) => write!(out, "{cache}")?,
                    None => writeln!(out, "no such cache: {other}")?,
                }
            } else {
                writeln!(out, "Unknown command")?;
            }
            Ok(Command::Inspected)
        }
    }
}

/// Parse `c<i>` or `cache<i>` (1-based) into a 0-based cache index.
fn cache_index(command: &str) -> Option<usize> {
    let digits = command
        .strip_prefix("cache")
        .or_else(|| command.strip_prefix('c'))?;
    let one_based: usize = digits.parse().ok()?;
    one_based.checked_sub(1)
}
