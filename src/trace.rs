//! Parsing of the line-oriented memory-reference trace grammar, read lazily
//! one line at a time.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use crate::error::SimError;

/// One parsed trace instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    /// `R addr`
    Read(u64),
    /// `W addr value`
    Write(u64, u8),
    /// `NOP`
    Nop,
}

fn syntax_error(path: &Path, line: usize, text: &str) -> SimError {
    SimError::TraceSyntax {
        path: path.to_path_buf(),
        line,
        text: text.to_string(),
    }
}

/// Parse a single trace line. Returns `Ok(None)` for blank lines and
/// comments, which carry no instruction.
pub fn parse_line(path: &Path, line_no: usize, raw: &str) -> Result<Option<Instruction>, SimError> {
    let line = raw.trim_end();
    let trimmed = line.trim_start();

    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let mut parts = trimmed.split_whitespace();
    let mnemonic = parts.next().expect("trimmed non-empty line has a first token");

    let instruction = match mnemonic {
        "R" => {
            let addr = parts
                .next()
                .and_then(|s| u64::from_str_radix(s, 16).ok())
                .ok_or_else(|| syntax_error(path, line_no, line))?;
            Instruction::Read(addr)
        }
        "W" => {
            let addr = parts
                .next()
                .and_then(|s| u64::from_str_radix(s, 16).ok())
                .ok_or_else(|| syntax_error(path, line_no, line))?;
            let value = parts
                .next()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| syntax_error(path, line_no, line))?;
            Instruction::Write(addr, value)
        }
        "NOP" => Instruction::Nop,
        _ => return Err(syntax_error(path, line_no, line)),
    };

    if parts.next().is_some() {
        return Err(syntax_error(path, line_no, line));
    }

    Ok(Some(instruction))
}

/// Lazily reads instructions out of a trace file, one line at a time,
/// skipping blank lines and comments.
pub struct TraceReader {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: usize,
}

impl TraceReader {
    /// Open the trace file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SimError> {
        let path = path.into();
        let file = File::open(&path)?;
        Ok(TraceReader {
            path,
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }

    /// The path this reader was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for TraceReader {
    type Item = Result<Instruction, SimError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let raw: io::Result<String> = self.lines.next()?;
            let raw = match raw {
                Ok(raw) => raw,
                Err(e) => return Some(Err(SimError::Io(e))),
            };
            self.line_no += 1;

            match parse_line(&self.path, self.line_no, &raw) {
                Ok(Some(instruction)) => return Some(Ok(instruction)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
