//! Instruction traces.
//!
//! Each core executes one trace: a text file of `RD <address>` and
//! `WR <address> <value>` lines, conventionally named `input_<core>.txt`.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::main_memory::{Address, Value};
use crate::protocol::CoreId;

/// One decoded memory operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Instruction {
    Read { address: Address },
    Write { address: Address, value: Value },
}

impl Instruction {
    pub fn address(&self) -> Address {
        match *self {
            Instruction::Read { address } => address,
            Instruction::Write { address, .. } => address,
        }
    }
}

/// A line that is neither blank nor a well-formed instruction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("malformed instruction {text:?}")]
pub struct MalformedLine {
    pub text: String,
}

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("failed to open trace {}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read trace {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}:{}: {}", path.display(), line, source)]
    Malformed {
        path: PathBuf,
        line: usize,
        #[source]
        source: MalformedLine,
    },
}

/// A stream of instructions; file-backed for the CLI, in-memory for tests.
pub type TraceSource = Box<dyn Iterator<Item = Result<Instruction, TraceError>> + Send>;

/// Wrap an in-memory instruction list as a trace source.
pub fn from_vec(instructions: Vec<Instruction>) -> TraceSource {
    Box::new(instructions.into_iter().map(Ok))
}

/// Decode one trace line. Blank lines decode to `None`; leading and
/// trailing whitespace is tolerated.
pub fn parse_line(text: &str) -> Result<Option<Instruction>, MalformedLine> {
    let mut tokens = text.split_whitespace();
    let mnemonic = match tokens.next() {
        Some(mnemonic) => mnemonic,
        None => return Ok(None),
    };
    let malformed = || MalformedLine {
        text: text.trim().to_owned(),
    };

    let address = tokens
        .next()
        .and_then(|t| t.parse::<usize>().ok())
        .map(Address)
        .ok_or_else(malformed)?;

    let instruction = match mnemonic {
        "RD" => Instruction::Read { address },
        "WR" => {
            let value = tokens
                .next()
                .and_then(|t| t.parse::<Value>().ok())
                .ok_or_else(malformed)?;
            Instruction::Write { address, value }
        }
        _ => return Err(malformed()),
    };

    if tokens.next().is_some() {
        return Err(malformed());
    }
    Ok(Some(instruction))
}

/// A lazily-decoded trace file. Decoding stops at the first malformed
/// line, which is surfaced with its position.
#[derive(Debug)]
pub struct TraceFile {
    path: PathBuf,
    lines: io::Lines<BufReader<File>>,
    line_no: usize,
}

impl TraceFile {
    /// Open `dir/input_<core>.txt`.
    pub fn open(dir: &Path, core: CoreId) -> Result<TraceFile, TraceError> {
        let path = dir.join(format!("input_{core}.txt"));
        let file = File::open(&path).map_err(|source| TraceError::Open {
            path: path.clone(),
            source,
        })?;
        Ok(TraceFile {
            path,
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for TraceFile {
    type Item = Result<Instruction, TraceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(source) => {
                    return Some(Err(TraceError::Io {
                        path: self.path.clone(),
                        source,
                    }))
                }
            };
            self.line_no += 1;
            match parse_line(&line) {
                Ok(None) => continue,
                Ok(Some(instruction)) => return Some(Ok(instruction)),
                Err(source) => {
                    return Some(Err(TraceError::Malformed {
                        path: self.path.clone(),
                        line: self.line_no,
                        source,
                    }))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::process;

    #[test]
    fn parses_reads_and_writes() {
        assert_eq!(
            parse_line("RD 4").unwrap(),
            Some(Instruction::Read { address: Address(4) })
        );
        assert_eq!(
            parse_line("WR 4 9").unwrap(),
            Some(Instruction::Write {
                address: Address(4),
                value: 9,
            })
        );
        assert_eq!(
            parse_line("  WR 2 -3  ").unwrap(),
            Some(Instruction::Write {
                address: Address(2),
                value: -3,
            })
        );
    }

    #[test]
    fn blank_lines_decode_to_nothing() {
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("   \t ").unwrap(), None);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse_line("JMP 4").is_err());
        assert!(parse_line("RD").is_err());
        assert!(parse_line("RD four").is_err());
        assert!(parse_line("RD -1").is_err());
        assert!(parse_line("WR 4").is_err());
        assert!(parse_line("WR 4 9 extra").is_err());
    }

    #[test]
    fn file_iteration_surfaces_position_of_bad_line() {
        let dir = std::env::temp_dir().join(format!("mesi-sim-trace-{}", process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("input_0.txt"), "WR 4 9\n\nRD 4\nBOGUS\n").unwrap();

        let mut trace = TraceFile::open(&dir, 0).unwrap();
        assert!(matches!(
            trace.next(),
            Some(Ok(Instruction::Write { .. }))
        ));
        assert!(matches!(trace.next(), Some(Ok(Instruction::Read { .. }))));
        match trace.next() {
            Some(Err(TraceError::Malformed { line, .. })) => assert_eq!(line, 4),
            other => panic!("expected a malformed-line error, got {other:?}"),
        }

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let dir = std::env::temp_dir();
        match TraceFile::open(&dir, 999) {
            Err(TraceError::Open { path, .. }) => {
                assert!(path.ends_with("input_999.txt"));
            }
            other => panic!("expected an open error, got {other:?}"),
        }
    }
}
