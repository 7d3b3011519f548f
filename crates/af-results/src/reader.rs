//! Generic incremental result-file reader.
//!
//! One reader instance watches one file. `read_results()` compares the
//! file's modification time against the last successful read and returns
//! without opening the file when nothing changed; result files grow to
//! thousands of lines and must not be re-parsed on every poll tick. A
//! caller with independent evidence of change (a polling tick) flags the
//! reader dirty instead, and `results()` refreshes lazily on the next
//! access.
//!
//! Parsing is delegated to a `ResultParser`, so the per-file variation
//! (filename, grouping key, record shape) is data, not a subclass family.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::trace;

use crate::{ResultsError, ResultsResult};

/// Format-specific parsing for one result-file flavor.
///
/// `parse` receives the complete file content and must append only records
/// beyond the ones already present, using `out.len()` as the next expected
/// record index. A record whose declared index is below the current count
/// is already known and skipped; above it is a hard error (a skipped record
/// signals a truncated or concurrently rewritten file).
pub trait ResultParser {
    type Record;

    fn parse(&mut self, lines: &[&str], out: &mut Vec<Self::Record>) -> ResultsResult<usize>;
}

/// Mtime-gated reader holding the accumulated records of one file.
pub struct ResultFileReader<P: ResultParser> {
    path: PathBuf,
    parser: P,
    records: Vec<P::Record>,
    last_modified: Option<SystemTime>,
    could_be_dirty: bool,
}

impl<P: ResultParser> ResultFileReader<P> {
    /// Create the reader and perform the initial read.
    pub fn new(dir: &Path, file_name: &str, parser: P) -> ResultsResult<Self> {
        let mut reader = Self {
            path: dir.join(file_name),
            parser,
            records: Vec::new(),
            last_modified: None,
            could_be_dirty: false,
        };
        reader.read_results()?;
        Ok(reader)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn parser(&self) -> &P {
        &self.parser
    }

    /// Flag that the file may have changed; the next `results()` access
    /// re-reads once.
    pub fn set_could_be_dirty(&mut self) {
        self.could_be_dirty = true;
    }

    /// Current records, refreshed first when flagged dirty. The flag is
    /// cleared by the first access, so repeated calls cost one re-read
    /// attempt at most.
    pub fn results(&mut self) -> ResultsResult<&[P::Record]> {
        if self.could_be_dirty {
            self.could_be_dirty = false;
            self.read_results()?;
        }
        Ok(&self.records)
    }

    /// Records as last read, with no refresh.
    pub fn current(&self) -> &[P::Record] {
        &self.records
    }

    /// Re-read the file if its modification time changed since the last
    /// successful read. Returns the count of newly appended records; 0
    /// without opening the file when the mtime is unchanged or the file
    /// does not exist yet.
    pub fn read_results(&mut self) -> ResultsResult<usize> {
        let modified = match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => return Ok(0),
        };
        if self.last_modified == Some(modified) {
            return Ok(0);
        }

        let content = fs::read_to_string(&self.path)?;
        let lines: Vec<&str> = content.lines().collect();
        let added = self.parser.parse(&lines, &mut self.records)?;
        self.last_modified = Some(modified);
        trace!(path = %self.path.display(), added, total = self.records.len(), "result file read");
        Ok(added)
    }
}

/// Split a semicolon-delimited row into trimmed fields.
pub(crate) fn split_row(line: &str) -> Vec<&str> {
    line.split(';').map(|f| f.trim()).collect()
}

pub(crate) fn parse_f64(
    field: &str,
    file: &str,
    line: usize,
    what: &str,
) -> ResultsResult<f64> {
    field.parse::<f64>().map_err(|_| ResultsError::Parse {
        file: file.to_string(),
        line,
        message: format!("{} is not a number: '{}'", what, field),
    })
}

pub(crate) fn parse_usize(
    field: &str,
    file: &str,
    line: usize,
    what: &str,
) -> ResultsResult<usize> {
    field.parse::<usize>().map_err(|_| ResultsError::Parse {
        file: file.to_string(),
        line,
        message: format!("{} is not an index: '{}'", what, field),
    })
}

/// Validate a record's declared index against the accumulated count.
/// `Ok(true)` means append, `Ok(false)` means already present.
pub(crate) fn check_index(file: &str, expected: usize, found: usize) -> ResultsResult<bool> {
    if found < expected {
        Ok(false)
    } else if found == expected {
        Ok(true)
    } else {
        Err(ResultsError::IndexMismatch {
            file: file.to_string(),
            expected,
            found,
        })
    }
}

/// Explicit state machine grouping consecutive rows that share a key.
///
/// States: between groups, or accumulating one. The single flush
/// transition fires on a key change (`push` returns the finished group) or
/// on input exhaustion (`finish`).
pub(crate) struct GroupAccumulator<R> {
    state: GroupState<R>,
}

enum GroupState<R> {
    Idle,
    Accumulating { key: usize, rows: Vec<R> },
}

impl<R> GroupAccumulator<R> {
    pub(crate) fn new() -> Self {
        Self {
            state: GroupState::Idle,
        }
    }

    /// Add a row under `key`; a change of key flushes the previous group.
    pub(crate) fn push(&mut self, key: usize, row: R) -> Option<(usize, Vec<R>)> {
        match &mut self.state {
            GroupState::Idle => {
                self.state = GroupState::Accumulating {
                    key,
                    rows: vec![row],
                };
                None
            }
            GroupState::Accumulating { key: current, rows } if *current == key => {
                rows.push(row);
                None
            }
            GroupState::Accumulating { .. } => {
                let flushed = self.take();
                self.state = GroupState::Accumulating {
                    key,
                    rows: vec![row],
                };
                flushed
            }
        }
    }

    /// Flush the trailing group at end of input.
    pub(crate) fn finish(&mut self) -> Option<(usize, Vec<R>)> {
        self.take()
    }

    fn take(&mut self) -> Option<(usize, Vec<R>)> {
        match std::mem::replace(&mut self.state, GroupState::Idle) {
            GroupState::Idle => None,
            GroupState::Accumulating { key, rows } => Some((key, rows)),
        }
    }
}
