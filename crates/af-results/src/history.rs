//! Iteration history (`Optimization_History.csv`).
//!
//! One row per optimization step:
//! `Iter; Design; Objective; %Improve; Design-radius`, the design column
//! blank for steps that produced no new design.

use serde::{Deserialize, Serialize};

use crate::reader::{check_index, parse_f64, parse_usize, split_row, ResultParser};
use crate::{ResultsError, ResultsResult};

/// One optimization step, immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Step index, monotonic from 0.
    pub step: usize,
    /// Design produced at this step, if any.
    pub design: Option<usize>,
    /// Objective function value.
    pub objective: f64,
    /// Percent improvement over the previous design.
    pub improvement_pct: f64,
    /// Particle-swarm design radius (convergence metric).
    pub design_radius: f64,
}

pub struct HistoryParser {
    file_name: &'static str,
}

impl HistoryParser {
    pub fn new(file_name: &'static str) -> Self {
        Self { file_name }
    }
}

impl ResultParser for HistoryParser {
    type Record = HistoryEntry;

    fn parse(&mut self, lines: &[&str], out: &mut Vec<HistoryEntry>) -> ResultsResult<usize> {
        let mut added = 0;
        // Header row carries the column names, not data.
        for (line_no, line) in lines.iter().enumerate().skip(1) {
            if line.trim().is_empty() {
                continue;
            }
            let fields = split_row(line);
            if fields.len() < 5 {
                return Err(ResultsError::Parse {
                    file: self.file_name.to_string(),
                    line: line_no + 1,
                    message: format!("expected 5 columns, found {}", fields.len()),
                });
            }

            let step = parse_usize(fields[0], self.file_name, line_no + 1, "step")?;
            if !check_index(self.file_name, out.len(), step)? {
                continue;
            }

            let design = if fields[1].is_empty() {
                None
            } else {
                Some(parse_usize(fields[1], self.file_name, line_no + 1, "design")?)
            };
            out.push(HistoryEntry {
                step,
                design,
                objective: parse_f64(fields[2], self.file_name, line_no + 1, "objective")?,
                improvement_pct: parse_f64(
                    fields[3],
                    self.file_name,
                    line_no + 1,
                    "improvement",
                )?,
                design_radius: parse_f64(fields[4], self.file_name, line_no + 1, "radius")?,
            });
            added += 1;
        }
        Ok(added)
    }
}
