//! Per-design operating-point results (`Design_OpPoints.csv`).
//!
//! Rows are grouped by design number:
//! `No; iOp; alpha; cl; cd; cm; xtrt; xtrb; dist; dev; flap; weight`.
//! A design's group is complete when the next row carries a different
//! design number or the file ends.

use serde::{Deserialize, Serialize};

use crate::reader::{
    check_index, parse_f64, parse_usize, split_row, GroupAccumulator, ResultParser,
};
use crate::{ResultsError, ResultsResult};

const WEIGHTING_EPS: f64 = 1e-6;

/// Outcome of one operating point for one design.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpPointResult {
    pub op_point: usize,
    pub alpha: f64,
    pub cl: f64,
    pub cd: f64,
    pub cm: f64,
    /// Transition location, upper surface.
    pub xtr_top: f64,
    /// Transition location, lower surface.
    pub xtr_bot: f64,
    /// Distance from the op point's target.
    pub distance: f64,
    pub deviation: f64,
    pub flap_angle: f64,
    /// Weighting actually used for this design.
    pub weighting: f64,
    /// Set at append time when the weighting differs from the same op
    /// point of the immediately preceding design. Never set retroactively.
    pub weighting_changed: bool,
}

pub struct OpPointParser {
    file_name: &'static str,
}

impl OpPointParser {
    pub fn new(file_name: &'static str) -> Self {
        Self { file_name }
    }

    fn row(&self, line_no: usize, fields: &[&str]) -> ResultsResult<OpPointResult> {
        if fields.len() < 12 {
            return Err(ResultsError::Parse {
                file: self.file_name.to_string(),
                line: line_no,
                message: format!("expected 12 columns, found {}", fields.len()),
            });
        }
        Ok(OpPointResult {
            op_point: parse_usize(fields[1], self.file_name, line_no, "op point")?,
            alpha: parse_f64(fields[2], self.file_name, line_no, "alpha")?,
            cl: parse_f64(fields[3], self.file_name, line_no, "cl")?,
            cd: parse_f64(fields[4], self.file_name, line_no, "cd")?,
            cm: parse_f64(fields[5], self.file_name, line_no, "cm")?,
            xtr_top: parse_f64(fields[6], self.file_name, line_no, "xtrt")?,
            xtr_bot: parse_f64(fields[7], self.file_name, line_no, "xtrb")?,
            distance: parse_f64(fields[8], self.file_name, line_no, "dist")?,
            deviation: parse_f64(fields[9], self.file_name, line_no, "dev")?,
            flap_angle: parse_f64(fields[10], self.file_name, line_no, "flap")?,
            weighting: parse_f64(fields[11], self.file_name, line_no, "weight")?,
            weighting_changed: false,
        })
    }

    fn append_group(
        &self,
        design: usize,
        mut rows: Vec<OpPointResult>,
        out: &mut Vec<Vec<OpPointResult>>,
    ) -> ResultsResult<bool> {
        if !check_index(self.file_name, out.len(), design)? {
            return Ok(false);
        }
        // Append-time comparison against the previous design only; records
        // already in the list are never revisited.
        if let Some(previous) = out.last() {
            for (i, row) in rows.iter_mut().enumerate() {
                if let Some(prior) = previous.get(i) {
                    if (row.weighting - prior.weighting).abs() > WEIGHTING_EPS {
                        row.weighting_changed = true;
                    }
                }
            }
        }
        out.push(rows);
        Ok(true)
    }
}

impl ResultParser for OpPointParser {
    type Record = Vec<OpPointResult>;

    fn parse(
        &mut self,
        lines: &[&str],
        out: &mut Vec<Vec<OpPointResult>>,
    ) -> ResultsResult<usize> {
        let mut groups = GroupAccumulator::new();
        let mut added = 0;
        for (line_no, line) in lines.iter().enumerate().skip(1) {
            if line.trim().is_empty() {
                continue;
            }
            let fields = split_row(line);
            let design = parse_usize(
                fields.first().copied().unwrap_or(""),
                self.file_name,
                line_no + 1,
                "design",
            )?;
            let row = self.row(line_no + 1, &fields)?;
            if let Some((key, rows)) = groups.push(design, row) {
                if self.append_group(key, rows, out)? {
                    added += 1;
                }
            }
        }
        if let Some((key, rows)) = groups.finish() {
            if self.append_group(key, rows, out)? {
                added += 1;
            }
        }
        Ok(added)
    }
}
