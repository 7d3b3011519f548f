//! Per-design geometry-target results (`Design_GeoTargets.csv`).
//!
//! Rows are grouped by design number:
//! `No; iGeo; type; val; dev; weight`, with the same grouping discipline
//! as the op-point results.

use serde::{Deserialize, Serialize};

use crate::reader::{
    check_index, parse_f64, parse_usize, split_row, GroupAccumulator, ResultParser,
};
use crate::{ResultsError, ResultsResult};

const WEIGHTING_EPS: f64 = 1e-6;

/// Geometric property a target constrains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeoTargetKind {
    Camber,
    Thickness,
}

impl GeoTargetKind {
    fn parse(text: &str) -> Option<Self> {
        if text.eq_ignore_ascii_case("camber") {
            Some(GeoTargetKind::Camber)
        } else if text.eq_ignore_ascii_case("thickness") {
            Some(GeoTargetKind::Thickness)
        } else {
            None
        }
    }
}

/// Outcome of one geometry target for one design.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoTargetResult {
    pub geo_target: usize,
    pub kind: GeoTargetKind,
    pub value: f64,
    pub deviation: f64,
    pub weighting: f64,
    /// See `OpPointResult::weighting_changed`.
    pub weighting_changed: bool,
}

pub struct GeoTargetParser {
    file_name: &'static str,
}

impl GeoTargetParser {
    pub fn new(file_name: &'static str) -> Self {
        Self { file_name }
    }

    fn row(&self, line_no: usize, fields: &[&str]) -> ResultsResult<GeoTargetResult> {
        if fields.len() < 6 {
            return Err(ResultsError::Parse {
                file: self.file_name.to_string(),
                line: line_no,
                message: format!("expected 6 columns, found {}", fields.len()),
            });
        }
        let kind = GeoTargetKind::parse(fields[2]).ok_or_else(|| ResultsError::Parse {
            file: self.file_name.to_string(),
            line: line_no,
            message: format!("unknown geo target type '{}'", fields[2]),
        })?;
        Ok(GeoTargetResult {
            geo_target: parse_usize(fields[1], self.file_name, line_no, "geo target")?,
            kind,
            value: parse_f64(fields[3], self.file_name, line_no, "value")?,
            deviation: parse_f64(fields[4], self.file_name, line_no, "deviation")?,
            weighting: parse_f64(fields[5], self.file_name, line_no, "weight")?,
            weighting_changed: false,
        })
    }

    fn append_group(
        &self,
        design: usize,
        mut rows: Vec<GeoTargetResult>,
        out: &mut Vec<Vec<GeoTargetResult>>,
    ) -> ResultsResult<bool> {
        if !check_index(self.file_name, out.len(), design)? {
            return Ok(false);
        }
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

impl ResultParser for GeoTargetParser {
    type Record = Vec<GeoTargetResult>;

    fn parse(
        &mut self,
        lines: &[&str],
        out: &mut Vec<Vec<GeoTargetResult>>,
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
