//! Per-design geometry snapshots in the optimizer's three shape-function
//! encodings.
//!
//! `Design_Coordinates.csv` carries an x row and a y row per design,
//! `Design_Beziers.csv` a Top and a Bot control-point row, and
//! `Design_Hicks.csv` the seed airfoil's raw coordinate rows (design 0)
//! followed by per-side Hicks-Henne parameter rows, triples of
//! (strength, location, width). Only one encoding is active per
//! optimization run; the readers for the other two simply stay empty.
//!
//! A design materializes once all of its rows are seen. A trailing
//! incomplete group is left pending for the next read (the file is still
//! growing); an incomplete group in the middle of the file is corrupt.

use serde::{Deserialize, Serialize};

use crate::reader::{check_index, parse_f64, parse_usize, split_row, GroupAccumulator, ResultParser};
use crate::{ResultsError, ResultsResult};

/// One Hicks-Henne bump function on one airfoil side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HicksHenneFn {
    pub strength: f64,
    pub location: f64,
    pub width: f64,
}

/// Geometry payload of one design, in the encoding the run is using.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DesignShape {
    /// Raw coordinate arrays.
    Coordinates { x: Vec<f64>, y: Vec<f64> },
    /// Bezier control points per side, as (x, y) pairs.
    Bezier {
        top: Vec<(f64, f64)>,
        bottom: Vec<(f64, f64)>,
    },
    /// Hicks-Henne perturbations applied against the seed coordinates.
    HicksHenne {
        top: Vec<HicksHenneFn>,
        bottom: Vec<HicksHenneFn>,
    },
}

/// Geometry snapshot of one optimizer-produced design.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignAirfoil {
    pub design: usize,
    pub name: String,
    pub shape: DesignShape,
}

/// Which file format a `ShapeParser` consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShapeFormat {
    Coordinates,
    Bezier,
    HicksHenne,
}

struct ShapeRow {
    label: String,
    name: String,
    values: Vec<f64>,
    line: usize,
}

/// Parser over any of the three shape files; the format is data.
pub struct ShapeParser {
    format: ShapeFormat,
    file_name: &'static str,
    /// Seed coordinates of a Hicks-Henne run, read exactly once.
    seed: Option<(Vec<f64>, Vec<f64>)>,
}

impl ShapeParser {
    pub fn new(format: ShapeFormat, file_name: &'static str) -> Self {
        Self {
            format,
            file_name,
            seed: None,
        }
    }

    /// Seed airfoil coordinates of a Hicks-Henne run, once design 0 was read.
    pub fn seed_coordinates(&self) -> Option<(&[f64], &[f64])> {
        self.seed.as_ref().map(|(x, y)| (x.as_slice(), y.as_slice()))
    }

    fn row(&self, line_no: usize, fields: &[&str]) -> ResultsResult<ShapeRow> {
        if fields.len() < 4 {
            return Err(ResultsError::Parse {
                file: self.file_name.to_string(),
                line: line_no,
                message: format!("expected at least 4 columns, found {}", fields.len()),
            });
        }
        let mut values = Vec::with_capacity(fields.len() - 3);
        for field in &fields[3..] {
            if field.is_empty() {
                continue;
            }
            values.push(parse_f64(field, self.file_name, line_no, "value")?);
        }
        Ok(ShapeRow {
            label: fields[2].to_string(),
            name: fields[1].to_string(),
            values,
            line: line_no,
        })
    }

    fn find_row<'a>(&self, rows: &'a [ShapeRow], label: &str) -> Option<&'a ShapeRow> {
        rows.iter().find(|r| r.label.eq_ignore_ascii_case(label))
    }

    fn coordinates_from(&self, rows: &[ShapeRow]) -> ResultsResult<Option<(Vec<f64>, Vec<f64>)>> {
        let x = self.find_row(rows, "x");
        let y = self.find_row(rows, "y");
        let (x, y) = match (x, y) {
            (Some(x), Some(y)) => (x, y),
            _ => return Ok(None),
        };
        if x.values.len() != y.values.len() {
            return Err(ResultsError::Inconsistent {
                file: self.file_name.to_string(),
                message: format!(
                    "x and y rows near line {} differ in length ({} vs {})",
                    x.line,
                    x.values.len(),
                    y.values.len()
                ),
            });
        }
        Ok(Some((x.values.clone(), y.values.clone())))
    }

    fn bezier_side(&self, row: &ShapeRow) -> ResultsResult<Vec<(f64, f64)>> {
        if row.values.len() % 2 != 0 {
            return Err(ResultsError::Inconsistent {
                file: self.file_name.to_string(),
                message: format!("odd control-point value count on line {}", row.line),
            });
        }
        Ok(row.values.chunks(2).map(|p| (p[0], p[1])).collect())
    }

    fn hicks_side(&self, row: &ShapeRow) -> ResultsResult<Vec<HicksHenneFn>> {
        if row.values.len() % 3 != 0 {
            return Err(ResultsError::Inconsistent {
                file: self.file_name.to_string(),
                message: format!("hicks-henne values on line {} are not triples", row.line),
            });
        }
        Ok(row
            .values
            .chunks(3)
            .map(|t| HicksHenneFn {
                strength: t[0],
                location: t[1],
                width: t[2],
            })
            .collect())
    }

    /// Build the design's airfoil once all rows are present; `None` while
    /// rows are still missing.
    fn materialize(
        &mut self,
        design: usize,
        rows: &[ShapeRow],
    ) -> ResultsResult<Option<DesignAirfoil>> {
        let name = rows
            .first()
            .map(|r| r.name.clone())
            .unwrap_or_default();

        let shape = match self.format {
            ShapeFormat::Coordinates => match self.coordinates_from(rows)? {
                Some((x, y)) => DesignShape::Coordinates { x, y },
                None => return Ok(None),
            },
            ShapeFormat::Bezier => {
                let top = self.find_row(rows, "Top");
                let bottom = self.find_row(rows, "Bot");
                match (top, bottom) {
                    (Some(top), Some(bottom)) => DesignShape::Bezier {
                        top: self.bezier_side(top)?,
                        bottom: self.bezier_side(bottom)?,
                    },
                    _ => return Ok(None),
                }
            }
            ShapeFormat::HicksHenne => {
                if design == 0 {
                    // The zeroth group of the hicks file is the seed
                    // airfoil's raw coordinates, kept in reader-local state.
                    match self.coordinates_from(rows)? {
                        Some((x, y)) => {
                            if self.seed.is_none() {
                                self.seed = Some((x.clone(), y.clone()));
                            }
                            DesignShape::Coordinates { x, y }
                        }
                        None => return Ok(None),
                    }
                } else {
                    let top = self.find_row(rows, "Top");
                    let bottom = self.find_row(rows, "Bot");
                    match (top, bottom) {
                        (Some(top), Some(bottom)) => DesignShape::HicksHenne {
                            top: self.hicks_side(top)?,
                            bottom: self.hicks_side(bottom)?,
                        },
                        _ => return Ok(None),
                    }
                }
            }
        };

        Ok(Some(DesignAirfoil {
            design,
            name,
            shape,
        }))
    }

    fn append_group(
        &mut self,
        design: usize,
        rows: Vec<ShapeRow>,
        out: &mut Vec<DesignAirfoil>,
        at_eof: bool,
    ) -> ResultsResult<bool> {
        if !check_index(self.file_name, out.len(), design)? {
            return Ok(false);
        }
        match self.materialize(design, &rows)? {
            Some(airfoil) => {
                out.push(airfoil);
                Ok(true)
            }
            // The file is written row by row: a short trailing group is a
            // design still being flushed and is retried on the next read.
            // Anywhere else it means rows went missing.
            None if at_eof => Ok(false),
            None => Err(ResultsError::Inconsistent {
                file: self.file_name.to_string(),
                message: format!("design {} is missing one of its rows", design),
            }),
        }
    }
}

impl ResultParser for ShapeParser {
    type Record = DesignAirfoil;

    fn parse(&mut self, lines: &[&str], out: &mut Vec<DesignAirfoil>) -> ResultsResult<usize> {
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
                if self.append_group(key, rows, out, false)? {
                    added += 1;
                }
            }
        }
        if let Some((key, rows)) = groups.finish() {
            if self.append_group(key, rows, out, true)? {
                added += 1;
            }
        }
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(
        format: ShapeFormat,
        lines: &[&str],
        out: &mut Vec<DesignAirfoil>,
    ) -> ResultsResult<usize> {
        ShapeParser::new(format, "shapes").parse(lines, out)
    }

    #[test]
    fn coordinate_designs_need_both_rows() {
        let lines = vec![
            "No; Name; Coord; values",
            "0; Seed; x; 1.0; 0.5; 0.0",
            "0; Seed; y; 0.0; 0.05; 0.0",
            "1; Design 1; x; 1.0; 0.5; 0.0",
        ];
        let mut out = Vec::new();
        // Design 1's y row has not arrived yet: design 0 lands, 1 pends.
        assert_eq!(parse(ShapeFormat::Coordinates, &lines, &mut out).unwrap(), 1);
        assert_eq!(out.len(), 1);
        match &out[0].shape {
            DesignShape::Coordinates { x, y } => {
                assert_eq!(x.len(), 3);
                assert_eq!(y[1], 0.05);
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn pending_design_completes_on_next_read() {
        let mut lines = vec![
            "No; Name; Coord; values",
            "0; Seed; x; 1.0; 0.5; 0.0",
            "0; Seed; y; 0.0; 0.05; 0.0",
            "1; Design 1; x; 1.0; 0.5; 0.0",
        ];
        let mut parser = ShapeParser::new(ShapeFormat::Coordinates, "shapes");
        let mut out = Vec::new();
        assert_eq!(parser.parse(&lines, &mut out).unwrap(), 1);

        lines.push("1; Design 1; y; 0.0; 0.06; 0.0");
        assert_eq!(parser.parse(&lines, &mut out).unwrap(), 1);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].name, "Design 1");
    }

    #[test]
    fn missing_row_mid_file_is_corrupt() {
        let lines = vec![
            "No; Name; Coord; values",
            "0; Seed; x; 1.0; 0.5; 0.0",
            "1; Design 1; x; 1.0; 0.5; 0.0",
            "1; Design 1; y; 0.0; 0.06; 0.0",
        ];
        let mut out = Vec::new();
        assert!(matches!(
            parse(ShapeFormat::Coordinates, &lines, &mut out).unwrap_err(),
            ResultsError::Inconsistent { .. }
        ));
    }

    #[test]
    fn bezier_rows_pair_into_control_points() {
        let lines = vec![
            "No; Name; Side; points",
            "0; Seed; Top; 0.0; 0.0; 0.0; 0.08; 0.4; 0.12; 1.0; 0.0",
            "0; Seed; Bot; 0.0; 0.0; 0.0; -0.05; 0.4; -0.06; 1.0; 0.0",
        ];
        let mut out = Vec::new();
        assert_eq!(parse(ShapeFormat::Bezier, &lines, &mut out).unwrap(), 1);
        match &out[0].shape {
            DesignShape::Bezier { top, bottom } => {
                assert_eq!(top.len(), 4);
                assert_eq!(top[2], (0.4, 0.12));
                assert_eq!(bottom[1], (0.0, -0.05));
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn hicks_reader_caches_seed_and_parses_triples() {
        let lines = vec![
            "No; Name; Coord; values",
            "0; Seed; x; 1.0; 0.5; 0.0",
            "0; Seed; y; 0.0; 0.05; 0.0",
            "1; Design 1; Top; 0.01; 0.3; 1.0; -0.02; 0.7; 0.8",
            "1; Design 1; Bot; 0.005; 0.5; 1.2",
        ];
        let mut parser = ShapeParser::new(ShapeFormat::HicksHenne, "hicks");
        let mut out = Vec::new();
        assert_eq!(parser.parse(&lines, &mut out).unwrap(), 2);

        let (seed_x, _) = parser.seed_coordinates().unwrap();
        assert_eq!(seed_x, &[1.0, 0.5, 0.0]);

        match &out[1].shape {
            DesignShape::HicksHenne { top, bottom } => {
                assert_eq!(top.len(), 2);
                assert_eq!(bottom.len(), 1);
                assert!((top[1].location - 0.7).abs() < 1e-12);
                assert!((bottom[0].width - 1.2).abs() < 1e-12);
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }
}
