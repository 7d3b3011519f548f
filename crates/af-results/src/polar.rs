//! Reader for xfoil-style polar files the Worker produces.
//!
//! A polar file carries a text preamble (`Calculated polar for: <name>`,
//! Re/Mach/ncrit line) followed by a column-header row, a dashed rule and
//! whitespace-separated numeric rows:
//!
//! ```text
//!    alpha    CL        CD       CDp       CM    Top Xtr  Bot Xtr
//!   ------ -------- --------- --------- -------- -------- --------
//!   -2.000  -0.1041  0.00535  0.00023  -0.0523   0.7512   0.4221
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{ResultsError, ResultsResult};

/// One operating point of a polar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PolarPoint {
    pub alpha: f64,
    pub cl: f64,
    pub cd: f64,
    pub cdp: f64,
    pub cm: f64,
    pub xtr_top: f64,
    pub xtr_bot: f64,
}

/// A parsed polar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Polar {
    /// Airfoil name from the preamble, if present.
    pub airfoil_name: Option<String>,
    pub points: Vec<PolarPoint>,
}

/// Best-effort probe for a file another process still holds open for
/// writing. A rename onto itself fails on platforms that lock open files;
/// a file found in use is skipped for the tick and retried on the next.
pub fn file_in_use(path: &Path) -> bool {
    fs::rename(path, path).is_err()
}

/// Parse a polar file.
pub fn load_polar_file(path: &Path) -> ResultsResult<Polar> {
    let content = fs::read_to_string(path)?;
    let file = path.display().to_string();

    let mut airfoil_name = None;
    let mut in_table = false;
    let mut past_rule = false;
    let mut points = Vec::new();

    for (line_no, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if !in_table {
            if let Some(rest) = trimmed.strip_prefix("Calculated polar for:") {
                airfoil_name = Some(rest.trim().to_string());
            }
            if trimmed.starts_with("alpha") {
                in_table = true;
            }
            continue;
        }
        if !past_rule {
            // The dashed rule under the column headers.
            if trimmed.starts_with('-') && trimmed.chars().all(|c| c == '-' || c == ' ') {
                past_rule = true;
                continue;
            }
            past_rule = true;
        }

        let values: Vec<f64> = trimmed
            .split_whitespace()
            .map(|t| t.parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| ResultsError::Parse {
                file: file.clone(),
                line: line_no + 1,
                message: format!("polar row is not numeric: '{}'", trimmed),
            })?;
        if values.len() < 7 {
            return Err(ResultsError::Parse {
                file: file.clone(),
                line: line_no + 1,
                message: format!("expected 7 polar columns, found {}", values.len()),
            });
        }
        points.push(PolarPoint {
            alpha: values[0],
            cl: values[1],
            cd: values[2],
            cdp: values[3],
            cm: values[4],
            xtr_top: values[5],
            xtr_bot: values[6],
        });
    }

    if !in_table {
        return Err(ResultsError::Parse {
            file,
            line: 0,
            message: "no polar table header found".to_string(),
        });
    }

    Ok(Polar {
        airfoil_name,
        points,
    })
}
