//! Composite view over all result files of one optimization run.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use af_core::format_elapsed;

use crate::geo_targets::{GeoTargetParser, GeoTargetResult};
use crate::history::{HistoryEntry, HistoryParser};
use crate::op_points::{OpPointParser, OpPointResult};
use crate::reader::ResultFileReader;
use crate::shapes::{DesignAirfoil, ShapeFormat, ShapeParser};
use crate::ResultsResult;

pub const HISTORY_FILE: &str = "Optimization_History.csv";
pub const OP_POINTS_FILE: &str = "Design_OpPoints.csv";
pub const GEO_TARGETS_FILE: &str = "Design_GeoTargets.csv";
pub const COORDINATES_FILE: &str = "Design_Coordinates.csv";
pub const BEZIERS_FILE: &str = "Design_Beziers.csv";
pub const HICKS_FILE: &str = "Design_Hicks.csv";

/// Written by the optimizer only on graceful completion; doubles as the
/// end reference for the elapsed-time heuristic.
pub const SUMMARY_FILE: &str = "Optimization_Summary.txt";

/// Results directory for an output name.
pub fn results_dir_name(output_name: &str) -> String {
    format!("{}_temp", output_name)
}

/// Owns one reader per result file of a `(working_dir, output_name)` run
/// and derives the aggregate progress metrics a frontend polls.
pub struct OptimizationResults {
    results_dir: PathBuf,
    history: ResultFileReader<HistoryParser>,
    op_points: ResultFileReader<OpPointParser>,
    geo_targets: ResultFileReader<GeoTargetParser>,
    coordinates: ResultFileReader<ShapeParser>,
    beziers: ResultFileReader<ShapeParser>,
    hicks: ResultFileReader<ShapeParser>,
}

impl OptimizationResults {
    pub fn new(working_dir: &Path, output_name: &str) -> ResultsResult<Self> {
        let results_dir = working_dir.join(results_dir_name(output_name));
        Ok(Self {
            history: ResultFileReader::new(
                &results_dir,
                HISTORY_FILE,
                HistoryParser::new(HISTORY_FILE),
            )?,
            op_points: ResultFileReader::new(
                &results_dir,
                OP_POINTS_FILE,
                OpPointParser::new(OP_POINTS_FILE),
            )?,
            geo_targets: ResultFileReader::new(
                &results_dir,
                GEO_TARGETS_FILE,
                GeoTargetParser::new(GEO_TARGETS_FILE),
            )?,
            coordinates: ResultFileReader::new(
                &results_dir,
                COORDINATES_FILE,
                ShapeParser::new(ShapeFormat::Coordinates, COORDINATES_FILE),
            )?,
            beziers: ResultFileReader::new(
                &results_dir,
                BEZIERS_FILE,
                ShapeParser::new(ShapeFormat::Bezier, BEZIERS_FILE),
            )?,
            hicks: ResultFileReader::new(
                &results_dir,
                HICKS_FILE,
                ShapeParser::new(ShapeFormat::HicksHenne, HICKS_FILE),
            )?,
            results_dir,
        })
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// True once the optimizer has created its results directory.
    pub fn has_started(&self) -> bool {
        self.results_dir.is_dir()
    }

    /// Flag every owned reader for a lazy re-read. The single invalidation
    /// entry point the polling tick uses.
    pub fn mark_dirty(&mut self) {
        self.history.set_could_be_dirty();
        self.op_points.set_could_be_dirty();
        self.geo_targets.set_could_be_dirty();
        self.coordinates.set_could_be_dirty();
        self.beziers.set_could_be_dirty();
        self.hicks.set_could_be_dirty();
    }

    pub fn history(&mut self) -> ResultsResult<&[HistoryEntry]> {
        self.history.results()
    }

    pub fn op_point_results(&mut self) -> ResultsResult<&[Vec<OpPointResult>]> {
        self.op_points.results()
    }

    pub fn geo_target_results(&mut self) -> ResultsResult<&[Vec<GeoTargetResult>]> {
        self.geo_targets.results()
    }

    /// Design geometry snapshots from whichever encoding the run is using.
    /// Only one of the three shape files accumulates data; fixed priority
    /// Hicks-Henne, then Bezier, then raw coordinates.
    pub fn design_shapes(&mut self) -> ResultsResult<&[DesignAirfoil]> {
        if !self.hicks.results()?.is_empty() {
            return self.hicks.results();
        }
        if !self.beziers.results()?.is_empty() {
            return self.beziers.results();
        }
        self.coordinates.results()
    }

    /// Seed airfoil coordinates of a Hicks-Henne run, once read.
    pub fn seed_coordinates(&self) -> Option<(&[f64], &[f64])> {
        self.hicks.parser().seed_coordinates()
    }

    /// Optimization steps done so far: history rows minus the initial
    /// zeroth entry.
    pub fn n_steps(&mut self) -> ResultsResult<usize> {
        Ok(self.history.results()?.len().saturating_sub(1))
    }

    /// Number of the latest design: the last history entry carrying a
    /// design index, scanned backward.
    pub fn n_designs(&mut self) -> ResultsResult<usize> {
        Ok(self
            .history
            .results()?
            .iter()
            .rev()
            .find_map(|e| e.design)
            .unwrap_or(0))
    }

    /// Fractional improvement of the latest step (0.0271 for 2.71 %).
    pub fn improvement(&mut self) -> ResultsResult<f64> {
        Ok(self
            .history
            .results()?
            .last()
            .map(|e| e.improvement_pct / 100.0)
            .unwrap_or(0.0))
    }

    /// The optimizer writes the summary file only on graceful completion;
    /// its presence is the sole finished signal.
    pub fn is_finished(&self) -> bool {
        self.results_dir.is_dir() && self.results_dir.join(SUMMARY_FILE).is_file()
    }

    /// Run duration formatted for display, from the oldest result file to
    /// the summary file (or to now for a still-running run). A heuristic:
    /// no explicit start/end timestamp is recorded anywhere.
    pub fn elapsed(&self) -> Option<String> {
        let start = self.oldest_file_mtime()?;
        let end = fs::metadata(self.results_dir.join(SUMMARY_FILE))
            .and_then(|m| m.modified())
            .unwrap_or_else(|_| SystemTime::now());
        let duration = end.duration_since(start).unwrap_or_default();
        Some(format_elapsed(duration))
    }

    fn oldest_file_mtime(&self) -> Option<SystemTime> {
        let entries = fs::read_dir(&self.results_dir).ok()?;
        entries
            .flatten()
            .filter(|e| e.path().is_file())
            .filter_map(|e| e.metadata().ok()?.modified().ok())
            .min()
    }
}
