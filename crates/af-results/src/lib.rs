//! af-results: incremental readers over the optimizer's result files.
//!
//! The external optimizer appends to a set of semicolon-delimited files in
//! `<output_name>_temp/` while it runs. Each reader tracks its file's
//! modification time and re-parses only on change, appending newly
//! completed records and never revising previously parsed ones. The
//! `OptimizationResults` aggregator composes the readers and exposes the
//! derived progress metrics a frontend polls.

pub mod aggregator;
pub mod geo_targets;
pub mod history;
pub mod op_points;
pub mod polar;
pub mod reader;
pub mod shapes;

pub use aggregator::{
    OptimizationResults, BEZIERS_FILE, COORDINATES_FILE, GEO_TARGETS_FILE, HICKS_FILE,
    HISTORY_FILE, OP_POINTS_FILE, SUMMARY_FILE,
};
pub use geo_targets::{GeoTargetKind, GeoTargetResult};
pub use history::HistoryEntry;
pub use op_points::OpPointResult;
pub use polar::{load_polar_file, Polar, PolarPoint};
pub use reader::{ResultFileReader, ResultParser};
pub use shapes::{DesignAirfoil, DesignShape, HicksHenneFn, ShapeFormat, ShapeParser};

pub type ResultsResult<T> = Result<T, ResultsError>;

#[derive(thiserror::Error, Debug)]
pub enum ResultsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{file}:{line}: {message}")]
    Parse {
        file: String,
        line: usize,
        message: String,
    },

    #[error("{file}: record index {found} does not follow the {expected} existing records")]
    IndexMismatch {
        file: String,
        expected: usize,
        found: usize,
    },

    #[error("{file}: {message}")]
    Inconsistent { file: String, message: String },
}
