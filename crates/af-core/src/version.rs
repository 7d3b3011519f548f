//! Dot-separated program version parsing and comparison.
//!
//! External programs report versions like "1.0.6" on their help output.
//! Components are compared pairwise as integers; a missing component
//! counts as 0, so "1.0" == "1.0.0" and "1.0.6" > "1.0".

use std::cmp::Ordering;
use std::fmt;

use crate::error::{CoreError, CoreResult};

/// A parsed dot-separated version ("1", "1.0", "1.0.6", ...).
///
/// Equality follows comparison, so "1.0" == "1.0.0".
#[derive(Clone, Debug)]
pub struct ProgramVersion {
    components: Vec<u32>,
}

impl ProgramVersion {
    /// Parse a version string. Every dot-separated component must be a
    /// non-negative integer; an empty string is rejected.
    pub fn parse(text: &str) -> CoreResult<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(CoreError::BadVersion {
                text: text.to_string(),
            });
        }
        let mut components = Vec::new();
        for part in trimmed.split('.') {
            let value = part.parse::<u32>().map_err(|_| CoreError::BadVersion {
                text: text.to_string(),
            })?;
            components.push(value);
        }
        Ok(Self { components })
    }

    /// Component at `idx`, treating missing components as 0.
    fn component(&self, idx: usize) -> u32 {
        self.components.get(idx).copied().unwrap_or(0)
    }

    /// True if `self` is at least `minimum`.
    pub fn meets_minimum(&self, minimum: &ProgramVersion) -> bool {
        self.cmp(minimum) != Ordering::Less
    }
}

impl Ord for ProgramVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let n = self.components.len().max(other.components.len());
        for i in 0..n {
            match self.component(i).cmp(&other.component(i)) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for ProgramVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ProgramVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ProgramVersion {}

impl fmt::Display for ProgramVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for c in &self.components {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{}", c)?;
            first = false;
        }
        Ok(())
    }
}
