//! Fortran-namelist input files for the external programs.
//!
//! Both Xoptfoil2 and the Worker read their options from namelist-format
//! text (`&group ... /` blocks). Generated inputs are written to the
//! working directory under a `tmp~<name>.inp` name and removed again by
//! the owning proxy's `finalize()`.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ExecResult;

/// One namelist group (`&name ... /`).
#[derive(Clone, Debug)]
pub struct Namelist {
    name: String,
    entries: Vec<(String, NamelistValue)>,
}

#[derive(Clone, Debug)]
pub enum NamelistValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    FloatList(Vec<f64>),
}

impl Namelist {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Vec::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: NamelistValue) -> &mut Self {
        self.entries.push((key.to_string(), value));
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "&{}", self.name);
        for (key, value) in &self.entries {
            let _ = writeln!(out, "  {} = {}", key, render_value(value));
        }
        out.push_str("/\n");
        out
    }
}

fn render_value(value: &NamelistValue) -> String {
    match value {
        NamelistValue::Bool(true) => ".true.".to_string(),
        NamelistValue::Bool(false) => ".false.".to_string(),
        NamelistValue::Int(i) => i.to_string(),
        NamelistValue::Float(f) => render_float(*f),
        NamelistValue::Str(s) => format!("'{}'", s),
        NamelistValue::FloatList(fs) => fs
            .iter()
            .map(|f| render_float(*f))
            .collect::<Vec<_>>()
            .join(", "),
    }
}

/// Floats keep at least one decimal so Fortran reads them as reals.
fn render_float(f: f64) -> String {
    if f == f.trunc() && f.abs() < 1.0e15 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

/// Write the groups as a temp input file `tmp~<name>.inp` in `workdir`.
pub fn write_temp_input(workdir: &Path, name: &str, groups: &[Namelist]) -> ExecResult<PathBuf> {
    let path = workdir.join(format!("tmp~{}.inp", name));
    let mut content = String::new();
    for group in groups {
        content.push_str(&group.render());
    }
    fs::write(&path, content)?;
    Ok(path)
}
