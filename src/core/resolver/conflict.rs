//! Structured conflict reporting (spec §4E step 7, §7 "surfaced with full
//! context").

use std::fmt;

use crate::version::Requirement;

/// One requirement that contributed to a conflict, with the breadcrumb of
/// names leading to it.
#[derive(Debug, Clone)]
pub struct Contribution {
    pub requirement: Requirement,
    pub from_path: Vec<String>,
}

/// The minimal set of mutually-unsatisfiable requirements the solver found
/// for one package name (spec §7 `ResolutionConflict`).
#[derive(Debug, Clone)]
pub struct ConflictSet {
    pub name: String,
    pub contributions: Vec<Contribution>,
}

impl fmt::Display for ConflictSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Because:")?;
        for c in &self.contributions {
            writeln!(
                f,
                "  {} requires {} {}",
                c.from_path.join(" -> "),
                self.name,
                c.requirement
            )?;
        }
        write!(f, "which cannot all be satisfied at once")
    }
}
