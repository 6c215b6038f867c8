//! Component A: Version & Requirement (spec §3, §4A).

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::HexError;

/// A pre-release identifier: numeric identifiers compare numerically,
/// everything else compares lexicographically (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PreId {
    Numeric(u64),
    Alpha(String),
}

impl PartialOrd for PreId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PreId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (PreId::Numeric(a), PreId::Numeric(b)) => a.cmp(b),
            (PreId::Alpha(a), PreId::Alpha(b)) => a.cmp(b),
            // A numeric identifier is always less than an alphanumeric one
            // per semver precedence rules.
            (PreId::Numeric(_), PreId::Alpha(_)) => Ordering::Less,
            (PreId::Alpha(_), PreId::Numeric(_)) => Ordering::Greater,
        }
    }
}

impl fmt::Display for PreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreId::Numeric(n) => write!(f, "{n}"),
            PreId::Alpha(s) => write!(f, "{s}"),
        }
    }
}

fn parse_id(s: &str) -> PreId {
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(n) = s.parse::<u64>() {
            return PreId::Numeric(n);
        }
    }
    PreId::Alpha(s.to_string())
}

/// An ordered (major, minor, patch, pre-release sequence, build metadata)
/// tuple (spec §3). Build metadata is preserved for display but never
/// affects ordering or equality.
#[derive(Debug, Clone, Eq)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pre: Vec<PreId>,
    pre_text: String,
    build: String,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Version {
        Version {
            major,
            minor,
            patch,
            pre: Vec::new(),
            pre_text: String::new(),
            build: String::new(),
        }
    }

    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }

    /// The (major, minor, patch) triple, ignoring pre-release/build.
    pub fn triple(&self) -> (u64, u64, u64) {
        (self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || HexError::InvalidVersion(s.to_string());

        let (core_and_pre, build) = match s.split_once('+') {
            Some((a, b)) => (a, b.to_string()),
            None => (s, String::new()),
        };
        let (core, pre_text) = match core_and_pre.split_once('-') {
            Some((a, b)) => (a, b.to_string()),
            None => (core_and_pre, String::new()),
        };

        let mut parts = core.split('.');
        let major = parts.next().ok_or_else(invalid)?;
        let minor = parts.next().ok_or_else(invalid)?;
        let patch = parts.next().ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        if major.is_empty() || minor.is_empty() || patch.is_empty() {
            return Err(invalid());
        }
        let major = major.parse::<u64>().map_err(|_| invalid())?;
        let minor = minor.parse::<u64>().map_err(|_| invalid())?;
        let patch = patch.parse::<u64>().map_err(|_| invalid())?;

        let pre = if pre_text.is_empty() {
            Vec::new()
        } else {
            let mut ids = Vec::new();
            for part in pre_text.split('.') {
                if part.is_empty() {
                    return Err(invalid());
                }
                ids.push(parse_id(part));
            }
            ids
        };

        if !build.is_empty() && build.split('.').any(|p| p.is_empty()) {
            return Err(invalid());
        }

        Ok(Version {
            major,
            minor,
            patch,
            pre,
            pre_text,
            build,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.pre_text.is_empty() {
            write!(f, "-{}", self.pre_text)?;
        }
        if !self.build.is_empty() {
            write!(f, "+{}", self.build)?;
        }
        Ok(())
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl std::hash::Hash for Version {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.major.hash(state);
        self.minor.hash(state);
        self.patch.hash(state);
        self.pre.hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            .then_with(|| match (self.pre.is_empty(), other.pre.is_empty()) {
                // Pre-release versions are *lower* than the corresponding
                // release version (spec §3).
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.pre.cmp(&other.pre),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    /// `~>`; the original patch-component-presence is tracked separately
    /// since `~> 1.2` and `~> 1.2.0` have distinct matching semantics
    /// (spec §4A).
    Pessimistic,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Constraint {
    op: Op,
    version: Version,
    /// Only meaningful when `op == Pessimistic`: whether the text had a
    /// patch component (`~> 1.2.3` vs `~> 1.2`).
    pessimistic_has_patch: bool,
}

impl Constraint {
    fn matches(&self, v: &Version) -> bool {
        match self.op {
            Op::Eq => v == &self.version,
            Op::Ne => v != &self.version,
            Op::Gt => v > &self.version,
            Op::Ge => v >= &self.version,
            Op::Lt => v < &self.version,
            Op::Le => v <= &self.version,
            Op::Pessimistic => {
                let (lo, hi) = self.pessimistic_bounds();
                v >= &lo && v < &hi
            }
        }
    }

    /// `~> M.N` matches `[M.N, M+1.0)`; `~> M.N.P` matches `[M.N.P, M.(N+1).0)`.
    fn pessimistic_bounds(&self) -> (Version, Version) {
        let base = &self.version;
        if self.pessimistic_has_patch {
            (base.clone(), Version::new(base.major, base.minor + 1, 0))
        } else {
            (base.clone(), Version::new(base.major + 1, 0, 0))
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Pessimistic => "~>",
        };
        write!(f, "{op} {}", self.version)
    }
}

fn parse_constraint(text: &str) -> Result<Constraint, HexError> {
    let invalid = || HexError::InvalidRequirement(text.to_string());
    let text = text.trim();

    let (op, rest) = if let Some(r) = text.strip_prefix("~>") {
        (Op::Pessimistic, r)
    } else if let Some(r) = text.strip_prefix(">=") {
        (Op::Ge, r)
    } else if let Some(r) = text.strip_prefix("<=") {
        (Op::Le, r)
    } else if let Some(r) = text.strip_prefix("!=") {
        (Op::Ne, r)
    } else if let Some(r) = text.strip_prefix("==") {
        (Op::Eq, r)
    } else if let Some(r) = text.strip_prefix('>') {
        (Op::Gt, r)
    } else if let Some(r) = text.strip_prefix('<') {
        (Op::Lt, r)
    } else if let Some(r) = text.strip_prefix('=') {
        (Op::Eq, r)
    } else {
        (Op::Eq, text)
    };

    let version_text = rest.trim();
    let has_patch = version_text
        .split(&['-', '+'][..])
        .next()
        .unwrap_or("")
        .matches('.')
        .count()
        >= 2;

    // `~> M.N` has no patch component; fill one in with 0 so `Version::from_str`
    // can still parse it, while remembering the omission for matching.
    let owned;
    let parseable = if op == Op::Pessimistic && !has_patch {
        owned = format!("{version_text}.0");
        owned.as_str()
    } else {
        version_text
    };

    let version = Version::from_str(parseable).map_err(|_| invalid())?;
    Ok(Constraint {
        op,
        version,
        pessimistic_has_patch: has_patch,
    })
}

/// A conjunction of constraints (spec §3). `None` (the null requirement)
/// matches any version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Requirement {
    constraints: Vec<Constraint>,
    text: String,
}

impl Requirement {
    pub fn any() -> Requirement {
        Requirement {
            constraints: Vec::new(),
            text: String::new(),
        }
    }

    pub fn is_any(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn matches(&self, version: &Version) -> bool {
        if self.constraints.is_empty() {
            return true;
        }
        let pre_ok = if version.is_prerelease() {
            // A pre-release version only matches a requirement that itself
            // names a pre-release of the same (major, minor, patch) triple.
            self.constraints.iter().any(|c| {
                c.version.is_prerelease() && c.version.triple() == version.triple()
            })
        } else {
            true
        };
        pre_ok && self.constraints.iter().all(|c| c.matches(version))
    }

    /// Intersects two requirements, keeping every constraint from both
    /// (spec §4E step 1: "Duplicate requirements ... the solver intersects
    /// them").
    pub fn intersect(&self, other: &Requirement) -> Requirement {
        if self.is_any() {
            return other.clone();
        }
        if other.is_any() {
            return self.clone();
        }
        let mut constraints = self.constraints.clone();
        constraints.extend(other.constraints.iter().cloned());
        let text = format!("{} and {}", self.text, other.text);
        Requirement { constraints, text }
    }
}

impl FromStr for Requirement {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Requirement::any());
        }
        let constraints = s
            .split(',')
            .map(parse_constraint)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Requirement {
            constraints,
            text: s.to_string(),
        })
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.constraints.is_empty() {
            write!(f, "*")
        } else {
            write!(f, "{}", self.text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::from_str(s).unwrap()
    }

    #[test]
    fn comparison_is_antisymmetric() {
        let a = v("1.2.3");
        let b = v("1.3.0");
        assert_eq!(a.cmp(&b), Ordering::Less);
        assert_eq!(b.cmp(&a), Ordering::Greater);
    }

    #[test]
    fn prerelease_is_lower_than_release() {
        assert!(v("1.0.0-rc.1") < v("1.0.0"));
    }

    #[test]
    fn prerelease_identifiers_compare_numeric_then_lexicographic() {
        assert!(v("1.0.0-alpha.1") < v("1.0.0-alpha.2"));
        assert!(v("1.0.0-alpha.2") < v("1.0.0-alpha.10"));
        assert!(v("1.0.0-alpha") < v("1.0.0-alpha.1"));
    }

    #[test]
    fn build_metadata_is_ignored_for_ordering_but_kept_for_display() {
        let a = v("1.0.0+001");
        let b = v("1.0.0+002");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "1.0.0+001");
    }

    #[test]
    fn pessimistic_without_patch_matches_minor_range() {
        let req = Requirement::from_str("~> 1.2").unwrap();
        assert!(req.matches(&v("1.2.0")));
        assert!(req.matches(&v("1.9.9")));
        assert!(!req.matches(&v("2.0.0")));
    }

    #[test]
    fn pessimistic_with_patch_matches_patch_range() {
        let req = Requirement::from_str("~> 1.2.3").unwrap();
        assert!(req.matches(&v("1.2.3")));
        assert!(req.matches(&v("1.2.9")));
        assert!(!req.matches(&v("1.3.0")));
    }

    #[test]
    fn pessimistic_with_and_without_patch_are_distinct_requirements() {
        let a = Requirement::from_str("~> 1.2").unwrap();
        let b = Requirement::from_str("~> 1.2.0").unwrap();
        assert_ne!(a, b);
        assert!(a.matches(&v("1.9.0")));
        assert!(!b.matches(&v("1.9.0")));
    }

    #[test]
    fn prerelease_only_matches_requirement_naming_same_triple() {
        let req = Requirement::from_str(">= 1.0.0-rc.1").unwrap();
        assert!(req.matches(&v("1.0.0-rc.2")));
        assert!(!req.matches(&v("1.1.0-rc.1")));
    }

    #[test]
    fn null_requirement_matches_everything() {
        let req = Requirement::any();
        assert!(req.matches(&v("0.0.1")));
        assert!(req.matches(&v("999.0.0")));
    }

    #[test]
    fn invalid_version_text_is_rejected() {
        assert!(Version::from_str("1.2").is_err());
        assert!(Version::from_str("1.2.x").is_err());
    }
}
