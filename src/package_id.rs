//! Package Identity and Release (spec §3).

use std::fmt;

use crate::version::{Requirement, Version};

/// `(repo, name)` — distinct repos may host distinct packages of the same
/// name (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId {
    pub repo: String,
    pub name: String,
}

impl PackageId {
    pub fn new(repo: impl Into<String>, name: impl Into<String>) -> PackageId {
        PackageId {
            repo: repo.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.repo, self.name)
    }
}

/// One declared dependency of a release, as decoded off the wire (spec §3
/// "Declared dependencies are an ordered sequence of (repo, name,
/// requirement, optional flag, application alias)").
#[derive(Debug, Clone)]
pub struct DeclaredDependency {
    pub repo: String,
    pub name: String,
    pub requirement: Requirement,
    pub optional: bool,
    pub app: String,
}

/// A specific version of a package (spec §3).
#[derive(Debug, Clone)]
pub struct Release {
    pub id: PackageId,
    pub version: Version,
    pub checksum: [u8; 32],
    pub dependencies: Vec<DeclaredDependency>,
    pub retired: Option<RetirementInfo>,
}

#[derive(Debug, Clone)]
pub struct RetirementInfo {
    pub reason: String,
    pub message: String,
}

impl Release {
    pub fn checksum_hex(&self) -> String {
        hex::encode(self.checksum)
    }
}
