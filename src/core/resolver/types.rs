//! Types shared between the solver and its callers (spec §4E, §6).

use std::collections::HashMap;

use crate::package_id::{DeclaredDependency, PackageId};
use crate::version::Version;

/// Abstracts the Registry Store lookups the solver needs, so it can be
/// driven by an in-memory fixture in tests instead of the real fetch path
/// (spec §4D "the resolver never talks to the network directly").
pub trait PackageSource {
    /// Every known version of `name` in `repo`, with its retirement flag.
    /// Order is not significant; the solver sorts by precedence itself.
    fn versions(&self, repo: &str, name: &str) -> Vec<(Version, bool)>;

    /// The declared dependencies of one release. Returns an empty list for
    /// an unknown `(repo, name, version)` rather than erroring — the
    /// solver only calls this for versions `versions()` already reported.
    fn dependencies(&self, repo: &str, name: &str, version: &Version) -> Vec<DeclaredDependency>;
}

/// A version pinned by the lockfile, consulted as a preference (spec §4E
/// step 2) rather than a hard constraint.
#[derive(Debug, Clone)]
pub struct LockedVersion {
    pub repo: String,
    pub version: Version,
}

/// A successful resolution: one concrete release per package name (spec
/// §6 `resolve`).
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub packages: HashMap<String, (PackageId, Version)>,
}

impl Resolution {
    pub fn get(&self, name: &str) -> Option<&(PackageId, Version)> {
        self.packages.get(name)
    }
}
