//! A reusable in-memory [`PackageSource`] fixture, shared by the
//! integration and property tests in `tests/`. The unit tests inside
//! `hexcore::core::resolver` already exercise the solver's internal
//! mechanics directly; the tests here drive it only through the public
//! `hexcore` API, the way an external caller would.

use std::collections::HashMap;
use std::str::FromStr;

use hexcore::core::resolver::PackageSource;
use hexcore::package_id::DeclaredDependency;
use hexcore::version::{Requirement, Version};

#[derive(Default)]
pub struct Fixture {
    releases: HashMap<(String, String), Vec<(Version, bool, Vec<DeclaredDependency>)>>,
}

impl Fixture {
    pub fn new() -> Fixture {
        Fixture::default()
    }

    /// Registers one release. `deps` is a list of `(repo, name, requirement,
    /// optional, is_override)` — `is_override` is only meaningful for the
    /// top-level tree the test builds separately; dependencies declared by
    /// a release are never themselves overrides (spec §3).
    pub fn release(mut self, repo: &str, name: &str, version: &str, retired: bool, deps: &[(&str, &str, &str, bool)]) -> Fixture {
        let declared = deps
            .iter()
            .map(|(repo, name, requirement, optional)| DeclaredDependency {
                repo: repo.to_string(),
                name: name.to_string(),
                requirement: Requirement::from_str(requirement).unwrap(),
                optional: *optional,
                app: name.to_string(),
            })
            .collect();
        self.releases
            .entry((repo.to_string(), name.to_string()))
            .or_default()
            .push((Version::from_str(version).unwrap(), retired, declared));
        self
    }
}

impl PackageSource for Fixture {
    fn versions(&self, repo: &str, name: &str) -> Vec<(Version, bool)> {
        self.releases
            .get(&(repo.to_string(), name.to_string()))
            .map(|rs| rs.iter().map(|(v, r, _)| (v.clone(), *r)).collect())
            .unwrap_or_default()
    }

    fn dependencies(&self, repo: &str, name: &str, version: &Version) -> Vec<DeclaredDependency> {
        self.releases
            .get(&(repo.to_string(), name.to_string()))
            .and_then(|rs| rs.iter().find(|(v, _, _)| v == version))
            .map(|(_, _, deps)| deps.clone())
            .unwrap_or_default()
    }
}

pub fn req(s: &str) -> Requirement {
    Requirement::from_str(s).unwrap()
}
