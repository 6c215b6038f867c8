//! Component E: conflict-directed backtracking resolver (spec §4E).
//!
//! The search keeps the requirement set, the current assignment, and a
//! cache of candidates already proven bad as plain, cloneable data (`Ctx`)
//! rather than as an implicit call stack, so a failed branch can be
//! abandoned just by dropping its `Ctx` clone.

pub mod conflict;
pub mod types;

use std::collections::{HashMap, HashSet};

use crate::core::dependency::{flatten, DepNode};
use crate::error::HexError;
use crate::package_id::PackageId;
use crate::version::{Requirement, Version};

pub use conflict::{ConflictSet, Contribution};
pub use types::{LockedVersion, PackageSource, Resolution};

#[derive(Debug, Clone)]
struct Active {
    repo: String,
    requirement: Requirement,
    contributions: Vec<Contribution>,
    /// Set once any contributing path is an override node (spec §4E
    /// "Overrides propagation"): this name's own declared dependencies
    /// must not tighten a requirement some other path already settled.
    is_override: bool,
}

#[derive(Debug, Clone, Default)]
struct Ctx {
    active: HashMap<String, Active>,
    pending_optional: HashMap<String, Vec<(String, Contribution)>>,
    order: Vec<String>,
    assigned: HashMap<String, (PackageId, Version)>,
}

impl Ctx {
    /// Merges one requirement into the active set (spec §4E step 1: "the
    /// solver intersects them"; step 1 override rule already applied by
    /// `flatten`). Optional requirements are held in `pending_optional`
    /// until some other path requires the same name outright (spec §3
    /// "Optional dependencies ... add a requirement only when the package
    /// is required by another path").
    fn merge(
        &mut self,
        name: &str,
        repo: &str,
        requirement: &Requirement,
        optional: bool,
        is_override: bool,
        from_path: Vec<String>,
    ) -> Result<(), HexError> {
        let contribution = Contribution {
            requirement: requirement.clone(),
            from_path,
        };

        if optional && !self.active.contains_key(name) {
            self.pending_optional
                .entry(name.to_string())
                .or_default()
                .push((repo.to_string(), contribution));
            return Ok(());
        }

        if !self.active.contains_key(name) {
            self.active.insert(
                name.to_string(),
                Active {
                    repo: repo.to_string(),
                    requirement: Requirement::any(),
                    contributions: Vec::new(),
                    is_override: false,
                },
            );
            self.order.push(name.to_string());
        }

        {
            let existing_repo = &self.active.get(name).unwrap().repo;
            if existing_repo != repo {
                return Err(HexError::RepoConflict {
                    name: name.to_string(),
                    repos: vec![existing_repo.clone(), repo.to_string()],
                });
            }
        }

        let entry = self.active.get_mut(name).unwrap();
        entry.requirement = entry.requirement.intersect(requirement);
        entry.contributions.push(contribution);
        entry.is_override |= is_override;

        if let Some(pending) = self.pending_optional.remove(name) {
            for (pending_repo, pending_contribution) in pending {
                if pending_repo != repo {
                    return Err(HexError::RepoConflict {
                        name: name.to_string(),
                        repos: vec![repo.to_string(), pending_repo],
                    });
                }
                let entry = self.active.get_mut(name).unwrap();
                entry.requirement = entry.requirement.intersect(&pending_contribution.requirement);
                entry.contributions.push(pending_contribution);
            }
        }

        Ok(())
    }

    /// Re-checks every already-assigned name against its current active
    /// requirement (spec §4E step 6, "every active requirement ... is
    /// satisfied by R"). A later candidate's own dependencies can tighten
    /// the requirement on a name an earlier step already fixed a version
    /// for; this is what notices and turns that into a conflict instead of
    /// silently returning an unsatisfied resolution.
    fn first_violated_assignment(&self) -> Option<ConflictSet> {
        self.assigned.iter().find_map(|(name, (_, version))| {
            let active = self.active.get(name)?;
            if active.requirement.matches(version) {
                None
            } else {
                Some(conflict_for(name, active))
            }
        })
    }
}

enum StepOutcome {
    Conflict(ConflictSet),
    Fatal(HexError),
}

fn conflict_for(name: &str, active: &Active) -> ConflictSet {
    ConflictSet {
        name: name.to_string(),
        contributions: active.contributions.clone(),
    }
}

/// Runs the backtracking search (spec §4E steps 2-7).
///
/// `locked` versions are tried first for their name whenever they still
/// satisfy the active requirement, but are not treated as immovable: if
/// every other choice in the search depends on moving off a lock, the
/// search is still free to do so (spec §4E step 2, "otherwise treat the
/// name as free").
fn solve(
    source: &dyn PackageSource,
    ctx: &Ctx,
    idx: usize,
    locked: &HashMap<String, LockedVersion>,
    bad: &mut HashSet<(String, String)>,
) -> Result<Resolution, StepOutcome> {
    if idx >= ctx.order.len() {
        return Ok(Resolution {
            packages: ctx.assigned.clone(),
        });
    }

    let name = ctx.order[idx].clone();
    let active = ctx.active.get(&name).expect("name in order is always active");

    if let Some((_, version)) = ctx.assigned.get(&name) {
        if active.requirement.matches(version) {
            return solve(source, ctx, idx + 1, locked, bad);
        }
        return Err(StepOutcome::Conflict(conflict_for(&name, active)));
    }

    let repo = active.repo.clone();
    let requirement = active.requirement.clone();
    let is_override_node = active.is_override;
    let locked_here = locked.get(&name).filter(|l| l.repo == repo);

    let mut versions = source.versions(&repo, &name);
    versions.sort_by(|a, b| b.0.cmp(&a.0));

    let mut candidates: Vec<Version> = versions
        .into_iter()
        .filter(|(v, retired)| {
            let is_locked = locked_here.map(|l| &l.version == v).unwrap_or(false);
            (!*retired || is_locked) && requirement.matches(v)
        })
        .map(|(v, _)| v)
        .collect();

    if let Some(locked) = locked_here {
        if let Some(pos) = candidates.iter().position(|v| v == &locked.version) {
            let preferred = candidates.remove(pos);
            candidates.insert(0, preferred);
        }
    }

    let mut last_conflict: Option<ConflictSet> = None;
    for version in candidates {
        let key = (name.clone(), version.to_string());
        if bad.contains(&key) {
            continue;
        }

        let mut next = ctx.clone();
        next.assigned
            .insert(name.clone(), (PackageId::new(repo.clone(), name.clone()), version.clone()));

        let mut fatal = None;
        for dep in source.dependencies(&repo, &name, &version) {
            // An override node's own release must not tighten a name some
            // other path already settled (spec §4E "Overrides propagation");
            // it may still introduce names nothing else has touched yet.
            if is_override_node && next.active.contains_key(&dep.name) {
                continue;
            }
            let from_path = vec![name.clone(), dep.name.clone()];
            if let Err(e) = next.merge(&dep.name, &dep.repo, &dep.requirement, dep.optional, false, from_path) {
                fatal = Some(e);
                break;
            }
        }
        if let Some(e) = fatal {
            return Err(StepOutcome::Fatal(e));
        }

        if let Some(conflict) = next.first_violated_assignment() {
            bad.insert(key);
            last_conflict = Some(conflict);
            continue;
        }

        match solve(source, &next, idx + 1, locked, bad) {
            Ok(resolution) => return Ok(resolution),
            Err(StepOutcome::Fatal(e)) => return Err(StepOutcome::Fatal(e)),
            Err(StepOutcome::Conflict(conflict)) => {
                bad.insert(key);
                last_conflict = Some(conflict);
            }
        }
    }

    Err(StepOutcome::Conflict(
        last_conflict.unwrap_or_else(|| conflict_for(&name, active)),
    ))
}

/// Resolves a dependency tree against a package source (spec §6
/// `resolve(tree, lock) -> resolution | conflict`).
pub fn resolve(
    source: &dyn PackageSource,
    roots: &[DepNode],
    locked: &HashMap<String, LockedVersion>,
) -> Result<Resolution, HexError> {
    let mut ctx = Ctx::default();
    for flat in flatten(roots) {
        ctx.merge(
            &flat.name,
            &flat.repo,
            &flat.requirement,
            flat.optional,
            flat.is_override,
            flat.from_path,
        )?;
    }

    let mut bad = HashSet::new();
    match solve(source, &ctx, 0, locked, &mut bad) {
        Ok(resolution) => Ok(resolution),
        Err(StepOutcome::Fatal(e)) => Err(e),
        Err(StepOutcome::Conflict(conflict)) => Err(HexError::ResolutionConflict {
            name: conflict.name.clone(),
            conflict,
        }),
    }
}
