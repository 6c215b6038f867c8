//! Integration tests driving the resolver only through `hexcore`'s public
//! surface (spec §8 "Concrete scenarios" and "Boundary behaviors").

use std::collections::HashMap;

use hexcore::core::dependency::DepNode;
use hexcore::core::resolver::{resolve, LockedVersion, Resolution};
use hexcore::error::HexError;
use resolver_tests::{req, Fixture};

fn resolve_with_no_lock(fixture: &Fixture, roots: &[DepNode]) -> Result<Resolution, HexError> {
    resolve(fixture, roots, &HashMap::new())
}

#[test]
fn override_suppresses_the_overriding_package_s_own_transitive_requirement() {
    // Spec §8 scenario 6: top-level declares A ~> 1.0 and B ~> 1.0
    // (override); B declares A ~> 2.0. A must come from the top-level
    // requirement, not B's.
    let fixture = Fixture::new()
        .release("hexpm", "a", "1.0.0", false, &[])
        .release("hexpm", "a", "2.0.0", false, &[])
        .release("hexpm", "b", "1.0.0", false, &[("hexpm", "a", "~> 2.0", false)]);

    let roots = vec![
        DepNode::new("hexpm", "a", req("~> 1.0")),
        DepNode::new("hexpm", "b", req("~> 1.0")).overriding(true),
    ];

    let resolution = resolve_with_no_lock(&fixture, &roots).unwrap();
    let (_, version) = resolution.get("a").unwrap();
    assert_eq!(version.triple(), (1, 0, 0));
}

#[test]
fn a_package_required_from_two_repos_is_a_repo_conflict() {
    let fixture = Fixture::new()
        .release("hexpm", "a", "1.0.0", false, &[])
        .release("hexpm", "shared", "1.0.0", false, &[("hexpm", "a", "~> 1.0", false)])
        .release("private", "shared", "1.0.0", false, &[("private", "a", "~> 1.0", false)]);

    let roots = vec![
        DepNode::new("hexpm", "shared", req("~> 1.0")),
        DepNode::new("private", "shared", req("~> 1.0")),
    ];

    let err = resolve_with_no_lock(&fixture, &roots).unwrap_err();
    assert!(matches!(err, HexError::RepoConflict { .. }));
}

#[test]
fn two_incompatible_ranges_on_the_same_package_fail_with_resolution_conflict() {
    let fixture = Fixture::new()
        .release("hexpm", "a", "1.0.0", false, &[])
        .release("hexpm", "a", "2.0.0", false, &[])
        .release("hexpm", "b", "1.0.0", false, &[("hexpm", "a", "~> 1.0", false)])
        .release("hexpm", "c", "1.0.0", false, &[("hexpm", "a", "~> 2.0", false)]);

    let roots = vec![
        DepNode::new("hexpm", "b", req("~> 1.0")),
        DepNode::new("hexpm", "c", req("~> 1.0")),
    ];

    let err = resolve_with_no_lock(&fixture, &roots).unwrap_err();
    assert!(matches!(err, HexError::ResolutionConflict { .. }));
}

#[test]
fn optional_dependency_is_only_pulled_in_once_something_else_requires_it_outright() {
    let fixture = Fixture::new()
        .release("hexpm", "a", "1.0.0", false, &[("hexpm", "opt", "~> 1.0", true)])
        .release("hexpm", "opt", "1.0.0", false, &[]);

    let roots = vec![DepNode::new("hexpm", "a", req("~> 1.0"))];
    let resolution = resolve_with_no_lock(&fixture, &roots).unwrap();
    assert!(resolution.get("opt").is_none());

    let roots_with_direct = vec![DepNode::new("hexpm", "a", req("~> 1.0")), DepNode::new("hexpm", "opt", req("~> 1.0"))];
    let resolution = resolve_with_no_lock(&fixture, &roots_with_direct).unwrap();
    assert!(resolution.get("opt").is_some());
}

#[test]
fn a_retired_release_is_skipped_unless_it_is_the_only_candidate_already_locked() {
    let fixture = Fixture::new()
        .release("hexpm", "a", "1.0.0", false, &[])
        .release("hexpm", "a", "1.1.0", true, &[]);

    let roots = vec![DepNode::new("hexpm", "a", req("~> 1.0"))];
    let resolution = resolve_with_no_lock(&fixture, &roots).unwrap();
    let (_, version) = resolution.get("a").unwrap();
    assert_eq!(version.triple(), (1, 0, 0));

    let mut locked = HashMap::new();
    locked.insert(
        "a".to_string(),
        LockedVersion {
            repo: "hexpm".to_string(),
            version: "1.1.0".parse().unwrap(),
        },
    );
    let resolution = resolve(&fixture, &roots, &locked).unwrap();
    let (_, version) = resolution.get("a").unwrap();
    assert_eq!(version.triple(), (1, 1, 0));
}

#[test]
fn tightening_an_already_assigned_package_backtracks_instead_of_returning_an_unsatisfied_result() {
    // phoenix is processed (and assigned) before ecto's own release is
    // even looked at; ecto's declared dependency then tightens phoenix's
    // requirement to a range the already-picked version can't satisfy.
    // The solver must notice and fail, not return phoenix 1.0.0 anyway.
    let fixture = Fixture::new()
        .release("hexpm", "phoenix", "1.0.0", false, &[])
        .release("hexpm", "phoenix", "2.0.0", false, &[])
        .release("hexpm", "ecto", "3.0.0", false, &[("hexpm", "phoenix", "~> 2.0", false)]);

    let roots = vec![
        DepNode::new("hexpm", "phoenix", req("~> 1.0")),
        DepNode::new("hexpm", "ecto", req("~> 3.0")),
    ];

    let err = resolve_with_no_lock(&fixture, &roots).unwrap_err();
    assert!(matches!(err, HexError::ResolutionConflict { name, .. } if name == "phoenix"));
}

#[test]
fn every_active_requirement_in_the_result_is_actually_satisfied() {
    let fixture = Fixture::new()
        .release("hexpm", "a", "1.2.0", false, &[])
        .release("hexpm", "b", "1.0.0", false, &[("hexpm", "a", "~> 1.0", false)])
        .release("hexpm", "c", "1.0.0", false, &[("hexpm", "a", "~> 1.1", false)]);

    let roots = vec![
        DepNode::new("hexpm", "b", req("~> 1.0")),
        DepNode::new("hexpm", "c", req("~> 1.0")),
    ];

    let resolution = resolve_with_no_lock(&fixture, &roots).unwrap();
    let (_, a_version) = resolution.get("a").unwrap();
    assert!(req("~> 1.0").matches(a_version));
    assert!(req("~> 1.1").matches(a_version));
}
