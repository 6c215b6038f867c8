//! Dependency Node: the resolver's tree-shaped input (spec §3, §4E step 1).

use std::collections::{HashSet, VecDeque};

use crate::version::Requirement;

/// One node of the input dependency tree — typically a direct requirement
/// declared by the project (or, for an umbrella/workspace project, one of
/// its member applications, whose own direct requirements are `children`).
#[derive(Debug, Clone)]
pub struct DepNode {
    pub repo: String,
    pub name: String,
    pub requirement: Requirement,
    pub optional: bool,
    /// Replaces any deeper occurrence of the same name during resolution.
    pub is_override: bool,
    pub children: Vec<DepNode>,
}

impl DepNode {
    pub fn new(repo: impl Into<String>, name: impl Into<String>, requirement: Requirement) -> DepNode {
        DepNode {
            repo: repo.into(),
            name: name.into(),
            requirement,
            optional: false,
            is_override: false,
            children: Vec::new(),
        }
    }

    pub fn optional(mut self, optional: bool) -> DepNode {
        self.optional = optional;
        self
    }

    pub fn overriding(mut self, is_override: bool) -> DepNode {
        self.is_override = is_override;
        self
    }

    pub fn with_children(mut self, children: Vec<DepNode>) -> DepNode {
        self.children = children;
        self
    }
}

/// One flattened requirement with enough breadcrumb to render a
/// diagnostic (spec §4E step 1, §3 "from-path ... used only in
/// diagnostics").
#[derive(Debug, Clone)]
pub struct FlatRequirement {
    pub repo: String,
    pub name: String,
    pub requirement: Requirement,
    pub optional: bool,
    /// Carried through so the resolver can suppress this node's own
    /// dependencies from tightening a name another path already settled
    /// (spec §4E "Overrides propagation").
    pub is_override: bool,
    pub from_path: Vec<String>,
}

/// Breadth-first flatten of the input tree, dropping any requirement for a
/// name that an ancestor has already overridden (spec §4E step 1, and the
/// override-propagation rule in §4E "Overrides propagation").
///
/// The emitted order is also what step 3 ("process names in the order
/// they first appear in a breadth-first traversal") uses to derive a
/// deterministic processing order — callers should dedupe by first
/// appearance, not by sorting the output.
pub fn flatten(roots: &[DepNode]) -> Vec<FlatRequirement> {
    let mut out = Vec::new();
    let mut queue: VecDeque<(&DepNode, Vec<String>, HashSet<String>)> = VecDeque::new();
    for root in roots {
        queue.push_back((root, vec![root.name.clone()], HashSet::new()));
    }

    while let Some((node, from_path, overridden_above)) = queue.pop_front() {
        if !overridden_above.contains(&node.name) {
            out.push(FlatRequirement {
                repo: node.repo.clone(),
                name: node.name.clone(),
                requirement: node.requirement.clone(),
                optional: node.optional,
                is_override: node.is_override,
                from_path: from_path.clone(),
            });
        }

        let mut child_overridden = overridden_above.clone();
        if node.is_override {
            child_overridden.insert(node.name.clone());
        }

        for child in &node.children {
            let mut path = from_path.clone();
            path.push(child.name.clone());
            queue.push_back((child, path, child_overridden.clone()));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn req(s: &str) -> Requirement {
        Requirement::from_str(s).unwrap()
    }

    #[test]
    fn sibling_requirement_at_same_level_still_applies() {
        // A (override) and B both at top level requiring C differently:
        // the override on A must not suppress B's sibling requirement.
        let a = DepNode::new("hexpm", "a", req("~> 1.0"))
            .overriding(true)
            .with_children(vec![DepNode::new("hexpm", "c", req("~> 2.0"))]);
        let b = DepNode::new("hexpm", "b", req("~> 1.0"))
            .with_children(vec![DepNode::new("hexpm", "c", req("~> 1.0"))]);

        let flat = flatten(&[a, b]);
        let c_reqs: Vec<_> = flat.iter().filter(|f| f.name == "c").collect();
        assert_eq!(c_reqs.len(), 2);
    }

    #[test]
    fn override_suppresses_deeper_requirement_for_same_name() {
        let root = DepNode::new("hexpm", "b", req("~> 1.0"))
            .overriding(true)
            .with_children(vec![DepNode::new("hexpm", "b", req("~> 9.0"))]);

        let flat = flatten(&[root]);
        let b_reqs: Vec<_> = flat.iter().filter(|f| f.name == "b").collect();
        assert_eq!(b_reqs.len(), 1);
        assert_eq!(b_reqs[0].requirement, req("~> 1.0"));
    }
}
