use std::collections::BTreeMap;

use cargo_util::Term;

/// One resolved package as committed to the lockfile (spec §3 "Lock Entry").
///
/// `deps` holds only the *names* of the dependencies this release pulled
/// in, sorted — the full dependency graph lives in the registry, not the
/// lockfile; the lockfile only needs enough to detect drift.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEntry {
    pub alias: String,
    pub name: String,
    pub version: String,
    pub checksum_hex: String,
    pub repo: String,
    pub managers: Vec<String>,
    pub deps: Vec<String>,
}

impl LockEntry {
    fn canonical(mut self) -> LockEntry {
        self.checksum_hex = self.checksum_hex.to_ascii_lowercase();
        self.managers.sort();
        self.managers.dedup();
        self.deps.sort();
        self.deps.dedup();
        self
    }

    fn to_term(&self) -> Term {
        Term::Tuple(vec![
            Term::atom("hex"),
            Term::atom(self.name.clone()),
            Term::binary(self.version.clone()),
            Term::binary(self.checksum_hex.clone()),
            Term::List(self.managers.iter().cloned().map(Term::atom).collect()),
            Term::List(self.deps.iter().cloned().map(Term::atom).collect()),
            Term::binary(self.repo.clone()),
        ])
    }
}

/// The entire lockfile: an alias -> entry mapping, iterated in sorted
/// order so re-serializing an unchanged resolution is byte-identical
/// (spec §8 "write_lock(resolution); load_lock() is idempotent").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lockfile {
    entries: BTreeMap<String, LockEntry>,
}

#[derive(Debug, thiserror::Error)]
pub enum LockReadError {
    #[error("malformed lockfile term: {0}")]
    Term(#[from] cargo_util::TermError),
    #[error("lockfile root must be a map of alias to entry")]
    NotAMap,
    #[error("lockfile entry for {0:?} is not a recognized hex tuple shape")]
    UnrecognizedShape(String),
    #[error("lockfile entry for {0:?} has a non-atom/binary field where one was expected")]
    BadField(String),
}

impl Lockfile {
    pub fn new() -> Lockfile {
        Lockfile::default()
    }

    pub fn insert(&mut self, entry: LockEntry) {
        self.entries.insert(entry.alias.clone(), entry.canonical());
    }

    pub fn get(&self, alias: &str) -> Option<&LockEntry> {
        self.entries.get(alias)
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.entries.contains_key(alias)
    }

    pub fn entries(&self) -> impl Iterator<Item = &LockEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Canonical text rendering: a single top-level map, aliases sorted,
    /// one trailing newline. Re-rendering an unchanged `Lockfile` always
    /// produces these exact bytes.
    pub fn render(&self) -> String {
        let pairs: Vec<(Term, Term)> = self
            .entries
            .values()
            .map(|e| (Term::atom(e.alias.clone()), e.to_term()))
            .collect();
        let mut out = Term::Map(pairs).encode();
        out.push('\n');
        out
    }

    pub fn parse(text: &str) -> Result<Lockfile, LockReadError> {
        let term = Term::parse(text.trim_end())?;
        let Term::Map(pairs) = term else {
            return Err(LockReadError::NotAMap);
        };
        let mut lock = Lockfile::new();
        for (key, value) in pairs {
            let alias = atom_or_binary(&key).ok_or(LockReadError::NotAMap)?;
            let entry = parse_entry(&alias, &value)?;
            lock.entries.insert(alias, entry);
        }
        Ok(lock)
    }
}

fn atom_or_binary(t: &Term) -> Option<String> {
    match t {
        Term::Atom(s) | Term::Binary(s) => Some(s.clone()),
        _ => None,
    }
}

fn atoms_to_strings(t: &Term, alias: &str) -> Result<Vec<String>, LockReadError> {
    match t {
        Term::List(items) => items
            .iter()
            .map(|i| atom_or_binary(i).ok_or_else(|| LockReadError::BadField(alias.to_string())))
            .collect(),
        _ => Err(LockReadError::BadField(alias.to_string())),
    }
}

/// Accepts the three shapes the original client has ever written (spec §4F):
/// the current 7-tuple, the 6-tuple (no repo), and the oldest 4-tuple
/// (no managers, no deps, no repo) — all migrated to the canonical shape
/// in memory, without being rewritten on disk until the next `render()`.
fn parse_entry(alias: &str, term: &Term) -> Result<LockEntry, LockReadError> {
    let Term::Tuple(fields) = term else {
        return Err(LockReadError::UnrecognizedShape(alias.to_string()));
    };
    let mut it = fields.iter();
    match it.next() {
        Some(Term::Atom(tag)) if tag == "hex" => {}
        _ => return Err(LockReadError::UnrecognizedShape(alias.to_string())),
    }
    let name = atom_or_binary(it.next().ok_or_else(|| LockReadError::UnrecognizedShape(alias.to_string()))?)
        .ok_or_else(|| LockReadError::BadField(alias.to_string()))?;
    let version = atom_or_binary(it.next().ok_or_else(|| LockReadError::UnrecognizedShape(alias.to_string()))?)
        .ok_or_else(|| LockReadError::BadField(alias.to_string()))?;
    let checksum_hex =
        atom_or_binary(it.next().ok_or_else(|| LockReadError::UnrecognizedShape(alias.to_string()))?)
            .ok_or_else(|| LockReadError::BadField(alias.to_string()))?;

    let rest: Vec<&Term> = it.collect();
    let (managers, deps, repo) = match rest.len() {
        0 => (Vec::new(), Vec::new(), "hexpm".to_string()),
        2 => (
            atoms_to_strings(rest[0], alias)?,
            atoms_to_strings(rest[1], alias)?,
            "hexpm".to_string(),
        ),
        3 => (
            atoms_to_strings(rest[0], alias)?,
            atoms_to_strings(rest[1], alias)?,
            atom_or_binary(rest[2]).ok_or_else(|| LockReadError::BadField(alias.to_string()))?,
        ),
        _ => return Err(LockReadError::UnrecognizedShape(alias.to_string())),
    };

    Ok(LockEntry {
        alias: alias.to_string(),
        name,
        version,
        checksum_hex,
        repo,
        managers,
        deps,
    }
    .canonical())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LockEntry {
        LockEntry {
            alias: "ecto".to_string(),
            name: "ecto".to_string(),
            version: "3.9.0".to_string(),
            checksum_hex: "AB12".to_string(),
            repo: "hexpm".to_string(),
            managers: vec!["mix".to_string()],
            deps: vec!["decimal".to_string(), "db_connection".to_string()],
        }
    }

    #[test]
    fn checksum_is_lowercased_on_insert() {
        let mut lock = Lockfile::new();
        lock.insert(sample());
        assert_eq!(lock.get("ecto").unwrap().checksum_hex, "ab12");
    }

    #[test]
    fn render_then_parse_round_trips() {
        let mut lock = Lockfile::new();
        lock.insert(sample());
        let rendered = lock.render();
        let parsed = Lockfile::parse(&rendered).unwrap();
        assert_eq!(parsed, lock);
    }

    #[test]
    fn render_is_idempotent() {
        let mut lock = Lockfile::new();
        lock.insert(sample());
        let once = lock.render();
        let twice = Lockfile::parse(&once).unwrap().render();
        assert_eq!(once, twice);
    }

    #[test]
    fn migrates_legacy_four_tuple() {
        let text = "%{ecto: {:hex, :ecto, \"3.9.0\", \"ab12\"}}\n";
        let lock = Lockfile::parse(text).unwrap();
        let entry = lock.get("ecto").unwrap();
        assert_eq!(entry.repo, "hexpm");
        assert!(entry.managers.is_empty());
        assert!(entry.deps.is_empty());
    }

    #[test]
    fn migrates_legacy_six_tuple_without_mutating_until_rewrite() {
        let text = "%{ecto: {:hex, :ecto, \"3.9.0\", \"ab12\", [:mix], [:decimal]}}\n";
        let lock = Lockfile::parse(text).unwrap();
        let entry = lock.get("ecto").unwrap();
        assert_eq!(entry.repo, "hexpm");
        assert_eq!(entry.managers, vec!["mix".to_string()]);
        // The canonical 7-field rendering is only produced on the next write.
        let rewritten = lock.render();
        assert!(rewritten.contains("\"hexpm\""));
    }

    #[test]
    fn rejects_unrecognized_shape() {
        let text = "%{ecto: {:hex, :ecto}}\n";
        assert!(Lockfile::parse(text).is_err());
    }
}
