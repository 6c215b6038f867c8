//! Core of a build-tool package manager (spec §1, §2): signed registry
//! fetch, version resolution, content-addressed archive handling, and
//! lockfile commit. This crate is the "hard part" described in the spec
//! — the outer CLI, config I/O, and publishing surface are out of scope
//! and expected to be built on top of the operations exposed here (§6).

pub mod archive;
pub mod core;
pub mod error;
pub mod fetch;
pub mod package_id;
pub mod registry_store;
pub mod state;
pub mod version;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use itertools::Itertools;
use registry_client::PackageFetch;
use tracing::{debug, info};

use crate::core::dependency::DepNode;
use crate::core::resolver::{LockedVersion, Resolution};
use crate::error::HexError;
use crate::fetch::FetchCoordinator;
use crate::package_id::Release;
use crate::registry_store::RegistryStore;
use crate::state::GlobalContext;
use crate::version::Version;

pub use archive::{pack, unpack, Metadata};
pub use cargo_util_schemas::{LockEntry, Lockfile};

/// `resolve(tree, lock) -> resolution | conflict` (spec §6).
///
/// `store` must already hold every package reachable from `roots` — call
/// [`RegistryStore::prefetch`] (directly, or via [`converge`]) first. The
/// resolver itself never talks to the network (spec §5 "The resolver
/// itself is single-threaded").
pub fn resolve(store: &RegistryStore, roots: &[DepNode], lock: &Lockfile) -> Result<Resolution, HexError> {
    let locked = locked_versions(lock)?;
    debug!(roots = roots.len(), locked = locked.len(), "starting resolution");
    let resolution = crate::core::resolver::resolve(store, roots, &locked)?;
    debug!(packages = resolution.packages.len(), "resolution succeeded");
    Ok(resolution)
}

fn locked_versions(lock: &Lockfile) -> Result<HashMap<String, LockedVersion>, HexError> {
    lock.entries()
        .map(|entry| {
            let version = Version::from_str(&entry.version)?;
            Ok((
                entry.alias.clone(),
                LockedVersion {
                    repo: entry.repo.clone(),
                    version,
                },
            ))
        })
        .collect()
}

/// Every package name required, in every repo it's required from, so the
/// caller can `prefetch` before resolving (spec §4E needs the full
/// transitive closure up front, but the closure itself is only known
/// after walking declared dependencies — so this just seeds direct
/// requirements; deeper names are pulled in by [`converge`]'s prefetch
/// loop as the resolver's candidate search visits them).
pub fn direct_requests(roots: &[DepNode]) -> Vec<(String, String)> {
    core::dependency::flatten(roots)
        .into_iter()
        .map(|f| (f.repo, f.name))
        .unique()
        .collect()
}

/// `get_registry(repo, name) -> [release]` (spec §6). Returns the cached
/// release list; callers needing a guaranteed-fresh view should
/// `prefetch` first.
pub fn get_registry(store: &RegistryStore, repo: &str, name: &str) -> Vec<Release> {
    store.releases(repo, name).unwrap_or_default()
}

/// `load_lock(path) -> lock` (spec §6). A missing file is an empty
/// lockfile, not an error — every project starts without one.
pub fn load_lock(path: &Path) -> Result<Lockfile, HexError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Lockfile::parse(&text)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Lockfile::new()),
        Err(e) => Err(HexError::Io(e)),
    }
}

/// A simple whole-file advisory lock: the write path is guarded by an
/// exclusive-create sentinel file (spec §5 "The lockfile on disk is
/// protected by an advisory file lock held for the duration of a
/// write"). Two cooperating processes never both hold the sentinel;
/// nothing stops a process that ignores this convention, which matches
/// "advisory".
fn with_advisory_lock<T>(path: &Path, f: impl FnOnce() -> Result<T, HexError>) -> Result<T, HexError> {
    let lock_path = path.with_extension("lock");
    let mut handle = None;
    for _ in 0..200 {
        match std::fs::OpenOptions::new().write(true).create_new(true).open(&lock_path) {
            Ok(file) => {
                handle = Some(file);
                break;
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                std::thread::sleep(std::time::Duration::from_millis(10));
            }
            Err(e) => return Err(HexError::Io(e)),
        }
    }
    let _handle = handle.ok_or_else(|| HexError::Io(std::io::Error::new(std::io::ErrorKind::WouldBlock, "timed out acquiring lockfile lock")))?;
    let result = f();
    let _ = std::fs::remove_file(&lock_path);
    result
}

/// `write_lock(path, resolution) -> ()` (spec §6), extended with the
/// per-package `build_tools`/`deps` data needed to fill out a [`LockEntry`]
/// (spec §3 "Lock Entry"): `managers` comes from each package's own
/// tarball metadata (only known after a fetch/unpack, not from the
/// registry payload), so callers that only resolved (never fetched) pass
/// an empty map and accept an entry with no managers recorded yet.
///
/// The write is atomic — write-temp-then-rename (spec §5) — under the
/// advisory lock.
pub fn write_lock(
    path: &Path,
    resolution: &Resolution,
    store: &RegistryStore,
    managers_by_name: &HashMap<String, Vec<String>>,
) -> Result<(), HexError> {
    let mut lock = Lockfile::new();
    for (alias, (id, version)) in &resolution.packages {
        let checksum = store
            .checksum(&id.repo, &id.name, version)
            .ok_or_else(|| HexError::LockMismatch {
                name: id.name.clone(),
                version: version.to_string(),
            })?;
        let deps = store.deps(&id.repo, &id.name, version);
        lock.insert(LockEntry {
            alias: alias.clone(),
            name: id.name.clone(),
            version: version.to_string(),
            checksum_hex: hex::encode(checksum),
            repo: id.repo.clone(),
            managers: managers_by_name.get(alias).cloned().unwrap_or_default(),
            deps: deps.into_iter().map(|d| d.name).collect(),
        });
    }

    with_advisory_lock(path, || {
        let rendered = lock.render();
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, rendered.as_bytes())?;
        tmp.persist(path).map_err(|e| HexError::Io(e.error))?;
        info!(path = %path.display(), entries = lock.len(), "wrote lockfile");
        Ok(())
    })
}

/// Downloads and unpacks every package in `resolution` into
/// `destinations[alias]` (spec §6 `fetch(resolution, destinations) ->
/// ()`). Tarball bytes are fetched through the coordinator keyed by
/// `(repo, name, version)` (spec §4G) and verified against the registry
/// store's checksum (spec §4C step 5) before extraction. Returns each
/// package's metadata, keyed by alias, for [`write_lock`]'s `managers`
/// column.
///
/// All-or-nothing (spec §7 "Partial-failure semantics"): the caller is
/// expected not to call `write_lock` at all if this returns an error.
pub fn fetch(
    ctx: &GlobalContext,
    store: &RegistryStore,
    coordinator: &FetchCoordinator<Vec<u8>>,
    resolution: &Resolution,
    destinations: &HashMap<String, PathBuf>,
) -> Result<HashMap<String, Metadata>, HexError> {
    let mut receivers = Vec::with_capacity(resolution.packages.len());
    for (alias, (id, version)) in &resolution.packages {
        let dest = destinations
            .get(alias)
            .ok_or_else(|| HexError::InvalidConfig(format!("no destination configured for {alias:?}")))?
            .clone();
        let expected_checksum = store.checksum(&id.repo, &id.name, version);

        if ctx.offline {
            let fingerprint = content_cache_path(ctx, &id.repo, &id.name, version);
            let bytes = std::fs::read(&fingerprint).map_err(|_| HexError::OfflineMissing {
                fingerprint: format!("{}/{}@{}", id.repo, id.name, version),
            })?;
            let metadata = archive::unpack(&bytes, &dest, expected_checksum.as_ref())?;
            receivers.push((alias.clone(), None, Some(metadata)));
            continue;
        }

        let repo_cfg = ctx
            .repo(&id.repo)
            .ok_or_else(|| HexError::InvalidConfig(format!("no repository configured named {:?}", id.repo)))?
            .to_wire();
        let fingerprint = format!("tarball:{}:{}:{}", id.repo, id.name, version);
        let cache_path = content_cache_path(ctx, &id.repo, &id.name, version);

        if let Ok(cached) = std::fs::read(&cache_path) {
            if expected_checksum
                .map(|expected| cargo_util::Sha256::hex_of(&cached) == hex::encode(expected))
                .unwrap_or(false)
            {
                debug!(%alias, %version, "tarball already cached, skipping download");
                let metadata = archive::unpack(&cached, &dest, expected_checksum.as_ref())?;
                receivers.push((alias.clone(), None, Some(metadata)));
                continue;
            }
        }

        let name_owned = id.name.clone();
        let version_owned = version.to_string();
        let rx = coordinator.submit(
            fingerprint,
            Box::new(move |_cancelled, _progress| registry_client::get_tarball(&repo_cfg, &name_owned, &version_owned).map_err(HexError::from)),
            None,
        );
        receivers.push((alias.clone(), Some((rx, cache_path, dest, expected_checksum)), None));
    }

    let mut metadata_by_alias = HashMap::new();
    for (alias, pending, already) in receivers {
        if let Some(metadata) = already {
            metadata_by_alias.insert(alias, metadata);
            continue;
        }
        let (rx, cache_path, dest, expected_checksum) = pending.expect("offline/cached branches are handled above");
        let bytes = rx
            .recv()
            .map_err(|_| HexError::HttpTransient("fetch coordinator dropped this job's result".to_string()))?
            .map_err(|e| HexError::HttpTransient(e.to_string()))?;
        if let Some(dir) = cache_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&cache_path, bytes.as_slice())?;
        let metadata = archive::unpack(&bytes, &dest, expected_checksum.as_ref())?;
        metadata_by_alias.insert(alias, metadata);
    }

    Ok(metadata_by_alias)
}


fn content_cache_path(ctx: &GlobalContext, repo: &str, name: &str, version: &Version) -> PathBuf {
    ctx.cache_dir
        .join("cache")
        .join("tarballs")
        .join(repo)
        .join(format!("{name}-{version}.tar"))
}

/// Fetches every package transitively reachable from `roots`, not just the
/// direct requirements: each round prefetches the current frontier, reads
/// the dependency names the newly-cached releases declare, and adds any
/// name not seen before to the next round's frontier. This is what lets
/// [`resolve`] run purely off the cache afterwards (spec §4D, §5 "none of
/// them are expected to suspend the resolver").
fn prefetch_transitive_closure(
    ctx: &GlobalContext,
    store: &RegistryStore,
    coordinator: &FetchCoordinator<PackageFetch>,
    roots: &[DepNode],
) -> Result<(), HexError> {
    let mut seen: std::collections::HashSet<(String, String)> = std::collections::HashSet::new();
    let mut frontier = direct_requests(roots);

    while !frontier.is_empty() {
        for (repo, name) in &frontier {
            if let Some(repo_cfg) = ctx.repo(repo) {
                let _ = store.load_from_disk(ctx, repo_cfg, repo, name);
            }
        }
        store.prefetch(ctx, coordinator, &frontier)?;
        seen.extend(frontier.iter().cloned());

        let mut next = Vec::new();
        for (repo, name) in &frontier {
            for release in store.releases(repo, name).unwrap_or_default() {
                for dep in release.dependencies {
                    let pair = (dep.repo, dep.name);
                    if !seen.contains(&pair) {
                        next.push(pair);
                    }
                }
            }
        }
        frontier = next.into_iter().unique().collect();
    }
    Ok(())
}

/// `converge`: the top-level operation composing resolve (§4E) then fetch
/// (§4G) then write_lock (§4F), all under one cancellation signal (spec
/// §5). Partial failure after resolution (any tarball fetch fails) does
/// not write the lockfile (spec §7).
pub fn converge(
    ctx: &GlobalContext,
    store: &RegistryStore,
    roots: &[DepNode],
    lock_path: &Path,
    destinations: &HashMap<String, PathBuf>,
) -> Result<Resolution, HexError> {
    let lock = load_lock(lock_path)?;
    info!(root_count = roots.len(), offline = ctx.offline, "converging dependencies");

    let registry_coordinator: FetchCoordinator<PackageFetch> = FetchCoordinator::new(ctx.http_concurrency);
    prefetch_transitive_closure(ctx, store, &registry_coordinator, roots)?;

    let resolution = resolve(store, roots, &lock)?;

    let tarball_coordinator: FetchCoordinator<Vec<u8>> = FetchCoordinator::new(ctx.http_concurrency);
    let metadata_by_alias = fetch(ctx, store, &tarball_coordinator, &resolution, destinations)?;

    let managers_by_name: HashMap<String, Vec<String>> = metadata_by_alias
        .into_iter()
        .map(|(alias, metadata)| (alias, metadata.build_tools))
        .collect();
    write_lock(lock_path, &resolution, store, &managers_by_name)?;

    info!(packages = resolution.packages.len(), "converge complete");
    Ok(resolution)
}
