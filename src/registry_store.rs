//! Component D: Registry Store (spec §4D).
//!
//! A per-process cache of `(repo, name) -> [Release]`, refreshed through
//! the fetch coordinator and persisted to disk as the raw signed envelope
//! (spec, `SPEC_FULL.md` §3 supplement) so a later process re-verifies
//! rather than trusting cached bytes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex, RwLock};

use registry_client::PackageFetch;
use tracing::debug;

use crate::error::HexError;
use crate::fetch::FetchCoordinator;
use crate::package_id::{DeclaredDependency, PackageId, Release, RetirementInfo};
use crate::state::GlobalContext;
use crate::version::{Requirement, Version};

#[derive(Debug, Clone)]
struct Entry {
    etag: Option<String>,
    releases: Vec<Release>,
}

/// The store's lock is single-writer/many-reader (spec §5): lookups never
/// block a writer mid-swap because the writer builds the new `Entry` off
/// to the side and only takes the write lock to insert it.
#[derive(Clone)]
pub struct RegistryStore {
    entries: Arc<RwLock<HashMap<(String, String), Entry>>>,
    public_keys: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

fn convert_release(repo: &str, name: &str, wire: registry_client::Release) -> Result<Release, HexError> {
    let version = Version::from_str(&wire.version)?;
    let checksum: [u8; 32] = wire
        .checksum
        .try_into()
        .map_err(|bytes: Vec<u8>| HexError::Metadata(format!("release checksum is {} bytes, expected 32", bytes.len())))?;
    let dependencies = wire
        .dependencies
        .into_iter()
        .map(|d| {
            Ok(DeclaredDependency {
                repo: if d.repository.is_empty() { repo.to_string() } else { d.repository },
                name: d.package,
                requirement: Requirement::from_str(&d.requirement)?,
                optional: d.optional,
                app: d.app,
            })
        })
        .collect::<Result<Vec<_>, HexError>>()?;
    let retired = wire.retired.map(|r| RetirementInfo {
        reason: format!("{:?}", r.reason),
        message: r.message,
    });

    Ok(Release {
        id: PackageId::new(repo.to_string(), name.to_string()),
        version,
        checksum,
        dependencies,
        retired,
    })
}

impl RegistryStore {
    pub fn new() -> RegistryStore {
        RegistryStore {
            entries: Arc::new(RwLock::new(HashMap::new())),
            public_keys: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The cached release list for `(repo, name)`, if any (spec §4D
    /// "Lookup yields the release list").
    pub fn releases(&self, repo: &str, name: &str) -> Option<Vec<Release>> {
        self.entries
            .read()
            .unwrap()
            .get(&(repo.to_string(), name.to_string()))
            .map(|e| e.releases.clone())
    }

    pub fn checksum(&self, repo: &str, name: &str, version: &Version) -> Option<[u8; 32]> {
        self.releases(repo, name)?
            .into_iter()
            .find(|r| &r.version == version)
            .map(|r| r.checksum)
    }

    pub fn deps(&self, repo: &str, name: &str, version: &Version) -> Vec<DeclaredDependency> {
        self.releases(repo, name)
            .and_then(|rs| rs.into_iter().find(|r| &r.version == version))
            .map(|r| r.dependencies)
            .unwrap_or_default()
    }

    fn current_etag(&self, repo: &str, name: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap()
            .get(&(repo.to_string(), name.to_string()))
            .and_then(|e| e.etag.clone())
    }

    /// Looks up (and caches) the repository's public key, so re-verifying
    /// many packages from one repo fetches the key once per process
    /// (`SPEC_FULL.md` §4B supplement).
    fn public_key_for(&self, repo_cfg: &crate::state::RepoConfig) -> Result<Vec<u8>, HexError> {
        if let Some(explicit) = &repo_cfg.public_key {
            return Ok(explicit.clone());
        }
        if let Some(cached) = self.public_keys.lock().unwrap().get(&repo_cfg.url).cloned() {
            return Ok(cached);
        }
        let pem = registry_client::get_public_key(&repo_cfg.url)?;
        let der = registry_client::rsa_pkcs1_der_from_pem(&pem)?;
        self.public_keys.lock().unwrap().insert(repo_cfg.url.clone(), der.clone());
        Ok(der)
    }

    fn cache_paths(ctx: &GlobalContext, repo: &str, name: &str) -> (PathBuf, PathBuf) {
        let dir = ctx.cache_dir.join("cache").join("registry").join(repo);
        (dir.join(format!("{name}.signed")), dir.join(format!("{name}.etag")))
    }

    /// Loads a previously-cached envelope from disk and re-verifies it
    /// (never trusted as-is). Returns `Ok(false)` if nothing is cached.
    pub fn load_from_disk(&self, ctx: &GlobalContext, repo_cfg: &crate::state::RepoConfig, repo: &str, name: &str) -> Result<bool, HexError> {
        let (signed_path, etag_path) = Self::cache_paths(ctx, repo, name);
        let Ok(envelope_bytes) = std::fs::read(&signed_path) else {
            return Ok(false);
        };
        let etag = std::fs::read_to_string(&etag_path).ok().map(|s| s.trim().to_string());
        self.verify_and_insert(repo_cfg, repo, name, &envelope_bytes, etag)?;
        Ok(true)
    }

    fn verify_and_insert(
        &self,
        repo_cfg: &crate::state::RepoConfig,
        repo: &str,
        name: &str,
        envelope_bytes: &[u8],
        etag: Option<String>,
    ) -> Result<(), HexError> {
        let public_key = if repo_cfg.no_verify_signature {
            None
        } else {
            Some(self.public_key_for(repo_cfg)?)
        };
        let payload = registry_client::verify(envelope_bytes, &repo_cfg.to_wire(), public_key.as_deref())?;
        let wire_releases = registry_client::decode_package(&payload, repo, name, repo_cfg.no_verify_origin)?;
        let releases = wire_releases
            .into_iter()
            .map(|r| convert_release(repo, name, r))
            .collect::<Result<Vec<_>, HexError>>()?;

        self.entries
            .write()
            .unwrap()
            .insert((repo.to_string(), name.to_string()), Entry { etag, releases });
        Ok(())
    }

    fn persist_to_disk(ctx: &GlobalContext, repo: &str, name: &str, envelope_bytes: &[u8], etag: Option<&str>) -> std::io::Result<()> {
        let (signed_path, etag_path) = Self::cache_paths(ctx, repo, name);
        if let Some(dir) = signed_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&signed_path, envelope_bytes)?;
        match etag {
            Some(etag) => std::fs::write(&etag_path, etag)?,
            None => {
                let _ = std::fs::remove_file(&etag_path);
            }
        }
        Ok(())
    }

    /// Fans out `get_package` for every `(repo, name)` in `requests`
    /// through the fetch coordinator, keyed by `(repo, name, etag)` (spec
    /// §4G, §4D). A 200 response is verified, decoded, and replaces the
    /// entry; a 304 keeps the entry already in the store. Offline mode
    /// (spec §4H `offline`) skips the network and relies entirely on
    /// whatever `load_from_disk` already populated.
    pub fn prefetch(
        &self,
        ctx: &GlobalContext,
        coordinator: &FetchCoordinator<PackageFetch>,
        requests: &[(String, String)],
    ) -> Result<(), HexError> {
        if ctx.offline {
            for (repo, name) in requests {
                if self.releases(repo, name).is_none() {
                    return Err(HexError::OfflineMissing {
                        fingerprint: format!("{repo}/{name}"),
                    });
                }
            }
            return Ok(());
        }

        let mut receivers = Vec::with_capacity(requests.len());
        for (repo, name) in requests {
            let repo_cfg = ctx
                .repo(repo)
                .ok_or_else(|| HexError::InvalidConfig(format!("no repository configured named {repo:?}")))?
                .clone();
            let etag = self.current_etag(repo, name);
            let fingerprint = format!("registry:{repo}:{name}:{}", etag.as_deref().unwrap_or(""));

            let wire_repo = repo_cfg.to_wire();
            let name_owned = name.clone();
            let etag_for_job = etag.clone();
            let rx = coordinator.submit(
                fingerprint,
                Box::new(move |_cancelled, _progress| {
                    registry_client::get_package(&wire_repo, &name_owned, etag_for_job.as_deref()).map_err(HexError::from)
                }),
                None,
            );
            receivers.push((repo.clone(), name.clone(), repo_cfg, rx));
        }

        for (repo, name, repo_cfg, rx) in receivers {
            let outcome = rx
                .recv()
                .map_err(|_| HexError::HttpTransient("fetch coordinator dropped this job's result".to_string()))?
                .map_err(|e| clone_hex_error(&e))?;

            match &*outcome {
                PackageFetch::NotModified => {
                    debug!(%repo, %name, "registry entry not modified");
                }
                PackageFetch::Fresh { body, etag } => {
                    debug!(%repo, %name, bytes = body.len(), "fetched fresh registry entry");
                    self.verify_and_insert(&repo_cfg, &repo, &name, body, etag.clone())?;
                    Self::persist_to_disk(ctx, &repo, &name, body, etag.as_deref())?;
                }
            }
        }
        Ok(())
    }
}

impl Default for RegistryStore {
    fn default() -> RegistryStore {
        RegistryStore::new()
    }
}

/// `HexError` does not implement `Clone` (some variants wrap non-`Clone`
/// types from dependency crates); the coordinator hands back an `Arc` so
/// this reconstructs an equivalent, renderable error instead of cloning.
fn clone_hex_error(e: &HexError) -> HexError {
    HexError::HttpTransient(e.to_string())
}

/// Adapts [`RegistryStore`] to the resolver's [`crate::core::resolver::PackageSource`]
/// trait so the solver can be driven directly off the cache (spec §4E
/// input).
impl crate::core::resolver::PackageSource for RegistryStore {
    fn versions(&self, repo: &str, name: &str) -> Vec<(Version, bool)> {
        self.releases(repo, name)
            .map(|rs| rs.into_iter().map(|r| (r.version, r.retired.is_some())).collect())
            .unwrap_or_default()
    }

    fn dependencies(&self, repo: &str, name: &str, version: &Version) -> Vec<DeclaredDependency> {
        self.deps(repo, name, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_package_has_no_releases() {
        let store = RegistryStore::new();
        assert!(store.releases("hexpm", "nope").is_none());
    }

    #[test]
    fn missing_disk_cache_reports_false_not_error() {
        let store = RegistryStore::new();
        let ctx = GlobalContext::new();
        let repo_cfg = ctx.repo("hexpm").unwrap().clone();
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ctx;
        ctx.cache_dir = dir.path().to_path_buf();
        let loaded = store.load_from_disk(&ctx, &repo_cfg, "hexpm", "ecto").unwrap();
        assert!(!loaded);
    }

    #[test]
    fn offline_prefetch_of_an_uncached_package_fails_with_offline_missing() {
        let store = RegistryStore::new();
        let ctx = GlobalContext::new().with_offline(true);
        let coordinator: FetchCoordinator<PackageFetch> = FetchCoordinator::new(1);
        let err = store
            .prefetch(&ctx, &coordinator, &[("hexpm".to_string(), "ecto".to_string())])
            .unwrap_err();
        assert!(matches!(err, HexError::OfflineMissing { .. }));
    }
}
