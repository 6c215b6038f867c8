//! Component H: State Container (spec §4H).
//!
//! A process-wide configuration snapshot, built once at startup and
//! threaded by reference into every operation in this crate (spec §9
//! "Design Notes": "an immutable configuration value threaded explicitly
//! through every operation (preferred)"). Setters exist only so test
//! fixtures can build a `GlobalContext` without reading the environment.

use std::collections::HashMap;
use std::path::PathBuf;

use registry_client::RepoConfig as WireRepoConfig;

use crate::error::HexError;

/// Per-repository configuration (spec §4H, §6).
#[derive(Debug, Clone)]
pub struct RepoConfig {
    pub url: String,
    pub public_key: Option<Vec<u8>>,
    pub auth_key: Option<String>,
    pub verify_tls: bool,
    pub no_verify_signature: bool,
    pub no_verify_origin: bool,
}

impl RepoConfig {
    pub fn new(url: impl Into<String>) -> RepoConfig {
        RepoConfig {
            url: url.into(),
            public_key: None,
            auth_key: None,
            verify_tls: true,
            no_verify_signature: false,
            no_verify_origin: false,
        }
    }

    /// Projects onto the subset `registry-client` actually needs, so this
    /// crate's `RepoConfig` stays the single source of truth and the wire
    /// crate never reads the environment itself.
    pub fn to_wire(&self) -> WireRepoConfig {
        WireRepoConfig {
            url: self.url.clone(),
            auth_key: self.auth_key.clone(),
            no_verify_signature: self.no_verify_signature,
            no_verify_origin: self.no_verify_origin,
        }
    }
}

fn env_truthy(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "True")
}

/// Process-wide configuration snapshot (spec §4H). Production code treats
/// this as read-mostly once constructed; the `with_*` builders exist only
/// for test fixtures.
#[derive(Debug, Clone)]
pub struct GlobalContext {
    pub cache_dir: PathBuf,
    pub api_url: String,
    pub repos: HashMap<String, RepoConfig>,
    pub http_concurrency: usize,
    pub offline: bool,
    pub proxy: Option<String>,
}

const DEFAULT_HEXPM_URL: &str = "https://repo.hex.pm";
const DEFAULT_API_URL: &str = "https://hex.pm/api";
const DEFAULT_HTTP_CONCURRENCY: usize = 8;

impl GlobalContext {
    /// Builds a context with the default `hexpm` repository and no
    /// environment overrides; callers substitute fixtures via the
    /// `with_*` methods in tests.
    pub fn new() -> GlobalContext {
        let mut repos = HashMap::new();
        repos.insert("hexpm".to_string(), RepoConfig::new(DEFAULT_HEXPM_URL));
        GlobalContext {
            cache_dir: dirs_home().join(".hex"),
            api_url: DEFAULT_API_URL.to_string(),
            repos,
            http_concurrency: DEFAULT_HTTP_CONCURRENCY,
            offline: false,
            proxy: None,
        }
    }

    /// Parses the environment variables named in spec §6 into one
    /// `GlobalContext` field apiece (spec §4H table). Infallible for a
    /// missing variable (the default applies); `HEX_HTTP_CONCURRENCY`
    /// with unparseable content is the one case that fails.
    pub fn from_env() -> Result<GlobalContext, HexError> {
        let mut ctx = GlobalContext::new();

        if let Ok(home) = std::env::var("HEX_HOME") {
            ctx.cache_dir = PathBuf::from(home);
        }
        if let Ok(api_url) = std::env::var("HEX_API_URL") {
            ctx.api_url = api_url;
        }
        if let Ok(mirror) = std::env::var("HEX_MIRROR") {
            ctx.repos.entry("hexpm".to_string()).and_modify(|r| r.url = mirror.clone()).or_insert_with(|| RepoConfig::new(mirror));
        }
        if let Ok(offline) = std::env::var("HEX_OFFLINE") {
            ctx.offline = env_truthy(&offline);
        }
        if let Ok(unsafe_https) = std::env::var("HEX_UNSAFE_HTTPS") {
            if env_truthy(&unsafe_https) {
                if let Some(repo) = ctx.repos.get_mut("hexpm") {
                    repo.verify_tls = false;
                }
            }
        }
        if let Ok(unsafe_registry) = std::env::var("HEX_UNSAFE_REGISTRY") {
            if env_truthy(&unsafe_registry) {
                if let Some(repo) = ctx.repos.get_mut("hexpm") {
                    repo.no_verify_signature = true;
                }
            }
        }
        if let Ok(concurrency) = std::env::var("HEX_HTTP_CONCURRENCY") {
            ctx.http_concurrency = concurrency
                .parse()
                .map_err(|_| HexError::InvalidConfig(format!("HEX_HTTP_CONCURRENCY={concurrency:?} is not an integer")))?;
        }
        ctx.proxy = std::env::var("HTTPS_PROXY")
            .ok()
            .or_else(|| std::env::var("HTTP_PROXY").ok());

        Ok(ctx)
    }

    pub fn with_repo(mut self, name: impl Into<String>, repo: RepoConfig) -> GlobalContext {
        self.repos.insert(name.into(), repo);
        self
    }

    pub fn with_offline(mut self, offline: bool) -> GlobalContext {
        self.offline = offline;
        self
    }

    pub fn with_http_concurrency(mut self, n: usize) -> GlobalContext {
        self.http_concurrency = n;
        self
    }

    pub fn repo(&self, name: &str) -> Option<&RepoConfig> {
        self.repos.get(name)
    }
}

impl Default for GlobalContext {
    fn default() -> GlobalContext {
        GlobalContext::new()
    }
}

fn dirs_home() -> PathBuf {
    home::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_context_has_the_hexpm_repo() {
        let ctx = GlobalContext::new();
        assert!(ctx.repo("hexpm").is_some());
        assert_eq!(ctx.http_concurrency, DEFAULT_HTTP_CONCURRENCY);
        assert!(!ctx.offline);
    }

    #[test]
    fn builders_override_fields_without_mutating_env() {
        let ctx = GlobalContext::new().with_offline(true).with_http_concurrency(2);
        assert!(ctx.offline);
        assert_eq!(ctx.http_concurrency, 2);
    }
}
