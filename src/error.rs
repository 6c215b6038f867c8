//! The crate-wide error taxonomy (spec §7). Every public operation in
//! `hexcore` returns `Result<T, HexError>`; errors from dependency crates
//! (`registry_client`, `curl`, `tar`, `flate2`, ...) are converted into one
//! of these variants at the boundary where they are produced, never
//! propagated raw.

use std::path::PathBuf;

use crate::core::resolver::conflict::ConflictSet;

#[derive(Debug, thiserror::Error)]
pub enum HexError {
    #[error("invalid version {0:?}")]
    InvalidVersion(String),
    #[error("invalid requirement {0:?}")]
    InvalidRequirement(String),

    #[error("signature verification failed for {repo}/{name}")]
    BadSignature { repo: String, name: String },
    #[error("registry payload origin mismatch for {repo}/{name}")]
    OriginMismatch { repo: String, name: String },

    #[error("checksum mismatch: archive does not match its own CHECKSUM entry")]
    ChecksumMismatch,
    #[error("checksum mismatch: archive does not match the registry's recorded checksum")]
    RegistryChecksumMismatch,
    #[error("unsupported archive version {0:?}")]
    UnsupportedVersion(String),
    #[error("archive is missing required entry {0:?}")]
    MissingFile(&'static str),
    #[error("archive entry has an unsafe path: {0}")]
    UnsafePath(PathBuf),
    #[error("cannot pack an empty file list")]
    EmptyPackage,

    #[error("transient network error: {0}")]
    HttpTransient(String),
    #[error("permanent network error ({status}): {message}")]
    HttpPermanent { status: u32, message: String },

    #[error("could not resolve {name}: no candidate version satisfies every requirement")]
    ResolutionConflict { name: String, conflict: ConflictSet },
    #[error("{name} is required from incompatible repositories: {}", repos.join(", "))]
    RepoConflict { name: String, repos: Vec<String> },

    #[error("lockfile checksum for {name} {version} disagrees with the registry")]
    LockMismatch { name: String, version: String },

    #[error("{fingerprint} is not cached and the client is offline")]
    OfflineMissing { fingerprint: String },

    #[error("malformed lockfile: {0}")]
    Lock(#[from] cargo_util_schemas::LockReadError),

    #[error("malformed archive metadata: {0}")]
    Metadata(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<registry_client::ClientError> for HexError {
    fn from(e: registry_client::ClientError) -> Self {
        match e {
            registry_client::ClientError::BadSignature => HexError::BadSignature {
                repo: String::new(),
                name: String::new(),
            },
            registry_client::ClientError::OriginMismatch {
                expected_repo,
                expected_name,
                ..
            } => HexError::OriginMismatch {
                repo: expected_repo,
                name: expected_name,
            },
            registry_client::ClientError::Decode(err) => {
                HexError::HttpPermanent {
                    status: 0,
                    message: format!("malformed protobuf payload: {err}"),
                }
            }
            registry_client::ClientError::BadPublicKey(msg) => HexError::HttpPermanent {
                status: 0,
                message: msg,
            },
            registry_client::ClientError::HttpTransient(msg) => HexError::HttpTransient(msg),
            registry_client::ClientError::HttpPermanent { status, message } => {
                HexError::HttpPermanent { status, message }
            }
        }
    }
}

pub type CoreResult<T> = Result<T, HexError>;
