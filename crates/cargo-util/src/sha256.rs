use sha2::{Digest, Sha256 as Sha2_256};

/// Incremental SHA-256 hasher used both for archive checksums (§4C) and
/// content-addressed tarball cache keys.
#[derive(Default)]
pub struct Sha256 {
    inner: Sha2_256,
}

impl Sha256 {
    pub fn new() -> Sha256 {
        Sha256 {
            inner: Sha2_256::new(),
        }
    }

    pub fn update(mut self, bytes: &[u8]) -> Self {
        self.inner.update(bytes);
        self
    }

    /// Consumes the hasher, returning the 32-byte digest.
    pub fn finish(self) -> [u8; 32] {
        self.inner.finalize().into()
    }

    /// Convenience: lower-case hex digest of `bytes`.
    pub fn hex_of(bytes: &[u8]) -> String {
        let hasher = Sha256::new().update(bytes);
        hex::encode(hasher.finish())
    }
}
