/// Error taxonomy local to the repository client. `hexcore::error` folds
/// these into the crate-wide `HexError` taxonomy at the call boundary
/// (spec §7: "converted at the module boundary where they are produced").
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("signature verification failed")]
    BadSignature,
    #[error("registry payload origin mismatch: expected ({expected_repo}, {expected_name}), got ({got_repo}, {got_name})")]
    OriginMismatch {
        expected_repo: String,
        expected_name: String,
        got_repo: String,
        got_name: String,
    },
    #[error("malformed protobuf payload: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("malformed public key: {0}")]
    BadPublicKey(String),
    #[error("transient network error: {0}")]
    HttpTransient(String),
    #[error("permanent network error ({status}): {message}")]
    HttpPermanent { status: u32, message: String },
}

impl ClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::HttpTransient(_))
    }
}
