use x509_parser::prelude::{FromDer, SubjectPublicKeyInfo};

use crate::error::ClientError;

/// Extracts the PKCS#1 RSA public key DER (what `ring`'s RSA verifier
/// wants) from a PEM-encoded `SubjectPublicKeyInfo` block, which is the
/// format the `/public_key` endpoint serves (spec §6).
pub fn rsa_pkcs1_der_from_pem(pem_bytes: &[u8]) -> Result<Vec<u8>, ClientError> {
    let block = x509_parser::pem::Pem::iter_from_buffer(pem_bytes)
        .next()
        .ok_or_else(|| ClientError::BadPublicKey("no PEM block found".into()))?
        .map_err(|e| ClientError::BadPublicKey(e.to_string()))?;

    let (_, spki) = SubjectPublicKeyInfo::from_der(&block.contents)
        .map_err(|e| ClientError::BadPublicKey(e.to_string()))?;

    Ok(spki.subject_public_key.data.into_owned())
}
