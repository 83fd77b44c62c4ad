//! `Digest` header helpers.
//!
//! Requests carrying a body must ship `Digest: sha-256=<base64(sha256(body))>`
//! and list `digest` among the signed headers. The digest always covers the
//! raw request body bytes.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest as _, Sha256};
use subtle::ConstantTimeEq;

/// Header prefix identifying the only supported digest algorithm.
const SHA256_PREFIX: &str = "sha-256=";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DigestError {
    #[error("'Digest' header mandatory")]
    Missing,

    #[error("digest algorithm should be sha-256")]
    UnsupportedAlgorithm,

    #[error("given digest does not match content")]
    Mismatch,
}

/// Computes the `Digest` header value for a body.
pub fn header_value(body: &[u8]) -> String {
    format!("{SHA256_PREFIX}{}", BASE64.encode(Sha256::digest(body)))
}

/// Verifies a received `Digest` header value against the received body.
pub fn verify(header: Option<&str>, body: &[u8]) -> Result<(), DigestError> {
    let header = header.ok_or(DigestError::Missing)?;
    let given = header
        .strip_prefix(SHA256_PREFIX)
        .ok_or(DigestError::UnsupportedAlgorithm)?;
    let expected = BASE64.encode(Sha256::digest(body));
    if expected.as_bytes().ct_eq(given.as_bytes()).into() {
        Ok(())
    } else {
        Err(DigestError::Mismatch)
    }
}
