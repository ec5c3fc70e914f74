//! PKCE (RFC 7636)
//!
//! Code-verifier generation, `S256` challenge derivation and constant-time
//! verification. The `plain` method is not supported.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Unreserved characters permitted in a code verifier (RFC 7636 §4.1).
const VERIFIER_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// Verifier length bounds from RFC 7636.
const MIN_VERIFIER_LEN: usize = 43;
const MAX_VERIFIER_LEN: usize = 128;

/// Default verifier length for [`generate_verifier`].
pub const DEFAULT_VERIFIER_LEN: usize = 64;

/// PKCE failures.
#[derive(Debug, Error, PartialEq)]
pub enum PkceError {
    /// Requested or supplied verifier length outside [43, 128]
    #[error("verifier length {0} outside [43, 128]")]
    InvalidLength(usize),

    /// Verifier contains characters outside the unreserved alphabet
    #[error("verifier contains characters outside the allowed alphabet")]
    InvalidAlphabet,

    /// Challenge method other than S256
    #[error("unsupported code challenge method: {0}")]
    UnsupportedMethod(String),
}

/// Generate a random code verifier of the given length.
pub fn generate_verifier(length: usize) -> Result<String, PkceError> {
    if !(MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&length) {
        return Err(PkceError::InvalidLength(length));
    }

    let mut rng = OsRng;
    let verifier: String = (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..VERIFIER_ALPHABET.len());
            VERIFIER_ALPHABET[idx] as char
        })
        .collect();
    Ok(verifier)
}

/// Generate a verifier of the default length.
pub fn generate_default_verifier() -> Result<String, PkceError> {
    generate_verifier(DEFAULT_VERIFIER_LEN)
}

/// Derive the `S256` challenge: base64url(SHA-256(verifier)), unpadded.
/// The output is always 43 characters.
pub fn generate_challenge(verifier: &str) -> Result<String, PkceError> {
    validate_verifier(verifier)?;
    let digest = Sha256::digest(verifier.as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(digest))
}

/// Verify a verifier against a previously declared challenge.
///
/// Only `S256` is accepted; `plain` is rejected as unsupported. The
/// comparison over the derived and declared challenge encodings is
/// constant-time; unequal lengths compare `false`.
pub fn verify(verifier: &str, challenge: &str, method: &str) -> Result<bool, PkceError> {
    if method != "S256" {
        return Err(PkceError::UnsupportedMethod(method.to_string()));
    }
    let derived = generate_challenge(verifier)?;
    Ok(derived.as_bytes().ct_eq(challenge.as_bytes()).into())
}

fn validate_verifier(verifier: &str) -> Result<(), PkceError> {
    if !(MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&verifier.len()) {
        return Err(PkceError::InvalidLength(verifier.len()));
    }
    if !verifier
        .bytes()
        .all(|b| VERIFIER_ALPHABET.contains(&b))
    {
        return Err(PkceError::InvalidAlphabet);
    }
    Ok(())
}
