//! Salted and keyed digests used by the Miniserver's token handshake.
//!
//! Pure functions only: no I/O, no state. The digest algorithm is whatever
//! the Miniserver advertised in its key-exchange response, so every
//! function takes it as an argument.

use std::fmt;
use std::str::FromStr;

use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};
use sha2::Sha256;

use crate::error::Error;

// ── DigestAlgorithm ──────────────────────────────────────────────────

/// Hash algorithm advertised by the Miniserver (`hashAlg` in `getkey2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
}

impl FromStr for DigestAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "").as_str() {
            "SHA1" => Ok(Self::Sha1),
            "SHA256" => Ok(Self::Sha256),
            other => Err(Error::protocol(format!(
                "unsupported hash algorithm advertised: {other}"
            ))),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha1 => f.write_str("SHA1"),
            Self::Sha256 => f.write_str("SHA256"),
        }
    }
}

// ── Digests ──────────────────────────────────────────────────────────

/// Plain digest of `data`, upper-case hex.
pub fn digest_upper_hex(algorithm: DigestAlgorithm, data: &[u8]) -> String {
    match algorithm {
        DigestAlgorithm::Sha1 => hex::encode_upper(Sha1::digest(data)),
        DigestAlgorithm::Sha256 => hex::encode_upper(Sha256::digest(data)),
    }
}

/// `digest(password + ":" + salt)`, upper-case hex.
pub fn salted_hash(algorithm: DigestAlgorithm, password: &str, salt: &str) -> String {
    digest_upper_hex(algorithm, format!("{password}:{salt}").as_bytes())
}

/// HMAC of `data` under `key`, lower-case hex.
pub fn keyed_hash(algorithm: DigestAlgorithm, key: &[u8], data: &[u8]) -> Result<String, Error> {
    let invalid_key = |_| Error::protocol("invalid HMAC key length");

    let bytes = match algorithm {
        DigestAlgorithm::Sha1 => {
            let mut mac = Hmac::<Sha1>::new_from_slice(key).map_err(invalid_key)?;
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        DigestAlgorithm::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(key).map_err(invalid_key)?;
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
    };

    Ok(hex::encode(bytes))
}

/// The login credential: `keyed_hash(key, user + ":" + salted_hash(password, salt))`.
pub fn user_digest(
    algorithm: DigestAlgorithm,
    key: &[u8],
    salt: &str,
    user: &str,
    password: &str,
) -> Result<String, Error> {
    let salted = salted_hash(algorithm, password, salt);
    keyed_hash(algorithm, key, format!("{user}:{salted}").as_bytes())
}

/// Token digest used by refresh and channel authentication (always SHA-1).
pub fn token_digest(key: &[u8], token: &str) -> Result<String, Error> {
    keyed_hash(DigestAlgorithm::Sha1, key, token.as_bytes())
}

/// Decode the hex-encoded key string the Miniserver hands out.
pub fn decode_key(hex_key: &str) -> Result<Vec<u8>, Error> {
    hex::decode(hex_key.trim())
        .map_err(|e| Error::protocol(format!("key is not valid hex: {e}")))
}
