//! Token generation and structural validation.
//!
//! Two strategies are provided:
//!
//! - [`SimpleTokenGenerator`] draws random bytes and encodes them as
//!   base64url. It needs no secret.
//! - [`HashedTokenGenerator`] draws a random salt and appends a keyed digest
//!   of it, so a token can be checked for integrity against the server
//!   secret: `<salt>.<digest>`.
//!
//! Validation only checks that a token is well-formed. Comparing the stored
//! token with the one a client presents is the job of
//! [`CsrfProtection`](crate::CsrfProtection).

use crate::error::{CsrfError, Result};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// Separator between the salt and digest of a hashed token.
///
/// Not part of the base64url alphabet, so it can never appear inside either
/// component.
pub const TOKEN_SEPARATOR: char = '.';

/// Default number of random bytes in a token or salt
pub const DEFAULT_TOKEN_LENGTH: usize = 32;

const DIGEST_LEN: usize = 32;
const KEY_CONTEXT: &str = "armature-csrf 2024-01-01 token signing key";

/// An opaque CSRF token.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CsrfToken(String);

impl CsrfToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Compare against a client-supplied value in constant time.
    pub fn matches(&self, presented: &str) -> bool {
        self.0.as_bytes().ct_eq(presented.as_bytes()).into()
    }
}

impl fmt::Debug for CsrfToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CsrfToken").field(&self.0).finish()
    }
}

impl fmt::Display for CsrfToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CsrfToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for CsrfToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CsrfToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Produces and structurally validates tokens.
pub trait TokenGenerator: Send + Sync + fmt::Debug {
    /// Draw a fresh token
    fn generate(&self) -> CsrfToken;

    /// Check that `token` is well-formed. Malformed input yields `false`.
    fn validate(&self, token: &str) -> bool;
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0_u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

fn decodes_to(value: &str, len: usize) -> bool {
    matches!(URL_SAFE_NO_PAD.decode(value), Ok(bytes) if bytes.len() == len)
}

/// Random base64url tokens without a secret.
#[derive(Debug, Clone)]
pub struct SimpleTokenGenerator {
    length: usize,
}

impl SimpleTokenGenerator {
    pub fn new() -> Self {
        Self {
            length: DEFAULT_TOKEN_LENGTH,
        }
    }

    /// Use `length` random bytes per token
    pub fn with_length(length: usize) -> Result<Self> {
        if length == 0 {
            return Err(CsrfError::config("Token length must be greater than zero"));
        }
        Ok(Self { length })
    }

    pub fn length(&self) -> usize {
        self.length
    }
}

impl Default for SimpleTokenGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenGenerator for SimpleTokenGenerator {
    fn generate(&self) -> CsrfToken {
        CsrfToken(URL_SAFE_NO_PAD.encode(random_bytes(self.length)))
    }

    fn validate(&self, token: &str) -> bool {
        decodes_to(token, self.length)
    }
}

/// Keyed hash used by [`HashedTokenGenerator`].
///
/// The algorithm is part of the token format: tokens issued under one
/// algorithm never validate under the other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// BLAKE3 in keyed mode
    #[default]
    Blake3,
    /// HMAC-SHA256
    HmacSha256,
}

impl HashAlgorithm {
    /// Parse an algorithm name (`blake3`, `hmac-sha256`)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "blake3" => Some(HashAlgorithm::Blake3),
            "hmac-sha256" | "hmac_sha256" | "sha256" => Some(HashAlgorithm::HmacSha256),
            _ => None,
        }
    }
}

/// Salted tokens bound to a server secret by a keyed hash.
///
/// The signing key is derived from the secret phrase with BLAKE3's key
/// derivation mode and wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct HashedTokenGenerator {
    key: [u8; blake3::KEY_LEN],
    #[zeroize(skip)]
    algorithm: HashAlgorithm,
}

impl HashedTokenGenerator {
    /// Create a generator keyed by `secret_phrase`.
    ///
    /// Fails with a configuration error if the phrase is empty.
    pub fn new(secret_phrase: impl AsRef<[u8]>) -> Result<Self> {
        Self::with_algorithm(secret_phrase, HashAlgorithm::default())
    }

    pub fn with_algorithm(secret_phrase: impl AsRef<[u8]>, algorithm: HashAlgorithm) -> Result<Self> {
        let secret_phrase = secret_phrase.as_ref();
        if secret_phrase.is_empty() {
            return Err(CsrfError::config(
                "Secret phrase is required for hashed tokens",
            ));
        }

        Ok(Self {
            key: blake3::derive_key(KEY_CONTEXT, secret_phrase),
            algorithm,
        })
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    fn digest(&self, salt: &str) -> [u8; DIGEST_LEN] {
        match self.algorithm {
            HashAlgorithm::Blake3 => *blake3::keyed_hash(&self.key, salt.as_bytes()).as_bytes(),
            HashAlgorithm::HmacSha256 => {
                let mut mac =
                    HmacSha256::new_from_slice(&self.key).expect("HMAC can take key of any size");
                mac.update(salt.as_bytes());

                let mut out = [0_u8; DIGEST_LEN];
                out.copy_from_slice(&mac.finalize().into_bytes());
                out
            }
        }
    }
}

impl fmt::Debug for HashedTokenGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashedTokenGenerator")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl TokenGenerator for HashedTokenGenerator {
    fn generate(&self) -> CsrfToken {
        let salt = URL_SAFE_NO_PAD.encode(random_bytes(DEFAULT_TOKEN_LENGTH));
        let digest = URL_SAFE_NO_PAD.encode(self.digest(&salt));

        CsrfToken(format!("{salt}{TOKEN_SEPARATOR}{digest}"))
    }

    fn validate(&self, token: &str) -> bool {
        let mut parts = token.split(TOKEN_SEPARATOR);
        let (Some(salt), Some(digest), None) = (parts.next(), parts.next(), parts.next()) else {
            return false;
        };

        if !decodes_to(salt, DEFAULT_TOKEN_LENGTH) {
            return false;
        }

        let Ok(supplied) = URL_SAFE_NO_PAD.decode(digest) else {
            return false;
        };
        if supplied.len() != DIGEST_LEN {
            return false;
        }

        self.digest(salt)[..].ct_eq(&supplied[..]).into()
    }
}
