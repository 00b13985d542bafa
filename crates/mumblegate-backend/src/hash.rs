//! Password hash verification.
//!
//! The user database stores a hash plus the name of the scheme that
//! produced it. Two schemes exist in the wild:
//!
//! - `sha1`: unsalted lowercase hex SHA-1. Legacy.
//! - `bcrypt-sha256`: passlib's bcrypt with a SHA-256 prehash, which
//!   lifts bcrypt's 72-byte password limit. Two layouts:
//!
//! ```text
//! v1: $bcrypt-sha256$2a,12$<salt:22>$<digest:31>
//!     key = base64(sha256(password))
//! v2: $bcrypt-sha256$v=2,t=2b,r=12$<salt:22>$<digest:31>
//!     key = base64(hmac_sha256(key = salt, msg = password))
//! ```
//!
//! In both cases the key is checked with plain bcrypt against
//! `$<ident>$<rounds>$<salt><digest>`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Scheme name for unsalted hex SHA-1.
pub const SCHEME_SHA1: &str = "sha1";
/// Scheme name for passlib's bcrypt-sha256.
pub const SCHEME_BCRYPT_SHA256: &str = "bcrypt-sha256";

const BCRYPT_SHA256_PREFIX: &str = "$bcrypt-sha256$";
const BCRYPT_SALT_LEN: usize = 22;
const BCRYPT_DIGEST_LEN: usize = 31;

/// Checks `password` against `stored_hash` using `scheme`.
///
/// Never fails: an unknown scheme or a malformed hash verifies `false`.
pub fn verify(password: &[u8], stored_hash: &str, scheme: &str) -> bool {
    match scheme {
        SCHEME_SHA1 => verify_sha1(password, stored_hash),
        SCHEME_BCRYPT_SHA256 => verify_bcrypt_sha256(password, stored_hash),
        other => {
            warn!(scheme = other, "no hash function for scheme");
            false
        }
    }
}

fn verify_sha1(password: &[u8], stored_hash: &str) -> bool {
    let digest = Sha1::digest(password);
    hex::encode(digest) == stored_hash
}

/// A parsed `$bcrypt-sha256$…` hash.
#[derive(Debug, PartialEq, Eq)]
struct BcryptSha256<'a> {
    version: u8,
    ident: &'a str,
    rounds: u32,
    salt: &'a str,
    digest: &'a str,
}

impl<'a> BcryptSha256<'a> {
    fn parse(hash: &'a str) -> Option<Self> {
        let rest = hash.strip_prefix(BCRYPT_SHA256_PREFIX)?;
        let mut parts = rest.split('$');
        let params = parts.next()?;
        let salt_segment = parts.next()?;
        let digest_segment = parts.next();
        if parts.next().is_some() {
            return None;
        }

        let (version, ident, rounds) = if params.starts_with("v=") {
            let mut version = None;
            let mut ident = None;
            let mut rounds = None;
            for kv in params.split(',') {
                match kv.split_once('=')? {
                    ("v", v) => version = v.parse::<u8>().ok(),
                    ("t", t) => ident = Some(t),
                    ("r", r) => rounds = r.parse::<u32>().ok(),
                    _ => return None,
                }
            }
            (version?, ident?, rounds?)
        } else {
            let (ident, rounds) = params.split_once(',')?;
            (1, ident, rounds.parse::<u32>().ok()?)
        };

        if !matches!(version, 1 | 2) || !matches!(ident, "2a" | "2b") {
            return None;
        }
        if !(4..=31).contains(&rounds) {
            return None;
        }
        // Stored as `salt$digest`; some exporters join the two.
        let (salt, digest) = match digest_segment {
            Some(digest) => (salt_segment, digest),
            None if salt_segment.len() == BCRYPT_SALT_LEN + BCRYPT_DIGEST_LEN => {
                salt_segment.split_at_checked(BCRYPT_SALT_LEN)?
            }
            None => return None,
        };
        if salt.len() != BCRYPT_SALT_LEN
            || digest.len() != BCRYPT_DIGEST_LEN
            || !salt.is_ascii()
            || !digest.is_ascii()
        {
            return None;
        }

        Some(Self {
            version,
            ident,
            rounds,
            salt,
            digest,
        })
    }

    /// The bcrypt input derived from the raw password.
    fn key(&self, password: &[u8]) -> Option<String> {
        let prehash = match self.version {
            1 => Sha256::digest(password).to_vec(),
            _ => {
                let mut mac = Hmac::<Sha256>::new_from_slice(self.salt.as_bytes()).ok()?;
                mac.update(password);
                mac.finalize().into_bytes().to_vec()
            }
        };
        Some(STANDARD.encode(prehash))
    }

    /// The equivalent plain bcrypt hash string.
    fn bcrypt_hash(&self) -> String {
        format!(
            "${}${:02}${}{}",
            self.ident, self.rounds, self.salt, self.digest
        )
    }
}

fn verify_bcrypt_sha256(password: &[u8], stored_hash: &str) -> bool {
    let Some(parsed) = BcryptSha256::parse(stored_hash) else {
        debug!("malformed bcrypt-sha256 hash");
        return false;
    };
    let Some(key) = parsed.key(password) else {
        return false;
    };
    pwhash::bcrypt::verify(key, &parsed.bcrypt_hash())
}
