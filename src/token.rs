//! One-time sign-in tokens.
//!
//! The raw token is 32 bytes from the OS RNG, base64url-encoded without
//! padding so it can sit directly in a query string. Only its SHA-256 digest
//! is ever handed to the store.

use anyhow::{Context, Result, anyhow};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{RngCore, rngs::OsRng};
use secrecy::SecretString;
use sha2::{Digest, Sha256};
use std::fmt;

/// Entropy of a freshly generated token.
pub const TOKEN_BYTES: usize = 32;

/// Length bounds accepted before any storage lookup.
pub const MIN_TOKEN_LEN: usize = 32;
pub const MAX_TOKEN_LEN: usize = 512;

/// SHA-256 digest of a raw token, used as the storage key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenDigest([u8; 32]);

impl TokenDigest {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Rebuild a digest read back from storage.
    ///
    /// # Errors
    /// Returns an error if the stored value is not exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow!("token digest must be 32 bytes, got {}", bytes.len()))?;
        Ok(Self(array))
    }
}

// Only a short prefix so log lines can be correlated without dumping the key.
impl fmt::Debug for TokenDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenDigest(")?;
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

/// Create a new raw token and its digest.
///
/// The raw value is only returned so it can be embedded in the emailed link.
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn generate() -> Result<(SecretString, TokenDigest)> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate magic link token")?;
    let raw = URL_SAFE_NO_PAD.encode(bytes);
    let digest = digest(&raw);
    Ok((SecretString::from(raw), digest))
}

/// Hash a raw token so it never reaches the database.
#[must_use]
pub fn digest(raw: &str) -> TokenDigest {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    TokenDigest(hasher.finalize().into())
}

/// Cheap shape check run before hashing or touching the store.
#[must_use]
pub fn is_plausible(raw: &str) -> bool {
    (MIN_TOKEN_LEN..=MAX_TOKEN_LEN).contains(&raw.len())
        && raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashSet;

    #[test]
    fn generate_produces_url_safe_256_bit_tokens() -> Result<()> {
        let (raw, _) = generate()?;
        let raw = raw.expose_secret();
        assert_eq!(raw.len(), 43);
        assert!(!raw.contains('='));
        assert!(is_plausible(raw));
        let decoded = URL_SAFE_NO_PAD.decode(raw)?;
        assert_eq!(decoded.len(), TOKEN_BYTES);
        Ok(())
    }

    #[test]
    fn generate_returns_matching_digest() -> Result<()> {
        let (raw, digest_value) = generate()?;
        assert_eq!(digest(raw.expose_secret()), digest_value);
        Ok(())
    }

    #[test]
    fn digest_is_deterministic_and_does_not_contain_token() -> Result<()> {
        let mut seen = HashSet::new();
        for _ in 0..64 {
            let (raw, stored) = generate()?;
            let raw = raw.expose_secret();
            assert_eq!(digest(raw), digest(raw));
            assert_eq!(digest(raw), stored);
            assert!(seen.insert(stored), "digests must not repeat");

            let encoded = URL_SAFE_NO_PAD.encode(stored.as_bytes());
            assert_ne!(encoded, raw);
            assert!(!format!("{stored:?}").contains(raw));
        }
        Ok(())
    }

    #[test]
    fn digest_matches_known_sha256() {
        let value = digest("abc");
        assert_eq!(
            format!("{value:?}"),
            "TokenDigest(ba7816bf..)",
            "sha256(\"abc\") starts with ba7816bf"
        );
    }

    #[test]
    fn from_slice_round_trips_and_rejects_bad_lengths() -> Result<()> {
        let value = digest("token");
        assert_eq!(TokenDigest::from_slice(value.as_bytes())?, value);
        assert!(TokenDigest::from_slice(&[0u8; 31]).is_err());
        assert!(TokenDigest::from_slice(&[]).is_err());
        Ok(())
    }

    #[test]
    fn is_plausible_rejects_out_of_bounds_and_bad_alphabet() {
        assert!(!is_plausible(""));
        assert!(!is_plausible("short"));
        assert!(!is_plausible(&"a".repeat(MAX_TOKEN_LEN + 1)));
        assert!(is_plausible(&"a".repeat(MAX_TOKEN_LEN)));
        assert!(!is_plausible(&format!("{}=", "a".repeat(40))));
        assert!(!is_plausible(&format!("{} ", "a".repeat(40))));
        assert!(!is_plausible(&"é".repeat(40)));
    }
}
