//! # magiclink (Passwordless Sign-in & Record Claiming)
//!
//! `magiclink` issues single-use sign-in links by email, consumes them, and
//! hands the browser a signed session cookie. On first sign-in it creates the
//! identity and attaches any records imported from the previous system under
//! the same email address.
//!
//! ## Enumeration Resistance
//!
//! Requesting a link always answers with the same neutral acknowledgement,
//! whether the address is known, unknown, malformed, throttled, or delivery
//! failed. Identities are only created when a link is consumed, so the request
//! step has no observable side effect that depends on the address.
//!
//! ## Single-use Tokens
//!
//! Raw tokens only ever live in the emailed link. The store keeps a SHA-256
//! digest and marks it used in one atomic step, so racing consumers of the same
//! link get at most one success.
//!
//! ## Sessions
//!
//! Sessions are HS256-signed JWTs carried in a `__Host-` prefixed cookie and
//! are not stored server-side. Every session carries a random `jti` so a
//! revocation list can be added later without changing the format.

pub mod api;
pub mod cli;
pub mod store;
pub mod token;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }
}
