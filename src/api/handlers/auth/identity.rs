//! Identity resolution for verified emails.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::info;

use crate::store::{Identity, IdentityStore};

/// Return the identity for `email`, creating it on first sign-in.
///
/// Concurrent callers for the same email all receive the same identity; the
/// store's uniqueness constraint decides which insert wins.
///
/// # Errors
/// Returns an error if the store fails.
pub async fn resolve_identity<S: IdentityStore + ?Sized>(
    store: &S,
    email: &str,
    now: DateTime<Utc>,
) -> Result<Identity> {
    let resolved = store
        .resolve_or_create(email, now)
        .await
        .context("failed to resolve identity")?;
    if resolved.created {
        info!(identity_id = %resolved.identity.id, "created identity");
    }
    Ok(resolved.identity)
}
