//! Claiming migrated records for a signed-in identity.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::info;

use crate::store::{ClaimStore, Identity};

/// Attach every unclaimed record owned by `email` to `identity`.
///
/// Safe to repeat: records claimed earlier, by this or any identity, are not
/// touched, so a second call returns zero.
///
/// # Errors
/// Returns an error if the store fails.
pub async fn claim_all_for<S: ClaimStore + ?Sized>(
    store: &S,
    identity: &Identity,
    email: &str,
    now: DateTime<Utc>,
) -> Result<u64> {
    let claimed = store
        .claim_unclaimed(identity.id, email, now)
        .await
        .context("failed to claim migrated records")?;
    if claimed > 0 {
        info!(identity_id = %identity.id, claimed, "claimed migrated records");
    }
    Ok(claimed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{IdentityStore, MemoryStore};

    #[tokio::test]
    async fn second_claim_is_a_no_op() -> Result<()> {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert_migrated_record("a@example.com").await;
        store.insert_migrated_record("a@example.com").await;
        let identity = store.resolve_or_create("a@example.com", now).await?.identity;

        assert_eq!(claim_all_for(&store, &identity, "a@example.com", now).await?, 2);
        assert_eq!(claim_all_for(&store, &identity, "a@example.com", now).await?, 0);
        assert!(
            store
                .migrated_records()
                .await
                .iter()
                .all(|record| record.claimed_by_identity_id == Some(identity.id))
        );
        Ok(())
    }

    #[tokio::test]
    async fn nothing_to_claim() -> Result<()> {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert_migrated_record("other@example.com").await;
        let identity = store.resolve_or_create("a@example.com", now).await?.identity;
        assert_eq!(claim_all_for(&store, &identity, "a@example.com", now).await?, 0);
        Ok(())
    }
}
