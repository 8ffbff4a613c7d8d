//! In-process store with the same atomicity contract as `PgStore`.
//!
//! Every trait method takes the single state lock for its whole body, which is
//! what makes consume, resolve, and claim atomic here. State does not survive
//! the process and is not shared between processes.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AuthStore, ClaimStore, Identity, IdentityStore, MagicToken, MigratedRecord, NewMagicToken,
    ResolvedIdentity, TokenStore,
};
use crate::token::TokenDigest;

#[derive(Default)]
struct Inner {
    tokens: HashMap<TokenDigest, MagicToken>,
    identities: HashMap<String, Identity>,
    records: Vec<MigratedRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an unclaimed record, standing in for the import job.
    pub async fn insert_migrated_record(&self, owner_email: &str) -> MigratedRecord {
        let record = MigratedRecord {
            id: Uuid::new_v4(),
            owner_email: owner_email.to_string(),
            claimed: false,
            claimed_by_identity_id: None,
            claimed_at: None,
        };
        self.inner.lock().await.records.push(record.clone());
        record
    }

    pub async fn migrated_records(&self) -> Vec<MigratedRecord> {
        self.inner.lock().await.records.clone()
    }

    pub async fn identities(&self) -> Vec<Identity> {
        self.inner.lock().await.identities.values().cloned().collect()
    }

    pub async fn token(&self, digest: &TokenDigest) -> Option<MagicToken> {
        self.inner.lock().await.tokens.get(digest).cloned()
    }

    pub async fn token_count(&self) -> usize {
        self.inner.lock().await.tokens.len()
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn issue(&self, token: NewMagicToken) -> Result<MagicToken> {
        let stored = MagicToken {
            id: Uuid::new_v4(),
            email: token.email,
            token_digest: token.digest,
            expires_at: token.expires_at,
            created_at: token.created_at,
            used_at: None,
            request_ip: token.request_ip,
            request_user_agent: token.request_user_agent,
        };
        self.inner
            .lock()
            .await
            .tokens
            .insert(token.digest, stored.clone());
        Ok(stored)
    }

    async fn consume_if_valid(
        &self,
        digest: &TokenDigest,
        now: DateTime<Utc>,
    ) -> Result<Option<String>> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .tokens
            .get_mut(digest)
            .and_then(|token| token.consume(now)))
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn resolve_or_create(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<ResolvedIdentity> {
        let mut inner = self.inner.lock().await;
        if let Some(identity) = inner.identities.get(email) {
            return Ok(ResolvedIdentity {
                identity: identity.clone(),
                created: false,
            });
        }
        let identity = Identity {
            id: Uuid::new_v4(),
            email: email.to_string(),
            created_at: now,
        };
        inner
            .identities
            .insert(email.to_string(), identity.clone());
        Ok(ResolvedIdentity {
            identity,
            created: true,
        })
    }

    async fn find_identity(&self, id: Uuid) -> Result<Option<Identity>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .identities
            .values()
            .find(|identity| identity.id == id)
            .cloned())
    }
}

#[async_trait]
impl ClaimStore for MemoryStore {
    async fn claim_unclaimed(
        &self,
        identity_id: Uuid,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let mut claimed = 0;
        for record in inner
            .records
            .iter_mut()
            .filter(|record| !record.claimed && record.owner_email.to_lowercase() == email)
        {
            record.claimed = true;
            record.claimed_by_identity_id = Some(identity_id);
            record.claimed_at = Some(now);
            claimed += 1;
        }
        Ok(claimed)
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
