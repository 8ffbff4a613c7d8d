//! Durable state behind the sign-in flow.
//!
//! Three narrow traits cover the three kinds of state: magic tokens,
//! identities, and migrated records. Every operation that has to be race-safe
//! (consuming a token, creating an identity, claiming records) is a single
//! store-level atomic step, never an in-process lock around a read followed by
//! a write. `PgStore` is the production backend; `MemoryStore` keeps the same
//! contract for tests and local development.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use uuid::Uuid;

use crate::token::TokenDigest;

/// Fields supplied when a link is requested.
#[derive(Clone, Debug)]
pub struct NewMagicToken {
    pub email: String,
    pub digest: TokenDigest,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub request_ip: Option<IpAddr>,
    pub request_user_agent: Option<String>,
}

/// A stored magic token. The raw token is never part of it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MagicToken {
    pub id: Uuid,
    pub email: String,
    pub token_digest: TokenDigest,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    /// Advisory only; never consulted when validating.
    pub request_ip: Option<IpAddr>,
    pub request_user_agent: Option<String>,
}

/// Lifecycle state of a stored token at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenState {
    Live,
    Used { at: DateTime<Utc> },
    Expired { at: DateTime<Utc> },
}

impl MagicToken {
    /// Derive the state from the stored timestamps. A used token reports
    /// `Used` even after it would also have expired.
    #[must_use]
    pub fn state(&self, now: DateTime<Utc>) -> TokenState {
        if let Some(at) = self.used_at {
            TokenState::Used { at }
        } else if self.expires_at <= now {
            TokenState::Expired {
                at: self.expires_at,
            }
        } else {
            TokenState::Live
        }
    }

    /// The only `Live -> Used` transition. Callers must hold whatever lock
    /// makes this step atomic for the backing store.
    pub(crate) fn consume(&mut self, now: DateTime<Utc>) -> Option<String> {
        match self.state(now) {
            TokenState::Live => {
                self.used_at = Some(now);
                Some(self.email.clone())
            }
            TokenState::Used { .. } | TokenState::Expired { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Result of `resolve_or_create`; `created` is true only for the caller whose
/// insert won.
#[derive(Clone, Debug)]
pub struct ResolvedIdentity {
    pub identity: Identity,
    pub created: bool,
}

/// A row imported from the previous system.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MigratedRecord {
    pub id: Uuid,
    pub owner_email: String,
    pub claimed: bool,
    pub claimed_by_identity_id: Option<Uuid>,
    pub claimed_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persist a token. A digest collision overwrites the previous row.
    async fn issue(&self, token: NewMagicToken) -> Result<MagicToken>;

    /// Atomically mark the token used and return its email, or `None` when it
    /// is unknown, already used, or expired at `now`.
    async fn consume_if_valid(
        &self,
        digest: &TokenDigest,
        now: DateTime<Utc>,
    ) -> Result<Option<String>>;
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Look up the identity for a lowercase email, inserting it if absent.
    async fn resolve_or_create(&self, email: &str, now: DateTime<Utc>)
    -> Result<ResolvedIdentity>;

    async fn find_identity(&self, id: Uuid) -> Result<Option<Identity>>;
}

#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Claim every unclaimed record owned by `email`; returns how many rows
    /// changed. Already-claimed rows are left alone.
    async fn claim_unclaimed(
        &self,
        identity_id: Uuid,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<u64>;
}

/// Everything the sign-in flow needs from storage.
#[async_trait]
pub trait AuthStore: TokenStore + IdentityStore + ClaimStore {
    /// Liveness check used by `/health`.
    async fn ping(&self) -> Result<()>;
}
