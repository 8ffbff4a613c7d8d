//! `PostgreSQL` store.
//!
//! Schema lives in `sql/schema.sql`. Atomicity per operation:
//! - consume: the token row is locked with `FOR UPDATE` inside a transaction,
//!   so concurrent consumers of one digest serialize on that row.
//! - resolve: `INSERT .. ON CONFLICT (email) DO NOTHING` relies on the unique
//!   index; losers read the winner's row afterwards.
//! - claim: one multi-row `UPDATE` guarded by `claimed = FALSE`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Connection, PgPool, Row, postgres::PgRow, types::ipnetwork::IpNetwork};
use tracing::{Instrument, info_span};
use uuid::Uuid;

use super::{
    AuthStore, ClaimStore, Identity, IdentityStore, MagicToken, NewMagicToken, ResolvedIdentity,
    TokenStore,
};
use crate::token::TokenDigest;

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub(crate) fn db_span(operation: &'static str, statement: &'static str) -> tracing::Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn token_from_row(row: &PgRow) -> Result<MagicToken> {
    let digest: Vec<u8> = row.try_get("token_digest")?;
    let request_ip: Option<IpNetwork> = row.try_get("request_ip")?;
    Ok(MagicToken {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        token_digest: TokenDigest::from_slice(&digest)?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
        used_at: row.try_get("used_at")?,
        request_ip: request_ip.map(|network| network.ip()),
        request_user_agent: row.try_get("request_user_agent")?,
    })
}

fn identity_from_row(row: &PgRow) -> Result<Identity> {
    Ok(Identity {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl TokenStore for PgStore {
    async fn issue(&self, token: NewMagicToken) -> Result<MagicToken> {
        // Digest collisions overwrite: last write wins and the row becomes live again.
        let query = r"
            INSERT INTO magic_tokens
                (id, email, token_digest, expires_at, created_at, request_ip, request_user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (token_digest) DO UPDATE
            SET email = EXCLUDED.email,
                expires_at = EXCLUDED.expires_at,
                created_at = EXCLUDED.created_at,
                used_at = NULL,
                request_ip = EXCLUDED.request_ip,
                request_user_agent = EXCLUDED.request_user_agent
            RETURNING id, email, token_digest, expires_at, created_at, used_at,
                      request_ip, request_user_agent
        ";
        let row = sqlx::query(query)
            .bind(Uuid::new_v4())
            .bind(&token.email)
            .bind(token.digest.as_bytes())
            .bind(token.expires_at)
            .bind(token.created_at)
            .bind(token.request_ip.map(IpNetwork::from))
            .bind(token.request_user_agent.as_deref())
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert magic token")?;

        token_from_row(&row)
    }

    async fn consume_if_valid(
        &self,
        digest: &TokenDigest,
        now: DateTime<Utc>,
    ) -> Result<Option<String>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin consume transaction")?;

        let query = r"
            SELECT id, email, token_digest, expires_at, created_at, used_at,
                   request_ip, request_user_agent
            FROM magic_tokens
            WHERE token_digest = $1
            FOR UPDATE
        ";
        let row = sqlx::query(query)
            .bind(digest.as_bytes())
            .fetch_optional(&mut *tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lock magic token")?;

        let Some(row) = row else {
            tx.commit().await.context("commit consume noop")?;
            return Ok(None);
        };

        let mut token = token_from_row(&row)?;
        let Some(email) = token.consume(now) else {
            tx.commit().await.context("commit consume noop")?;
            return Ok(None);
        };

        let query = "UPDATE magic_tokens SET used_at = $2 WHERE id = $1";
        sqlx::query(query)
            .bind(token.id)
            .bind(now)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to mark magic token used")?;

        tx.commit().await.context("commit consume transaction")?;

        Ok(Some(email))
    }
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn resolve_or_create(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<ResolvedIdentity> {
        let query = r"
            INSERT INTO identities (id, email, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (email) DO NOTHING
            RETURNING id, email, created_at
        ";
        let inserted = sqlx::query(query)
            .bind(Uuid::new_v4())
            .bind(email)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert identity")?;

        if let Some(row) = inserted {
            return Ok(ResolvedIdentity {
                identity: identity_from_row(&row)?,
                created: true,
            });
        }

        // The conflicting row is committed by the time ON CONFLICT resolves.
        let query = "SELECT id, email, created_at FROM identities WHERE email = $1";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load existing identity")?;

        Ok(ResolvedIdentity {
            identity: identity_from_row(&row)?,
            created: false,
        })
    }

    async fn find_identity(&self, id: Uuid) -> Result<Option<Identity>> {
        let query = "SELECT id, email, created_at FROM identities WHERE id = $1";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup identity")?;

        row.as_ref().map(identity_from_row).transpose()
    }
}

#[async_trait]
impl ClaimStore for PgStore {
    async fn claim_unclaimed(
        &self,
        identity_id: Uuid,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let query = r"
            UPDATE migrated_records
            SET claimed = TRUE,
                claimed_by_identity_id = $1,
                claimed_at = $3
            WHERE lower(owner_email) = $2
              AND claimed = FALSE
        ";
        let result = sqlx::query(query)
            .bind(identity_id)
            .bind(email)
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to claim migrated records")?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AuthStore for PgStore {
    async fn ping(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .instrument(info_span!(
                "db.acquire",
                db.system = "postgresql",
                db.operation = "ACQUIRE"
            ))
            .await
            .context("failed to acquire database connection")?;
        conn.ping()
            .instrument(info_span!(
                "db.ping",
                db.system = "postgresql",
                db.operation = "PING"
            ))
            .await
            .context("failed to ping database")
    }
}
