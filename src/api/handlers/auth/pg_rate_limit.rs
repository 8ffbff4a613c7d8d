//! Database-backed rate limiting for link requests and consume attempts.
//!
//! Every attempt is a row in `auth_attempts`. A check takes a transaction-level
//! advisory lock on its key, drops rows older than the window, counts what is
//! left, and records the attempt when under budget. Instances sharing the
//! database therefore share one budget.
//!
//! Email keys are stored as SHA-256 digests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use tracing::{Instrument, error};

use super::rate_limit::{
    RateLimitAction, RateLimitConfig, RateLimitDecision, RateLimiter, Subject, UNKNOWN_IP,
};
use crate::store::postgres::db_span;

const LOCK_SQL: &str = "SELECT pg_advisory_xact_lock(hashtextextended($1, 0))";
const PRUNE_SQL: &str = "DELETE FROM auth_attempts WHERE action = $1 AND subject = $2 AND subject_key = $3 AND created_at <= NOW() - $4::interval";
const COUNT_SQL: &str = "SELECT COUNT(*) FROM auth_attempts WHERE action = $1 AND subject = $2 AND subject_key = $3";
const INSERT_SQL: &str =
    "INSERT INTO auth_attempts (action, subject, subject_key) VALUES ($1, $2, $3)";

#[derive(Clone, Debug)]
pub struct PgRateLimiter {
    pool: PgPool,
    config: RateLimitConfig,
}

impl PgRateLimiter {
    #[must_use]
    pub fn new(pool: PgPool, config: RateLimitConfig) -> Self {
        Self { pool, config }
    }

    async fn register_attempt(
        &self,
        action: RateLimitAction,
        subject: Subject,
        key: &str,
    ) -> Result<RateLimitDecision> {
        let action_name = action.as_str();
        let subject_name = subject.as_str();
        let window = format!("{} seconds", self.config.window().as_secs());
        let limit = i64::from(self.config.limit(action));

        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin rate-limit transaction")?;

        sqlx::query(LOCK_SQL)
            .bind(format!("{action_name}:{subject_name}:{key}"))
            .execute(&mut *tx)
            .instrument(db_span("SELECT", LOCK_SQL))
            .await
            .context("failed to lock rate-limit key")?;

        sqlx::query(PRUNE_SQL)
            .bind(action_name)
            .bind(subject_name)
            .bind(key)
            .bind(&window)
            .execute(&mut *tx)
            .instrument(db_span("DELETE", PRUNE_SQL))
            .await
            .context("failed to prune rate-limit attempts")?;

        let row = sqlx::query(COUNT_SQL)
            .bind(action_name)
            .bind(subject_name)
            .bind(key)
            .fetch_one(&mut *tx)
            .instrument(db_span("SELECT", COUNT_SQL))
            .await
            .context("failed to count rate-limit attempts")?;
        let attempts: i64 = row.try_get(0)?;

        let decision = if attempts >= limit {
            RateLimitDecision::Limited
        } else {
            sqlx::query(INSERT_SQL)
                .bind(action_name)
                .bind(subject_name)
                .bind(key)
                .execute(&mut *tx)
                .instrument(db_span("INSERT", INSERT_SQL))
                .await
                .context("failed to record rate-limit attempt")?;
            RateLimitDecision::Allowed
        };

        tx.commit()
            .await
            .context("failed to commit rate-limit attempt")?;
        Ok(decision)
    }

    async fn check(
        &self,
        action: RateLimitAction,
        subject: Subject,
        key: &str,
    ) -> RateLimitDecision {
        match self.register_attempt(action, subject, key).await {
            Ok(decision) => decision,
            Err(err) => {
                // Fail closed
                error!("Rate-limit check failed: {err:#}");
                RateLimitDecision::Limited
            }
        }
    }
}

fn email_key(email: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(email.as_bytes()))
}

#[async_trait]
impl RateLimiter for PgRateLimiter {
    async fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision {
        self.check(action, Subject::Ip, ip.unwrap_or(UNKNOWN_IP))
            .await
    }

    async fn check_email(&self, email: &str, action: RateLimitAction) -> RateLimitDecision {
        self.check(action, Subject::Email, &email_key(email)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;
    use uuid::Uuid;

    const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

    async fn test_pool() -> Result<Option<PgPool>> {
        let Ok(dsn) = std::env::var("MAGICLINK_TEST_DSN") else {
            eprintln!("Skipping integration test: MAGICLINK_TEST_DSN not set");
            return Ok(None);
        };
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(&dsn)
            .await
            .context("failed to connect test pool")?;
        sqlx::Executor::execute(&pool, SCHEMA_SQL)
            .await
            .context("failed to execute schema SQL")?;
        Ok(Some(pool))
    }

    #[test]
    fn email_keys_are_digests() {
        let key = email_key("alice@example.com");
        assert_eq!(key.len(), 43);
        assert!(!key.contains('@'));
        assert_eq!(key, email_key("alice@example.com"));
        assert_ne!(key, email_key("bob@example.com"));
    }

    #[tokio::test]
    async fn shared_budget_across_instances() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };
        let config = RateLimitConfig::new().with_consume_link_limit(2);
        let first = PgRateLimiter::new(pool.clone(), config);
        let second = PgRateLimiter::new(pool, config);
        let ip = format!("test-{}", Uuid::new_v4());

        assert_eq!(
            first
                .check_ip(Some(&ip), RateLimitAction::ConsumeLink)
                .await,
            RateLimitDecision::Allowed
        );
        assert_eq!(
            second
                .check_ip(Some(&ip), RateLimitAction::ConsumeLink)
                .await,
            RateLimitDecision::Allowed
        );
        assert_eq!(
            first
                .check_ip(Some(&ip), RateLimitAction::ConsumeLink)
                .await,
            RateLimitDecision::Limited
        );
        // Other actions keep their own budget.
        assert_eq!(
            second
                .check_ip(Some(&ip), RateLimitAction::RequestLink)
                .await,
            RateLimitDecision::Allowed
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_checks_never_exceed_the_budget() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };
        let limiter = Arc::new(PgRateLimiter::new(
            pool,
            RateLimitConfig::new().with_request_link_limit(3),
        ));
        let email = format!("{}@example.com", Uuid::new_v4().simple());

        let mut handles = Vec::new();
        for _ in 0..12 {
            let limiter = limiter.clone();
            let email = email.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .check_email(&email, RateLimitAction::RequestLink)
                    .await
            }));
        }
        let mut allowed = 0;
        for handle in handles {
            if handle.await? == RateLimitDecision::Allowed {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 3);
        Ok(())
    }
}
