use crate::GIT_COMMIT_HASH;
use crate::api::handlers::auth::AuthState;
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Database is healthy", body = [Health]),
        (status = 503, description = "Database is unhealthy", body = [Health])
    ),
    tag= "health"
)]
// axum handler for health
pub async fn health(method: Method, auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    let result = auth_state.store().ping().await;
    if let Err(error) = &result {
        error!("Failed to ping database: {error:#}");
    }

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if result.is_ok() {
            "ok".to_string()
        } else {
            "error".to_string()
        },
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);

            let mut headers = HeaderMap::new();

            headers.insert("X-App", x_app_header_value);

            headers
        })
        .map_err(|err| {
            error!("Failed to parse X-App header: {}", err);
        });

    // Unwrap the headers or provide a default value (empty headers) in case of an error
    let headers = headers.unwrap_or_else(|()| HeaderMap::new());

    if result.is_ok() {
        debug!("Database connection is healthy");
        (StatusCode::OK, headers, body)
    } else {
        debug!("Database connection is unhealthy");
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::email::LogEmailSender;
    use crate::api::handlers::auth::{AuthConfig, NoopRateLimiter, SessionIssuer};
    use crate::store::{
        AuthStore, ClaimStore, IdentityStore, MemoryStore, ResolvedIdentity, TokenStore,
    };
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use axum::body::to_bytes;
    use chrono::{DateTime, Utc};
    use secrecy::SecretString;
    use uuid::Uuid;

    struct DownStore;

    #[async_trait]
    impl TokenStore for DownStore {
        async fn issue(
            &self,
            _token: crate::store::NewMagicToken,
        ) -> Result<crate::store::MagicToken> {
            Err(anyhow!("down"))
        }

        async fn consume_if_valid(
            &self,
            _digest: &crate::token::TokenDigest,
            _now: DateTime<Utc>,
        ) -> Result<Option<String>> {
            Err(anyhow!("down"))
        }
    }

    #[async_trait]
    impl IdentityStore for DownStore {
        async fn resolve_or_create(
            &self,
            _email: &str,
            _now: DateTime<Utc>,
        ) -> Result<ResolvedIdentity> {
            Err(anyhow!("down"))
        }

        async fn find_identity(&self, _id: Uuid) -> Result<Option<crate::store::Identity>> {
            Err(anyhow!("down"))
        }
    }

    #[async_trait]
    impl ClaimStore for DownStore {
        async fn claim_unclaimed(
            &self,
            _identity_id: Uuid,
            _email: &str,
            _now: DateTime<Utc>,
        ) -> Result<u64> {
            Err(anyhow!("down"))
        }
    }

    #[async_trait]
    impl AuthStore for DownStore {
        async fn ping(&self) -> Result<()> {
            Err(anyhow!("down"))
        }
    }

    fn state(store: Arc<dyn AuthStore>) -> Result<Arc<AuthState>> {
        let sessions =
            SessionIssuer::new(SecretString::from("s".repeat(32)), chrono::Duration::days(1))?;
        Ok(Arc::new(AuthState::new(
            AuthConfig::new("http://localhost:8080".to_string()),
            store,
            sessions,
            Arc::new(NoopRateLimiter),
            Arc::new(LogEmailSender::default()),
        )))
    }

    #[tokio::test]
    async fn healthy_get_returns_body_and_app_header() -> Result<()> {
        let state = state(Arc::new(MemoryStore::new()))?;
        let response = health(Method::GET, Extension(state))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let app = response
            .headers()
            .get("X-App")
            .ok_or_else(|| anyhow!("missing X-App"))?
            .to_str()?
            .to_string();
        assert!(app.starts_with(&format!(
            "{}:{}:",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        )));
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let health: serde_json::Value = serde_json::from_slice(&body)?;
        assert_eq!(health["database"], "ok");
        Ok(())
    }

    #[tokio::test]
    async fn unhealthy_store_returns_503() -> Result<()> {
        let state = state(Arc::new(DownStore))?;
        let response = health(Method::GET, Extension(state))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        Ok(())
    }

    #[tokio::test]
    async fn options_has_empty_body() -> Result<()> {
        let state = state(Arc::new(MemoryStore::new()))?;
        let response = health(Method::OPTIONS, Extension(state))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        assert!(body.is_empty());
        Ok(())
    }
}
