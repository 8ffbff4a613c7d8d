//! Magic-link request and consume flow.
//!
//! `request_link` never tells the caller whether an address is known, valid,
//! throttled, or deliverable: every outcome maps to the same response.
//! `consume_link` collapses every failure into one generic rejection, so an
//! unknown token, a replayed one, and an expired one are indistinguishable.

use anyhow::Context;
use axum::{
    Json,
    extract::{
        Extension, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, LOCATION, REFERRER_POLICY, SET_COOKIE},
    },
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Duration, Utc};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::{
    claim::claim_all_for,
    identity::resolve_identity,
    rate_limit::{RateLimitAction, RateLimitDecision},
    session_token::IssuedSession,
    state::AuthState,
    types::{
        ConsumeParams, MAGIC_LINK_ACCEPTED, MAGIC_LINK_INVALID, MagicLinkAccepted,
        MagicLinkRequest,
    },
    utils::{
        PeerAddr, build_consume_url, extract_client_ip, extract_user_agent, normalize_email,
        parse_client_ip, valid_email,
    },
};
use crate::{
    api::email::{BestEffort, deliver, magic_link_message},
    store::{Identity, NewMagicToken, TokenStore},
    token,
};

/// Request metadata recorded alongside an issued token.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

/// What happened to a link request. Only logs and tests look at this; the
/// HTTP response is identical for every variant.
#[derive(Debug)]
pub enum RequestOutcome {
    /// Token stored and delivery started.
    Issued(BestEffort),
    Malformed,
    Throttled,
    /// Token generation or storage failed.
    Failed,
}

/// A consumed link: the identity it resolved to and the session to set.
#[derive(Debug)]
pub struct SignedIn {
    pub identity: Identity,
    pub claimed: u64,
    pub session: IssuedSession,
}

#[derive(Debug, thiserror::Error)]
pub enum ConsumeError {
    #[error("too many consume attempts")]
    Throttled,
    #[error("token is unknown, used, expired, or malformed")]
    Rejected,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Issue a single-use token for `email` and start delivering it.
pub async fn request_link(
    auth_state: &AuthState,
    email: &str,
    context: &RequestContext,
    now: DateTime<Utc>,
) -> RequestOutcome {
    let limiter = auth_state.rate_limiter();
    if limiter
        .check_ip(context.client_ip.as_deref(), RateLimitAction::RequestLink)
        .await
        == RateLimitDecision::Limited
    {
        return RequestOutcome::Throttled;
    }

    let email = normalize_email(email);
    if !valid_email(&email) {
        return RequestOutcome::Malformed;
    }

    if limiter
        .check_email(&email, RateLimitAction::RequestLink)
        .await
        == RateLimitDecision::Limited
    {
        return RequestOutcome::Throttled;
    }

    let (raw, digest) = match token::generate() {
        Ok(pair) => pair,
        Err(err) => {
            error!("Failed to generate magic token: {err:#}");
            return RequestOutcome::Failed;
        }
    };

    let config = auth_state.config();
    let ttl_minutes = config.link_ttl_minutes();
    let Some(expires_at) =
        Duration::try_minutes(ttl_minutes).and_then(|ttl| now.checked_add_signed(ttl))
    else {
        error!("Link TTL of {ttl_minutes} minutes is out of range");
        return RequestOutcome::Failed;
    };
    let new_token = NewMagicToken {
        email: email.clone(),
        digest,
        created_at: now,
        expires_at,
        request_ip: parse_client_ip(context.client_ip.as_deref()),
        request_user_agent: context.user_agent.clone(),
    };
    if let Err(err) = auth_state.store().issue(new_token).await {
        error!("Failed to persist magic token: {err:#}");
        return RequestOutcome::Failed;
    }

    let link = build_consume_url(config.public_base_url(), raw.expose_secret());
    if config.debug_logging() {
        debug!(email = %email, link = %link, "issued magic link");
    }
    let message = magic_link_message(&email, &link, ttl_minutes);
    RequestOutcome::Issued(deliver(auth_state.mailer(), message))
}

/// Redeem a raw token: consume it, resolve the identity, claim its records,
/// and sign a session.
///
/// # Errors
/// `Throttled` when the caller is over budget, `Rejected` for any token that
/// cannot be redeemed, `Backend` when a collaborator fails.
pub async fn consume_link(
    auth_state: &AuthState,
    raw: &str,
    client_ip: Option<&str>,
    now: DateTime<Utc>,
) -> Result<SignedIn, ConsumeError> {
    if auth_state
        .rate_limiter()
        .check_ip(client_ip, RateLimitAction::ConsumeLink)
        .await
        == RateLimitDecision::Limited
    {
        return Err(ConsumeError::Throttled);
    }

    if !token::is_plausible(raw) {
        return Err(ConsumeError::Rejected);
    }

    let store = auth_state.store();
    let email = store
        .consume_if_valid(&token::digest(raw), now)
        .await
        .context("failed to consume magic token")?
        .ok_or(ConsumeError::Rejected)?;

    let identity = resolve_identity(store, &email, now).await?;
    let claimed = claim_all_for(store, &identity, &email, now).await?;
    let session = auth_state.sessions().issue(identity.id, now)?;

    info!(identity_id = %identity.id, claimed, "magic link consumed");
    Ok(SignedIn {
        identity,
        claimed,
        session,
    })
}

/// Responses on this flow carry credentials or reveal them in the URL.
fn no_store_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    headers
}

impl IntoResponse for ConsumeError {
    // Every variant answers the same; only the log tells them apart.
    fn into_response(self) -> Response {
        match &self {
            Self::Throttled => info!("magic link consume throttled"),
            Self::Rejected => debug!("magic link consume rejected"),
            Self::Backend(err) => error!("Magic link consume failed: {err:#}"),
        }
        (
            StatusCode::BAD_REQUEST,
            no_store_headers(),
            MAGIC_LINK_INVALID.to_string(),
        )
            .into_response()
    }
}

fn signed_in_response(auth_state: &AuthState, signed_in: &SignedIn) -> Response {
    let cookie = match auth_state.sessions().cookie(&signed_in.session) {
        Ok(cookie) => cookie,
        Err(err) => {
            return ConsumeError::Backend(anyhow::anyhow!("invalid session cookie: {err}"))
                .into_response();
        }
    };
    let location = match HeaderValue::from_str(auth_state.config().landing_path()) {
        Ok(location) => location,
        Err(err) => {
            return ConsumeError::Backend(anyhow::anyhow!("invalid landing path: {err}"))
                .into_response();
        }
    };
    let mut headers = no_store_headers();
    headers.insert(SET_COOKIE, cookie);
    headers.insert(LOCATION, location);
    (StatusCode::SEE_OTHER, headers).into_response()
}

#[utoipa::path(
    post,
    path = "/auth/magic/request",
    request_body = MagicLinkRequest,
    responses(
        (status = 200, description = "Request accepted; the body never varies", body = MagicLinkAccepted)
    ),
    tag = "auth"
)]
pub async fn request(
    headers: HeaderMap,
    peer: PeerAddr,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<MagicLinkRequest>, JsonRejection>,
) -> impl IntoResponse {
    // A missing or unreadable body is treated as a malformed address.
    let email = payload
        .map(|Json(request)| request.email)
        .unwrap_or_default();
    let trust_forwarded = auth_state.config().trust_forwarded_for();
    let context = RequestContext {
        client_ip: extract_client_ip(&headers, peer, trust_forwarded),
        user_agent: extract_user_agent(&headers),
    };

    match request_link(&auth_state, &email, &context, Utc::now()).await {
        // Delivery continues in the background.
        RequestOutcome::Issued(_delivery) => debug!("magic link issued"),
        RequestOutcome::Malformed => debug!("magic link request with malformed email"),
        RequestOutcome::Throttled => info!("magic link request throttled"),
        RequestOutcome::Failed => {}
    }

    let body = MagicLinkAccepted {
        message: MAGIC_LINK_ACCEPTED.to_string(),
    };
    (StatusCode::OK, no_store_headers(), Json(body))
}

#[utoipa::path(
    get,
    path = "/auth/magic/consume",
    params(ConsumeParams),
    responses(
        (status = 303, description = "Signed in; session cookie set and redirected to the landing path"),
        (status = 400, description = "Invalid, used, or expired link, or too many attempts", body = String)
    ),
    tag = "auth"
)]
pub async fn consume(
    headers: HeaderMap,
    peer: PeerAddr,
    auth_state: Extension<Arc<AuthState>>,
    params: Result<Query<ConsumeParams>, QueryRejection>,
) -> Response {
    let trust_forwarded = auth_state.config().trust_forwarded_for();
    let client_ip = extract_client_ip(&headers, peer, trust_forwarded);
    let raw = params
        .ok()
        .and_then(|Query(params)| params.token)
        .unwrap_or_default();

    match consume_link(&auth_state, &raw, client_ip.as_deref(), Utc::now()).await {
        Ok(signed_in) => signed_in_response(&auth_state, &signed_in),
        Err(err) => err.into_response(),
    }
}
