//! Small helpers for email validation, client metadata, and link building.

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, header::USER_AGENT, request::Parts},
};
use regex::Regex;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

// Stored user agents are advisory; longer values are truncated.
const MAX_USER_AGENT_LEN: usize = 512;
const MAX_EMAIL_LEN: usize = 320;

/// Normalize an email for lookup and uniqueness checks.
pub(super) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(super) fn valid_email(email_normalized: &str) -> bool {
    email_normalized.len() <= MAX_EMAIL_LEN
        && Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")
            .is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Build the link included in outbound emails.
pub(super) fn build_consume_url(public_base_url: &str, token: &str) -> String {
    let base = public_base_url.trim_end_matches('/');
    format!("{base}/auth/magic/consume?token={token}")
}

/// Peer address of the TCP connection, when the server was started with
/// connect info. Never rejects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PeerAddr(pub Option<IpAddr>);

impl<S> FromRequestParts<S> for PeerAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip()),
        ))
    }
}

/// Client IP for rate limiting and auditing.
///
/// Proxy headers are only consulted when `trust_forwarded` is set; otherwise
/// any client could pick its own address.
pub(super) fn extract_client_ip(
    headers: &HeaderMap,
    peer: PeerAddr,
    trust_forwarded: bool,
) -> Option<String> {
    let peer_ip = peer.0.map(|ip| ip.to_string());
    if !trust_forwarded {
        return peer_ip;
    }
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or(peer_ip)
}

/// Only well-formed addresses are persisted.
pub(super) fn parse_client_ip(ip: Option<&str>) -> Option<IpAddr> {
    ip.and_then(|value| value.parse().ok())
}

pub(super) fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.chars().take(MAX_USER_AGENT_LEN).collect())
}
