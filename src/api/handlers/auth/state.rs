//! Auth state and configuration.

use anyhow::{Result, anyhow};
use std::net::IpAddr;
use std::sync::Arc;
use url::{Host, Url};

use super::{rate_limit::RateLimiter, session_token::SessionIssuer};
use crate::api::email::EmailSender;
use crate::store::AuthStore;

const DEFAULT_LINK_TTL_MINUTES: i64 = 15;
pub const MAX_LINK_TTL_MINUTES: i64 = 60;
const DEFAULT_LANDING_PATH: &str = "/app";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    public_base_url: String,
    landing_path: String,
    link_ttl_minutes: i64,
    debug_logging: bool,
    trust_forwarded_for: bool,
}

impl AuthConfig {
    #[must_use]
    pub fn new(public_base_url: String) -> Self {
        Self {
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            landing_path: DEFAULT_LANDING_PATH.to_string(),
            link_ttl_minutes: DEFAULT_LINK_TTL_MINUTES,
            debug_logging: false,
            trust_forwarded_for: false,
        }
    }

    #[must_use]
    pub fn with_landing_path(mut self, path: String) -> Self {
        self.landing_path = path;
        self
    }

    #[must_use]
    pub fn with_link_ttl_minutes(mut self, minutes: i64) -> Self {
        self.link_ttl_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }

    /// Take the client address from `x-forwarded-for` / `x-real-ip`. Only
    /// enable behind a proxy that overwrites those headers.
    #[must_use]
    pub fn with_trust_forwarded_for(mut self, enabled: bool) -> Self {
        self.trust_forwarded_for = enabled;
        self
    }

    #[must_use]
    pub fn public_base_url(&self) -> &str {
        &self.public_base_url
    }

    #[must_use]
    pub fn landing_path(&self) -> &str {
        &self.landing_path
    }

    #[must_use]
    pub fn link_ttl_minutes(&self) -> i64 {
        self.link_ttl_minutes
    }

    #[must_use]
    pub fn debug_logging(&self) -> bool {
        self.debug_logging
    }

    #[must_use]
    pub fn trust_forwarded_for(&self) -> bool {
        self.trust_forwarded_for
    }

    /// Reject configurations that would be unsafe to serve.
    ///
    /// # Errors
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.public_base_url)
            .map_err(|err| anyhow!("invalid public base URL {}: {err}", self.public_base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!("public base URL must use http or https"));
        }
        if !(1..=MAX_LINK_TTL_MINUTES).contains(&self.link_ttl_minutes) {
            return Err(anyhow!(
                "link TTL must be between 1 and {MAX_LINK_TTL_MINUTES} minutes"
            ));
        }
        // The landing path goes into a Location header; only same-origin paths.
        if !self.landing_path.starts_with('/')
            || self.landing_path.starts_with("//")
            || self.landing_path.contains('\\')
        {
            return Err(anyhow!(
                "landing path must be an absolute path on this origin: {}",
                self.landing_path
            ));
        }
        if self.debug_logging && !is_loopback(&url) {
            return Err(anyhow!(
                "debug logging prints live sign-in links and is only allowed for a loopback base URL"
            ));
        }
        Ok(())
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
        Some(Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
        None => false,
    }
}

/// Everything the sign-in handlers share.
pub struct AuthState {
    config: AuthConfig,
    store: Arc<dyn AuthStore>,
    sessions: SessionIssuer,
    rate_limiter: Arc<dyn RateLimiter>,
    mailer: Arc<dyn EmailSender>,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        store: Arc<dyn AuthStore>,
        sessions: SessionIssuer,
        rate_limiter: Arc<dyn RateLimiter>,
        mailer: Arc<dyn EmailSender>,
    ) -> Self {
        Self {
            config,
            store,
            sessions,
            rate_limiter,
            mailer,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &dyn AuthStore {
        self.store.as_ref()
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionIssuer {
        &self.sessions
    }

    pub(super) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }

    pub(super) fn mailer(&self) -> Arc<dyn EmailSender> {
        self.mailer.clone()
    }
}
