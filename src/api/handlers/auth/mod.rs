//! Magic-link sign-in, account claiming, and sessions.
//!
//! ## Flow
//!
//! 1. `POST /auth/magic/request` stores the SHA-256 digest of a fresh random
//!    token and emails the raw token as a link. The response never varies.
//! 2. `GET /auth/magic/consume?token=` atomically marks the token used,
//!    resolves (or creates) the identity for its email, claims every migrated
//!    record still owned by that email, and sets a signed session cookie.
//!
//! ## Rate Limiting
//!
//! - **Request:** 5 per IP and 5 per email within 10 minutes. Throttled
//!   requests get the same response as accepted ones.
//! - **Consume:** 30 attempts per IP within 10 minutes. Throttled attempts get
//!   the same `400` as an invalid link.
//!
//! Counters live in Postgres (`PgRateLimiter`) so every instance shares them.
//! The client IP is the socket peer unless `--trust-forwarded-for` is set.

pub(crate) mod claim;
pub(crate) mod identity;
pub(crate) mod magic_link;
pub(crate) mod pg_rate_limit;
pub(crate) mod rate_limit;
pub(crate) mod session;
pub(crate) mod session_token;
mod state;
pub(crate) mod types;
mod utils;

pub use claim::claim_all_for;
pub use identity::resolve_identity;
pub use magic_link::{
    ConsumeError, RequestContext, RequestOutcome, SignedIn, consume_link, request_link,
};
pub use pg_rate_limit::PgRateLimiter;
pub use rate_limit::{
    FixedWindowRateLimiter, NoopRateLimiter, RateLimitAction, RateLimitConfig,
    RateLimitDecision, RateLimiter,
};
pub use session_token::{
    MAX_SESSION_LIFETIME_DAYS, SESSION_COOKIE_NAME, SessionClaims, SessionError, SessionIssuer,
    clear_session_cookie,
};
pub use state::{AuthConfig, AuthState, MAX_LINK_TTL_MINUTES};
pub use types::{MAGIC_LINK_ACCEPTED, MAGIC_LINK_INVALID};
pub use utils::PeerAddr;
