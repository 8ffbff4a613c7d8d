//! Command-line argument dispatch.
//!
//! This module maps validated CLI arguments to the action to run.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::auth;
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        public_base_url: auth_opts.public_base_url,
        landing_path: auth_opts.landing_path,
        link_ttl_minutes: auth_opts.link_ttl_minutes,
        session_secret: auth_opts.session_secret,
        session_lifetime_days: auth_opts.session_lifetime_days,
        debug_logging: auth_opts.debug_logging,
        trust_forwarded_for: auth_opts.trust_forwarded_for,
        request_rate_limit: auth_opts.rate_limit.request_limit,
        consume_rate_limit: auth_opts.rate_limit.consume_limit,
        rate_limit_window_seconds: auth_opts.rate_limit.window_seconds,
    }))
}
