use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

use crate::api::handlers::auth::{MAX_LINK_TTL_MINUTES, MAX_SESSION_LIFETIME_DAYS};

pub const ARG_PUBLIC_BASE_URL: &str = "public-base-url";
pub const ARG_LANDING_PATH: &str = "landing-path";
pub const ARG_LINK_TTL_MINUTES: &str = "link-ttl-minutes";
pub const ARG_SESSION_SECRET: &str = "session-secret";
pub const ARG_SESSION_LIFETIME_DAYS: &str = "session-lifetime-days";
pub const ARG_DEBUG_LOGGING: &str = "debug-logging";
pub const ARG_TRUST_FORWARDED_FOR: &str = "trust-forwarded-for";
pub const ARG_REQUEST_RATE_LIMIT: &str = "request-rate-limit";
pub const ARG_CONSUME_RATE_LIMIT: &str = "consume-rate-limit";
pub const ARG_RATE_LIMIT_WINDOW_SECONDS: &str = "rate-limit-window-seconds";

#[derive(Debug)]
pub struct RateLimitOptions {
    pub request_limit: u32,
    pub consume_limit: u32,
    pub window_seconds: u64,
}

#[derive(Debug)]
pub struct Options {
    pub public_base_url: String,
    pub landing_path: String,
    pub link_ttl_minutes: i64,
    pub session_secret: SecretString,
    pub session_lifetime_days: i64,
    pub debug_logging: bool,
    pub trust_forwarded_for: bool,
    pub rate_limit: RateLimitOptions,
}

impl Options {
    /// # Errors
    /// Returns an error if a required argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let public_base_url = matches
            .get_one::<String>(ARG_PUBLIC_BASE_URL)
            .cloned()
            .context("missing required argument: --public-base-url")?;
        let session_secret = matches
            .get_one::<String>(ARG_SESSION_SECRET)
            .cloned()
            .map(SecretString::from)
            .context("missing required argument: --session-secret")?;

        Ok(Self {
            public_base_url,
            landing_path: matches
                .get_one::<String>(ARG_LANDING_PATH)
                .cloned()
                .unwrap_or_else(|| "/app".to_string()),
            link_ttl_minutes: matches
                .get_one::<i64>(ARG_LINK_TTL_MINUTES)
                .copied()
                .unwrap_or(15),
            session_secret,
            session_lifetime_days: matches
                .get_one::<i64>(ARG_SESSION_LIFETIME_DAYS)
                .copied()
                .unwrap_or(7),
            debug_logging: matches.get_flag(ARG_DEBUG_LOGGING),
            trust_forwarded_for: matches.get_flag(ARG_TRUST_FORWARDED_FOR),
            rate_limit: RateLimitOptions {
                request_limit: matches
                    .get_one::<u32>(ARG_REQUEST_RATE_LIMIT)
                    .copied()
                    .unwrap_or(5),
                consume_limit: matches
                    .get_one::<u32>(ARG_CONSUME_RATE_LIMIT)
                    .copied()
                    .unwrap_or(30),
                window_seconds: matches
                    .get_one::<u64>(ARG_RATE_LIMIT_WINDOW_SECONDS)
                    .copied()
                    .unwrap_or(600),
            },
        })
    }
}

pub fn with_args(command: Command) -> Command {
    let command = with_link_args(command);
    let command = with_session_args(command);
    with_rate_limit_args(command)
}

fn with_link_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PUBLIC_BASE_URL)
                .long(ARG_PUBLIC_BASE_URL)
                .help("Public base URL used to build sign-in links")
                .env("MAGICLINK_PUBLIC_BASE_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_LANDING_PATH)
                .long(ARG_LANDING_PATH)
                .help("Path to redirect to after a successful sign-in")
                .env("MAGICLINK_LANDING_PATH")
                .default_value("/app"),
        )
        .arg(
            Arg::new(ARG_LINK_TTL_MINUTES)
                .long(ARG_LINK_TTL_MINUTES)
                .help("Magic link lifetime in minutes")
                .env("MAGICLINK_LINK_TTL_MINUTES")
                .default_value("15")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_LINK_TTL_MINUTES)),
        )
        .arg(
            Arg::new(ARG_DEBUG_LOGGING)
                .long(ARG_DEBUG_LOGGING)
                .help("Log issued links and email bodies (loopback base URLs only)")
                .env("MAGICLINK_DEBUG_LOGGING")
                .action(ArgAction::SetTrue),
        )
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_SECRET)
                .long(ARG_SESSION_SECRET)
                .help("HMAC secret for signing session tokens (at least 32 bytes)")
                .env("MAGICLINK_SESSION_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_SESSION_LIFETIME_DAYS)
                .long(ARG_SESSION_LIFETIME_DAYS)
                .help("Session lifetime in days")
                .env("MAGICLINK_SESSION_LIFETIME_DAYS")
                .default_value("7")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_SESSION_LIFETIME_DAYS)),
        )
}

fn with_rate_limit_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TRUST_FORWARDED_FOR)
                .long(ARG_TRUST_FORWARDED_FOR)
                .help("Trust x-forwarded-for / x-real-ip for the client IP (behind a proxy only)")
                .env("MAGICLINK_TRUST_FORWARDED_FOR")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_REQUEST_RATE_LIMIT)
                .long(ARG_REQUEST_RATE_LIMIT)
                .help("Link requests allowed per IP and per email within the window")
                .env("MAGICLINK_REQUEST_RATE_LIMIT")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_CONSUME_RATE_LIMIT)
                .long(ARG_CONSUME_RATE_LIMIT)
                .help("Link consume attempts allowed per IP within the window")
                .env("MAGICLINK_CONSUME_RATE_LIMIT")
                .default_value("30")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_WINDOW_SECONDS)
                .long(ARG_RATE_LIMIT_WINDOW_SECONDS)
                .help("Rate limit window in seconds")
                .env("MAGICLINK_RATE_LIMIT_WINDOW_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
