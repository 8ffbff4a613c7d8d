//! API handlers for the magic-link service.

pub mod auth;
pub mod health;
