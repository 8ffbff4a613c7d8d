use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Uniform acknowledgement for link requests.
pub const MAGIC_LINK_ACCEPTED: &str = "If that address can sign in, a link is on its way.";
/// Uniform failure for consume attempts.
pub const MAGIC_LINK_INVALID: &str = "This sign-in link is invalid or has expired.";

#[derive(Debug, Deserialize, ToSchema)]
pub struct MagicLinkRequest {
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MagicLinkAccepted {
    pub message: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ConsumeParams {
    /// Raw token from the emailed link.
    pub token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    pub identity_id: String,
    pub email: String,
    pub expires_at: String,
}
