use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::cost::CostWithChildren;

/// Query parameters of the cost tree endpoints
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct TreeQuery {
    /// Leave `estimation_month` empty. Required when `start` and `end` are given.
    #[serde(default)]
    pub skip_estimation: bool,
    /// Start of the window (RFC 3339). Must be given together with `end`.
    #[param(value_type = Option<String>, format = "date-time")]
    #[schema(value_type = Option<String>, format = "date-time")]
    pub start: Option<DateTime<Utc>>,
    /// End of the window (RFC 3339). Must be given together with `start`.
    #[param(value_type = Option<String>, format = "date-time")]
    #[schema(value_type = Option<String>, format = "date-time")]
    pub end: Option<DateTime<Utc>>,
    /// Compute the tree of another user (admins only)
    pub for_user: Option<String>,
}

/// Body of a 500 response when some domains failed: the error of the first failing domain and
/// the tree of all domains that succeeded.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PartialTreeResponse {
    pub message: String,
    pub tree: CostWithChildren,
}
