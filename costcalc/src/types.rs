//! Shared identifiers: the cost domains and the 22-character short form of UUIDs used inside
//! metric table names.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use std::{fmt, str::FromStr};
use thiserror::Error;
use uuid::Uuid;

use crate::errors::Error as ServiceError;

/// The six top-level branches of a cost tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CostType {
    Analytics,
    Imports,
    Process,
    ApiCalls,
    Devices,
    Exports,
}

impl CostType {
    pub const ALL: [CostType; 6] = [
        CostType::Analytics,
        CostType::Imports,
        CostType::Process,
        CostType::ApiCalls,
        CostType::Devices,
        CostType::Exports,
    ];

    /// Key of this domain in the cost tree and in `/tree/{costType}`.
    pub fn as_str(&self) -> &'static str {
        match self {
            CostType::Analytics => "analytics",
            CostType::Imports => "imports",
            CostType::Process => "process",
            CostType::ApiCalls => "API Calls",
            CostType::Devices => "Devices",
            CostType::Exports => "Exports",
        }
    }
}

impl fmt::Display for CostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CostType {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CostType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ServiceError::BadRequest {
                message: format!("unknown cost type '{s}'"),
            })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShortIdError {
    #[error("'{0}' does not end in a UUID")]
    InvalidLongId(String),
    #[error("'{0}' is not a 22 character short id")]
    InvalidShortId(String),
}

/// Encodes the UUID at the end of `long_id` (anything before the last `:` is a prefix such as
/// `urn:infai:ses:device:`) as 22 characters of unpadded URL-safe base64.
pub fn shorten_id(long_id: &str) -> Result<String, ShortIdError> {
    let raw = long_id.rsplit(':').next().unwrap_or(long_id);
    let uuid = Uuid::parse_str(raw).map_err(|_| ShortIdError::InvalidLongId(long_id.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(uuid.as_bytes()))
}

/// Inverse of [`shorten_id`]; returns the hyphenated UUID without any prefix.
pub fn long_id(short_id: &str) -> Result<String, ShortIdError> {
    let invalid = || ShortIdError::InvalidShortId(short_id.to_string());
    if short_id.len() != 22 {
        return Err(invalid());
    }
    let bytes = URL_SAFE_NO_PAD.decode(short_id).map_err(|_| invalid())?;
    let uuid = Uuid::from_slice(&bytes).map_err(|_| invalid())?;
    Ok(uuid.hyphenated().to_string())
}
