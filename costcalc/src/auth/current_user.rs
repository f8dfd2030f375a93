use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;
use tracing::{debug, instrument, trace};

use crate::{
    AppState,
    errors::{Error, Result},
};

const ADMIN_ROLE: &str = "admin";

/// The authenticated caller of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentUser {
    pub id: String,
    pub is_admin: bool,
    /// The `Authorization` header as received, forwarded to collaborators
    pub token: String,
}

#[derive(Debug, Default, Deserialize)]
struct RealmAccess {
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    realm_access: RealmAccess,
}

/// Reads the claims of a gateway-verified token without checking its signature or expiry.
fn parse_token(header: &str) -> Result<CurrentUser> {
    let jwt = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .unwrap_or(header)
        .trim();

    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<Claims>(jwt, &DecodingKey::from_secret(&[]), &validation).map_err(|e| {
        trace!("Token decoding failed: {}", e);
        Error::Unauthenticated {
            message: Some("Invalid bearer token".to_string()),
        }
    })?;

    if data.claims.sub.is_empty() {
        return Err(Error::Unauthenticated {
            message: Some("Token has no subject".to_string()),
        });
    }

    Ok(CurrentUser {
        is_admin: data.claims.realm_access.roles.iter().any(|r| r == ADMIN_ROLE),
        id: data.claims.sub,
        token: header.to_string(),
    })
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let header = match parts.headers.get(AUTHORIZATION) {
            Some(value) => Some(value.to_str().map_err(|e| Error::BadRequest {
                message: format!("Invalid authorization header: {e}"),
            })?),
            None => None,
        };

        if let Some(id) = &state.config.dev_overwrite_user_id {
            debug!("Using development user override {}", id);
            return Ok(CurrentUser {
                id: id.clone(),
                is_admin: false,
                token: header.unwrap_or_default().to_string(),
            });
        }

        let header = header.ok_or(Error::Unauthenticated { message: None })?;
        let user = parse_token(header)?;
        debug!("Authenticated user {} (admin: {})", user.id, user.is_admin);
        Ok(user)
    }
}

#[cfg(test)]
pub(crate) fn test_token(user_id: &str, admin: bool) -> String {
    use jsonwebtoken::{EncodingKey, Header, encode};
    let roles: Vec<&str> = if admin { vec!["user", ADMIN_ROLE] } else { vec!["user"] };
    let claims = serde_json::json!({"sub": user_id, "realm_access": {"roles": roles}});
    let jwt = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"gateway-secret")).unwrap();
    format!("Bearer {jwt}")
}
