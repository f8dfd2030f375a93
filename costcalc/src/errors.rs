use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Caller is authenticated but not allowed to perform the operation
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Invalid request data, window or cost type
    #[error("{message}")]
    BadRequest { message: String },

    /// A collaborator service answered with an error or could not be reached
    #[error("{service} request failed: {message}")]
    Upstream { service: &'static str, message: String },

    /// A collaborator answered successfully but with a shape we can't use
    #[error("unexpected {service} response: {message}")]
    UnexpectedResponse { service: &'static str, message: String },

    /// Prefetch mode is on and the stats cache hasn't been filled yet
    #[error("cache not ready, try again later")]
    CacheNotReady,

    /// A single cost domain failed while assembling the tree
    #[error("{domain}: {source}")]
    Domain {
        domain: &'static str,
        #[source]
        source: Box<Error>,
    },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::Domain { source, .. } => match source.as_ref() {
                // an invalid window is rejected identically by every domain
                Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Upstream { .. }
            | Error::UnexpectedResponse { .. }
            | Error::CacheNotReady
            | Error::Internal { .. }
            | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::Forbidden { message } => message.clone(),
            Error::BadRequest { message } => message.clone(),
            Error::Upstream { service, .. } => format!("{service} is unavailable"),
            Error::UnexpectedResponse { service, .. } => format!("unexpected response from {service}"),
            Error::CacheNotReady => self.to_string(),
            Error::Domain { domain, source } => format!("{domain}: {}", source.user_message()),
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Other(_) => "Internal server error".to_string(),
        }
    }

    /// Wraps this error so it names the cost domain it came from.
    pub fn in_domain(self, domain: &'static str) -> Self {
        match self {
            already @ Error::Domain { .. } => already,
            other => Error::Domain {
                domain,
                source: Box::new(other),
            },
        }
    }

    pub(crate) fn log(&self) {
        match self {
            Error::Upstream { .. } | Error::UnexpectedResponse { .. } | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Domain { .. } => {
                tracing::error!("Cost domain failed: {}", self);
            }
            Error::CacheNotReady => {
                tracing::warn!("Request not served: {}", self);
            }
            Error::Unauthenticated { .. } | Error::Forbidden { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::BadRequest { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        self.log();
        (self.status_code(), self.user_message()).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            Error::BadRequest { message: "x".into() }.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(Error::Unauthenticated { message: None }.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::CacheNotReady.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            Error::Upstream {
                service: "prometheus",
                message: "boom".into()
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_domain_wrapping_names_domain_and_keeps_status() {
        let err = Error::Upstream {
            service: "prometheus",
            message: "connection refused".into(),
        }
        .in_domain("process");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.user_message().starts_with("process: "));

        let bad = Error::BadRequest { message: "nope".into() }.in_domain("imports");
        assert_eq!(bad.status_code(), StatusCode::BAD_REQUEST);

        // wrapping twice keeps the innermost domain
        let twice = bad.in_domain("analytics");
        assert!(twice.to_string().starts_with("imports"));
    }

    #[test]
    fn test_user_message_does_not_leak_upstream_body() {
        let err = Error::Upstream {
            service: "permission search",
            message: "secret internal detail".into(),
        };
        assert!(!err.user_message().contains("secret"));
    }
}
