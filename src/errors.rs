//! Error types for collection and route reconciliation.

use thiserror::Error;
use uuid::Uuid;

use crate::gateway::GatewayOperation;

/// Result type alias for routesync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for routesync operations
#[derive(Debug, Error)]
pub enum Error {
    /// Input validation error
    #[error("validation error: field={field} message={message}")]
    Validation { field: String, message: String },

    /// Upstream URL could not be parsed into a gateway service
    #[error("invalid upstream url: {0}")]
    InvalidUpstream(String),

    /// No gateway is configured for the environment
    #[error("unknown environment: {0}")]
    UnknownEnvironment(String),

    /// Another active route in the environment already uses the name
    #[error("route name {name:?} is already used in environment {environment}")]
    DuplicateRouteName { environment: String, name: String },

    /// Another active collection already uses the slug
    #[error("collection slug {0:?} is already taken")]
    DuplicateCollection(String),

    /// Collection not found or deleted
    #[error("collection not found: {0}")]
    CollectionNotFound(Uuid),

    /// Route not found or deleted
    #[error("route not found: {0}")]
    RouteNotFound(Uuid),

    /// Collection still owns active routes
    #[error("collection {slug:?} is not empty: {active_routes} active route(s)")]
    CollectionNotEmpty { slug: String, active_routes: usize },

    /// Gateway could not be reached, timed out or answered 408/429/5xx
    #[error("gateway unavailable during {operation}: {message}")]
    GatewayUnavailable {
        operation: GatewayOperation,
        message: String,
    },

    /// Gateway answered 404 for a referenced resource
    #[error("gateway resource not found during {operation}: {resource}")]
    GatewayNotFound {
        operation: GatewayOperation,
        resource: String,
    },

    /// Gateway refused the request
    #[error("gateway rejected {operation} with status {status}: {body}")]
    GatewayRejected {
        operation: GatewayOperation,
        status: u16,
        body: String,
    },

    /// Gateway answered 2xx with a body that does not decode
    #[error("unexpected gateway response during {operation}: {message}")]
    GatewayResponse {
        operation: GatewayOperation,
        message: String,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification used by callers to pick a response status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before any remote call (4xx)
    Validation,
    /// Referenced collection or route is absent (404)
    NotFound,
    /// Request conflicts with current state (409)
    Conflict,
    /// Gateway failure (502/503)
    Gateway,
    /// Anything else (500)
    Internal,
}

impl Error {
    /// Creates a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a new invalid upstream error
    pub fn invalid_upstream(message: impl Into<String>) -> Self {
        Error::InvalidUpstream(message.into())
    }

    /// Creates a new duplicate route name error
    pub fn duplicate_route_name(environment: impl Into<String>, name: impl Into<String>) -> Self {
        Error::DuplicateRouteName {
            environment: environment.into(),
            name: name.into(),
        }
    }

    /// Creates a new gateway unavailable error
    pub fn gateway_unavailable(operation: GatewayOperation, message: impl Into<String>) -> Self {
        Error::GatewayUnavailable {
            operation,
            message: message.into(),
        }
    }

    /// Creates a new gateway not found error
    pub fn gateway_not_found(operation: GatewayOperation, resource: impl Into<String>) -> Self {
        Error::GatewayNotFound {
            operation,
            resource: resource.into(),
        }
    }

    /// Creates a new gateway rejected error
    pub fn gateway_rejected(
        operation: GatewayOperation,
        status: u16,
        body: impl Into<String>,
    ) -> Self {
        Error::GatewayRejected {
            operation,
            status,
            body: body.into(),
        }
    }

    /// Creates a new gateway response error
    pub fn gateway_response(operation: GatewayOperation, message: impl Into<String>) -> Self {
        Error::GatewayResponse {
            operation,
            message: message.into(),
        }
    }

    /// Creates a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Returns true when replaying the failed call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::GatewayUnavailable { .. })
    }

    /// Returns true for any failure reported by or while talking to a gateway
    pub fn is_gateway(&self) -> bool {
        matches!(
            self,
            Error::GatewayUnavailable { .. }
                | Error::GatewayNotFound { .. }
                | Error::GatewayRejected { .. }
                | Error::GatewayResponse { .. }
        )
    }

    /// Classifies the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation { .. }
            | Error::InvalidUpstream(_)
            | Error::UnknownEnvironment(_)
            | Error::DuplicateRouteName { .. }
            | Error::DuplicateCollection(_) => ErrorKind::Validation,
            Error::CollectionNotFound(_) | Error::RouteNotFound(_) => ErrorKind::NotFound,
            Error::CollectionNotEmpty { .. } => ErrorKind::Conflict,
            Error::GatewayUnavailable { .. }
            | Error::GatewayNotFound { .. }
            | Error::GatewayRejected { .. }
            | Error::GatewayResponse { .. } => ErrorKind::Gateway,
            Error::Config(_)
            | Error::Serialization(_)
            | Error::Io(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let id = Uuid::nil();
        let err = Error::RouteNotFound(id);
        assert_eq!(err.to_string(), format!("route not found: {id}"));

        let err = Error::invalid_upstream("missing host");
        assert_eq!(err.to_string(), "invalid upstream url: missing host");

        let err = Error::CollectionNotEmpty {
            slug: "payments".to_string(),
            active_routes: 2,
        };
        assert_eq!(
            err.to_string(),
            "collection \"payments\" is not empty: 2 active route(s)"
        );
    }

    #[test]
    fn test_validation_error() {
        let err = Error::validation("name", "name is required");
        assert!(err.to_string().contains("name"));
        assert!(err.to_string().contains("name is required"));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_only_unavailable_is_retryable() {
        let unavailable = Error::gateway_unavailable(GatewayOperation::CreateRoute, "timeout");
        assert!(unavailable.is_retryable());
        assert!(unavailable.is_gateway());

        let not_found = Error::gateway_not_found(GatewayOperation::UpdateRoute, "routes/abc");
        assert!(!not_found.is_retryable());
        assert_eq!(not_found.kind(), ErrorKind::Gateway);

        let rejected = Error::gateway_rejected(GatewayOperation::CreatePlugin, 409, "conflict");
        assert!(!rejected.is_retryable());
        assert!(rejected.to_string().contains("409"));
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            Error::CollectionNotFound(Uuid::nil()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            Error::duplicate_route_name("production", "balance").kind(),
            ErrorKind::Validation
        );
        assert_eq!(Error::config("bad").kind(), ErrorKind::Internal);
    }
}
