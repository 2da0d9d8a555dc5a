//! Core type definitions.
//!
//! This module contains the internal desired-state records (collections and
//! routes), the environment tag that selects a gateway, and the composed views
//! returned to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Error, Result};

/// Deployment target with its own gateway admin endpoint
///
/// Names are lowercase ASCII letters, digits, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Environment(String);

impl Environment {
    /// Development environment name
    pub const DEVELOPMENT: &'static str = "development";
    /// Production environment name
    pub const PRODUCTION: &'static str = "production";

    /// Creates an environment after validating its name
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if !valid {
            return Err(Error::validation(
                "environment",
                format!("invalid environment name {name:?}"),
            ));
        }
        Ok(Self(name))
    }

    /// The development environment
    pub fn development() -> Self {
        Self(Self::DEVELOPMENT.to_string())
    }

    /// The production environment
    pub fn production() -> Self {
        Self(Self::PRODUCTION.to_string())
    }

    /// Returns the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Environment {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Environment> for String {
    fn from(value: Environment) -> Self {
        value.0
    }
}

impl std::str::FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// HTTP method exposed by a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            other => Err(Error::validation(
                "method",
                format!("unsupported HTTP method {other:?}"),
            )),
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Named grouping of routes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    /// Unique identifier
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// URL-safe name, unique among active collections; used as gateway tag
    pub slug: String,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
    /// Soft-delete timestamp
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Collection {
    /// Checks whether the collection has been soft-deleted
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Internal desired-state record for one exposed endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Unique identifier
    pub id: Uuid,
    /// Name, unique (by slug) among active routes of the environment
    pub name: String,
    /// URL-safe name; also the gateway route name
    pub slug: String,
    /// HTTP method
    pub method: HttpMethod,
    /// Upstream URL the gateway proxies to
    pub upstream_url: String,
    /// Environment whose gateway exposes the route
    pub environment: Environment,
    /// Whether traffic is allowed
    pub enabled: bool,
    /// Parent collection
    pub collection_id: Uuid,
    /// Gateway service id, set after the first successful sync
    #[serde(default)]
    pub gateway_service_id: Option<String>,
    /// Gateway route id, set after the first successful sync
    #[serde(default)]
    pub gateway_route_id: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
    /// Soft-delete timestamp
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Route {
    /// Checks whether the route has been soft-deleted
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// A route is published once both gateway ids are known
    pub fn is_published(&self) -> bool {
        self.gateway_service_id.is_some() && self.gateway_route_id.is_some()
    }
}

/// Composed route view returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteView {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub method: HttpMethod,
    /// `protocol://host:port/path` of the upstream
    pub url: String,
    pub environment: Environment,
    pub enabled: bool,
    pub collection_id: Uuid,
    pub gateway_service_id: Option<String>,
    pub gateway_route_id: Option<String>,
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RouteView {
    /// Composes a view from a route record and its connection URL
    pub fn new(route: &Route, url: String) -> Self {
        Self {
            id: route.id,
            name: route.name.clone(),
            slug: route.slug.clone(),
            method: route.method,
            url,
            environment: route.environment.clone(),
            enabled: route.enabled,
            collection_id: route.collection_id,
            gateway_service_id: route.gateway_service_id.clone(),
            gateway_route_id: route.gateway_route_id.clone(),
            published: route.is_published(),
            created_at: route.created_at,
            updated_at: route.updated_at,
        }
    }
}

/// Collection with its active route count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionView {
    #[serde(flatten)]
    pub collection: Collection,
    pub active_routes: usize,
}

/// Filter for route listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteFilter {
    /// Only routes of this collection
    pub collection_id: Option<Uuid>,
    /// Only routes of this environment
    pub environment: Option<Environment>,
}

impl RouteFilter {
    /// Checks whether an active route matches the filter
    pub fn matches(&self, route: &Route) -> bool {
        !route.is_deleted()
            && self.collection_id.is_none_or(|id| route.collection_id == id)
            && self
                .environment
                .as_ref()
                .is_none_or(|env| &route.environment == env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_validation() {
        assert!(Environment::new("development").is_ok());
        assert!(Environment::new("staging-2").is_ok());
        assert!(Environment::new("").is_err());
        assert!(Environment::new("Production").is_err());
        assert!(Environment::new("prod env").is_err());
    }

    #[test]
    fn test_environment_serde() {
        let env: Environment = serde_json::from_str("\"production\"").unwrap();
        assert_eq!(env, Environment::production());
        assert_eq!(serde_json::to_string(&env).unwrap(), "\"production\"");
        assert!(serde_json::from_str::<Environment>("\"PROD\"").is_err());
    }

    #[test]
    fn test_http_method_parse() {
        assert_eq!("get".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert_eq!("PATCH".parse::<HttpMethod>().unwrap(), HttpMethod::Patch);
        assert!("TRACE".parse::<HttpMethod>().is_err());
        assert_eq!(
            serde_json::to_string(&HttpMethod::Delete).unwrap(),
            "\"DELETE\""
        );
    }

    #[test]
    fn test_route_filter() {
        let now = Utc::now();
        let collection_id = Uuid::new_v4();
        let mut route = Route {
            id: Uuid::new_v4(),
            name: "balance".to_string(),
            slug: "balance".to_string(),
            method: HttpMethod::Get,
            upstream_url: "http://core.bank.local/accounts/balance".to_string(),
            environment: Environment::development(),
            enabled: true,
            collection_id,
            gateway_service_id: None,
            gateway_route_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        assert!(RouteFilter::default().matches(&route));
        assert!(RouteFilter {
            collection_id: Some(collection_id),
            environment: Some(Environment::development()),
        }
        .matches(&route));
        assert!(!RouteFilter {
            collection_id: None,
            environment: Some(Environment::production()),
        }
        .matches(&route));

        route.deleted_at = Some(now);
        assert!(!RouteFilter::default().matches(&route));
    }
}
