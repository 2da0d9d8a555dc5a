//! Route and collection requests: construction, validation, slug derivation,
//! upstream URL parsing and change diffing.

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::types::{Environment, HttpMethod, Route};

/// Maximum length of route and collection names
pub const MAX_NAME_LEN: usize = 128;

/// Request to publish a new route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub name: String,
    pub upstream_url: String,
    pub method: HttpMethod,
    pub environment: Environment,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Creates a new enabled route request
///
/// # Examples
///
/// ```
/// use routesync::route::new_route_request;
/// use routesync::types::{Environment, HttpMethod};
///
/// let request = new_route_request(
///     "balance",
///     "http://core.bank.local/accounts/balance",
///     HttpMethod::Get,
///     Environment::development(),
/// );
/// assert!(request.enabled);
/// ```
pub fn new_route_request(
    name: impl Into<String>,
    upstream_url: impl Into<String>,
    method: HttpMethod,
    environment: Environment,
) -> RouteRequest {
    RouteRequest {
        name: name.into(),
        upstream_url: upstream_url.into(),
        method,
        environment,
        enabled: true,
    }
}

impl RouteRequest {
    /// Sets the enabled flag
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Validates the request and parses its upstream
    ///
    /// Performs no I/O; a malformed request never reaches the gateway.
    pub fn validate(&self) -> Result<Upstream> {
        validate_name("name", &self.name)?;
        Upstream::parse(&self.upstream_url)
    }

    /// Returns the slug derived from the name
    pub fn slug(&self) -> String {
        slugify(&self.name)
    }
}

/// Partial update of a published route
///
/// Environment and collection are fixed at publish time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub upstream_url: Option<String>,
    #[serde(default)]
    pub method: Option<HttpMethod>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl RoutePatch {
    /// Patch that only toggles the enabled flag
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Self::default()
        }
    }

    /// Applies the patch to a copy of the route's desired state
    pub fn apply(&self, route: &Route) -> Route {
        let mut desired = route.clone();
        if let Some(name) = &self.name {
            desired.name = name.clone();
            desired.slug = slugify(name);
        }
        if let Some(url) = &self.upstream_url {
            desired.upstream_url = url.clone();
        }
        if let Some(method) = self.method {
            desired.method = method;
        }
        if let Some(enabled) = self.enabled {
            desired.enabled = enabled;
        }
        desired
    }
}

/// Request to create or rename a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl CollectionRequest {
    /// Creates a request without description
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    /// Sets the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Validates the request
    pub fn validate(&self) -> Result<()> {
        validate_name("name", &self.name)
    }
}

fn validate_name(field: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::validation(field, "name is required"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(Error::validation(
            field,
            format!("name exceeds {MAX_NAME_LEN} characters"),
        ));
    }
    if slugify(name).is_empty() {
        return Err(Error::validation(
            field,
            "name must contain at least one letter or digit",
        ));
    }
    Ok(())
}

/// Derives a lowercase, URL-safe slug from a name
///
/// Runs of anything other than ASCII letters and digits collapse into a single
/// `-`; leading and trailing separators are dropped.
///
/// ```
/// use routesync::route::slugify;
///
/// assert_eq!(slugify("Core Banking / Accounts"), "core-banking-accounts");
/// ```
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    slug
}

/// Upstream backend derived from a route's URL
///
/// The hostname names the gateway service, so every route pointing at the
/// same host shares one service per environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    /// `http` or `https`
    pub protocol: String,
    /// Hostname, also the gateway service name
    pub host: String,
    /// Explicit port or the scheme default
    pub port: u16,
    /// Request path, `/` when empty
    pub path: String,
}

impl Upstream {
    /// Parses an absolute http(s) URL
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw.trim()).map_err(|e| Error::invalid_upstream(format!("{raw}: {e}")))?;

        let protocol = url.scheme().to_string();
        if protocol != "http" && protocol != "https" {
            return Err(Error::invalid_upstream(format!(
                "{raw}: unsupported scheme {protocol:?}"
            )));
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::invalid_upstream(format!("{raw}: missing host")))?
            .to_ascii_lowercase();

        if url.query().is_some() || url.fragment().is_some() {
            return Err(Error::invalid_upstream(format!(
                "{raw}: query and fragment are not allowed"
            )));
        }

        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::invalid_upstream(format!("{raw}: missing port")))?;

        let path = match url.path() {
            "" => "/".to_string(),
            p => p.to_string(),
        };

        Ok(Self {
            protocol,
            host,
            port,
            path,
        })
    }

    /// Connection URL in `protocol://host:port/path` form
    pub fn url(&self) -> String {
        connection_url(&self.protocol, &self.host, self.port, &self.path)
    }
}

/// Formats a connection URL from its parts
pub fn connection_url(protocol: &str, host: &str, port: u16, path: &str) -> String {
    if path.starts_with('/') {
        format!("{protocol}://{host}:{port}{path}")
    } else {
        format!("{protocol}://{host}:{port}/{path}")
    }
}

/// Differences between two versions of a route's desired state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteChanges {
    pub renamed: bool,
    pub upstream_changed: bool,
    pub host_changed: bool,
    pub method_changed: bool,
    pub enabled_changed: bool,
}

impl RouteChanges {
    /// Checks if there are any changes
    pub fn has_changes(&self) -> bool {
        self.renamed
            || self.upstream_changed
            || self.method_changed
            || self.enabled_changed
    }
}

/// Compares two versions of a route
pub fn diff_routes(old: &Route, new: &Route) -> RouteChanges {
    let host = |r: &Route| Upstream::parse(&r.upstream_url).map(|u| u.host).ok();

    RouteChanges {
        renamed: old.slug != new.slug || old.name != new.name,
        upstream_changed: old.upstream_url != new.upstream_url,
        host_changed: host(old) != host(new),
        method_changed: old.method != new.method,
        enabled_changed: old.enabled != new.enabled,
    }
}

/// Builds a fresh, unpublished route record from a validated request
pub fn new_route(request: &RouteRequest, collection_id: Uuid) -> Route {
    let now = chrono::Utc::now();
    Route {
        id: Uuid::new_v4(),
        name: request.name.clone(),
        slug: request.slug(),
        method: request.method,
        upstream_url: request.upstream_url.trim().to_string(),
        environment: request.environment.clone(),
        enabled: request.enabled,
        collection_id,
        gateway_service_id: None,
        gateway_route_id: None,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}
