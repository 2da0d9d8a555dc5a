//! Gateway admin API contract and resource types.
//!
//! A [`GatewayAdmin`] talks to one environment's gateway. [`Gateways`] maps
//! each configured environment to its client.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::Config;
use crate::errors::{Error, Result};
use crate::route::connection_url;
use crate::types::{Environment, HttpMethod};

pub mod client;
pub mod memory;

pub use client::HttpGatewayClient;
pub use memory::MemoryGateway;

/// Name of the plugin that rejects all traffic on its route
pub const REQUEST_TERMINATION: &str = "request-termination";

/// Admin API of one environment's gateway
///
/// Every call is a single remote request. Implementations do not retry;
/// failures map onto the `Gateway*` variants of [`Error`].
#[async_trait]
pub trait GatewayAdmin: Send + Sync {
    /// Creates or replaces the service named `definition.name`
    async fn upsert_service(&self, definition: &ServiceDefinition) -> Result<GatewayService>;

    /// Lists services carrying all of the given tags
    async fn list_services(&self, tags: &[String]) -> Result<Vec<GatewayService>>;

    /// Creates a route bound to a service
    async fn create_route(&self, definition: &RouteDefinition) -> Result<GatewayRoute>;

    /// Looks a route up by name or id; `None` when absent
    async fn find_route(&self, name_or_id: &str) -> Result<Option<GatewayRoute>>;

    /// Rewrites name, paths, methods, tags and service of an existing route
    async fn update_route(
        &self,
        route_id: &str,
        definition: &RouteDefinition,
    ) -> Result<GatewayRoute>;

    /// Deletes a route together with its plugins
    async fn delete_route(&self, route_id: &str) -> Result<()>;

    /// Lists the plugins attached to a route
    async fn list_plugins(&self, route_id: &str) -> Result<Vec<GatewayPlugin>>;

    /// Attaches a new plugin to a route
    async fn create_plugin(
        &self,
        route_id: &str,
        definition: &PluginDefinition,
    ) -> Result<GatewayPlugin>;

    /// Replaces a plugin attached to a route
    async fn update_plugin(
        &self,
        route_id: &str,
        plugin_id: &str,
        definition: &PluginDefinition,
    ) -> Result<GatewayPlugin>;

    /// Probes the admin API
    async fn status(&self) -> Result<()>;
}

/// Remote operation, used in errors and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayOperation {
    UpsertService,
    ListServices,
    CreateRoute,
    FindRoute,
    UpdateRoute,
    DeleteRoute,
    ListPlugins,
    CreatePlugin,
    UpdatePlugin,
    Status,
}

impl GatewayOperation {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayOperation::UpsertService => "upsert_service",
            GatewayOperation::ListServices => "list_services",
            GatewayOperation::CreateRoute => "create_route",
            GatewayOperation::FindRoute => "find_route",
            GatewayOperation::UpdateRoute => "update_route",
            GatewayOperation::DeleteRoute => "delete_route",
            GatewayOperation::ListPlugins => "list_plugins",
            GatewayOperation::CreatePlugin => "create_plugin",
            GatewayOperation::UpdatePlugin => "update_plugin",
            GatewayOperation::Status => "status",
        }
    }
}

impl std::fmt::Display for GatewayOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reference to another gateway resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub id: String,
}

impl ResourceRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Desired shape of a gateway service, keyed by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDefinition {
    pub name: String,
    pub protocol: String,
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub retries: u32,
    pub tags: Vec<String>,
    pub enabled: bool,
}

/// Service as reported by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayService {
    pub id: String,
    pub name: String,
    pub protocol: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl GatewayService {
    /// `protocol://host:port` plus the given path
    pub fn connection_url(&self, path: &str) -> String {
        connection_url(&self.protocol, &self.host, self.port, path)
    }
}

/// Desired shape of a gateway route
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDefinition {
    pub name: String,
    pub paths: Vec<String>,
    pub methods: Vec<HttpMethod>,
    pub tags: Vec<String>,
    pub service: ResourceRef,
    pub strip_path: bool,
}

/// Route as reported by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayRoute {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub paths: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub methods: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub service: Option<ResourceRef>,
}

/// Desired shape of a plugin
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginDefinition {
    pub name: String,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

impl PluginDefinition {
    /// Request-termination plugin answering with the given status and message
    pub fn request_termination(enabled: bool, status_code: u16, message: &str) -> Self {
        Self {
            name: REQUEST_TERMINATION.to_string(),
            enabled,
            config: Some(serde_json::json!({
                "status_code": status_code,
                "message": message,
            })),
        }
    }
}

/// Plugin as reported by the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayPlugin {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    #[serde(default)]
    pub route: Option<ResourceRef>,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

impl GatewayPlugin {
    /// Checks whether this is a request-termination plugin bound to the route
    pub fn is_termination_for(&self, route_id: &str) -> bool {
        self.name == REQUEST_TERMINATION
            && self.route.as_ref().is_some_and(|r| r.id == route_id)
    }
}

/// Paginated list envelope of the admin API
#[derive(Debug, Deserialize)]
pub(crate) struct Page<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub next: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Gateway clients keyed by environment
#[derive(Clone, Default)]
pub struct Gateways {
    by_environment: BTreeMap<Environment, Arc<dyn GatewayAdmin>>,
}

impl Gateways {
    /// Creates an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an HTTP client for every configured environment
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut gateways = Self::new();
        for (name, gateway) in &config.environments {
            let environment = Environment::new(name.clone())?;
            let client = HttpGatewayClient::new(environment.clone(), gateway)?;
            gateways.insert(environment, Arc::new(client));
        }
        Ok(gateways)
    }

    /// Registers the client for an environment, replacing any previous one
    pub fn insert(&mut self, environment: Environment, gateway: Arc<dyn GatewayAdmin>) {
        self.by_environment.insert(environment, gateway);
    }

    /// Adds a client, builder style
    #[must_use]
    pub fn with(mut self, environment: Environment, gateway: Arc<dyn GatewayAdmin>) -> Self {
        self.insert(environment, gateway);
        self
    }

    /// Returns the client for an environment
    pub fn get(&self, environment: &Environment) -> Result<Arc<dyn GatewayAdmin>> {
        self.by_environment
            .get(environment)
            .cloned()
            .ok_or_else(|| Error::UnknownEnvironment(environment.to_string()))
    }

    /// Configured environments in name order
    pub fn environments(&self) -> impl Iterator<Item = &Environment> {
        self.by_environment.keys()
    }
}

impl std::fmt::Debug for Gateways {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateways")
            .field("environments", &self.by_environment.keys().collect::<Vec<_>>())
            .finish()
    }
}
