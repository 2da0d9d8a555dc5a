//! In-memory gateway implementation for testing and dry runs.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::gateway::{
    GatewayAdmin, GatewayOperation, GatewayPlugin, GatewayRoute, GatewayService,
    PluginDefinition, ResourceRef, RouteDefinition, ServiceDefinition,
};

/// Failure injected into the next call of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Transport failure, retryable
    Unavailable,
    /// 404 for the addressed resource
    NotFound,
    /// Non-2xx refusal with the given status
    Rejected(u16),
    /// The call takes effect but its response never arrives, retryable
    LostResponse,
}

/// Outcome of a call once the gateway has applied it
#[must_use]
struct Reply(Option<Error>);

impl Reply {
    fn send<T>(self, value: T) -> Result<T> {
        match self.0 {
            Some(e) => Err(e),
            None => Ok(value),
        }
    }
}

/// In-memory gateway
///
/// Mirrors the admin API semantics the reconciler relies on: services are
/// upserted by name, route names are unique, deleting a route drops its
/// plugins and deleting a missing route is not an error. Thread-safe; clones
/// share state.
#[derive(Clone, Default)]
pub struct MemoryGateway {
    inner: Arc<RwLock<GatewayState>>,
}

#[derive(Default)]
struct GatewayState {
    services: BTreeMap<String, GatewayService>,
    routes: HashMap<String, GatewayRoute>,
    plugins: HashMap<String, GatewayPlugin>,
    calls: HashMap<GatewayOperation, usize>,
    faults: HashMap<GatewayOperation, VecDeque<Fault>>,
}

impl GatewayState {
    /// Counts the call and pops an injected fault, if any
    fn enter(&mut self, operation: GatewayOperation, resource: &str) -> Result<Reply> {
        *self.calls.entry(operation).or_insert(0) += 1;

        match self.faults.get_mut(&operation).and_then(VecDeque::pop_front) {
            None => Ok(Reply(None)),
            Some(Fault::LostResponse) => Ok(Reply(Some(Error::gateway_unavailable(
                operation,
                "response lost after commit (injected)",
            )))),
            Some(Fault::Unavailable) => Err(Error::gateway_unavailable(
                operation,
                "connection refused (injected)",
            )),
            Some(Fault::NotFound) => Err(Error::gateway_not_found(operation, resource)),
            Some(Fault::Rejected(status)) => {
                Err(Error::gateway_rejected(operation, status, "rejected (injected)"))
            }
        }
    }

    fn route(&self, operation: GatewayOperation, route_id: &str) -> Result<&GatewayRoute> {
        self.routes
            .get(route_id)
            .ok_or_else(|| Error::gateway_not_found(operation, format!("routes/{route_id}")))
    }

    fn check_service(&self, operation: GatewayOperation, service: &ResourceRef) -> Result<()> {
        if self.services.values().any(|s| s.id == service.id) {
            Ok(())
        } else {
            Err(Error::gateway_rejected(
                operation,
                400,
                format!("service {} does not exist", service.id),
            ))
        }
    }

    fn check_route_name(
        &self,
        operation: GatewayOperation,
        name: &str,
        except: Option<&str>,
    ) -> Result<()> {
        let taken = self
            .routes
            .values()
            .any(|r| r.name.as_deref() == Some(name) && Some(r.id.as_str()) != except);
        if taken {
            return Err(Error::gateway_rejected(
                operation,
                409,
                format!("UNIQUE violation detected on '{{name=\"{name}\"}}'"),
            ));
        }
        Ok(())
    }
}

fn route_from(id: String, definition: &RouteDefinition) -> GatewayRoute {
    GatewayRoute {
        id,
        name: Some(definition.name.clone()),
        paths: definition.paths.clone(),
        methods: definition
            .methods
            .iter()
            .map(|m| m.as_str().to_string())
            .collect(),
        tags: definition.tags.clone(),
        service: Some(definition.service.clone()),
    }
}

fn plugin_from(id: String, route_id: &str, definition: &PluginDefinition) -> GatewayPlugin {
    GatewayPlugin {
        id,
        name: definition.name.clone(),
        enabled: definition.enabled,
        route: Some(ResourceRef::new(route_id)),
        config: definition.config.clone(),
    }
}

impl MemoryGateway {
    /// Creates an empty gateway
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call of `operation` fail with `fault`
    ///
    /// Faults queue up per operation and are consumed in order.
    pub async fn fail_next(&self, operation: GatewayOperation, fault: Fault) {
        let mut state = self.inner.write().await;
        state.faults.entry(operation).or_default().push_back(fault);
    }

    /// Number of calls made for an operation, failed ones included
    pub async fn calls(&self, operation: GatewayOperation) -> usize {
        let state = self.inner.read().await;
        state.calls.get(&operation).copied().unwrap_or(0)
    }

    /// All services, ordered by name
    pub async fn services(&self) -> Vec<GatewayService> {
        let state = self.inner.read().await;
        state.services.values().cloned().collect()
    }

    /// Service by name
    pub async fn service(&self, name: &str) -> Option<GatewayService> {
        let state = self.inner.read().await;
        state.services.get(name).cloned()
    }

    /// All routes
    pub async fn routes(&self) -> Vec<GatewayRoute> {
        let state = self.inner.read().await;
        state.routes.values().cloned().collect()
    }

    /// Route by id
    pub async fn route(&self, route_id: &str) -> Option<GatewayRoute> {
        let state = self.inner.read().await;
        state.routes.get(route_id).cloned()
    }

    /// Plugins attached to a route
    pub async fn plugins(&self, route_id: &str) -> Vec<GatewayPlugin> {
        let state = self.inner.read().await;
        state
            .plugins
            .values()
            .filter(|p| p.route.as_ref().is_some_and(|r| r.id == route_id))
            .cloned()
            .collect()
    }

    /// Attaches a plugin directly, bypassing call accounting
    pub async fn seed_plugin(&self, route_id: &str, definition: &PluginDefinition) -> GatewayPlugin {
        let mut state = self.inner.write().await;
        let plugin = plugin_from(Uuid::new_v4().to_string(), route_id, definition);
        state.plugins.insert(plugin.id.clone(), plugin.clone());
        plugin
    }

    /// Removes a route directly, as an operator editing the gateway would
    pub async fn remove_route(&self, route_id: &str) {
        let mut state = self.inner.write().await;
        state.routes.remove(route_id);
        state
            .plugins
            .retain(|_, p| p.route.as_ref().is_none_or(|r| r.id != route_id));
    }
}

#[async_trait]
impl GatewayAdmin for MemoryGateway {
    async fn upsert_service(&self, definition: &ServiceDefinition) -> Result<GatewayService> {
        let op = GatewayOperation::UpsertService;
        let mut state = self.inner.write().await;
        let reply = state.enter(op, &format!("services/{}", definition.name))?;

        let id = state
            .services
            .get(&definition.name)
            .map_or_else(|| Uuid::new_v4().to_string(), |s| s.id.clone());

        let service = GatewayService {
            id,
            name: definition.name.clone(),
            protocol: definition.protocol.clone(),
            host: definition.host.clone(),
            port: definition.port,
            path: definition.path.clone(),
            retries: Some(definition.retries),
            tags: definition.tags.clone(),
            enabled: Some(definition.enabled),
        };
        state
            .services
            .insert(definition.name.clone(), service.clone());
        reply.send(service)
    }

    async fn list_services(&self, tags: &[String]) -> Result<Vec<GatewayService>> {
        let mut state = self.inner.write().await;
        let reply = state.enter(GatewayOperation::ListServices, "services")?;
        reply.send(
            state
                .services
                .values()
                .filter(|s| tags.iter().all(|t| s.tags.contains(t)))
                .cloned()
                .collect(),
        )
    }

    async fn create_route(&self, definition: &RouteDefinition) -> Result<GatewayRoute> {
        let op = GatewayOperation::CreateRoute;
        let mut state = self.inner.write().await;
        let reply = state.enter(op, "routes")?;
        state.check_service(op, &definition.service)?;
        state.check_route_name(op, &definition.name, None)?;

        let route = route_from(Uuid::new_v4().to_string(), definition);
        state.routes.insert(route.id.clone(), route.clone());
        reply.send(route)
    }

    async fn find_route(&self, name_or_id: &str) -> Result<Option<GatewayRoute>> {
        let mut state = self.inner.write().await;
        let reply = match state.enter(GatewayOperation::FindRoute, &format!("routes/{name_or_id}")) {
            Ok(reply) => reply,
            Err(Error::GatewayNotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        reply.send(
            state
                .routes
                .values()
                .find(|r| r.id == name_or_id || r.name.as_deref() == Some(name_or_id))
                .cloned(),
        )
    }

    async fn update_route(
        &self,
        route_id: &str,
        definition: &RouteDefinition,
    ) -> Result<GatewayRoute> {
        let op = GatewayOperation::UpdateRoute;
        let mut state = self.inner.write().await;
        let reply = state.enter(op, &format!("routes/{route_id}"))?;
        state.route(op, route_id)?;
        state.check_service(op, &definition.service)?;
        state.check_route_name(op, &definition.name, Some(route_id))?;

        let route = route_from(route_id.to_string(), definition);
        state.routes.insert(route.id.clone(), route.clone());
        reply.send(route)
    }

    /// Deleting a route that does not exist succeeds, as on Kong (204)
    async fn delete_route(&self, route_id: &str) -> Result<()> {
        let reply = {
            let mut state = self.inner.write().await;
            state.enter(GatewayOperation::DeleteRoute, &format!("routes/{route_id}"))?
        };
        self.remove_route(route_id).await;
        reply.send(())
    }

    async fn list_plugins(&self, route_id: &str) -> Result<Vec<GatewayPlugin>> {
        let op = GatewayOperation::ListPlugins;
        let reply = {
            let mut state = self.inner.write().await;
            let reply = state.enter(op, &format!("routes/{route_id}/plugins"))?;
            state.route(op, route_id)?;
            reply
        };
        reply.send(self.plugins(route_id).await)
    }

    async fn create_plugin(
        &self,
        route_id: &str,
        definition: &PluginDefinition,
    ) -> Result<GatewayPlugin> {
        let op = GatewayOperation::CreatePlugin;
        let mut state = self.inner.write().await;
        let reply = state.enter(op, &format!("routes/{route_id}/plugins"))?;
        state.route(op, route_id)?;

        let plugin = plugin_from(Uuid::new_v4().to_string(), route_id, definition);
        state.plugins.insert(plugin.id.clone(), plugin.clone());
        reply.send(plugin)
    }

    async fn update_plugin(
        &self,
        route_id: &str,
        plugin_id: &str,
        definition: &PluginDefinition,
    ) -> Result<GatewayPlugin> {
        let op = GatewayOperation::UpdatePlugin;
        let mut state = self.inner.write().await;
        let reply = state.enter(op, &format!("routes/{route_id}/plugins/{plugin_id}"))?;
        state.route(op, route_id)?;

        let plugin = plugin_from(plugin_id.to_string(), route_id, definition);
        state.plugins.insert(plugin.id.clone(), plugin.clone());
        reply.send(plugin)
    }

    async fn status(&self) -> Result<()> {
        let mut state = self.inner.write().await;
        state.enter(GatewayOperation::Status, "status")?.send(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HttpMethod;

    fn service_definition(name: &str, port: u16) -> ServiceDefinition {
        ServiceDefinition {
            name: name.to_string(),
            protocol: "http".to_string(),
            host: name.to_string(),
            port,
            path: None,
            retries: 1,
            tags: vec!["payments".to_string()],
            enabled: true,
        }
    }

    fn route_definition(name: &str, service_id: &str) -> RouteDefinition {
        RouteDefinition {
            name: name.to_string(),
            paths: vec!["/accounts/balance".to_string()],
            methods: vec![HttpMethod::Get],
            tags: vec!["payments".to_string()],
            service: ResourceRef::new(service_id),
            strip_path: false,
        }
    }

    #[tokio::test]
    async fn test_upsert_service_keeps_id() {
        let gateway = MemoryGateway::new();
        let first = gateway
            .upsert_service(&service_definition("core.bank.local", 80))
            .await
            .unwrap();
        let second = gateway
            .upsert_service(&service_definition("core.bank.local", 8080))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.port, 8080);
        assert_eq!(gateway.services().await.len(), 1);
        assert_eq!(gateway.calls(GatewayOperation::UpsertService).await, 2);
    }

    #[tokio::test]
    async fn test_route_names_are_unique() {
        let gateway = MemoryGateway::new();
        let service = gateway
            .upsert_service(&service_definition("core.bank.local", 80))
            .await
            .unwrap();

        gateway
            .create_route(&route_definition("balance", &service.id))
            .await
            .unwrap();
        let err = gateway
            .create_route(&route_definition("balance", &service.id))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::GatewayRejected { status: 409, .. }));
    }

    #[tokio::test]
    async fn test_create_route_requires_service() {
        let gateway = MemoryGateway::new();
        let err = gateway
            .create_route(&route_definition("balance", "missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::GatewayRejected { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_find_route_by_name_or_id() {
        let gateway = MemoryGateway::new();
        let service = gateway
            .upsert_service(&service_definition("core.bank.local", 80))
            .await
            .unwrap();
        let route = gateway
            .create_route(&route_definition("balance", &service.id))
            .await
            .unwrap();

        assert_eq!(gateway.find_route("balance").await.unwrap(), Some(route.clone()));
        assert_eq!(gateway.find_route(&route.id).await.unwrap(), Some(route));
        assert_eq!(gateway.find_route("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_route_drops_plugins() {
        let gateway = MemoryGateway::new();
        let service = gateway
            .upsert_service(&service_definition("core.bank.local", 80))
            .await
            .unwrap();
        let route = gateway
            .create_route(&route_definition("balance", &service.id))
            .await
            .unwrap();
        gateway
            .create_plugin(
                &route.id,
                &PluginDefinition::request_termination(true, 503, "disabled"),
            )
            .await
            .unwrap();
        assert_eq!(gateway.plugins(&route.id).await.len(), 1);

        gateway.delete_route(&route.id).await.unwrap();
        assert!(gateway.route(&route.id).await.is_none());
        assert!(gateway.plugins(&route.id).await.is_empty());

        gateway.delete_route(&route.id).await.unwrap();
        assert_eq!(gateway.calls(GatewayOperation::DeleteRoute).await, 2);
    }

    #[tokio::test]
    async fn test_lost_response_still_commits() {
        let gateway = MemoryGateway::new();
        let service = gateway
            .upsert_service(&service_definition("core.bank.local", 80))
            .await
            .unwrap();
        let route = gateway
            .create_route(&route_definition("balance", &service.id))
            .await
            .unwrap();
        gateway
            .fail_next(GatewayOperation::CreatePlugin, Fault::LostResponse)
            .await;

        let err = gateway
            .create_plugin(
                &route.id,
                &PluginDefinition::request_termination(true, 503, "disabled"),
            )
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(gateway.plugins(&route.id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_injected_faults_are_consumed_in_order() {
        let gateway = MemoryGateway::new();
        gateway
            .fail_next(GatewayOperation::Status, Fault::Unavailable)
            .await;
        gateway
            .fail_next(GatewayOperation::Status, Fault::Rejected(401))
            .await;

        assert!(gateway.status().await.unwrap_err().is_retryable());
        assert!(matches!(
            gateway.status().await.unwrap_err(),
            Error::GatewayRejected { status: 401, .. }
        ));
        assert!(gateway.status().await.is_ok());
        assert_eq!(gateway.calls(GatewayOperation::Status).await, 3);
    }
}
