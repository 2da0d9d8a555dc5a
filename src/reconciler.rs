//! Route reconciliation against the environment gateways.
//!
//! Every remote step is safe to replay:
//! - the service is upserted by hostname
//! - the gateway route is named by the route slug and resolved find-then-write
//! - the termination plugin is looked up before it is created or toggled
//!
//! A reconciliation interrupted halfway is repaired by running it again. Remote
//! steps that already ran are left in place; nothing is compensated.

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::config::ReconcilerConfig;
use crate::errors::{Error, Result};
use crate::gateway::{
    GatewayAdmin, GatewayOperation, GatewayRoute, GatewayService, Gateways, PluginDefinition,
    ResourceRef, RouteDefinition, ServiceDefinition,
};
use crate::locks::{collection_key, host_key, route_key, KeyedGuard, KeyedLocks};
use crate::retry::{retry, RetryPolicy};
use crate::route::{diff_routes, new_route, RoutePatch, RouteRequest, Upstream};
use crate::store::{CollectionStore, RouteStore};
use crate::types::{Collection, Route, RouteFilter, RouteView};

/// Drives gateway state towards the stored route records
pub struct Reconciler {
    routes: Arc<dyn RouteStore>,
    gateways: Gateways,
    locks: KeyedLocks,
    config: ReconcilerConfig,
    policy: RetryPolicy,
    catalog: Catalog,
}

/// A route held under its reconciliation locks
struct LockedRoute {
    _guard: KeyedGuard,
    current: Route,
    desired: Route,
    upstream: Upstream,
}

impl Reconciler {
    /// Creates a reconciler
    pub fn new(
        collections: Arc<dyn CollectionStore>,
        routes: Arc<dyn RouteStore>,
        gateways: Gateways,
        config: ReconcilerConfig,
    ) -> Self {
        let locks = KeyedLocks::new();
        let catalog = Catalog::new(collections, routes.clone(), locks.clone());
        Self {
            routes,
            gateways,
            locks,
            policy: config.retry_policy(),
            config,
            catalog,
        }
    }

    /// Collection operations sharing this reconciler's stores and locks
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Environment gateways
    pub fn gateways(&self) -> &Gateways {
        &self.gateways
    }

    /// Publishes a new route into a collection
    ///
    /// Validation, the collection lookup and the name check all happen before
    /// the first remote call. If a remote step fails nothing is stored
    /// locally; calling again converges on the same service and gateway route.
    /// A failure while reconciling the plugin leaves the route stored and
    /// published, with the plugin repaired by the next update.
    #[tracing::instrument(
        skip(self, request),
        fields(name = %request.name, environment = %request.environment)
    )]
    pub async fn publish_route(
        &self,
        collection_id: Uuid,
        request: &RouteRequest,
    ) -> Result<RouteView> {
        let upstream = request.validate()?;
        let gateway = self.gateways.get(&request.environment)?;
        let slug = request.slug();

        let _guard = self
            .locks
            .acquire([
                route_key(&request.environment, &slug),
                host_key(&request.environment, &upstream.host),
                collection_key(collection_id),
            ])
            .await;

        let collection = self.catalog.active_collection(collection_id).await?;
        if self
            .routes
            .find_route_by_slug(&request.environment, &slug, None)
            .await?
            .is_some()
        {
            return Err(Error::duplicate_route_name(
                request.environment.as_str(),
                &request.name,
            ));
        }

        let mut route = new_route(request, collection.id);
        let service = self
            .sync_service(gateway.as_ref(), &upstream, &collection)
            .await?;
        let gateway_route = self
            .sync_gateway_route(gateway.as_ref(), None, &route, &upstream, &collection, &service)
            .await?;

        route.gateway_service_id = Some(service.id.clone());
        route.gateway_route_id = Some(gateway_route.id.clone());
        if let Err(e) = self.routes.insert_route(&route).await {
            warn!(
                route_id = %route.id,
                gateway_route_id = %gateway_route.id,
                "gateway route is live but the local record was not stored: {e}"
            );
            return Err(e);
        }

        self.plugin_step(gateway.as_ref(), &route, &gateway_route.id)
            .await?;

        info!(
            route_id = %route.id,
            service = %service.name,
            gateway_route_id = %gateway_route.id,
            "route published"
        );
        Ok(RouteView::new(
            &route,
            service.connection_url(&upstream.path),
        ))
    }

    /// Applies a patch to a route and reconciles the gateway
    ///
    /// The service and gateway route are written on every update, even when
    /// the patch changes nothing, so edits made on the gateway out of band are
    /// overwritten. A published route keeps its gateway ids; a 404 for them
    /// surfaces as [`Error::GatewayNotFound`] and nothing is recreated. An
    /// unpublished route is published by name.
    #[tracing::instrument(skip(self, patch), fields(route_id = %id))]
    pub async fn update_route(&self, id: Uuid, patch: &RoutePatch) -> Result<RouteView> {
        let LockedRoute {
            _guard,
            current,
            mut desired,
            upstream,
        } = self.lock_route(id, patch).await?;
        let gateway = self.gateways.get(&desired.environment)?;

        if desired.slug != current.slug
            && self
                .routes
                .find_route_by_slug(&desired.environment, &desired.slug, Some(id))
                .await?
                .is_some()
        {
            return Err(Error::duplicate_route_name(
                desired.environment.as_str(),
                &desired.name,
            ));
        }

        let changes = diff_routes(&current, &desired);
        if changes.has_changes() {
            debug!(?changes, published = current.is_published(), "reconciling route");
        } else {
            debug!(published = current.is_published(), "no field changes, re-applying gateway state");
        }

        let collection = self.catalog.active_collection(desired.collection_id).await?;
        let service = self
            .sync_service(gateway.as_ref(), &upstream, &collection)
            .await?;
        if changes.host_changed {
            info!(
                service = %service.name,
                previous_service_id = ?current.gateway_service_id,
                "route moved to another service, the previous one is left in place"
            );
        }
        let gateway_route = self
            .sync_gateway_route(
                gateway.as_ref(),
                current.gateway_route_id.as_deref(),
                &desired,
                &upstream,
                &collection,
                &service,
            )
            .await?;
        desired.gateway_service_id = Some(service.id.clone());
        desired.gateway_route_id = Some(gateway_route.id.clone());
        let gateway_route_id = gateway_route.id;

        desired.updated_at = Utc::now();
        if let Err(e) = self.routes.update_route(&desired).await {
            warn!(
                gateway_route_id = %gateway_route_id,
                "gateway is updated but the local record was not stored: {e}"
            );
            return Err(e);
        }

        self.plugin_step(gateway.as_ref(), &desired, &gateway_route_id)
            .await?;

        info!(slug = %desired.slug, enabled = desired.enabled, "route updated");
        Ok(RouteView::new(
            &desired,
            service.connection_url(&upstream.path),
        ))
    }

    /// Deletes a route from its gateway, then soft-deletes the record
    ///
    /// The service stays, other routes may share it. The gateway drops the
    /// route's plugins along with it. Unpublished routes are only removed
    /// locally.
    #[tracing::instrument(skip(self), fields(route_id = %id))]
    pub async fn delete_route(&self, id: Uuid) -> Result<()> {
        let LockedRoute {
            _guard,
            current: route,
            ..
        } = self.lock_route(id, &RoutePatch::default()).await?;

        match route.gateway_route_id.as_deref() {
            Some(gateway_route_id) => {
                let gateway = self.gateways.get(&route.environment)?;
                retry(self.policy, GatewayOperation::DeleteRoute, || {
                    gateway.delete_route(gateway_route_id)
                })
                .await?;
                debug!(%gateway_route_id, "gateway route deleted");
            }
            None => debug!("route was never published, skipping gateway"),
        }

        self.routes.soft_delete_route(id, Utc::now()).await?;
        info!(slug = %route.slug, environment = %route.environment, "route deleted");
        Ok(())
    }

    /// Soft-deletes a route record without touching the gateway
    ///
    /// Meant for records whose gateway resources were removed out of band.
    #[tracing::instrument(skip(self), fields(route_id = %id))]
    pub async fn forget_route(&self, id: Uuid) -> Result<()> {
        let LockedRoute {
            _guard,
            current: route,
            ..
        } = self.lock_route(id, &RoutePatch::default()).await?;

        self.routes.soft_delete_route(id, Utc::now()).await?;
        warn!(
            slug = %route.slug,
            gateway_route_id = ?route.gateway_route_id,
            "route forgotten, gateway resources left untouched"
        );
        Ok(())
    }

    /// Gets an active route
    pub async fn get_route(&self, id: Uuid) -> Result<RouteView> {
        let route = self.active_route(id).await?;
        Ok(view(&route))
    }

    /// Lists active routes
    pub async fn list_routes(&self, filter: &RouteFilter) -> Result<Vec<RouteView>> {
        let routes = self.routes.list_routes(filter).await?;
        Ok(routes.iter().map(view).collect())
    }

    async fn active_route(&self, id: Uuid) -> Result<Route> {
        let route = self.routes.get_route(id).await?;
        if route.is_deleted() {
            return Err(Error::RouteNotFound(id));
        }
        Ok(route)
    }

    /// Locks every key the patched route touches
    ///
    /// Keys depend on the stored record, which may change while waiting. The
    /// record is read again once the locks are held and the attempt repeats
    /// if its keys moved.
    async fn lock_route(&self, id: Uuid, patch: &RoutePatch) -> Result<LockedRoute> {
        loop {
            let (keys, _, _) = self.route_keys(id, patch).await?;
            let guard = self.locks.acquire(keys.iter().cloned()).await;

            let (fresh_keys, current, upstream) = self.route_keys(id, patch).await?;
            if fresh_keys == keys {
                let desired = patch.apply(&current);
                return Ok(LockedRoute {
                    _guard: guard,
                    current,
                    desired,
                    upstream,
                });
            }
            debug!("route changed while waiting for its locks, retrying");
        }
    }

    async fn route_keys(
        &self,
        id: Uuid,
        patch: &RoutePatch,
    ) -> Result<(BTreeSet<String>, Route, Upstream)> {
        let current = self.active_route(id).await?;
        let desired = patch.apply(&current);
        let upstream = desired_request(&desired).validate()?;

        let env = &current.environment;
        let mut keys = BTreeSet::from([
            route_key(env, &current.slug),
            route_key(env, &desired.slug),
            host_key(env, &upstream.host),
            collection_key(current.collection_id),
        ]);
        if let Ok(old) = Upstream::parse(&current.upstream_url) {
            keys.insert(host_key(env, &old.host));
        }
        Ok((keys, current, upstream))
    }

    async fn sync_service(
        &self,
        gateway: &dyn GatewayAdmin,
        upstream: &Upstream,
        collection: &Collection,
    ) -> Result<GatewayService> {
        let definition = ServiceDefinition {
            name: upstream.host.clone(),
            protocol: upstream.protocol.clone(),
            host: upstream.host.clone(),
            port: upstream.port,
            path: None,
            retries: self.config.service_retries,
            tags: vec![collection.slug.clone()],
            enabled: true,
        };
        let service = retry(self.policy, GatewayOperation::UpsertService, || {
            gateway.upsert_service(&definition)
        })
        .await?;
        debug!(service = %service.name, service_id = %service.id, "service upserted");
        Ok(service)
    }

    /// Writes the gateway route carrying `route`'s desired state
    ///
    /// Patches `existing` when the id is known. Otherwise the route is looked
    /// up by its slug, so a gateway route left behind by an interrupted
    /// publish is adopted instead of duplicated.
    async fn sync_gateway_route(
        &self,
        gateway: &dyn GatewayAdmin,
        existing: Option<&str>,
        route: &Route,
        upstream: &Upstream,
        collection: &Collection,
        service: &GatewayService,
    ) -> Result<GatewayRoute> {
        let definition = RouteDefinition {
            name: route.slug.clone(),
            paths: vec![upstream.path.clone()],
            methods: vec![route.method],
            tags: vec![collection.slug.clone(), route.environment.to_string()],
            service: ResourceRef::new(&service.id),
            strip_path: false,
        };

        let gateway_route = match existing {
            Some(id) => {
                let updated = retry(self.policy, GatewayOperation::UpdateRoute, || {
                    gateway.update_route(id, &definition)
                })
                .await?;
                debug!(gateway_route_id = %updated.id, "gateway route updated");
                updated
            }
            None => {
                retry(self.policy, GatewayOperation::CreateRoute, || {
                    self.write_gateway_route(gateway, &definition)
                })
                .await?
            }
        };
        Ok(gateway_route)
    }

    /// Looks the route up by name, then patches or creates it
    ///
    /// Retried as a whole, so a create that reached the gateway before its
    /// response was lost is found and patched on the next attempt.
    async fn write_gateway_route(
        &self,
        gateway: &dyn GatewayAdmin,
        definition: &RouteDefinition,
    ) -> Result<GatewayRoute> {
        match gateway.find_route(&definition.name).await? {
            Some(found) => {
                let updated = gateway.update_route(&found.id, definition).await?;
                debug!(gateway_route_id = %updated.id, "adopted existing gateway route");
                Ok(updated)
            }
            None => {
                let created = gateway.create_route(definition).await?;
                debug!(gateway_route_id = %created.id, "gateway route created");
                Ok(created)
            }
        }
    }

    /// Brings the termination plugin in line with the route's enabled flag
    ///
    /// A failure here leaves the record stored with the plugin out of sync;
    /// the next update repairs it.
    async fn plugin_step(
        &self,
        gateway: &dyn GatewayAdmin,
        route: &Route,
        gateway_route_id: &str,
    ) -> Result<()> {
        if let Err(e) = self
            .reconcile_plugin(gateway, gateway_route_id, route.enabled)
            .await
        {
            warn!(
                route_id = %route.id,
                enabled = route.enabled,
                "termination plugin out of sync until the next update: {e}"
            );
            return Err(e);
        }
        Ok(())
    }

    /// Makes at most one termination plugin enabled, and only when the route
    /// is disabled
    ///
    /// An existing plugin is toggled in place and never deleted. If several
    /// exist, the first one follows the flag and the others are disabled.
    /// Retries replay the whole listing, so a create whose response was lost
    /// is seen and not repeated.
    async fn reconcile_plugin(
        &self,
        gateway: &dyn GatewayAdmin,
        route_id: &str,
        enabled: bool,
    ) -> Result<()> {
        retry(self.policy, GatewayOperation::ListPlugins, || {
            self.converge_plugin(gateway, route_id, enabled)
        })
        .await
    }

    async fn converge_plugin(
        &self,
        gateway: &dyn GatewayAdmin,
        route_id: &str,
        enabled: bool,
    ) -> Result<()> {
        let blocking = !enabled;
        let definition = |enabled| {
            PluginDefinition::request_termination(
                enabled,
                self.config.termination_status,
                &self.config.termination_message,
            )
        };

        let plugins = gateway.list_plugins(route_id).await?;
        let mut terminations = plugins
            .into_iter()
            .filter(|p| p.is_termination_for(route_id));

        match terminations.next() {
            Some(plugin) if plugin.enabled == blocking => {
                debug!(plugin_id = %plugin.id, blocking, "termination plugin already in place");
            }
            Some(plugin) => {
                gateway
                    .update_plugin(route_id, &plugin.id, &definition(blocking))
                    .await?;
                debug!(plugin_id = %plugin.id, blocking, "termination plugin toggled");
            }
            None if blocking => {
                let plugin = gateway.create_plugin(route_id, &definition(true)).await?;
                debug!(plugin_id = %plugin.id, "termination plugin created");
            }
            None => debug!("no termination plugin, route already open"),
        }

        for duplicate in terminations.filter(|p| p.enabled) {
            gateway
                .update_plugin(route_id, &duplicate.id, &definition(false))
                .await?;
            warn!(plugin_id = %duplicate.id, "disabled duplicate termination plugin");
        }

        Ok(())
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("gateways", &self.gateways)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Composes the view of a stored route
fn view(route: &Route) -> RouteView {
    let url = Upstream::parse(&route.upstream_url)
        .map(|u| u.url())
        .unwrap_or_else(|_| route.upstream_url.clone());
    RouteView::new(route, url)
}

/// Request carrying a record's desired state, for validation
fn desired_request(route: &Route) -> RouteRequest {
    RouteRequest {
        name: route.name.clone(),
        upstream_url: route.upstream_url.clone(),
        method: route.method,
        environment: route.environment.clone(),
        enabled: route.enabled,
    }
}
