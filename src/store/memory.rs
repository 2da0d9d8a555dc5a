//! In-memory store implementation for testing and development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::store::{CollectionStore, RouteStore};
use crate::types::{Collection, Environment, Route, RouteFilter};

/// In-memory collection and route store
///
/// Thread-safe, useful for testing and development.
/// Not recommended for production use.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    collections: RwLock<HashMap<Uuid, Collection>>,
    routes: RwLock<HashMap<Uuid, Route>>,
}

impl MemoryStore {
    /// Creates a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CollectionStore for MemoryStore {
    async fn insert_collection(&self, collection: &Collection) -> Result<()> {
        let mut collections = self.inner.collections.write().await;
        let clash = collections
            .values()
            .any(|c| !c.is_deleted() && c.slug == collection.slug);
        if clash {
            return Err(Error::DuplicateCollection(collection.slug.clone()));
        }
        collections.insert(collection.id, collection.clone());
        Ok(())
    }

    async fn get_collection(&self, id: Uuid) -> Result<Collection> {
        let collections = self.inner.collections.read().await;
        collections
            .get(&id)
            .cloned()
            .ok_or(Error::CollectionNotFound(id))
    }

    async fn find_collection_by_slug(&self, slug: &str) -> Result<Option<Collection>> {
        let collections = self.inner.collections.read().await;
        Ok(collections
            .values()
            .find(|c| !c.is_deleted() && c.slug == slug)
            .cloned())
    }

    async fn list_collections(&self) -> Result<Vec<Collection>> {
        let collections = self.inner.collections.read().await;
        let mut results: Vec<Collection> = collections
            .values()
            .filter(|c| !c.is_deleted())
            .cloned()
            .collect();
        results.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.slug.cmp(&b.slug)));
        Ok(results)
    }

    async fn update_collection(&self, collection: &Collection) -> Result<()> {
        let mut collections = self.inner.collections.write().await;
        if !collections.contains_key(&collection.id) {
            return Err(Error::CollectionNotFound(collection.id));
        }
        collections.insert(collection.id, collection.clone());
        Ok(())
    }

    async fn soft_delete_collection(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut collections = self.inner.collections.write().await;
        let collection = collections
            .get_mut(&id)
            .ok_or(Error::CollectionNotFound(id))?;
        collection.deleted_at = Some(at);
        collection.updated_at = at;
        Ok(())
    }
}

#[async_trait]
impl RouteStore for MemoryStore {
    async fn insert_route(&self, route: &Route) -> Result<()> {
        let mut routes = self.inner.routes.write().await;
        routes.insert(route.id, route.clone());
        Ok(())
    }

    async fn get_route(&self, id: Uuid) -> Result<Route> {
        let routes = self.inner.routes.read().await;
        routes.get(&id).cloned().ok_or(Error::RouteNotFound(id))
    }

    async fn find_route_by_slug(
        &self,
        environment: &Environment,
        slug: &str,
        exclude: Option<Uuid>,
    ) -> Result<Option<Route>> {
        let routes = self.inner.routes.read().await;
        Ok(routes
            .values()
            .find(|r| {
                !r.is_deleted()
                    && &r.environment == environment
                    && r.slug == slug
                    && Some(r.id) != exclude
            })
            .cloned())
    }

    async fn list_routes(&self, filter: &RouteFilter) -> Result<Vec<Route>> {
        let routes = self.inner.routes.read().await;
        let mut results: Vec<Route> = routes.values().filter(|r| filter.matches(r)).cloned().collect();
        results.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(results)
    }

    async fn count_active_routes(&self, collection_id: Uuid) -> Result<usize> {
        let routes = self.inner.routes.read().await;
        Ok(routes
            .values()
            .filter(|r| !r.is_deleted() && r.collection_id == collection_id)
            .count())
    }

    async fn update_route(&self, route: &Route) -> Result<()> {
        let mut routes = self.inner.routes.write().await;
        if !routes.contains_key(&route.id) {
            return Err(Error::RouteNotFound(route.id));
        }
        routes.insert(route.id, route.clone());
        Ok(())
    }

    async fn soft_delete_route(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut routes = self.inner.routes.write().await;
        let route = routes.get_mut(&id).ok_or(Error::RouteNotFound(id))?;
        route.deleted_at = Some(at);
        route.updated_at = at;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{new_route, new_route_request};
    use crate::types::HttpMethod;

    fn collection(slug: &str) -> Collection {
        let now = Utc::now();
        Collection {
            id: Uuid::new_v4(),
            name: slug.to_string(),
            slug: slug.to_string(),
            description: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn route(name: &str, environment: Environment, collection_id: Uuid) -> Route {
        let request = new_route_request(
            name,
            "http://core.bank.local/accounts",
            HttpMethod::Get,
            environment,
        );
        new_route(&request, collection_id)
    }

    #[tokio::test]
    async fn test_collection_slug_unique_among_active() {
        let store = MemoryStore::new();
        let first = collection("payments");
        store.insert_collection(&first).await.unwrap();

        let err = store.insert_collection(&collection("payments")).await;
        assert!(matches!(err, Err(Error::DuplicateCollection(_))));

        store
            .soft_delete_collection(first.id, Utc::now())
            .await
            .unwrap();
        store.insert_collection(&collection("payments")).await.unwrap();

        assert_eq!(store.list_collections().await.unwrap().len(), 1);
        assert!(store.get_collection(first.id).await.unwrap().is_deleted());
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        assert!(matches!(
            store.get_collection(id).await,
            Err(Error::CollectionNotFound(_))
        ));
        assert!(matches!(
            store.get_route(id).await,
            Err(Error::RouteNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_find_route_by_slug_scopes() {
        let store = MemoryStore::new();
        let collection_id = Uuid::new_v4();
        let dev = route("balance", Environment::development(), collection_id);
        store.insert_route(&dev).await.unwrap();

        let env = Environment::development();
        assert!(store
            .find_route_by_slug(&env, "balance", None)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_route_by_slug(&env, "balance", Some(dev.id))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_route_by_slug(&Environment::production(), "balance", None)
            .await
            .unwrap()
            .is_none());

        store.soft_delete_route(dev.id, Utc::now()).await.unwrap();
        assert!(store
            .find_route_by_slug(&env, "balance", None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_count_and_list_active_routes() {
        let store = MemoryStore::new();
        let collection_id = Uuid::new_v4();
        let a = route("a", Environment::development(), collection_id);
        let b = route("b", Environment::production(), collection_id);
        let other = route("c", Environment::development(), Uuid::new_v4());
        for r in [&a, &b, &other] {
            store.insert_route(r).await.unwrap();
        }

        assert_eq!(store.count_active_routes(collection_id).await.unwrap(), 2);

        let filter = RouteFilter {
            collection_id: Some(collection_id),
            environment: Some(Environment::production()),
        };
        let listed = store.list_routes(&filter).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, b.id);

        store.soft_delete_route(a.id, Utc::now()).await.unwrap();
        assert_eq!(store.count_active_routes(collection_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_requires_existing() {
        let store = MemoryStore::new();
        let r = route("a", Environment::development(), Uuid::new_v4());
        assert!(store.update_route(&r).await.is_err());
        store.insert_route(&r).await.unwrap();

        let mut updated = r.clone();
        updated.gateway_route_id = Some("r-1".to_string());
        store.update_route(&updated).await.unwrap();
        assert_eq!(
            store.get_route(r.id).await.unwrap().gateway_route_id.as_deref(),
            Some("r-1")
        );
    }
}
