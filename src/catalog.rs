//! Collection management.
//!
//! Collections group routes and lend their slug to every gateway resource the
//! routes produce, so a slug never changes once assigned.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::locks::{collection_key, KeyedLocks};
use crate::route::{slugify, CollectionRequest};
use crate::store::{CollectionStore, RouteStore};
use crate::types::{Collection, CollectionView};

/// Collection operations
#[derive(Clone)]
pub struct Catalog {
    collections: Arc<dyn CollectionStore>,
    routes: Arc<dyn RouteStore>,
    locks: KeyedLocks,
}

impl Catalog {
    /// Creates a catalog over the given stores
    ///
    /// `locks` must be shared with the reconciler so that publishing into a
    /// collection and deleting it serialize.
    pub fn new(
        collections: Arc<dyn CollectionStore>,
        routes: Arc<dyn RouteStore>,
        locks: KeyedLocks,
    ) -> Self {
        Self {
            collections,
            routes,
            locks,
        }
    }

    /// Creates a collection, deriving its slug from the name
    #[tracing::instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_collection(&self, request: &CollectionRequest) -> Result<Collection> {
        request.validate()?;
        let slug = slugify(&request.name);

        if self.collections.find_collection_by_slug(&slug).await?.is_some() {
            return Err(Error::DuplicateCollection(slug));
        }

        let now = Utc::now();
        let collection = Collection {
            id: Uuid::new_v4(),
            name: request.name.trim().to_string(),
            slug,
            description: request.description.clone(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.collections.insert_collection(&collection).await?;

        info!(collection_id = %collection.id, slug = %collection.slug, "collection created");
        Ok(collection)
    }

    /// Gets an active collection with its route count
    pub async fn get_collection(&self, id: Uuid) -> Result<CollectionView> {
        let collection = self.active_collection(id).await?;
        let active_routes = self.routes.count_active_routes(id).await?;
        Ok(CollectionView {
            collection,
            active_routes,
        })
    }

    /// Lists active collections with their route counts
    pub async fn list_collections(&self) -> Result<Vec<CollectionView>> {
        let collections = self.collections.list_collections().await?;
        let mut views = Vec::with_capacity(collections.len());
        for collection in collections {
            let active_routes = self.routes.count_active_routes(collection.id).await?;
            views.push(CollectionView {
                collection,
                active_routes,
            });
        }
        Ok(views)
    }

    /// Renames a collection or changes its description
    ///
    /// The slug stays as created; it already tags resources in the gateway.
    #[tracing::instrument(skip(self, request), fields(collection_id = %id))]
    pub async fn update_collection(
        &self,
        id: Uuid,
        request: &CollectionRequest,
    ) -> Result<Collection> {
        request.validate()?;
        let _guard = self.locks.acquire([collection_key(id)]).await;

        let mut collection = self.active_collection(id).await?;
        collection.name = request.name.trim().to_string();
        collection.description = request.description.clone();
        collection.updated_at = Utc::now();
        self.collections.update_collection(&collection).await?;

        debug!(slug = %collection.slug, "collection updated");
        Ok(collection)
    }

    /// Soft-deletes a collection that has no active routes
    #[tracing::instrument(skip(self), fields(collection_id = %id))]
    pub async fn delete_collection(&self, id: Uuid) -> Result<()> {
        let _guard = self.locks.acquire([collection_key(id)]).await;

        let collection = self.active_collection(id).await?;
        let active_routes = self.routes.count_active_routes(id).await?;
        if active_routes > 0 {
            return Err(Error::CollectionNotEmpty {
                slug: collection.slug,
                active_routes,
            });
        }

        self.collections.soft_delete_collection(id, Utc::now()).await?;
        info!(slug = %collection.slug, "collection deleted");
        Ok(())
    }

    /// Loads a collection, treating soft-deleted ones as absent
    pub(crate) async fn active_collection(&self, id: Uuid) -> Result<Collection> {
        let collection = self.collections.get_collection(id).await?;
        if collection.is_deleted() {
            return Err(Error::CollectionNotFound(id));
        }
        Ok(collection)
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{new_route, new_route_request};
    use crate::store::memory::MemoryStore;
    use crate::types::{Environment, HttpMethod};

    fn catalog() -> (Catalog, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let catalog = Catalog::new(store.clone(), store.clone(), KeyedLocks::new());
        (catalog, store)
    }

    #[tokio::test]
    async fn test_create_derives_slug() {
        let (catalog, _) = catalog();
        let collection = catalog
            .create_collection(&CollectionRequest::new("Core Banking").with_description("ledger"))
            .await
            .unwrap();
        assert_eq!(collection.slug, "core-banking");
        assert_eq!(collection.description.as_deref(), Some("ledger"));

        let err = catalog
            .create_collection(&CollectionRequest::new("core banking"))
            .await;
        assert!(matches!(err, Err(Error::DuplicateCollection(_))));
    }

    #[tokio::test]
    async fn test_create_rejects_blank_name() {
        let (catalog, _) = catalog();
        let err = catalog.create_collection(&CollectionRequest::new("   ")).await;
        assert!(matches!(err, Err(Error::Validation { .. })));
    }

    #[tokio::test]
    async fn test_update_keeps_slug() {
        let (catalog, _) = catalog();
        let collection = catalog
            .create_collection(&CollectionRequest::new("Payments"))
            .await
            .unwrap();

        let updated = catalog
            .update_collection(collection.id, &CollectionRequest::new("Card Payments"))
            .await
            .unwrap();
        assert_eq!(updated.name, "Card Payments");
        assert_eq!(updated.slug, "payments");
    }

    #[tokio::test]
    async fn test_delete_requires_empty_collection() {
        let (catalog, store) = catalog();
        let collection = catalog
            .create_collection(&CollectionRequest::new("Payments"))
            .await
            .unwrap();

        let route = new_route(
            &new_route_request(
                "charge",
                "http://payments.local/charge",
                HttpMethod::Post,
                Environment::development(),
            ),
            collection.id,
        );
        store.insert_route(&route).await.unwrap();

        let err = catalog.delete_collection(collection.id).await;
        assert!(matches!(
            err,
            Err(Error::CollectionNotEmpty {
                active_routes: 1,
                ..
            })
        ));
        assert_eq!(catalog.get_collection(collection.id).await.unwrap().active_routes, 1);

        store.soft_delete_route(route.id, Utc::now()).await.unwrap();
        catalog.delete_collection(collection.id).await.unwrap();
        assert!(matches!(
            catalog.get_collection(collection.id).await,
            Err(Error::CollectionNotFound(_))
        ));
        assert!(catalog.list_collections().await.unwrap().is_empty());
    }
}
