//! routesync - keeps API collection routes in sync with a gateway's admin API
//!
//! A route is a locally persisted desired-state record (name, method, upstream
//! URL, environment, enabled flag). Publishing it drives three resources in the
//! environment's gateway towards that state: a service keyed by the upstream
//! hostname, a route bound to that service, and a request-termination plugin
//! that implements the enabled flag.
//!
//! # Overview
//!
//! routesync provides:
//! - A typed admin API client per environment ([`gateway::HttpGatewayClient`])
//! - Collection and route stores behind async traits ([`store`])
//! - The reconciler: publish, update, delete with replay-safe remote steps
//! - Collection management with the "only empty collections can go" rule
//! - Key-scoped locking so same-name and same-host reconciliations serialize
//!
//! # Basic Usage
//!
//! ```
//! use std::sync::Arc;
//! use routesync::prelude::*;
//! use routesync::gateway::MemoryGateway;
//! use routesync::store::memory::MemoryStore;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> routesync::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let gateways = Gateways::new().with(Environment::development(), Arc::new(MemoryGateway::new()));
//! let reconciler = Reconciler::new(store.clone(), store, gateways, ReconcilerConfig::default());
//!
//! let collection = reconciler
//!     .catalog()
//!     .create_collection(&CollectionRequest::new("Core Banking"))
//!     .await?;
//! let view = reconciler
//!     .publish_route(
//!         collection.id,
//!         &new_route_request(
//!             "balance",
//!             "http://core.bank.local/accounts/balance",
//!             HttpMethod::Get,
//!             Environment::development(),
//!         ),
//!     )
//!     .await?;
//! assert_eq!(view.url, "http://core.bank.local:80/accounts/balance");
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod locks;
pub mod reconciler;
pub mod retry;
pub mod route;
pub mod telemetry;
pub mod types;

// Store module
pub mod store {
    use crate::errors::Result;
    use crate::types::{Collection, Environment, Route, RouteFilter};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    /// Persistence for collections
    ///
    /// Reads by id return soft-deleted rows too; slug lookups and listings
    /// only consider active ones.
    #[async_trait]
    pub trait CollectionStore: Send + Sync {
        /// Inserts a collection; fails on an active slug clash
        async fn insert_collection(&self, collection: &Collection) -> Result<()>;

        /// Returns the collection or `Error::CollectionNotFound`
        async fn get_collection(&self, id: Uuid) -> Result<Collection>;

        async fn find_collection_by_slug(&self, slug: &str) -> Result<Option<Collection>>;

        async fn list_collections(&self) -> Result<Vec<Collection>>;

        /// Replaces a stored collection
        async fn update_collection(&self, collection: &Collection) -> Result<()>;

        async fn soft_delete_collection(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
    }

    /// Persistence for route records
    #[async_trait]
    pub trait RouteStore: Send + Sync {
        async fn insert_route(&self, route: &Route) -> Result<()>;

        /// Returns the route or `Error::RouteNotFound`
        async fn get_route(&self, id: Uuid) -> Result<Route>;

        /// Finds an active route of the environment with the slug, skipping `exclude`
        async fn find_route_by_slug(
            &self,
            environment: &Environment,
            slug: &str,
            exclude: Option<Uuid>,
        ) -> Result<Option<Route>>;

        /// Active routes matching the filter, oldest first
        async fn list_routes(&self, filter: &RouteFilter) -> Result<Vec<Route>>;

        async fn count_active_routes(&self, collection_id: Uuid) -> Result<usize>;

        /// Replaces a stored route
        async fn update_route(&self, route: &Route) -> Result<()>;

        async fn soft_delete_route(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
    }

    pub mod memory;
}

// Re-exports for convenience
pub use errors::{Error, ErrorKind, Result};
pub use reconciler::Reconciler;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::catalog::Catalog;
    pub use crate::config::{Config, GatewayConfig, ReconcilerConfig};
    pub use crate::errors::{Error, ErrorKind, Result};
    pub use crate::gateway::{GatewayAdmin, Gateways};
    pub use crate::reconciler::Reconciler;
    pub use crate::route::*;
    pub use crate::store::{CollectionStore, RouteStore};
    pub use crate::types::*;
}
