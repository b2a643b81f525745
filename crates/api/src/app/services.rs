//! Store and service wiring behind the router.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use gatehouse_auth::{AuthConfig, AuthError, RouteTable, UnmappedRoutePolicy};
use gatehouse_infra::{
    CredentialStore, InMemoryCredentialStore, InMemoryPermissionStore, InMemorySessionStore, PermissionEngine,
    PermissionStore, PostgresCredentialStore, PostgresPermissionStore, PostgresSessionStore, SessionLifecycle,
    SessionStore, StoreError, postgres, select_session_store,
};

use crate::config::ServerConfig;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("store setup failed: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Everything a request handler can reach.
pub struct AppServices {
    pub lifecycle: Arc<SessionLifecycle>,
    pub engine: Arc<PermissionEngine>,
    pub routes: RouteTable,
    pub unmapped_route_policy: UnmappedRoutePolicy,
}

impl AppServices {
    /// All three stores in process memory (dev/test).
    pub fn in_memory(config: &AuthConfig) -> Result<Self, AuthError> {
        Self::from_stores(
            config,
            Arc::new(InMemoryCredentialStore::new()),
            Arc::new(InMemoryPermissionStore::new()),
            Arc::new(InMemorySessionStore::new()),
        )
    }

    pub fn from_stores(
        config: &AuthConfig,
        credentials: Arc<dyn CredentialStore>,
        permissions: Arc<dyn PermissionStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> Result<Self, AuthError> {
        let lifecycle = SessionLifecycle::new(config, credentials.clone(), permissions.clone(), sessions)?;
        let engine = PermissionEngine::new(config, permissions, credentials);
        Ok(Self {
            lifecycle: Arc::new(lifecycle),
            engine: Arc::new(engine),
            routes: RouteTable::default(),
            unmapped_route_policy: config.unmapped_route_policy,
        })
    }

    /// Replace the default route table.
    pub fn with_route_table(mut self, routes: RouteTable) -> Self {
        self.routes = routes;
        self
    }

    /// Postgres when `DATABASE_URL` is set, with Redis as the session backend
    /// if `REDIS_URL` is set and healthy; in-memory otherwise.
    pub async fn from_server_config(server: &ServerConfig, config: &AuthConfig) -> Result<Self, StartupError> {
        let Some(database_url) = server.database_url.as_deref() else {
            warn!("DATABASE_URL not set; using in-memory stores (state is lost on restart)");
            if server.redis_url.is_some() {
                warn!("REDIS_URL ignored without DATABASE_URL");
            }
            return Ok(Self::in_memory(config)?);
        };

        let pool = postgres::connect(database_url, config.store_timeout).await?;
        postgres::apply_schema(&pool).await?;

        let credentials: Arc<dyn CredentialStore> = Arc::new(PostgresCredentialStore::new(pool.clone()));
        let permissions: Arc<dyn PermissionStore> = Arc::new(PostgresPermissionStore::new(pool.clone()));
        let durable: Arc<dyn SessionStore> = Arc::new(PostgresSessionStore::new(pool));

        let cache = session_cache(server.redis_url.as_deref()).await;
        let sessions = select_session_store(cache, durable, config.store_timeout).await;

        Ok(Self::from_stores(config, credentials, permissions, sessions)?)
    }

    /// Install the default catalog, then the configured admin account.
    pub async fn bootstrap(&self, config: &AuthConfig) -> Result<(), AuthError> {
        let report = self.engine.seed_defaults().await?;
        info!(
            permissions_created = report.permissions_created,
            roles_created = report.roles_created,
            links_added = report.links_added,
            "default roles and permissions seeded"
        );

        if let Some(admin) = &config.bootstrap_admin {
            match self.lifecycle.bootstrap_admin(admin).await? {
                Some(id) => info!(user_id = %id, "bootstrap admin account created"),
                None => info!("bootstrap admin account already present"),
            }
        }
        Ok(())
    }
}

#[cfg(feature = "redis")]
async fn session_cache(redis_url: Option<&str>) -> Option<Arc<dyn SessionStore>> {
    let url = redis_url?;
    match gatehouse_infra::RedisSessionStore::connect(url).await {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            warn!(error = %e, "redis session cache unreachable at startup");
            None
        }
    }
}

#[cfg(not(feature = "redis"))]
async fn session_cache(redis_url: Option<&str>) -> Option<Arc<dyn SessionStore>> {
    if redis_url.is_some() {
        warn!("REDIS_URL set but the redis feature is not enabled; ignoring");
    }
    None
}
