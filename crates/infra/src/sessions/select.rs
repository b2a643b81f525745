use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::SessionStore;
use crate::timeout::bounded;

/// Pick the session backend for this process.
///
/// The cache backend is used only when present and healthy within `health_timeout`;
/// otherwise the durable backend serves every call.
pub async fn select_session_store(
    cache: Option<Arc<dyn SessionStore>>,
    durable: Arc<dyn SessionStore>,
    health_timeout: Duration,
) -> Arc<dyn SessionStore> {
    let Some(cache) = cache else {
        info!(backend = durable.backend_name(), "no cache session backend configured");
        return durable;
    };

    match bounded(health_timeout, "session_cache_health", cache.health_check()).await {
        Ok(()) => {
            info!(backend = cache.backend_name(), "session cache healthy; using it");
            cache
        }
        Err(e) => {
            warn!(
                backend = cache.backend_name(),
                fallback = durable.backend_name(),
                error = %e,
                "session cache unhealthy; falling back to durable backend"
            );
            durable
        }
    }
}
