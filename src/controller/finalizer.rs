//! Pool Finalizer
//!
//! A pool resource carries [`POOL_FINALIZER`](crate::domain::POOL_FINALIZER)
//! exactly while its pool has at least one replica.

use tracing::{debug, info, instrument, warn};

use crate::domain::PoolStore;
use crate::error::Result;
use crate::metrics;
use crate::registry::Registry;

/// Whether a pool with `replicas` replicas needs the finalizer
pub fn wanted(replicas: usize) -> bool {
    replicas > 0
}

/// Add or remove the finalizer of `name` to match its pool.
///
/// The store is only written when presence has to change. Returns whether a
/// write was made.
#[instrument(skip(store, registry))]
pub async fn sync_finalizer(store: &dyn PoolStore, registry: &Registry, name: &str) -> Result<bool> {
    let Some(resource) = store.get(name) else {
        debug!("No pool resource, nothing to protect");
        return Ok(false);
    };

    let replicas = registry
        .get_pool(name)
        .map(|pool| pool.replica_count())
        .unwrap_or(0);
    let wanted = wanted(replicas);

    if wanted == resource.has_finalizer() {
        return Ok(false);
    }

    let updated = if wanted {
        resource.with_finalizer()
    } else {
        resource.without_finalizer()
    };

    match store.update(&updated).await {
        Ok(_) => {
            info!(
                "Finalizer {} ({} replicas)",
                if wanted { "added" } else { "removed" },
                replicas
            );
            Ok(true)
        }
        Err(e) => {
            warn!("Failed to update finalizer: {}", e);
            metrics::record_store_write_failure("finalizer");
            Err(e)
        }
    }
}
