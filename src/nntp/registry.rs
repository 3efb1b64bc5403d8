//! Shared-pool lifecycle: at most one NNTP pool per engine.
//!
//! Triage batches reuse one warm pool as long as its configuration key
//! matches and it has not gone stale. Builds are coalesced: the registry
//! holds its slot lock across the connect, so concurrent batches and
//! pre-warm calls all await the same in-flight build.

use crate::config::NntpConfig;
use crate::error::NntpError;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::activity::{ACTIVITY_IDLE_LIMIT, TriageActivity};
use super::connection::NntpConnector;
use super::pool::NntpPool;

/// Identity of a pool configuration.
///
/// A mismatch forces the shared record to be closed and rebuilt.
pub fn pool_key(config: &NntpConfig, connections: usize, keep_alive_ms: u64) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    config.host.hash(&mut hasher);
    config.port.hash(&mut hasher);
    config.user.hash(&mut hasher);
    config.use_tls.hash(&mut hasher);
    connections.hash(&mut hasher);
    keep_alive_ms.hash(&mut hasher);
    hasher.finish()
}

struct SharedRecord {
    key: u64,
    pool: Arc<NntpPool>,
}

/// Owner of the process's shared NNTP pool record.
pub struct PoolRegistry {
    activity: TriageActivity,
    slot: Mutex<Option<SharedRecord>>,
}

impl PoolRegistry {
    /// New registry with no pool.
    pub fn new(activity: TriageActivity) -> Self {
        Self {
            activity,
            slot: Mutex::new(None),
        }
    }

    /// Get the shared pool for `config`, building or rebuilding as needed.
    ///
    /// With `reuse` and a matching, non-stale record the existing pool is
    /// touched and returned; otherwise the old record is closed and a new
    /// pool is built while the slot lock is held (single in-flight build).
    pub async fn obtain(
        &self,
        config: &NntpConfig,
        connector: Arc<dyn NntpConnector>,
        connections: usize,
        keep_alive_ms: u64,
        reuse: bool,
    ) -> Result<Arc<NntpPool>, NntpError> {
        let key = pool_key(config, connections, keep_alive_ms);
        let mut slot = self.slot.lock().await;

        if let Some(record) = slot.as_ref() {
            if reuse && record.key == key && !self.is_stale(&record.pool) {
                record.pool.touch();
                return Ok(Arc::clone(&record.pool));
            }
        }
        if let Some(old) = slot.take() {
            tracing::debug!("shared NNTP pool rebuilt (key change or stale)");
            old.pool.close().await;
        }

        let pool = Arc::new(
            NntpPool::connect(connector, connections, keep_alive_ms, self.activity.clone())
                .await?,
        );
        *slot = Some(SharedRecord {
            key,
            pool: Arc::clone(&pool),
        });
        Ok(pool)
    }

    /// Close and forget the shared pool, if any.
    pub async fn close(&self) {
        if let Some(record) = self.slot.lock().await.take() {
            record.pool.close().await;
        }
    }

    /// A pool is stale when triage has been quiet past the activity limit and
    /// the pool itself has not been used within it either.
    fn is_stale(&self, pool: &NntpPool) -> bool {
        self.activity.idle_longer_than(ACTIVITY_IDLE_LIMIT)
            && pool
                .since_last_used()
                .is_none_or(|idle| idle >= ACTIVITY_IDLE_LIMIT)
    }
}
