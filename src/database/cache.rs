//! Schema Cache
//!
//! [`SchemaCatalog`] owns the current [`SchemaSnapshot`] and reloads it only when the
//! database's change fingerprint moves. Readers always get a complete snapshot: a
//! refresh builds a new one and swaps the pointer. Concurrent refreshes are
//! coalesced so only one metadata scan is in flight at a time.

use crate::database::connection::SqlBackend;
use crate::database::indexer;
use crate::database::schema::{
    ProcedureSummary, RenderOptions, SchemaSnapshot, StoredProcedureInfo, TableInfo, TableSummary,
};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Outcome of a forced refresh
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshStats {
    pub tables: usize,
    pub stored_procedures: usize,
    pub views: usize,
    pub duration_ms: u64,
    pub last_updated: DateTime<Utc>,
}

/// Self-refreshing catalog cache
pub struct SchemaCatalog {
    backend: Arc<dyn SqlBackend>,
    snapshot: RwLock<Option<Arc<SchemaSnapshot>>>,
    /// Held for the duration of a scan
    refresh_lock: Mutex<()>,
    /// Bumped on every publish or clear
    generation: AtomicU64,
}

impl SchemaCatalog {
    /// Create an empty catalog over the given backend
    pub fn new(backend: Arc<dyn SqlBackend>) -> Self {
        Self {
            backend,
            snapshot: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Current snapshot without any freshness check
    pub async fn current(&self) -> Option<Arc<SchemaSnapshot>> {
        self.snapshot.read().await.clone()
    }

    /// Load the catalog, reusing the cached snapshot when the fingerprint is unchanged
    pub async fn load(&self, force: bool) -> Result<Arc<SchemaSnapshot>> {
        self.load_tracked(force).await.map(|(snapshot, _)| snapshot)
    }

    /// Like [`load`](Self::load), also reporting whether a new snapshot was published
    pub async fn load_tracked(&self, force: bool) -> Result<(Arc<SchemaSnapshot>, bool)> {
        let observed = self.generation.load(Ordering::Acquire);

        if !force {
            if let Some(current) = self.current().await {
                let checksum = indexer::fetch_checksum(self.backend.as_ref()).await?;
                if checksum == current.checksum {
                    debug!("Using cached schema (no changes detected)");
                    return Ok((current, false));
                }
                info!("Schema change detected, reloading");
            }
        }

        self.refresh(observed).await
    }

    /// Force a full rescan and report what was loaded
    pub async fn refresh_stats(&self) -> Result<RefreshStats> {
        let started = Instant::now();
        let snapshot = self.load(true).await?;
        let stats = snapshot.stats();
        Ok(RefreshStats {
            tables: stats.tables,
            stored_procedures: stats.stored_procedures,
            views: stats.views,
            duration_ms: started.elapsed().as_millis() as u64,
            last_updated: snapshot.last_updated,
        })
    }

    /// Whether the database fingerprint differs from the cached one; true when nothing is cached
    pub async fn has_changed(&self) -> Result<bool> {
        let Some(current) = self.current().await else {
            return Ok(true);
        };
        let checksum = indexer::fetch_checksum(self.backend.as_ref()).await?;
        Ok(checksum != current.checksum)
    }

    /// Drop the cached snapshot; the next load rescans
    pub async fn clear(&self) {
        let mut slot = self.snapshot.write().await;
        *slot = None;
        self.generation.fetch_add(1, Ordering::AcqRel);
        info!("Schema cache cleared");
    }

    async fn refresh(&self, observed: u64) -> Result<(Arc<SchemaSnapshot>, bool)> {
        let _guard = self.refresh_lock.lock().await;

        // Someone else published while we waited for the lock
        if self.generation.load(Ordering::Acquire) != observed {
            if let Some(current) = self.current().await {
                debug!("Joined an in-flight schema refresh");
                return Ok((current, false));
            }
        }

        info!("Loading schema");
        let started = Instant::now();
        let backend = self.backend.as_ref();
        let (tables, procedures, views, checksum) = tokio::try_join!(
            indexer::scan_tables(backend),
            indexer::scan_procedures(backend),
            indexer::scan_views(backend),
            indexer::fetch_checksum(backend),
        )?;

        let snapshot = Arc::new(SchemaSnapshot::new(tables, procedures, views, checksum));
        let stats = snapshot.stats();

        {
            let mut slot = self.snapshot.write().await;
            *slot = Some(Arc::clone(&snapshot));
            self.generation.fetch_add(1, Ordering::AcqRel);
        }

        info!(
            tables = stats.tables,
            stored_procedures = stats.stored_procedures,
            views = stats.views,
            duration_ms = started.elapsed().as_millis() as u64,
            "Schema snapshot published"
        );
        Ok((snapshot, true))
    }

    /// Rendered catalog text (see [`SchemaSnapshot::render`])
    pub async fn render(&self, options: &RenderOptions) -> Result<String> {
        Ok(self.load(false).await?.render(options))
    }

    /// Rendered foreign-key map
    pub async fn relationships(&self) -> Result<String> {
        Ok(self.load(false).await?.relationships())
    }

    /// Look up a table by full or bare name
    pub async fn find_table(&self, name: &str) -> Result<Option<TableInfo>> {
        Ok(self.load(false).await?.find_table(name).cloned())
    }

    /// Look up a stored procedure by full or bare name
    pub async fn find_procedure(&self, name: &str) -> Result<Option<StoredProcedureInfo>> {
        Ok(self.load(false).await?.find_procedure(name).cloned())
    }

    pub async fn list_tables(&self) -> Result<Vec<TableSummary>> {
        Ok(self.load(false).await?.list_tables())
    }

    pub async fn list_procedures(&self) -> Result<Vec<ProcedureSummary>> {
        Ok(self.load(false).await?.list_procedures())
    }
}
