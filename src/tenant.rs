use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::compactor;
use crate::desk::BookingDesk;
use crate::engine::Engine;
use crate::limits::*;
use crate::repo::{Clock, SystemClock};
use crate::schedule::BookingScheduler;

/// One database: its store and the desk that judges requests against it.
pub struct Tenant {
    pub engine: Arc<Engine>,
    pub desk: BookingDesk<Engine>,
}

/// Manages per-tenant engines. Each tenant gets its own Engine + WAL + compactor.
/// Tenant = database name from the pgwire connection.
pub struct TenantManager {
    tenants: DashMap<String, Arc<Tenant>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    scheduler: BookingScheduler,
    clock: Arc<dyn Clock>,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, scheduler: BookingScheduler) -> Self {
        Self::with_clock(data_dir, compact_threshold, scheduler, Arc::new(SystemClock))
    }

    pub fn with_clock(
        data_dir: PathBuf,
        compact_threshold: u64,
        scheduler: BookingScheduler,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tenants: DashMap::new(),
            data_dir,
            compact_threshold,
            scheduler,
            clock,
        }
    }

    /// Get or lazily create the tenant for a database name.
    pub fn get_or_create(&self, name: &str) -> std::io::Result<Arc<Tenant>> {
        if let Some(tenant) = self.tenants.get(name) {
            return Ok(tenant.value().clone());
        }
        if name.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        if self.tenants.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // Only [A-Za-z0-9_-] reaches the filesystem.
        let safe_name: String = name
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }

        // Two connections may race here; the entry API keeps the first engine.
        let entry = self.tenants.entry(name.to_string());
        if let dashmap::mapref::entry::Entry::Occupied(existing) = &entry {
            return Ok(existing.get().clone());
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let engine = Arc::new(Engine::new(wal_path)?);
        let desk = BookingDesk::new(engine.clone(), self.clock.clone(), self.scheduler.clone());

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        let tenant = Arc::new(Tenant { engine, desk });
        entry.insert(tenant.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.tenants.len() as f64);
        info!("tenant {name} loaded");
        Ok(tenant)
    }
}
