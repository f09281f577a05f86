use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use crate::compactor;
use crate::dispatch::Dispatcher;
use crate::engine::{Calendar, Engine};
use crate::limits::*;

/// Manages per-salon engines. Each salon gets its own Engine, WAL and
/// compactor. Salon = database name from the pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    calendar: Calendar,
    dispatcher: Arc<Dispatcher>,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, calendar: Calendar, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            calendar,
            dispatcher,
        }
    }

    /// Get or lazily create an engine for the given salon. Names that
    /// sanitise to the same file name share one engine.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        let safe_name = sanitize(tenant);
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }
        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // Two connections may race to open the same salon; only one engine
        // (and one WAL writer) may win.
        let entry = self.engines.entry(safe_name.clone());
        if let Entry::Occupied(e) = &entry {
            return Ok(e.get().clone());
        }
        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let engine = Arc::new(Engine::new(wal_path, self.calendar, self.dispatcher.clone())?);
        entry.or_insert(engine.clone());

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        info!(tenant = %safe_name, "salon loaded");
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

/// Strip anything that could escape the data directory.
fn sanitize(tenant: &str) -> String {
    tenant
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}
