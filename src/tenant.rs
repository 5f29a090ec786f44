use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::clock::SystemClock;
use crate::compactor;
use crate::directory::ProfileDirectory;
use crate::engine::{Engine, WeekStart};
use crate::limits::*;
use crate::notify::NotifyHub;

/// Per-tenant engines, keyed by the pgwire database name. Each tenant has its
/// own WAL file and compactor task; all tenants share one profile directory.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    directory: Arc<dyn ProfileDirectory>,
    week_start: WeekStart,
}

impl TenantManager {
    pub fn new(
        data_dir: PathBuf,
        compact_threshold: u64,
        directory: Arc<dyn ProfileDirectory>,
    ) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            directory,
            week_start: WeekStart::default(),
        }
    }

    pub fn with_week_start(mut self, week_start: WeekStart) -> Self {
        self.week_start = week_start;
        self
    }

    /// Get or lazily create the engine for a tenant.
    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Engine>> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "tenant name too long"));
        }

        // Sanitize to keep the WAL inside data_dir.
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty tenant name"));
        }

        // Keyed by the file name so two spellings never share one WAL.
        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }
        if self.tenant_count() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }
        // The entry guard serializes concurrent first connections to one tenant.
        let entry = match self.engines.entry(safe_name.clone()) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(e) => e,
        };

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let engine = Engine::new(
            wal_path,
            Arc::new(NotifyHub::new()),
            self.directory.clone(),
            Arc::new(SystemClock),
        )?
        .with_week_start(self.week_start);
        let engine = Arc::new(engine);

        tokio::spawn(compactor::run_compactor(engine.clone(), self.compact_threshold));
        entry.insert(engine.clone());
        tracing::info!("tenant {tenant} loaded");
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.tenant_count() as f64);
        Ok(engine)
    }

    pub fn tenant_count(&self) -> usize {
        self.engines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{Profile, StaticDirectory};
    use crate::engine::{EngineError, NewBooking};
    use crate::model::{MS_PER_HOUR, Party};
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotguard_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn manager(name: &str, profiles: Vec<Profile>) -> (TenantManager, PathBuf) {
        let dir = test_data_dir(name);
        let directory = Arc::new(StaticDirectory::from_profiles(profiles));
        (TenantManager::new(dir.clone(), 1000, directory), dir)
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let provider = Ulid::new();
        let requester = Ulid::new();
        let (tm, _) = manager("isolation", vec![Profile::provider(provider, 40.0)]);

        let eng_a = tm.get_or_create("tenant_a").unwrap();
        let eng_b = tm.get_or_create("tenant_b").unwrap();

        let start = chrono::Utc::now().timestamp_millis() + 24 * MS_PER_HOUR;
        let req = NewBooking { provider_id: provider, start, end: start + MS_PER_HOUR, notes: None };
        let a = eng_a.create_booking(requester, req.clone()).await.unwrap();
        // Same slot is free in the other tenant.
        eng_b.create_booking(requester, req.clone()).await.unwrap();
        assert!(matches!(
            eng_a.create_booking(requester, req).await,
            Err(EngineError::SchedulingConflict(_))
        ));

        assert!(matches!(eng_b.get_booking(a.id, requester).await, Err(EngineError::NotFound(_))));
        assert_eq!(eng_a.list_bookings(provider, Party::Provider, None).await.len(), 1);
    }

    #[tokio::test]
    async fn tenant_lazy_creation() {
        let (tm, dir) = manager("lazy", vec![]);
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
        let _eng = tm.get_or_create("my_db").unwrap();
        assert!(dir.join("my_db.wal").exists());
    }

    #[tokio::test]
    async fn tenant_same_engine_returned() {
        let (tm, _) = manager("same_eng", vec![]);
        let eng1 = tm.get_or_create("foo").unwrap();
        let eng2 = tm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&eng1, &eng2));
        assert_eq!(tm.tenant_count(), 1);
    }

    #[tokio::test]
    async fn tenant_name_sanitized() {
        let (tm, dir) = manager("sanitize", vec![]);
        let eng = tm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());
        assert!(Arc::ptr_eq(&eng, &tm.get_or_create("evil").unwrap()));
        assert!(tm.get_or_create("../..").is_err());
    }

    #[tokio::test]
    async fn tenant_name_too_long() {
        let (tm, _) = manager("name_too_long", vec![]);
        let err = tm.get_or_create(&"x".repeat(MAX_TENANT_NAME_LEN + 1)).err().unwrap();
        assert!(err.to_string().contains("tenant name too long"));
    }

    #[tokio::test]
    async fn tenant_count_limit() {
        let (tm, _) = manager("count_limit", vec![]);
        for i in 0..MAX_TENANTS {
            tm.get_or_create(&format!("t{i}")).unwrap();
        }
        let err = tm.get_or_create("one_more").err().unwrap();
        assert!(err.to_string().contains("too many tenants"));
    }
}
