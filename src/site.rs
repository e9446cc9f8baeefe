use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::sweeper;

/// Manages per-site engines. Each managed building gets its own Engine +
/// WAL + maintenance tasks, keyed by a site slug.
pub struct SiteDirectory {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

impl SiteDirectory {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Get or lazily create an engine for the given site.
    pub fn get_or_create(&self, site: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(site) {
            return Ok(engine.value().clone());
        }
        if site.len() > MAX_SITE_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "site name too long",
            ));
        }
        if self.engines.len() >= MAX_SITES {
            return Err(std::io::Error::other("too many sites"));
        }

        // Sanitize the slug to prevent path traversal
        let safe_name: String = site
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty site name",
            ));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(wal_path, notify)?);

        // Spawn sweeper + compactor for this site
        let sweeper_engine = engine.clone();
        tokio::spawn(async move {
            sweeper::run_sweeper(sweeper_engine).await;
        });
        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            sweeper::run_compactor(compactor_engine, threshold).await;
        });

        self.engines.insert(site.to_string(), engine.clone());
        metrics::gauge!(crate::observability::SITES_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use rust_decimal::Decimal;
    use std::fs;
    use ulid::Ulid;

    use crate::model::Area;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("comunal_test_site").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn t(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    fn sauna(id: Ulid) -> Area {
        Area {
            id,
            name: "Sauna".into(),
            description: None,
            capacity: 6,
            price: Decimal::new(1000, 2),
            min_minutes: 30,
            max_minutes: 120,
            opening: t(7),
            closing: t(21),
            max_advance_days: 7,
            active: true,
        }
    }

    #[tokio::test]
    async fn site_isolation() {
        let dir = test_data_dir("isolation");
        let sd = SiteDirectory::new(dir, 1000);

        let eng_a = sd.get_or_create("torre_norte").unwrap();
        let eng_b = sd.get_or_create("torre_sur").unwrap();

        let area_id = Ulid::new();

        // Create the same area id in both sites
        eng_a.create_area(sauna(area_id)).await.unwrap();
        eng_b.create_area(sauna(area_id)).await.unwrap();

        eng_a.set_area_active(area_id, false, false).await.unwrap();

        // Only site A's copy was deactivated
        assert!(!eng_a.area(area_id).await.unwrap().active);
        assert!(eng_b.area(area_id).await.unwrap().active);
    }

    #[tokio::test]
    async fn site_lazy_creation() {
        let dir = test_data_dir("lazy");
        let sd = SiteDirectory::new(dir.clone(), 1000);

        // No WAL files should exist yet
        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        let _eng = sd.get_or_create("mirador").unwrap();

        assert!(dir.join("mirador.wal").exists());
    }

    #[tokio::test]
    async fn site_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let sd = SiteDirectory::new(dir, 1000);

        let eng1 = sd.get_or_create("foo").unwrap();
        let eng2 = sd.get_or_create("foo").unwrap();

        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn site_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let sd = SiteDirectory::new(dir.clone(), 1000);

        // Path traversal attempt
        let _eng = sd.get_or_create("../evil").unwrap();
        // Should create "evil.wal", not "../evil.wal"
        assert!(dir.join("evil.wal").exists());

        // Empty after sanitization
        let result = sd.get_or_create("../..");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn site_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let sd = SiteDirectory::new(dir, 1000);

        let long_name = "x".repeat(MAX_SITE_NAME_LEN + 1);
        let result = sd.get_or_create(&long_name);
        assert!(result.is_err());
        let err = result.err().unwrap();
        assert!(err.to_string().contains("site name too long"));
    }

    #[tokio::test]
    async fn site_count_limit() {
        let dir = test_data_dir("count_limit");
        let sd = SiteDirectory::new(dir, 1000);

        for i in 0..MAX_SITES {
            sd.get_or_create(&format!("s{i}")).unwrap();
        }
        let result = sd.get_or_create("one_more");
        assert!(result.is_err());
        let err = result.err().unwrap();
        assert!(err.to_string().contains("too many sites"));
    }
}
