//! Engine catalog: the directory of compute engines tasks are dispatched to.
//!
//! Read-mostly: the scheduling hot path only calls [`EngineCatalog::select_engine`].
//! Selection is deterministic for a fixed catalog state: the first eligible
//! engine in registration order wins.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use db::{DbError, EngineRecord, Store};

use crate::EngineError;

#[derive(Clone)]
pub struct EngineCatalog {
    store: Arc<dyn Store>,
    /// When set, engines need a heartbeat no older than this to be selected.
    heartbeat_ttl: Option<Duration>,
}

impl EngineCatalog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store, heartbeat_ttl: None }
    }

    pub fn with_heartbeat_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.heartbeat_ttl = ttl;
        self
    }

    /// Pick the engine for the next dispatch attempt.
    ///
    /// # Errors
    /// [`EngineError::NoActiveEngine`] when no engine is eligible.
    pub async fn select_engine(&self) -> Result<EngineRecord, EngineError> {
        self.select_engine_at(Utc::now()).await
    }

    /// [`select_engine`](Self::select_engine) against an explicit clock.
    pub async fn select_engine_at(&self, now: DateTime<Utc>) -> Result<EngineRecord, EngineError> {
        let engines = self.store.list_engines().await?;
        let selected = engines
            .into_iter()
            .find(|e| self.is_eligible(e, now))
            .ok_or(EngineError::NoActiveEngine)?;
        debug!("selected engine '{}' ({})", selected.name, selected.id);
        Ok(selected)
    }

    fn is_eligible(&self, engine: &EngineRecord, now: DateTime<Utc>) -> bool {
        if !engine.is_active {
            return false;
        }
        match (self.heartbeat_ttl, engine.last_heartbeat) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(ttl), Some(beat)) => now
                .signed_duration_since(beat)
                .to_std()
                // A heartbeat from the future counts as fresh.
                .map_or(true, |age| age <= ttl),
        }
    }

    pub async fn register(
        &self,
        name: &str,
        base_url: &str,
        run_path: &str,
    ) -> Result<EngineRecord, EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::Invalid("engine name must not be empty".into()));
        }
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(EngineError::Invalid(format!("engine base_url '{base_url}' is not an http(s) URL")));
        }

        let engine = EngineRecord::new(name, base_url, run_path);
        self.store.insert_engine(&engine).await?;
        info!("registered engine '{}' at {}", engine.name, engine.run_url());
        Ok(engine)
    }

    pub async fn deactivate(&self, engine_id: Uuid) -> Result<(), EngineError> {
        self.set_active(engine_id, false).await
    }

    pub async fn activate(&self, engine_id: Uuid) -> Result<(), EngineError> {
        self.set_active(engine_id, true).await
    }

    async fn set_active(&self, engine_id: Uuid, active: bool) -> Result<(), EngineError> {
        self.store
            .set_engine_active(engine_id, active)
            .await
            .map_err(|e| not_found_as(e, engine_id))?;
        info!("engine {} is_active={}", engine_id, active);
        Ok(())
    }

    pub async fn heartbeat(&self, engine_id: Uuid) -> Result<(), EngineError> {
        self.store
            .touch_engine_heartbeat(engine_id, Utc::now())
            .await
            .map_err(|e| not_found_as(e, engine_id))
    }

    pub async fn list(&self) -> Result<Vec<EngineRecord>, EngineError> {
        Ok(self.store.list_engines().await?)
    }
}

fn not_found_as(err: DbError, engine_id: Uuid) -> EngineError {
    match err {
        DbError::NotFound => EngineError::EngineNotFound(engine_id),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::MemoryStore;

    fn catalog() -> EngineCatalog {
        EngineCatalog::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn empty_catalog_has_no_active_engine() {
        assert!(matches!(catalog().select_engine().await, Err(EngineError::NoActiveEngine)));
    }

    #[tokio::test]
    async fn first_active_engine_in_registration_order_wins() {
        let catalog = catalog();
        let first = catalog.register("e1", "http://e1", "/run").await.unwrap();
        let second = catalog.register("e2", "http://e2", "/run").await.unwrap();

        assert_eq!(catalog.select_engine().await.unwrap().id, first.id);
        assert_eq!(catalog.select_engine().await.unwrap().id, first.id);

        catalog.deactivate(first.id).await.unwrap();
        assert_eq!(catalog.select_engine().await.unwrap().id, second.id);

        catalog.deactivate(second.id).await.unwrap();
        assert!(matches!(catalog.select_engine().await, Err(EngineError::NoActiveEngine)));

        catalog.activate(first.id).await.unwrap();
        assert_eq!(catalog.select_engine().await.unwrap().id, first.id);
    }

    #[tokio::test]
    async fn unknown_engine_is_reported() {
        let id = Uuid::new_v4();
        assert!(matches!(catalog().deactivate(id).await, Err(EngineError::EngineNotFound(e)) if e == id));
    }

    #[tokio::test]
    async fn registration_validates_input() {
        let catalog = catalog();
        assert!(matches!(catalog.register("", "http://e", "/run").await, Err(EngineError::Invalid(_))));
        assert!(matches!(catalog.register("e", "ftp://e", "/run").await, Err(EngineError::Invalid(_))));
    }

    #[tokio::test]
    async fn heartbeat_ttl_skips_stale_engines() {
        let catalog = catalog().with_heartbeat_ttl(Some(Duration::from_secs(30)));
        let stale = catalog.register("stale", "http://a", "/run").await.unwrap();
        let fresh = catalog.register("fresh", "http://b", "/run").await.unwrap();

        // Neither has reported in yet.
        assert!(matches!(catalog.select_engine().await, Err(EngineError::NoActiveEngine)));

        catalog.heartbeat(stale.id).await.unwrap();
        catalog.heartbeat(fresh.id).await.unwrap();
        let later = Utc::now() + chrono::Duration::seconds(10);
        assert_eq!(catalog.select_engine_at(later).await.unwrap().id, stale.id);

        let much_later = Utc::now() + chrono::Duration::seconds(120);
        assert!(matches!(
            catalog.select_engine_at(much_later).await,
            Err(EngineError::NoActiveEngine)
        ));
    }
}
