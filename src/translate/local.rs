use anyhow::{Result, anyhow};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

use super::TextTranslator;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModelKey {
    Pair(String, String),
    Shared,
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKey::Pair(source, target) => write!(f, "{}-{}", source, target),
            ModelKey::Shared => f.write_str("shared"),
        }
    }
}

pub type LoadFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Arc<dyn TextTranslator>>> + Send + 'a>>;

/// Initializes an in-process translation model. `fresh_download` asks the
/// loader to bypass any on-disk copy.
pub trait LocalModelLoader: Send + Sync {
    fn load<'a>(&'a self, key: &'a ModelKey, fresh_download: bool) -> LoadFuture<'a>;
}

/// Loader for hosts that ship without a local model.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocalModel;

impl LocalModelLoader for NoLocalModel {
    fn load<'a>(&'a self, key: &'a ModelKey, _fresh_download: bool) -> LoadFuture<'a> {
        Box::pin(async move { Err(anyhow!("no local translation model available for {}", key)) })
    }
}

type Slot = Arc<OnceCell<Arc<dyn TextTranslator>>>;

/// Lazily loaded local models, one per [`ModelKey`], kept until cleared.
///
/// Concurrent callers asking for the same key share a single initialization.
/// A failed load leaves the slot empty so the next call tries again.
#[derive(Clone)]
pub struct LocalModelCache {
    loader: Arc<dyn LocalModelLoader>,
    slots: Arc<Mutex<HashMap<ModelKey, Slot>>>,
}

impl LocalModelCache {
    pub fn new(loader: Arc<dyn LocalModelLoader>) -> Self {
        Self {
            loader,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn get_or_load(&self, key: &ModelKey) -> Result<Arc<dyn TextTranslator>> {
        let slot = self.slot(key);
        let model = slot
            .get_or_try_init(|| async {
                info!("loading local translation model {}", key);
                self.loader.load(key, false).await
            })
            .await?;
        Ok(model.clone())
    }

    /// Drops the cached model for `key` and loads it again from a fresh download.
    ///
    /// An initialization already running on the old slot finishes into that
    /// slot, which is no longer reachable.
    pub async fn reload(&self, key: &ModelKey) -> Result<Arc<dyn TextTranslator>> {
        let slot: Slot = Arc::new(OnceCell::new());
        self.slots.lock().insert(key.clone(), slot.clone());
        let model = slot
            .get_or_try_init(|| async {
                info!("reloading local translation model {}", key);
                self.loader.load(key, true).await
            })
            .await?;
        Ok(model.clone())
    }

    pub fn is_loaded(&self, key: &ModelKey) -> bool {
        self.slots
            .lock()
            .get(key)
            .map(|slot| slot.initialized())
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    fn slot(&self, key: &ModelKey) -> Slot {
        self.slots
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::FakeLoader;

    fn key() -> ModelKey {
        ModelKey::Pair("ja".to_string(), "en".to_string())
    }

    #[tokio::test]
    async fn loads_once_and_reuses() {
        let loader = Arc::new(FakeLoader::replying("Hello"));
        let cache = LocalModelCache::new(loader.clone());
        assert!(!cache.is_loaded(&key()));
        cache.get_or_load(&key()).await.unwrap();
        cache.get_or_load(&key()).await.unwrap();
        assert_eq!(loader.loads(), 1);
        assert!(cache.is_loaded(&key()));
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_initialization() {
        let loader = Arc::new(FakeLoader::replying("Hello"));
        let cache = LocalModelCache::new(loader.clone());
        let key = key();
        let (first, second) = tokio::join!(cache.get_or_load(&key), cache.get_or_load(&key));
        assert!(first.is_ok() && second.is_ok());
        assert_eq!(loader.loads(), 1);
    }

    #[tokio::test]
    async fn reload_forces_a_fresh_download() {
        let loader = Arc::new(FakeLoader::replying("Hello"));
        let cache = LocalModelCache::new(loader.clone());
        cache.get_or_load(&key()).await.unwrap();
        cache.reload(&key()).await.unwrap();
        assert_eq!(loader.loads(), 2);
        assert_eq!(loader.fresh_downloads(), 1);
        cache.get_or_load(&key()).await.unwrap();
        assert_eq!(loader.loads(), 2);
    }

    #[tokio::test]
    async fn failed_loads_are_retried() {
        let loader = Arc::new(FakeLoader::failing("offline"));
        let cache = LocalModelCache::new(loader.clone());
        assert!(cache.get_or_load(&key()).await.is_err());
        assert!(cache.get_or_load(&ModelKey::Shared).await.is_err());
        assert!(cache.get_or_load(&key()).await.is_err());
        assert_eq!(loader.loads(), 3);
        assert!(!cache.is_loaded(&key()));
    }

    #[tokio::test]
    async fn missing_model_reports_the_key() {
        let cache = LocalModelCache::new(Arc::new(NoLocalModel));
        let err = cache.get_or_load(&ModelKey::Shared).await.err().unwrap();
        assert!(err.to_string().contains("shared"));
    }
}
