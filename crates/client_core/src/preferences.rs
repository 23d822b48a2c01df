use anyhow::Result;
use async_trait::async_trait;
use storage::{Storage, StoredAutoCycle, AUTO_CYCLE_NAMESPACE};
use tokio::sync::Mutex;

/// Client-local persistence of the auto-cycle `enabled` flag and cycle count.
#[async_trait]
pub trait AutoCyclePreferences: Send + Sync {
    async fn load(&self) -> Result<StoredAutoCycle>;
    async fn save(&self, state: StoredAutoCycle) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryPreferences {
    state: Mutex<StoredAutoCycle>,
}

impl MemoryPreferences {
    pub fn with_state(state: StoredAutoCycle) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub async fn current(&self) -> StoredAutoCycle {
        *self.state.lock().await
    }
}

#[async_trait]
impl AutoCyclePreferences for MemoryPreferences {
    async fn load(&self) -> Result<StoredAutoCycle> {
        Ok(*self.state.lock().await)
    }

    async fn save(&self, state: StoredAutoCycle) -> Result<()> {
        *self.state.lock().await = state;
        Ok(())
    }
}

/// Preferences kept in the SQLite store under a fixed namespace.
pub struct StoragePreferences {
    storage: Storage,
    namespace: String,
}

impl StoragePreferences {
    pub fn new(storage: Storage) -> Self {
        Self::with_namespace(storage, AUTO_CYCLE_NAMESPACE)
    }

    pub fn with_namespace(storage: Storage, namespace: impl Into<String>) -> Self {
        Self {
            storage,
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl AutoCyclePreferences for StoragePreferences {
    async fn load(&self) -> Result<StoredAutoCycle> {
        self.storage.load_auto_cycle(&self.namespace).await
    }

    async fn save(&self, state: StoredAutoCycle) -> Result<()> {
        self.storage.save_auto_cycle(&self.namespace, state).await
    }
}
