//! Durable state behind an abstract key/value backend.
//!
//! Every document is a JSON value under a fixed key. [`StateStore`] adds typed
//! accessors and serializes read-modify-write updates with one in-process
//! lock. Nothing here coordinates across processes: two daemons sharing a
//! store directory will race.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::Mutex;

use shipcycle_core::monitor::MonitorAlertState;
use shipcycle_core::queue::RunQueue;
use shipcycle_core::trend_pool::TrendPool;
use shipcycle_core::types::{
    AgentState, DecisionRecord, DropRecord, PublishedSummary, push_capped,
};

pub mod keys {
    pub const AGENT_STATE: &str = "agent_state";
    pub const QUEUE: &str = "queue";
    pub const TREND_POOL: &str = "trend_pool";
    pub const MONITOR_ALERTS: &str = "monitor_alerts";
    pub const DECISIONS: &str = "decisions";
    pub const DROPS: &str = "drops";
    pub const SUMMARIES: &str = "summaries";
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error for {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed document {key}: {source}")]
    Serde {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

// ─── Backends ─────────────────────────────────────────────────────

/// Raw document storage. Implementations only load and save whole values.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;
    async fn save(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    docs: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self.docs.lock().await.get(key).cloned())
    }

    async fn save(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        self.docs.lock().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// One pretty-printed JSON file per key under `<dir>/<namespace>/`.
/// Writes go through a temp file and a rename.
#[derive(Debug, Clone)]
pub struct JsonDirBackend {
    dir: PathBuf,
}

impl JsonDirBackend {
    pub fn new(base: &Path, namespace: &str) -> Self {
        Self {
            dir: base.join(namespace),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl StoreBackend for JsonDirBackend {
    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let path = self.path_for(key);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    key: key.to_string(),
                    source,
                });
            }
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| StoreError::Serde {
                key: key.to_string(),
                source,
            })
    }

    async fn save(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            key: key.to_string(),
            source,
        };
        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;

        let mut body = serde_json::to_string_pretty(&value).map_err(|source| StoreError::Serde {
            key: key.to_string(),
            source,
        })?;
        body.push('\n');

        let path = self.path_for(key);
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        tokio::fs::write(&tmp, body).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err)?;
        Ok(())
    }
}

// ─── Typed store ──────────────────────────────────────────────────

#[derive(Clone)]
pub struct StateStore {
    backend: Arc<dyn StoreBackend>,
    write_lock: Arc<Mutex<()>>,
}

impl StateStore {
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            backend,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    async fn load_doc<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T, StoreError> {
        match self.backend.load(key).await? {
            Some(value) => serde_json::from_value(value).map_err(|source| StoreError::Serde {
                key: key.to_string(),
                source,
            }),
            None => Ok(T::default()),
        }
    }

    async fn save_doc<T: Serialize>(&self, key: &str, doc: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(doc).map_err(|source| StoreError::Serde {
            key: key.to_string(),
            source,
        })?;
        self.backend.save(key, value).await
    }

    /// Load, mutate and save one document while holding the write lock.
    pub async fn update<T, R, F>(&self, key: &str, mutate: F) -> Result<R, StoreError>
    where
        T: DeserializeOwned + Serialize + Default + Send,
        F: FnOnce(&mut T) -> R + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut doc: T = self.load_doc(key).await?;
        let result = mutate(&mut doc);
        self.save_doc(key, &doc).await?;
        Ok(result)
    }

    pub async fn agent_state(&self) -> Result<AgentState, StoreError> {
        self.load_doc(keys::AGENT_STATE).await
    }

    pub async fn update_agent_state<R, F>(&self, mutate: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut AgentState) -> R + Send,
    {
        self.update(keys::AGENT_STATE, mutate).await
    }

    pub async fn queue(&self) -> Result<RunQueue, StoreError> {
        self.load_doc(keys::QUEUE).await
    }

    pub async fn update_queue<R, F>(&self, mutate: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut RunQueue) -> R + Send,
    {
        self.update(keys::QUEUE, mutate).await
    }

    pub async fn trend_pool(&self) -> Result<TrendPool, StoreError> {
        self.load_doc(keys::TREND_POOL).await
    }

    pub async fn update_trend_pool<R, F>(&self, mutate: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut TrendPool) -> R + Send,
    {
        self.update(keys::TREND_POOL, mutate).await
    }

    pub async fn alert_state(&self) -> Result<MonitorAlertState, StoreError> {
        self.load_doc(keys::MONITOR_ALERTS).await
    }

    pub async fn update_alert_state<R, F>(&self, mutate: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut MonitorAlertState) -> R + Send,
    {
        self.update(keys::MONITOR_ALERTS, mutate).await
    }

    pub async fn decisions(&self) -> Result<Vec<DecisionRecord>, StoreError> {
        self.load_doc(keys::DECISIONS).await
    }

    pub async fn append_decision(
        &self,
        decision: DecisionRecord,
        limit: usize,
    ) -> Result<(), StoreError> {
        self.update(keys::DECISIONS, |history: &mut Vec<DecisionRecord>| {
            push_capped(history, decision, limit);
        })
        .await
    }

    pub async fn drops(&self) -> Result<Vec<DropRecord>, StoreError> {
        self.load_doc(keys::DROPS).await
    }

    pub async fn append_drop(&self, drop: DropRecord, limit: usize) -> Result<(), StoreError> {
        self.update(keys::DROPS, |history: &mut Vec<DropRecord>| {
            push_capped(history, drop, limit);
        })
        .await
    }

    pub async fn summaries(&self) -> Result<Vec<PublishedSummary>, StoreError> {
        self.load_doc(keys::SUMMARIES).await
    }

    pub async fn append_summary(
        &self,
        summary: PublishedSummary,
        limit: usize,
    ) -> Result<(), StoreError> {
        self.update(keys::SUMMARIES, |history: &mut Vec<PublishedSummary>| {
            push_capped(history, summary, limit);
        })
        .await
    }
}

// ─── Tests ────────────────────────────────────────────────────────
