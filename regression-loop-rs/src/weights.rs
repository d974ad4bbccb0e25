// regression-loop-rs/src/weights.rs
// Pattern-weight state: the only mutable resource shared across cycles.
//
// The in-memory WeightBook is read freely during generation and replaced
// wholesale by the feedback engine at end of cycle. Durability is a flat
// key-value contract: "domain/pattern_id" -> weight, loaded at startup
// and flushed after each applied adaptation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::fs;

/// (domain, pattern_id) pair identifying one weight.
pub type WeightKey = (String, String);

/// Default weight for patterns the feedback engine has never touched.
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// Persistence error type.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// In-memory weight table shared between the generator (reader) and the
/// feedback engine (sole writer). The lock is never held across an await.
#[derive(Debug, Default)]
pub struct WeightBook {
    inner: RwLock<HashMap<WeightKey, f64>>,
}

impl WeightBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current weight for a pattern, defaulting to 1.0 when unseen.
    pub fn weight_of(&self, domain: &str, pattern_id: &str) -> f64 {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .get(&(domain.to_string(), pattern_id.to_string()))
            .copied()
            .unwrap_or(DEFAULT_WEIGHT)
    }

    /// Snapshot of every explicitly-set weight.
    pub fn snapshot(&self) -> HashMap<WeightKey, f64> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.clone()
    }

    /// Replace the whole table in one step. Used by the feedback engine so
    /// that a cycle's updates become visible atomically, and at startup to
    /// install persisted state.
    pub fn replace(&self, weights: HashMap<WeightKey, f64>) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *inner = weights;
    }
}

/// Durable key-value contract for pattern weights.
#[async_trait]
pub trait WeightStore: Send + Sync {
    async fn load(&self) -> Result<HashMap<WeightKey, f64>, StoreError>;

    async fn flush(&self, weights: &HashMap<WeightKey, f64>) -> Result<(), StoreError>;
}

/// File-backed store holding a single JSON object keyed
/// `"domain/pattern_id"`. Suitable for single-node deployments; a database
/// backend can be wired behind the same trait later.
pub struct FileBackedWeightStore {
    path: PathBuf,
}

impl FileBackedWeightStore {
    /// Create a store at a path from REGRESSION_WEIGHTS_PATH or a safe
    /// default. Eagerly creates the parent directory so an unwritable
    /// location fails at startup, not at the first end-of-cycle flush.
    pub fn new_default() -> Result<Self, StoreError> {
        let path = std::env::var("REGRESSION_WEIGHTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data/regression-loop/pattern_weights.json"));
        Self::new(path)
    }

    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            // One-time startup check; blocking std::fs is fine here.
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl WeightStore for FileBackedWeightStore {
    async fn load(&self) -> Result<HashMap<WeightKey, f64>, StoreError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let raw = fs::read_to_string(&self.path).await?;
        let parsed: HashMap<String, f64> = match serde_json::from_str(&raw) {
            Ok(map) => map,
            Err(err) => {
                // Unreadable state should not block the loop; start fresh.
                tracing::warn!(
                    error = %err,
                    path = %self.path.display(),
                    "failed to parse weight store; starting with defaults"
                );
                return Ok(HashMap::new());
            }
        };

        let mut out = HashMap::with_capacity(parsed.len());
        for (key, weight) in parsed {
            match key.split_once('/') {
                Some((domain, pattern_id)) => {
                    out.insert((domain.to_string(), pattern_id.to_string()), weight);
                }
                None => {
                    tracing::warn!(key = %key, "malformed weight key; skipping");
                }
            }
        }
        Ok(out)
    }

    async fn flush(&self, weights: &HashMap<WeightKey, f64>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let flat: HashMap<String, f64> = weights
            .iter()
            .map(|((domain, pattern_id), w)| (format!("{domain}/{pattern_id}"), *w))
            .collect();

        let body = serde_json::to_string_pretty(&flat)?;
        fs::write(&self.path, body).await?;
        Ok(())
    }
}
