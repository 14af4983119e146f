//! Sample intake for the pool drivers.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use nodepool_core::{LoadSample, PoolId, Timestamp};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Pull interface of the metrics collaborator.
pub trait SampleSource: Send + Sync {
    /// Most recent sample for the pool, if any has been observed.
    fn latest_sample<'a>(&'a self, pool_id: &'a str) -> BoxFuture<'a, Option<LoadSample>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushRejected {
    #[error("unknown pool")]
    UnknownPool,
    #[error("sample is older than the latest one at {latest}")]
    OutOfOrder { latest: Timestamp },
}

/// In-memory latest-sample-per-pool registry fed by pushes.
#[derive(Clone, Default)]
pub struct SampleRegistry {
    samples: Arc<RwLock<HashMap<PoolId, Option<LoadSample>>>>,
}

impl SampleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept samples for a pool.
    pub async fn register(&self, pool_id: &str) {
        let mut samples = self.samples.write().await;
        samples.entry(pool_id.to_string()).or_insert(None);
        debug!(pool = %pool_id, "registered for sample intake");
    }

    pub async fn is_registered(&self, pool_id: &str) -> bool {
        self.samples.read().await.contains_key(pool_id)
    }

    /// Store a sample, keeping only the newest per pool.
    pub async fn push(&self, pool_id: &str, sample: LoadSample) -> Result<(), PushRejected> {
        let mut samples = self.samples.write().await;
        let slot = samples.get_mut(pool_id).ok_or(PushRejected::UnknownPool)?;
        if let Some(latest) = slot
            && sample.timestamp < latest.timestamp
        {
            return Err(PushRejected::OutOfOrder {
                latest: latest.timestamp,
            });
        }
        *slot = Some(sample);
        Ok(())
    }

    pub async fn latest(&self, pool_id: &str) -> Option<LoadSample> {
        self.samples.read().await.get(pool_id).copied().flatten()
    }
}

impl SampleSource for SampleRegistry {
    fn latest_sample<'a>(&'a self, pool_id: &'a str) -> BoxFuture<'a, Option<LoadSample>> {
        Box::pin(self.latest(pool_id))
    }
}
