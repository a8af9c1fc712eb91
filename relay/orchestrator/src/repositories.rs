use gateway_cache::{Cache, keys};
use gateway_primitives::application::{Application, LoadBalancer};
use gateway_primitives::blockchain::BlockchainDescriptor;
use gateway_primitives::errors::{ClientError, RelayError};
use rand::seq::SliceRandom;
use rand::thread_rng;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Read-only store of application and load-balancer records. Backed by a
/// persistent database outside the dispatcher core.
#[async_trait::async_trait]
pub trait ApplicationRepository: Send + Sync {
    async fn application(&self, id: &str) -> Result<Option<Application>, RepositoryError>;

    async fn load_balancer(&self, id: &str) -> Result<Option<LoadBalancer>, RepositoryError>;
}

/// Read-only store of blockchain descriptors, loaded once at startup.
#[async_trait::async_trait]
pub trait BlockchainRepository: Send + Sync {
    async fn blockchains(&self) -> Result<Vec<BlockchainDescriptor>, RepositoryError>;
}

/// Repository access with a 60 s cache in front. A cache outage degrades to
/// a miss; only a repository outage surfaces.
pub struct CachedRecords {
    cache: Arc<dyn Cache>,
    repository: Arc<dyn ApplicationRepository>,
}

impl CachedRecords {
    pub fn new(cache: Arc<dyn Cache>, repository: Arc<dyn ApplicationRepository>) -> CachedRecords {
        CachedRecords { cache, repository }
    }

    pub async fn application(&self, id: &str) -> Result<Option<Application>, RepositoryError> {
        let key = keys::application(id);
        if let Some(app) = self.cached(&key).await {
            return Ok(Some(app));
        }
        let Some(app) = self.repository.application(id).await? else {
            return Ok(None);
        };
        self.store(&key, &app).await;
        Ok(Some(app))
    }

    pub async fn load_balancer(&self, id: &str) -> Result<Option<LoadBalancer>, RepositoryError> {
        let key = keys::load_balancer(id);
        if let Some(lb) = self.cached(&key).await {
            return Ok(Some(lb));
        }
        let Some(lb) = self.repository.load_balancer(id).await? else {
            return Ok(None);
        };
        self.store(&key, &lb).await;
        Ok(Some(lb))
    }

    async fn cached<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.cache.get(key).await {
            Ok(found) => found?,
            Err(err) => {
                tracing::warn!(target: "relayer", key, ?err, "record cache read failed");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::warn!(target: "relayer", key, ?err, "cached record is corrupt");
                None
            }
        }
    }

    async fn store<T: serde::Serialize>(&self, key: &str, record: &T) {
        let raw = match serde_json::to_string(record) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::error!(target: "relayer", key, ?err, "record does not serialize");
                return;
            }
        };
        if let Err(err) = self.cache.set(key, &raw, keys::CONFIG_RECORD_TTL).await {
            tracing::warn!(target: "relayer", key, ?err, "record cache write failed");
        }
    }
}

/// Resolves one of a load balancer's applications, uniformly at random
/// among those verified to exist. References to applications missing from
/// the repository are dropped silently; a load balancer with no surviving
/// application is a terminal configuration error.
pub async fn choose_verified_application(
    records: &CachedRecords,
    lb: &LoadBalancer,
) -> Result<Application, RelayError> {
    let mut verified = Vec::with_capacity(lb.application_ids.len());
    for id in &lb.application_ids {
        match records.application(id).await {
            Ok(Some(app)) => verified.push(app),
            Ok(None) => {
                tracing::debug!(target: "relayer", lb = %lb.id, app = %id, "dropping dangling application reference")
            }
            Err(err) => {
                return Err(ClientError::ResolutionFailed(err.to_string()).into());
            }
        }
    }
    verified
        .choose(&mut thread_rng())
        .cloned()
        .ok_or_else(|| ClientError::EmptyLoadBalancer(lb.id.clone()).into())
}

/// All known blockchains, indexed by id and by every path alias.
pub struct BlockchainRegistry {
    by_name: HashMap<String, Arc<BlockchainDescriptor>>,
}

impl BlockchainRegistry {
    pub async fn load(repository: &dyn BlockchainRepository) -> Result<Self, RepositoryError> {
        let blockchains = repository.blockchains().await?;
        tracing::info!(target: "relayer", count = blockchains.len(), "loaded blockchain descriptors");
        Ok(Self::from_descriptors(blockchains))
    }

    pub fn from_descriptors(blockchains: Vec<BlockchainDescriptor>) -> Self {
        let mut by_name = HashMap::new();
        for blockchain in blockchains {
            let blockchain = Arc::new(blockchain);
            by_name.insert(blockchain.id.clone(), blockchain.clone());
            for alias in &blockchain.aliases {
                by_name.insert(alias.clone(), blockchain.clone());
            }
        }
        BlockchainRegistry { by_name }
    }

    /// Looks a chain up by id or alias.
    pub fn resolve(&self, name: &str) -> Option<Arc<BlockchainDescriptor>> {
        self.by_name.get(name).cloned()
    }
}
