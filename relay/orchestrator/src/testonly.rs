//! Scripted repositories and fallback backends for tests.

use crate::fallback::FallbackSender;
use crate::repositories::{ApplicationRepository, BlockchainRepository, RepositoryError};
use gateway_primitives::application::{Application, LoadBalancer};
use gateway_primitives::blockchain::BlockchainDescriptor;
use gateway_primitives::errors::UpstreamError;
use gateway_primitives::relay::RelayResponse;
use parking_lot::Mutex;
use std::collections::HashMap;

/// In-memory repository with per-method call counters.
#[derive(Default)]
pub struct StaticRepository {
    applications: Mutex<HashMap<String, Application>>,
    load_balancers: Mutex<HashMap<String, LoadBalancer>>,
    blockchains: Mutex<Vec<BlockchainDescriptor>>,
    application_calls: Mutex<usize>,
    load_balancer_calls: Mutex<usize>,
    failing: Mutex<bool>,
}

impl StaticRepository {
    pub fn insert_application(&self, app: Application) {
        self.applications.lock().insert(app.id.clone(), app);
    }

    pub fn insert_load_balancer(&self, lb: LoadBalancer) {
        self.load_balancers.lock().insert(lb.id.clone(), lb);
    }

    pub fn insert_blockchain(&self, blockchain: BlockchainDescriptor) {
        self.blockchains.lock().push(blockchain);
    }

    pub fn application_calls(&self) -> usize {
        *self.application_calls.lock()
    }

    pub fn load_balancer_calls(&self) -> usize {
        *self.load_balancer_calls.lock()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    fn check_failing(&self) -> Result<(), RepositoryError> {
        if *self.failing.lock() {
            return Err(RepositoryError::Unavailable("injected failure".to_owned()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ApplicationRepository for StaticRepository {
    async fn application(&self, id: &str) -> Result<Option<Application>, RepositoryError> {
        *self.application_calls.lock() += 1;
        self.check_failing()?;
        Ok(self.applications.lock().get(id).cloned())
    }

    async fn load_balancer(&self, id: &str) -> Result<Option<LoadBalancer>, RepositoryError> {
        *self.load_balancer_calls.lock() += 1;
        self.check_failing()?;
        Ok(self.load_balancers.lock().get(id).cloned())
    }
}

#[async_trait::async_trait]
impl BlockchainRepository for StaticRepository {
    async fn blockchains(&self) -> Result<Vec<BlockchainDescriptor>, RepositoryError> {
        self.check_failing()?;
        Ok(self.blockchains.lock().clone())
    }
}

/// Fallback backend answering from a script instead of the network.
pub struct ScriptedFallback {
    response: Mutex<Result<RelayResponse, UpstreamError>>,
    posts: Mutex<Vec<(String, Vec<u8>)>>,
}

impl ScriptedFallback {
    pub fn answering(payload: &[u8]) -> ScriptedFallback {
        ScriptedFallback {
            response: Mutex::new(Ok(RelayResponse { payload: payload.to_vec() })),
            posts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(err: UpstreamError) -> ScriptedFallback {
        ScriptedFallback { response: Mutex::new(Err(err)), posts: Mutex::new(Vec::new()) }
    }

    pub fn posts(&self) -> Vec<(String, Vec<u8>)> {
        self.posts.lock().clone()
    }
}

#[async_trait::async_trait]
impl FallbackSender for ScriptedFallback {
    async fn post(&self, url: &str, body: &[u8]) -> Result<RelayResponse, UpstreamError> {
        self.posts.lock().push((url.to_owned(), body.to_vec()));
        self.response.lock().clone()
    }
}
