//! The relay orchestrator: resolves the application (directly or through a
//! load balancer), derives the blockchain and method from the request,
//! filters the session through the sync and chain checks, cherry-picks a
//! node, dispatches with exclusion-and-retry, and falls back to an
//! alternative backend when the decentralized path is exhausted.

mod fallback;
mod orchestrator;
mod repositories;
mod request;

pub mod testonly;

pub use fallback::{FallbackSender, HttpFallback};
pub use orchestrator::RelayOrchestrator;
pub use repositories::{
    ApplicationRepository, BlockchainRegistry, BlockchainRepository, CachedRecords,
    RepositoryError, choose_verified_application,
};
pub use request::RequestContext;
