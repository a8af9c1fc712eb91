use crate::types::{ApplicationId, BlockchainId, LoadBalancerId};

/// Application Authentication Token, the credential with which the gateway
/// signs relays on behalf of an application. Opaque to the dispatcher; the
/// relay sender consumes it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Aat {
    pub version: String,
    pub app_public_key: String,
    pub client_public_key: String,
    pub signature: String,
}

/// Per-application gateway settings, owned by the configuration store.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ApplicationSettings {
    /// Shared secret required from the client when `secret_key_required`.
    pub secret_key: Option<String>,
    pub secret_key_required: bool,
    /// Blockchain aliases the client may select via the Host header.
    /// An empty list forbids the override.
    pub whitelisted_blockchains: Vec<String>,
}

/// Immutable application record fetched from the repository and cached for
/// 60 seconds.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub public_key: String,
    pub free_tier_aat: Aat,
    /// Gateway-owned AAT. When present it is preferred over the free-tier
    /// one; the choice is static per application.
    pub gateway_aat: Option<Aat>,
    pub chains: Vec<BlockchainId>,
    pub settings: ApplicationSettings,
}

impl Application {
    /// The AAT every relay for this application is signed with.
    pub fn aat(&self) -> &Aat {
        self.gateway_aat.as_ref().unwrap_or(&self.free_tier_aat)
    }
}

/// A load balancer multiplexes one public endpoint onto several
/// applications; each request resolves to one of them uniformly at random.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LoadBalancer {
    pub id: LoadBalancerId,
    pub application_ids: Vec<ApplicationId>,
}
