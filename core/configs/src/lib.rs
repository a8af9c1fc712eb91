//! Gateway process configuration, read once at start, plus the
//! configuration tuner deriving transient per-purpose relay configurations.

use gateway_primitives::relay::RelayConfig;
use gateway_time::Duration;

mod validate;

pub use validate::validate_config;

/// Dispatch timeout of sync/chain check probes.
pub const PROBE_TIMEOUT: Duration = Duration::milliseconds(5000);

/// Timeout of the direct POST to a chain's alternative backend.
pub const FALLBACK_TIMEOUT: Duration = Duration::milliseconds(10000);

/// Nodes a consensus challenge relay is dispatched to.
pub const CONSENSUS_CHALLENGE_NODE_COUNT: u64 = 5;

/// Default cap on relay attempts per client request.
pub const DEFAULT_MAX_RELAY_ATTEMPTS: u32 = 5;

/// Default cap on the size of a client JSON-RPC body.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 100 * 1024;

/// Connection parameters of the service-node network, taken verbatim from
/// the `pocketConfiguration` environment value.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PocketConfiguration {
    /// Dispatcher URLs used to obtain sessions.
    pub dispatchers: Vec<String>,
    /// Maximum number of sessions kept dispatched at once.
    pub max_sessions: u64,
    pub consensus_node_count: u64,
    pub request_timeout_ms: u64,
    pub accept_disputed_responses: bool,
    /// How many blocks a session spans.
    pub session_block_frequency: u64,
    pub block_time_ms: u64,
    pub max_session_refresh_retries: u32,
    pub validate_relay_responses: bool,
    pub reject_self_signed_certificates: bool,
}

impl Default for PocketConfiguration {
    fn default() -> Self {
        Self {
            dispatchers: vec!["https://dispatch.pokt.network".to_owned()],
            max_sessions: 10000,
            consensus_node_count: 5,
            request_timeout_ms: 12000,
            accept_disputed_responses: false,
            session_block_frequency: 4,
            block_time_ms: 900000,
            max_session_refresh_retries: 1,
            validate_relay_responses: true,
            reject_self_signed_certificates: false,
        }
    }
}

impl PocketConfiguration {
    /// Configuration of a plain client relay.
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            request_timeout: Duration::milliseconds(self.request_timeout_ms as i64),
            consensus_node_count: 0,
            accept_disputed_responses: self.accept_disputed_responses,
            validate_relay_responses: self.validate_relay_responses,
            reject_self_signed_certificates: self.reject_self_signed_certificates,
        }
    }

    /// Timeout-shortened configuration for sync/chain check probes. Other
    /// parameters are inherited.
    pub fn probe_config(&self) -> RelayConfig {
        RelayConfig { request_timeout: PROBE_TIMEOUT, ..self.relay_config() }
    }

    /// Configuration of the fire-and-forget consensus challenge dispatched
    /// when too few nodes pass the sync check.
    pub fn consensus_config(&self) -> RelayConfig {
        RelayConfig {
            request_timeout: PROBE_TIMEOUT,
            consensus_node_count: CONSENSUS_CHALLENGE_NODE_COUNT,
            accept_disputed_responses: false,
            ..self.relay_config()
        }
    }
}

/// Process-wide gateway configuration. Read from the environment once at
/// start and passed around by immutable reference.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GatewayConfig {
    /// Gateway-level shared secret; applications may additionally require
    /// their own.
    pub secret_key: String,
    pub database_encryption_key: String,
    /// Identifier of this gateway process in multi-process deployments.
    pub process_uid: String,
    /// Endpoint of the short-TTL cache backend.
    pub cache_endpoint: String,
    /// Path of the relational store receiving relay metrics.
    pub metrics_database_path: String,
    pub max_relay_attempts: u32,
    pub max_payload_bytes: usize,
    pub pocket: PocketConfiguration,
}

fn require_env(name: &str) -> anyhow::Result<String> {
    std::env::var(name).map_err(|_| anyhow::anyhow!("environment value {name} is not set"))
}

impl GatewayConfig {
    /// Reads the configuration from the environment. `secretKey`,
    /// `databaseEncryptionKey` and `processUID` are required;
    /// `pocketConfiguration` is a JSON value with defaults applied
    /// per-field.
    pub fn from_env() -> anyhow::Result<GatewayConfig> {
        let pocket = match std::env::var("pocketConfiguration") {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|err| anyhow::anyhow!("pocketConfiguration is not valid JSON: {err}"))?,
            Err(_) => PocketConfiguration::default(),
        };
        let config = GatewayConfig {
            secret_key: require_env("secretKey")?,
            database_encryption_key: require_env("databaseEncryptionKey")?,
            process_uid: require_env("processUID")?,
            cache_endpoint: std::env::var("cacheEndpoint")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_owned()),
            metrics_database_path: std::env::var("metricsDatabasePath")
                .unwrap_or_else(|_| "relay-metrics.sqlite".to_owned()),
            max_relay_attempts: match std::env::var("maxRelayAttempts") {
                Ok(raw) => raw
                    .parse()
                    .map_err(|_| anyhow::anyhow!("maxRelayAttempts is not a number: {raw}"))?,
                Err(_) => DEFAULT_MAX_RELAY_ATTEMPTS,
            },
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            pocket,
        };
        validate_config(&config)?;
        Ok(config)
    }

    /// A valid configuration for tests; never reads the environment.
    pub fn test() -> GatewayConfig {
        GatewayConfig {
            secret_key: "test-secret".to_owned(),
            database_encryption_key: "test-encryption-key".to_owned(),
            process_uid: "test-process".to_owned(),
            cache_endpoint: "redis://127.0.0.1:6379".to_owned(),
            metrics_database_path: ":memory:".to_owned(),
            max_relay_attempts: DEFAULT_MAX_RELAY_ATTEMPTS,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            pocket: PocketConfiguration::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pocket_configuration_defaults_apply_per_field() {
        let pocket: PocketConfiguration =
            serde_json::from_str(r#"{"consensusNodeCount":7,"requestTimeoutMs":3000}"#).unwrap();
        assert_eq!(pocket.consensus_node_count, 7);
        assert_eq!(pocket.request_timeout_ms, 3000);
        assert_eq!(pocket.session_block_frequency, 4);
    }

    #[test]
    fn probe_config_shortens_only_the_timeout() {
        let pocket = PocketConfiguration::default();
        let relay = pocket.relay_config();
        let probe = pocket.probe_config();
        assert_eq!(probe.request_timeout, Duration::milliseconds(5000));
        assert_eq!(probe.accept_disputed_responses, relay.accept_disputed_responses);
        assert_eq!(probe.consensus_node_count, 0);
    }

    #[test]
    fn consensus_config_rejects_disputed_responses() {
        let mut pocket = PocketConfiguration::default();
        pocket.accept_disputed_responses = true;
        let consensus = pocket.consensus_config();
        assert_eq!(consensus.consensus_node_count, CONSENSUS_CHALLENGE_NODE_COUNT);
        assert!(!consensus.accept_disputed_responses);
    }
}
