use crate::GatewayConfig;

/// Validate a `GatewayConfig` before the process starts serving traffic.
/// This function does not panic; every violated condition is collected and
/// reported in one error.
pub fn validate_config(config: &GatewayConfig) -> anyhow::Result<()> {
    let mut validator = ConfigValidator::new(config);
    tracing::info!(target: "config", "validating gateway configuration");
    validator.validate()
}

struct ConfigValidator<'a> {
    config: &'a GatewayConfig,
    errors: Vec<String>,
}

impl<'a> ConfigValidator<'a> {
    fn new(config: &'a GatewayConfig) -> Self {
        Self { config, errors: Vec::new() }
    }

    fn validate(&mut self) -> anyhow::Result<()> {
        self.validate_all_conditions();
        if self.errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("invalid gateway configuration: {}", self.errors.join("; "))
        }
    }

    fn validate_all_conditions(&mut self) {
        if self.config.secret_key.is_empty() {
            self.errors.push("secretKey should not be empty".to_owned());
        }
        if self.config.database_encryption_key.is_empty() {
            self.errors.push("databaseEncryptionKey should not be empty".to_owned());
        }
        if self.config.max_relay_attempts == 0 {
            self.errors.push("maxRelayAttempts should be greater than 0".to_owned());
        }
        if self.config.max_payload_bytes == 0 {
            self.errors.push("max payload size should be greater than 0".to_owned());
        }
        let pocket = &self.config.pocket;
        if pocket.dispatchers.is_empty() {
            self.errors.push("pocketConfiguration.dispatchers should not be empty".to_owned());
        }
        if pocket.request_timeout_ms == 0 {
            self.errors.push("pocketConfiguration.requestTimeoutMs should not be 0".to_owned());
        }
        if pocket.consensus_node_count % 2 == 0 {
            let error_message = format!(
                "pocketConfiguration.consensusNodeCount is {}, consensus needs an odd node count",
                pocket.consensus_node_count
            );
            self.errors.push(error_message);
        }
        if pocket.block_time_ms == 0 || pocket.session_block_frequency == 0 {
            let error_message = format!(
                "pocketConfiguration block timing should be greater than 0, but blockTimeMs is {} and sessionBlockFrequency is {}",
                pocket.block_time_ms, pocket.session_block_frequency
            );
            self.errors.push(error_message);
        }
    }
}
