use gateway_primitives::errors::ClientError;
use gateway_primitives::types::RequestId;
use rand::Rng;
use tokio_util::sync::CancellationToken;

/// Per-request context handed in by the ingress: the already-extracted
/// headers and the cancellation handle of the client connection. Distinct
/// from the process-wide configuration, which is immutable and shared.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: RequestId,
    /// Blockchain alias taken from the URL path prefix.
    pub path_alias: String,
    /// Host-header alias override, honored only when the application
    /// whitelists it.
    pub host_alias: Option<String>,
    pub origin: Option<String>,
    pub user_agent: Option<String>,
    /// Secret key presented by the client, checked against the
    /// application's settings.
    pub secret_key: Option<String>,
    /// Cancelled when the caller disconnects; short-circuits retries.
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(path_alias: &str) -> RequestContext {
        RequestContext {
            request_id: format!("{:032x}", rand::thread_rng().r#gen::<u128>()),
            path_alias: path_alias.to_owned(),
            host_alias: None,
            origin: None,
            user_agent: None,
            secret_key: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Clients identifying as `pocket-debug` get verbose per-request logs.
    pub fn verbose(&self) -> bool {
        self.user_agent.as_deref().is_some_and(|agent| agent.contains("pocket-debug"))
    }
}

pub(crate) fn check_payload_size(body: &[u8], limit: usize) -> Result<(), ClientError> {
    if body.len() > limit {
        return Err(ClientError::PayloadTooLarge { limit, actual: body.len() });
    }
    Ok(())
}

/// Extracts the JSON-RPC method for metrics; the first element's method
/// for batches.
pub(crate) fn parse_method(body: &[u8]) -> Result<String, ClientError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|err| ClientError::MalformedRequest(err.to_string()))?;
    let request = match value.as_array() {
        Some(batch) => batch
            .first()
            .ok_or_else(|| ClientError::MalformedRequest("empty batch".to_owned()))?,
        None => &value,
    };
    request
        .get("method")
        .and_then(|method| method.as_str())
        .map(str::to_owned)
        .ok_or_else(|| ClientError::MalformedRequest("missing method".to_owned()))
}
