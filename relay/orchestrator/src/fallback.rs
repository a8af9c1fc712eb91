use gateway_configs::FALLBACK_TIMEOUT;
use gateway_primitives::errors::UpstreamError;
use gateway_primitives::relay::RelayResponse;

/// Last-resort delivery of a relay body to a chain's alternative
/// centralized backend.
#[async_trait::async_trait]
pub trait FallbackSender: Send + Sync {
    async fn post(&self, url: &str, body: &[u8]) -> Result<RelayResponse, UpstreamError>;
}

/// Plain HTTP POST with the fallback timeout.
pub struct HttpFallback {
    client: reqwest::Client,
}

impl HttpFallback {
    pub fn new() -> HttpFallback {
        HttpFallback { client: reqwest::Client::new() }
    }
}

impl Default for HttpFallback {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl FallbackSender for HttpFallback {
    async fn post(&self, url: &str, body: &[u8]) -> Result<RelayResponse, UpstreamError> {
        let response = self
            .client
            .post(url)
            .timeout(FALLBACK_TIMEOUT.unsigned_abs())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    UpstreamError::Timeout(FALLBACK_TIMEOUT.whole_milliseconds() as u64)
                } else {
                    UpstreamError::RelayFailed { node: None, message: err.to_string() }
                }
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::RelayFailed {
                node: None,
                message: format!("fallback backend answered {status}"),
            });
        }
        let payload = response
            .bytes()
            .await
            .map_err(|err| UpstreamError::RelayFailed { node: None, message: err.to_string() })?;
        Ok(RelayResponse { payload: payload.to_vec() })
    }
}
