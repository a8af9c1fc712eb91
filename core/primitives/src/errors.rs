use crate::types::{ApplicationId, LoadBalancerId, NodePublicKey};

/// Request was invalid or the referenced configuration does not exist.
/// Surfaced to the client immediately, never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("malformed JSON-RPC request: {0}")]
    MalformedRequest(String),
    #[error("payload of {actual} bytes exceeds the limit of {limit} bytes")]
    PayloadTooLarge { limit: usize, actual: usize },
    #[error("unknown blockchain \"{0}\"")]
    UnknownBlockchain(String),
    #[error("unknown application {0}")]
    UnknownApplication(ApplicationId),
    #[error("unknown load balancer {0}")]
    UnknownLoadBalancer(LoadBalancerId),
    #[error("load balancer {0} resolves to no registered application")]
    EmptyLoadBalancer(LoadBalancerId),
    #[error("secret key required and does not match")]
    SecretKeyMismatch,
    /// The repositories themselves were unreachable while resolving the
    /// application. The only internal failure that surfaces to the client.
    #[error("application could not be resolved: {0}")]
    ResolutionFailed(String),
}

/// A single relay attempt failed. Recovered locally by excluding the node
/// and retrying.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    #[error("relay failed: {message}")]
    RelayFailed { node: Option<NodePublicKey>, message: String },
    #[error("session expired")]
    SessionExpired,
    #[error("relay timed out after {0}ms")]
    Timeout(u64),
    #[error("no healthy nodes available")]
    NoHealthyNodes,
}

impl UpstreamError {
    /// The node the failure is attributed to, when known.
    pub fn service_node(&self) -> Option<&NodePublicKey> {
        match self {
            UpstreamError::RelayFailed { node, .. } => node.as_ref(),
            _ => None,
        }
    }

    pub fn is_session_expiry(&self) -> bool {
        matches!(self, UpstreamError::SessionExpired)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, UpstreamError::Timeout(_))
    }
}

/// Terminal outcome of a relay request, as seen by the ingress layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    /// Every attempt failed and the fallback was unavailable or failed too.
    #[error("all {attempts} relay attempts failed: {last}")]
    Exhausted { attempts: u32, last: String, timed_out: bool },
}

impl RelayError {
    /// HTTP status the ingress maps this error to.
    pub fn status_code(&self) -> u16 {
        match self {
            RelayError::Client(err) => match err {
                ClientError::MalformedRequest(_)
                | ClientError::PayloadTooLarge { .. }
                | ClientError::UnknownBlockchain(_) => 400,
                ClientError::UnknownApplication(_)
                | ClientError::UnknownLoadBalancer(_)
                | ClientError::EmptyLoadBalancer(_)
                | ClientError::SecretKeyMismatch => 403,
                ClientError::ResolutionFailed(_) => 500,
            },
            RelayError::Upstream(_) => 500,
            RelayError::Exhausted { timed_out, .. } => {
                if *timed_out {
                    504
                } else {
                    500
                }
            }
        }
    }

    /// Stable label for the relay result counter.
    pub fn metrics_label(&self) -> &'static str {
        match self {
            RelayError::Client(_) => "client_error",
            RelayError::Upstream(UpstreamError::NoHealthyNodes) => "no_healthy_nodes",
            RelayError::Upstream(_) => "upstream_error",
            RelayError::Exhausted { .. } => "exhausted",
        }
    }
}
