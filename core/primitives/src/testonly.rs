//! Scripted implementations of the relay seam for tests. Not for
//! production use.

use crate::application::{Aat, Application, ApplicationSettings};
use crate::blockchain::{BlockchainDescriptor, SyncCheckOptions};
use crate::errors::UpstreamError;
use crate::relay::{RelayAttempt, RelayResponse, RelaySender};
use crate::session::{Session, SessionNode};
use crate::types::{BlockchainId, BlockHeight, NodePublicKey};
use parking_lot::Mutex;
use std::collections::HashMap;

pub fn test_aat(app_public_key: &str) -> Aat {
    Aat {
        version: "0.0.1".to_owned(),
        app_public_key: app_public_key.to_owned(),
        client_public_key: "client".to_owned(),
        signature: "00".to_owned(),
    }
}

pub fn test_node(public_key: &str) -> SessionNode {
    SessionNode {
        public_key: public_key.to_owned(),
        service_url: format!("https://{public_key}.example.net:443"),
        chains: vec!["0021".to_owned()],
    }
}

pub fn test_application(id: &str) -> Application {
    Application {
        id: id.to_owned(),
        public_key: format!("{id}-pk"),
        free_tier_aat: test_aat(&format!("{id}-pk")),
        gateway_aat: None,
        chains: vec!["0021".to_owned()],
        settings: ApplicationSettings::default(),
    }
}

/// Ethereum-mainnet-shaped descriptor used across the dispatcher tests.
pub fn test_blockchain() -> BlockchainDescriptor {
    BlockchainDescriptor {
        id: "0021".to_owned(),
        ticker: "ETH".to_owned(),
        network_id: "1".to_owned(),
        aliases: vec!["eth-mainnet".to_owned()],
        sync_check: Some(SyncCheckOptions {
            payload: r#"{"method":"eth_blockNumber","params":[],"id":1,"jsonrpc":"2.0"}"#
                .to_owned(),
            allowance: 1,
        }),
        chain_id_check: Some(
            r#"{"method":"eth_chainId","params":[],"id":1,"jsonrpc":"2.0"}"#.to_owned(),
        ),
        log_limit: None,
        alt_runtime_url: None,
    }
}

/// One relay recorded by the scripted sender.
#[derive(Debug, Clone)]
pub struct SentRelay {
    pub blockchain: BlockchainId,
    pub node: Option<NodePublicKey>,
    /// `method` field of the JSON-RPC payload, first element for batches.
    pub method: String,
    pub consensus: bool,
    pub payload: Vec<u8>,
}

struct Inner {
    session: Session,
    heights: HashMap<NodePublicKey, BlockHeight>,
    reported_chains: HashMap<NodePublicKey, String>,
    failing: HashMap<NodePublicKey, UpstreamError>,
    sends: Vec<SentRelay>,
    session_fetches: usize,
    session_refreshes: usize,
    yield_on_send: bool,
}

/// Suspends the calling future exactly once. Lets concurrency tests force
/// an interleaving point at the network boundary without a runtime timer.
struct YieldOnce(bool);

impl std::future::Future for YieldOnce {
    type Output = ();

    fn poll(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<()> {
        if self.0 {
            self.0 = false;
            cx.waker().wake_by_ref();
            std::task::Poll::Pending
        } else {
            std::task::Poll::Ready(())
        }
    }
}

/// Relay sender whose behavior is scripted per node: block heights and
/// chain IDs for probes, injected failures for client relays. Every send is
/// recorded for assertions.
pub struct ScriptedRelaySender {
    inner: Mutex<Inner>,
}

impl ScriptedRelaySender {
    pub fn new(nodes: Vec<SessionNode>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                session: Session { nodes },
                heights: HashMap::new(),
                reported_chains: HashMap::new(),
                failing: HashMap::new(),
                sends: Vec::new(),
                session_fetches: 0,
                session_refreshes: 0,
                yield_on_send: false,
            }),
        }
    }

    /// Makes every `send` suspend once before answering, so concurrent
    /// relays interleave at the network boundary.
    pub fn set_yield_on_send(&self, yield_on_send: bool) {
        self.inner.lock().yield_on_send = yield_on_send;
    }

    pub fn set_height(&self, node: &str, height: BlockHeight) {
        self.inner.lock().heights.insert(node.to_owned(), height);
    }

    pub fn set_reported_chain(&self, node: &str, chain_id_hex: &str) {
        self.inner.lock().reported_chains.insert(node.to_owned(), chain_id_hex.to_owned());
    }

    /// All subsequent relays through `node` fail with `err`.
    pub fn fail_node(&self, node: &str, err: UpstreamError) {
        self.inner.lock().failing.insert(node.to_owned(), err);
    }

    pub fn heal_node(&self, node: &str) {
        self.inner.lock().failing.remove(node);
    }

    pub fn replace_session(&self, nodes: Vec<SessionNode>) {
        self.inner.lock().session = Session { nodes };
    }

    pub fn sends(&self) -> Vec<SentRelay> {
        self.inner.lock().sends.clone()
    }

    pub fn sends_with_method(&self, method: &str) -> usize {
        self.inner.lock().sends.iter().filter(|sent| sent.method == method).count()
    }

    pub fn session_fetches(&self) -> usize {
        self.inner.lock().session_fetches
    }

    pub fn session_refreshes(&self) -> usize {
        self.inner.lock().session_refreshes
    }
}

/// `method` of a JSON-RPC body; the first element's method for batches.
pub fn jsonrpc_method(payload: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
    let request = if let Some(batch) = value.as_array() { batch.first()? } else { &value };
    request.get("method")?.as_str().map(str::to_owned)
}

fn jsonrpc_result(result: &str) -> RelayResponse {
    RelayResponse {
        payload: format!(r#"{{"id":1,"jsonrpc":"2.0","result":"{result}"}}"#).into_bytes(),
    }
}

#[async_trait::async_trait]
impl RelaySender for ScriptedRelaySender {
    async fn current_session(
        &self,
        _app: &Application,
        _chain: &BlockchainId,
    ) -> Result<Session, UpstreamError> {
        let mut inner = self.inner.lock();
        inner.session_fetches += 1;
        Ok(inner.session.clone())
    }

    async fn refresh_session(
        &self,
        _app: &Application,
        _chain: &BlockchainId,
    ) -> Result<Session, UpstreamError> {
        let mut inner = self.inner.lock();
        inner.session_refreshes += 1;
        Ok(inner.session.clone())
    }

    async fn send(&self, attempt: RelayAttempt<'_>) -> Result<RelayResponse, UpstreamError> {
        if self.inner.lock().yield_on_send {
            YieldOnce(true).await;
        }
        let method = jsonrpc_method(attempt.payload).unwrap_or_default();
        let node_key = attempt.node.map(|node| node.public_key.clone());
        let mut inner = self.inner.lock();
        inner.sends.push(SentRelay {
            blockchain: attempt.blockchain.clone(),
            node: node_key.clone(),
            method: method.clone(),
            consensus: attempt.consensus,
            payload: attempt.payload.to_vec(),
        });
        if attempt.consensus {
            return Ok(jsonrpc_result("consensus"));
        }
        let Some(node_key) = node_key else {
            return Err(UpstreamError::RelayFailed {
                node: None,
                message: "no node addressed".to_owned(),
            });
        };
        if let Some(err) = inner.failing.get(&node_key) {
            return Err(err.clone());
        }
        match method.as_str() {
            "eth_blockNumber" => match inner.heights.get(&node_key) {
                Some(height) => Ok(jsonrpc_result(&format!("0x{height:x}"))),
                None => Err(UpstreamError::RelayFailed {
                    node: Some(node_key),
                    message: "no height scripted".to_owned(),
                }),
            },
            "eth_chainId" => {
                let reported = inner
                    .reported_chains
                    .get(&node_key)
                    .cloned()
                    .unwrap_or_else(|| "0x1".to_owned());
                Ok(jsonrpc_result(&reported))
            }
            _ => Ok(jsonrpc_result("ok")),
        }
    }
}
