use crate::fallback::FallbackSender;
use crate::repositories::{
    ApplicationRepository, BlockchainRegistry, CachedRecords, choose_verified_application,
};
use crate::request::{RequestContext, check_payload_size, parse_method};
use gateway_cache::Cache;
use gateway_checks::{ChainChecker, ProbeContext, SyncChecker};
use gateway_configs::GatewayConfig;
use gateway_metrics::{MetricsRecorder, RelayMetric};
use gateway_picker::CherryPicker;
use gateway_primitives::application::Application;
use gateway_primitives::blockchain::BlockchainDescriptor;
use gateway_primitives::errors::{ClientError, RelayError, UpstreamError};
use gateway_primitives::relay::{RelayAttempt, RelayResponse, RelaySender};
use gateway_primitives::session::SessionNode;
use gateway_primitives::types::NodePublicKey;
use gateway_time::{Clock, Duration};
use std::collections::HashSet;
use std::sync::Arc;

/// Coordinates one client relay end to end. Holds only process-wide state;
/// everything request-scoped travels through `RequestContext`.
pub struct RelayOrchestrator {
    config: GatewayConfig,
    clock: Clock,
    records: CachedRecords,
    blockchains: BlockchainRegistry,
    relay_sender: Arc<dyn RelaySender>,
    picker: CherryPicker,
    sync_checker: SyncChecker,
    chain_checker: ChainChecker,
    recorder: Arc<MetricsRecorder>,
    fallback: Arc<dyn FallbackSender>,
}

impl RelayOrchestrator {
    pub fn new(
        config: GatewayConfig,
        clock: Clock,
        cache: Arc<dyn Cache>,
        repository: Arc<dyn ApplicationRepository>,
        blockchains: BlockchainRegistry,
        relay_sender: Arc<dyn RelaySender>,
        recorder: Arc<MetricsRecorder>,
        fallback: Arc<dyn FallbackSender>,
    ) -> RelayOrchestrator {
        RelayOrchestrator {
            records: CachedRecords::new(cache.clone(), repository),
            picker: CherryPicker::new(cache.clone()),
            sync_checker: SyncChecker::new(cache.clone(), recorder.clone(), clock.clone()),
            chain_checker: ChainChecker::new(cache, recorder.clone(), clock.clone()),
            config,
            clock,
            blockchains,
            relay_sender,
            recorder,
            fallback,
        }
    }

    /// Entry point for `POST /v1/lb/{lb_id}`.
    pub async fn relay_by_load_balancer(
        &self,
        lb_id: &str,
        body: &[u8],
        ctx: &RequestContext,
    ) -> Result<RelayResponse, RelayError> {
        let lb = self
            .records
            .load_balancer(lb_id)
            .await
            .map_err(|err| ClientError::ResolutionFailed(err.to_string()))?
            .ok_or_else(|| ClientError::UnknownLoadBalancer(lb_id.to_owned()))?;
        let app = choose_verified_application(&self.records, &lb).await?;
        self.relay_for_application(app, body, ctx).await
    }

    /// Entry point for `POST /v1/{app_id}`.
    pub async fn relay_by_application(
        &self,
        app_id: &str,
        body: &[u8],
        ctx: &RequestContext,
    ) -> Result<RelayResponse, RelayError> {
        let app = self
            .records
            .application(app_id)
            .await
            .map_err(|err| ClientError::ResolutionFailed(err.to_string()))?
            .ok_or_else(|| ClientError::UnknownApplication(app_id.to_owned()))?;
        self.relay_for_application(app, body, ctx).await
    }

    async fn relay_for_application(
        &self,
        app: Application,
        body: &[u8],
        ctx: &RequestContext,
    ) -> Result<RelayResponse, RelayError> {
        check_payload_size(body, self.config.max_payload_bytes)?;
        let method = parse_method(body)?;
        check_secret_key(&app, ctx)?;
        let blockchain = self.resolve_blockchain(&app, ctx)?;
        if ctx.verbose() {
            tracing::debug!(
                target: "relayer",
                request_id = %ctx.request_id,
                app = %app.id,
                chain = %blockchain.id,
                method,
                body_bytes = body.len(),
                "relaying",
            );
        }
        let probe_ctx = ProbeContext {
            blockchain: blockchain.clone(),
            application_id: app.id.clone(),
            app_public_key: app.public_key.clone(),
            aat: app.aat().clone(),
            request_id: ctx.request_id.clone(),
            relay_sender: self.relay_sender.clone(),
            probe_config: self.config.pocket.probe_config(),
            consensus_config: self.config.pocket.consensus_config(),
        };
        self.dispatch(&app, &blockchain, &method, body, ctx, &probe_ctx).await
    }

    /// The blockchain addressed by this request: the path alias, unless the
    /// application whitelists the Host-header alias the client sent.
    fn resolve_blockchain(
        &self,
        app: &Application,
        ctx: &RequestContext,
    ) -> Result<Arc<BlockchainDescriptor>, ClientError> {
        if let Some(host) = &ctx.host_alias {
            if app.settings.whitelisted_blockchains.iter().any(|alias| alias == host) {
                if let Some(blockchain) = self.blockchains.resolve(host) {
                    return Ok(blockchain);
                }
            }
        }
        self.blockchains
            .resolve(&ctx.path_alias)
            .ok_or_else(|| ClientError::UnknownBlockchain(ctx.path_alias.clone()))
    }

    async fn dispatch(
        &self,
        app: &Application,
        blockchain: &Arc<BlockchainDescriptor>,
        method: &str,
        body: &[u8],
        ctx: &RequestContext,
        probe_ctx: &ProbeContext,
    ) -> Result<RelayResponse, RelayError> {
        let relay_config = self.config.pocket.relay_config();
        let mut excluded: HashSet<NodePublicKey> = HashSet::new();
        let mut last_error: Option<UpstreamError> = None;
        let mut attempts_made = 0;

        for attempt in 1..=self.config.max_relay_attempts {
            if ctx.cancel.is_cancelled() {
                tracing::debug!(
                    target: "relayer",
                    request_id = %ctx.request_id,
                    attempt,
                    "caller disconnected, abandoning retries",
                );
                break;
            }
            let session = match self.relay_sender.current_session(app, &blockchain.id).await {
                Ok(session) => session,
                Err(err) => {
                    last_error = Some(err);
                    break;
                }
            };
            let nodes = self.sync_checker.filter(probe_ctx, session.nodes).await;
            let nodes = self.chain_checker.filter(probe_ctx, nodes).await;
            let nodes: Vec<SessionNode> =
                nodes.into_iter().filter(|node| !excluded.contains(&node.public_key)).collect();
            if nodes.is_empty() {
                break;
            }
            let node = match self.picker.pick(&blockchain.id, &nodes, &excluded).await {
                Ok(node) => node,
                Err(err) => {
                    last_error = Some(err);
                    break;
                }
            };

            attempts_made = attempt;
            let relay_start = self.clock.now_utc();
            let started = self.clock.now();
            let result = self
                .relay_sender
                .send(RelayAttempt {
                    blockchain: &blockchain.id,
                    payload: body,
                    path: "",
                    aat: app.aat(),
                    config: relay_config.clone(),
                    node: Some(&node),
                    consensus: false,
                })
                .await;
            let elapsed = Duration::try_from(self.clock.now() - started).unwrap_or(Duration::ZERO);

            match result {
                Ok(response) => {
                    self.recorder
                        .record(self.attempt_metric(
                            app,
                            blockchain,
                            method,
                            ctx,
                            Some(node.public_key.clone()),
                            relay_start,
                            elapsed,
                            200,
                            response.payload.len(),
                            None,
                            false,
                        ))
                        .await;
                    return Ok(response);
                }
                Err(err) => {
                    self.recorder
                        .record(self.attempt_metric(
                            app,
                            blockchain,
                            method,
                            ctx,
                            Some(node.public_key.clone()),
                            relay_start,
                            elapsed,
                            500,
                            0,
                            Some(err.to_string()),
                            false,
                        ))
                        .await;
                    tracing::debug!(
                        target: "relayer",
                        request_id = %ctx.request_id,
                        node = %node.public_key,
                        attempt,
                        %err,
                        "relay attempt failed, excluding node",
                    );
                    excluded.insert(node.public_key.clone());
                    if err.is_session_expiry() {
                        if let Err(refresh_err) =
                            self.relay_sender.refresh_session(app, &blockchain.id).await
                        {
                            tracing::warn!(
                                target: "relayer",
                                request_id = %ctx.request_id,
                                %refresh_err,
                                "session refresh failed",
                            );
                        }
                    }
                    last_error = Some(err);
                }
            }
        }

        self.fallback_or_error(app, blockchain, method, body, ctx, attempts_made, last_error).await
    }

    async fn fallback_or_error(
        &self,
        app: &Application,
        blockchain: &Arc<BlockchainDescriptor>,
        method: &str,
        body: &[u8],
        ctx: &RequestContext,
        attempts: u32,
        last_error: Option<UpstreamError>,
    ) -> Result<RelayResponse, RelayError> {
        let Some(url) = &blockchain.alt_runtime_url else {
            return Err(terminal_error(attempts, last_error));
        };

        let relay_start = self.clock.now_utc();
        let started = self.clock.now();
        let result = self.fallback.post(url, body).await;
        let elapsed = Duration::try_from(self.clock.now() - started).unwrap_or(Duration::ZERO);
        match result {
            Ok(response) => {
                tracing::info!(
                    target: "relayer",
                    request_id = %ctx.request_id,
                    chain = %blockchain.id,
                    "served from the fallback backend",
                );
                self.recorder
                    .record(self.attempt_metric(
                        app,
                        blockchain,
                        method,
                        ctx,
                        None,
                        relay_start,
                        elapsed,
                        200,
                        response.payload.len(),
                        None,
                        true,
                    ))
                    .await;
                Ok(response)
            }
            Err(err) => {
                self.recorder
                    .record(self.attempt_metric(
                        app,
                        blockchain,
                        method,
                        ctx,
                        None,
                        relay_start,
                        elapsed,
                        500,
                        0,
                        Some(err.to_string()),
                        true,
                    ))
                    .await;
                tracing::warn!(
                    target: "relayer",
                    request_id = %ctx.request_id,
                    chain = %blockchain.id,
                    %err,
                    "fallback backend failed",
                );
                // The node-path error is the meaningful one when it exists.
                Err(terminal_error(attempts, last_error.or(Some(err))))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn attempt_metric(
        &self,
        app: &Application,
        blockchain: &BlockchainDescriptor,
        method: &str,
        ctx: &RequestContext,
        service_node: Option<NodePublicKey>,
        relay_start: gateway_time::Utc,
        elapsed: Duration,
        result: u32,
        bytes: usize,
        error: Option<String>,
        fallback: bool,
    ) -> RelayMetric {
        RelayMetric {
            request_id: ctx.request_id.clone(),
            application_id: app.id.clone(),
            app_public_key: app.public_key.clone(),
            blockchain: blockchain.id.clone(),
            service_node,
            relay_start,
            elapsed,
            result,
            bytes,
            delivered: result == 200,
            fallback,
            method: method.to_owned(),
            error,
        }
    }
}

fn check_secret_key(app: &Application, ctx: &RequestContext) -> Result<(), ClientError> {
    if !app.settings.secret_key_required {
        return Ok(());
    }
    let Some(expected) = app.settings.secret_key.as_deref() else {
        return Ok(());
    };
    if ctx.secret_key.as_deref() == Some(expected) {
        Ok(())
    } else {
        Err(ClientError::SecretKeyMismatch)
    }
}

fn terminal_error(attempts: u32, last_error: Option<UpstreamError>) -> RelayError {
    match last_error {
        Some(err) if attempts > 0 => RelayError::Exhausted {
            attempts,
            timed_out: err.is_timeout(),
            last: err.to_string(),
        },
        Some(err) => RelayError::Upstream(err),
        None => RelayError::Upstream(UpstreamError::NoHealthyNodes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testonly::{ScriptedFallback, StaticRepository};
    use assert_matches::assert_matches;
    use gateway_cache::testonly::InMemoryCache;
    use gateway_metrics::MetricsBuffer;
    use gateway_primitives::blockchain::BlockchainDescriptor;
    use gateway_primitives::testonly::{
        ScriptedRelaySender, test_application, test_blockchain, test_node,
    };
    use gateway_time::FakeClock;

    const BODY: &[u8] = br#"{"method":"eth_getBalance","params":["0xabc","latest"],"id":1,"jsonrpc":"2.0"}"#;

    struct World {
        cache: Arc<InMemoryCache>,
        buffer: Arc<MetricsBuffer>,
        repository: Arc<StaticRepository>,
        sender: Arc<ScriptedRelaySender>,
        fallback: Arc<ScriptedFallback>,
        orchestrator: RelayOrchestrator,
    }

    fn world_with(blockchains: Vec<BlockchainDescriptor>, node_keys: &[&str]) -> World {
        let clock = FakeClock::default().clock();
        let cache = Arc::new(InMemoryCache::new(clock.clone()));
        let buffer = MetricsBuffer::new(1024);
        let recorder = Arc::new(MetricsRecorder::new(cache.clone(), buffer.clone()));
        let repository = Arc::new(StaticRepository::default());
        repository.insert_application(test_application("app-1"));
        let nodes: Vec<SessionNode> = node_keys.iter().map(|key| test_node(key)).collect();
        let sender = Arc::new(ScriptedRelaySender::new(nodes));
        for key in node_keys {
            sender.set_height(key, 100);
        }
        let fallback = Arc::new(ScriptedFallback::answering(b"fallback-payload"));
        let orchestrator = RelayOrchestrator::new(
            GatewayConfig::test(),
            clock,
            cache.clone(),
            repository.clone(),
            BlockchainRegistry::from_descriptors(blockchains),
            sender.clone(),
            recorder,
            fallback.clone(),
        );
        World { cache, buffer, repository, sender, fallback, orchestrator }
    }

    fn world(node_keys: &[&str]) -> World {
        world_with(vec![test_blockchain()], node_keys)
    }

    fn ctx() -> RequestContext {
        RequestContext::new("eth-mainnet")
    }

    #[tokio::test]
    async fn successful_relay_returns_the_upstream_payload() {
        let world = world(&["aaaa", "bbbb", "cccc"]);
        let response =
            world.orchestrator.relay_by_application("app-1", BODY, &ctx()).await.unwrap();
        assert_eq!(response.payload, br#"{"id":1,"jsonrpc":"2.0","result":"ok"}"#);
    }

    #[tokio::test]
    async fn one_metric_per_probe_and_attempt() {
        let world = world(&["aaaa", "bbbb", "cccc"]);
        world.orchestrator.relay_by_application("app-1", BODY, &ctx()).await.unwrap();
        let records = world.buffer.drain();
        let count = |method: &str| records.iter().filter(|r| r.method == method).count();
        assert_eq!(count("synccheck"), 3);
        assert_eq!(count("chaincheck"), 3);
        assert_eq!(count("eth_getBalance"), 1);
        assert_eq!(records.len(), 7);
    }

    #[tokio::test]
    async fn failing_nodes_are_excluded_not_retried() {
        let world = world(&["aaaa", "bbbb", "cccc"]);
        world.sender.fail_node(
            "aaaa",
            UpstreamError::RelayFailed { node: Some("aaaa".to_owned()), message: "boom".to_owned() },
        );
        world.sender.fail_node(
            "bbbb",
            UpstreamError::RelayFailed { node: Some("bbbb".to_owned()), message: "boom".to_owned() },
        );
        let response =
            world.orchestrator.relay_by_application("app-1", BODY, &ctx()).await.unwrap();
        assert_eq!(response.payload, br#"{"id":1,"jsonrpc":"2.0","result":"ok"}"#);
        // Each node is attempted at most once: the candidate set shrinks
        // monotonically.
        let attempted: Vec<_> = world
            .sender
            .sends()
            .into_iter()
            .filter(|sent| sent.method == "eth_getBalance")
            .map(|sent| sent.node.unwrap())
            .collect();
        let distinct: HashSet<_> = attempted.iter().cloned().collect();
        assert_eq!(attempted.len(), distinct.len());
        assert_eq!(*attempted.last().unwrap(), "cccc");
    }

    #[tokio::test]
    async fn exhausted_relays_surface_the_last_error() {
        let world = world(&["aaaa", "bbbb"]);
        for key in ["aaaa", "bbbb"] {
            world.sender.fail_node(
                key,
                UpstreamError::RelayFailed { node: Some(key.to_owned()), message: "boom".to_owned() },
            );
        }
        let err =
            world.orchestrator.relay_by_application("app-1", BODY, &ctx()).await.unwrap_err();
        assert_matches!(err, RelayError::Exhausted { attempts: 2, timed_out: false, .. });
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn timeouts_exhaust_as_gateway_timeout() {
        let world = world(&["aaaa"]);
        world.sender.fail_node("aaaa", UpstreamError::Timeout(12000));
        let err =
            world.orchestrator.relay_by_application("app-1", BODY, &ctx()).await.unwrap_err();
        assert_eq!(err.status_code(), 504);
    }

    #[tokio::test]
    async fn session_expiry_triggers_one_refresh() {
        let world = world(&["aaaa"]);
        world.sender.fail_node("aaaa", UpstreamError::SessionExpired);
        let err =
            world.orchestrator.relay_by_application("app-1", BODY, &ctx()).await.unwrap_err();
        assert_matches!(err, RelayError::Exhausted { attempts: 1, .. });
        assert_eq!(world.sender.session_refreshes(), 1);
    }

    #[tokio::test]
    async fn unknown_application_is_a_client_error_without_sends() {
        let world = world(&["aaaa"]);
        let err =
            world.orchestrator.relay_by_application("missing", BODY, &ctx()).await.unwrap_err();
        assert_eq!(err, RelayError::Client(ClientError::UnknownApplication("missing".to_owned())));
        assert_eq!(err.status_code(), 403);
        assert!(world.sender.sends().is_empty());
    }

    #[tokio::test]
    async fn malformed_bodies_never_reach_the_network() {
        let world = world(&["aaaa"]);
        let err = world
            .orchestrator
            .relay_by_application("app-1", b"it is not json", &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(world.sender.sends().is_empty());
    }

    #[tokio::test]
    async fn oversized_payloads_are_rejected_up_front() {
        let world = world(&["aaaa"]);
        let body = vec![b'x'; GatewayConfig::test().max_payload_bytes + 1];
        let err =
            world.orchestrator.relay_by_application("app-1", &body, &ctx()).await.unwrap_err();
        assert_matches!(err, RelayError::Client(ClientError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn secret_key_is_enforced_when_required() {
        let world = world(&["aaaa"]);
        let mut app = test_application("app-2");
        app.settings.secret_key = Some("s3cr3t".to_owned());
        app.settings.secret_key_required = true;
        world.repository.insert_application(app);
        world.sender.set_height("aaaa", 100);

        let err =
            world.orchestrator.relay_by_application("app-2", BODY, &ctx()).await.unwrap_err();
        assert_eq!(err, RelayError::Client(ClientError::SecretKeyMismatch));

        let mut authorized = ctx();
        authorized.secret_key = Some("s3cr3t".to_owned());
        world.orchestrator.relay_by_application("app-2", BODY, &authorized).await.unwrap();
    }

    #[tokio::test]
    async fn host_alias_override_requires_the_whitelist() {
        let mut other = test_blockchain();
        other.id = "0040".to_owned();
        other.ticker = "BSC".to_owned();
        other.network_id = "56".to_owned();
        other.aliases = vec!["bsc-mainnet".to_owned()];
        other.sync_check = None;
        other.chain_id_check = None;
        let world = world_with(vec![test_blockchain(), other], &["aaaa", "bbbb", "cccc"]);

        let mut overridden = ctx();
        overridden.host_alias = Some("bsc-mainnet".to_owned());

        // Not whitelisted: the path alias wins.
        world.orchestrator.relay_by_application("app-1", BODY, &overridden).await.unwrap();
        assert!(world.sender.sends().iter().all(|sent| sent.blockchain == "0021"));

        let mut app = test_application("app-3");
        app.settings.whitelisted_blockchains = vec!["bsc-mainnet".to_owned()];
        world.repository.insert_application(app);
        world.orchestrator.relay_by_application("app-3", BODY, &overridden).await.unwrap();
        let last = world.sender.sends().pop().unwrap();
        assert_eq!(last.blockchain, "0040");
    }

    #[tokio::test]
    async fn fallback_serves_after_exhaustion() {
        let mut blockchain = test_blockchain();
        blockchain.alt_runtime_url = Some("https://alt-backend.example".to_owned());
        let world = world_with(vec![blockchain], &["aaaa"]);
        world.sender.fail_node(
            "aaaa",
            UpstreamError::RelayFailed { node: Some("aaaa".to_owned()), message: "boom".to_owned() },
        );
        let response =
            world.orchestrator.relay_by_application("app-1", BODY, &ctx()).await.unwrap();
        assert_eq!(response.payload, b"fallback-payload");
        assert_eq!(world.fallback.posts().len(), 1);
        // The fallback metric is flagged and unattributed, so it cannot
        // feed the cherry-picker.
        let records = world.buffer.drain();
        let fallback_record = records.iter().find(|record| record.fallback).unwrap();
        assert_eq!(fallback_record.result, 200);
        assert_eq!(fallback_record.service_node, None);
    }

    #[tokio::test]
    async fn empty_sessions_surface_no_healthy_nodes() {
        let world = world(&[]);
        let err =
            world.orchestrator.relay_by_application("app-1", BODY, &ctx()).await.unwrap_err();
        assert_eq!(err, RelayError::Upstream(UpstreamError::NoHealthyNodes));
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn cancellation_short_circuits_retries() {
        let world = world(&["aaaa", "bbbb", "cccc"]);
        let ctx = ctx();
        ctx.cancel.cancel();
        let err =
            world.orchestrator.relay_by_application("app-1", BODY, &ctx).await.unwrap_err();
        assert_matches!(err, RelayError::Upstream(_));
        assert!(world.sender.sends().is_empty());
    }

    #[tokio::test]
    async fn load_balancer_requests_resolve_through_an_application() {
        let world = world(&["aaaa", "bbbb", "cccc"]);
        world.repository.insert_load_balancer(
            gateway_primitives::application::LoadBalancer {
                id: "lb-1".to_owned(),
                application_ids: vec!["app-1".to_owned()],
            },
        );
        let response =
            world.orchestrator.relay_by_load_balancer("lb-1", BODY, &ctx()).await.unwrap();
        assert_eq!(response.payload, br#"{"id":1,"jsonrpc":"2.0","result":"ok"}"#);
        // The LB record is now cached: a second request makes no further
        // repository lookups for it.
        let calls = world.repository.load_balancer_calls();
        world.orchestrator.relay_by_load_balancer("lb-1", BODY, &ctx()).await.unwrap();
        assert_eq!(world.repository.load_balancer_calls(), calls);
    }

    #[tokio::test]
    async fn repository_outage_surfaces_as_resolution_failure() {
        let world = world(&["aaaa"]);
        world.cache.clear();
        world.repository.set_failing(true);
        let err =
            world.orchestrator.relay_by_application("app-1", BODY, &ctx()).await.unwrap_err();
        assert_matches!(err, RelayError::Client(ClientError::ResolutionFailed(_)));
        assert_eq!(err.status_code(), 500);
    }
}
