use crate::ProbeContext;
use crate::common::{
    MIN_USABLE_PROBES, acquire_probe_lock, jsonrpc_result, parse_hex_quantity,
    persist_verified_set, probe_node, read_verified_set,
};
use futures::future::join_all;
use gateway_cache::{Cache, keys};
use gateway_metrics::{METHOD_CHAIN_CHECK, MetricsRecorder};
use gateway_primitives::session::SessionNode;
use gateway_time::Clock;
use std::sync::Arc;

/// Filters a session's nodes down to those whose reported chain ID equals
/// the one declared for the blockchain. Same locking and caching pattern
/// as the sync check, under its own cache namespace.
pub struct ChainChecker {
    cache: Arc<dyn Cache>,
    recorder: Arc<MetricsRecorder>,
    clock: Clock,
}

impl ChainChecker {
    pub fn new(
        cache: Arc<dyn Cache>,
        recorder: Arc<MetricsRecorder>,
        clock: Clock,
    ) -> ChainChecker {
        ChainChecker { cache, recorder, clock }
    }

    pub async fn filter(&self, ctx: &ProbeContext, nodes: Vec<SessionNode>) -> Vec<SessionNode> {
        let Some(payload) = ctx.blockchain.chain_id_check.clone() else {
            return nodes;
        };
        let fingerprint = gateway_primitives::session::session_fingerprint(&nodes);
        let key = keys::chain_checked_nodes(&ctx.blockchain.id, &fingerprint);

        if let Some(verified) = read_verified_set(&*self.cache, &key).await {
            return nodes.into_iter().filter(|node| verified.contains(&node.public_key)).collect();
        }
        if !acquire_probe_lock(&*self.cache, &key).await {
            return nodes;
        }

        let probes = nodes.iter().map(|node| self.probe_chain_id(ctx, node, &payload));
        let reports: Vec<(&SessionNode, String)> =
            join_all(probes).await.into_iter().flatten().collect();
        if reports.len() < MIN_USABLE_PROBES {
            tracing::error!(
                target: "checks",
                chain = %ctx.blockchain.id,
                usable = reports.len(),
                nodes = nodes.len(),
                "not enough chain-ID probes succeeded, serving the unfiltered session",
            );
            return nodes;
        }

        let expected = &ctx.blockchain.network_id;
        let matching: Vec<String> = reports
            .iter()
            .filter(|(_, reported)| reported == expected)
            .map(|(node, _)| node.public_key.clone())
            .collect();
        tracing::info!(
            target: "checks",
            chain = %ctx.blockchain.id,
            expected = %expected,
            matching = matching.len(),
            probed = reports.len(),
            "chain-ID check complete",
        );
        persist_verified_set(&*self.cache, &key, &matching).await;

        nodes.into_iter().filter(|node| matching.contains(&node.public_key)).collect()
    }

    async fn probe_chain_id<'a>(
        &self,
        ctx: &ProbeContext,
        node: &'a SessionNode,
        payload: &str,
    ) -> Option<(&'a SessionNode, String)> {
        let response =
            probe_node(ctx, &self.recorder, &self.clock, node, payload, METHOD_CHAIN_CHECK)
                .await?;
        let reported = jsonrpc_result(&response.payload)?;
        Some((node, normalize_chain_id(&reported)))
    }
}

/// Chain IDs arrive as hex JSON-RPC quantities ("0x1") but are declared in
/// decimal ("1"). Non-numeric identifiers are compared verbatim.
fn normalize_chain_id(reported: &str) -> String {
    match parse_hex_quantity(reported) {
        Some(value) => value.to_string(),
        None => reported.to_owned(),
    }
}
