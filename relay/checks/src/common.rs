use crate::ProbeContext;
use gateway_cache::{Cache, keys};
use gateway_metrics::{MetricsRecorder, RelayMetric};
use gateway_primitives::errors::UpstreamError;
use gateway_primitives::relay::{RelayAttempt, RelayResponse};
use gateway_primitives::session::SessionNode;
use gateway_time::{Clock, Duration};
use std::collections::HashSet;

/// Probes with a usable answer required before a filter trusts its own
/// verdict; below this it fails open.
pub(crate) const MIN_USABLE_PROBES: usize = 3;

pub(crate) async fn read_verified_set(cache: &dyn Cache, key: &str) -> Option<HashSet<String>> {
    let raw = match cache.get(key).await {
        Ok(found) => found?,
        Err(err) => {
            tracing::warn!(target: "checks", key, ?err, "verified-set read failed");
            return None;
        }
    };
    match serde_json::from_str::<Vec<String>>(&raw) {
        Ok(list) if !list.is_empty() => Some(list.into_iter().collect()),
        Ok(_) => None,
        Err(err) => {
            tracing::warn!(target: "checks", key, ?err, "verified-set entry is corrupt");
            None
        }
    }
}

/// Tries to become the single prober for `key`. `false` means another
/// prober across the fleet holds the lock (or the cache is down) and the
/// caller must serve the unfiltered set.
pub(crate) async fn acquire_probe_lock(cache: &dyn Cache, key: &str) -> bool {
    match cache.set_if_absent(&keys::probe_lock(key), "1", keys::PROBE_LOCK_TTL).await {
        Ok(acquired) => acquired,
        Err(err) => {
            tracing::warn!(target: "checks", key, ?err, "probe lock unavailable");
            false
        }
    }
}

pub(crate) async fn persist_verified_set(cache: &dyn Cache, key: &str, set: &[String]) {
    let raw = match serde_json::to_string(set) {
        Ok(raw) => raw,
        Err(err) => {
            tracing::error!(target: "checks", key, ?err, "verified set does not serialize");
            return;
        }
    };
    if let Err(err) = cache.set(key, &raw, keys::VERIFIED_NODES_TTL).await {
        tracing::warn!(target: "checks", key, ?err, "verified-set write failed");
    }
}

/// Sends one probe relay and records its metric under `method`. Returns the
/// response payload when the node answered.
pub(crate) async fn probe_node(
    ctx: &ProbeContext,
    recorder: &MetricsRecorder,
    clock: &Clock,
    node: &SessionNode,
    payload: &str,
    method: &str,
) -> Option<RelayResponse> {
    let relay_start = clock.now_utc();
    let started = clock.now();
    let result = ctx
        .relay_sender
        .send(RelayAttempt {
            blockchain: &ctx.blockchain.id,
            payload: payload.as_bytes(),
            path: "",
            aat: &ctx.aat,
            config: ctx.probe_config.clone(),
            node: Some(node),
            consensus: false,
        })
        .await;
    let elapsed = Duration::try_from(clock.now() - started).unwrap_or(Duration::ZERO);

    let (outcome, error) = match &result {
        Ok(_) => (200, None),
        Err(err) => (500, Some(err.to_string())),
    };
    recorder
        .record(RelayMetric {
            request_id: ctx.request_id.clone(),
            application_id: ctx.application_id.clone(),
            app_public_key: ctx.app_public_key.clone(),
            blockchain: ctx.blockchain.id.clone(),
            service_node: Some(node.public_key.clone()),
            relay_start,
            elapsed,
            result: outcome,
            bytes: result.as_ref().map_or(0, |response| response.payload.len()),
            delivered: result.is_ok(),
            fallback: false,
            method: method.to_owned(),
            error,
        })
        .await;
    result
        .map_err(|err: UpstreamError| {
            tracing::debug!(target: "checks", node = %node.public_key, %err, "probe failed");
        })
        .ok()
}

/// `result` field of a JSON-RPC response body, as a string.
pub(crate) fn jsonrpc_result(payload: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
    value.get("result")?.as_str().map(str::to_owned)
}

/// Parses a hex-encoded quantity, with or without the `0x` prefix.
pub(crate) fn parse_hex_quantity(raw: &str) -> Option<u64> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    u64::from_str_radix(digits, 16).ok()
}
