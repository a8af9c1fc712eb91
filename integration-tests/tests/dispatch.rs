//! Concurrency and accounting properties of the dispatcher that span
//! several crates.

use futures::future::join_all;
use gateway_o11y::testonly::init_test_logger;
use gateway_relayer::RequestContext;
use integration_tests::{CLIENT_BODY, default_world};

fn ctx() -> RequestContext {
    RequestContext::new("eth-mainnet")
}

/// 100 concurrent relays against a cold sync cache elect exactly one
/// prober; everyone else is served the unfiltered session and succeeds.
#[tokio::test]
async fn concurrent_relays_elect_one_prober() {
    init_test_logger();
    let world = default_world(&["aaaa", "bbbb", "cccc", "dddd", "eeee"]);
    // Force an interleaving point at every send, so the probing pass is
    // still in flight while the other relays arrive.
    world.sender.set_yield_on_send(true);

    let relays = (0..100)
        .map(|_| {
            let ctx = ctx();
            let orchestrator = world.orchestrator.clone();
            async move { orchestrator.relay_by_application("app-1", CLIENT_BODY, &ctx).await }
        })
        .collect::<Vec<_>>();
    let results = join_all(relays).await;
    assert!(results.iter().all(|result| result.is_ok()));

    // One probing pass: one synccheck probe per session node, never more.
    assert_eq!(world.sender.sends_with_method("eth_blockNumber"), 5);
    assert_eq!(world.sender.sends_with_method("eth_getBalance"), 100);
}

/// Every client request accounts for exactly
/// `attempts + sync_probes + chain_probes` metric records.
#[tokio::test]
async fn metric_records_match_probes_plus_attempts() {
    init_test_logger();
    let world = default_world(&["aaaa", "bbbb", "cccc", "dddd", "eeee"]);
    world.orchestrator.relay_by_application("app-1", CLIENT_BODY, &ctx()).await.unwrap();

    let records = world.buffer.drain();
    let sync_probes = records.iter().filter(|record| record.method == "synccheck").count();
    let attempts = records.iter().filter(|record| record.method == "eth_getBalance").count();
    assert_eq!(sync_probes, 5);
    assert_eq!(attempts, 1);
    assert_eq!(records.len(), sync_probes + attempts);

    // A second request hits the published set: no further probes.
    world.orchestrator.relay_by_application("app-1", CLIENT_BODY, &ctx()).await.unwrap();
    let records = world.buffer.drain();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].method, "eth_getBalance");
}

/// The service logs written by relays feed back into selection: a node
/// that keeps failing drops a tier and stops receiving traffic.
#[tokio::test]
async fn failing_node_loses_traffic_across_requests() {
    init_test_logger();
    let world = default_world(&["aaaa", "bbbb"]);
    world.sender.fail_node(
        "aaaa",
        gateway_primitives::errors::UpstreamError::RelayFailed {
            node: Some("aaaa".to_owned()),
            message: "boom".to_owned(),
        },
    );

    // Build up service-log history: aaaa accumulates failures, bbbb
    // successes.
    for _ in 0..10 {
        world.orchestrator.relay_by_application("app-1", CLIENT_BODY, &ctx()).await.unwrap();
    }

    // With enough observations, bbbb is preferred-tier and aaaa is
    // probationary: traffic goes to bbbb on the first attempt.
    let before = world.sender.sends_with_method("eth_getBalance");
    for _ in 0..10 {
        world.orchestrator.relay_by_application("app-1", CLIENT_BODY, &ctx()).await.unwrap();
    }
    assert_eq!(world.sender.sends_with_method("eth_getBalance") - before, 10);
}
