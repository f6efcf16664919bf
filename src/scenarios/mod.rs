//! End-to-end behavior of the client against an in-memory cluster.
//!
//! Three nodes split the slot space evenly:
//! `127.0.0.1:7000` owns `b`, `bar` and `hello`, `127.0.0.1:7001` owns `c`,
//! and `127.0.0.1:7002` owns `a` and `foo`.

use std::sync::Arc;
use std::time::Duration;

use crate::cluster::key_slot;
use crate::core::builder::ClientBuilder;
use crate::testing::MockCluster;
use crate::{Client, Error, SetOptions, SetStatus};

const NODES: [&str; 3] = ["127.0.0.1:7000", "127.0.0.1:7001", "127.0.0.1:7002"];
const SPARE: &str = "127.0.0.1:7003";

async fn cluster() -> (Arc<MockCluster>, Client) {
    cluster_with(ClientBuilder::new()).await
}

async fn cluster_with(builder: ClientBuilder) -> (Arc<MockCluster>, Client) {
    let mock = Arc::new(MockCluster::new(&NODES));
    let client = builder
        .addresses([NODES[0]])
        .cluster_mode(true)
        .build(mock.clone())
        .await
        .unwrap();
    mock.clear_requests().await;
    (mock, client)
}

async fn cluster_slots_requests(mock: &MockCluster) -> usize {
    mock.requests()
        .await
        .iter()
        .filter(|request| request.args.first().map(String::as_str) == Some("CLUSTER"))
        .count()
}

async fn commands_to(mock: &MockCluster, address: &str, name: &str) -> usize {
    mock.requests_to(address)
        .await
        .iter()
        .filter(|request| request.args[0] == name)
        .count()
}

#[tokio::test]
async fn test_set_then_get() {
    let (mock, client) = cluster().await;

    assert_eq!(client.set("foo", "bar").await.unwrap(), SetStatus::Ok);
    assert_eq!(client.get("foo").await.unwrap(), Some("bar".to_string()));

    let requests = mock.requests_to(NODES[2]).await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].args, vec!["SET", "foo", "bar"]);
    assert_eq!(requests[1].args, vec!["GET", "foo"]);
}

#[tokio::test]
async fn test_set_if_absent_twice() {
    let (mock, client) = cluster().await;
    let nx = SetOptions::new().only_if_does_not_exist();

    assert_eq!(client.set_with_options("k", "1", &nx).await.unwrap(), SetStatus::Ok);
    assert_eq!(
        client.set_with_options("k", "2", &nx).await.unwrap(),
        SetStatus::NotSet
    );
    assert_eq!(client.get("k").await.unwrap(), Some("1".to_string()));

    let last_set = mock
        .requests()
        .await
        .into_iter()
        .filter(|request| request.args[0] == "SET")
        .last()
        .unwrap();
    assert_eq!(last_set.args, vec!["SET", "k", "2", "NX"]);
}

#[tokio::test]
async fn test_set_only_if_exists() {
    let (_, client) = cluster().await;
    let xx = SetOptions::new().only_if_exists();

    assert_eq!(
        client.set_with_options("k", "1", &xx).await.unwrap(),
        SetStatus::NotSet
    );
    assert_eq!(client.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_mset_then_mget_in_input_order() {
    let (mock, client) = cluster().await;

    client
        .mset(&[("a", "1"), ("b", "2"), ("c", "3")])
        .await
        .unwrap();
    for node in NODES {
        let requests = mock.requests_to(node).await;
        assert_eq!(requests.len(), 1, "one MSET per slot on {node}");
    }

    assert_eq!(
        client.mget(&["a", "missing", "c", "b"]).await.unwrap(),
        vec![
            Some("1".to_string()),
            None,
            Some("3".to_string()),
            Some("2".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_del_and_exists_count_across_slots() {
    let (mock, client) = cluster().await;
    mock.insert("a", "1").await;

    assert_eq!(client.exists(&["a", "b", "c", "a"]).await.unwrap(), 2);
    assert_eq!(client.del(&["a", "b", "c"]).await.unwrap(), 1);
    assert_eq!(mock.value("a").await, None);
    assert_eq!(client.exists(&["a"]).await.unwrap(), 0);
}

#[tokio::test]
async fn test_hash_tags_share_one_request() {
    let (mock, client) = cluster().await;

    client
        .mset(&[("{user}:name", "ann"), ("{user}:mail", "ann@example.com")])
        .await
        .unwrap();

    let requests = mock.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].args,
        vec!["MSET", "{user}:name", "ann", "{user}:mail", "ann@example.com"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_mget_order_survives_slow_shard() {
    let (mock, client) =
        cluster_with(ClientBuilder::new().request_timeout(Duration::from_secs(1))).await;
    mock.insert("a", "1").await;
    mock.insert("b", "2").await;
    mock.insert("c", "3").await;
    mock.delay_node(NODES[2], Duration::from_millis(100)).await;

    assert_eq!(
        client.mget(&["a", "b", "c"]).await.unwrap(),
        vec![
            Some("1".to_string()),
            Some("2".to_string()),
            Some("3".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_moved_refreshes_once_and_retries() {
    let (mock, client) = cluster().await;
    mock.insert("foo", "bar").await;
    let slot = key_slot("foo");
    mock.reassign_slots(slot..=slot, NODES[0]).await;

    assert_eq!(client.get("foo").await.unwrap(), Some("bar".to_string()));
    assert_eq!(cluster_slots_requests(&mock).await, 1);

    let gets: Vec<String> = mock
        .requests()
        .await
        .into_iter()
        .filter(|request| request.args[0] == "GET")
        .map(|request| request.address)
        .collect();
    assert_eq!(gets, vec![NODES[2], NODES[0]]);

    // The refreshed snapshot routes directly from now on.
    mock.clear_requests().await;
    client.get("foo").await.unwrap();
    assert_eq!(mock.requests_to(NODES[0]).await.len(), 1);
    assert_eq!(mock.requests().await.len(), 1);
}

#[tokio::test]
async fn test_moved_during_fan_out_only_retries_moved_slot() {
    let (mock, client) = cluster().await;
    mock.insert("a", "1").await;
    mock.insert("b", "2").await;
    let slot = key_slot("a");
    mock.reassign_slots(slot..=slot, NODES[1]).await;

    assert_eq!(
        client.mget(&["a", "b"]).await.unwrap(),
        vec![Some("1".to_string()), Some("2".to_string())]
    );
    assert_eq!(commands_to(&mock, NODES[0], "MGET").await, 1);
    assert_eq!(commands_to(&mock, NODES[1], "MGET").await, 1);
    assert_eq!(commands_to(&mock, NODES[2], "MGET").await, 1);
}

#[tokio::test]
async fn test_ask_follows_without_refresh() {
    let (mock, client) = cluster().await;
    mock.insert("foo", "bar").await;
    mock.migrate_slot(key_slot("foo"), SPARE).await;

    assert_eq!(client.get("foo").await.unwrap(), Some("bar".to_string()));
    assert_eq!(cluster_slots_requests(&mock).await, 0);

    let redirected = mock.requests_to(SPARE).await;
    assert_eq!(redirected.len(), 1);
    assert!(redirected[0].asking);

    // ASK is a one-off: the next call starts at the owner again.
    mock.clear_requests().await;
    client.get("foo").await.unwrap();
    assert_eq!(mock.requests().await[0].address, NODES[2]);
}

#[tokio::test]
async fn test_node_failover_is_followed_after_refresh() {
    let (mock, client) = cluster().await;
    mock.insert("foo", "bar").await;
    mock.fail_node(NODES[2]).await;
    mock.reassign_slots(10923..=16383, NODES[0]).await;

    assert_eq!(client.get("foo").await.unwrap(), Some("bar".to_string()));
    assert!(client
        .topology()
        .nodes()
        .all(|node| node.address != NODES[2]));
}

#[tokio::test(start_paused = true)]
async fn test_hung_node_does_not_block_discovery() {
    let (mock, client) = cluster().await;
    mock.insert("c", "3").await;
    mock.delay_node(NODES[0], Duration::from_secs(60)).await;
    let slot = key_slot("c");
    mock.reassign_slots(slot..=slot, NODES[2]).await;

    for _ in 0..3 {
        assert_eq!(client.get("c").await.unwrap(), Some("3".to_string()));
    }
    assert_eq!(commands_to(&mock, NODES[0], "CLUSTER").await, 1);
    assert_eq!(commands_to(&mock, NODES[1], "CLUSTER").await, 1);
    assert_eq!(commands_to(&mock, NODES[2], "GET").await, 3);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_names_pending_node() {
    let (mock, client) = cluster().await;
    mock.delay_node(NODES[2], Duration::from_secs(5)).await;

    match client.mget(&["a", "b", "c"]).await {
        Err(Error::Timeout { pending }) => assert_eq!(pending, vec![NODES[2]]),
        other => panic!("expected Timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn test_mset_partial_failure_names_unwritten_keys() {
    let (mock, client) = cluster().await;
    mock.break_node(NODES[2], "ERR out of memory").await;

    match client.mset(&[("a", "1"), ("b", "2")]).await {
        Err(Error::PartialFailure { count, failures }) => {
            assert_eq!(count, None);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].address, NODES[2]);
            assert_eq!(failures[0].keys, vec!["a"]);
            assert!(failures[0].error.is_server_error());
        }
        other => panic!("expected PartialFailure, got {other:?}"),
    }
    assert_eq!(mock.value("a").await, None);
    assert_eq!(mock.value("b").await, Some("2".to_string()));
}

#[tokio::test]
async fn test_mset_unreachable_shard_after_retry() {
    let (mock, client) = cluster().await;
    mock.fail_node(NODES[2]).await;

    let error = client
        .mset(&[("a", "1"), ("b", "2")])
        .await
        .unwrap_err();
    assert_eq!(error.failed_keys(), vec!["a"]);
    match error {
        Error::PartialFailure { failures, .. } => {
            assert!(matches!(*failures[0].error, Error::Transport { .. }));
        }
        other => panic!("expected PartialFailure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_del_partial_failure_keeps_count() {
    let (mock, client) = cluster().await;
    mock.insert("b", "2").await;
    mock.insert("c", "3").await;
    mock.break_node(NODES[1], "ERR internal failure").await;

    match client.del(&["b", "c"]).await {
        Err(Error::PartialFailure { count, failures }) => {
            assert_eq!(count, Some(1));
            assert_eq!(failures[0].keys, vec!["c"]);
        }
        other => panic!("expected PartialFailure, got {other:?}"),
    }
    assert_eq!(mock.value("b").await, None);
}

#[tokio::test]
async fn test_all_shards_failing_returns_first_error() {
    let (mock, client) = cluster().await;
    mock.break_node(NODES[0], "ERR zero").await;
    mock.break_node(NODES[2], "ERR two").await;

    match client.del(&["a", "b"]).await {
        Err(Error::Server { kind, message }) => {
            assert_eq!(kind, "ERR");
            assert_eq!(message, "two");
        }
        other => panic!("expected Server error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_mget_shard_error_fails_whole_call() {
    let (mock, client) = cluster().await;
    mock.break_node(NODES[1], "WRONGTYPE Operation against a key holding the wrong kind of value")
        .await;

    assert!(matches!(
        client.mget(&["a", "c"]).await,
        Err(Error::Server { kind, .. }) if kind == "WRONGTYPE"
    ));
}

#[tokio::test]
async fn test_exhausted_redirects_surface_redirection() {
    let (mock, client) = cluster_with(ClientBuilder::new().max_redirects(0)).await;
    let slot = key_slot("foo");
    mock.reassign_slots(slot..=slot, NODES[0]).await;

    match client.get("foo").await {
        Err(Error::Redirection { slot: moved, address }) => {
            assert_eq!(moved, slot);
            assert_eq!(address, NODES[0]);
        }
        other => panic!("expected Redirection, got {other:?}"),
    }
    assert_eq!(cluster_slots_requests(&mock).await, 0);
}

#[tokio::test]
async fn test_tryagain_is_retried_then_surfaced() {
    let (mock, client) = cluster_with(ClientBuilder::new().max_redirects(2)).await;
    mock.break_node(NODES[2], "TRYAGAIN Multiple keys request during rehashing of slot")
        .await;

    match client.get("foo").await {
        Err(Error::Server { kind, .. }) => assert_eq!(kind, "TRYAGAIN"),
        other => panic!("expected Server error, got {other:?}"),
    }
    assert_eq!(mock.requests_to(NODES[2]).await.len(), 3);
}

#[tokio::test]
async fn test_standalone_matches_cluster() {
    let standalone_mock = Arc::new(MockCluster::standalone(NODES[0]));
    let standalone = ClientBuilder::new()
        .address(NODES[0])
        .build(standalone_mock.clone())
        .await
        .unwrap();
    let (_, sharded) = cluster().await;

    for client in [&standalone, &sharded] {
        client
            .mset(&[("a", "1"), ("b", "2"), ("c", "3")])
            .await
            .unwrap();
        assert_eq!(
            client.mget(&["c", "x", "a"]).await.unwrap(),
            vec![Some("3".to_string()), None, Some("1".to_string())]
        );
        assert_eq!(client.exists(&["a", "b", "x"]).await.unwrap(), 2);
        assert_eq!(client.del(&["a", "x"]).await.unwrap(), 1);
        assert_eq!(
            client
                .set_with_options("b", "9", &SetOptions::new().return_old_value())
                .await
                .unwrap(),
            SetStatus::OldValue(Some("2".to_string()))
        );
    }

    // A standalone multi-key call is a single request.
    let requests = standalone_mock.requests().await;
    assert_eq!(requests.len(), 5);
    assert!(requests.iter().all(|request| !request.asking));
}

#[tokio::test]
async fn test_concurrent_clones() {
    let (mock, client) = cluster().await;

    let mut handles = Vec::new();
    for i in 0..64 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let key = format!("key:{i}");
            let value = i.to_string();
            client.set(&key, &value).await.unwrap();
            assert_eq!(client.get(&key).await.unwrap(), Some(value));
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(mock.requests().await.len(), 128);
    assert_eq!(mock.value("key:63").await, Some("63".to_string()));
}
