//! End-to-end routing tests
//!
//! Drives the watcher, registry and router together against in-memory
//! shards and a static directory.

use bytes::Bytes;
use sessia::directory::{ShardAddress, StaticDirectory};
use sessia::metrics::SessiaMetrics;
use sessia::session::{RandomSelection, SessionId, SessionRouter};
use sessia::shard::identity::{assign_identity, IDENTITY_KEY};
use sessia::shard::{DirectoryWatcher, MemoryConnector, Registry, ShardClient, WatcherSettings};
use sessia::SessiaError;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(2);

struct Fleet {
    directory: StaticDirectory,
    connector: MemoryConnector,
    watcher: DirectoryWatcher,
    router: SessionRouter,
}

fn addresses(n: usize) -> Vec<ShardAddress> {
    (1..=n).map(|i| ShardAddress::new(format!("10.0.0.{i}"), 6379)).collect()
}

fn fleet(n: usize) -> Fleet {
    let directory = StaticDirectory::new(addresses(n));
    let connector = MemoryConnector::new();
    let registry = Registry::new();
    let metrics = Arc::new(SessiaMetrics::detached());

    let watcher = DirectoryWatcher::new(
        Arc::new(directory.clone()),
        Arc::new(connector.clone()),
        registry.clone(),
        WatcherSettings {
            service: "redis".to_string(),
            tag: "sessia".to_string(),
            interval: Duration::from_millis(20),
        },
        Arc::clone(&metrics),
    );
    let router = SessionRouter::new(registry, Arc::new(RandomSelection), TTL, metrics);

    Fleet {
        directory,
        connector,
        watcher,
        router,
    }
}

#[tokio::test]
async fn refresh_publishes_every_resolved_shard_with_unique_identity() {
    for n in [1, 2, 5, 16] {
        let fleet = fleet(n);
        assert_eq!(fleet.watcher.refresh().await.unwrap(), n);

        let snapshot = fleet.router.registry().current();
        let identities: HashSet<&str> = snapshot.identities().collect();
        assert_eq!(identities.len(), n);
        for identity in identities {
            assert_eq!(identity.len(), 12);
            assert!(identity.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
        }
    }
}

#[tokio::test]
async fn fresh_shards_persist_their_assigned_identity() {
    let fleet = fleet(2);
    fleet.watcher.refresh().await.unwrap();

    for instance in fleet.router.registry().current().instances() {
        let stored = fleet
            .connector
            .shard(&instance.address)
            .get(IDENTITY_KEY)
            .await
            .unwrap();
        assert_eq!(stored, Some(Bytes::from(instance.identity.clone())));
    }
}

#[tokio::test]
async fn save_then_query_round_trips() {
    let fleet = fleet(2);
    fleet.watcher.refresh().await.unwrap();

    for payload in [&b"hello"[..], b"", b"\x00\xff binary \r\n", &[7u8; 4096][..]] {
        let id = fleet.router.save(payload).await.unwrap();
        assert_eq!(fleet.router.query(&id).await.unwrap(), Bytes::copy_from_slice(payload));
    }
}

#[tokio::test]
async fn identity_containing_separator_is_reassigned() {
    let fleet = fleet(1);
    let shard = fleet.connector.shard("10.0.0.1:6379");
    shard
        .set(IDENTITY_KEY, Bytes::from_static(b"peer-node"), None)
        .await
        .unwrap();
    fleet.watcher.refresh().await.unwrap();

    let identity = fleet.router.registry().current().instances()[0].identity.clone();
    assert!(!identity.contains('-'));
    assert_eq!(shard.get(IDENTITY_KEY).await.unwrap(), Some(Bytes::from(identity.clone())));

    let id = fleet.router.save(b"reachable").await.unwrap();
    assert!(id.ends_with(&format!("-{identity}")));
    assert_eq!(fleet.router.query(&id).await.unwrap(), Bytes::from_static(b"reachable"));
}

#[tokio::test(start_paused = true)]
async fn record_expires_after_ttl() {
    let fleet = fleet(2);
    fleet.watcher.refresh().await.unwrap();

    let id = fleet.router.save(b"short lived").await.unwrap();
    tokio::time::advance(Duration::from_secs(3)).await;

    assert!(matches!(
        fleet.router.query(&id).await,
        Err(SessiaError::RecordNotFound { .. })
    ));
}

#[tokio::test]
async fn writes_spread_uniformly_across_shards() {
    let fleet = fleet(4);
    fleet.watcher.refresh().await.unwrap();

    const SAVES: u64 = 8000;
    for _ in 0..SAVES {
        fleet.router.save(b"x").await.unwrap();
    }

    let per_shard = fleet.router.usage().saves_by_shard();
    assert_eq!(per_shard.len(), 4);
    let expected = SAVES / 4;
    for (identity, count) in per_shard {
        // ~7 standard deviations either side of 2000
        assert!(
            count > expected - 280 && count < expected + 280,
            "shard {identity} received {count} of {SAVES} writes"
        );
    }
}

#[tokio::test]
async fn identity_assignment_is_idempotent() {
    let connector = MemoryConnector::new();
    let shard = connector.shard("10.0.0.1:6379");

    let first = assign_identity(&*shard, &HashSet::new()).await.unwrap();
    let second = assign_identity(&*shard, &HashSet::new()).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn bad_identifiers_are_not_found() {
    let fleet = fleet(1);
    fleet.watcher.refresh().await.unwrap();

    let err = fleet.router.query("abc-unknownid").await.unwrap_err();
    assert!(matches!(err, SessiaError::UnknownShard { .. }));

    let err = fleet.router.query("noseparator").await.unwrap_err();
    assert!(matches!(err, SessiaError::MalformedIdentifier { .. }));

    for err in [
        fleet.router.query("").await.unwrap_err(),
        fleet.router.query("-").await.unwrap_err(),
    ] {
        assert!(err.is_not_found());
    }
}

#[tokio::test]
async fn save_before_first_refresh_reports_no_shards() {
    let fleet = fleet(3);
    assert!(matches!(
        fleet.router.save(b"early").await,
        Err(SessiaError::NoShardsAvailable)
    ));
}

#[tokio::test]
async fn discovery_outage_keeps_serving_known_shards() {
    let fleet = fleet(2);
    fleet.watcher.refresh().await.unwrap();
    let id = fleet.router.save(b"kept").await.unwrap();

    fleet.directory.fail();
    assert!(fleet.watcher.refresh().await.is_err());

    assert_eq!(fleet.router.query(&id).await.unwrap(), Bytes::from_static(b"kept"));
    assert!(fleet.router.save(b"more").await.is_ok());
}

#[tokio::test]
async fn sessions_on_departed_shard_become_not_found() {
    let fleet = fleet(2);
    fleet.watcher.refresh().await.unwrap();

    let snapshot = fleet.router.registry().current();
    let departed = snapshot.instances()[1].clone();
    let token = "3fa85f64-5717-4562-b3fc-2c963f66afa6";
    fleet
        .connector
        .shard(&departed.address)
        .set(&format!("session:{token}"), Bytes::from_static(b"v"), None)
        .await
        .unwrap();
    let id = SessionId {
        token: token.to_string(),
        shard: departed.identity.clone(),
    }
    .to_string();
    assert!(fleet.router.query(&id).await.is_ok());

    fleet.directory.set(addresses(1));
    fleet.watcher.refresh().await.unwrap();

    assert!(matches!(
        fleet.router.query(&id).await,
        Err(SessiaError::UnknownShard { .. })
    ));
}

#[tokio::test]
async fn restarted_shard_reappears_under_same_identity() {
    let fleet = fleet(2);
    fleet.watcher.refresh().await.unwrap();
    let before: HashSet<String> = fleet
        .router
        .registry()
        .current()
        .identities()
        .map(str::to_string)
        .collect();

    fleet.directory.set(addresses(1));
    fleet.watcher.refresh().await.unwrap();
    fleet.directory.set(addresses(2));
    fleet.watcher.refresh().await.unwrap();

    let after: HashSet<String> = fleet
        .router
        .registry()
        .current()
        .identities()
        .map(str::to_string)
        .collect();
    assert_eq!(before, after);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_traffic_during_refreshes() {
    let fleet = Arc::new(fleet(3));
    fleet.watcher.refresh().await.unwrap();
    let handle = fleet.watcher.clone().spawn();

    let mut tasks = Vec::new();
    for worker in 0..16 {
        let fleet = Arc::clone(&fleet);
        tasks.push(tokio::spawn(async move {
            for i in 0..200 {
                let payload = format!("worker-{worker}-{i}");
                let id = fleet.router.save(payload.as_bytes()).await.unwrap();
                match fleet.router.query(&id).await {
                    Ok(read) => assert_eq!(read, Bytes::from(payload)),
                    // The flapping fourth shard may have left the snapshot in between
                    Err(SessiaError::UnknownShard { .. }) => {}
                    Err(e) => panic!("unexpected query failure: {e}"),
                }
                if i % 50 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }));
    }

    // Churn the fleet membership while traffic is running; shards 1-3 stay put
    let churn = {
        let fleet = Arc::clone(&fleet);
        tokio::spawn(async move {
            for round in 0..20 {
                let n = if round % 2 == 0 { 4 } else { 3 };
                fleet.directory.set(addresses(n));
                fleet.watcher.refresh().await.unwrap();
            }
            fleet.directory.set(addresses(3));
        })
    };

    for task in tasks {
        task.await.unwrap();
    }
    churn.await.unwrap();

    handle.shutdown();
    handle.join().await;

    assert_eq!(fleet.router.usage().total_saves(), 16 * 200);
}
