//! Leader discovery against scripted fake servers over real TCP.

mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use common::{dead_address, init_tracing, recording_dialer, Behavior, FakeServer};
use dqlite_client::connector::{Config, Connector};
use dqlite_client::context::Context;
use dqlite_client::protocol::{VERSION_LEGACY, VERSION_ONE};
use dqlite_client::store::{InMemoryNodeStore, NodeInfo, NodeRole, NodeStore};
use dqlite_client::Error;
use tokio::time::timeout;

fn store_of(addresses: &[&str]) -> Arc<InMemoryNodeStore> {
    let nodes: Vec<_> = addresses
        .iter()
        .enumerate()
        .map(|(i, address)| NodeInfo::new(i as u64 + 1, *address, NodeRole::Voter))
        .collect();
    Arc::new(InMemoryNodeStore::with_nodes(&nodes))
}

fn fast_config() -> Config {
    Config::default()
        .with_dial_timeout(Duration::from_secs(1))
        .with_attempt_timeout(Duration::from_secs(2))
        .with_backoff(Duration::from_millis(5), Duration::from_millis(20))
}

#[tokio::test]
async fn follows_redirect_without_dialing_remaining_candidates() -> Result<()> {
    init_tracing();
    let a = FakeServer::bind().await?;
    let b = FakeServer::bind().await?;
    let c = FakeServer::bind().await?;
    let c_address = c.address.clone();

    let a = a.start(Behavior::Redirect(c_address.clone()));
    let b = b.start(Behavior::Redirect(c_address.clone()));
    let c = c.start(Behavior::Leader);

    let (dialer, dialed) = recording_dialer();
    let store = store_of(&[&a.address, &b.address, &c.address]);
    let connector = Connector::new(7, store, fast_config().with_dial(dialer));

    let protocol = timeout(
        Duration::from_secs(5),
        connector.connect(&Context::background()),
    )
    .await??;

    assert_eq!(protocol.version(), VERSION_ONE);
    assert_eq!(protocol.heartbeat_timeout(), Some(Duration::from_secs(15)));
    assert_eq!(*dialed.lock(), vec![a.address.clone(), c_address]);
    assert!(b.requests().is_empty());
    Ok(())
}

#[tokio::test]
async fn redirect_is_followed_only_once() -> Result<()> {
    init_tracing();
    let a = FakeServer::bind().await?;
    let b = FakeServer::bind().await?;
    let c = FakeServer::bind().await?;

    let a = a.start(Behavior::Redirect(b.address.clone()));
    let b = b.start(Behavior::Redirect(c.address.clone()));
    let c = c.start(Behavior::Leader);

    let (dialer, dialed) = recording_dialer();
    let connector = Connector::new(
        1,
        store_of(&[&a.address]),
        fast_config().with_dial(dialer).with_retry_limit(1),
    );

    let result = timeout(
        Duration::from_secs(5),
        connector.connect(&Context::background()),
    )
    .await?;

    assert!(matches!(result, Err(Error::NoAvailableLeader)));
    assert_eq!(*dialed.lock(), vec![a.address.clone(), b.address.clone()]);
    assert!(c.requests().is_empty());
    Ok(())
}

#[tokio::test]
async fn unknown_leaders_exhaust_retry_limit() -> Result<()> {
    init_tracing();
    let a = FakeServer::bind().await?.start(Behavior::Unknown);
    let b = FakeServer::bind().await?.start(Behavior::Unknown);

    let (dialer, dialed) = recording_dialer();
    let connector = Connector::new(
        1,
        store_of(&[&a.address, &b.address]),
        fast_config().with_dial(dialer).with_retry_limit(3),
    );

    let result = timeout(
        Duration::from_secs(5),
        connector.connect(&Context::background()),
    )
    .await?;

    assert!(matches!(result, Err(Error::NoAvailableLeader)));
    assert_eq!(dialed.lock().len(), 6);
    Ok(())
}

#[tokio::test]
async fn expired_context_stops_unlimited_retries() -> Result<()> {
    init_tracing();
    let a = FakeServer::bind().await?.start(Behavior::Unknown);
    let connector = Connector::new(1, store_of(&[&a.address]), fast_config());

    let ctx = Context::background().with_timeout(Duration::from_millis(200));
    let result = timeout(Duration::from_secs(5), connector.connect(&ctx)).await?;
    assert!(matches!(result, Err(Error::NoAvailableLeader)));
    Ok(())
}

#[tokio::test]
async fn canceled_context_returns_without_dialing() -> Result<()> {
    init_tracing();
    let a = FakeServer::bind().await?.start(Behavior::Leader);
    let (dialer, dialed) = recording_dialer();
    let connector = Connector::new(1, store_of(&[&a.address]), fast_config().with_dial(dialer));

    let (ctx, handle) = Context::background().with_cancel();
    handle.cancel();

    let result = timeout(Duration::from_secs(1), connector.connect(&ctx)).await?;
    assert!(matches!(result, Err(Error::NoAvailableLeader)));
    assert!(dialed.lock().is_empty());
    Ok(())
}

#[tokio::test]
async fn falls_back_to_legacy_protocol() -> Result<()> {
    init_tracing();
    let legacy = FakeServer::bind().await?.start(Behavior::LegacyOnly);

    let (dialer, dialed) = recording_dialer();
    let connector = Connector::new(
        1,
        store_of(&[&legacy.address]),
        fast_config().with_dial(dialer),
    );

    let protocol = timeout(
        Duration::from_secs(5),
        connector.connect(&Context::background()),
    )
    .await??;

    assert_eq!(protocol.version(), VERSION_LEGACY);
    assert_eq!(dialed.lock().len(), 2);
    Ok(())
}

#[tokio::test]
async fn unreachable_candidate_is_skipped() -> Result<()> {
    init_tracing();
    let dead = dead_address().await?;
    let leader = FakeServer::bind().await?.start(Behavior::Leader);

    let connector = Connector::new(1, store_of(&[&dead, &leader.address]), fast_config());
    let protocol = timeout(
        Duration::from_secs(5),
        connector.connect(&Context::background()),
    )
    .await??;

    assert!(!protocol.is_broken().await);
    Ok(())
}

#[tokio::test]
async fn store_is_reread_on_every_pass() -> Result<()> {
    init_tracing();
    let leader = FakeServer::bind().await?.start(Behavior::Leader);
    let store = Arc::new(InMemoryNodeStore::new());
    let connector = Connector::new(1, store.clone(), fast_config());

    let address = leader.address.clone();
    let updater = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        store
            .set(
                &Context::background(),
                &[NodeInfo::new(1, address, NodeRole::Voter)],
            )
            .await
    });

    let ctx = Context::background().with_timeout(Duration::from_secs(5));
    connector.connect(&ctx).await?;
    updater.await??;
    Ok(())
}
