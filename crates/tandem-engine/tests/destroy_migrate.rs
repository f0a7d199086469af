//! Destroy and migrate transitions.

mod common;

use common::*;
use tandem_core::{DestroyPayload, Identity, MigratePayload, MigrateTarget, SiteRecord};
use tandem_engine::{Checkout, ComposeFile, EngineError};
use tandem_state::{MemoryStore, SiteStore};

fn name() -> String {
    identity().name().to_string()
}

fn destroy_payload() -> DestroyPayload {
    DestroyPayload {
        repo: REPO.to_string(),
        branch: Some(BRANCH.to_string()),
    }
}

// ── Destroy ────────────────────────────────────────────────────────

#[tokio::test]
async fn destroy_master_keeps_snapshots() {
    let store = MemoryStore::new();
    seed_site(&store, Some("node-a"), None).await;
    let node = Node::new("node-a", &store).with_old_checkout();

    node.engine()
        .destroy(&destroy_payload(), "node-a")
        .await
        .unwrap();

    let v = vol("data");
    assert_eq!(
        node.trace(),
        vec![
            "down old".to_string(),
            format!("deregister {}", name()),
            format!("schedule snapshot {v} 0"),
            format!("schedule purge {v} 0"),
            format!("kv delete site/{}", name()),
            format!("snapshot {v}"),
            "down old -v".to_string(),
            "clean old".to_string(),
        ]
    );
    assert!(store.site(&name()).await.unwrap().is_none());
}

#[tokio::test]
async fn destroy_master_with_slave_stops_replication() {
    let store = MemoryStore::new();
    seed_site(&store, Some("node-a"), Some("node-b")).await;
    let node = Node::new("node-a", &store).with_old_checkout();

    node.engine()
        .destroy(&destroy_payload(), "node-a")
        .await
        .unwrap();

    assert_eq!(
        node.trace()[2],
        format!("schedule replicate {} 0 10.0.0.2", vol("data"))
    );
}

#[tokio::test]
async fn destroy_master_without_checkout_deletes_recorded_volumes() {
    let store = MemoryStore::new();
    seed_site(&store, Some("node-a"), None).await;
    let node = Node::new("node-a", &store);

    node.engine()
        .destroy(&destroy_payload(), "node-a")
        .await
        .unwrap();

    let v = vol("data");
    assert_eq!(
        node.trace(),
        vec![
            format!("schedule snapshot {v} 0"),
            format!("schedule purge {v} 0"),
            format!("kv delete site/{}", name()),
            format!("snapshot {v}"),
            format!("delete {v}"),
            "clean new".to_string(),
        ]
    );
}

#[tokio::test]
async fn destroy_slave_only_disables_purge() {
    let store = MemoryStore::new();
    seed_site(&store, Some("node-a"), Some("node-b")).await;
    let node = Node::new("node-b", &store);

    node.engine()
        .destroy(&destroy_payload(), "node-b")
        .await
        .unwrap();

    assert_eq!(node.trace(), vec![format!("schedule purge {} 0", vol("data"))]);
    assert!(store.site(&name()).await.unwrap().is_some());
}

#[tokio::test]
async fn destroy_unrelated_node_does_nothing() {
    let store = MemoryStore::new();
    seed_site(&store, Some("node-a"), Some("node-b")).await;
    let node = Node::new("node-c", &store);

    node.engine()
        .destroy(&destroy_payload(), "node-c")
        .await
        .unwrap();

    assert!(node.trace().is_empty());
}

#[tokio::test]
async fn destroy_requires_branch() {
    let store = MemoryStore::new();
    let node = Node::new("node-a", &store);
    let payload = DestroyPayload {
        repo: REPO.to_string(),
        branch: None,
    };

    let err = node.engine().destroy(&payload, "node-a").await.unwrap_err();
    assert!(matches!(err, EngineError::Configuration(_)));
}

// ── Migrate ────────────────────────────────────────────────────────

const TARGET_BRANCH: &str = "staging";

const TARGET_COMPOSE: &str = r#"
services:
  web:
    environment:
      URL: https://staging.shop.example.com
volumes:
  data:
    driver: btrfs
  logs:
    driver: btrfs
"#;

fn target_identity() -> Identity {
    Identity::resolve(REPO, TARGET_BRANCH)
}

fn source_vol(local: &str) -> String {
    format!("{}_{local}", identity().project())
}

fn target_vol(local: &str) -> String {
    format!("{}_{local}", target_identity().project())
}

/// Source served by `source_master`, target by `target_master`.
async fn seed_migration(store: &MemoryStore, source_master: &str, target_master: &str) {
    store
        .put_site(&SiteRecord {
            name: name(),
            deploy_date: Some(OLD_DATE.to_string()),
            node: Some(source_master.to_string()),
            volumes: vec![source_vol("data"), source_vol("cache")],
            ..Default::default()
        })
        .await
        .unwrap();
    store
        .put_site(&SiteRecord {
            name: target_identity().name().to_string(),
            deploy_date: Some(OLD_DATE.to_string()),
            node: Some(target_master.to_string()),
            volumes: vec![target_vol("data"), target_vol("logs")],
            ..Default::default()
        })
        .await
        .unwrap();
}

/// Give `node` a live checkout of the migration target.
fn with_target_checkout(node: Node) -> Node {
    let path = Checkout::at(&node.world.deploy_root, &target_identity(), OLD_DATE).path;
    node.world.checkouts.lock().insert(path);
    *node.world.compose.lock() = ComposeFile::parse(TARGET_COMPOSE).unwrap();
    node
}

fn migrate_payload() -> MigratePayload {
    MigratePayload {
        repo: REPO.to_string(),
        branch: Some(BRANCH.to_string()),
        target: MigrateTarget {
            repo: None,
            branch: Some(TARGET_BRANCH.to_string()),
        },
    }
}

#[tokio::test]
async fn migrate_on_shared_master_restores_matching_volumes() {
    let store = MemoryStore::new();
    seed_migration(&store, "node-a", "node-a").await;
    let node = with_target_checkout(Node::new("node-a", &store));

    node.engine()
        .migrate(&migrate_payload(), "node-a")
        .await
        .unwrap();

    assert_eq!(
        node.trace(),
        vec![
            "down new".to_string(),
            format!("restore {} as {}", source_vol("data"), target_vol("data")),
            "up new".to_string(),
        ]
    );
}

#[tokio::test]
async fn migrate_between_masters_sends_then_restores() {
    let store = MemoryStore::new();
    seed_migration(&store, "node-a", "node-b").await;
    let source = Node::new("node-a", &store);
    let target = with_target_checkout(Node::new("node-b", &store));
    let bystander = Node::new("node-c", &store);

    let payload = migrate_payload();
    let (es, et, eb) = (source.engine(), target.engine(), bystander.engine());
    let (a, b, c) = tokio::join!(
        es.migrate(&payload, "node-a"),
        et.migrate(&payload, "node-b"),
        eb.migrate(&payload, "node-c"),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();

    let data = source_vol("data");
    assert_eq!(
        source.trace(),
        vec![
            format!("snapshot {data}"),
            format!("send {data}@snap 10.0.0.2"),
            format!("kv put transfer/{}/success", name()),
        ]
    );
    assert_eq!(
        target.trace(),
        vec![
            format!("kv delete transfer/{}/", name()),
            "down new".to_string(),
            format!("restore {data} as {}", target_vol("data")),
            "up new".to_string(),
        ]
    );
    assert!(bystander.trace().is_empty());
}

#[tokio::test]
async fn migrate_needs_a_target() {
    let store = MemoryStore::new();
    let node = Node::new("node-a", &store);
    let mut payload = migrate_payload();
    payload.target = MigrateTarget::default();

    let err = node.engine().migrate(&payload, "node-a").await.unwrap_err();
    assert!(matches!(err, EngineError::Configuration(_)));
    assert!(node.trace().is_empty());
}

#[tokio::test]
async fn migrate_to_undeployed_target_is_rejected_on_source() {
    let store = MemoryStore::new();
    seed_migration(&store, "node-a", "node-b").await;
    store
        .delete_site(target_identity().name())
        .await
        .unwrap();
    let node = Node::new("node-a", &store);

    let err = node
        .engine()
        .migrate(&migrate_payload(), "node-a")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Configuration(_)));
}
