//! Mindgraph Core Integration Tests

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mindgraph_core::{
    Error, ErrorKind, Result,
    application::{
        CommandServices, CreateNodeCommand, CreateNodeResult, NodeCommandHandler,
        NodeQueryService, RequestContext, UpdateNodeCommand,
    },
    config::{AnalyzerConfig, Config},
    domain::{
        Content, Edge, EdgeReader, EdgeWriter, InMemoryEventStore, Node, NodeReader, NodeWriter,
        PageRequest, Tags, Title, UserId, Weight,
    },
    infrastructure::{
        EdgeRepository, IdempotencyKey, IdempotencyStore, NodeRepository, QueryCache,
        StoreEdgeReader, StoreIdempotencyStore, StoreNodeReader,
    },
    storage::{
        Key, MemoryStore, Operation, Query, QueryPage, Record, ScanFilter, SqliteStore, Store,
    },
};
use tokio::time::Instant;

fn handler_over(store: Arc<dyn Store>, config: &Config) -> NodeCommandHandler {
    NodeCommandHandler::new(CommandServices::new(
        store,
        Arc::new(InMemoryEventStore::new()),
        Arc::new(QueryCache::default()),
        config,
    ))
}

fn alice() -> UserId {
    UserId::new("alice").unwrap()
}

/// Forwards to an inner store, letting a test interfere with transactions
struct InterferingStore {
    inner: Arc<MemoryStore>,
    /// Committed straight to `inner` just before the next transaction
    competing: Mutex<Option<Vec<Operation>>>,
    fail_transactions: bool,
}

impl InterferingStore {
    fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            competing: Mutex::new(None),
            fail_transactions: false,
        }
    }

    fn failing(inner: Arc<MemoryStore>) -> Self {
        Self {
            fail_transactions: true,
            ..Self::new(inner)
        }
    }
}

#[async_trait]
impl Store for InterferingStore {
    async fn get(&self, key: &Key) -> Result<Option<Record>> {
        self.inner.get(key).await
    }

    async fn query(&self, query: &Query) -> Result<QueryPage> {
        self.inner.query(query).await
    }

    async fn scan(&self, filter: &ScanFilter, limit: Option<usize>) -> Result<Vec<Record>> {
        self.inner.scan(filter, limit).await
    }

    async fn transact(&self, operations: Vec<Operation>) -> Result<()> {
        if self.fail_transactions {
            return Err(Error::internal("store unavailable"));
        }
        let competing = self.competing.lock().unwrap().take();
        if let Some(competing) = competing {
            self.inner.transact(competing).await?;
        }
        self.inner.transact(operations).await
    }
}

#[tokio::test]
async fn test_replayed_create_returns_original_result() {
    let store = Arc::new(MemoryStore::new());
    let handler = handler_over(store.clone(), &Config::default());
    let ctx = RequestContext::new();
    let user = alice();

    handler
        .create_node(&ctx, &user, CreateNodeCommand::new("cqrs architecture"))
        .await
        .unwrap();

    let command = CreateNodeCommand::new("cqrs pattern").with_idempotency_key("req-42");
    let first = handler.create_node(&ctx, &user, command.clone()).await.unwrap();
    let replay = handler.create_node(&ctx, &user, command).await.unwrap();

    assert!(!first.replayed);
    assert!(replay.replayed);
    assert_eq!(replay.node.id, first.node.id);
    assert_eq!(replay.connections, first.connections);

    let nodes = StoreNodeReader::new(&*store).list_all(&user).await.unwrap();
    let edges = StoreEdgeReader::new(&*store).list_all(&user).await.unwrap();
    assert_eq!(nodes.len(), 2);
    assert_eq!(edges.len(), 1);

    // a different key is a different request
    let other = handler
        .create_node(
            &ctx,
            &user,
            CreateNodeCommand::new("cqrs pattern").with_idempotency_key("req-43"),
        )
        .await
        .unwrap();
    assert_ne!(other.node.id, first.node.id);
}

#[tokio::test]
async fn test_cqrs_example_scores_one_third() {
    let store = Arc::new(MemoryStore::new());
    let handler = handler_over(store, &Config::default());
    let ctx = RequestContext::new();
    let user = alice();

    let existing = handler
        .create_node(&ctx, &user, CreateNodeCommand::new("CQRS architecture"))
        .await
        .unwrap();
    let created = handler
        .create_node(&ctx, &user, CreateNodeCommand::new("CQRS pattern"))
        .await
        .unwrap();

    assert_eq!(created.connections.len(), 1);
    assert_eq!(created.connections[0].target_id, existing.node.id);
    assert!((created.connections[0].score - 1.0 / 3.0).abs() < 1e-12);
    assert_eq!(created.connections[0].reason.shared_keywords, vec!["cqrs".to_string()]);
}

#[tokio::test]
async fn test_threshold_boundary_is_inclusive() {
    let at_boundary = Config {
        analyzer: AnalyzerConfig {
            similarity_threshold: 1.0 / 3.0,
            ..Default::default()
        },
        ..Default::default()
    };
    let above_boundary = Config {
        analyzer: AnalyzerConfig {
            similarity_threshold: 1.0 / 3.0 + 1e-9,
            ..Default::default()
        },
        ..Default::default()
    };

    for (config, expected) in [(at_boundary, 1), (above_boundary, 0)] {
        let handler = handler_over(Arc::new(MemoryStore::new()), &config);
        let ctx = RequestContext::new();
        let user = alice();
        handler
            .create_node(&ctx, &user, CreateNodeCommand::new("cqrs architecture"))
            .await
            .unwrap();
        let created = handler
            .create_node(&ctx, &user, CreateNodeCommand::new("cqrs pattern"))
            .await
            .unwrap();
        assert_eq!(created.connections.len(), expected);
    }
}

#[tokio::test(start_paused = true)]
async fn test_safe_update_survives_concurrent_writer() {
    let inner = Arc::new(MemoryStore::new());
    let racing = Arc::new(InterferingStore::new(inner.clone()));
    let handler = handler_over(racing.clone(), &Config::default());
    let ctx = RequestContext::new();
    let user = alice();

    let node = handler
        .create_node(&ctx, &user, CreateNodeCommand::new("draft about lifetimes"))
        .await
        .unwrap()
        .node;

    // another request retitles the node from the same version
    let mut theirs = StoreNodeReader::new(&*inner)
        .get(&user, node.id)
        .await
        .unwrap()
        .unwrap();
    let their_version = theirs.version;
    theirs
        .apply(mindgraph_core::domain::NodeChanges {
            title: Some(mindgraph_core::domain::Title::new("Lifetimes").unwrap()),
            ..Default::default()
        })
        .unwrap();
    let mut staged = Vec::new();
    NodeRepository::new(&*inner, &mut staged)
        .update(&theirs, their_version)
        .await
        .unwrap();
    *racing.competing.lock().unwrap() = Some(staged);

    let started = Instant::now();
    let updated = handler
        .safe_update_node(
            &ctx,
            &user,
            UpdateNodeCommand::new(node.id).content("notes about lifetimes and borrowing"),
        )
        .await
        .unwrap();

    // one backoff of 100ms before the second attempt
    assert_eq!(started.elapsed(), Duration::from_millis(100));
    assert_eq!(updated.version.value(), 3);
    assert_eq!(updated.title.as_str(), "Lifetimes");
    assert_eq!(updated.content.as_str(), "notes about lifetimes and borrowing");
}

#[tokio::test]
async fn test_plain_update_loses_race_without_overwriting() {
    let inner = Arc::new(MemoryStore::new());
    let racing = Arc::new(InterferingStore::new(inner.clone()));
    let handler = handler_over(racing.clone(), &Config::default());
    let ctx = RequestContext::new();
    let user = alice();

    let node = handler
        .create_node(&ctx, &user, CreateNodeCommand::new("draft about traits"))
        .await
        .unwrap()
        .node;

    let mut theirs = node.clone();
    theirs
        .apply(mindgraph_core::domain::NodeChanges {
            title: Some(mindgraph_core::domain::Title::new("Traits").unwrap()),
            ..Default::default()
        })
        .unwrap();
    let mut staged = Vec::new();
    NodeRepository::new(&*inner, &mut staged)
        .update(&theirs, node.version)
        .await
        .unwrap();
    *racing.competing.lock().unwrap() = Some(staged);

    let err = handler
        .update_node(&ctx, &user, UpdateNodeCommand::new(node.id).title("Generics"))
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let stored = StoreNodeReader::new(&*inner)
        .get(&user, node.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.title.as_str(), "Traits");
    assert_eq!(stored.version.value(), 2);
}

/// Every transaction conflicts
struct AlwaysConflicting(Arc<MemoryStore>);

#[async_trait]
impl Store for AlwaysConflicting {
    async fn get(&self, key: &Key) -> Result<Option<Record>> {
        self.0.get(key).await
    }

    async fn query(&self, query: &Query) -> Result<QueryPage> {
        self.0.query(query).await
    }

    async fn scan(&self, filter: &ScanFilter, limit: Option<usize>) -> Result<Vec<Record>> {
        self.0.scan(filter, limit).await
    }

    async fn transact(&self, operations: Vec<Operation>) -> Result<()> {
        Err(Error::conflict("record", operations[0].target(), "concurrent writer"))
    }
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_ask_caller_to_retry() {
    let inner = Arc::new(MemoryStore::new());
    let ctx = RequestContext::new();
    let user = alice();
    let node = handler_over(inner.clone(), &Config::default())
        .create_node(&ctx, &user, CreateNodeCommand::new("contended note"))
        .await
        .unwrap()
        .node;

    let handler = handler_over(Arc::new(AlwaysConflicting(inner)), &Config::default());
    let started = Instant::now();
    let err = handler
        .safe_update_node(&ctx, &user, UpdateNodeCommand::new(node.id).title("contended"))
        .await
        .unwrap_err();

    assert!(err.is_retry_exhausted());
    assert_eq!(err.code(), "E401");
    assert!(err.to_string().contains("Please retry"));
    // 100ms + 200ms between three attempts
    assert_eq!(started.elapsed(), Duration::from_millis(300));
}

#[tokio::test]
async fn test_delete_cascade_is_atomic() {
    let inner = Arc::new(MemoryStore::new());
    let handler = handler_over(inner.clone(), &Config::default());
    let ctx = RequestContext::new();
    let user = alice();

    let hub = handler
        .create_node(&ctx, &user, CreateNodeCommand::new("cqrs architecture"))
        .await
        .unwrap()
        .node;
    handler
        .create_node(&ctx, &user, CreateNodeCommand::new("cqrs pattern"))
        .await
        .unwrap();
    handler
        .create_node(&ctx, &user, CreateNodeCommand::new("cqrs architecture design"))
        .await
        .unwrap();

    let edges = StoreEdgeReader::new(&*inner);
    assert_eq!(edges.incoming(&user, hub.id).await.unwrap().len(), 2);
    let items_before = inner.len().await;

    let broken = handler_over(
        Arc::new(InterferingStore::failing(inner.clone())),
        &Config::default(),
    );
    let err = broken.delete_node(&ctx, &user, hub.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(err.to_string().starts_with("commit: "));
    assert_eq!(inner.len().await, items_before);
    assert_eq!(edges.incoming(&user, hub.id).await.unwrap().len(), 2);

    let deleted = handler.delete_node(&ctx, &user, hub.id).await.unwrap();
    assert_eq!(deleted.edges_removed, 2);
    assert!(StoreNodeReader::new(&*inner).get(&user, hub.id).await.unwrap().is_none());
    assert!(edges.list_all(&user).await.unwrap().is_empty());
    assert_eq!(inner.len().await, items_before - 3);
}

#[tokio::test]
async fn test_delete_conflicts_with_edge_linked_meanwhile() {
    let inner = Arc::new(MemoryStore::new());
    let racing = Arc::new(InterferingStore::new(inner.clone()));
    let handler = handler_over(racing.clone(), &Config::default());
    let ctx = RequestContext::new();
    let user = alice();

    let hub = handler
        .create_node(&ctx, &user, CreateNodeCommand::new("cqrs architecture"))
        .await
        .unwrap()
        .node;

    // another request creates a node linked to the hub and commits first
    let newcomer = Node::create(
        user.clone(),
        Title::default(),
        Content::new("cqrs pattern").unwrap(),
        Tags::empty(),
    );
    let edge = Edge::create(user.clone(), newcomer.id, hub.id, Weight::from_score(1.0 / 3.0)).unwrap();
    let mut staged = Vec::new();
    NodeRepository::new(&*inner, &mut staged)
        .insert(&newcomer)
        .await
        .unwrap();
    EdgeRepository::new(&*inner, &mut staged)
        .insert(&edge)
        .await
        .unwrap();
    *racing.competing.lock().unwrap() = Some(staged);

    let err = handler.delete_node(&ctx, &user, hub.id).await.unwrap_err();
    assert!(err.is_conflict());
    let nodes = StoreNodeReader::new(&*inner);
    let edges = StoreEdgeReader::new(&*inner);
    assert!(nodes.get(&user, hub.id).await.unwrap().is_some());
    assert_eq!(edges.incoming(&user, hub.id).await.unwrap().len(), 1);

    // once the new edge is visible the cascade takes it along
    let deleted = handler.delete_node(&ctx, &user, hub.id).await.unwrap();
    assert_eq!(deleted.edges_removed, 1);
    assert!(nodes.get(&user, hub.id).await.unwrap().is_none());
    assert!(edges.list_all(&user).await.unwrap().is_empty());
}

/// Operations of a keyed create committed by some other request
async fn create_committed_elsewhere(
    inner: &Arc<MemoryStore>,
    user: &UserId,
    command: &CreateNodeCommand,
) -> (Node, Vec<Operation>) {
    let node = Node::create(
        user.clone(),
        Title::default(),
        Content::new(command.content.as_str()).unwrap(),
        Tags::empty(),
    );
    let mut staged = Vec::new();
    NodeRepository::new(&**inner, &mut staged)
        .insert(&node)
        .await
        .unwrap();

    let key = IdempotencyKey::for_command(user, "create_node", command).unwrap();
    let result = CreateNodeResult {
        node: node.clone(),
        connections: Vec::new(),
        replayed: false,
    };
    let idempotency = StoreIdempotencyStore::new(inner.clone(), &Config::default().idempotency);
    staged.push(
        idempotency
            .record(&key, serde_json::to_value(&result).unwrap())
            .unwrap(),
    );
    (node, staged)
}

#[tokio::test]
async fn test_concurrent_duplicate_create_replays_winner() {
    let inner = Arc::new(MemoryStore::new());
    let racing = Arc::new(InterferingStore::new(inner.clone()));
    let handler = handler_over(racing.clone(), &Config::default());
    let ctx = RequestContext::new();
    let user = alice();
    let command = CreateNodeCommand::new("saga compensation").with_idempotency_key("req-7");

    let (winner, staged) = create_committed_elsewhere(&inner, &user, &command).await;
    *racing.competing.lock().unwrap() = Some(staged);

    let result = handler.create_node(&ctx, &user, command).await.unwrap();
    assert!(result.replayed);
    assert_eq!(result.node.id, winner.id);
    assert_eq!(StoreNodeReader::new(&*inner).list_all(&user).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_bulk_create_repeated_key_creates_once() {
    let store = Arc::new(MemoryStore::new());
    let handler = handler_over(store.clone(), &Config::default());
    let ctx = RequestContext::new();
    let user = alice();
    let keyed = CreateNodeCommand::new("saga orchestration").with_idempotency_key("bulk-1");

    let result = handler
        .bulk_create_nodes(
            &ctx,
            &user,
            vec![keyed.clone(), CreateNodeCommand::new("outbox relay"), keyed.clone()],
        )
        .await
        .unwrap();

    assert!(result.failed.is_empty());
    assert_eq!(result.replayed, 1);
    assert_eq!(result.nodes.len(), 3);
    assert_eq!(result.nodes[0].id, result.nodes[2].id);
    assert_eq!(result.nodes[1].content.as_str(), "outbox relay");
    assert_eq!(StoreNodeReader::new(&*store).list_all(&user).await.unwrap().len(), 2);

    let replay = handler.create_node(&ctx, &user, keyed).await.unwrap();
    assert!(replay.replayed);
    assert_eq!(replay.node.id, result.nodes[0].id);
}

#[tokio::test]
async fn test_bulk_create_replays_key_stored_meanwhile() {
    let inner = Arc::new(MemoryStore::new());
    let racing = Arc::new(InterferingStore::new(inner.clone()));
    let handler = handler_over(racing.clone(), &Config::default());
    let ctx = RequestContext::new();
    let user = alice();
    let keyed = CreateNodeCommand::new("saga compensation").with_idempotency_key("bulk-7");

    let (winner, staged) = create_committed_elsewhere(&inner, &user, &keyed).await;
    *racing.competing.lock().unwrap() = Some(staged);

    let result = handler
        .bulk_create_nodes(&ctx, &user, vec![CreateNodeCommand::new("outbox relay"), keyed])
        .await
        .unwrap();

    assert_eq!(result.replayed, 1);
    assert_eq!(result.nodes.len(), 2);
    assert_eq!(result.nodes[0].content.as_str(), "outbox relay");
    assert_eq!(result.nodes[1].id, winner.id);
    assert_eq!(StoreNodeReader::new(&*inner).list_all(&user).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_bulk_delete_reports_invalid_ids() {
    let store = Arc::new(MemoryStore::new());
    let handler = handler_over(store.clone(), &Config::default());
    let ctx = RequestContext::new();
    let user = alice();

    let mut ids = Vec::new();
    for topic in ["alpha", "bravo", "charlie", "delta", "echo"] {
        let created = handler
            .create_node(&ctx, &user, CreateNodeCommand::new(format!("{} notes", topic)))
            .await
            .unwrap();
        ids.push(created.node.id.to_string());
    }
    let missing = mindgraph_core::domain::NodeId::generate().to_string();
    ids.insert(2, missing.clone());

    let result = handler.bulk_delete_nodes(&ctx, &user, ids).await.unwrap();
    assert_eq!(result.deleted_count, 5);
    assert_eq!(result.failed_ids, vec![missing]);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_cancelled_request_leaves_no_writes() {
    let store = Arc::new(MemoryStore::new());
    let handler = handler_over(store.clone(), &Config::default());
    let ctx = RequestContext::new();
    ctx.cancel();

    let err = handler
        .create_node(&ctx, &alice(), CreateNodeCommand::new("never stored"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_sqlite_store_end_to_end() {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().await.unwrap());
    let config = Config::default();
    let cache = Arc::new(QueryCache::new(&config.cache));
    let handler = NodeCommandHandler::new(CommandServices::new(
        store.clone(),
        Arc::new(InMemoryEventStore::new()),
        cache.clone(),
        &config,
    ));
    let queries = NodeQueryService::new(store.clone(), cache, &config.limits);
    let ctx = RequestContext::new();
    let user = alice();

    let a = handler
        .create_node(&ctx, &user, CreateNodeCommand::new("sqlite write ahead logging"))
        .await
        .unwrap();
    let command = CreateNodeCommand::new("sqlite logging modes").with_idempotency_key("k1");
    let b = handler.create_node(&ctx, &user, command.clone()).await.unwrap();
    assert_eq!(b.connections.len(), 1);
    assert!(handler.create_node(&ctx, &user, command).await.unwrap().replayed);

    let updated = handler
        .update_node(
            &ctx,
            &user,
            UpdateNodeCommand::new(a.node.id).title("WAL").expecting(1),
        )
        .await
        .unwrap();
    assert_eq!(updated.version.value(), 2);

    let detail = queries.get_node(&ctx, &user, a.node.id).await.unwrap();
    assert_eq!(detail.node.title.as_str(), "WAL");
    assert_eq!(detail.incoming.len(), 1);

    let page = queries
        .list_nodes(&ctx, &user, PageRequest::first(1))
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert!(page.has_more);

    let deleted = handler.delete_node(&ctx, &user, a.node.id).await.unwrap();
    assert_eq!(deleted.edges_removed, 1);
    let stats = queries.graph_stats(&ctx, &user).await.unwrap();
    assert_eq!((stats.node_count, stats.edge_count), (1, 0));
}
