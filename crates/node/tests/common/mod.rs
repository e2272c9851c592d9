//! Shared setup for node integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use strandgraph_node::{DgnRegistry, GraphShard, SqOutput};
use strandgraph_persist::InMemoryPersistor;
use strandgraph_test_utils::{FailureMode, FlakyPersistor};
use strandgraph_types::{GraphConfig, NamespaceId};
use tokio::sync::mpsc::UnboundedReceiver;

/// Best-effort tracing init so failures come with context.
fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(fmt::layer().with_test_writer())
        .try_init();
}

/// A shard over a plain in-memory persistor.
pub fn memory_shard(
    config: GraphConfig,
) -> (Arc<GraphShard>, Arc<InMemoryPersistor>, DgnRegistry, UnboundedReceiver<SqOutput>) {
    init_tracing();
    let persistor = Arc::new(InMemoryPersistor::new());
    let registry = DgnRegistry::new();
    let (shard, sq_rx) = GraphShard::launch(
        NamespaceId::DEFAULT,
        config,
        Arc::clone(&persistor) as Arc<dyn strandgraph_persist::Persistor>,
        registry.clone(),
    );
    (shard, persistor, registry, sq_rx)
}

/// A shard over a fault-injecting persistor wrapping in-memory storage.
pub fn flaky_shard(
    config: GraphConfig,
    mode: FailureMode,
) -> (
    Arc<GraphShard>,
    Arc<FlakyPersistor<InMemoryPersistor>>,
    DgnRegistry,
    UnboundedReceiver<SqOutput>,
) {
    init_tracing();
    let inner = Arc::new(InMemoryPersistor::new());
    let persistor = Arc::new(FlakyPersistor::new(inner, mode));
    let registry = DgnRegistry::new();
    let (shard, sq_rx) = GraphShard::launch(
        NamespaceId::DEFAULT,
        config,
        Arc::clone(&persistor) as Arc<dyn strandgraph_persist::Persistor>,
        registry.clone(),
    );
    (shard, persistor, registry, sq_rx)
}

/// Receives the next standing-query output or panics after two seconds.
pub async fn next_output(rx: &mut UnboundedReceiver<SqOutput>) -> SqOutput {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for standing-query output")
        .expect("output channel closed")
}

/// Drains outputs until one satisfies the predicate, or panics after two
/// seconds.
pub async fn output_matching(
    rx: &mut UnboundedReceiver<SqOutput>,
    mut predicate: impl FnMut(&SqOutput) -> bool,
) -> SqOutput {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let output = rx.recv().await.expect("output channel closed");
            if predicate(&output) {
                return output;
            }
        }
    })
    .await
    .expect("timed out waiting for matching standing-query output")
}
