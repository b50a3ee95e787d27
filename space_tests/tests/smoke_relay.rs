use std::sync::Arc;

use space_client::loader::MemoryLoader;
use space_tests::{connect_client, init_tracing, start_relay};

/// Smoke test: a client can join a fresh relay and sees only itself.
#[tokio::test]
async fn client_joins_empty_space() -> anyhow::Result<()> {
    init_tracing();
    let addr = start_relay().await?;
    let space = connect_client(addr, "solo", Arc::new(MemoryLoader::new())).await?;
    assert!(space.is_active());
    assert_eq!(space.clients().len(), 1);
    assert_eq!(space.meta().map(|m| m.name.as_str()), Some("lobby"));
    assert!(space.entities().is_empty());
    Ok(())
}
