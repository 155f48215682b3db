//! Shared harness for spinning up a fully wired gateway router against an
//! in-memory database and an in-memory counter store.

use gateway_config::{BreakerConfig, GatewayConfig, RateLimitDefaults, ServerConfig, StoreConfig};
use gateway_migrations::{schema, DatabasePool, MigrationConfig, Migrator, Repository};
use gateway_resilience::MemoryCounterStore;
use gateway_server::routes::create_router;
use gateway_server::AppState;
use secrecy::Secret;
use std::sync::Arc;
use std::time::Duration;

/// A running test harness: the router, plus the open pool fixtures can write into.
pub struct TestGateway {
    pub router: axum::Router,
    pub pool: Arc<DatabasePool>,
}

/// Default test config: global limits high enough to stay out of the way unless a
/// scenario overrides them on the token/dept row directly.
pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        server: ServerConfig::default(),
        store: StoreConfig {
            persistent_store_url: Secret::new("sqlite::memory:".to_string()),
            fast_store_url: Secret::new("memory://".to_string()),
        },
        rate_limit_defaults: RateLimitDefaults::default(),
        request_deadline: Duration::from_secs(120),
        breaker: BreakerConfig { failure_threshold: 2, open_duration: Duration::from_secs(30) },
        developers: Vec::new(),
    }
}

/// Build a fresh, migrated in-memory gateway with no tokens/models yet inserted.
///
/// A single connection is required: each new connection to `sqlite::memory:` gets
/// its own private database, so a pool of more than one would see the migrated
/// schema on only one connection.
pub async fn spin_up() -> TestGateway {
    spin_up_with_config(test_config()).await
}

/// Same as [`spin_up`], with a caller-supplied config (e.g. tighter rate limits).
pub async fn spin_up_with_config(config: GatewayConfig) -> TestGateway {
    let migration_config = MigrationConfig::builder()
        .database_url("sqlite::memory:".to_string())
        .max_connections(1)
        .build()
        .expect("valid migration config");

    let pool = Arc::new(DatabasePool::new(migration_config.clone()).await.expect("in-memory pool opens"));

    let mut migrator = Migrator::with_pool(pool.clone(), migration_config);
    migrator.add_migrations(schema::all_migrations());
    migrator.run_pending().await.expect("migrations apply cleanly");

    let repository = Arc::new(Repository::new(pool.clone()));
    let counters = Arc::new(MemoryCounterStore::new());

    let state = AppState::builder(config).build_with(repository, counters);
    let router = create_router(state);

    TestGateway { router, pool }
}

/// A minimal chat-completion request body for a given model.
pub fn chat_request(model: &str, stream: bool) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "messages": [{"role": "user", "content": "hi"}],
        "stream": stream,
    })
}
