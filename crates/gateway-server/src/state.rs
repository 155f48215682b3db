//! Shared application state handed to every handler via `State<AppState>`.

use crate::budget::BudgetGate;
use crate::health::{HealthChecker, HealthConfig};
use crate::persistence::PersistentModelRepository;
use crate::quota::QuotaGate;
use crate::reconcile::Recorder;
use gateway_config::{ConfigHandle, GatewayConfig};
use gateway_migrations::{schema, DatabasePool, MigrationConfig, Migrator, Repository};
use gateway_resilience::{MemoryCounterStore, RedisCounterStore, SharedCounterStore};
use gateway_routing::{EndpointSelector, ModelResolver, SelectorConfig};
use gateway_telemetry::{Metrics, MetricsConfig};
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;

/// Everything a request handler needs, cloned cheaply (every field is an `Arc` or a
/// `Clone`-cheap handle) into each request's extension set.
#[derive(Clone)]
pub struct AppState {
    /// Hot-reloadable configuration snapshot.
    pub config: ConfigHandle,
    /// Persistent store: tokens, models, usage, budgets.
    pub repository: Arc<Repository>,
    /// Fast counter store: rate-limit windows, active-user sets.
    pub counters: SharedCounterStore,
    /// HTTP client used to forward requests upstream.
    pub http_client: reqwest::Client,
    /// Resolves a caller-supplied model identifier to its endpoint chain.
    pub model_resolver: Arc<ModelResolver<PersistentModelRepository>>,
    /// Picks the next endpoint to attempt within a chain, skipping open breakers.
    pub endpoint_selector: Arc<EndpointSelector>,
    /// Liveness/readiness/startup aggregation.
    pub health: Arc<HealthChecker>,
    /// RPM/TPM/TPH/TPD enforcement.
    pub quota: Arc<QuotaGate>,
    /// Monthly output-token budget enforcement.
    pub budget: Arc<BudgetGate>,
    /// Post-response usage and audit-log recorder.
    pub recorder: Arc<Recorder>,
    /// Prometheus metrics registry, rendered by the `/metrics` endpoint.
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Start building an `AppState` from a loaded configuration.
    #[must_use]
    pub fn builder(config: GatewayConfig) -> AppStateBuilder {
        AppStateBuilder::new(config)
    }
}

/// Builds an [`AppState`], opening the persistent and fast-store connections.
pub struct AppStateBuilder {
    config: GatewayConfig,
    http_client: Option<reqwest::Client>,
    selector_config: SelectorConfig,
    health_config: HealthConfig,
}

impl AppStateBuilder {
    fn new(config: GatewayConfig) -> Self {
        let selector_config = SelectorConfig {
            failure_threshold: config.breaker.failure_threshold,
            open_duration: config.breaker.open_duration,
        };
        Self {
            config,
            http_client: None,
            selector_config,
            health_config: HealthConfig::default(),
        }
    }

    /// Override the outbound HTTP client, e.g. to inject a mock connector in tests.
    #[must_use]
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Override the endpoint selector's round-robin/breaker tuning.
    #[must_use]
    pub fn selector_config(mut self, config: SelectorConfig) -> Self {
        self.selector_config = config;
        self
    }

    /// Connect the persistent and fast stores and assemble the final state.
    ///
    /// # Errors
    /// Returns a boxed error if either store fails to connect.
    pub async fn build(self) -> Result<AppState, Box<dyn std::error::Error + Send + Sync>> {
        let persistent_url = self.config.store.persistent_store_url.expose_secret().clone();
        let fast_url = self.config.store.fast_store_url.expose_secret().clone();

        let migration_config = MigrationConfig::builder()
            .database_url(persistent_url)
            .build()
            .map_err(|e| Box::<dyn std::error::Error + Send + Sync>::from(e.to_string()))?;

        let pool = Arc::new(DatabasePool::new(migration_config.clone()).await?);

        let mut migrator = Migrator::with_pool(pool.clone(), migration_config);
        migrator.add_migrations(schema::all_migrations());
        migrator.run_pending().await?;

        let repository = Arc::new(Repository::new(pool));

        let counters: SharedCounterStore = if fast_url.is_empty() || fast_url == "memory://" {
            Arc::new(MemoryCounterStore::new())
        } else {
            Arc::new(RedisCounterStore::connect(&fast_url).await?)
        };

        let http_client = self.http_client.unwrap_or_else(|| {
            reqwest::Client::builder()
                .timeout(self.config.request_deadline)
                .build()
                .expect("reqwest client config is static and always valid")
        });

        let model_repository = Arc::new(PersistentModelRepository::new(repository.clone()));
        let model_resolver = Arc::new(ModelResolver::new(model_repository));
        let endpoint_selector = Arc::new(EndpointSelector::new(counters.clone(), self.selector_config));

        let health = Arc::new(HealthChecker::new(self.health_config));
        let quota = Arc::new(QuotaGate::new(repository.clone(), counters.clone(), self.config.rate_limit_defaults));
        let budget = Arc::new(BudgetGate::new(repository.clone(), counters.clone()));
        let recorder = Arc::new(Recorder::new(repository.clone(), counters.clone()));
        let metrics = Arc::new(
            Metrics::new(&MetricsConfig::default())
                .map_err(|e| Box::<dyn std::error::Error + Send + Sync>::from(e.to_string()))?,
        );

        Ok(AppState {
            config: ConfigHandle::new(self.config),
            repository,
            counters,
            http_client,
            model_resolver,
            endpoint_selector,
            health,
            quota,
            budget,
            recorder,
            metrics,
        })
    }

    /// Assemble the state directly from already-open dependencies, bypassing store
    /// connection. Used by tests to wire in-memory fixtures.
    #[must_use]
    pub fn build_with(
        self,
        repository: Arc<Repository>,
        counters: SharedCounterStore,
    ) -> AppState {
        let http_client = self.http_client.unwrap_or_else(|| {
            reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("reqwest client config is static and always valid")
        });

        let model_repository = Arc::new(PersistentModelRepository::new(repository.clone()));
        let model_resolver = Arc::new(ModelResolver::new(model_repository));
        let endpoint_selector = Arc::new(EndpointSelector::new(counters.clone(), self.selector_config));
        let health = Arc::new(HealthChecker::new(self.health_config));
        let quota = Arc::new(QuotaGate::new(repository.clone(), counters.clone(), self.config.rate_limit_defaults));
        let budget = Arc::new(BudgetGate::new(repository.clone(), counters.clone()));
        let recorder = Arc::new(Recorder::new(repository.clone(), counters.clone()));
        let metrics = Arc::new(
            Metrics::new(&MetricsConfig::default()).expect("metrics registry config is static and always valid"),
        );

        AppState {
            config: ConfigHandle::new(self.config),
            repository,
            counters,
            http_client,
            model_resolver,
            endpoint_selector,
            health,
            quota,
            budget,
            recorder,
            metrics,
        }
    }
}
