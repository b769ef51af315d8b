//! Service wiring: persistence backend, inventory service and rate limiting.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use stockroom_core::{Clock, DomainResult, SystemClock, UuidV7Generator};
use stockroom_infra::{InMemoryPersistence, InventoryService, Persistence, PostgresPersistence};
use stockroom_ratelimit::{
    LoginGuard, RateLimitConfig, RateLimiter, Sweep, Sweeper, SweeperHandle, TokenBucketStore,
};

use crate::config::AppConfig;

pub struct AppServices {
    pub inventory: InventoryService,
    pub login: Arc<LoginGuard>,
    buckets: Arc<TokenBucketStore>,
    limits: RateLimitConfig,
    shutdown: CancellationToken,
}

impl AppServices {
    pub fn new(persistence: Arc<dyn Persistence>, config: &AppConfig, clock: Arc<dyn Clock>) -> Self {
        let inventory = InventoryService::new(
            persistence,
            clock.clone(),
            Arc::new(UuidV7Generator),
            config.service_config(),
        );
        let buckets = Arc::new(TokenBucketStore::new(&config.rate_limit, clock.clone()));
        let login = Arc::new(LoginGuard::new(
            buckets.clone(),
            config.rate_limit.login_limit,
            config.lockout,
            clock,
        ));
        Self {
            inventory,
            login,
            buckets,
            limits: config.rate_limit.clone(),
            shutdown: CancellationToken::new(),
        }
    }

    /// In-memory backend on the system clock (dev/test).
    pub fn in_memory(config: &AppConfig) -> Self {
        Self::new(
            Arc::new(InMemoryPersistence::new()),
            config,
            Arc::new(SystemClock::new()),
        )
    }

    /// Take one token from the caller's general bucket.
    pub fn check_client(&self, client: &str) -> DomainResult<()> {
        self.buckets
            .check(&format!("client:{client}"), self.limits.default_limit)
    }

    /// Token for one request's unit of work; cancelled on shutdown.
    pub fn request_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Background sweep of idle buckets and expired lockout windows.
    pub fn start_sweeper(&self) -> SweeperHandle {
        let targets: Vec<Arc<dyn Sweep>> = vec![self.buckets.clone(), self.login.clone()];
        Sweeper::spawn(targets, self.limits.cleanup_interval)
    }
}

/// Select the backend from `config`: Postgres (schema applied on start) when
/// persistent stores are requested, in-memory otherwise.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    if !config.use_persistent_stores {
        tracing::info!("using in-memory stores");
        return Ok(AppServices::in_memory(config));
    }

    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")?;
    let pg = PostgresPersistence::connect(url, config.database_max_connections)
        .await
        .context("failed to connect to Postgres")?;
    pg.migrate().await.context("failed to apply schema")?;
    tracing::info!("using Postgres stores");

    Ok(AppServices::new(Arc::new(pg), config, Arc::new(SystemClock::new())))
}
