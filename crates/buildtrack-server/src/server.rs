//! Application wiring: storage, cache, snapshot, change events and jobs.

use std::sync::Arc;

use anyhow::Context;
use buildtrack_cache::{
    CacheStore, ChangeBroadcaster, ChangeDispatcher, ChangeHandlerRegistry,
    FastTierEvictionHandler, InvalidationQueue,
};
use buildtrack_core::{ConstructionLog, DynRepository, Project, User, Vehicle};
use buildtrack_db_memory::create_repository;
use buildtrack_db_postgres::PostgresBackend;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{AppConfig, StorageBackend};
use crate::refresh::DailyRefreshJob;
use crate::services::{
    AdminService, CacheAdminService, ConstructionLogService, ProjectService, RoleGuard,
    ServiceCache, VehicleService,
};
use crate::snapshot::{RepositorySource, UserSnapshot};
use crate::sync::SnapshotSync;

/// One repository per entity type the services use.
#[derive(Clone)]
pub struct Repositories {
    pub users: DynRepository<User>,
    pub projects: DynRepository<Project>,
    pub vehicles: DynRepository<Vehicle>,
    pub construction_logs: DynRepository<ConstructionLog>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            users: create_repository(),
            projects: create_repository(),
            vehicles: create_repository(),
            construction_logs: create_repository(),
        }
    }

    pub fn postgres(backend: &PostgresBackend) -> Self {
        Self {
            users: backend.repository(),
            projects: backend.repository(),
            vehicles: backend.repository(),
            construction_logs: backend.repository(),
        }
    }
}

pub struct Services {
    pub projects: ProjectService,
    pub vehicles: VehicleService,
    pub construction_logs: ConstructionLogService,
    pub admin: AdminService,
    pub cache_admin: CacheAdminService,
}

pub struct ApplicationBuilder {
    config: AppConfig,
    repositories: Option<Repositories>,
    broadcaster: Option<ChangeBroadcaster>,
}

impl ApplicationBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
            repositories: None,
            broadcaster: None,
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    /// Use these repositories instead of the configured storage backend.
    pub fn with_repositories(mut self, repositories: Repositories) -> Self {
        self.repositories = Some(repositories);
        self
    }

    /// Deliver change events on this bus. Instances sharing a bus behave
    /// like instances sharing a Redis channel.
    pub fn with_broadcaster(mut self, broadcaster: ChangeBroadcaster) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub async fn build(self) -> anyhow::Result<Application> {
        let config = self.config;
        config.validate().map_err(anyhow::Error::msg)?;

        let mut postgres = None;
        let repositories = match self.repositories {
            Some(repositories) => repositories,
            None => match config.storage.backend {
                StorageBackend::Memory => {
                    info!("using in-memory storage");
                    Repositories::in_memory()
                }
                StorageBackend::Postgres => {
                    let pg = config
                        .storage
                        .postgres
                        .clone()
                        .context("storage.postgres is required for the postgres backend")?;
                    let backend = PostgresBackend::new(pg)
                        .await
                        .context("failed to initialize PostgreSQL storage")?;
                    let repositories = Repositories::postgres(&backend);
                    postgres = Some(backend);
                    repositories
                }
            },
        };

        let broadcaster = self.broadcaster.unwrap_or_default();
        let mut tasks = Vec::new();

        let wiring =
            crate::create_cache_store(&config.redis, &config.cache, &broadcaster).await;
        tasks.extend(wiring.subscriber);
        let store = wiring.store;
        let queue = Arc::new(InvalidationQueue::start(store.clone()));
        let cache = ServiceCache::new(store.clone(), queue.clone());

        let users = Arc::new(UserSnapshot::new(
            "users",
            Arc::new(RepositorySource::new(repositories.users.clone())),
        ));
        let sync = Arc::new(SnapshotSync::new(users.clone(), wiring.publisher));

        let registry = Arc::new(ChangeHandlerRegistry::new());
        registry.register(sync.clone()).await;
        registry
            .register(Arc::new(FastTierEvictionHandler::new(
                store.fast_tier().clone(),
            )))
            .await;
        tasks.push(ChangeDispatcher::new(registry).start(broadcaster.subscribe()));

        let refresh = Arc::new(DailyRefreshJob::new(&config.schedule).with_target(users.clone()));

        let roles = RoleGuard::new(users.clone());
        let services = Arc::new(Services {
            projects: ProjectService::new(repositories.projects.clone(), cache.clone()),
            vehicles: VehicleService::new(repositories.vehicles.clone(), cache.clone()),
            construction_logs: ConstructionLogService::new(
                repositories.construction_logs.clone(),
                repositories.projects.clone(),
                cache.clone(),
                roles,
            ),
            admin: AdminService::new(repositories.users.clone(), cache.clone(), sync.clone()),
            cache_admin: CacheAdminService::new(store.clone()),
        });

        Ok(Application {
            config,
            store,
            queue,
            broadcaster,
            users,
            sync,
            refresh,
            services,
            postgres,
            cancel: CancellationToken::new(),
            tasks,
        })
    }
}

impl Default for ApplicationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Application {
    config: AppConfig,
    store: Arc<CacheStore>,
    queue: Arc<InvalidationQueue>,
    broadcaster: ChangeBroadcaster,
    users: Arc<UserSnapshot>,
    sync: Arc<SnapshotSync>,
    refresh: Arc<DailyRefreshJob>,
    services: Arc<Services>,
    postgres: Option<PostgresBackend>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Application {
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<InvalidationQueue> {
        &self.queue
    }

    pub fn broadcaster(&self) -> &ChangeBroadcaster {
        &self.broadcaster
    }

    pub fn users(&self) -> &Arc<UserSnapshot> {
        &self.users
    }

    pub fn sync(&self) -> &Arc<SnapshotSync> {
        &self.sync
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn refresh(&self) -> &Arc<DailyRefreshJob> {
        &self.refresh
    }

    /// Load the user snapshot before serving and count it as today's
    /// refresh. A failed load is logged; the first read retries it.
    pub async fn warm_up(&self) {
        let now = Utc::now();
        match self.users.ensure_loaded().await {
            Ok(()) => self.refresh.mark_refreshed(now),
            Err(e) => warn!(error = %e, "user snapshot not loaded at startup"),
        }
    }

    /// Start the daily refresh job.
    pub fn start_jobs(&mut self) {
        if let Some(handle) = self.refresh.clone().start(self.cancel.clone()) {
            self.tasks.push(handle);
        }
    }

    /// Run until Ctrl+C, then shut down.
    pub async fn run(mut self) -> anyhow::Result<()> {
        self.warm_up().await;
        self.start_jobs();
        let stats = self.store.stats();
        info!(mode = %stats.mode, "buildtrack server running");

        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for shutdown signal")?;
        info!("shutdown signal received");

        self.shutdown().await;
        Ok(())
    }

    /// Stop background work. Pending invalidations are executed first.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.queue.flush().await;
        self.queue.shutdown().await;
        for task in self.tasks {
            task.abort();
        }
        if let Some(pg) = &self.postgres {
            pg.close().await;
        }
        let stats = self.queue.stats();
        info!(
            submitted = stats.submitted,
            completed = stats.completed,
            "buildtrack server stopped"
        );
    }
}
