use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use hub_config::HubConfig;
use hub_db::service::HubService;
use hub_engine::{LocalWarehouse, Orchestrator, SchemaReconciler, TaskService};
use hub_scheduler::{DbLock, DistributedLock, Scheduler};

/// Shared application resources initialized once at startup.
pub struct AppContext {
    pub config: HubConfig,
    pub service: Arc<HubService>,
    pub warehouse: Arc<LocalWarehouse>,
    pub orchestrator: Arc<Orchestrator>,
    pub tasks: TaskService,
    pub reconciler: SchemaReconciler,
}

impl AppContext {
    /// Open the metadata store and the warehouse named by `config`. The
    /// warehouse is the source reader, record sink and catalog.
    pub async fn init(config: HubConfig) -> anyhow::Result<Self> {
        for path in [&config.database.path, &config.warehouse.path] {
            if path != ":memory:" && !Path::new(path).exists() {
                anyhow::bail!("{path} does not exist. Run 'datahub init' first.");
            }
        }

        let service = Arc::new(
            HubService::new_local(&config.database.path)
                .await
                .context("failed to open the metadata store")?,
        );
        let warehouse = Arc::new(
            LocalWarehouse::open_local(&config.warehouse.path)
                .await
                .context("failed to open the warehouse")?,
        );
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&service),
            warehouse.clone(),
            warehouse.clone(),
        ));
        let tasks = TaskService::new(Arc::clone(&orchestrator), config.sync.clone());
        let reconciler = SchemaReconciler::new(Arc::clone(&service), warehouse.clone());

        Ok(Self {
            config,
            service,
            warehouse,
            orchestrator,
            tasks,
            reconciler,
        })
    }

    /// A scheduler over the shared store, locking as `instance` or the
    /// configured identity.
    pub fn scheduler(&self, instance: Option<&str>) -> Arc<Scheduler> {
        let owner = instance.map_or_else(
            || self.config.scheduler.resolved_instance_id(),
            str::to_string,
        );
        let lock: Arc<dyn DistributedLock> = Arc::new(DbLock::new(Arc::clone(&self.service), owner));
        Arc::new(Scheduler::new(
            Arc::clone(&self.orchestrator),
            lock,
            self.config.scheduler.clone(),
            self.config.sync.clone(),
        ))
    }

    /// Resolve a task id or name to its id.
    pub async fn task_id(&self, id_or_name: &str) -> anyhow::Result<String> {
        Ok(self.tasks.get_task(id_or_name).await?.id)
    }
}
