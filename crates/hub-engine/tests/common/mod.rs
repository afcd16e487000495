//! Shared fixtures for the engine integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use hub_config::SyncConfig;
use hub_core::entities::{NewSyncTask, SyncTask, TableField, ThematicInterface, ThematicLibrary};
use hub_core::enums::InterfaceType;
use hub_core::errors::CoreError;
use hub_core::rules::source::{DataSourceConfig, SourceInterfaceConfig, SourceLibraryConfig};
use hub_core::value::Record;
use hub_db::repos::interface::NewInterface;
use hub_db::service::HubService;
use hub_engine::orchestrator::Orchestrator;
use hub_engine::source::{
    BoundQuery, InterfaceQuery, LoadOutcome, MemorySink, MemorySource, RecordSink, SourceReader,
    TargetTable,
};
use hub_engine::tasks::TaskService;

pub fn rec(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

pub async fn service() -> Arc<HubService> {
    Arc::new(HubService::new_local(":memory:").await.unwrap())
}

pub fn resident_fields() -> Vec<TableField> {
    let mut id = TableField::new("id", "integer");
    id.is_primary_key = true;
    id.is_nullable = false;
    id.order_num = 1;
    let mut fields = vec![id];
    for (order, name) in (2..).zip(["name", "email", "updated_at"]) {
        let mut field = TableField::new(name, "text");
        field.order_num = order;
        fields.push(field);
    }
    fields
}

/// Library `population` with a created batch table `residents`.
pub async fn seed_target(svc: &HubService) -> (ThematicLibrary, ThematicInterface) {
    let library = svc
        .create_library("population", "Population", None)
        .await
        .unwrap();
    let interface = svc
        .create_interface(
            &NewInterface::new(&library.id, "residents", InterfaceType::Batch)
                .with_fields(resident_fields()),
        )
        .await
        .unwrap();
    svc.set_table_created(&interface.id, true).await.unwrap();
    let interface = svc.get_interface(&interface.id).await.unwrap();
    (library, interface)
}

/// One source library `crm` reading interface `customers`.
pub fn crm_source() -> DataSourceConfig {
    DataSourceConfig {
        sql_queries: Vec::new(),
        source_libraries: vec![SourceLibraryConfig {
            library_id: "crm".into(),
            interfaces: vec![SourceInterfaceConfig::new("customers")],
            priority: 0,
            enabled: true,
        }],
    }
}

pub fn customers() -> Vec<Record> {
    vec![
        rec(serde_json::json!({"id": 1, "name": " Ada ", "email": "ada@corp.io", "updated_at": "2024-01-02T08:00:00Z"})),
        rec(serde_json::json!({"id": 2, "name": "Grace", "email": "grace@corp.io", "updated_at": "2024-01-05T10:00:00Z"})),
        rec(serde_json::json!({"id": 3, "name": "Linus", "email": null, "updated_at": "2024-01-03T12:00:00Z"})),
    ]
}

pub struct Harness {
    pub svc: Arc<HubService>,
    pub library: ThematicLibrary,
    pub interface: ThematicInterface,
    pub orchestrator: Arc<Orchestrator>,
    pub tasks: Arc<TaskService>,
}

impl Harness {
    pub async fn new(reader: Arc<dyn SourceReader>, sink: Arc<dyn RecordSink>) -> Self {
        let svc = service().await;
        let (library, interface) = seed_target(&svc).await;
        let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&svc), reader, sink));
        let tasks = Arc::new(TaskService::new(
            Arc::clone(&orchestrator),
            SyncConfig::default(),
        ));
        Self {
            svc,
            library,
            interface,
            orchestrator,
            tasks,
        }
    }

    pub fn new_task(&self, name: &str) -> NewSyncTask {
        let mut task = NewSyncTask::new(name, &self.library.id, &self.interface.id);
        task.data_source = crm_source();
        task
    }

    pub async fn create(&self, task: NewSyncTask) -> SyncTask {
        self.tasks.create_task(&task).await.unwrap()
    }

    pub fn target(&self) -> TargetTable {
        TargetTable::new(&self.library.name_en, &self.interface.name_en)
    }
}

pub fn memory_source(rows: Vec<Record>) -> Arc<MemorySource> {
    Arc::new(MemorySource::new().with_interface("crm", "customers", rows))
}

pub fn memory_sink() -> Arc<MemorySink> {
    Arc::new(MemorySink::new())
}

/// A sink whose every write fails.
pub struct FailingSink;

#[async_trait]
impl RecordSink for FailingSink {
    async fn upsert(
        &self,
        target: &TargetTable,
        _key_fields: &[String],
        _records: &[Record],
    ) -> Result<LoadOutcome, CoreError> {
        Err(CoreError::Other(anyhow::anyhow!("{target} is read-only")))
    }
}

/// A source that announces each interface fetch and then waits to be
/// released. Every page is full, so the extractor keeps paging.
pub struct GatedSource {
    pub started: Notify,
    pub release: Notify,
}

impl GatedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Notify::new(),
            release: Notify::new(),
        })
    }
}

#[async_trait]
impl SourceReader for GatedSource {
    async fn query_sql(&self, query: &BoundQuery, _limit: usize) -> Result<Vec<Record>, CoreError> {
        Err(CoreError::Validation(format!("unexpected query {}", query.sql)))
    }

    async fn fetch_interface(&self, query: &InterfaceQuery) -> Result<Vec<Record>, CoreError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok((0..query.limit)
            .map(|i| rec(serde_json::json!({"id": query.offset + i})))
            .collect())
    }
}

/// Serves `rows` as one interface, holding the first fetch until released.
pub struct HeldSource {
    pub started: Notify,
    pub release: Notify,
    rows: Vec<Record>,
}

impl HeldSource {
    pub fn new(rows: Vec<Record>) -> Arc<Self> {
        Arc::new(Self {
            started: Notify::new(),
            release: Notify::new(),
            rows,
        })
    }
}

#[async_trait]
impl SourceReader for HeldSource {
    async fn query_sql(&self, query: &BoundQuery, _limit: usize) -> Result<Vec<Record>, CoreError> {
        Err(CoreError::Validation(format!("unexpected query {}", query.sql)))
    }

    async fn fetch_interface(&self, query: &InterfaceQuery) -> Result<Vec<Record>, CoreError> {
        if query.offset == 0 {
            self.started.notify_one();
            self.release.notified().await;
        }
        Ok(self.rows.iter().skip(query.offset).take(query.limit).cloned().collect())
    }
}
