//! File-backed store behaviour: persistence across reopen and shared locks.

use std::time::Duration;

use hub_core::entities::NewSyncTask;
use hub_core::enums::InterfaceType;
use hub_db::error::DatabaseError;
use hub_db::repos::interface::NewInterface;
use hub_db::service::HubService;
use rstest::rstest;
use tempfile::TempDir;

async fn open(dir: &TempDir) -> HubService {
    let path = dir.path().join("hub.db");
    HubService::new_local(path.to_str().unwrap()).await.unwrap()
}

#[tokio::test]
async fn state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let task_id = {
        let svc = open(&dir).await;
        let lib = svc.create_library("population", "", None).await.unwrap();
        let iface = svc
            .create_interface(&NewInterface::new(&lib.id, "residents", InterfaceType::Batch))
            .await
            .unwrap();
        svc.create_sync_task(&NewSyncTask::new("nightly", &lib.id, &iface.id), None)
            .await
            .unwrap()
            .id
    };

    let svc = open(&dir).await;
    let task = svc.get_sync_task(&task_id).await.unwrap();
    assert_eq!(task.name, "nightly");
    assert_eq!(svc.get_sync_task_by_name("nightly").await.unwrap().id, task_id);
}

#[tokio::test]
async fn lock_is_visible_to_a_second_handle() {
    let dir = TempDir::new().unwrap();
    let first = open(&dir).await;
    let second = open(&dir).await;
    let ttl = Duration::from_secs(30);

    assert!(first.try_acquire_lock("sync:stk-1", "node-a", ttl).await.unwrap());
    assert!(!second.try_acquire_lock("sync:stk-1", "node-b", ttl).await.unwrap());
    assert!(first.release_lock("sync:stk-1", "node-a").await.unwrap());
    assert!(second.try_acquire_lock("sync:stk-1", "node-b", ttl).await.unwrap());
}

#[rstest]
#[case("")]
#[case("9lives")]
#[case("has space")]
#[case("semi;colon")]
#[tokio::test]
async fn library_names_must_be_schema_identifiers(#[case] name: &str) {
    let dir = TempDir::new().unwrap();
    let svc = open(&dir).await;
    let err = svc.create_library(name, "", None).await.unwrap_err();
    assert!(matches!(err, DatabaseError::InvalidState(_)), "{name}: {err}");
}
