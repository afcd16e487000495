//! Shared test utilities for hub-db repository tests.

pub(crate) mod helpers {
    use hub_core::entities::{NewSyncTask, SyncTask, ThematicInterface, ThematicLibrary};
    use hub_core::enums::InterfaceType;

    use crate::repos::interface::NewInterface;
    use crate::service::HubService;

    /// Create an in-memory `HubService`.
    pub async fn test_service() -> HubService {
        HubService::new_local(":memory:").await.unwrap()
    }

    /// Library + batch interface to hang tasks off.
    pub async fn seed_target(svc: &HubService) -> (ThematicLibrary, ThematicInterface) {
        let library = svc
            .create_library("population", "Population", None)
            .await
            .unwrap();
        let interface = svc
            .create_interface(&NewInterface::new(
                &library.id,
                "residents",
                InterfaceType::Batch,
            ))
            .await
            .unwrap();
        (library, interface)
    }

    /// A draft task against a freshly seeded target.
    pub async fn seed_task(svc: &HubService, name: &str) -> SyncTask {
        let (library, interface) = seed_target(svc).await;
        svc.create_sync_task(&NewSyncTask::new(name, &library.id, &interface.id), None)
            .await
            .unwrap()
    }
}
