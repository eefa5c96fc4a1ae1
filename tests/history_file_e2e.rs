#![cfg(feature = "persistent")]

use std::sync::Arc;

use tempfile::tempdir;

use statussync::{
    BusinessStatus, DualStatus, FileHistoryStore, MemoryEventSource, PhysicalStatus, StatusChangeRequest,
    StatusPatch, StatusSync, SyncConfig,
};

#[test]
fn committed_changes_are_replayable_after_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("status-history.log");

    let committed = {
        let history = Arc::new(FileHistoryStore::open(&path, true).unwrap());
        let sync = StatusSync::new(
            Arc::new(MemoryEventSource::new()),
            Arc::clone(&history) as Arc<dyn statussync::HistoryStore>,
            None,
            SyncConfig::default(),
        )
        .unwrap();

        let current = DualStatus::new(PhysicalStatus::Depot, BusinessStatus::Available);
        let first = sync
            .update_inventory_status(&StatusChangeRequest::new("1", current, StatusPatch::new().business("reserved")))
            .unwrap();

        // Rejected and failed requests never reach the log.
        let in_repair = DualStatus::new(PhysicalStatus::InRepair, BusinessStatus::Available);
        assert!(sync
            .update_inventory_status(&StatusChangeRequest::new("2", in_repair, StatusPatch::new().business("sold")))
            .is_err());

        let second = sync
            .update_inventory_status(&StatusChangeRequest::new(
                "1",
                first.status.clone(),
                StatusPatch::new().business("sold"),
            ))
            .unwrap();
        vec![first.update, second.update]
    };

    let reopened = FileHistoryStore::open(&path, false).unwrap();
    assert_eq!(reopened.len(), 2);
    assert_eq!(reopened.replay().unwrap(), committed);
}
