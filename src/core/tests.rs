use std::sync::Arc;
use parking_lot::Mutex;
use super::*;

#[test]
fn test_upload_status_transition() {
    use UploadStatus::*;

    // valid
    assert!(Initialized.can_transition_to(Scheduled));
    assert!(Scheduled.can_transition_to(Uploading));
    assert!(Uploading.can_transition_to(Assembling));
    assert!(Uploading.can_transition_to(Finished));
    assert!(Assembling.can_transition_to(Finished));
    assert!(Initialized.can_transition_to(Cancelled));
    assert!(Assembling.can_transition_to(Failed));

    // invalid
    assert!(!Finished.can_transition_to(Cancelled));
    assert!(!Cancelled.can_transition_to(Failed));
    assert!(!Failed.can_transition_to(Uploading));
    assert!(!Initialized.can_transition_to(Uploading));
    assert!(!Scheduled.can_transition_to(Finished));
}

#[test]
fn test_upload_id_generation() {
    let id1 = UploadId::new();
    let id2 = UploadId::new();

    assert_ne!(id1, id2);
    assert_eq!(id1, id1);
    assert!(!id1.to_string().is_empty());
}

#[test]
fn test_permission_bits() {
    let permissions = Permission::READ | Permission::CREATE;
    assert!(permissions.contains(Permission::CREATE));
    assert!(!permissions.contains(Permission::DELETE));
    assert!(Permission::ALL.contains(permissions));
    assert_eq!(Permission::NONE.bits(), 0);
}

fn recorded(core: &UploadCore) -> Arc<Mutex<Vec<UploadEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    core.add_listener(Arc::new(move |event: &UploadEvent| sink.lock().push(event.clone())));
    events
}

#[test]
fn test_terminal_status_is_final() {
    let core = UploadCore::new("https://cloud.example.com/dav/a.txt", 10);
    let events = recorded(&core);

    assert!(core.set_status(UploadStatus::Scheduled));
    assert!(core.set_status(UploadStatus::Failed));
    assert!(!core.set_status(UploadStatus::Cancelled));
    assert_eq!(core.status(), UploadStatus::Failed);
    assert_eq!(events.lock().len(), 2);
}

#[test]
fn test_start_twice_is_rejected() {
    let core = UploadCore::new("https://cloud.example.com/dav/a.txt", 10);
    core.begin().unwrap();
    assert!(matches!(core.begin(), Err(UploadError::AlreadyStarted(id)) if id == core.id()));
}

#[test]
fn test_cancel_before_start_reports_finished_once() {
    let core = UploadCore::new("https://cloud.example.com/dav/a.txt", 10);
    let events = recorded(&core);

    core.cancel();
    core.emit_finished();

    let finished = events
        .lock()
        .iter()
        .filter(|event| matches!(event, UploadEvent::Finished { status: UploadStatus::Cancelled, .. }))
        .count();
    assert_eq!(finished, 1);
    assert!(core.token().is_cancelled());
}

#[test]
fn test_settle_keeps_cancellation_apart_from_failure() {
    let core = UploadCore::new("https://cloud.example.com/dav/a.txt", 10);
    core.cancel();
    let err = core
        .settle(UploadError::Config("late failure".into()))
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(core.status(), UploadStatus::Cancelled);

    let core = UploadCore::new("https://cloud.example.com/dav/b.txt", 10);
    let err = core.settle(UploadError::Config("boom".into())).unwrap_err();
    assert!(!err.is_cancelled());
    assert_eq!(core.status(), UploadStatus::Failed);
}

#[tokio::test]
async fn test_wait_resolves_with_terminal_status() {
    let core = Arc::new(UploadCore::new("https://cloud.example.com/dav/a.txt", 10));
    let waiter = tokio::spawn({
        let core = core.clone();
        async move { core.wait().await }
    });

    core.set_status(UploadStatus::Scheduled);
    core.set_status(UploadStatus::Uploading);
    core.set_status(UploadStatus::Finished);
    assert_eq!(waiter.await.unwrap(), UploadStatus::Finished);
}

#[tokio::test]
async fn test_guard_observes_cancellation() {
    let core = UploadCore::new("https://cloud.example.com/dav/a.txt", 10);
    core.abort();
    let result = core.guard(std::future::pending::<Result<()>>()).await;
    assert!(result.unwrap_err().is_cancelled());
    // abort alone does not decide the status
    assert_eq!(core.status(), UploadStatus::Initialized);
}
