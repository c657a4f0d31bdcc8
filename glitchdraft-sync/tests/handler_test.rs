// 请求处理与授权集成测试
mod common;

use std::time::Duration;

use anyhow::Result;
use common::{
    Call, CountingIdentity, FOLDER_NAME, FakeDrive, Harness, TOKEN, init_tracing, signed_in,
    test_config,
};
use glitchdraft_core::config::SyncStrategyKind;
use glitchdraft_sync::application::commands::{
    DeleteDraftResult, StatusResult, SyncRequest, SyncResponse,
};
use glitchdraft_sync::domain::SyncError;
use glitchdraft_sync::domain::model::{LocalSnapshot, SyncTrigger};
use glitchdraft_sync::domain::repository::SnapshotStore;
use glitchdraft_sync::domain::service::FolderState;
use serde_json::json;

fn harness(strategy: SyncStrategyKind, initial: LocalSnapshot) -> Harness {
    init_tracing();
    Harness::new(strategy, initial)
}

fn status(response: SyncResponse) -> StatusResult {
    match response {
        SyncResponse::Status(status) => status,
        other => panic!("unexpected response: {:?}", other),
    }
}

#[tokio::test]
async fn test_delete_draft_removes_each_remote_object_once() -> Result<()> {
    let h = harness(SyncStrategyKind::PerDraft, signed_in(json!({})));
    let folder_id = h.drive.seed_folder(FOLDER_NAME);
    let record_id = h.drive.seed_json(&folder_id, "draft-100.json", &json!({}));
    let image_id = h
        .drive
        .seed_file(&folder_id, "draft-100-a.png", "image/png", vec![0]);
    h.storage
        .set(
            json!({"drafts": {"chat-1": [
                {"content": "x", "createdAt": 100, "remoteFileId": record_id, "remoteImageId": image_id},
                {"content": "y", "createdAt": 50, "remoteFileId": "file-already-gone"}
            ]}})
            .as_object()
            .cloned()
            .unwrap(),
        )
        .await?;

    let response = h
        .handler
        .handle(SyncRequest::DeleteDraft {
            chat_id: "chat-1".to_string(),
            created_at: 100,
        })
        .await;
    assert_eq!(
        response,
        SyncResponse::DeleteDraft(DeleteDraftResult {
            success: true,
            remote_deleted: 2,
            message: None,
        })
    );
    assert_eq!(
        h.drive
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Delete(_)))
            .collect::<Vec<_>>(),
        vec![Call::Delete(record_id.clone()), Call::Delete(image_id.clone())]
    );
    assert!(h.drive.find(&folder_id, "draft-100.json").is_none());

    // 远端已删除的对象视为删除成功
    h.drive.clear_calls();
    let response = h
        .handler
        .handle(SyncRequest::DeleteDraft {
            chat_id: "chat-1".to_string(),
            created_at: 50,
        })
        .await;
    assert!(response.is_success());
    assert_eq!(h.drive.count(|c| matches!(c, Call::Delete(_))), 1);
    assert!(h.drafts.load().await?.get("chat-1").is_none());
    Ok(())
}

#[tokio::test]
async fn test_delete_unknown_draft_fails_without_remote_calls() -> Result<()> {
    let h = harness(SyncStrategyKind::PerDraft, signed_in(json!({"drafts": {}})));

    let response = h
        .handler
        .handle(SyncRequest::DeleteDraft {
            chat_id: "chat-1".to_string(),
            created_at: 1,
        })
        .await;
    assert!(!response.is_success());
    assert!(h.drive.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_delete_local_only_draft_issues_no_remote_delete() -> Result<()> {
    let h = harness(
        SyncStrategyKind::PerDraft,
        signed_in(json!({"drafts": {"chat-1": [{"content": "local", "createdAt": 10}]}})),
    );
    h.drive.seed_folder(FOLDER_NAME);

    let response = h
        .handler
        .handle(SyncRequest::DeleteDraft {
            chat_id: "chat-1".to_string(),
            created_at: 10,
        })
        .await;
    assert_eq!(
        response,
        SyncResponse::DeleteDraft(DeleteDraftResult {
            success: true,
            remote_deleted: 0,
            message: None,
        })
    );
    assert_eq!(h.drive.count(|c| matches!(c, Call::Delete(_))), 0);
    assert!(h.drafts.load().await?.get("chat-1").is_none());
    Ok(())
}

#[tokio::test]
async fn test_status_clears_rejected_token() -> Result<()> {
    let h = harness(
        SyncStrategyKind::WholeSnapshot,
        signed_in(json!({"lastSyncTime": 42})),
    );
    h.drive.reject_tokens(true);

    let status = status(h.handler.handle(SyncRequest::GetSyncStatus).await);
    assert!(status.success);
    assert!(!status.authenticated);
    assert_eq!(status.last_sync_time, Some(42));
    assert!(!status.sync_in_progress);

    assert_eq!(h.snapshot().await.auth_token(), None);
    assert!(!h.tokens.has_token().await);
    assert_eq!(h.drive.count(|c| *c == Call::Validate), 1);
    Ok(())
}

#[tokio::test]
async fn test_status_after_sync() -> Result<()> {
    let h = harness(SyncStrategyKind::WholeSnapshot, signed_in(json!({})));

    let response = h.handler.handle(SyncRequest::Sync).await;
    assert!(response.is_success(), "{:?}", response);

    let status = status(h.handler.handle(SyncRequest::GetSyncStatus).await);
    assert!(status.authenticated);
    assert!(status.last_sync_time.is_some());
    assert_eq!(status.remote_last_sync_time, status.last_sync_time);
    Ok(())
}

#[tokio::test]
async fn test_sign_out_forgets_device_state() -> Result<()> {
    let h = harness(SyncStrategyKind::WholeSnapshot, signed_in(json!({"drafts": {}})));
    h.engine.full_sync(SyncTrigger::Manual).await?;
    assert!(h.snapshot().await.app_folder_id().is_some());

    let response = h.handler.handle(SyncRequest::SignOut).await;
    assert!(response.is_success());

    let local = h.snapshot().await;
    assert_eq!(local.auth_token(), None);
    assert_eq!(local.app_folder_id(), None);
    assert!(local.get("drafts").is_some());
    assert_eq!(h.folders.state().await, FolderState::Unresolved);
    assert_eq!(h.engine.remote_last_sync_time(), None);
    Ok(())
}

#[tokio::test]
async fn test_export_omits_device_local_keys() -> Result<()> {
    let h = harness(
        SyncStrategyKind::WholeSnapshot,
        signed_in(json!({
            "appFolderId": "folder-1",
            "drafts": {"chat-1": [{"content": "x", "createdAt": 1}]}
        })),
    );

    let response = h.handler.handle(SyncRequest::ExportSnapshot).await;
    let SyncResponse::Export(export) = response else {
        panic!("export expected");
    };
    assert!(export.success);
    assert_eq!(
        export.data,
        json!({"drafts": {"chat-1": [{"content": "x", "createdAt": 1}]}})
    );
    assert!(h.drive.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_import_legacy_export() -> Result<()> {
    let h = harness(SyncStrategyKind::WholeSnapshot, LocalSnapshot::new());

    let response = h
        .handler
        .handle(SyncRequest::ImportSnapshot {
            data: json!({
                "chat-1": [{"html": "older", "timestamp": 5}, {"html": "newer", "timestamp": 9}],
                "config": {"theme": "dark"},
                "authToken": "foreign-token",
                "lastSyncTime": 3
            }),
        })
        .await;
    let SyncResponse::Import(result) = response else {
        panic!("import expected");
    };
    assert_eq!((result.chats, result.messages), (1, 2));

    let local = h.snapshot().await;
    assert_eq!(local.auth_token(), None);
    assert_eq!(local.get("config"), Some(&json!({"theme": "dark"})));
    assert!(local.last_sync_time().unwrap_or(0) > 3);
    let drafts = h.drafts.load().await?;
    let contents: Vec<&str> = drafts["chat-1"].iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["newer", "older"]);
    assert!(h.drive.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_manual_sync_signs_in_when_needed() -> Result<()> {
    let h = harness(SyncStrategyKind::WholeSnapshot, LocalSnapshot::new());

    let outcome = h.engine.full_sync(SyncTrigger::Manual).await?;
    assert!(outcome.uploaded > 0);
    assert_eq!(h.snapshot().await.auth_token(), Some(TOKEN));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_authentication_is_coalesced() -> Result<()> {
    init_tracing();
    let identity = CountingIdentity::new(Duration::from_millis(50));
    let h = Harness::build(
        test_config(SyncStrategyKind::WholeSnapshot),
        LocalSnapshot::new(),
        FakeDrive::new(),
        identity.clone(),
    );

    let (a, b) = tokio::join!(
        h.tokens.force_authenticate(true),
        h.tokens.force_authenticate(true)
    );
    assert_eq!(a?, "token-1");
    assert_eq!(b?, "token-1");
    assert_eq!(identity.calls(), 1);
    assert_eq!(h.snapshot().await.auth_token(), Some("token-1"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_authentication_times_out() -> Result<()> {
    init_tracing();
    let identity = CountingIdentity::new(Duration::from_secs(3_600));
    let h = Harness::build(
        test_config(SyncStrategyKind::WholeSnapshot),
        LocalSnapshot::new(),
        FakeDrive::new(),
        identity.clone(),
    );

    let result = h.tokens.force_authenticate(false).await;
    assert!(matches!(result, Err(SyncError::Timeout(_))), "{:?}", result);
    assert!(!h.tokens.has_token().await);

    let background = h.engine.full_sync(SyncTrigger::Background).await;
    assert!(background.is_err());
    assert_eq!(identity.calls(), 2);
    Ok(())
}
