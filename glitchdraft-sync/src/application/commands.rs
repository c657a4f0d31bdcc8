//! UI 与同步核心之间的请求 / 响应类型
//!
//! 请求以 `action` 字段区分，每种请求携带各自的负载与响应类型。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::model::DraftAttachment;

/// 新草稿负载
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DraftPayload {
    pub chat_id: String,
    #[serde(alias = "textContent", default)]
    pub content: String,
    #[serde(default)]
    pub attachment: Option<DraftAttachment>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum SyncRequest {
    /// 手动全量同步，必要时交互式授权
    Sync,
    UploadDraft { data: DraftPayload },
    #[serde(rename_all = "camelCase")]
    DeleteDraft { chat_id: String, created_at: i64 },
    GetSyncStatus,
    Authenticate,
    SignOut,
    ExportSnapshot,
    ImportSnapshot { data: Value },
}

impl SyncRequest {
    pub fn action(&self) -> &'static str {
        match self {
            SyncRequest::Sync => "sync",
            SyncRequest::UploadDraft { .. } => "uploadDraft",
            SyncRequest::DeleteDraft { .. } => "deleteDraft",
            SyncRequest::GetSyncStatus => "getSyncStatus",
            SyncRequest::Authenticate => "authenticate",
            SyncRequest::SignOut => "signOut",
            SyncRequest::ExportSnapshot => "exportSnapshot",
            SyncRequest::ImportSnapshot { .. } => "importSnapshot",
        }
    }
}

/// 通用结果 `{success, message}`
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
}

/// 草稿标识与远端 ID
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DraftIds {
    pub chat_id: String,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_image_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UploadDraftResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<DraftIds>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteDraftResult {
    pub success: bool,
    /// 成功删除的远端对象数量
    pub remote_deleted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusResult {
    pub success: bool,
    pub authenticated: bool,
    pub last_sync_time: Option<i64>,
    pub sync_in_progress: bool,
    pub remote_last_sync_time: Option<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExportResult {
    pub success: bool,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ImportResult {
    pub success: bool,
    pub chats: usize,
    pub messages: usize,
}

/// 响应：每种请求对应一个变体
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum SyncResponse {
    Action(ActionResult),
    UploadDraft(UploadDraftResult),
    DeleteDraft(DeleteDraftResult),
    Status(StatusResult),
    Export(ExportResult),
    Import(ImportResult),
}

impl SyncResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        SyncResponse::Action(ActionResult {
            success: true,
            message: message.into(),
        })
    }

    pub fn failure(message: impl Into<String>) -> Self {
        SyncResponse::Action(ActionResult {
            success: false,
            message: message.into(),
        })
    }

    pub fn is_success(&self) -> bool {
        match self {
            SyncResponse::Action(r) => r.success,
            SyncResponse::UploadDraft(r) => r.success,
            SyncResponse::DeleteDraft(r) => r.success,
            SyncResponse::Status(r) => r.success,
            SyncResponse::Export(r) => r.success,
            SyncResponse::Import(r) => r.success,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_names() {
        let req: SyncRequest = serde_json::from_value(json!({"action": "sync"})).unwrap();
        assert_eq!(req, SyncRequest::Sync);

        let req: SyncRequest = serde_json::from_value(json!({
            "action": "uploadDraft",
            "data": {"chatId": "c1", "textContent": "hello"}
        }))
        .unwrap();
        match req {
            SyncRequest::UploadDraft { data } => {
                assert_eq!(data.chat_id, "c1");
                assert_eq!(data.content, "hello");
                assert!(data.attachment.is_none());
            }
            other => panic!("unexpected request: {other:?}"),
        }

        let req: SyncRequest = serde_json::from_value(json!({
            "action": "deleteDraft", "chatId": "c1", "createdAt": 5
        }))
        .unwrap();
        assert_eq!(req.action(), "deleteDraft");
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        assert!(serde_json::from_value::<SyncRequest>(json!({"action": "paste"})).is_err());
    }

    #[test]
    fn test_status_response_shape() {
        let resp = SyncResponse::Status(StatusResult {
            success: true,
            authenticated: false,
            last_sync_time: Some(10),
            sync_in_progress: false,
            remote_last_sync_time: None,
        });
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({
                "success": true,
                "authenticated": false,
                "lastSyncTime": 10,
                "syncInProgress": false,
                "remoteLastSyncTime": null
            })
        );
    }
}
