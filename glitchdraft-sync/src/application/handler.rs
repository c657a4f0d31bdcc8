use std::sync::Arc;

use glitchdraft_core::config::SyncStrategyKind;
use glitchdraft_core::utils::current_millis;
use tracing::{debug, info, warn};

use crate::application::commands::{
    DeleteDraftResult, DraftIds, DraftPayload, ExportResult, ImportResult, StatusResult,
    SyncRequest, SyncResponse, UploadDraftResult,
};
use crate::domain::errors::SyncError;
use crate::domain::model::{KEY_LAST_SYNC_TIME, LocalSnapshot, SavedMessage, SyncTrigger};
use crate::domain::repository::SnapshotStoreRef;
use crate::domain::service::{AppFolderResolver, DraftBook, SyncEngine, TokenStore};

/// 请求处理器：把 UI 请求映射到领域服务
pub struct SyncCommandHandler {
    engine: Arc<SyncEngine>,
    tokens: Arc<TokenStore>,
    folders: Arc<AppFolderResolver>,
    drafts: Arc<DraftBook>,
    storage: SnapshotStoreRef,
}

impl SyncCommandHandler {
    pub fn new(
        engine: Arc<SyncEngine>,
        tokens: Arc<TokenStore>,
        folders: Arc<AppFolderResolver>,
        drafts: Arc<DraftBook>,
        storage: SnapshotStoreRef,
    ) -> Self {
        Self {
            engine,
            tokens,
            folders,
            drafts,
            storage,
        }
    }

    pub async fn handle(&self, request: SyncRequest) -> SyncResponse {
        let action = request.action();
        debug!(action, "handling request");
        match request {
            SyncRequest::Sync => self.sync().await,
            SyncRequest::UploadDraft { data } => self.upload_draft(data).await,
            SyncRequest::DeleteDraft {
                chat_id,
                created_at,
            } => self.delete_draft(&chat_id, created_at).await,
            SyncRequest::GetSyncStatus => self.status().await,
            SyncRequest::Authenticate => self.authenticate().await,
            SyncRequest::SignOut => self.sign_out().await,
            SyncRequest::ExportSnapshot => self.export_snapshot().await,
            SyncRequest::ImportSnapshot { data } => self.import_snapshot(data).await,
        }
    }

    async fn sync(&self) -> SyncResponse {
        match self.engine.full_sync(SyncTrigger::Manual).await {
            Ok(outcome) => SyncResponse::ok(outcome.summary()),
            Err(err) => SyncResponse::failure(err.user_message()),
        }
    }

    /// 后台尝试一次全量同步，不阻塞当前请求
    fn spawn_background_sync(&self, reason: &'static str) {
        let engine = self.engine.clone();
        tokio::spawn(async move {
            match engine.full_sync(SyncTrigger::Background).await {
                Ok(_) => {}
                Err(SyncError::SyncInProgress) => debug!(reason, "sync already running"),
                Err(err) if err.is_auth() => debug!(reason, "background sync skipped, not authenticated"),
                Err(err) => warn!(reason, error = %err, "background sync failed"),
            }
        });
    }

    async fn upload_draft(&self, data: DraftPayload) -> SyncResponse {
        if data.chat_id.trim().is_empty() {
            return SyncResponse::failure("chatId is required");
        }
        if data.content.trim().is_empty() && data.attachment.is_none() {
            return SyncResponse::failure("draft is empty");
        }

        let message = SavedMessage {
            content: data.content,
            created_at: current_millis(),
            remote_file_id: None,
            remote_image_id: None,
            attachment: data.attachment,
        };
        let saved = match self.drafts.insert(&data.chat_id, message).await {
            Ok(saved) => saved,
            Err(err) => return SyncResponse::failure(format!("Failed to save draft: {}", err)),
        };

        let mut ids = DraftIds {
            chat_id: data.chat_id.clone(),
            created_at: saved.created_at,
            remote_file_id: None,
            remote_image_id: None,
        };
        let mut note = None;

        if self.tokens.has_token().await {
            match self.engine.strategy() {
                SyncStrategyKind::PerDraft => {
                    match self.engine.push_draft(&data.chat_id, saved.created_at).await {
                        Ok(uploaded) => {
                            ids.remote_file_id = uploaded.remote_file_id;
                            ids.remote_image_id = uploaded.remote_image_id;
                        }
                        Err(SyncError::SyncInProgress) => {
                            note = Some("Saved locally, upload deferred to the running sync".to_string());
                        }
                        Err(err) => {
                            warn!(chat_id = %data.chat_id, error = %err, "draft upload failed");
                            note = Some(format!("Saved locally, upload failed: {}", err));
                        }
                    }
                }
                SyncStrategyKind::WholeSnapshot => self.spawn_background_sync("uploadDraft"),
            }
        } else {
            note = Some("Saved locally, not signed in to cloud storage".to_string());
        }

        SyncResponse::UploadDraft(UploadDraftResult {
            success: true,
            ids: Some(ids),
            message: note,
        })
    }

    async fn delete_draft(&self, chat_id: &str, created_at: i64) -> SyncResponse {
        let removed = match self.drafts.remove(chat_id, created_at).await {
            Ok(Some(removed)) => removed,
            Ok(None) => {
                return SyncResponse::DeleteDraft(DeleteDraftResult {
                    success: false,
                    remote_deleted: 0,
                    message: Some("Draft not found".to_string()),
                });
            }
            Err(err) => return SyncResponse::failure(format!("Failed to delete draft: {}", err)),
        };

        let remote_deleted = self.engine.delete_remote_objects(&removed).await;
        info!(chat_id, created_at, remote_deleted, "draft deleted");

        if self.engine.strategy() == SyncStrategyKind::WholeSnapshot && self.tokens.has_token().await {
            self.spawn_background_sync("deleteDraft");
        }

        SyncResponse::DeleteDraft(DeleteDraftResult {
            success: true,
            remote_deleted,
            message: None,
        })
    }

    async fn status(&self) -> SyncResponse {
        let authenticated = self.tokens.is_authenticated().await;
        let last_sync_time = match self.storage.get(KEY_LAST_SYNC_TIME).await {
            Ok(value) => value.and_then(|v| v.as_i64()),
            Err(err) => {
                warn!(error = %err, "failed to read lastSyncTime");
                None
            }
        };

        SyncResponse::Status(StatusResult {
            success: true,
            authenticated,
            last_sync_time,
            sync_in_progress: self.engine.is_syncing(),
            remote_last_sync_time: self.engine.remote_last_sync_time(),
        })
    }

    async fn authenticate(&self) -> SyncResponse {
        match self.tokens.force_authenticate(true).await {
            Ok(_) => SyncResponse::ok("Signed in to cloud storage"),
            Err(err) => SyncResponse::failure(format!("Sign-in failed: {}", err)),
        }
    }

    async fn sign_out(&self) -> SyncResponse {
        if let Err(err) = self.tokens.clear_token().await {
            return SyncResponse::failure(format!("Sign-out failed: {}", err));
        }
        if let Err(err) = self.folders.reset().await {
            warn!(error = %err, "failed to clear cached app folder");
        }
        self.engine.reset_remote_state();
        SyncResponse::ok("Signed out")
    }

    async fn export_snapshot(&self) -> SyncResponse {
        match self.storage.load().await {
            Ok(snapshot) => SyncResponse::Export(ExportResult {
                success: true,
                data: snapshot.export_json(),
            }),
            Err(err) => SyncResponse::failure(format!("Export failed: {}", err)),
        }
    }

    async fn import_snapshot(&self, data: serde_json::Value) -> SyncResponse {
        let (snapshot, summary) = match LocalSnapshot::import_json(data) {
            Ok(parsed) => parsed,
            Err(err) => return SyncResponse::failure(format!("Import failed: {}", err)),
        };
        if let Err(err) = self.engine.import_snapshot(snapshot).await {
            return SyncResponse::failure(format!("Import failed: {}", err));
        }
        if self.tokens.has_token().await {
            self.spawn_background_sync("importSnapshot");
        }

        SyncResponse::Import(ImportResult {
            success: true,
            chats: summary.chats,
            messages: summary.messages,
        })
    }
}
