//! 同步引擎
//!
//! 负责本地快照与远端数据的对账。两种策略在构造时选定：
//! - `WholeSnapshot`：整体快照，时间戳较大的一方覆盖另一方
//! - `PerDraft`：按草稿文件合并双方新增的草稿
//!
//! 引擎状态 `Idle / Syncing / QuickChecking` 由同一把门闩保护，
//! 门闩通过 [`PhaseGuard`] 在作用域结束时释放。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use glitchdraft_core::config::SyncStrategyKind;
use glitchdraft_core::utils::{current_millis, format_millis, monotonic_millis};
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::errors::{SyncError, SyncResult};
use crate::domain::model::{
    DraftAttachment, DraftsByChat, KEY_DRAFTS, KEY_LAST_SYNC_TIME, LocalSnapshot, NameFilter,
    NewFile, PollOutcome, RemoteDraftRecord, RemoteFile, SavedMessage, SkipReason, SyncDirection,
    SyncEvent, SyncMarker, SyncOutcome, SyncPhase, SyncTrigger, is_device_local,
};
use crate::domain::repository::{SnapshotStoreRef, UiNotifierRef};
use crate::domain::service::drafts::{DraftBook, insert_sorted};
use crate::domain::service::folder_resolver::AppFolderResolver;
use crate::domain::service::remote::{JSON_MIME_TYPE, RemoteObjectStore};
use crate::domain::service::token_store::TokenStore;

const DEFAULT_IMAGE_MIME: &str = "application/octet-stream";

/// 引擎参数
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub strategy: SyncStrategyKind,
    pub sync_file_name: String,
    pub marker_file_name: String,
    pub draft_prefix: String,
    pub idle_streak_threshold: u32,
    pub idle_check_interval: Duration,
    pub marker_cache_ttl: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            strategy: SyncStrategyKind::WholeSnapshot,
            sync_file_name: "messenger_sync.json".to_string(),
            marker_file_name: "messenger_sync_marker.json".to_string(),
            draft_prefix: "draft-".to_string(),
            idle_streak_threshold: 10,
            idle_check_interval: Duration::from_secs(60),
            marker_cache_ttl: Duration::from_millis(2_000),
        }
    }
}

#[derive(Debug, Default)]
struct PollState {
    no_change_streak: u32,
    last_check: Option<Instant>,
    marker_cache: Option<(Instant, Option<i64>)>,
    remote_last_sync_time: Option<i64>,
}

/// 门闩持有者，析构时将状态复位为 `Idle`
struct PhaseGuard<'a> {
    phase: &'a Mutex<SyncPhase>,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        *phase = SyncPhase::Idle;
    }
}

/// 远端快照的当前状态
struct RemoteSnapshotState {
    blob: Option<RemoteFile>,
    marker: Option<RemoteFile>,
    remote_time: Option<i64>,
    // 标记文件缺失时为读取时间戳已下载的内容
    prefetched: Option<LocalSnapshot>,
}

pub struct SyncEngine {
    storage: SnapshotStoreRef,
    remote: Arc<RemoteObjectStore>,
    tokens: Arc<TokenStore>,
    folders: Arc<AppFolderResolver>,
    drafts: Arc<DraftBook>,
    notifier: UiNotifierRef,
    settings: SyncSettings,
    phase: Mutex<SyncPhase>,
    poll: Mutex<PollState>,
}

impl SyncEngine {
    pub fn new(
        storage: SnapshotStoreRef,
        remote: Arc<RemoteObjectStore>,
        folders: Arc<AppFolderResolver>,
        drafts: Arc<DraftBook>,
        notifier: UiNotifierRef,
        settings: SyncSettings,
    ) -> Self {
        let tokens = remote.tokens().clone();
        Self {
            storage,
            remote,
            tokens,
            folders,
            drafts,
            notifier,
            settings,
            phase: Mutex::new(SyncPhase::Idle),
            poll: Mutex::new(PollState::default()),
        }
    }

    pub fn strategy(&self) -> SyncStrategyKind {
        self.settings.strategy
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_syncing(&self) -> bool {
        self.phase() == SyncPhase::Syncing
    }

    /// 最近一次观察到的远端时间戳（不发起网络请求）
    pub fn remote_last_sync_time(&self) -> Option<i64> {
        self.poll_state().remote_last_sync_time
    }

    /// 当前连续无变化次数
    pub fn no_change_streak(&self) -> u32 {
        self.poll_state().no_change_streak
    }

    fn poll_state(&self) -> std::sync::MutexGuard<'_, PollState> {
        self.poll.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn try_enter(&self, next: SyncPhase) -> Option<PhaseGuard<'_>> {
        let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        if *phase != SyncPhase::Idle {
            return None;
        }
        *phase = next;
        Some(PhaseGuard { phase: &self.phase })
    }

    fn remember_remote_time(&self, remote_time: Option<i64>) {
        let mut poll = self.poll_state();
        poll.marker_cache = Some((Instant::now(), remote_time));
        if remote_time.is_some() {
            poll.remote_last_sync_time = remote_time;
        }
    }

    /// 全量同步
    ///
    /// 已有同步进行中时返回 `SyncInProgress`，调度器据此跳过本次触发
    pub async fn full_sync(&self, trigger: SyncTrigger) -> SyncResult<SyncOutcome> {
        let Some(_guard) = self.try_enter(SyncPhase::Syncing) else {
            debug!(?trigger, "sync already in progress");
            return Err(SyncError::SyncInProgress);
        };

        let started = current_millis();
        let result = self.run_full_sync(trigger).await;
        match &result {
            Ok(outcome) => info!(
                ?trigger,
                direction = ?outcome.direction,
                last_sync_time = outcome.last_sync_time,
                synced_at = %format_millis(outcome.last_sync_time),
                downloaded = outcome.downloaded,
                uploaded = outcome.uploaded,
                elapsed_ms = current_millis() - started,
                "sync completed"
            ),
            Err(err) => warn!(?trigger, error = %err, "sync failed"),
        }
        result
    }

    async fn run_full_sync(&self, trigger: SyncTrigger) -> SyncResult<SyncOutcome> {
        let interactive = trigger.interactive();
        self.ensure_authenticated(trigger).await?;

        let folder_id = self.folders.resolve(interactive).await?;
        match self.settings.strategy {
            SyncStrategyKind::WholeSnapshot => self.sync_whole_snapshot(folder_id, interactive).await,
            SyncStrategyKind::PerDraft => self.sync_per_draft(folder_id, interactive).await,
        }
    }

    async fn ensure_authenticated(&self, trigger: SyncTrigger) -> SyncResult<()> {
        match trigger {
            SyncTrigger::Manual => {
                if !self.tokens.is_authenticated().await {
                    self.tokens.force_authenticate(true).await?;
                }
            }
            SyncTrigger::Background => {
                self.tokens.ensure_token(false).await?;
            }
        }
        Ok(())
    }

    /// 在应用目录中列举文件；目录失效时重建一次后重试
    async fn list_in_folder(
        &self,
        folder_id: &mut String,
        filter: &NameFilter,
        interactive: bool,
    ) -> SyncResult<Vec<RemoteFile>> {
        match self.remote.list_files(folder_id, filter).await {
            Err(err) if err.is_not_found() => {
                warn!(folder_id = %folder_id, error = %err, "app folder listing failed, recreating");
                *folder_id = self.folders.force_recreate(interactive).await?;
                self.remote.list_files(folder_id, filter).await
            }
            other => other,
        }
    }

    async fn read_marker(&self, marker: &RemoteFile) -> SyncResult<Option<i64>> {
        match self.remote.download(&marker.id).await {
            Ok(bytes) => {
                let value = SyncMarker::parse(&bytes);
                if value.is_none() {
                    warn!(file_id = %marker.id, "unreadable sync marker");
                }
                Ok(value)
            }
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn download_snapshot(&self, blob: &RemoteFile) -> SyncResult<LocalSnapshot> {
        let value: Value = self.remote.download_json(&blob.id).await?;
        LocalSnapshot::from_value(value)
    }

    /// 读取远端快照元数据与时间戳；标记缺失时回退到快照内的 lastSyncTime
    async fn remote_snapshot_state(
        &self,
        folder_id: &mut String,
        interactive: bool,
    ) -> SyncResult<RemoteSnapshotState> {
        let blob = self
            .list_in_folder(
                folder_id,
                &NameFilter::Exact(self.settings.sync_file_name.clone()),
                interactive,
            )
            .await?
            .into_iter()
            .next();
        let marker = self
            .remote
            .find_file(folder_id, &self.settings.marker_file_name)
            .await?;

        let mut remote_time = match &marker {
            Some(marker) => self.read_marker(marker).await?,
            None => None,
        };

        let mut prefetched = None;
        if remote_time.is_none() {
            if let Some(blob) = &blob {
                let snapshot = self.download_snapshot(blob).await?;
                remote_time = snapshot.last_sync_time();
                prefetched = Some(snapshot);
            }
        }

        Ok(RemoteSnapshotState {
            blob,
            marker,
            remote_time,
            prefetched,
        })
    }

    async fn sync_whole_snapshot(
        &self,
        mut folder_id: String,
        interactive: bool,
    ) -> SyncResult<SyncOutcome> {
        let local = self.storage.load().await?;
        let local_time = local.last_sync_time().unwrap_or(0);
        let state = self.remote_snapshot_state(&mut folder_id, interactive).await?;
        self.remember_remote_time(state.remote_time);

        if let (Some(blob), Some(remote_time)) = (&state.blob, state.remote_time) {
            if remote_time > local_time {
                debug!(local_time, remote_time, "remote snapshot is newer, pulling");
                let snapshot = match state.prefetched {
                    Some(snapshot) => snapshot,
                    None => self.download_snapshot(blob).await?,
                };
                self.apply_pull(snapshot, remote_time).await?;
                return Ok(SyncOutcome {
                    direction: SyncDirection::Pulled,
                    last_sync_time: remote_time,
                    downloaded: 1,
                    uploaded: 0,
                    unresolved: Vec::new(),
                });
            }
        }

        let floor = local_time.max(state.remote_time.unwrap_or(0));
        let now = monotonic_millis(Some(floor));
        debug!(local_time, remote_time = ?state.remote_time, now, "pushing local snapshot");

        let mut blob = local.syncable();
        blob.set_last_sync_time(now);
        let content = serde_json::to_vec(&blob.to_value())?;
        match &state.blob {
            Some(existing) => {
                self.remote
                    .update_file(&existing.id, JSON_MIME_TYPE, content)
                    .await?;
            }
            None => {
                let metadata =
                    NewFile::in_folder(&self.settings.sync_file_name, &folder_id, JSON_MIME_TYPE);
                self.remote.create_file(&metadata, content).await?;
            }
        }
        self.write_marker(&folder_id, state.marker.as_ref(), now).await?;
        self.set_last_sync_time(now).await?;

        Ok(SyncOutcome {
            direction: SyncDirection::Pushed,
            last_sync_time: now,
            downloaded: 0,
            uploaded: 1,
            unresolved: Vec::new(),
        })
    }

    async fn write_marker(
        &self,
        folder_id: &str,
        existing: Option<&RemoteFile>,
        millis: i64,
    ) -> SyncResult<()> {
        let content = SyncMarker {
            last_sync_time: millis,
        }
        .to_bytes()?;
        match existing {
            Some(marker) => {
                self.remote
                    .update_file(&marker.id, JSON_MIME_TYPE, content)
                    .await?;
            }
            None => {
                self.remote
                    .upsert_file(folder_id, &self.settings.marker_file_name, JSON_MIME_TYPE, content)
                    .await?;
            }
        }
        self.remember_remote_time(Some(millis));
        debug!(folder_id, last_sync_time = millis, "sync marker updated");
        Ok(())
    }

    async fn set_last_sync_time(&self, millis: i64) -> SyncResult<()> {
        let mut entries = Map::new();
        entries.insert(KEY_LAST_SYNC_TIME.to_string(), Value::from(millis));
        self.storage.set(entries).await
    }

    /// 用远端快照替换本地可同步数据；数据写入完成后才推进时间戳
    ///
    /// 整个替换过程持有草稿写锁，并发的草稿读-改-写不会覆盖拉取结果
    async fn apply_pull(&self, remote: LocalSnapshot, remote_time: i64) -> SyncResult<()> {
        let _drafts = self.drafts.write_guard().await;
        let current = self.storage.load().await?;
        let mut data = remote.syncable().into_map();
        data.remove(KEY_LAST_SYNC_TIME);

        let stale: Vec<String> = current
            .keys()
            .filter(|k| !is_device_local(k) && k.as_str() != KEY_LAST_SYNC_TIME)
            .filter(|k| !data.contains_key(k.as_str()))
            .cloned()
            .collect();

        if !data.is_empty() {
            self.storage.set(data).await?;
        }
        if !stale.is_empty() {
            let keys: Vec<&str> = stale.iter().map(String::as_str).collect();
            self.storage.remove(&keys).await?;
        }
        self.set_last_sync_time(remote_time).await?;

        info!(last_sync_time = remote_time, removed = stale.len(), "remote snapshot applied");
        self.notify_remote_changed(remote_time);
        Ok(())
    }

    fn notify_remote_changed(&self, last_sync_time: i64) {
        let delivered = self
            .notifier
            .broadcast(&SyncEvent::RemoteDataChanged { last_sync_time });
        debug!(delivered, last_sync_time, "remote change broadcast");
    }

    fn record_file_name(&self, created_at: i64) -> String {
        format!("{}{}.json", self.settings.draft_prefix, created_at)
    }

    fn image_file_name(&self, created_at: i64, attachment_name: &str) -> String {
        format!("{}{}-{}", self.settings.draft_prefix, created_at, attachment_name)
    }

    /// 草稿记录文件名形如 `draft-<createdAt>.json`
    fn is_record_file(&self, name: &str) -> bool {
        name.strip_prefix(&self.settings.draft_prefix)
            .and_then(|rest| rest.strip_suffix(".json"))
            .map(|ts| !ts.is_empty() && ts.parse::<i64>().is_ok())
            .unwrap_or(false)
    }

    async fn sync_per_draft(
        &self,
        mut folder_id: String,
        interactive: bool,
    ) -> SyncResult<SyncOutcome> {
        let files = self
            .list_in_folder(
                &mut folder_id,
                &NameFilter::Prefix(self.settings.draft_prefix.clone()),
                interactive,
            )
            .await?;
        let marker = self
            .remote
            .find_file(&folder_id, &self.settings.marker_file_name)
            .await?;
        let remote_time = match &marker {
            Some(marker) => self.read_marker(marker).await?,
            None => None,
        };
        self.remember_remote_time(remote_time);

        let by_id: HashMap<&str, &RemoteFile> = files.iter().map(|f| (f.id.as_str(), f)).collect();
        let records: Vec<&RemoteFile> = files.iter().filter(|f| self.is_record_file(&f.name)).collect();
        let remote_ids: HashSet<&str> = records.iter().map(|f| f.id.as_str()).collect();

        let local = self.storage.load().await?;
        let local_time = local.last_sync_time().unwrap_or(0);
        let mut drafts = local.drafts()?;
        let known_ids: HashSet<String> = drafts
            .values()
            .flatten()
            .filter_map(|m| m.remote_file_id.clone())
            .collect();

        let local_keys: HashSet<(String, i64)> = drafts
            .iter()
            .flat_map(|(chat_id, messages)| messages.iter().map(move |m| (chat_id.clone(), m.created_at)))
            .collect();

        let mut outcome = SyncOutcome {
            direction: SyncDirection::Merged,
            last_sync_time: local_time,
            downloaded: 0,
            uploaded: 0,
            unresolved: Vec::new(),
        };

        // 远端已不存在的草稿：可能在别处被删除，也可能需要保留，不做处理
        for (chat_id, messages) in &drafts {
            for message in messages {
                if let Some(file_id) = &message.remote_file_id {
                    if !remote_ids.contains(file_id.as_str()) {
                        warn!(
                            chat_id = %chat_id,
                            created_at = message.created_at,
                            file_id = %file_id,
                            "draft missing remotely, left untouched"
                        );
                        outcome.unresolved.push((chat_id.clone(), message.created_at));
                    }
                }
            }
        }

        let result = self
            .merge_drafts(&folder_id, &records, &by_id, &known_ids, &mut drafts, &mut outcome)
            .await;

        // 无论成功与否都保存已完成部分，避免重复上传
        if outcome.downloaded > 0 || outcome.uploaded > 0 {
            self.save_merged_drafts(&drafts, &local_keys).await?;
        }
        result?;

        let floor = local_time.max(remote_time.unwrap_or(0));
        let now = monotonic_millis(Some(floor));
        if outcome.uploaded > 0 {
            self.write_marker(&folder_id, marker.as_ref(), now).await?;
        }
        self.set_last_sync_time(now).await?;
        outcome.last_sync_time = now;

        if outcome.downloaded > 0 {
            self.notify_remote_changed(now);
        }
        Ok(outcome)
    }

    async fn merge_drafts(
        &self,
        folder_id: &str,
        records: &[&RemoteFile],
        by_id: &HashMap<&str, &RemoteFile>,
        known_ids: &HashSet<String>,
        drafts: &mut DraftsByChat,
        outcome: &mut SyncOutcome,
    ) -> SyncResult<()> {
        for file in records {
            if known_ids.contains(&file.id) {
                continue;
            }
            let record: RemoteDraftRecord = self.remote.download_json(&file.id).await?;
            let messages = drafts.entry(record.chat_id.clone()).or_default();

            if let Some(existing) = messages.iter_mut().find(|m| m.created_at == record.created_at) {
                if existing.remote_file_id.is_none() && existing.content == record.content {
                    debug!(file_id = %file.id, "linking local draft to existing remote record");
                    existing.remote_file_id = Some(file.id.clone());
                    existing.remote_image_id = record.image_file_id.clone();
                    outcome.downloaded += 1;
                } else {
                    let err = SyncError::UnsupportedConflict(format!(
                        "draft {}@{} differs between devices",
                        record.chat_id, record.created_at
                    ));
                    warn!(file_id = %file.id, error = %err, "skipping conflicting remote draft");
                    outcome.unresolved.push((record.chat_id.clone(), record.created_at));
                }
                continue;
            }

            let attachment = match &record.image_file_id {
                Some(image_id) => {
                    let listed = by_id.get(image_id.as_str()).copied();
                    Some(
                        self.download_attachment(image_id, listed, record.created_at)
                            .await?,
                    )
                }
                None => None,
            };
            debug!(file_id = %file.id, chat_id = %record.chat_id, "downloaded remote draft");
            insert_sorted(
                messages,
                SavedMessage {
                    content: record.content,
                    created_at: record.created_at,
                    remote_file_id: Some(file.id.clone()),
                    remote_image_id: record.image_file_id,
                    attachment,
                },
            );
            outcome.downloaded += 1;
        }

        for (chat_id, messages) in drafts.iter_mut() {
            for message in messages.iter_mut() {
                if message.remote_file_id.is_some() {
                    continue;
                }
                self.upload_draft_files(folder_id, chat_id, message).await?;
                outcome.uploaded += 1;
            }
        }
        Ok(())
    }

    async fn download_attachment(
        &self,
        image_id: &str,
        listed: Option<&RemoteFile>,
        created_at: i64,
    ) -> SyncResult<DraftAttachment> {
        let bytes = self.remote.download(image_id).await?;
        let prefix = format!("{}{}-", self.settings.draft_prefix, created_at);
        let (name, mime_type) = match listed {
            Some(file) => (
                file.name
                    .strip_prefix(&prefix)
                    .unwrap_or(&file.name)
                    .to_string(),
                file.mime_type
                    .clone()
                    .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string()),
            ),
            None => ("image".to_string(), DEFAULT_IMAGE_MIME.to_string()),
        };
        Ok(DraftAttachment {
            name,
            mime_type,
            data: BASE64.encode(&bytes),
        })
    }

    /// 上传一条草稿（先图片后记录），并把远端 ID 写回 `message`
    async fn upload_draft_files(
        &self,
        folder_id: &str,
        chat_id: &str,
        message: &mut SavedMessage,
    ) -> SyncResult<()> {
        if message.remote_image_id.is_none() {
            if let Some(attachment) = &message.attachment {
                let bytes = BASE64.decode(attachment.data.as_bytes()).map_err(|e| {
                    SyncError::Serialization(format!("invalid attachment encoding: {}", e))
                })?;
                let metadata = NewFile::in_folder(
                    self.image_file_name(message.created_at, &attachment.name),
                    folder_id,
                    &attachment.mime_type,
                );
                let image = self.remote.create_file(&metadata, bytes).await?;
                debug!(file_id = %image.id, chat_id, "draft image uploaded");
                message.remote_image_id = Some(image.id);
            }
        }

        let record = RemoteDraftRecord {
            chat_id: chat_id.to_string(),
            content: message.content.clone(),
            created_at: message.created_at,
            image_file_id: message.remote_image_id.clone(),
        };
        let metadata = NewFile::in_folder(
            self.record_file_name(message.created_at),
            folder_id,
            JSON_MIME_TYPE,
        );
        let file = self
            .remote
            .create_file(&metadata, serde_json::to_vec(&record)?)
            .await?;
        debug!(file_id = %file.id, chat_id, created_at = message.created_at, "draft uploaded");
        message.remote_file_id = Some(file.id);
        Ok(())
    }

    /// 合并结果只回写远端 ID 与新下载的草稿，保留期间 UI 的其他修改；
    /// 同步开始时已存在、期间被 UI 删除的草稿不会被写回
    async fn save_merged_drafts(
        &self,
        merged: &DraftsByChat,
        local_keys: &HashSet<(String, i64)>,
    ) -> SyncResult<()> {
        self.drafts
            .modify(|current| {
                for (chat_id, messages) in merged {
                    let target = current.entry(chat_id.clone()).or_default();
                    for message in messages {
                        match target.iter_mut().find(|m| m.created_at == message.created_at) {
                            Some(existing) => {
                                if existing.remote_file_id.is_none() {
                                    existing.remote_file_id = message.remote_file_id.clone();
                                }
                                if existing.remote_image_id.is_none() {
                                    existing.remote_image_id = message.remote_image_id.clone();
                                }
                            }
                            None if !local_keys.contains(&(chat_id.clone(), message.created_at)) => {
                                insert_sorted(target, message.clone());
                            }
                            None => {}
                        }
                    }
                }
                current.retain(|_, messages| !messages.is_empty());
            })
            .await
    }

    /// 立即上传单条草稿（按草稿策略下保存时调用）
    ///
    /// 已有同步进行中时返回 `SyncInProgress`，该草稿留待下一次全量同步
    pub async fn push_draft(&self, chat_id: &str, created_at: i64) -> SyncResult<SavedMessage> {
        let Some(_guard) = self.try_enter(SyncPhase::Syncing) else {
            return Err(SyncError::SyncInProgress);
        };

        let mut message = self
            .drafts
            .find(chat_id, created_at)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("draft {}@{}", chat_id, created_at)))?;
        if message.remote_file_id.is_some() {
            return Ok(message);
        }

        self.tokens.ensure_token(false).await?;
        let mut folder_id = self.folders.resolve(false).await?;
        let marker = self
            .list_in_folder(
                &mut folder_id,
                &NameFilter::Exact(self.settings.marker_file_name.clone()),
                false,
            )
            .await?
            .into_iter()
            .next();
        let remote_time = match &marker {
            Some(marker) => self.read_marker(marker).await?,
            None => None,
        };
        self.remember_remote_time(remote_time);

        let upload = self.upload_draft_files(&folder_id, chat_id, &mut message).await;
        let recorded = self
            .drafts
            .record_remote_ids(
                chat_id,
                created_at,
                message.remote_file_id.clone(),
                message.remote_image_id.clone(),
            )
            .await?;
        upload?;
        if !recorded {
            debug!(chat_id, created_at, "draft removed locally during upload");
        }

        let local_time = self
            .storage
            .get(KEY_LAST_SYNC_TIME)
            .await?
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        let remote_time = remote_time.unwrap_or(0);
        let now = monotonic_millis(Some(local_time.max(remote_time)));
        self.write_marker(&folder_id, marker.as_ref(), now).await?;

        // 远端有尚未拉取的变更时保留本地时间戳，下一次轻量检查会合并它们
        if remote_time > local_time {
            debug!(local_time, remote_time, "remote has unmerged drafts, keeping local timestamp");
        } else {
            self.set_last_sync_time(now).await?;
        }
        Ok(message)
    }

    /// 删除草稿关联的远端对象，每个已记录的 ID 恰好删除一次
    ///
    /// 尽力而为：失败只记录日志，返回成功删除的数量
    pub async fn delete_remote_objects(&self, message: &SavedMessage) -> usize {
        let ids: Vec<&String> = message
            .remote_file_id
            .iter()
            .chain(message.remote_image_id.iter())
            .collect();
        if ids.is_empty() {
            return 0;
        }
        if !self.tokens.has_token().await {
            warn!(created_at = message.created_at, "not authenticated, remote draft files left in place");
            return 0;
        }

        let mut deleted = 0;
        for id in ids {
            match self.remote.delete_file(id).await {
                Ok(()) => {
                    debug!(file_id = %id, "remote draft file deleted");
                    deleted += 1;
                }
                Err(err) if err.is_not_found() => {
                    debug!(file_id = %id, "remote draft file already gone");
                    deleted += 1;
                }
                Err(err) => warn!(file_id = %id, error = %err, "failed to delete remote draft file"),
            }
        }
        deleted
    }

    /// 轻量检查：只读取远端时间戳，远端较新时才拉取
    ///
    /// 拉取（包括按草稿策略下的完整合并）期间一直占用门闩，此时的手动同步会得到 `SyncInProgress`。
    /// 错误只记录日志，不向调用方传播
    pub async fn check_remote_changes(&self) -> PollOutcome {
        let Some(_guard) = self.try_enter(SyncPhase::QuickChecking) else {
            return PollOutcome::Skipped(SkipReason::Busy);
        };
        if !self.tokens.has_token().await {
            return PollOutcome::Skipped(SkipReason::Unauthenticated);
        }
        if self.throttled() {
            return PollOutcome::Skipped(SkipReason::Throttled);
        }

        match self.poll_once().await {
            Ok(outcome) => outcome,
            Err(err) if err.is_auth() => {
                debug!(error = %err, "remote check skipped, not authenticated");
                PollOutcome::Skipped(SkipReason::Unauthenticated)
            }
            Err(err) => {
                warn!(error = %err, "remote change check failed");
                PollOutcome::Skipped(SkipReason::Failed)
            }
        }
    }

    fn throttled(&self) -> bool {
        let mut poll = self.poll_state();
        let now = Instant::now();
        if poll.no_change_streak > self.settings.idle_streak_threshold {
            if let Some(last) = poll.last_check {
                if now.duration_since(last) < self.settings.idle_check_interval {
                    return true;
                }
            }
        }
        poll.last_check = Some(now);
        false
    }

    fn cached_marker(&self) -> Option<Option<i64>> {
        let poll = self.poll_state();
        poll.marker_cache
            .filter(|(at, _)| at.elapsed() < self.settings.marker_cache_ttl)
            .map(|(_, value)| value)
    }

    async fn poll_once(&self) -> SyncResult<PollOutcome> {
        let remote_time = match self.cached_marker() {
            Some(value) => value,
            None => {
                let mut folder_id = self.folders.resolve(false).await?;
                let marker = self
                    .list_in_folder(
                        &mut folder_id,
                        &NameFilter::Exact(self.settings.marker_file_name.clone()),
                        false,
                    )
                    .await?
                    .into_iter()
                    .next();
                let value = match &marker {
                    Some(marker) => self.read_marker(marker).await?,
                    None => None,
                };
                self.remember_remote_time(value);
                value
            }
        };

        let local_time = self
            .storage
            .get(KEY_LAST_SYNC_TIME)
            .await?
            .and_then(|v| v.as_i64())
            .unwrap_or(0);

        let Some(remote_time) = remote_time.filter(|rt| *rt > local_time) else {
            let mut poll = self.poll_state();
            poll.no_change_streak = poll.no_change_streak.saturating_add(1);
            return Ok(PollOutcome::Unchanged);
        };

        debug!(local_time, remote_time, "remote marker is newer, pulling");
        let folder_id = self.folders.resolve(false).await?;
        let last_sync_time = match self.settings.strategy {
            SyncStrategyKind::WholeSnapshot => {
                let mut folder_id = folder_id;
                let blob = self
                    .list_in_folder(
                        &mut folder_id,
                        &NameFilter::Exact(self.settings.sync_file_name.clone()),
                        false,
                    )
                    .await?
                    .into_iter()
                    .next();
                let Some(blob) = blob else {
                    warn!(remote_time, "sync marker present without snapshot, ignoring");
                    let mut poll = self.poll_state();
                    poll.no_change_streak = poll.no_change_streak.saturating_add(1);
                    return Ok(PollOutcome::Unchanged);
                };
                let snapshot = self.download_snapshot(&blob).await?;
                self.apply_pull(snapshot, remote_time).await?;
                remote_time
            }
            SyncStrategyKind::PerDraft => self.sync_per_draft(folder_id, false).await?.last_sync_time,
        };

        self.poll_state().no_change_streak = 0;
        Ok(PollOutcome::Pulled { last_sync_time })
    }

    /// 清除本地远端状态缓存（退出登录时调用）
    pub fn reset_remote_state(&self) {
        *self.poll_state() = PollState::default();
    }

    /// 导入快照：写入可同步键并清除导入数据中不存在的旧键
    ///
    /// 时间戳推进到不小于已知远端时间，使导入结果在下一次整体同步中胜出
    pub async fn import_snapshot(&self, snapshot: LocalSnapshot) -> SyncResult<i64> {
        let _drafts = self.drafts.write_guard().await;
        let current = self.storage.load().await?;
        let mut data = snapshot.syncable().into_map();
        data.remove(KEY_LAST_SYNC_TIME);
        if !data.contains_key(KEY_DRAFTS) {
            data.insert(KEY_DRAFTS.to_string(), Value::Object(Map::new()));
        }
        let stale: Vec<String> = current
            .keys()
            .filter(|k| !is_device_local(k) && k.as_str() != KEY_LAST_SYNC_TIME)
            .filter(|k| !data.contains_key(k.as_str()))
            .cloned()
            .collect();
        self.storage.set(data).await?;
        if !stale.is_empty() {
            let keys: Vec<&str> = stale.iter().map(String::as_str).collect();
            self.storage.remove(&keys).await?;
        }

        let floor = current
            .last_sync_time()
            .unwrap_or(0)
            .max(self.remote_last_sync_time().unwrap_or(0));
        let now = monotonic_millis(Some(floor));
        self.set_last_sync_time(now).await?;
        info!(last_sync_time = now, "snapshot imported");
        Ok(now)
    }
}
