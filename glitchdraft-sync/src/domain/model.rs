//! 领域模型：本地快照、草稿、远端文件与同步事件

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::errors::{SyncError, SyncResult};

pub const KEY_DRAFTS: &str = "drafts";
pub const KEY_LAST_SYNC_TIME: &str = "lastSyncTime";
pub const KEY_AUTH_TOKEN: &str = "authToken";
pub const KEY_APP_FOLDER_ID: &str = "appFolderId";

/// 仅属于本设备、从不上传的键
pub const DEVICE_LOCAL_KEYS: [&str; 2] = [KEY_AUTH_TOKEN, KEY_APP_FOLDER_ID];

/// 旧版导出格式中与聊天无关的顶层键
const LEGACY_UI_KEYS: [&str; 3] = ["config", "containerPosition", "togglePosition"];

/// 远端文件夹的 MIME 类型
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// chatId -> 草稿列表（新的在前）
pub type DraftsByChat = BTreeMap<String, Vec<SavedMessage>>;

/// 草稿附件（图片等二进制内容，base64 编码）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DraftAttachment {
    pub name: String,
    pub mime_type: String,
    /// base64 编码的内容
    pub data: String,
}

/// 单条草稿
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SavedMessage {
    #[serde(alias = "html")]
    pub content: String,
    #[serde(alias = "timestamp", default)]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_image_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<DraftAttachment>,
}

impl SavedMessage {
    pub fn new(content: impl Into<String>, created_at: i64) -> Self {
        Self {
            content: content.into(),
            created_at,
            remote_file_id: None,
            remote_image_id: None,
            attachment: None,
        }
    }

    pub fn has_remote_ids(&self) -> bool {
        self.remote_file_id.is_some() || self.remote_image_id.is_some()
    }
}

/// 导入结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub chats: usize,
    pub messages: usize,
}

/// 本地快照：扁平的键值映射，可直接序列化为 JSON
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalSnapshot {
    entries: Map<String, Value>,
}

impl LocalSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(entries: Map<String, Value>) -> Self {
        Self { entries }
    }

    /// 从 JSON 值构造，要求顶层为对象
    pub fn from_value(value: Value) -> SyncResult<Self> {
        match value {
            Value::Object(entries) => Ok(Self { entries }),
            Value::Null => Ok(Self::default()),
            other => Err(SyncError::Serialization(format!(
                "snapshot must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.entries
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.entries
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.entries.clone())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_sync_time(&self) -> Option<i64> {
        self.entries.get(KEY_LAST_SYNC_TIME).and_then(Value::as_i64)
    }

    pub fn set_last_sync_time(&mut self, millis: i64) {
        self.entries
            .insert(KEY_LAST_SYNC_TIME.to_string(), Value::from(millis));
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.entries
            .get(KEY_AUTH_TOKEN)
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
    }

    pub fn app_folder_id(&self) -> Option<&str> {
        self.entries
            .get(KEY_APP_FOLDER_ID)
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
    }

    /// 解析草稿集合；缺失时返回空集合
    pub fn drafts(&self) -> SyncResult<DraftsByChat> {
        match self.entries.get(KEY_DRAFTS) {
            None | Some(Value::Null) => Ok(DraftsByChat::new()),
            Some(value) => Ok(serde_json::from_value(value.clone())?),
        }
    }

    pub fn set_drafts(&mut self, drafts: &DraftsByChat) -> SyncResult<()> {
        let value = serde_json::to_value(drafts)?;
        self.entries.insert(KEY_DRAFTS.to_string(), value);
        Ok(())
    }

    /// 可同步的部分：去掉设备本地键
    pub fn syncable(&self) -> LocalSnapshot {
        let entries = self
            .entries
            .iter()
            .filter(|(k, _)| !is_device_local(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        LocalSnapshot { entries }
    }

    /// 导出为 JSON（不含设备本地键）
    pub fn export_json(&self) -> Value {
        self.syncable().to_value()
    }

    /// 导入 JSON，兼容旧版导出格式（顶层直接以 chatId 为键）
    pub fn import_json(value: Value) -> SyncResult<(LocalSnapshot, ImportSummary)> {
        let Value::Object(mut entries) = value else {
            return Err(SyncError::Serialization(
                "import payload must be a JSON object".to_string(),
            ));
        };

        for key in DEVICE_LOCAL_KEYS {
            entries.remove(key);
        }

        let mut drafts: DraftsByChat = match entries.remove(KEY_DRAFTS) {
            Some(Value::Null) | None => DraftsByChat::new(),
            Some(v) => serde_json::from_value(v)?,
        };

        let legacy_keys: Vec<String> = entries
            .iter()
            .filter(|(k, v)| {
                v.is_array() && k.as_str() != KEY_LAST_SYNC_TIME && !LEGACY_UI_KEYS.contains(&k.as_str())
            })
            .map(|(k, _)| k.clone())
            .collect();

        for chat_id in legacy_keys {
            if let Some(v) = entries.remove(&chat_id) {
                let messages: Vec<SavedMessage> = serde_json::from_value(v)?;
                drafts.entry(chat_id).or_default().extend(messages);
            }
        }

        for messages in drafts.values_mut() {
            messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            messages.dedup_by_key(|m| m.created_at);
        }
        drafts.retain(|_, messages| !messages.is_empty());

        let summary = ImportSummary {
            chats: drafts.len(),
            messages: drafts.values().map(Vec::len).sum(),
        };

        let mut snapshot = LocalSnapshot { entries };
        snapshot.set_drafts(&drafts)?;
        Ok((snapshot, summary))
    }
}

pub fn is_device_local(key: &str) -> bool {
    DEVICE_LOCAL_KEYS.contains(&key)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 远端文件元数据
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
}

/// 文件列表响应
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RemoteFileList {
    #[serde(default)]
    pub files: Vec<RemoteFile>,
}

/// 新建文件所需的元数据
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewFile {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
}

impl NewFile {
    pub fn in_folder(name: impl Into<String>, folder_id: &str, mime_type: &str) -> Self {
        Self {
            name: name.into(),
            mime_type: Some(mime_type.to_string()),
            parents: vec![folder_id.to_string()],
        }
    }
}

/// 文件名匹配方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameFilter {
    Exact(String),
    Prefix(String),
}

/// 远端单条草稿记录（按草稿同步时使用）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDraftRecord {
    pub chat_id: String,
    pub content: String,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_file_id: Option<String>,
}

/// 远端时间戳标记文件内容
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncMarker {
    pub last_sync_time: i64,
}

impl SyncMarker {
    /// 解析标记文件，兼容纯数字格式
    pub fn parse(bytes: &[u8]) -> Option<i64> {
        if let Ok(marker) = serde_json::from_slice::<SyncMarker>(bytes) {
            return Some(marker.last_sync_time);
        }
        match serde_json::from_slice::<Value>(bytes).ok()? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn to_bytes(&self) -> SyncResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// 推送给 UI 的事件
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum SyncEvent {
    #[serde(rename = "remoteUpdate", rename_all = "camelCase")]
    RemoteDataChanged { last_sync_time: i64 },
}

/// 同步触发来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// 用户发起，允许交互式授权，冲突时返回错误
    Manual,
    /// 调度器发起，仅静默授权，冲突时跳过
    Background,
}

impl SyncTrigger {
    pub fn interactive(&self) -> bool {
        matches!(self, SyncTrigger::Manual)
    }
}

/// 同步引擎状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    #[default]
    Idle,
    Syncing,
    QuickChecking,
}

/// 一次全量同步的方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    Pulled,
    Pushed,
    Merged,
}

/// 全量同步结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub direction: SyncDirection,
    pub last_sync_time: i64,
    pub downloaded: usize,
    pub uploaded: usize,
    /// 本地记录了远端 ID 但远端已不存在的草稿（chatId, createdAt）
    pub unresolved: Vec<(String, i64)>,
}

impl SyncOutcome {
    pub fn summary(&self) -> String {
        match self.direction {
            SyncDirection::Pulled => "Pulled latest data from cloud storage".to_string(),
            SyncDirection::Pushed => "Uploaded local data to cloud storage".to_string(),
            SyncDirection::Merged => {
                let mut msg = format!(
                    "Sync complete: {} downloaded, {} uploaded",
                    self.downloaded, self.uploaded
                );
                if !self.unresolved.is_empty() {
                    msg.push_str(&format!(
                        ", {} draft(s) missing remotely left untouched",
                        self.unresolved.len()
                    ));
                }
                msg
            }
        }
    }
}

/// 轻量检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// 未执行远端读取
    Skipped(SkipReason),
    /// 远端未变化
    Unchanged,
    /// 远端较新，已拉取
    Pulled { last_sync_time: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Busy,
    Unauthenticated,
    Throttled,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_saved_message_accepts_legacy_field_names() {
        let msg: SavedMessage =
            serde_json::from_value(json!({"html": "<b>hi</b>", "timestamp": 42})).unwrap();
        assert_eq!(msg.content, "<b>hi</b>");
        assert_eq!(msg.created_at, 42);
        assert!(!msg.has_remote_ids());

        let out = serde_json::to_value(&msg).unwrap();
        assert_eq!(out, json!({"content": "<b>hi</b>", "createdAt": 42}));
    }

    #[test]
    fn test_syncable_strips_device_local_keys() {
        let snapshot = LocalSnapshot::from_value(json!({
            "authToken": "t",
            "appFolderId": "f",
            "lastSyncTime": 5,
            "config": {"theme": "dark"}
        }))
        .unwrap();

        let syncable = snapshot.syncable();
        assert!(syncable.get(KEY_AUTH_TOKEN).is_none());
        assert!(syncable.get(KEY_APP_FOLDER_ID).is_none());
        assert_eq!(syncable.last_sync_time(), Some(5));
        assert_eq!(syncable.get("config"), Some(&json!({"theme": "dark"})));
    }

    #[test]
    fn test_import_migrates_legacy_layout() {
        let legacy = json!({
            "config": {"hotkey": "s"},
            "containerPosition": {"x": 1, "y": 2},
            "chat-1": [
                {"html": "old", "timestamp": 1},
                {"html": "new", "timestamp": 3}
            ],
            "chat-2": [{"html": "only", "timestamp": 2}],
            "authToken": "should-not-import"
        });

        let (snapshot, summary) = LocalSnapshot::import_json(legacy).unwrap();
        assert_eq!(summary, ImportSummary { chats: 2, messages: 3 });
        assert!(snapshot.auth_token().is_none());
        assert!(snapshot.get("chat-1").is_none());
        assert!(snapshot.get("containerPosition").is_some());

        let drafts = snapshot.drafts().unwrap();
        let chat1 = &drafts["chat-1"];
        assert_eq!(chat1[0].content, "new");
        assert_eq!(chat1[1].content, "old");
    }

    #[test]
    fn test_import_rejects_non_object() {
        assert!(LocalSnapshot::import_json(json!([1, 2])).is_err());
    }

    #[test]
    fn test_marker_parse_formats() {
        assert_eq!(SyncMarker::parse(br#"{"lastSyncTime": 200}"#), Some(200));
        assert_eq!(SyncMarker::parse(b"300"), Some(300));
        assert_eq!(SyncMarker::parse(br#""400""#), Some(400));
        assert_eq!(SyncMarker::parse(b"garbage"), None);
    }

    #[test]
    fn test_sync_event_wire_form() {
        let event = SyncEvent::RemoteDataChanged { last_sync_time: 9 };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"action": "remoteUpdate", "lastSyncTime": 9})
        );
    }
}
