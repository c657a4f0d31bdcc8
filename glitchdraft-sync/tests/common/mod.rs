// 集成测试公共设施：内存版远端对象存储 + 服务装配
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use glitchdraft_core::config::{GlitchDraftConfig, SyncStrategyKind};
use glitchdraft_sync::application::{PollScheduler, SyncCommandHandler};
use glitchdraft_sync::config::SyncServiceConfig;
use glitchdraft_sync::domain::model::{
    FOLDER_MIME_TYPE, LocalSnapshot, NameFilter, NewFile, RemoteFile, SyncMarker,
};
use glitchdraft_sync::domain::repository::{
    IdentityProvider, IdentityProviderRef, ObjectStoreApi, SnapshotStore, SnapshotStoreRef,
    UiNotifierRef,
};
use glitchdraft_sync::domain::service::{
    AppFolderResolver, DraftBook, RemoteObjectStore, SyncEngine, TokenStore,
};
use glitchdraft_sync::domain::{SyncError, SyncResult};
use glitchdraft_sync::infrastructure::drive::query;
use glitchdraft_sync::infrastructure::identity::StaticTokenProvider;
use glitchdraft_sync::infrastructure::local::InMemorySnapshotStore;
use glitchdraft_sync::infrastructure::notify::BroadcastNotifier;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

pub const TOKEN: &str = "test-token";
pub const FOLDER_NAME: &str = "GlitchDraft";
pub const SNAPSHOT_FILE: &str = "messenger_sync.json";
pub const MARKER_FILE: &str = "messenger_sync_marker.json";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// 远端调用记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Validate,
    GetFile(String),
    FindFolders(String),
    CreateFolder(String),
    FindFiles(String),
    CreateFile(String),
    UpdateFile(String),
    Download(String),
    Delete(String),
}

struct StoredFile {
    meta: RemoteFile,
    content: Vec<u8>,
}

#[derive(Default)]
struct DriveState {
    next_id: u64,
    files: BTreeMap<String, StoredFile>,
    calls: Vec<Call>,
    reject_tokens: bool,
    latency: Duration,
}

/// 内存版远端对象存储，行为与真实接口的状态码约定一致
#[derive(Default)]
pub struct FakeDrive {
    state: Mutex<DriveState>,
}

impl FakeDrive {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DriveState> {
        self.state.lock().unwrap()
    }

    /// 之后的所有请求都返回 401
    pub fn reject_tokens(&self, reject: bool) {
        self.lock().reject_tokens = reject;
    }

    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn seed_folder(&self, name: &str) -> String {
        let mut state = self.lock();
        let id = next_id(&mut state, "folder");
        let meta = RemoteFile {
            id: id.clone(),
            name: name.to_string(),
            mime_type: Some(FOLDER_MIME_TYPE.to_string()),
            modified_time: None,
            parents: Vec::new(),
        };
        state.files.insert(id.clone(), StoredFile { meta, content: Vec::new() });
        id
    }

    pub fn seed_file(&self, folder_id: &str, name: &str, mime_type: &str, content: Vec<u8>) -> String {
        let mut state = self.lock();
        let id = next_id(&mut state, "file");
        let meta = RemoteFile {
            id: id.clone(),
            name: name.to_string(),
            mime_type: Some(mime_type.to_string()),
            modified_time: None,
            parents: vec![folder_id.to_string()],
        };
        state.files.insert(id.clone(), StoredFile { meta, content });
        id
    }

    pub fn seed_json(&self, folder_id: &str, name: &str, value: &Value) -> String {
        self.seed_file(folder_id, name, "application/json", serde_json::to_vec(value).unwrap())
    }

    /// 模拟其他设备删除对象
    pub fn remove(&self, id: &str) {
        self.lock().files.remove(id);
    }

    pub fn folders(&self) -> Vec<RemoteFile> {
        self.lock()
            .files
            .values()
            .filter(|f| f.meta.mime_type.as_deref() == Some(FOLDER_MIME_TYPE))
            .map(|f| f.meta.clone())
            .collect()
    }

    pub fn find(&self, folder_id: &str, name: &str) -> Option<RemoteFile> {
        self.lock()
            .files
            .values()
            .find(|f| f.meta.name == name && f.meta.parents.iter().any(|p| p == folder_id))
            .map(|f| f.meta.clone())
    }

    pub fn names_in(&self, folder_id: &str) -> Vec<String> {
        self.lock()
            .files
            .values()
            .filter(|f| f.meta.parents.iter().any(|p| p == folder_id))
            .map(|f| f.meta.name.clone())
            .collect()
    }

    pub fn content(&self, id: &str) -> Option<Vec<u8>> {
        self.lock().files.get(id).map(|f| f.content.clone())
    }

    pub fn json(&self, id: &str) -> Option<Value> {
        self.content(id)
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
    }

    /// 读取目录下标记文件中的时间戳
    pub fn marker_time(&self, folder_id: &str, name: &str) -> Option<i64> {
        let marker = self.find(folder_id, name)?;
        SyncMarker::parse(&self.content(&marker.id)?)
    }

    async fn enter(&self, call: Call) -> SyncResult<()> {
        let (latency, reject) = {
            let mut state = self.lock();
            state.calls.push(call);
            (state.latency, state.reject_tokens)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if reject {
            return Err(SyncError::Auth("HTTP 401: invalid credentials".to_string()));
        }
        Ok(())
    }
}

fn next_id(state: &mut DriveState, kind: &str) -> String {
    state.next_id += 1;
    format!("{}-{}", kind, state.next_id)
}

fn not_found(id: &str) -> SyncError {
    SyncError::NotFound(format!("HTTP 404: file {} not found", id))
}

#[async_trait]
impl ObjectStoreApi for FakeDrive {
    async fn validate_token(&self, _token: &str) -> SyncResult<()> {
        self.enter(Call::Validate).await
    }

    async fn get_file(&self, _token: &str, file_id: &str) -> SyncResult<RemoteFile> {
        self.enter(Call::GetFile(file_id.to_string())).await?;
        self.lock()
            .files
            .get(file_id)
            .map(|f| f.meta.clone())
            .ok_or_else(|| not_found(file_id))
    }

    async fn find_folders(&self, _token: &str, name: &str) -> SyncResult<Vec<RemoteFile>> {
        self.enter(Call::FindFolders(name.to_string())).await?;
        Ok(self
            .folders()
            .into_iter()
            .filter(|f| f.name == name)
            .collect())
    }

    async fn create_folder(&self, _token: &str, name: &str) -> SyncResult<RemoteFile> {
        self.enter(Call::CreateFolder(name.to_string())).await?;
        let id = self.seed_folder(name);
        Ok(self.lock().files[&id].meta.clone())
    }

    async fn find_files(
        &self,
        _token: &str,
        folder_id: &str,
        filter: &NameFilter,
    ) -> SyncResult<Vec<RemoteFile>> {
        self.enter(Call::FindFiles(folder_id.to_string())).await?;
        let state = self.lock();
        if !state.files.contains_key(folder_id) {
            return Err(not_found(folder_id));
        }
        Ok(state
            .files
            .values()
            .filter(|f| f.meta.parents.iter().any(|p| p == folder_id))
            .filter(|f| query::matches(filter, &f.meta.name))
            .map(|f| f.meta.clone())
            .collect())
    }

    async fn create_file(
        &self,
        _token: &str,
        metadata: &NewFile,
        content: Vec<u8>,
    ) -> SyncResult<RemoteFile> {
        self.enter(Call::CreateFile(metadata.name.clone())).await?;
        let folder_id = metadata.parents.first().cloned().unwrap_or_default();
        let mime_type = metadata.mime_type.clone().unwrap_or_default();
        let id = self.seed_file(&folder_id, &metadata.name, &mime_type, content);
        Ok(self.lock().files[&id].meta.clone())
    }

    async fn update_file(
        &self,
        _token: &str,
        file_id: &str,
        _mime_type: &str,
        content: Vec<u8>,
    ) -> SyncResult<RemoteFile> {
        self.enter(Call::UpdateFile(file_id.to_string())).await?;
        let mut state = self.lock();
        let file = state.files.get_mut(file_id).ok_or_else(|| not_found(file_id))?;
        file.content = content;
        Ok(file.meta.clone())
    }

    async fn download(&self, _token: &str, file_id: &str) -> SyncResult<Bytes> {
        self.enter(Call::Download(file_id.to_string())).await?;
        self.lock()
            .files
            .get(file_id)
            .map(|f| Bytes::from(f.content.clone()))
            .ok_or_else(|| not_found(file_id))
    }

    async fn delete_file(&self, _token: &str, file_id: &str) -> SyncResult<()> {
        self.enter(Call::Delete(file_id.to_string())).await?;
        self.lock()
            .files
            .remove(file_id)
            .map(|_| ())
            .ok_or_else(|| not_found(file_id))
    }
}

/// 记录调用次数的凭证获取方，每次获取前等待一段时间
pub struct CountingIdentity {
    pub calls: AtomicUsize,
    delay: Duration,
}

impl CountingIdentity {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for CountingIdentity {
    async fn acquire_token(&self, _interactive: bool, cancel: CancellationToken) -> SyncResult<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::select! {
            _ = cancel.cancelled() => Err(SyncError::Cancelled("cancelled".to_string())),
            _ = tokio::time::sleep(self.delay) => Ok(format!("token-{}", n)),
        }
    }
}

/// 读取指定键后先等待一段时间再返回，用于制造读-改-写与其他写入的交错
pub struct StallingStore {
    inner: Arc<InMemorySnapshotStore>,
    key: &'static str,
    delay: Duration,
}

impl StallingStore {
    pub fn new(inner: Arc<InMemorySnapshotStore>, key: &'static str, delay: Duration) -> Arc<Self> {
        Arc::new(Self { inner, key, delay })
    }
}

#[async_trait]
impl SnapshotStore for StallingStore {
    async fn load(&self) -> SyncResult<LocalSnapshot> {
        self.inner.load().await
    }

    async fn get(&self, key: &str) -> SyncResult<Option<Value>> {
        let value = self.inner.get(key).await?;
        if key == self.key {
            tokio::time::sleep(self.delay).await;
        }
        Ok(value)
    }

    async fn set(&self, entries: Map<String, Value>) -> SyncResult<()> {
        self.inner.set(entries).await
    }

    async fn remove(&self, keys: &[&str]) -> SyncResult<()> {
        self.inner.remove(keys).await
    }
}

/// 测试默认配置：关闭时间戳缓存，其余取默认值
pub fn test_config(strategy: SyncStrategyKind) -> SyncServiceConfig {
    let mut config = SyncServiceConfig::from_app_config(&GlitchDraftConfig::default());
    config.folder_name = FOLDER_NAME.to_string();
    config.engine.strategy = strategy;
    config.engine.marker_cache_ttl = Duration::ZERO;
    config
}

/// 以已登录状态构造本地快照
pub fn signed_in(value: Value) -> LocalSnapshot {
    let mut snapshot = LocalSnapshot::from_value(value).unwrap();
    snapshot.insert("authToken", Value::from(TOKEN));
    snapshot
}

pub struct Harness {
    pub config: SyncServiceConfig,
    pub drive: Arc<FakeDrive>,
    pub storage: Arc<InMemorySnapshotStore>,
    pub notifier: BroadcastNotifier,
    pub tokens: Arc<TokenStore>,
    pub folders: Arc<AppFolderResolver>,
    pub drafts: Arc<DraftBook>,
    pub engine: Arc<SyncEngine>,
    pub handler: Arc<SyncCommandHandler>,
    pub scheduler: Arc<PollScheduler>,
}

impl Harness {
    pub fn new(strategy: SyncStrategyKind, initial: LocalSnapshot) -> Self {
        let identity: IdentityProviderRef = Arc::new(StaticTokenProvider::new(Some(TOKEN.to_string())));
        Self::build(test_config(strategy), initial, FakeDrive::new(), identity)
    }

    pub fn build(
        config: SyncServiceConfig,
        initial: LocalSnapshot,
        drive: Arc<FakeDrive>,
        identity: IdentityProviderRef,
    ) -> Self {
        let storage = Arc::new(InMemorySnapshotStore::with_snapshot(initial));
        Self::assemble(config, storage.clone(), storage, drive, identity)
    }

    /// 所有服务共享 `shared`；`storage` 仅供断言直接读取
    pub fn assemble(
        config: SyncServiceConfig,
        storage: Arc<InMemorySnapshotStore>,
        shared: SnapshotStoreRef,
        drive: Arc<FakeDrive>,
        identity: IdentityProviderRef,
    ) -> Self {
        let notifier = BroadcastNotifier::new();

        let tokens = Arc::new(TokenStore::new(
            shared.clone(),
            drive.clone(),
            identity,
            config.auth_timeouts,
        ));
        let remote = Arc::new(RemoteObjectStore::new(drive.clone(), tokens.clone()));
        let folders = Arc::new(AppFolderResolver::new(
            remote.clone(),
            shared.clone(),
            config.folder_name.clone(),
        ));
        let drafts = Arc::new(DraftBook::new(shared.clone()));
        let ui: UiNotifierRef = Arc::new(notifier.clone());
        let engine = Arc::new(SyncEngine::new(
            shared.clone(),
            remote,
            folders.clone(),
            drafts.clone(),
            ui,
            config.engine.clone(),
        ));
        let handler = Arc::new(SyncCommandHandler::new(
            engine.clone(),
            tokens.clone(),
            folders.clone(),
            drafts.clone(),
            shared,
        ));
        let scheduler = Arc::new(PollScheduler::new(engine.clone(), config.scheduler));

        Self {
            config,
            drive,
            storage,
            notifier,
            tokens,
            folders,
            drafts,
            engine,
            handler,
            scheduler,
        }
    }

    pub async fn snapshot(&self) -> LocalSnapshot {
        self.storage.load().await.unwrap()
    }

    pub async fn local_time(&self) -> Option<i64> {
        self.snapshot().await.last_sync_time()
    }
}
