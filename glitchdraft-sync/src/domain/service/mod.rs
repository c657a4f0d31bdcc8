pub mod drafts;
pub mod folder_resolver;
pub mod remote;
pub mod sync_engine;
pub mod token_store;

pub use drafts::DraftBook;
pub use folder_resolver::{AppFolderResolver, FolderState};
pub use remote::RemoteObjectStore;
pub use sync_engine::{SyncEngine, SyncSettings};
pub use token_store::{AuthTimeouts, TokenStore};
