pub mod errors;
pub mod model;
pub mod repository;
pub mod service;

pub use errors::{SyncError, SyncResult};
