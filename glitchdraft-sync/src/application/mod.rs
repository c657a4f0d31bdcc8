pub mod commands;
pub mod handler;
pub mod scheduler;

pub use commands::{SyncRequest, SyncResponse};
pub use handler::SyncCommandHandler;
pub use scheduler::{PollScheduler, SchedulerSettings};
