pub mod drive;
pub mod identity;
pub mod local;
pub mod notify;
