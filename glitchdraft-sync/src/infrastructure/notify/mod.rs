pub mod channel;

pub use channel::BroadcastNotifier;
