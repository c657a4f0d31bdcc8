pub mod native_messaging;

pub use native_messaging::NativeMessagingHost;
