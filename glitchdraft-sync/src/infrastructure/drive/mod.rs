pub mod http_client;
pub mod multipart;
pub mod query;

pub use http_client::DriveHttpClient;
