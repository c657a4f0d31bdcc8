pub mod loopback;
pub mod static_token;

pub use loopback::{LoopbackIdentityProvider, LoopbackSettings};
pub use static_token::StaticTokenProvider;
