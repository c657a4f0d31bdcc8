pub mod bootstrap;

pub use bootstrap::{Adapters, ApplicationBootstrap, ApplicationContext};
