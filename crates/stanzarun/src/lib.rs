pub mod backend;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod future;
pub mod memview;
pub mod mock;
pub mod network;
pub mod peer;
pub mod provider;
pub mod region;
pub mod registry;
pub mod session;
pub mod transport;

#[cfg(test)]
mod tests;

pub use backend::Backend;
pub use backend::BackendRegistry;
pub use backend::ForeignFn;
pub use client::Client;
pub use client::ProviderHandle;
pub use client::SessionHandle;
pub use client::SessionRef;
pub use config::ProviderConfig;
pub use config::SessionConfig;
pub use engine::Engine;
pub use engine::EngineConfig;
pub use error::Error;
pub use error::Result;
pub use future::Future;
pub use memview::Intent;
pub use memview::MemoryView;
pub use network::LocalNetwork;
pub use provider::Provider;
pub use region::Buffer;
