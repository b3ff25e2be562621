//! # Network
//!
//! Address resolution for engines. A [`Connector`] turns an address into a
//! fresh [`Transport`]; [`LocalNetwork`] does so for engines living in the
//! same process, handing each one an address of the form `local://<n>`.

use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;

use crate::engine::Engine;
use crate::engine::EngineInner;
use crate::transport;
use crate::transport::ChannelTransport;
use crate::transport::Transport;

/// Opens connections to engines by address.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connects to the engine listening at `address`.
    async fn connect(&self, address: &str) -> transport::Result<Box<dyn Transport>>;

    /// Called when the engine at `address` shuts down.
    fn unbind(&self, _address: &str) {}
}

/// An in-process network of engines.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    inner: Arc<NetworkInner>,
}

#[derive(Default)]
struct NetworkInner {
    engines: DashMap<String, Weak<EngineInner>>,
    next_id: AtomicU64,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_address(&self) -> String {
        format!("local://{}", self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn bind(&self, address: &str, engine: Weak<EngineInner>) {
        self.inner.engines.insert(address.to_string(), engine);
    }

    /// Number of engines currently listening.
    pub fn engine_count(&self) -> usize {
        self.inner.engines.len()
    }
}

#[async_trait::async_trait]
impl Connector for LocalNetwork {
    async fn connect(&self, address: &str) -> transport::Result<Box<dyn Transport>> {
        let inner = self.inner.engines.get(address).and_then(|weak| weak.upgrade());
        let Some(inner) = inner else {
            return Err(transport::Error::Unreachable(address.to_string()));
        };

        let (client, server) = ChannelTransport::pair();
        Engine::from_inner(inner).accept(Box::new(server));
        Ok(Box::new(client))
    }

    fn unbind(&self, address: &str) {
        self.inner.engines.remove(address);
    }
}
