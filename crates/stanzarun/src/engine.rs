//! # RPC Engine
//!
//! One endpoint on a network. An engine answers inbound calls by routing
//! them to handlers registered under a (provider id, operation) pair, keeps
//! one multiplexed [`Peer`] per remote address for outbound calls, and owns
//! the table of byte regions exposed for bulk transfer.
//!
//! ## Dispatch
//!
//! Every inbound call runs as its own task. Handler tasks draw a permit from
//! a bounded worker pool first, so at most `EngineConfig::workers` handlers
//! run at once; the rest wait without holding a thread. Built-in operations
//! (identity, bulk pull, bulk push) bypass the pool since they never block.

use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Semaphore;
use tokio::sync::oneshot;

use stanzapack::Binary;
use stanzapack::Map;
use stanzapack::Value;
use stanzarpc::Fault;
use stanzarpc::ReplyErrEncoder;
use stanzarpc::ReplyOkEncoder;
use stanzarpc::RpcError;
use stanzarpc::RpcFrame;
use stanzarpc::decode_seq;

use crate::error::Error;
use crate::error::Result;
use crate::network::Connector;
use crate::network::LocalNetwork;
use crate::peer::Peer;
use crate::region::Buffer;
use crate::region::BulkMode;
use crate::region::RegionHandle;
use crate::transport::Transport;

/// What a session provider answers to the identity query.
pub const IDENTITY: &str = "stanza";

const OP_IDENTITY: &str = "stanza_identity";
const OP_BULK_PULL: &str = "stanza_bulk_pull";
const OP_BULK_PUSH: &str = "stanza_bulk_push";

pub type HandlerResult = std::result::Result<Vec<u8>, Fault>;

/// Answers one kind of inbound call.
///
/// The body is the encoded request; the returned bytes become the reply body.
/// A `Fault` is reserved for calls that could not be dispatched at all.
#[async_trait::async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, body: Vec<u8>) -> HandlerResult;
}

#[async_trait::async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, body: Vec<u8>) -> HandlerResult {
        (self)(body).await
    }
}

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of handlers running at once.
    pub workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { workers: 16 }
    }
}

/// A client-side operation name, declared once per engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Procedure {
    name: Arc<str>,
}

impl Procedure {
    pub fn name(&self) -> &str {
        &self.name
    }
}

struct Region {
    buffer: Buffer,
    mode: BulkMode,
}

pub(crate) struct EngineInner {
    address: String,
    connector: Arc<dyn Connector>,
    handlers: DashMap<(u16, String), Arc<dyn Handler>>,
    providers: DashMap<u16, String>,
    declared: DashMap<String, Procedure>,
    peers: DashMap<String, Arc<Peer>>,
    regions: DashMap<u64, Region>,
    next_region: AtomicU64,
    workers: Arc<Semaphore>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.connector.unbind(&self.address);
    }
}

/// A cheaply cloneable handle to one engine.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("address", &self.inner.address).finish()
    }
}

/// Keeps a buffer exposed for bulk transfer; the region is withdrawn on drop.
pub struct Exposure {
    handle: RegionHandle,
    engine: Weak<EngineInner>,
}

impl Exposure {
    pub fn handle(&self) -> RegionHandle {
        self.handle
    }
}

impl Drop for Exposure {
    fn drop(&mut self) {
        if let Some(inner) = self.engine.upgrade() {
            inner.regions.remove(&self.handle.id);
        }
    }
}

impl Engine {
    /// Starts an engine on the local network.
    pub fn new(network: &LocalNetwork, config: EngineConfig) -> Self {
        let address = network.next_address();
        let inner = Arc::new(EngineInner {
            address: address.clone(),
            connector: Arc::new(network.clone()),
            handlers: DashMap::new(),
            providers: DashMap::new(),
            declared: DashMap::new(),
            peers: DashMap::new(),
            regions: DashMap::new(),
            next_region: AtomicU64::new(1),
            workers: Arc::new(Semaphore::new(config.workers.max(1))),
        });
        network.bind(&address, Arc::downgrade(&inner));
        tracing::debug!(address = %address, workers = config.workers, "engine started");
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<EngineInner>) -> Self {
        Self { inner }
    }

    /// The address other engines use to reach this one.
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn is_local(&self, address: &str) -> bool {
        self.inner.address == address
    }

    // ------------------------------------------------------------------------
    //  Providers and handlers
    // ------------------------------------------------------------------------

    /// Claims a provider id. Fails if another provider already holds it.
    pub fn register_provider(&self, provider_id: u16, identity: &str) -> Result<()> {
        match self.inner.providers.entry(provider_id) {
            Entry::Occupied(_) => Err(Error::DuplicateProvider(provider_id)),
            Entry::Vacant(slot) => {
                slot.insert(identity.to_string());
                Ok(())
            }
        }
    }

    pub fn register_handler(&self, provider_id: u16, op: &str, handler: Arc<dyn Handler>) {
        self.inner.handlers.insert((provider_id, op.to_string()), handler);
    }

    /// Releases a provider id and every handler registered under it.
    pub fn deregister_provider(&self, provider_id: u16) {
        self.inner.providers.remove(&provider_id);
        self.inner.handlers.retain(|(id, _), _| *id != provider_id);
    }

    pub fn has_provider(&self, provider_id: u16) -> bool {
        self.inner.providers.contains_key(&provider_id)
    }

    /// Declares an operation for outbound calls. Declaring a name twice
    /// returns the existing procedure.
    pub fn declare(&self, op: &str) -> Procedure {
        self.inner
            .declared
            .entry(op.to_string())
            .or_insert_with(|| {
                tracing::trace!(address = %self.inner.address, op, "declared procedure");
                Procedure { name: Arc::from(op) }
            })
            .value()
            .clone()
    }

    pub fn is_declared(&self, op: &str) -> bool {
        self.inner.declared.contains_key(op)
    }

    // ------------------------------------------------------------------------
    //  Outbound calls
    // ------------------------------------------------------------------------

    /// Returns the connection to `address`, establishing it on first use.
    pub async fn lookup(&self, address: &str) -> Result<Arc<Peer>> {
        let cached = self.inner.peers.get(address).map(|peer| peer.value().clone());
        if let Some(peer) = cached.filter(|peer| !peer.is_closed()) {
            return Ok(peer);
        }

        let transport = self.inner.connector.connect(address).await?;
        let peer = Arc::new(Peer::new(address, transport));
        self.inner.peers.insert(address.to_string(), peer.clone());
        Ok(peer)
    }

    /// Calls `op` on a remote provider and waits for the reply body.
    pub async fn call(&self, address: &str, provider_id: u16, op: &str, body: &[u8]) -> Result<Vec<u8>> {
        let peer = self.lookup(address).await?;
        peer.call(provider_id, op, body).await
    }

    /// Starts a call without waiting for it. The receiver resolves with the reply body.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(
        &self,
        address: &str,
        provider_id: u16,
        procedure: &Procedure,
        body: Vec<u8>,
    ) -> oneshot::Receiver<Result<Vec<u8>>> {
        let (tx, rx) = oneshot::channel();
        let engine = self.clone();
        let address = address.to_string();
        let procedure = procedure.clone();
        tokio::spawn(async move {
            let result = engine.call(&address, provider_id, procedure.name(), &body).await;
            let _ = tx.send(result);
        });
        rx
    }

    /// Asks what answers to `provider_id` at `address`.
    pub async fn identity(&self, address: &str, provider_id: u16) -> Result<String> {
        let reply = match self.call(address, provider_id, OP_IDENTITY, &[]).await {
            Err(Error::Fault(Fault::UnknownProvider(_))) => {
                return Err(Error::NotAProvider { address: address.to_string(), provider_id });
            }
            other => other?,
        };
        match Value::from_bytes(&reply)? {
            Value::String(identity) => Ok(identity),
            other => Err(mismatch("identity", "string", &other)),
        }
    }

    // ------------------------------------------------------------------------
    //  Bulk regions
    // ------------------------------------------------------------------------

    /// Exposes `buffer` to remote peers with the given access mode.
    pub fn expose(&self, buffer: Buffer, mode: BulkMode) -> Exposure {
        let id = self.inner.next_region.fetch_add(1, Ordering::Relaxed);
        let handle = RegionHandle { id, len: buffer.len() as u64, mode };
        self.inner.regions.insert(id, Region { buffer, mode });
        Exposure { handle, engine: Arc::downgrade(&self.inner) }
    }

    /// The buffer behind a region this engine exposes.
    pub fn region(&self, id: u64) -> Option<Buffer> {
        self.inner.regions.get(&id).map(|region| region.buffer.clone())
    }

    pub fn region_count(&self) -> usize {
        self.inner.regions.len()
    }

    fn region_window(&self, id: u64, offset: u64, length: u64, check: fn(BulkMode) -> bool) -> std::result::Result<Buffer, Fault> {
        let (buffer, mode) = self
            .inner
            .regions
            .get(&id)
            .map(|region| (region.buffer.clone(), region.mode))
            .ok_or(Fault::InvalidRegion(id))?;
        if !check(mode) {
            return Err(Fault::AccessDenied(id));
        }
        let out_of_bounds = Fault::OutOfBounds { offset, length, size: buffer.len() as u64 };
        let (Ok(start), Ok(len)) = (usize::try_from(offset), usize::try_from(length)) else {
            return Err(out_of_bounds);
        };
        buffer.slice(start, len).ok_or(out_of_bounds)
    }

    fn read_region(&self, id: u64, offset: u64, length: u64) -> std::result::Result<Vec<u8>, Fault> {
        Ok(self.region_window(id, offset, length, BulkMode::readable)?.to_vec())
    }

    fn write_region(&self, id: u64, offset: u64, data: &[u8]) -> std::result::Result<(), Fault> {
        let window = self.region_window(id, offset, data.len() as u64, BulkMode::writable)?;
        window.copy_from_slice(data);
        Ok(())
    }

    /// Copies `length` bytes out of a region owned by the engine at `owner`.
    pub async fn pull(&self, owner: &str, handle: &RegionHandle, offset: u64, length: u64) -> Result<Vec<u8>> {
        if self.is_local(owner) {
            return Ok(self.read_region(handle.id, offset, length)?);
        }

        let mut request = Map::new();
        request.insert("region", handle.id);
        request.insert("offset", offset);
        request.insert("length", length);
        let body = Value::Object(request).to_bytes()?;

        let reply = self.call(owner, 0, OP_BULK_PULL, &body).await?;
        match Value::from_bytes(&reply)? {
            Value::Binary(bin) if bin.bytes.len() as u64 == length => Ok(bin.bytes),
            Value::Binary(bin) => Err(Error::Rpc(RpcError::ProtocolViolation(format!(
                "Pulled {} bytes, expected {}",
                bin.bytes.len(),
                length
            )))),
            other => Err(mismatch("data", "binary", &other)),
        }
    }

    /// Copies `data` into a region owned by the engine at `owner`.
    pub async fn push(&self, owner: &str, handle: &RegionHandle, offset: u64, data: &[u8]) -> Result<()> {
        if self.is_local(owner) {
            return Ok(self.write_region(handle.id, offset, data)?);
        }

        let mut request = Map::new();
        request.insert("region", handle.id);
        request.insert("offset", offset);
        request.insert("data", Binary::new(data.to_vec()));
        let body = Value::Object(request).to_bytes()?;

        self.call(owner, 0, OP_BULK_PUSH, &body).await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    //  Inbound calls
    // ------------------------------------------------------------------------

    /// Serves calls arriving on `transport` until the other end hangs up.
    pub(crate) fn accept(&self, transport: Box<dyn Transport>) {
        let transport: Arc<dyn Transport> = Arc::from(transport);
        let weak = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            loop {
                let msg = match transport.recv().await {
                    Ok(Some(msg)) => msg,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "inbound connection failed");
                        break;
                    }
                };
                let Some(inner) = weak.upgrade() else { break };
                let engine = Engine { inner };
                let transport = transport.clone();

                tokio::spawn(async move {
                    let Some(reply) = engine.dispatch(&msg).await else { return };
                    if let Err(e) = transport.send(&reply).await {
                        tracing::debug!(address = %engine.address(), error = %e, "reply not delivered");
                    }
                });
            }
        });
    }

    /// Decodes one inbound frame and produces the reply frame, if one is owed.
    async fn dispatch(&self, msg: &[u8]) -> Option<Vec<u8>> {
        let (seq, result) = match RpcFrame::from_bytes(msg) {
            Ok(RpcFrame::Call(call)) => {
                tracing::trace!(address = %self.inner.address, seq = call.seq, provider = call.provider_id, op = call.op, "call received");
                let result = self.handle_call(call.provider_id, call.op, call.body.to_vec()).await;
                (call.seq, result)
            }
            Ok(RpcFrame::Reply(reply)) => {
                tracing::warn!(seq = reply.seq, "engine received a reply on an inbound connection");
                return None;
            }
            Err(e) => {
                let seq = decode_seq(msg).ok()?;
                (seq, Err(Fault::ProtocolViolation(e.to_string())))
            }
        };

        let encoded = match &result {
            Ok(body) => ReplyOkEncoder::new(seq, body).to_bytes(),
            Err(fault) => ReplyErrEncoder::new(seq, fault).to_bytes(),
        };
        match encoded {
            Ok(reply) => Some(reply),
            Err(e) => {
                tracing::error!(seq, error = %e, "could not encode reply");
                None
            }
        }
    }

    async fn handle_call(&self, provider_id: u16, op: &str, body: Vec<u8>) -> HandlerResult {
        if let Some(result) = self.builtin(provider_id, op, &body) {
            return result;
        }

        let handler = self.inner.handlers.get(&(provider_id, op.to_string())).map(|h| h.value().clone());
        let Some(handler) = handler else {
            return Err(if self.has_provider(provider_id) {
                Fault::UnknownOperation(op.to_string())
            } else {
                Fault::UnknownProvider(provider_id)
            });
        };

        let permit = self
            .inner
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Fault::HandlerFailed("Worker pool closed".into()))?;
        let task = tokio::spawn(async move {
            let _permit = permit;
            handler.handle(body).await
        });
        match task.await {
            Ok(result) => result,
            Err(e) => Err(Fault::HandlerFailed(e.to_string())),
        }
    }

    fn builtin(&self, provider_id: u16, op: &str, body: &[u8]) -> Option<HandlerResult> {
        let result = match op {
            OP_IDENTITY => match self.inner.providers.get(&provider_id) {
                Some(identity) => encode(&Value::String(identity.value().clone())),
                None => Err(Fault::UnknownProvider(provider_id)),
            },
            OP_BULK_PULL => bulk_request(body).and_then(|request| {
                let bytes = self.read_region(
                    bulk_field(&request, "region")?,
                    bulk_field(&request, "offset")?,
                    bulk_field(&request, "length")?,
                )?;
                encode(&Value::Binary(Binary::new(bytes)))
            }),
            OP_BULK_PUSH => bulk_request(body).and_then(|request| {
                let Some(Value::Binary(data)) = request.get("data") else {
                    return Err(Fault::ProtocolViolation("Bulk push without data".into()));
                };
                self.write_region(bulk_field(&request, "region")?, bulk_field(&request, "offset")?, &data.bytes)?;
                encode(&Value::Null)
            }),
            _ => return None,
        };
        Some(result)
    }
}

fn encode(value: &Value) -> HandlerResult {
    value.to_bytes().map_err(|e| Fault::HandlerFailed(e.to_string()))
}

fn bulk_request(body: &[u8]) -> std::result::Result<Value, Fault> {
    Value::from_bytes(body).map_err(|e| Fault::ProtocolViolation(e.to_string()))
}

fn bulk_field(request: &Value, key: &str) -> std::result::Result<u64, Fault> {
    request
        .get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| Fault::ProtocolViolation(format!("Bulk request without '{}'", key)))
}

fn mismatch(field: &str, expected: &'static str, found: &Value) -> Error {
    Error::Rpc(RpcError::TypeMismatch { field: field.to_string(), expected, found: found.kind() })
}
