//! # Remote Memory Views
//!
//! A [`MemoryView`] describes a byte range that lives in some engine's
//! exposed region, together with an [`Intent`] saying which way the bytes
//! flow. Views travel inside argument lists as a binary value carrying the
//! reserved subtype [`MEMORY_VIEW_SUBTYPE`]; the receiver rebuilds the view
//! and pulls or pushes the bytes only when it actually needs them.
//!
//! ## Lifecycle
//!
//! 1. **Expose**: the owner wraps a local [`Buffer`]; the view keeps it exposed
//!    for as long as the view lives.
//! 2. **Decode**: a receiver turns the wire blob back into a view. If the owner
//!    is the receiver's own engine, the view resolves straight to the region.
//! 3. **Materialize**: `data()` returns the bytes. Local regions come back
//!    without a copy. Remote ones are copied into a fresh local buffer,
//!    pulled first when the intent includes `IN`.
//! 4. **Release**: `release()` pushes a materialized copy back to the owner
//!    when the intent includes `OUT`. Dropping an unreleased view schedules
//!    the same push on the runtime. Inside [`settle_write_backs`] that push
//!    is finished before the scope returns; elsewhere it is best-effort.
//!
//! ## Wire Format
//!
//! `[intent:1][ownerLen:8][owner][handleLen:8][handle][offset:8][length:8]`,
//! integers in the producer's native byte order.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

use stanzapack::Binary;
use stanzapack::Value;
use stanzapack::json::undump_binary;

use crate::engine::Engine;
use crate::engine::Exposure;
use crate::error::Error;
use crate::error::Result;
use crate::region::Buffer;
use crate::region::BulkMode;
use crate::region::RegionHandle;

/// Binary subtype marking a memory view blob.
pub const MEMORY_VIEW_SUBTYPE: u64 = 2388;

type PendingWriteBacks = Arc<Mutex<Vec<JoinHandle<()>>>>;

tokio::task_local! {
    static WRITE_BACKS: PendingWriteBacks;
}

/// Runs `op`, then waits for every write-back scheduled by a view dropped
/// while it ran.
///
/// Views dropped on other tasks are not tracked.
pub async fn settle_write_backs<F: std::future::Future>(op: F) -> F::Output {
    let pending = PendingWriteBacks::default();
    let output = WRITE_BACKS.scope(pending.clone(), op).await;

    let handles = std::mem::take(&mut *pending.lock().unwrap_or_else(PoisonError::into_inner));
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "memory view write-back task failed");
        }
    }
    output
}

/// Which way bytes flow between the owner and the receiver of a view.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    /// The receiver reads the owner's bytes.
    In = 1,
    /// The receiver writes bytes back to the owner.
    Out = 2,
    InOut = 3,
}

impl Intent {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            1 => Some(Intent::In),
            2 => Some(Intent::Out),
            3 => Some(Intent::InOut),
            _ => None,
        }
    }

    pub fn reads(self) -> bool {
        matches!(self, Intent::In | Intent::InOut)
    }

    pub fn writes(self) -> bool {
        matches!(self, Intent::Out | Intent::InOut)
    }

    /// What remote peers may do to the owner's region.
    pub fn owner_mode(self) -> BulkMode {
        match self {
            Intent::In => BulkMode::ReadOnly,
            Intent::Out => BulkMode::WriteOnly,
            Intent::InOut => BulkMode::ReadWrite,
        }
    }

    /// Mode for a receiver's local copy: the transfer writes into it when
    /// reading from the owner, and reads from it when writing back.
    pub fn copy_mode(self) -> BulkMode {
        match self {
            Intent::In => BulkMode::WriteOnly,
            Intent::Out => BulkMode::ReadOnly,
            Intent::InOut => BulkMode::ReadWrite,
        }
    }
}

struct Materialized {
    buffer: Buffer,
    /// Set when `buffer` is a copy that must be written back to the owner.
    owned: bool,
    _exposure: Option<Exposure>,
}

/// A byte range in some engine's exposed region.
pub struct MemoryView {
    engine: Engine,
    intent: Intent,
    owner: String,
    handle: RegionHandle,
    offset: u64,
    length: u64,
    _exposure: Option<Exposure>,
    local: OnceCell<Materialized>,
    released: bool,
}

impl std::fmt::Debug for MemoryView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryView")
            .field("intent", &self.intent)
            .field("owner", &self.owner)
            .field("handle", &self.handle)
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("materialized", &self.local.initialized())
            .finish()
    }
}

impl MemoryView {
    /// Exposes a local buffer. The region stays registered while the view lives.
    pub fn expose(engine: &Engine, buffer: Buffer, intent: Intent) -> Self {
        let exposure = engine.expose(buffer.clone(), intent.owner_mode());
        let handle = exposure.handle();
        let local = OnceCell::new_with(Some(Materialized { buffer, owned: false, _exposure: None }));
        Self {
            engine: engine.clone(),
            intent,
            owner: engine.address().to_string(),
            handle,
            offset: 0,
            length: handle.len,
            _exposure: Some(exposure),
            local,
            released: false,
        }
    }

    /// Describes part of an existing region on `owner`.
    ///
    /// `offset` defaults to 0 and `length` to the rest of the region; the
    /// window must lie inside the region.
    pub fn from_region(
        engine: &Engine,
        handle: RegionHandle,
        owner: &str,
        intent: Intent,
        offset: Option<u64>,
        length: Option<u64>,
    ) -> Result<Self> {
        let offset = offset.unwrap_or(0);
        let length = match length {
            Some(length) => length,
            None => handle.len.checked_sub(offset).ok_or_else(|| {
                Error::InvalidView(format!("offset {} is past the region end {}", offset, handle.len))
            })?,
        };
        match offset.checked_add(length) {
            Some(end) if end <= handle.len => {}
            _ => {
                return Err(Error::InvalidView(format!(
                    "window of {} bytes at offset {} exceeds region size {}",
                    length, offset, handle.len
                )));
            }
        }

        Ok(Self {
            engine: engine.clone(),
            intent,
            owner: owner.to_string(),
            handle,
            offset,
            length,
            _exposure: None,
            local: OnceCell::new(),
            released: false,
        })
    }

    /// Rebuilds a view from its wire blob.
    pub fn from_blob(engine: &Engine, blob: &[u8]) -> Result<Self> {
        let mut cursor = BlobCursor { bytes: blob };
        let intent = cursor.byte()?;
        let intent = Intent::from_u8(intent).ok_or_else(|| Error::InvalidView(format!("unknown intent {}", intent)))?;
        let owner = cursor.sized()?;
        let owner = std::str::from_utf8(owner).map_err(|_| Error::InvalidView("owner address is not UTF-8".into()))?;
        let handle = cursor.sized()?;
        let handle = RegionHandle::from_bytes(handle).ok_or_else(|| Error::InvalidView("malformed region handle".into()))?;
        let offset = cursor.u64()?;
        let length = cursor.u64()?;
        if !cursor.bytes.is_empty() {
            return Err(Error::InvalidView(format!("{} trailing bytes", cursor.bytes.len())));
        }
        Self::from_region(engine, handle, owner, intent, Some(offset), Some(length))
    }

    /// Rebuilds a view from a value carrying its blob.
    ///
    /// Accepts the binary value itself or its JSON-dumped object form.
    pub fn from_value(engine: &Engine, value: &Value) -> Result<Self> {
        let bin = match value {
            Value::Binary(bin) => bin.clone(),
            other => undump_binary(other).ok_or_else(|| Error::InvalidView(format!("expected binary, found {}", other.kind())))?,
        };
        if bin.subtype != Some(MEMORY_VIEW_SUBTYPE) {
            return Err(Error::InvalidView(format!("binary subtype {:?} is not a memory view", bin.subtype)));
        }
        Self::from_blob(engine, &bin.bytes)
    }

    /// Encodes the view as its wire blob.
    pub fn to_blob(&self) -> Vec<u8> {
        let handle = self.handle.to_bytes();
        let mut out = Vec::with_capacity(1 + 8 + self.owner.len() + 8 + handle.len() + 16);
        out.push(self.intent as u8);
        out.extend_from_slice(&(self.owner.len() as u64).to_ne_bytes());
        out.extend_from_slice(self.owner.as_bytes());
        out.extend_from_slice(&(handle.len() as u64).to_ne_bytes());
        out.extend_from_slice(&handle);
        out.extend_from_slice(&self.offset.to_ne_bytes());
        out.extend_from_slice(&self.length.to_ne_bytes());
        out
    }

    /// The view as an argument value.
    pub fn to_value(&self) -> Value {
        Value::Binary(Binary::with_subtype(MEMORY_VIEW_SUBTYPE, self.to_blob()))
    }

    pub fn size(&self) -> u64 {
        self.length
    }

    pub fn intent(&self) -> Intent {
        self.intent
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn handle(&self) -> RegionHandle {
        self.handle
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Whether the bytes live in this process's own region.
    pub fn is_local(&self) -> bool {
        self.engine.is_local(&self.owner)
    }

    /// The view's bytes, fetched on first access.
    pub async fn data(&self) -> Result<Buffer> {
        let materialized = self.local.get_or_try_init(|| self.materialize()).await?;
        Ok(materialized.buffer.clone())
    }

    async fn materialize(&self) -> Result<Materialized> {
        if self.is_local() {
            let buffer = self.local_window().ok_or_else(|| {
                Error::InvalidView(format!("region {} is no longer exposed", self.handle.id))
            })?;
            return Ok(Materialized { buffer, owned: false, _exposure: None });
        }

        let len = usize::try_from(self.length)
            .map_err(|_| Error::InvalidView(format!("{} bytes do not fit in memory", self.length)))?;
        let buffer = Buffer::new(len);
        let exposure = self.engine.expose(buffer.clone(), self.intent.copy_mode());

        if self.intent.reads() {
            let bytes = self.engine.pull(&self.owner, &self.handle, self.offset, self.length).await?;
            buffer.copy_from_slice(&bytes);
        }
        tracing::trace!(owner = %self.owner, region = self.handle.id, len, "materialized memory view");

        Ok(Materialized { buffer, owned: true, _exposure: Some(exposure) })
    }

    fn local_window(&self) -> Option<Buffer> {
        let region = self.engine.region(self.handle.id)?;
        region.slice(usize::try_from(self.offset).ok()?, usize::try_from(self.length).ok()?)
    }

    /// The materialized buffer, or the local region when it can be found
    /// without waiting.
    fn resolved(&self) -> Option<Buffer> {
        match self.local.get() {
            Some(materialized) => Some(materialized.buffer.clone()),
            None if self.is_local() => self.local_window(),
            None => None,
        }
    }

    fn pending_write_back(&mut self) -> Option<Buffer> {
        if self.released || !self.intent.writes() {
            return None;
        }
        self.released = true;
        let materialized = self.local.take()?;
        materialized.owned.then_some(materialized.buffer)
    }

    /// Finishes with the view, writing a materialized copy back to the
    /// owner when the intent includes `OUT`.
    pub async fn release(mut self) -> Result<()> {
        let Some(buffer) = self.pending_write_back() else {
            return Ok(());
        };
        let bytes = buffer.to_vec();
        self.engine.push(&self.owner, &self.handle, self.offset, &bytes).await
    }
}

impl Drop for MemoryView {
    fn drop(&mut self) {
        let Some(buffer) = self.pending_write_back() else { return };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(owner = %self.owner, region = self.handle.id, "memory view dropped outside a runtime; write-back skipped");
            return;
        };

        let engine = self.engine.clone();
        let owner = self.owner.clone();
        let handle = self.handle;
        let offset = self.offset;
        let write_back = runtime.spawn(async move {
            let bytes = buffer.to_vec();
            if let Err(e) = engine.push(&owner, &handle, offset, &bytes).await {
                tracing::warn!(owner = %owner, region = handle.id, error = %e, "memory view write-back failed");
            }
        });
        let _ = WRITE_BACKS.try_with(|pending| {
            pending.lock().unwrap_or_else(PoisonError::into_inner).push(write_back);
        });
    }
}

/// Two views are equal when they resolve to the same bytes in memory.
impl PartialEq for MemoryView {
    fn eq(&self, other: &Self) -> bool {
        match (self.resolved(), other.resolved()) {
            (Some(a), Some(b)) => a.same_memory(&b) && a.len() == b.len(),
            _ => false,
        }
    }
}

/// Whether `value` carries a memory view blob.
pub fn is_memory_view(value: &Value) -> bool {
    match value {
        Value::Binary(bin) => bin.subtype == Some(MEMORY_VIEW_SUBTYPE),
        Value::Object(_) => undump_binary(value).is_some_and(|bin| bin.subtype == Some(MEMORY_VIEW_SUBTYPE)),
        _ => false,
    }
}

struct BlobCursor<'a> {
    bytes: &'a [u8],
}

impl<'a> BlobCursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.bytes.len() {
            return Err(Error::InvalidView("truncated memory view blob".into()));
        }
        let (head, tail) = self.bytes.split_at(n);
        self.bytes = tail;
        Ok(head)
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u64(&mut self) -> Result<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_ne_bytes(raw))
    }

    fn sized(&mut self) -> Result<&'a [u8]> {
        let len = self.u64()?;
        let len = usize::try_from(len).map_err(|_| Error::InvalidView("blob field too large".into()))?;
        self.take(len)
    }
}
