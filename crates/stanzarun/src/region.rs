//! # Bulk Regions
//!
//! Shared byte buffers and the handles under which an engine exposes them
//! for remote pull/push transfers.
//!
//! A [`Buffer`] is a window onto reference-counted storage. Cloning a buffer,
//! or slicing it, never copies bytes; two buffers are the *same memory* when
//! they view the same storage at the same offset.

use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;

/// A shared, windowed byte buffer.
#[derive(Clone)]
pub struct Buffer {
    bytes: Arc<RwLock<Vec<u8>>>,
    offset: usize,
    len: usize,
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer").field("offset", &self.offset).field("len", &self.len).finish()
    }
}

impl Buffer {
    /// A zero-filled buffer of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self::from_vec(vec![0; len])
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        Self { bytes: Arc::new(RwLock::new(bytes)), offset: 0, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Runs `f` over the bytes in this window.
    pub fn with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let guard = self.bytes.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard[self.offset..self.offset + self.len])
    }

    /// Runs `f` over the bytes in this window, mutably.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut guard = self.bytes.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard[self.offset..self.offset + self.len])
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.with(<[u8]>::to_vec)
    }

    /// Overwrites the window with `src`, returning false when the lengths differ.
    pub fn copy_from_slice(&self, src: &[u8]) -> bool {
        if src.len() != self.len {
            return false;
        }
        self.with_mut(|dst| dst.copy_from_slice(src));
        true
    }

    /// A sub-window, or `None` when it would reach past this one.
    pub fn slice(&self, offset: usize, len: usize) -> Option<Buffer> {
        let end = offset.checked_add(len)?;
        if end > self.len {
            return None;
        }
        Some(Buffer { bytes: self.bytes.clone(), offset: self.offset + offset, len })
    }

    /// Whether both windows start at the same byte of the same storage.
    pub fn same_memory(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes) && self.offset == other.offset
    }
}

/// What a remote peer may do with an exposed region.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BulkMode {
    /// Remote peers may pull from the region.
    ReadOnly = 1,
    /// Remote peers may push into the region.
    WriteOnly = 2,
    ReadWrite = 3,
}

impl BulkMode {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            1 => Some(BulkMode::ReadOnly),
            2 => Some(BulkMode::WriteOnly),
            3 => Some(BulkMode::ReadWrite),
            _ => None,
        }
    }

    pub fn readable(self) -> bool {
        matches!(self, BulkMode::ReadOnly | BulkMode::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, BulkMode::WriteOnly | BulkMode::ReadWrite)
    }
}

/// Names an exposed region on its owning engine.
///
/// Serialized as `[id:8][len:8][mode:1]`, integers in native byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionHandle {
    pub id: u64,
    pub len: u64,
    pub mode: BulkMode,
}

impl RegionHandle {
    pub const ENCODED_LEN: usize = 17;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        out.extend_from_slice(&self.id.to_ne_bytes());
        out.extend_from_slice(&self.len.to_ne_bytes());
        out.push(self.mode as u8);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return None;
        }
        let id = u64::from_ne_bytes(bytes[0..8].try_into().ok()?);
        let len = u64::from_ne_bytes(bytes[8..16].try_into().ok()?);
        let mode = BulkMode::from_u8(bytes[16])?;
        Some(Self { id, len, mode })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_share_storage() {
        let buf = Buffer::from_vec((0u8..16).collect());
        let tail = buf.slice(8, 8).unwrap();
        tail.with_mut(|b| b[0] = 0xAA);
        assert_eq!(buf.to_vec()[8], 0xAA);
        assert!(tail.same_memory(&buf.slice(8, 4).unwrap()));
        assert!(!tail.same_memory(&buf));
        assert!(buf.slice(10, 7).is_none());
    }

    #[test]
    fn copies_require_matching_length() {
        let buf = Buffer::new(4);
        assert!(!buf.copy_from_slice(&[1, 2, 3]));
        assert!(buf.copy_from_slice(&[1, 2, 3, 4]));
        assert_eq!(buf.to_vec(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn region_handle_bytes() {
        let handle = RegionHandle { id: 7, len: 128, mode: BulkMode::ReadWrite };
        let bytes = handle.to_bytes();
        assert_eq!(bytes.len(), RegionHandle::ENCODED_LEN);
        assert_eq!(&bytes[0..8], &7u64.to_ne_bytes());
        assert_eq!(RegionHandle::from_bytes(&bytes), Some(handle));
        assert_eq!(RegionHandle::from_bytes(&bytes[..16]), None);
    }
}
