//! File handle table: small integer handles mapped to the content snapshot
//! taken at open time.

use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

/// Hands out small ids, reusing released ones oldest-first before minting new
/// ones.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: u64,
    recycled: VecDeque<u64>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> u64 {
        if let Some(id) = self.recycled.pop_front() {
            return id;
        }
        let id = self.next;
        self.next += 1;
        id
    }

    pub fn free(&mut self, id: u64) {
        self.recycled.push_back(id);
    }
}

#[derive(Debug, Default)]
struct Handles {
    ids: IdAllocator,
    open: HashMap<u64, Bytes>,
}

/// Open files. Buffers are immutable once stored, so readers only hold the
/// lock long enough to clone the `Bytes` handle.
#[derive(Debug, Default)]
pub struct HandleTable {
    inner: Mutex<Handles>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, data: Bytes) -> u64 {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let fh = inner.ids.allocate();
        inner.open.insert(fh, data);
        fh
    }

    pub fn get(&self, fh: u64) -> Option<Bytes> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.open.get(&fh).cloned()
    }

    /// Drops the buffer and recycles `fh`. Unknown handles are left alone.
    pub fn remove(&self, fh: u64) -> Option<Bytes> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let data = inner.open.remove(&fh)?;
        inner.ids.free(fh);
        Some(data)
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .open
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
