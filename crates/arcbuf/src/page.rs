// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{self, AtomicU64, AtomicUsize};
use std::sync::{Arc, Mutex, Weak};

use tracing::{Level, event};

use crate::constants::ERR_POISONED_LOCK;
use crate::pool::PoolShared;
use crate::{Error, Result, Staleness};

/// A fixed-capacity block of bytes, the unit of pooling.
///
/// Pages are handed out by a [`PagePool`][crate::PagePool] to an
/// [`ArcBufferWriter`][crate::ArcBufferWriter], which appends data to them and links them into a
/// chain. Every party that needs a page to stay alive pins it, raising its reference count. When
/// the count drops back to zero the page is reset, its version is incremented and it goes back to
/// the pool, where an unrelated writer may rent it again.
///
/// The version acts as a capability token: anyone holding on to a page must present the version
/// they were given and any operation fails with [`Error::StaleCapability`] if the page has been
/// recycled since.
///
/// This type is only exposed for diagnostics. All data access goes through
/// [`ArcBuffer`][crate::ArcBuffer] and [`ArcBufferWriter`][crate::ArcBufferWriter].
pub struct Page {
    /// Bytes `..len` are committed and immutable. Bytes `len..` are owned by the single writer
    /// that holds the page.
    memory: Box<[UnsafeCell<u8>]>,

    len: AtomicUsize,

    /// Whoever decrements this to zero is responsible for returning the page to the pool.
    ref_count: AtomicUsize,

    version: AtomicU64,

    /// Set at most once per rental by the writer that owns the chain.
    next: Mutex<Option<Arc<Self>>>,

    /// The pool to return to. If the pool is gone, the page is simply freed.
    pool: Weak<PoolShared>,
}

// SAFETY: Byte access is partitioned by `len`. Committed bytes below `len` are never written
// again until the page is recycled, which cannot happen while anyone holds a pin. Bytes at or
// above `len` are only touched by the single writer that owns the chain, via `&mut self` on the
// writer. All metadata is either atomic or behind a mutex.
unsafe impl Sync for Page {}

impl Page {
    pub(crate) fn new(capacity: usize, pool: Weak<PoolShared>) -> Self {
        Self {
            memory: allocate(capacity),
            len: AtomicUsize::new(0),
            ref_count: AtomicUsize::new(0),
            version: AtomicU64::new(0),
            next: Mutex::new(None),
            pool,
        }
    }

    /// Total number of bytes the page can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.memory.len()
    }

    /// Number of bytes committed to the page.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(atomic::Ordering::Acquire)
    }

    /// Whether no bytes have been committed to the page.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The current version of the page, incremented every time it returns to the pool.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(atomic::Ordering::Acquire)
    }

    /// Number of outstanding pins.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.ref_count.load(atomic::Ordering::Acquire)
    }

    pub(crate) fn write_capacity(&self) -> usize {
        self.capacity() - self.len()
    }

    pub(crate) fn next(&self) -> Option<Arc<Self>> {
        self.next.lock().expect(ERR_POISONED_LOCK).clone()
    }

    pub(crate) fn set_next(self: &Arc<Self>, next: Arc<Self>) {
        debug_assert!(!Arc::ptr_eq(self, &next), "a page cannot follow itself");

        let mut slot = self.next.lock().expect(ERR_POISONED_LOCK);
        debug_assert!(slot.is_none(), "the next page can only be set once");
        *slot = Some(next);
    }

    /// Fails if the token does not match the current version, or if nobody holds a pin.
    ///
    /// Both checks are needed: between the last unpin and the version bump during recycle, the
    /// version still matches but the reference count is already zero.
    pub(crate) fn check_validity(&self, token: u64) -> Result<()> {
        let current = self.version();
        if current != token {
            return Err(Error::StaleCapability(Staleness::VersionMismatch { token, current }));
        }

        if self.ref_count() == 0 {
            return Err(Error::StaleCapability(Staleness::NotPinned));
        }

        Ok(())
    }

    /// Takes the first pin on a page just rented from the pool.
    pub(crate) fn pin_rented(&self) {
        debug_assert_eq!(self.ref_count(), 0);
        self.ref_count.fetch_add(1, atomic::Ordering::Relaxed);
    }

    pub(crate) fn pin(&self, token: u64) -> Result<()> {
        let current = self.version();
        if current != token {
            return Err(Error::StaleCapability(Staleness::VersionMismatch { token, current }));
        }

        // Relaxed because taking another pin is independent of any state. The caller already
        // holds a pin (or is the renting writer), so the page cannot concurrently recycle.
        self.ref_count.fetch_add(1, atomic::Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn unpin(self: &Arc<Self>, token: u64) -> Result<()> {
        self.check_validity(token)?;

        // Release because we are releasing our view of the committed bytes. Never goes below
        // zero, so a racing double release fails instead of returning the page twice.
        let Ok(previous) = self
            .ref_count
            .fetch_update(atomic::Ordering::Release, atomic::Ordering::Relaxed, |count| count.checked_sub(1))
        else {
            return Err(Error::StaleCapability(Staleness::NotPinned));
        };

        if previous == 1 {
            // Ensure that we have observed all writes into the page from other threads.
            atomic::fence(atomic::Ordering::Acquire);
            self.recycle();
        }

        Ok(())
    }

    /// Resets the page and hands it back to its pool.
    fn recycle(self: &Arc<Self>) {
        self.len.store(0, atomic::Ordering::Relaxed);
        drop(self.next.lock().expect(ERR_POISONED_LOCK).take());
        let version = self.version.fetch_add(1, atomic::Ordering::AcqRel) + 1;

        event!(Level::TRACE, message = "page recycled", capacity = self.capacity(), version);

        if let Some(pool) = self.pool.upgrade() {
            pool.give_back(Arc::clone(self));
        }
    }

    /// Replaces the memory of an idle page with a block of a different capacity.
    pub(crate) fn resize(&mut self, capacity: usize) {
        debug_assert_eq!(*self.ref_count.get_mut(), 0);

        self.memory = allocate(capacity);
        *self.len.get_mut() = 0;
    }

    /// Commits `count` bytes written into the unfilled part of the page.
    pub(crate) fn advance(&self, count: usize) {
        let len = self.len.load(atomic::Ordering::Relaxed) + count;
        debug_assert!(len <= self.capacity());

        // Release so that slices taken after this observe the bytes we wrote.
        self.len.store(len, atomic::Ordering::Release);
    }

    /// Committed bytes `offset..offset + len`.
    ///
    /// # Safety
    ///
    /// The range must lie within the committed bytes and the caller must hold a pin (and keep the
    /// page allocated) for as long as the returned slice lives.
    pub(crate) unsafe fn committed<'a>(&self, offset: usize, len: usize) -> &'a [u8] {
        debug_assert!(offset + len <= self.len());

        // SAFETY: The caller guarantees the range is committed, which makes it immutable and
        // in bounds. `UnsafeCell<u8>` has the same layout as `u8`.
        unsafe { std::slice::from_raw_parts(self.base().add(offset), len) }
    }

    /// The not yet committed tail of the page.
    ///
    /// # Safety
    ///
    /// The caller must be the single writer that holds the page, with no other unfilled slice of
    /// this page alive, and must keep the page pinned for as long as the returned slice lives.
    pub(crate) unsafe fn unfilled<'a>(&self) -> &'a mut [u8] {
        let len = self.len();

        // SAFETY: Bytes at or above `len` are only ever accessed by the single writer,
        // which the caller guarantees to be. The range is in bounds of the allocation.
        unsafe { std::slice::from_raw_parts_mut(self.base().add(len), self.capacity() - len) }
    }

    fn base(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.memory.as_ptr())
    }
}

impl fmt::Debug for Page {
    #[cfg_attr(test, mutants::skip)] // We have no API contract here.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("version", &self.version())
            .field("ref_count", &self.ref_count())
            .finish_non_exhaustive()
    }
}

fn allocate(capacity: usize) -> Box<[UnsafeCell<u8>]> {
    let memory = vec![0_u8; capacity].into_boxed_slice();

    // SAFETY: `UnsafeCell<u8>` is `repr(transparent)` over `u8`, so the slice layouts match and
    // ownership of the allocation moves into the new box.
    unsafe { Box::from_raw(Box::into_raw(memory) as *mut [UnsafeCell<u8>]) }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Page: Send, Sync);

    fn detached(capacity: usize) -> Arc<Page> {
        Arc::new(Page::new(capacity, Weak::new()))
    }

    #[test]
    fn new_page_is_idle() {
        let page = detached(64);

        assert_eq!(page.capacity(), 64);
        assert_eq!(page.len(), 0);
        assert!(page.is_empty());
        assert_eq!(page.version(), 0);
        assert_eq!(page.ref_count(), 0);
        assert_eq!(page.write_capacity(), 64);
        assert!(page.next().is_none());
    }

    #[test]
    fn write_then_read_committed() {
        let page = detached(8);
        page.pin(0).unwrap();

        // SAFETY: We are the only writer of this page.
        let unfilled = unsafe { page.unfilled() };
        unfilled[..3].copy_from_slice(b"abc");
        page.advance(3);

        assert_eq!(page.len(), 3);
        assert_eq!(page.write_capacity(), 5);

        // SAFETY: The range is committed and we hold a pin.
        assert_eq!(unsafe { page.committed(1, 2) }, b"bc");
    }

    #[test]
    fn last_unpin_recycles() {
        let page = detached(8);
        let next = detached(8);
        page.pin(0).unwrap();
        page.pin(0).unwrap();
        page.set_next(Arc::clone(&next));
        page.advance(4);

        page.unpin(0).unwrap();
        assert_eq!(page.version(), 0);
        assert_eq!(page.ref_count(), 1);
        assert_eq!(page.len(), 4);

        page.unpin(0).unwrap();
        assert_eq!(page.version(), 1);
        assert_eq!(page.ref_count(), 0);
        assert_eq!(page.len(), 0);
        assert!(page.next().is_none());
    }

    #[test]
    fn stale_token_is_rejected() {
        let page = detached(8);
        page.pin(0).unwrap();
        page.unpin(0).unwrap();

        assert!(matches!(
            page.pin(0),
            Err(Error::StaleCapability(Staleness::VersionMismatch { token: 0, current: 1 }))
        ));
        assert!(matches!(
            page.unpin(0),
            Err(Error::StaleCapability(Staleness::VersionMismatch { .. }))
        ));
        assert!(matches!(
            page.check_validity(0),
            Err(Error::StaleCapability(Staleness::VersionMismatch { .. }))
        ));
    }

    #[test]
    fn matching_token_without_pin_is_rejected() {
        let page = detached(8);

        assert!(matches!(page.check_validity(0), Err(Error::StaleCapability(Staleness::NotPinned))));
        assert!(matches!(page.unpin(0), Err(Error::StaleCapability(Staleness::NotPinned))));
        assert_eq!(page.ref_count(), 0);
        assert_eq!(page.version(), 0);
    }

    #[test]
    fn resize_replaces_memory() {
        let mut page = Page::new(8, Weak::new());
        page.advance(2);

        page.resize(32);

        assert_eq!(page.capacity(), 32);
        assert_eq!(page.len(), 0);
    }

    #[test]
    fn concurrent_unpins_recycle_exactly_once() {
        let page = detached(8);
        let pins = 64;
        for _ in 0..pins {
            page.pin(0).unwrap();
        }

        std::thread::scope(|scope| {
            for _ in 0..pins {
                let page = Arc::clone(&page);
                scope.spawn(move || page.unpin(0).unwrap());
            }
        });

        assert_eq!(page.ref_count(), 0);
        assert_eq!(page.version(), 1);
    }
}
