// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::num::NonZero;
use std::sync::{Arc, LazyLock, Mutex};

use nm::{Event, Magnitude};
use tracing::{Level, event};

use crate::Page;
use crate::constants::{DEFAULT_PAGE_SIZE, ERR_POISONED_LOCK};

/// A thread-safe source of [`Page`]s that reclaims them once nobody pins them any more.
///
/// The pool keeps two free-lists: one for pages of the standard size and one for oversized
/// pages, which are rented for requests that do not fit a standard page. Oversized capacity is
/// rounded up to the next power of two so that recycled oversized pages have a good chance of
/// fitting the next oversized request without being reallocated.
///
/// Renting never blocks and never fails - if the matching free-list is empty a new page is
/// allocated.
///
/// Clones of a pool act as shared handles and share the same free-lists.
///
/// # Example
///
/// ```
/// use std::num::NonZero;
///
/// use arcbuf::{ArcBufferWriter, PagePool};
///
/// let pool = PagePool::with_page_size(NonZero::new(1024).unwrap());
/// let mut writer = ArcBufferWriter::with_pool(pool.clone());
///
/// writer.write(&[7; 3000])?;
/// assert_eq!(writer.page_count()?, 3);
///
/// writer.dispose();
/// assert_eq!(pool.idle_pages(), 3);
/// # Ok::<(), arcbuf::Error>(())
/// ```
#[derive(Clone, Debug)]
pub struct PagePool {
    inner: Arc<PoolShared>,
}

impl PagePool {
    /// Creates a new pool with standard pages of [`DEFAULT_PAGE_SIZE`] bytes.
    ///
    /// Each call creates a separate pool with its own free-lists, so avoid creating multiple
    /// instances if you can reuse an existing one, such as [`PagePool::shared()`].
    #[must_use]
    #[expect(
        clippy::new_without_default,
        reason = "to avoid accidental confusion with the shared pool, which is a different instance"
    )]
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Creates a new pool whose standard pages hold `page_size` bytes.
    #[must_use]
    pub fn with_page_size(page_size: NonZero<usize>) -> Self {
        Self {
            inner: Arc::new(PoolShared {
                page_size: page_size.get(),
                standard: Mutex::new(Vec::new()),
                oversized: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The process-wide pool used by writers that are not given a pool of their own.
    ///
    /// It is created on first use and lives until the process exits.
    #[must_use]
    pub fn shared() -> &'static Self {
        static SHARED: LazyLock<PagePool> = LazyLock::new(PagePool::new);
        &SHARED
    }

    /// Capacity of a standard page.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.inner.page_size
    }

    /// Number of standard pages waiting in the pool.
    #[must_use]
    pub fn idle_pages(&self) -> usize {
        self.inner.standard.lock().expect(ERR_POISONED_LOCK).len()
    }

    /// Number of oversized pages waiting in the pool.
    #[must_use]
    pub fn idle_oversized_pages(&self) -> usize {
        self.inner.oversized.lock().expect(ERR_POISONED_LOCK).len()
    }

    /// Rents a page that can hold at least `size_hint` bytes (a standard page if `size_hint` fits).
    ///
    /// The page is returned unpinned, with a reference count of zero.
    pub(crate) fn rent(&self, size_hint: usize) -> Arc<Page> {
        RENT_REQUESTED_SIZE.with(|e| e.observe(size_hint));

        if size_hint <= self.inner.page_size {
            let recycled = self.inner.standard.lock().expect(ERR_POISONED_LOCK).pop();
            return recycled.unwrap_or_else(|| self.allocate(self.inner.page_size));
        }

        let capacity = size_hint.checked_next_power_of_two().unwrap_or(size_hint);
        let recycled = self.inner.oversized.lock().expect(ERR_POISONED_LOCK).pop();

        match recycled {
            Some(page) if page.capacity() == capacity => page,
            Some(mut page) => {
                // A page we popped may still be referenced by stale capabilities, in which case
                // it cannot be resized in place and we let it go.
                if let Some(exclusive) = Arc::get_mut(&mut page) {
                    event!(Level::TRACE, message = "resizing oversized page", from = exclusive.capacity(), to = capacity);
                    exclusive.resize(capacity);
                    page
                } else {
                    self.allocate(capacity)
                }
            }
            None => self.allocate(capacity),
        }
    }

    fn allocate(&self, capacity: usize) -> Arc<Page> {
        PAGE_ALLOCATED_SIZE.with(|e| e.observe(capacity));
        event!(Level::DEBUG, message = "allocating page", capacity);

        Arc::new(Page::new(capacity, Arc::downgrade(&self.inner)))
    }
}

#[derive(Debug)]
pub(crate) struct PoolShared {
    page_size: usize,

    // Pages hold only a weak reference back to the pool, so dropping every pool handle frees the
    // idle pages and makes pages still in use free themselves when their last pin is released.
    standard: Mutex<Vec<Arc<Page>>>,
    oversized: Mutex<Vec<Arc<Page>>>,
}

impl PoolShared {
    /// Takes back a page whose last pin was just released.
    pub(crate) fn give_back(&self, page: Arc<Page>) {
        let ref_count = page.ref_count();
        if ref_count != 0 {
            event!(Level::ERROR, message = "refusing to pool a page that is still pinned", ref_count);
            return;
        }

        PAGE_RETURNED_SIZE.with(|e| e.observe(page.capacity()));

        if page.capacity() == self.page_size {
            self.standard.lock().expect(ERR_POISONED_LOCK).push(page);
        } else {
            self.oversized.lock().expect(ERR_POISONED_LOCK).push(page);
        }
    }
}

// Histogram buckets for page capacities. Oversized pages are powers of two.
const PAGE_SIZE_BUCKETS: &[Magnitude] = &[
    1024, 4096, 16_384, 32_768, 65_536, 131_072, 262_144, 524_288, 1_048_576, 4_194_304,
];

const RENT_SIZE_BUCKETS: &[Magnitude] = &[
    0, 256, 1024, 4096, 8192, 16_384, 32_768, 65_536, 262_144, 1_048_576,
];

thread_local! {
    static RENT_REQUESTED_SIZE: Event = Event::builder()
        .name("arcbuf_pool_rent_requested_size")
        .histogram(RENT_SIZE_BUCKETS)
        .build();

    static PAGE_ALLOCATED_SIZE: Event = Event::builder()
        .name("arcbuf_pool_page_allocated_size")
        .histogram(PAGE_SIZE_BUCKETS)
        .build();

    static PAGE_RETURNED_SIZE: Event = Event::builder()
        .name("arcbuf_pool_page_returned_size")
        .histogram(PAGE_SIZE_BUCKETS)
        .build();
}
