// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::mem;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{Level, event};

use crate::constants::MAX_INLINE_SEGMENTS;
use crate::{ArcBuffer, Error, Page, PagePool, PageSegments, Result, Segments};

/// An append-only byte buffer built from a chain of pooled pages, with an independent consume
/// cursor and zero-copy access to what has been written.
///
/// Bytes are appended with [`write()`][Self::write] or by filling the regions returned from
/// [`writable_region()`][Self::writable_region] and committing them via
/// [`advance_writer()`][Self::advance_writer]. When the current page is full, a new page is rented
/// from the [`PagePool`] and linked to the end of the chain.
///
/// Unconsumed data can be read without copying by taking an [`ArcBuffer`] over it, either leaving
/// it in place ([`peek_slice()`][Self::peek_slice]) or consuming it
/// ([`consume_slice()`][Self::consume_slice]). Once the consume cursor moves past a page the
/// writer releases its pin on it. The page returns to the pool as soon as every buffer spanning it
/// has been released too.
///
/// # Lifecycle
///
/// [`reset()`][Self::reset] releases everything and starts over with a fresh page.
/// [`dispose()`][Self::dispose] releases everything for good; any later call fails with
/// [`Error::Disposed`]. Dropping the writer disposes it.
///
/// # Thread safety
///
/// The writer follows a single-writer discipline, which `&mut self` enforces. Buffers taken from it
/// are independent and can be used from any thread.
///
/// # Example
///
/// ```
/// use arcbuf::ArcBufferWriter;
///
/// let mut writer = ArcBufferWriter::new();
/// writer.write(b"header:")?;
/// writer.write(b"payload")?;
///
/// let header = writer.consume_slice(7)?;
/// assert_eq!(header.to_vec()?, b"header:");
/// assert_eq!(writer.len()?, 7);
///
/// let mut payload = [0; 7];
/// writer.consume_into(&mut payload)?;
/// assert_eq!(&payload, b"payload");
/// assert!(writer.is_empty()?);
/// # Ok::<(), arcbuf::Error>(())
/// ```
#[derive(Debug)]
pub struct ArcBufferWriter {
    pool: PagePool,

    /// `None` once disposed.
    chain: Option<Chain>,
}

#[derive(Debug)]
struct Chain {
    /// Oldest page that still holds unconsumed data.
    read_page: Arc<Page>,

    /// Page that receives appended bytes. Pages between this and `tail` are rented but unused.
    write_page: Arc<Page>,

    /// Last page in the chain.
    tail: Arc<Page>,

    /// Offset into `read_page` that has already been consumed.
    read_index: usize,

    /// Bytes committed since the start of `read_page`.
    total_len: usize,
}

impl ArcBufferWriter {
    /// Creates a writer that rents pages from [`PagePool::shared()`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_pool(PagePool::shared().clone())
    }

    /// Creates a writer that rents pages from the given pool.
    #[must_use]
    pub fn with_pool(pool: PagePool) -> Self {
        let chain = Chain::start(&pool);
        Self { pool, chain: Some(chain) }
    }

    /// The pool this writer rents pages from.
    #[must_use]
    pub fn pool(&self) -> &PagePool {
        &self.pool
    }

    /// Number of bytes written but not yet consumed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if the writer has been disposed.
    pub fn len(&self) -> Result<usize> {
        Ok(self.chain()?.len())
    }

    /// Whether there are no unconsumed bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if the writer has been disposed.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of pages in the chain, from the oldest page with unconsumed data to the last rented page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if the writer has been disposed.
    pub fn page_count(&self) -> Result<usize> {
        let chain = self.chain()?;

        let mut count = 1;
        let mut page = Arc::clone(&chain.read_page);
        while let Some(next) = page.next() {
            count += 1;
            page = next;
        }

        Ok(count)
    }

    /// Appends bytes, renting as many new pages as needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if the writer has been disposed.
    pub fn write(&mut self, mut bytes: &[u8]) -> Result<()> {
        let chain = self.chain.as_mut().ok_or(Error::Disposed)?;

        while !bytes.is_empty() {
            let region = chain.writable_region(&self.pool, 0);
            let count = region.len().min(bytes.len());

            region[..count].copy_from_slice(&bytes[..count]);
            chain.write_page.advance(count);
            chain.total_len += count;

            bytes = &bytes[count..];
        }

        Ok(())
    }

    /// Returns a contiguous writable region of at least `size_hint` bytes (at least one byte if
    /// `size_hint` is zero).
    ///
    /// If the current page lacks room, the writer moves on to a page that has it, renting one if
    /// needed. Bytes written to the region become part of the buffer once committed via
    /// [`advance_writer()`][Self::advance_writer].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if the writer has been disposed.
    pub fn writable_region(&mut self, size_hint: usize) -> Result<&mut [u8]> {
        let chain = self.chain.as_mut().ok_or(Error::Disposed)?;
        Ok(chain.writable_region(&self.pool, size_hint))
    }

    /// Returns up to `max_regions` writable regions for a vectored receive.
    ///
    /// If the current page has less than half a standard page of room left, it is left as-is and
    /// the regions start on the next page. Pages are rented until `max_regions` regions are
    /// available. Data received into the regions is committed in order via
    /// [`advance_writer()`][Self::advance_writer].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if the writer has been disposed.
    pub fn writable_regions(&mut self, max_regions: usize) -> Result<SmallVec<[&mut [u8]; MAX_INLINE_SEGMENTS]>> {
        let chain = self.chain.as_mut().ok_or(Error::Disposed)?;

        let mut regions = SmallVec::new();
        if max_regions == 0 {
            return Ok(regions);
        }

        if chain.write_page.write_capacity() < self.pool.page_size() / 2 {
            chain.advance_write_page(&self.pool, 0);
        }

        let mut page = Arc::clone(&chain.write_page);
        loop {
            if page.write_capacity() > 0 {
                // SAFETY: We are the single writer of every page in the chain and `&mut self`
                // prevents any other unfilled region from being alive. Each page is visited once,
                // so the regions are disjoint. The chain keeps the pages pinned for as long as
                // `self` is borrowed.
                regions.push(unsafe { page.unfilled() });
            }

            if regions.len() == max_regions {
                break;
            }

            page = match page.next() {
                Some(next) => next,
                None => chain.append_page(&self.pool, 0),
            };
        }

        Ok(regions)
    }

    /// Commits `count` bytes written into the regions returned by
    /// [`writable_region()`][Self::writable_region] or [`writable_regions()`][Self::writable_regions].
    ///
    /// The bytes are committed in chain order, starting at the current write position and
    /// continuing on following pages as needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Range`] if `count` exceeds the writable space rented so far, and
    /// [`Error::Disposed`] if the writer has been disposed.
    pub fn advance_writer(&mut self, count: usize) -> Result<()> {
        let chain = self.chain.as_mut().ok_or(Error::Disposed)?;
        chain.advance_writer(count)
    }

    /// Returns a pinned buffer over the first `count` unconsumed bytes, without consuming them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Range`] if fewer than `count` bytes are unconsumed, and
    /// [`Error::Disposed`] if the writer has been disposed.
    pub fn peek_slice(&self, count: usize) -> Result<ArcBuffer> {
        let chain = self.chain()?;

        let len = chain.len();
        if count > len {
            return Err(Error::range("slice length", count, len));
        }

        ArcBuffer::pinned(
            Arc::clone(&chain.read_page),
            chain.read_page.version(),
            chain.read_index,
            count,
        )
    }

    /// Returns a pinned buffer over the first `count` unconsumed bytes and consumes them.
    ///
    /// # Errors
    ///
    /// As for [`peek_slice()`][Self::peek_slice].
    pub fn consume_slice(&mut self, count: usize) -> Result<ArcBuffer> {
        let slice = self.peek_slice(count)?;
        self.advance_reader(count)?;
        Ok(slice)
    }

    /// Consumes `count` bytes, releasing every page the consume cursor moves past.
    ///
    /// The page currently receiving writes is never released, even when fully consumed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Range`] if fewer than `count` bytes are unconsumed, and
    /// [`Error::Disposed`] if the writer has been disposed.
    pub fn advance_reader(&mut self, count: usize) -> Result<()> {
        let chain = self.chain.as_mut().ok_or(Error::Disposed)?;
        chain.advance_reader(count)
    }

    /// Discards `count` unconsumed bytes. The same as [`advance_reader()`][Self::advance_reader].
    ///
    /// # Errors
    ///
    /// As for [`advance_reader()`][Self::advance_reader].
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    pub fn skip(&mut self, count: usize) -> Result<()> {
        self.advance_reader(count)
    }

    /// Copies unconsumed bytes into `destination` without consuming them.
    ///
    /// Returns the number of bytes copied, which is less than the destination length if fewer
    /// bytes are available.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if the writer has been disposed.
    pub fn peek_into(&self, destination: &mut [u8]) -> Result<usize> {
        let mut copied = 0;

        for segment in self.unconsumed_segments()? {
            let count = segment.len().min(destination.len() - copied);
            destination[copied..copied + count].copy_from_slice(&segment[..count]);
            copied += count;

            if copied == destination.len() {
                break;
            }
        }

        Ok(copied)
    }

    /// Returns the first `scratch.len()` unconsumed bytes (or fewer, if fewer are available).
    ///
    /// If the bytes are contiguous they are returned in place, otherwise they are copied into
    /// `scratch` and that is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if the writer has been disposed.
    pub fn peek<'s>(&'s self, scratch: &'s mut [u8]) -> Result<&'s [u8]> {
        if let Some(first) = self.unconsumed_segments()?.next()
            && first.len() >= scratch.len()
        {
            return Ok(&first[..scratch.len()]);
        }

        let copied = self.peek_into(scratch)?;
        Ok(&scratch[..copied])
    }

    /// Copies `destination.len()` unconsumed bytes into `destination` and consumes them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Truncated`] without consuming anything if fewer bytes are available, and
    /// [`Error::Disposed`] if the writer has been disposed.
    pub fn consume_into(&mut self, destination: &mut [u8]) -> Result<()> {
        let copied = self.peek_into(destination)?;
        if copied < destination.len() {
            return Err(Error::truncated(destination.len() - copied));
        }

        self.advance_reader(copied)
    }

    /// Iterates over the unconsumed bytes as contiguous slices, without pinning or consuming them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if the writer has been disposed.
    pub fn unconsumed_segments(&self) -> Result<Segments<'_>> {
        let chain = self.chain()?;

        // SAFETY: The writer pins every page from `read_page` on. Releasing any of them requires
        // `&mut self`, which cannot happen while the iterator borrows us.
        let segments = unsafe { PageSegments::new(&chain.read_page, chain.read_index, chain.len()) };
        Ok(Segments::new(segments))
    }

    /// Releases every page and starts over with a fresh one.
    ///
    /// Buffers taken earlier remain valid - they hold their own pins.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if the writer has been disposed.
    pub fn reset(&mut self) -> Result<()> {
        let chain = self.chain.take().ok_or(Error::Disposed)?;
        chain.release();

        self.chain = Some(Chain::start(&self.pool));

        event!(Level::TRACE, message = "buffer writer reset");
        Ok(())
    }

    /// Releases every page. Any later operation fails with [`Error::Disposed`].
    ///
    /// Calling this more than once does nothing.
    pub fn dispose(&mut self) {
        if let Some(chain) = self.chain.take() {
            chain.release();
            event!(Level::TRACE, message = "buffer writer disposed");
        }
    }

    /// Whether [`dispose()`][Self::dispose] has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.chain.is_none()
    }

    /// The writable space left on the current page, without renting anything.
    pub(crate) fn current_region(&mut self) -> Result<&mut [u8]> {
        let chain = self.chain.as_mut().ok_or(Error::Disposed)?;

        // SAFETY: We are the single writer and `&mut self` prevents any other unfilled region
        // from being alive. The chain keeps the page pinned while `self` is borrowed.
        Ok(unsafe { chain.write_page.unfilled() })
    }

    fn chain(&self) -> Result<&Chain> {
        self.chain.as_ref().ok_or(Error::Disposed)
    }
}

impl Default for ArcBufferWriter {
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ArcBufferWriter {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Chain {
    fn start(pool: &PagePool) -> Self {
        let page = pool.rent(0);
        page.pin_rented();

        Self {
            read_page: Arc::clone(&page),
            write_page: Arc::clone(&page),
            tail: page,
            read_index: 0,
            total_len: 0,
        }
    }

    fn len(&self) -> usize {
        self.total_len - self.read_index
    }

    fn writable_region<'a>(&'a mut self, pool: &PagePool, size_hint: usize) -> &'a mut [u8] {
        if self.write_page.write_capacity() < size_hint.max(1) {
            self.advance_write_page(pool, size_hint);
        }

        // SAFETY: We are the single writer and `&mut self` prevents any other unfilled region
        // from being alive. The chain keeps the page pinned while `self` is borrowed.
        unsafe { self.write_page.unfilled() }
    }

    /// Moves the write position to a page with room for `size_hint` bytes (at least one byte),
    /// using pages rented earlier if they fit and renting a new one otherwise.
    ///
    /// Skipped pages keep whatever they hold and are never written again.
    fn advance_write_page(&mut self, pool: &PagePool, size_hint: usize) {
        while let Some(next) = self.write_page.next() {
            self.write_page = next;
            if self.write_page.write_capacity() >= size_hint.max(1) {
                return;
            }
        }

        self.write_page = self.append_page(pool, size_hint);
    }

    /// Rents a page, pins it on behalf of the writer and links it to the end of the chain.
    fn append_page(&mut self, pool: &PagePool, size_hint: usize) -> Arc<Page> {
        let page = pool.rent(size_hint);
        page.pin_rented();

        self.tail.set_next(Arc::clone(&page));
        self.tail = Arc::clone(&page);
        page
    }

    fn advance_writer(&mut self, count: usize) -> Result<()> {
        let mut available = 0;
        let mut page = Some(Arc::clone(&self.write_page));
        while available < count {
            let Some(current) = page else { break };
            available += current.write_capacity();
            page = current.next();
        }

        if available < count {
            return Err(Error::range("commit length", count, available));
        }

        self.total_len += count;

        let mut remaining = count;
        loop {
            let committed = remaining.min(self.write_page.write_capacity());
            self.write_page.advance(committed);
            remaining -= committed;

            if remaining == 0 {
                break;
            }

            // There is a next page - we checked there is enough room above.
            let Some(next) = self.write_page.next() else { break };
            self.write_page = next;
        }

        Ok(())
    }

    fn advance_reader(&mut self, count: usize) -> Result<()> {
        let len = self.len();
        if count > len {
            return Err(Error::range("consume length", count, len));
        }

        self.read_index += count;

        while self.read_index >= self.read_page.len() && !Arc::ptr_eq(&self.read_page, &self.write_page) {
            let Some(next) = self.read_page.next() else { break };

            let page_len = self.read_page.len();
            self.read_index -= page_len;
            self.total_len -= page_len;

            let previous = mem::replace(&mut self.read_page, next);
            previous.unpin(previous.version())?;
        }

        Ok(())
    }

    /// Releases the writer's pin on every page of the chain.
    fn release(self) {
        let mut page = Some(self.read_page);
        while let Some(current) = page {
            // Take the link first - releasing may recycle the page, which unlinks it.
            page = current.next();

            if let Err(error) = current.unpin(current.version()) {
                event!(Level::ERROR, message = "failed to release page held by buffer writer", %error);
            }
        }
    }
}
