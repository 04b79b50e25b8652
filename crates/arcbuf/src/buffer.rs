// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::io::IoSlice;
use std::ops::{Bound, RangeBounds};
use std::sync::Arc;

use nm::{Event, Magnitude};
use smallvec::SmallVec;
use tracing::{Level, event};

use crate::codec::WriterOutput;
use crate::constants::MAX_INLINE_SEGMENTS;
use crate::segments::spanned_pages;
use crate::{
    ArcBufferRead, ArraySegments, Error, OwnedSegments, Page, PageSegments, Result, Segments, Staleness,
};

/// A zero-copy capability over a range of bytes written to an [`ArcBufferWriter`][1].
///
/// The range may span several pages of the writer's chain. While the buffer is alive it keeps
/// every page it spans pinned, so the bytes stay valid even after the writer consumes them, moves
/// on or is dropped. Committed bytes never change, so the buffer's content is fixed from the
/// moment it is taken.
///
/// A buffer is created via [`ArcBufferWriter::peek_slice()`][2] or
/// [`ArcBufferWriter::consume_slice()`][3] and can be narrowed with [`slice()`][Self::slice].
///
/// # Releasing
///
/// The pin is released when the buffer is dropped or explicitly via [`unpin()`][Self::unpin].
/// Releasing twice is a no-op. Any other operation on a released buffer fails with
/// [`Error::StaleCapability`].
///
/// # Thread safety
///
/// Buffers may be sent to and used from other threads. Each buffer holds its own pin, so
/// consumers on different threads do not need to coordinate with each other or with the writer.
///
/// # Example
///
/// ```
/// use arcbuf::ArcBufferWriter;
///
/// let mut writer = ArcBufferWriter::new();
/// writer.write(b"Hello, world")?;
///
/// let hello = writer.consume_slice(5)?;
/// assert_eq!(hello.to_vec()?, b"Hello");
///
/// let ell = hello.slice(1..4)?;
/// assert_eq!(ell.to_vec()?, b"ell");
/// # Ok::<(), arcbuf::Error>(())
/// ```
///
/// [1]: crate::ArcBufferWriter
/// [2]: crate::ArcBufferWriter::peek_slice
/// [3]: crate::ArcBufferWriter::consume_slice
pub struct ArcBuffer {
    first: Arc<Page>,

    /// The version of `first` this capability was issued for. `None` once released.
    token: Option<u64>,

    offset: usize,
    len: usize,

    /// Whether this buffer holds pins that it must release.
    pinned: bool,
}

impl ArcBuffer {
    /// Creates a buffer that pins every page in the range.
    pub(crate) fn pinned(first: Arc<Page>, token: u64, offset: usize, len: usize) -> Result<Self> {
        first.check_validity(token)?;

        let mut buffer = Self::unpinned(first, token, offset, len)?;
        buffer.pin_pages()?;
        buffer.pinned = true;

        BUFFER_SPANNED_PAGES.with(|e| e.observe(buffer.page_segments_unchecked().count()));

        Ok(buffer)
    }

    /// Creates a buffer without taking any pins, anchored so that a non-empty range starts
    /// within a page that contributes data.
    fn unpinned(first: Arc<Page>, token: u64, offset: usize, len: usize) -> Result<Self> {
        let (first, token, offset) = if len == 0 || offset < first.len() {
            (first, token, offset)
        } else {
            let mut page = first.next().ok_or(Error::StaleCapability(Staleness::ChainBroken))?;
            let mut offset = offset - first.len();
            while offset >= page.len() {
                offset -= page.len();
                page = page.next().ok_or(Error::StaleCapability(Staleness::ChainBroken))?;
            }

            let token = page.version();
            (page, token, offset)
        };

        Ok(Self {
            first,
            token: Some(token),
            offset,
            len,
            pinned: false,
        })
    }

    /// Number of bytes covered by the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer covers zero bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the buffer has been released via [`unpin()`][Self::unpin].
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.token.is_none()
    }

    /// Checks that the buffer still refers to the data it was created for.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleCapability`] if the buffer was released or its first page was
    /// recycled since the buffer was created.
    pub fn validate(&self) -> Result<()> {
        let token = self.token.ok_or(Error::StaleCapability(Staleness::Released))?;

        if let Err(error) = self.first.check_validity(token) {
            event!(Level::DEBUG, message = "stale buffer capability used", %error);
            return Err(error);
        }

        Ok(())
    }

    /// Creates another pinned buffer over the same bytes.
    ///
    /// The new buffer holds its own pins and is released independently of this one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleCapability`] if this buffer is no longer valid.
    pub fn pin(&self) -> Result<Self> {
        let token = self.token.ok_or(Error::StaleCapability(Staleness::Released))?;
        Self::pinned(Arc::clone(&self.first), token, self.offset, self.len)
    }

    /// Releases the pins held by this buffer.
    ///
    /// After this, the pages the buffer spans may return to the pool once nobody else pins them.
    /// Calling this on a buffer that was already released does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleCapability`] if a page was recycled while this buffer still claimed a
    /// pin on it, which means pins were released more often than they were taken. The buffer is
    /// considered released either way.
    pub fn unpin(&mut self) -> Result<()> {
        let Some(token) = self.token.take() else {
            return Ok(());
        };

        if !self.pinned {
            return Ok(());
        }
        self.pinned = false;

        // Collect first - releasing a page may recycle it, which unlinks its successor.
        let pages: SmallVec<[Arc<Page>; MAX_INLINE_SEGMENTS]> = spanned_pages(&self.first, self.offset, self.len).collect();

        let mut result = Ok(());
        for (index, page) in pages.iter().enumerate() {
            let page_token = if index == 0 { token } else { page.version() };

            if let Err(error) = page.unpin(page_token) {
                result = result.and(Err(error));
            }
        }

        result
    }

    /// Returns a pinned buffer over a sub-range of this buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Range`] if the range is outside the buffer and
    /// [`Error::StaleCapability`] if this buffer is no longer valid.
    pub fn slice<R>(&self, range: R) -> Result<Self>
    where
        R: RangeBounds<usize>,
    {
        let mut slice = self.slice_inner(range)?;
        slice.pin_pages()?;
        slice.pinned = true;
        Ok(slice)
    }

    /// Returns a buffer over a sub-range of this buffer without pinning its pages.
    ///
    /// This avoids touching reference counts for short-lived views.
    ///
    /// # Errors
    ///
    /// As for [`slice()`][Self::slice].
    ///
    /// # Safety
    ///
    /// The returned buffer does not keep its pages alive. The caller must ensure that it is not
    /// used after the last pin on the spanned pages (held by `self`, the writer or anybody else)
    /// is released. Misuse is detected on a best-effort basis via the version check only.
    pub unsafe fn slice_unpinned<R>(&self, range: R) -> Result<Self>
    where
        R: RangeBounds<usize>,
    {
        self.slice_inner(range)
    }

    fn slice_inner<R>(&self, range: R) -> Result<Self>
    where
        R: RangeBounds<usize>,
    {
        self.validate()?;
        let token = self.token.ok_or(Error::StaleCapability(Staleness::Released))?;

        let start = match range.start_bound() {
            Bound::Included(&x) => x,
            Bound::Excluded(&x) => x.checked_add(1).ok_or_else(|| Error::range("slice start", usize::MAX, self.len))?,
            Bound::Unbounded => 0,
        };

        let end = match range.end_bound() {
            Bound::Included(&x) => x.checked_add(1).ok_or_else(|| Error::range("slice end", usize::MAX, self.len))?,
            Bound::Excluded(&x) => x,
            Bound::Unbounded => self.len,
        };

        if end > self.len {
            return Err(Error::range("slice end", end, self.len));
        }

        if start > end {
            return Err(Error::range("slice start", start, end));
        }

        Self::unpinned(Arc::clone(&self.first), token, self.offset + start, end - start)
    }

    /// Copies the bytes of the buffer into the start of `destination`.
    ///
    /// Returns the number of bytes copied, which is always [`len()`][Self::len].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Range`] if `destination` is shorter than the buffer and
    /// [`Error::StaleCapability`] if the buffer is no longer valid.
    pub fn copy_to_slice(&self, destination: &mut [u8]) -> Result<usize> {
        if destination.len() < self.len {
            return Err(Error::range("copy length", self.len, destination.len()));
        }

        let mut copied = 0;
        for segment in self.segments()? {
            destination[copied..copied + segment.len()].copy_from_slice(segment);
            copied += segment.len();
        }

        Ok(copied)
    }

    /// Appends the bytes of the buffer to an output, such as another
    /// [`ArcBufferWriter`][crate::ArcBufferWriter].
    ///
    /// Returns the number of bytes copied.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleCapability`] if the buffer is no longer valid, or any error of the output.
    pub fn copy_to_output<O>(&self, output: &mut O) -> Result<usize>
    where
        O: WriterOutput + ?Sized,
    {
        for segment in self.segments()? {
            output.write_all(segment)?;
        }

        Ok(self.len)
    }

    /// Copies the bytes of the buffer into a new vector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleCapability`] if the buffer is no longer valid.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut result = Vec::with_capacity(self.len);
        for segment in self.segments()? {
            result.extend_from_slice(segment);
        }

        Ok(result)
    }

    /// Copies the bytes of the buffer into a new [`bytes::Bytes`].
    ///
    /// A buffer that fits within a single page is copied straight from it. The result does not
    /// pin any page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleCapability`] if the buffer is no longer valid.
    #[cfg(feature = "bytes-compat")]
    pub fn to_bytes(&self) -> Result<bytes::Bytes> {
        let mut segments = self.segments()?;

        match (segments.next(), segments.next()) {
            (None, _) => Ok(bytes::Bytes::new()),
            (Some(only), None) => Ok(bytes::Bytes::copy_from_slice(only)),
            _ => Ok(bytes::Bytes::from(self.to_vec()?)),
        }
    }

    /// Iterates over the bytes as contiguous slices, one per spanned page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleCapability`] if the buffer is no longer valid.
    pub fn segments(&self) -> Result<Segments<'_>> {
        Ok(Segments::new(self.page_segments()?))
    }

    /// Iterates over the bytes as page-relative regions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleCapability`] if the buffer is no longer valid.
    pub fn page_segments(&self) -> Result<PageSegments<'_>> {
        self.validate()?;
        Ok(self.page_segments_unchecked())
    }

    /// Iterates over the bytes as page arrays with an offset and length into each.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleCapability`] if the buffer is no longer valid.
    pub fn array_segments(&self) -> Result<ArraySegments<'_>> {
        Ok(ArraySegments::new(self.page_segments()?))
    }

    /// Iterates over the bytes as independently pinned single-page buffers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleCapability`] if the buffer is no longer valid.
    pub fn owned_segments(&self) -> Result<OwnedSegments<'_>> {
        Ok(OwnedSegments::new(self.page_segments()?))
    }

    /// Returns the bytes as I/O slices for vectored writes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleCapability`] if the buffer is no longer valid.
    pub fn io_slices(&self) -> Result<SmallVec<[IoSlice<'_>; MAX_INLINE_SEGMENTS]>> {
        Ok(self.segments()?.map(IoSlice::new).collect())
    }

    /// Creates an adapter that implements [`std::io::Read`] and [`std::io::BufRead`] over the bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleCapability`] if the buffer is no longer valid.
    pub fn reader(&self) -> Result<ArcBufferRead<'_>> {
        Ok(ArcBufferRead::new(self.segments()?))
    }

    fn page_segments_unchecked(&self) -> PageSegments<'_> {
        // SAFETY: Pinned buffers keep every spanned page pinned and linked until `unpin()`, which
        // takes `&mut self` and so cannot happen while the iterator borrows us. Unpinned buffers
        // transfer this obligation to whoever created them via `slice_unpinned()`.
        unsafe { PageSegments::new(&self.first, self.offset, self.len) }
    }

    fn pin_pages(&self) -> Result<()> {
        let token = self.token.ok_or(Error::StaleCapability(Staleness::Released))?;

        let pages: SmallVec<[Arc<Page>; MAX_INLINE_SEGMENTS]> = spanned_pages(&self.first, self.offset, self.len).collect();

        for (index, page) in pages.iter().enumerate() {
            let page_token = if index == 0 { token } else { page.version() };

            if let Err(error) = page.pin(page_token) {
                // Roll back what we took so far.
                for (pinned_index, pinned) in pages.iter().take(index).enumerate() {
                    let pinned_token = if pinned_index == 0 { token } else { pinned.version() };
                    if let Err(rollback_error) = pinned.unpin(pinned_token) {
                        event!(Level::ERROR, message = "failed to roll back page pin", %rollback_error);
                    }
                }

                return Err(error);
            }
        }

        Ok(())
    }
}

impl Drop for ArcBuffer {
    fn drop(&mut self) {
        if let Err(error) = self.unpin() {
            event!(Level::ERROR, message = "failed to release buffer pin", %error);
        }
    }
}

impl fmt::Debug for ArcBuffer {
    #[cfg_attr(test, mutants::skip)] // We have no API contract here.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArcBuffer")
            .field("first", &self.first)
            .field("token", &self.token)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("pinned", &self.pinned)
            .finish()
    }
}

const SPANNED_PAGES_BUCKETS: &[Magnitude] = &[0, 1, 2, 4, 8, 16, 32];

thread_local! {
    static BUFFER_SPANNED_PAGES: Event = Event::builder()
        .name("arcbuf_buffer_spanned_pages")
        .histogram(SPANNED_PAGES_BUCKETS)
        .build();
}
