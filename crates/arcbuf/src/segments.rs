// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Iteration over the pages spanned by a byte range.
//!
//! All projections are built on [`PageSegments`], which walks the chain starting at a page and
//! offset for a number of bytes, yielding one region per page that contributes data.

use std::fmt;
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::{ArcBuffer, Page, Result};

/// Iterator over the page-relative regions of a byte range.
///
/// Created by [`ArcBuffer::page_segments()`] and used as the basis of every other projection.
#[derive(Clone)]
pub struct PageSegments<'a> {
    page: Option<Arc<Page>>,
    offset: usize,
    remaining: usize,

    // The source of the walk keeps every spanned page pinned for at least this long.
    _source: PhantomData<&'a ()>,
}

impl<'a> PageSegments<'a> {
    /// # Safety
    ///
    /// The caller must ensure that every page spanned by `offset..offset + len` starting at `first`
    /// stays pinned and linked for `'a`.
    pub(crate) unsafe fn new(first: &Arc<Page>, offset: usize, len: usize) -> Self {
        Self {
            page: (len > 0).then(|| Arc::clone(first)),
            offset,
            remaining: len,
            _source: PhantomData,
        }
    }

    /// Number of bytes not yet yielded.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl<'a> Iterator for PageSegments<'a> {
    type Item = PageSegment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.remaining > 0 {
            // A pinned range always has its pages linked. If not, we end the walk early rather
            // than read beyond the chain.
            let Some(page) = self.page.take() else {
                self.remaining = 0;
                return None;
            };

            let offset = self.offset;
            let len = self.remaining.min(page.len().saturating_sub(offset));

            self.offset = 0;
            self.remaining -= len;
            if self.remaining > 0 {
                self.page = page.next();
            }

            // Pages that contribute nothing (e.g. a full page the range starts at the end of) are skipped.
            if len > 0 {
                return Some(PageSegment {
                    page,
                    offset,
                    len,
                    _source: PhantomData,
                });
            }
        }

        None
    }
}

impl FusedIterator for PageSegments<'_> {}

impl fmt::Debug for PageSegments<'_> {
    #[cfg_attr(test, mutants::skip)] // We have no API contract here.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageSegments")
            .field("offset", &self.offset)
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

/// A region of committed bytes within one page.
#[derive(Clone)]
pub struct PageSegment<'a> {
    page: Arc<Page>,
    offset: usize,
    len: usize,
    _source: PhantomData<&'a ()>,
}

impl<'a> PageSegment<'a> {
    /// The page the region lies in.
    #[must_use]
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Offset of the region from the start of the page.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of bytes in the region.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always `false` - empty regions are never yielded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The bytes of the region.
    #[must_use]
    pub fn as_slice(&self) -> &'a [u8] {
        // SAFETY: Segments are only created by walks whose source keeps the page pinned for 'a,
        // and the region lies within the committed bytes of the page.
        unsafe { self.page.committed(self.offset, self.len) }
    }

    /// The committed bytes of the page up to the end of this region.
    ///
    /// The region itself starts at [`offset()`][Self::offset] within it.
    #[must_use]
    pub fn as_array(&self) -> &'a [u8] {
        // SAFETY: As above. The prefix before the region is committed as well.
        unsafe { self.page.committed(0, self.offset + self.len) }
    }

    pub(crate) fn page_arc(&self) -> &Arc<Page> {
        &self.page
    }
}

impl fmt::Debug for PageSegment<'_> {
    #[cfg_attr(test, mutants::skip)] // We have no API contract here.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageSegment")
            .field("page", &self.page)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

/// Iterator over a byte range as contiguous byte slices.
#[derive(Clone, Debug)]
pub struct Segments<'a> {
    inner: PageSegments<'a>,
}

impl<'a> Segments<'a> {
    pub(crate) fn new(inner: PageSegments<'a>) -> Self {
        Self { inner }
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = &'a [u8];

    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|segment| segment.as_slice())
    }
}

impl FusedIterator for Segments<'_> {}

/// A region expressed as the page's committed bytes plus an offset and length into them.
#[derive(Clone, Copy, Debug)]
pub struct ArraySegment<'a> {
    array: &'a [u8],
    offset: usize,
    len: usize,
}

impl<'a> ArraySegment<'a> {
    /// The committed bytes of the page, up to the end of the region.
    #[must_use]
    pub fn array(&self) -> &'a [u8] {
        self.array
    }

    /// Offset of the region within [`array()`][Self::array].
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of bytes in the region.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always `false` - empty regions are never yielded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The bytes of the region.
    #[must_use]
    pub fn as_slice(&self) -> &'a [u8] {
        &self.array[self.offset..self.offset + self.len]
    }
}

/// Iterator over a byte range as [`ArraySegment`]s.
#[derive(Clone, Debug)]
pub struct ArraySegments<'a> {
    inner: PageSegments<'a>,
}

impl<'a> ArraySegments<'a> {
    pub(crate) fn new(inner: PageSegments<'a>) -> Self {
        Self { inner }
    }
}

impl<'a> Iterator for ArraySegments<'a> {
    type Item = ArraySegment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|segment| ArraySegment {
            array: segment.as_array(),
            offset: segment.offset(),
            len: segment.len(),
        })
    }
}

impl FusedIterator for ArraySegments<'_> {}

/// Iterator over a byte range as independently pinned single-page [`ArcBuffer`]s.
///
/// Each yielded buffer keeps its page alive on its own and may outlive the source it was taken from.
#[derive(Clone, Debug)]
pub struct OwnedSegments<'a> {
    inner: PageSegments<'a>,
}

impl<'a> OwnedSegments<'a> {
    pub(crate) fn new(inner: PageSegments<'a>) -> Self {
        Self { inner }
    }
}

impl Iterator for OwnedSegments<'_> {
    type Item = Result<ArcBuffer>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|segment| {
            let page = segment.page_arc();
            ArcBuffer::pinned(Arc::clone(page), page.version(), segment.offset(), segment.len())
        })
    }
}

impl FusedIterator for OwnedSegments<'_> {}

/// Walks every page a range touches, including a start page that contributes no bytes.
///
/// Used for pinning, where the start page must be covered even for empty ranges.
pub(crate) fn spanned_pages(first: &Arc<Page>, offset: usize, len: usize) -> impl Iterator<Item = Arc<Page>> {
    let mut next = Some(Arc::clone(first));
    let mut remaining = len;
    let mut offset = offset;

    std::iter::from_fn(move || {
        let page = next.take()?;

        let contributed = remaining.min(page.len().saturating_sub(offset));
        remaining -= contributed;
        offset = 0;

        if remaining > 0 {
            next = page.next();
        }

        Some(page)
    })
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use new_zealand::nz;
    use static_assertions::assert_impl_all;

    use super::*;
    use crate::{ArcBufferWriter, PagePool};

    assert_impl_all!(PageSegments<'static>: Send, Sync, Clone);
    assert_impl_all!(Segments<'static>: Send, Sync, Clone);

    fn writer_with(data: &[u8]) -> ArcBufferWriter {
        let mut writer = ArcBufferWriter::with_pool(PagePool::with_page_size(nz!(4)));
        writer.write(data).unwrap();
        writer
    }

    #[test]
    fn walks_pages_in_order() {
        let writer = writer_with(b"abcdefghij");
        let buffer = writer.peek_slice(10).unwrap();

        let segments: Vec<_> = buffer.page_segments().unwrap().map(|s| (s.offset(), s.len())).collect();
        assert_eq!(segments, vec![(0, 4), (0, 4), (0, 2)]);

        let slices: Vec<_> = buffer.segments().unwrap().collect();
        assert_eq!(slices, vec![&b"abcd"[..], b"efgh", b"ij"]);
    }

    #[test]
    fn starts_mid_page() {
        let writer = writer_with(b"abcdefghij");
        let buffer = writer.peek_slice(10).unwrap().slice(3..9).unwrap();

        let slices: Vec<_> = buffer.segments().unwrap().collect();
        assert_eq!(slices, vec![&b"d"[..], b"efgh", b"i"]);

        let arrays: Vec<_> = buffer.array_segments().unwrap().collect();
        assert_eq!(arrays.len(), 3);
        assert_eq!(arrays[0].array(), b"abcd");
        assert_eq!(arrays[0].offset(), 3);
        assert_eq!(arrays[0].len(), 1);
        assert_eq!(arrays[2].array(), b"i");
        assert_eq!(arrays[2].as_slice(), b"i");
    }

    #[test]
    fn empty_range_yields_nothing() {
        let writer = writer_with(b"abcd");
        let buffer = writer.peek_slice(0).unwrap();

        assert_eq!(buffer.segments().unwrap().count(), 0);
        assert_eq!(buffer.page_segments().unwrap().count(), 0);
        assert_eq!(buffer.array_segments().unwrap().count(), 0);
        assert_eq!(buffer.owned_segments().unwrap().count(), 0);
    }

    #[test]
    fn owned_segments_outlive_source() {
        let writer = writer_with(b"abcdefgh");
        let buffer = writer.peek_slice(6).unwrap();

        let owned: Vec<ArcBuffer> = buffer.owned_segments().unwrap().collect::<Result<_>>().unwrap();
        drop(buffer);
        drop(writer);

        assert_eq!(owned.len(), 2);
        assert_eq!(owned[0].to_vec().unwrap(), b"abcd");
        assert_eq!(owned[1].to_vec().unwrap(), b"ef");
    }

    #[test]
    fn spanned_pages_includes_empty_start() {
        let writer = writer_with(b"abcdefgh");
        let buffer = writer.peek_slice(8).unwrap();

        let first = Arc::clone(buffer.page_segments().unwrap().next().unwrap().page_arc());

        assert_eq!(spanned_pages(&first, 4, 0).count(), 1);
        assert_eq!(spanned_pages(&first, 0, 4).count(), 1);
        assert_eq!(spanned_pages(&first, 4, 4).count(), 2);
        assert_eq!(spanned_pages(&first, 0, 8).count(), 2);
    }
}
