// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::iter::FusedIterator;
use std::num::NonZero;
use std::slice;

use new_zealand::nz;

use crate::{Error, Result};

const DEFAULT_SEGMENT_SIZE: NonZero<usize> = nz!(4096);

/// A growable byte buffer made of individually allocated segments.
///
/// Unlike [`ArcBufferWriter`][crate::ArcBufferWriter], the segments are owned by the buffer
/// alone - they are not pooled, pinned or shared. The buffer grows by appending a new segment
/// whenever the last one has no room for a requested region, so existing bytes never move.
///
/// The binary [`Writer`][crate::codec::Writer] can target it directly and the binary
/// [`Reader`][crate::codec::Reader] can read it back via [`segments()`][Self::segments].
///
/// # Example
///
/// ```
/// use arcbuf::SegmentedBuffer;
///
/// let mut buffer = SegmentedBuffer::new();
/// buffer.write(b"segmented");
///
/// assert_eq!(buffer.len(), 9);
/// assert_eq!(buffer.to_vec(), b"segmented");
/// ```
#[derive(Debug)]
pub struct SegmentedBuffer {
    segments: Vec<Segment>,
    segment_size: usize,
    len: usize,
}

#[derive(Debug)]
struct Segment {
    bytes: Box<[u8]>,
    filled: usize,
}

impl Segment {
    fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0; capacity].into_boxed_slice(),
            filled: 0,
        }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.filled
    }
}

impl SegmentedBuffer {
    /// Creates an empty buffer that allocates 4 KiB segments.
    #[must_use]
    pub fn new() -> Self {
        Self::with_segment_size(DEFAULT_SEGMENT_SIZE)
    }

    /// Creates an empty buffer that allocates segments of `segment_size` bytes.
    ///
    /// Larger segments are allocated when a single region request exceeds this size.
    #[must_use]
    pub fn with_segment_size(segment_size: NonZero<usize>) -> Self {
        Self {
            segments: Vec::new(),
            segment_size: segment_size.get(),
            len: 0,
        }
    }

    /// Number of bytes written.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends bytes, allocating segments as needed.
    pub fn write(&mut self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            let region = self.reserve(0);
            let count = region.len().min(bytes.len());
            region[..count].copy_from_slice(&bytes[..count]);
            self.commit_unchecked(count);

            bytes = &bytes[count..];
        }
    }

    /// Iterates over the written bytes as contiguous slices, in order.
    #[must_use]
    pub fn segments(&self) -> SegmentedBufferSegments<'_> {
        SegmentedBufferSegments {
            inner: self.segments.iter(),
        }
    }

    /// Copies the written bytes into a new vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.len);
        for segment in self.segments() {
            bytes.extend_from_slice(segment);
        }
        bytes
    }

    /// Discards all written bytes and frees every segment.
    pub fn reset(&mut self) {
        self.segments.clear();
        self.len = 0;
    }

    /// The room left in the last segment, without allocating.
    pub(crate) fn spare(&mut self) -> &mut [u8] {
        match self.segments.last_mut() {
            Some(last) => &mut last.bytes[last.filled..],
            None => &mut [],
        }
    }

    /// A region of at least `size_hint` bytes (at least one byte if zero) at the end of the buffer.
    pub(crate) fn reserve(&mut self, size_hint: usize) -> &mut [u8] {
        let needed = size_hint.max(1);

        if self.segments.last().is_none_or(|last| last.remaining() < needed) {
            self.segments.push(Segment::new(self.segment_size.max(needed)));
        }

        self.spare()
    }

    /// Commits bytes written into the region returned by [`reserve()`][Self::reserve].
    pub(crate) fn advance(&mut self, count: usize) -> Result<()> {
        let remaining = self.segments.last().map_or(0, Segment::remaining);
        if count > remaining {
            return Err(Error::range("commit length", count, remaining));
        }

        self.commit_unchecked(count);
        Ok(())
    }

    fn commit_unchecked(&mut self, count: usize) {
        if let Some(last) = self.segments.last_mut() {
            last.filled += count;
            self.len += count;
        }
    }
}

impl Default for SegmentedBuffer {
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over the written bytes of a [`SegmentedBuffer`].
///
/// Created by [`SegmentedBuffer::segments()`].
#[derive(Clone, Debug)]
pub struct SegmentedBufferSegments<'a> {
    inner: slice::Iter<'a, Segment>,
}

impl<'a> Iterator for SegmentedBufferSegments<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .by_ref()
            .find(|segment| segment.filled > 0)
            .map(|segment| &segment.bytes[..segment.filled])
    }
}

impl FusedIterator for SegmentedBufferSegments<'_> {}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(SegmentedBuffer: Send, Sync);
    assert_impl_all!(SegmentedBufferSegments<'static>: Send, Sync, Clone);

    #[test]
    fn write_spans_segments() {
        let mut buffer = SegmentedBuffer::with_segment_size(nz!(4));
        buffer.write(b"abcdefghij");

        assert_eq!(buffer.len(), 10);
        assert!(!buffer.is_empty());

        let segments: Vec<_> = buffer.segments().collect();
        assert_eq!(segments, vec![&b"abcd"[..], b"efgh", b"ij"]);
        assert_eq!(buffer.to_vec(), b"abcdefghij");
    }

    #[test]
    fn large_region_gets_own_segment() {
        let mut buffer = SegmentedBuffer::with_segment_size(nz!(4));
        buffer.write(b"ab");

        let region = buffer.reserve(10);
        assert_eq!(region.len(), 10);
        region[..6].copy_from_slice(b"cdefgh");
        buffer.advance(6).unwrap();

        let segments: Vec<_> = buffer.segments().collect();
        assert_eq!(segments, vec![&b"ab"[..], b"cdefgh"]);
    }

    #[test]
    fn commit_beyond_region_fails() {
        let mut buffer = SegmentedBuffer::with_segment_size(nz!(4));
        assert!(matches!(buffer.advance(1), Err(Error::Range { .. })));

        let _ = buffer.reserve(0);
        assert!(matches!(buffer.advance(5), Err(Error::Range { requested: 5, limit: 4, .. })));
        buffer.advance(4).unwrap();
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn skipped_room_is_not_data() {
        let mut buffer = SegmentedBuffer::with_segment_size(nz!(4));
        buffer.write(b"abc");

        // The last segment has one byte left, so this starts a new one.
        let region = buffer.reserve(2);
        region[..2].copy_from_slice(b"de");
        buffer.advance(2).unwrap();

        assert_eq!(buffer.to_vec(), b"abcde");
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn reset_empties() {
        let mut buffer = SegmentedBuffer::new();
        buffer.write(&[1; 5000]);
        assert_eq!(buffer.segments().count(), 2);

        buffer.reset();
        assert!(buffer.is_empty());
        assert_eq!(buffer.segments().count(), 0);
        assert!(buffer.spare().is_empty());
    }
}
