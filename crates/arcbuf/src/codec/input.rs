// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cell::RefCell;
use std::fmt;
use std::io::{self, ErrorKind, Read, Seek, SeekFrom};
use std::rc::Rc;

use crate::{Error, Result};

/// A source of bytes for a [`Reader`][super::Reader].
///
/// Inputs expose their data as a sequence of contiguous chunks which the reader decodes from
/// directly. Inputs that have no chunks to lend (such as streams) instead copy bytes out on
/// demand via [`read_uncached()`][Self::read_uncached].
///
/// The reader is generic over its input, so each input kind gets its own specialized decoding
/// code with no runtime dispatch.
pub trait ReaderInput<'a>: Sized {
    /// The unread part of the current chunk. Empty if there is no current chunk.
    fn chunk(&self) -> &'a [u8];

    /// Marks `count` bytes of the current chunk as read.
    ///
    /// `count` never exceeds the length of [`chunk()`][Self::chunk].
    fn advance(&mut self, count: usize);

    /// Moves on to the next non-empty chunk, returning `false` if there is none.
    fn next_chunk(&mut self) -> bool;

    /// Fills `destination` once the chunks are exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Truncated`] if the input ends first. The default implementation always
    /// does, as chunked inputs have nothing beyond their chunks.
    fn read_uncached(&mut self, destination: &mut [u8]) -> Result<()> {
        Err(Error::truncated(destination.len()))
    }

    /// Skips `count` bytes once the chunks are exhausted.
    ///
    /// # Errors
    ///
    /// As for [`read_uncached()`][Self::read_uncached].
    fn skip_uncached(&mut self, count: usize) -> Result<()> {
        Err(Error::truncated(count))
    }

    /// Number of bytes read so far.
    fn position(&self) -> u64;

    /// Total number of bytes in the input, if known.
    fn length(&self) -> Option<u64>;

    /// Creates an independent input over the same data that starts at `position`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Range`] if `position` lies beyond the input, [`Error::Unsupported`] if
    /// the input cannot be repositioned, and [`Error::Io`] if repositioning a stream fails.
    fn fork_at(&self, position: u64) -> Result<Self>;

    /// Restores the state of any underlying resource shared with forks to this input's position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if repositioning a stream fails.
    fn restore(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Input over a flat byte slice.
#[derive(Clone, Debug)]
pub struct SliceInput<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> SliceInput<'a> {
    /// Creates an input over `data`.
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }
}

impl<'a> ReaderInput<'a> for SliceInput<'a> {
    fn chunk(&self) -> &'a [u8] {
        &self.data[self.offset..]
    }

    fn advance(&mut self, count: usize) {
        self.offset += count;
    }

    #[cfg_attr(test, mutants::skip)] // A slice is its only chunk.
    fn next_chunk(&mut self) -> bool {
        false
    }

    fn position(&self) -> u64 {
        self.offset as u64
    }

    fn length(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn fork_at(&self, position: u64) -> Result<Self> {
        let offset = usize::try_from(position)
            .ok()
            .filter(|offset| *offset <= self.data.len())
            .ok_or_else(|| range_error(position, self.data.len() as u64))?;

        Ok(Self { data: self.data, offset })
    }
}

/// Input over a sequence of byte slices, read as one contiguous whole.
///
/// Any cloneable iterator of slices will do, such as [`ArcBuffer::segments()`][1],
/// [`ArcBufferWriter::unconsumed_segments()`][2] or [`SegmentedBuffer::segments()`][3].
/// Forking clones the iterator and walks it to the requested position.
///
/// [1]: crate::ArcBuffer::segments
/// [2]: crate::ArcBufferWriter::unconsumed_segments
/// [3]: crate::SegmentedBuffer::segments
#[derive(Clone, Debug)]
pub struct ChainInput<'a, S> {
    origin: S,
    rest: S,
    current: &'a [u8],
    position: u64,
    len: u64,
}

impl<'a, S> ChainInput<'a, S>
where
    S: Iterator<Item = &'a [u8]> + Clone,
{
    /// Creates an input over the slices yielded by `segments`.
    #[must_use]
    pub fn new(segments: S) -> Self {
        let len = segments.clone().map(|segment| segment.len() as u64).sum();
        Self::starting(segments, len)
    }

    fn starting(origin: S, len: u64) -> Self {
        let mut input = Self {
            rest: origin.clone(),
            origin,
            current: &[],
            position: 0,
            len,
        };

        input.next_chunk();
        input
    }
}

impl<'a, S> ReaderInput<'a> for ChainInput<'a, S>
where
    S: Iterator<Item = &'a [u8]> + Clone,
{
    fn chunk(&self) -> &'a [u8] {
        self.current
    }

    fn advance(&mut self, count: usize) {
        self.current = &self.current[count..];
        self.position += count as u64;
    }

    fn next_chunk(&mut self) -> bool {
        match self.rest.by_ref().find(|segment| !segment.is_empty()) {
            Some(segment) => {
                self.current = segment;
                true
            }
            None => {
                self.current = &[];
                false
            }
        }
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn length(&self) -> Option<u64> {
        Some(self.len)
    }

    fn fork_at(&self, position: u64) -> Result<Self> {
        if position > self.len {
            return Err(range_error(position, self.len));
        }

        let mut forked = Self::starting(self.origin.clone(), self.len);

        while forked.position < position {
            if forked.current.is_empty() && !forked.next_chunk() {
                return Err(range_error(position, forked.position));
            }

            let remaining = position - forked.position;
            let count = usize::try_from(remaining).map_or(forked.current.len(), |remaining| remaining.min(forked.current.len()));
            forked.advance(count);
        }

        if forked.current.is_empty() {
            forked.next_chunk();
        }

        Ok(forked)
    }
}

type SeekFn<R> = fn(&mut R, u64) -> io::Result<u64>;

/// Input over a sequential [`Read`] stream.
///
/// Nothing is buffered: every read goes to the stream, so wrap slow streams in a
/// [`BufReader`][std::io::BufReader] first. Forks share the stream with the input they were forked
/// from, and forking is only possible for streams created via [`seekable()`][Self::seekable].
pub struct StreamInput<R> {
    stream: Rc<RefCell<R>>,
    position: u64,
    len: Option<u64>,
    seek: Option<SeekFn<R>>,
}

impl<R: Read> StreamInput<R> {
    /// Creates an input that reads `stream` from its current position onwards.
    ///
    /// The input cannot be forked.
    #[must_use]
    pub fn new(stream: R) -> Self {
        Self {
            stream: Rc::new(RefCell::new(stream)),
            position: 0,
            len: None,
            seek: None,
        }
    }
}

impl<R: Read + Seek> StreamInput<R> {
    /// Creates an input over a seekable stream, which can be forked.
    ///
    /// Positions are absolute stream positions. The current stream position becomes the
    /// position of the input.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the stream cannot report its position or length.
    pub fn seekable(mut stream: R) -> Result<Self> {
        let position = stream.stream_position()?;
        let len = stream.seek(SeekFrom::End(0))?;
        stream.seek(SeekFrom::Start(position))?;

        Ok(Self {
            stream: Rc::new(RefCell::new(stream)),
            position,
            len: Some(len),
            seek: Some(seek_start::<R>),
        })
    }
}

fn seek_start<R: Seek>(stream: &mut R, position: u64) -> io::Result<u64> {
    stream.seek(SeekFrom::Start(position))
}

impl<R> StreamInput<R> {
    fn seek_to(&self, position: u64) -> Result<()> {
        let Some(seek) = self.seek else {
            return Err(Error::Unsupported("repositioning a stream that is not seekable"));
        };

        let arrived = seek(&mut self.stream.borrow_mut(), position)?;
        if arrived != position {
            return Err(range_error(position, arrived));
        }

        Ok(())
    }
}

impl<'a, R: Read> ReaderInput<'a> for StreamInput<R> {
    #[cfg_attr(test, mutants::skip)] // Streams lend no chunks.
    fn chunk(&self) -> &'a [u8] {
        &[]
    }

    #[cfg_attr(test, mutants::skip)] // Never called with anything but zero.
    fn advance(&mut self, count: usize) {
        debug_assert_eq!(count, 0, "streams lend no chunks to advance through");
    }

    #[cfg_attr(test, mutants::skip)] // Streams lend no chunks.
    fn next_chunk(&mut self) -> bool {
        false
    }

    fn read_uncached(&mut self, destination: &mut [u8]) -> Result<()> {
        let mut stream = self.stream.borrow_mut();
        let mut filled = 0;

        while filled < destination.len() {
            match stream.read(&mut destination[filled..]) {
                Ok(0) => {
                    self.position += filled as u64;
                    return Err(Error::truncated(destination.len() - filled));
                }
                Ok(count) => filled += count,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    self.position += filled as u64;
                    return Err(e.into());
                }
            }
        }

        self.position += filled as u64;
        Ok(())
    }

    fn skip_uncached(&mut self, count: usize) -> Result<()> {
        let skipped = io::copy(&mut (&mut *self.stream.borrow_mut()).take(count as u64), &mut io::sink())?;
        self.position += skipped;

        if skipped < count as u64 {
            let missing = usize::try_from(count as u64 - skipped).unwrap_or(usize::MAX);
            return Err(Error::truncated(missing));
        }

        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn length(&self) -> Option<u64> {
        self.len
    }

    fn fork_at(&self, position: u64) -> Result<Self> {
        if let Some(len) = self.len
            && position > len
        {
            return Err(range_error(position, len));
        }

        self.seek_to(position)?;

        Ok(Self {
            stream: Rc::clone(&self.stream),
            position,
            len: self.len,
            seek: self.seek,
        })
    }

    fn restore(&mut self) -> Result<()> {
        if self.seek.is_none() {
            // Without seeking there can be no forks to disturb the stream.
            return Ok(());
        }

        self.seek_to(self.position)
    }
}

impl<R> fmt::Debug for StreamInput<R> {
    #[cfg_attr(test, mutants::skip)] // We have no API contract here.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamInput")
            .field("position", &self.position)
            .field("len", &self.len)
            .field("seekable", &self.seek.is_some())
            .finish_non_exhaustive()
    }
}

fn range_error(position: u64, limit: u64) -> Error {
    Error::Range {
        what: "input position",
        requested: position,
        limit,
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn drain<'a>(input: &mut impl ReaderInput<'a>) -> Vec<u8> {
        let mut collected = Vec::new();
        loop {
            let chunk = input.chunk();
            collected.extend_from_slice(chunk);
            input.advance(chunk.len());

            if !input.next_chunk() {
                return collected;
            }
        }
    }

    #[test]
    fn slice_input_is_one_chunk() {
        let mut input = SliceInput::new(b"abc");
        assert_eq!(input.length(), Some(3));
        assert_eq!(input.chunk(), b"abc");

        input.advance(2);
        assert_eq!(input.chunk(), b"c");
        assert_eq!(input.position(), 2);
        assert!(!input.next_chunk());

        assert!(input.read_uncached(&mut [0; 1]).unwrap_err().is_truncated());
    }

    #[test]
    fn slice_input_fork() {
        let input = SliceInput::new(b"abcdef");

        let forked = input.fork_at(4).unwrap();
        assert_eq!(forked.chunk(), b"ef");
        assert_eq!(forked.position(), 4);

        assert_eq!(input.fork_at(6).unwrap().chunk(), b"");
        assert!(matches!(input.fork_at(7), Err(Error::Range { requested: 7, limit: 6, .. })));
    }

    #[test]
    fn chain_input_walks_segments() {
        let segments: [&[u8]; 4] = [b"ab", b"", b"cde", b"f"];
        let mut input = ChainInput::new(segments.into_iter());

        assert_eq!(input.length(), Some(6));
        assert_eq!(input.chunk(), b"ab");
        assert_eq!(drain(&mut input), b"abcdef");
        assert_eq!(input.position(), 6);
    }

    #[test]
    fn chain_input_fork() {
        let segments: [&[u8]; 3] = [b"ab", b"cde", b"f"];
        let input = ChainInput::new(segments.into_iter());

        let mut forked = input.fork_at(3).unwrap();
        assert_eq!(forked.position(), 3);
        assert_eq!(drain(&mut forked), b"def");

        let mut at_boundary = input.fork_at(2).unwrap();
        assert_eq!(at_boundary.chunk(), b"cde");
        assert_eq!(drain(&mut at_boundary), b"cdef");

        let mut at_end = input.fork_at(6).unwrap();
        assert!(drain(&mut at_end).is_empty());

        assert!(matches!(input.fork_at(7), Err(Error::Range { .. })));
    }

    #[test]
    fn stream_input_reads_and_truncates() {
        let mut input = StreamInput::new(&b"abcd"[..]);
        assert_eq!(input.length(), None);

        let mut destination = [0; 3];
        input.read_uncached(&mut destination).unwrap();
        assert_eq!(&destination, b"abc");
        assert_eq!(input.position(), 3);

        let error = input.read_uncached(&mut [0; 3]).unwrap_err();
        assert!(matches!(error, Error::Truncated { needed: 2 }));
        assert_eq!(input.position(), 4);
    }

    #[test]
    fn stream_input_skips() {
        let mut input = StreamInput::new(&b"abcdef"[..]);
        input.skip_uncached(4).unwrap();
        assert_eq!(input.position(), 4);

        assert!(matches!(input.skip_uncached(5), Err(Error::Truncated { needed: 3 })));
    }

    #[test]
    fn plain_stream_cannot_fork() {
        let input = StreamInput::new(&b"abcdef"[..]);
        assert!(matches!(input.fork_at(2), Err(Error::Unsupported(_))));
    }

    #[test]
    fn seekable_stream_forks_and_restores() {
        let mut cursor = Cursor::new(b"abcdef".to_vec());
        cursor.set_position(1);

        let mut input = StreamInput::seekable(cursor).unwrap();
        assert_eq!(input.position(), 1);
        assert_eq!(input.length(), Some(6));

        let mut forked = input.fork_at(4).unwrap();
        let mut destination = [0; 2];
        forked.read_uncached(&mut destination).unwrap();
        assert_eq!(&destination, b"ef");

        input.restore().unwrap();
        let mut destination = [0; 2];
        input.read_uncached(&mut destination).unwrap();
        assert_eq!(&destination, b"bc");

        assert!(matches!(input.fork_at(7), Err(Error::Range { .. })));
    }
}
