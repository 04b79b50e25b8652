// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::{Read, Seek};
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::slice;

use num_traits::FromBytes;

use super::varint::{self, MAX_VAR_U32_LEN, MAX_VAR_U64_LEN};
use super::{ChainInput, ReaderInput, SliceInput, StreamInput};
use crate::constants::MAX_UNCHECKED_READ_LEN;
use crate::{ArcBuffer, ArcBufferWriter, Error, Result, SegmentedBuffer, Segments, SegmentedBufferSegments};

/// Decodes binary data from an input.
///
/// The reader is generic over its [`ReaderInput`], which is chosen at construction. Decoding reads
/// straight out of the input's contiguous chunks whenever a value fits within one and falls back
/// to assembling the value byte by byte only where it straddles a chunk boundary or the input is
/// a stream.
///
/// Readers are meant to be short-lived values that live within one call tree: create one, decode
/// what you need and drop it.
///
/// # Example
///
/// ```
/// use arcbuf::codec::Reader;
///
/// let mut reader = Reader::from_slice(&[0x2A, 0x02, 0x02, 0x07, 0, 0, 0]);
///
/// assert_eq!(reader.read_byte()?, 42);
/// assert_eq!(reader.read_var_u32()?, 128);
/// assert_eq!(reader.read_u32()?, 7);
/// assert_eq!(reader.position(), 7);
/// # Ok::<(), arcbuf::Error>(())
/// ```
#[derive(Debug)]
pub struct Reader<'a, I> {
    input: I,
    _data: PhantomData<&'a [u8]>,
}

impl<'a> Reader<'a, SliceInput<'a>> {
    /// Creates a reader over a flat byte slice.
    #[must_use]
    pub const fn from_slice(data: &'a [u8]) -> Self {
        Self::new(SliceInput::new(data))
    }
}

impl<'a> Reader<'a, ChainInput<'a, Segments<'a>>> {
    /// Creates a reader over the bytes of a buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleCapability`] if the buffer is no longer valid.
    pub fn from_buffer(buffer: &'a ArcBuffer) -> Result<Self> {
        Ok(Self::new(ChainInput::new(buffer.segments()?)))
    }

    /// Creates a reader over the unconsumed bytes of a writer, without consuming them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if the writer has been disposed.
    pub fn from_writer(writer: &'a ArcBufferWriter) -> Result<Self> {
        Ok(Self::new(ChainInput::new(writer.unconsumed_segments()?)))
    }
}

impl<'a> Reader<'a, ChainInput<'a, SegmentedBufferSegments<'a>>> {
    /// Creates a reader over the bytes of a segmented buffer.
    #[must_use]
    pub fn from_segmented(buffer: &'a SegmentedBuffer) -> Self {
        Self::new(ChainInput::new(buffer.segments()))
    }
}

impl<R: Read> Reader<'_, StreamInput<R>> {
    /// Creates a reader over a sequential stream, starting at its current position.
    ///
    /// The reader cannot be forked.
    #[must_use]
    pub fn from_stream(stream: R) -> Self {
        Self::new(StreamInput::new(stream))
    }
}

impl<R: Read + Seek> Reader<'_, StreamInput<R>> {
    /// Creates a reader over a seekable stream, which can be forked.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the stream cannot report its position or length.
    pub fn from_seekable_stream(stream: R) -> Result<Self> {
        Ok(Self::new(StreamInput::seekable(stream)?))
    }
}

impl<'a, I: ReaderInput<'a>> Reader<'a, I> {
    /// Creates a reader over any input.
    #[must_use]
    pub const fn new(input: I) -> Self {
        Self {
            input,
            _data: PhantomData,
        }
    }

    /// Number of bytes read so far (for seekable streams, the absolute stream position).
    #[must_use]
    pub fn position(&self) -> u64 {
        self.input.position()
    }

    /// Total length of the input, if known.
    #[must_use]
    pub fn length(&self) -> Option<u64> {
        self.input.length()
    }

    /// The input the reader reads from.
    #[must_use]
    pub fn into_input(self) -> I {
        self.input
    }

    /// Reads one byte.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Truncated`] at the end of the input.
    pub fn read_byte(&mut self) -> Result<u8> {
        if let Some(&byte) = self.input.chunk().first() {
            self.input.advance(1);
            return Ok(byte);
        }

        let mut byte = [0];
        self.read_bytes(&mut byte)?;
        Ok(byte[0])
    }

    /// Fills `destination` with the next bytes of the input.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Truncated`] if the input ends first. If the input length is known this
    /// is detected before anything is consumed.
    pub fn read_bytes(&mut self, destination: &mut [u8]) -> Result<()> {
        self.check_remaining(destination.len())?;

        let mut filled = 0;
        loop {
            let chunk = self.input.chunk();
            let count = chunk.len().min(destination.len() - filled);
            destination[filled..filled + count].copy_from_slice(&chunk[..count]);
            self.input.advance(count);
            filled += count;

            if filled == destination.len() {
                return Ok(());
            }

            if !self.input.next_chunk() {
                return self.input.read_uncached(&mut destination[filled..]);
            }
        }
    }

    /// Reads `count` bytes into a new vector.
    ///
    /// Lengths usually come from the data itself, so a large length is checked against the known
    /// input length before anything is allocated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Truncated`] if the input ends first.
    pub fn read_vec(&mut self, count: usize) -> Result<Vec<u8>> {
        if count > MAX_UNCHECKED_READ_LEN {
            self.check_remaining(count)?;
        }

        let mut bytes = vec![0; count];
        self.read_bytes(&mut bytes)?;
        Ok(bytes)
    }

    /// Returns the next `count` bytes without copying if they are contiguous in the input.
    ///
    /// Returns `None` and consumes nothing if they are not (or the input is a stream).
    pub fn try_read_slice(&mut self, count: usize) -> Option<&'a [u8]> {
        if self.input.chunk().is_empty() {
            self.input.next_chunk();
        }

        let bytes = self.input.chunk().get(..count)?;
        self.input.advance(count);
        Some(bytes)
    }

    /// Skips `count` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Truncated`] if the input ends first.
    pub fn skip(&mut self, count: usize) -> Result<()> {
        self.check_remaining(count)?;

        let mut remaining = count;
        loop {
            let skipped = remaining.min(self.input.chunk().len());
            self.input.advance(skipped);
            remaining -= skipped;

            if remaining == 0 {
                return Ok(());
            }

            if !self.input.next_chunk() {
                return self.input.skip_uncached(remaining);
            }
        }
    }

    /// Reads a number of type `T` in little-endian representation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Truncated`] if the input ends first.
    pub fn read_num_le<T: FromBytes>(&mut self) -> Result<T>
    where
        T::Bytes: Sized,
    {
        let size = size_of::<T::Bytes>();

        if let Some(bytes) = self.input.chunk().get(..size) {
            let bytes_array_ptr = bytes.as_ptr().cast::<T::Bytes>();

            // SAFETY: The chunk holds at least `size` bytes. The target type is an array of bytes,
            // so has no alignment requirements.
            let bytes_array_maybe = unsafe { bytes_array_ptr.as_ref() };
            // SAFETY: This is never a null pointer because it came from a reference.
            let bytes_array = unsafe { bytes_array_maybe.unwrap_unchecked() };

            let result = T::from_le_bytes(bytes_array);
            self.input.advance(size);
            return Ok(result);
        }

        self.read_num_le_buffered()
    }

    #[cold] // Most values lie within one chunk.
    fn read_num_le_buffered<T: FromBytes>(&mut self) -> Result<T>
    where
        T::Bytes: Sized,
    {
        let mut buffer: MaybeUninit<T::Bytes> = MaybeUninit::zeroed();

        // SAFETY: The buffer is a byte array of exactly this size and zeroed, so every byte is
        // initialized.
        let bytes = unsafe { slice::from_raw_parts_mut(buffer.as_mut_ptr().cast::<u8>(), size_of::<T::Bytes>()) };
        self.read_bytes(bytes)?;

        // SAFETY: Zeroed byte arrays are valid, and we have since overwritten them with data.
        Ok(T::from_le_bytes(&unsafe { buffer.assume_init() }))
    }

    /// Reads a little-endian `u32`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Truncated`] if the input ends first.
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_num_le()
    }

    /// Reads a little-endian `u64`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Truncated`] if the input ends first.
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    pub fn read_u64(&mut self) -> Result<u64> {
        self.read_num_le()
    }

    /// Reads a little-endian `i32`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Truncated`] if the input ends first.
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    pub fn read_i32(&mut self) -> Result<i32> {
        self.read_num_le()
    }

    /// Reads a little-endian `i64`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Truncated`] if the input ends first.
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    pub fn read_i64(&mut self) -> Result<i64> {
        self.read_num_le()
    }

    /// Reads a variable-length `u32`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedVarInt`] if the encoding is wider than a `u32` allows and
    /// [`Error::Truncated`] if the input ends first.
    pub fn read_var_u32(&mut self) -> Result<u32> {
        let chunk = self.input.chunk();

        if let Some(word) = chunk.first_chunk::<8>() {
            let (value, width) = varint::decode_u32(*word)?;
            self.input.advance(width);
            return Ok(value);
        }

        self.read_var_u32_slow()
    }

    #[cold] // Near a chunk boundary or on a stream.
    fn read_var_u32_slow(&mut self) -> Result<u32> {
        let header = self.read_byte()?;
        let width = varint::width_u32(header)?;

        let mut bytes = [0; 8];
        bytes[0] = header;
        self.read_bytes(&mut bytes[1..width])?;

        debug_assert!(width <= MAX_VAR_U32_LEN);
        Ok(varint::decode_u32(bytes)?.0)
    }

    /// Reads a variable-length `u64`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedVarInt`] if the length code is missing and
    /// [`Error::Truncated`] if the input ends first.
    pub fn read_var_u64(&mut self) -> Result<u64> {
        let chunk = self.input.chunk();

        if let Some(bytes) = chunk.first_chunk::<MAX_VAR_U64_LEN>() {
            let (value, width) = varint::decode_u64(*bytes)?;
            self.input.advance(width);
            return Ok(value);
        }

        self.read_var_u64_slow()
    }

    #[cold] // Near a chunk boundary or on a stream.
    fn read_var_u64_slow(&mut self) -> Result<u64> {
        let mut bytes = [0; MAX_VAR_U64_LEN];
        bytes[0] = self.read_byte()?;

        let mut consumed = 1;
        let width = varint::width_u64(bytes[0], || {
            let second = self.read_byte()?;
            bytes[1] = second;
            consumed = 2;
            Ok(second)
        })?;

        self.read_bytes(&mut bytes[consumed..width])?;
        Ok(varint::decode_u64(bytes)?.0)
    }

    /// Reads a zigzag-encoded variable-length `i32`.
    ///
    /// # Errors
    ///
    /// As for [`read_var_u32()`][Self::read_var_u32].
    pub fn read_var_i32(&mut self) -> Result<i32> {
        self.read_var_u32().map(varint::zigzag_decode_32)
    }

    /// Reads a zigzag-encoded variable-length `i64`.
    ///
    /// # Errors
    ///
    /// As for [`read_var_u64()`][Self::read_var_u64].
    pub fn read_var_i64(&mut self) -> Result<i64> {
        self.read_var_u64().map(varint::zigzag_decode_64)
    }

    /// Creates an independent reader over the same input, positioned at `position`.
    ///
    /// Use this to look ahead (or back) without disturbing this reader. A stream-backed reader is
    /// repositioned by seeking the shared stream, so call [`resume_from()`][Self::resume_from] on
    /// this reader before reading from it again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Range`] if `position` lies beyond the input and [`Error::Unsupported`]
    /// if the input is a stream that is not seekable.
    pub fn fork_from(&self, position: u64) -> Result<Self> {
        let forked = Self::new(self.input.fork_at(position)?);

        if forked.position() != position {
            return Err(position_mismatch(position, forked.position()));
        }

        Ok(forked)
    }

    /// Continues reading at `position` once forked readers are no longer in use.
    ///
    /// `position` must be the position this reader was at.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Range`] if the reader is not at `position`, and [`Error::Io`] if
    /// repositioning a stream fails.
    pub fn resume_from(&mut self, position: u64) -> Result<()> {
        self.input.restore()?;

        if position != self.position() {
            return Err(position_mismatch(position, self.position()));
        }

        Ok(())
    }

    fn check_remaining(&self, count: usize) -> Result<()> {
        if let Some(length) = self.input.length() {
            let remaining = length.saturating_sub(self.input.position());
            if count as u64 > remaining {
                let needed = count as u64 - remaining;
                return Err(Error::Truncated { needed });
            }
        }

        Ok(())
    }
}

fn position_mismatch(expected: u64, actual: u64) -> Error {
    Error::Range {
        what: "reader position",
        requested: expected,
        limit: actual,
    }
}
