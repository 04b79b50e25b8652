// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use num_traits::ToBytes;

use super::WriterOutput;
use super::varint::{self, MAX_VAR_U64_LEN};
use crate::Result;

/// Encodes binary data into an output.
///
/// The writer is generic over its [`WriterOutput`], which is chosen at construction. Values are
/// encoded straight into the output's current region whenever it has room for the widest
/// possible encoding; otherwise the exact encoding is assembled on the side and copied across
/// as many regions as it takes.
///
/// Writers are meant to be short-lived values that live within one call tree. Every write is
/// committed to the output immediately, so there is nothing to flush.
///
/// # Example
///
/// ```
/// use arcbuf::ArcBufferWriter;
/// use arcbuf::codec::{Reader, Writer};
///
/// let mut buffer = ArcBufferWriter::new();
///
/// let mut writer = Writer::new(&mut buffer);
/// writer.write_var_u32(300)?;
/// writer.write_u64(u64::MAX)?;
/// writer.write_bytes(b"payload")?;
/// assert_eq!(writer.position(), 2 + 8 + 7);
///
/// let mut reader = Reader::from_writer(&buffer)?;
/// assert_eq!(reader.read_var_u32()?, 300);
/// assert_eq!(reader.read_u64()?, u64::MAX);
/// assert_eq!(reader.read_vec(7)?, b"payload");
/// # Ok::<(), arcbuf::Error>(())
/// ```
#[derive(Debug)]
pub struct Writer<O> {
    output: O,
    position: u64,
}

impl<O: WriterOutput> Writer<O> {
    /// Creates a writer that appends to `output`.
    #[must_use]
    pub const fn new(output: O) -> Self {
        Self { output, position: 0 }
    }

    /// Number of bytes written by this writer.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// The output the writer writes to.
    #[must_use]
    pub fn output(&self) -> &O {
        &self.output
    }

    /// Returns the output the writer writes to.
    #[must_use]
    pub fn into_output(self) -> O {
        self.output
    }

    /// Writes one byte.
    ///
    /// This is the primitive that record framing builds its marker bytes on.
    ///
    /// # Errors
    ///
    /// Returns an error if the output cannot accept more data.
    pub fn write_byte(&mut self, value: u8) -> Result<()> {
        let region = self.output.current_region()?;

        if let Some(first) = region.first_mut() {
            *first = value;
        } else {
            self.output.writable(1)?[0] = value;
        }

        self.commit(1)
    }

    /// Writes a sequence of bytes, spreading them across as many regions as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the output cannot accept more data.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let region = self.output.current_region()?;

        if let Some(destination) = region.get_mut(..bytes.len()) {
            destination.copy_from_slice(bytes);
            return self.commit(bytes.len());
        }

        self.write_multi_segment(bytes)
    }

    #[cold] // Most writes fit the current region.
    fn write_multi_segment(&mut self, bytes: &[u8]) -> Result<()> {
        self.output.write_all(bytes)?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    /// Returns a contiguous region of at least `min_len` bytes (at least one byte if zero) for
    /// filling directly. Commit what was written with [`advance()`][Self::advance].
    ///
    /// # Errors
    ///
    /// Returns an error if the output cannot provide a region that large.
    pub fn writable(&mut self, min_len: usize) -> Result<&mut [u8]> {
        let has_room = self.output.current_region()?.len() >= min_len.max(1);

        if has_room {
            self.output.current_region()
        } else {
            self.output.writable(min_len)
        }
    }

    /// Commits `count` bytes written into the region returned by [`writable()`][Self::writable].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Range`][crate::Error::Range] if `count` exceeds the region.
    pub fn advance(&mut self, count: usize) -> Result<()> {
        self.commit(count)
    }

    /// Writes a number of type `T` in little-endian representation.
    ///
    /// Room for the whole value is reserved up front, so the bytes are always contiguous.
    ///
    /// # Errors
    ///
    /// Returns an error if the output cannot accept more data.
    #[expect(clippy::needless_pass_by_value, reason = "tiny numeric types, fine to always pass by value")]
    pub fn write_num_le<T: ToBytes>(&mut self, value: T) -> Result<()> {
        let bytes = value.to_le_bytes();
        let bytes = bytes.as_ref();

        self.writable(bytes.len())?[..bytes.len()].copy_from_slice(bytes);
        self.commit(bytes.len())
    }

    /// Writes a little-endian `u32`.
    ///
    /// # Errors
    ///
    /// Returns an error if the output cannot accept more data.
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_num_le(value)
    }

    /// Writes a little-endian `u64`.
    ///
    /// # Errors
    ///
    /// Returns an error if the output cannot accept more data.
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_num_le(value)
    }

    /// Writes a little-endian `i32`.
    ///
    /// # Errors
    ///
    /// Returns an error if the output cannot accept more data.
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.write_num_le(value)
    }

    /// Writes a little-endian `i64`.
    ///
    /// # Errors
    ///
    /// Returns an error if the output cannot accept more data.
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        self.write_num_le(value)
    }

    /// Writes a variable-length `u32`, 1 to 5 bytes wide.
    ///
    /// # Errors
    ///
    /// Returns an error if the output cannot accept more data.
    pub fn write_var_u32(&mut self, value: u32) -> Result<()> {
        let (bytes, width) = varint::encode_u32(value);
        let region = self.output.current_region()?;

        // With a whole word of room, the word is stored unconditionally and only `width` bytes
        // of it are committed.
        if let Some(destination) = region.first_chunk_mut::<8>() {
            *destination = bytes;
            return self.commit(width);
        }

        self.write_bytes(&bytes[..width])
    }

    /// Writes a variable-length `u64`, 1 to 10 bytes wide.
    ///
    /// # Errors
    ///
    /// Returns an error if the output cannot accept more data.
    pub fn write_var_u64(&mut self, value: u64) -> Result<()> {
        let (bytes, width) = varint::encode_u64(value);
        let region = self.output.current_region()?;

        if let Some(destination) = region.first_chunk_mut::<MAX_VAR_U64_LEN>() {
            *destination = bytes;
            return self.commit(width);
        }

        self.write_bytes(&bytes[..width])
    }

    /// Writes a zigzag-encoded variable-length `i32`.
    ///
    /// # Errors
    ///
    /// Returns an error if the output cannot accept more data.
    pub fn write_var_i32(&mut self, value: i32) -> Result<()> {
        self.write_var_u32(varint::zigzag_encode_32(value))
    }

    /// Writes a zigzag-encoded variable-length `i64`.
    ///
    /// # Errors
    ///
    /// Returns an error if the output cannot accept more data.
    pub fn write_var_i64(&mut self, value: i64) -> Result<()> {
        self.write_var_u64(varint::zigzag_encode_64(value))
    }

    fn commit(&mut self, count: usize) -> Result<()> {
        self.output.commit(count)?;
        self.position += count as u64;
        Ok(())
    }
}
