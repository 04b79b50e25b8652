// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::Write;

use crate::constants::MAX_MULTI_SEGMENT_SIZE_HINT;
use crate::{ArcBufferWriter, Error, Result, SegmentedBuffer};

/// A destination for bytes produced by a [`Writer`][super::Writer].
///
/// Outputs lend writable regions which the caller fills and then commits. Bytes written to a
/// region but not committed are not part of the output and may be discarded.
pub trait WriterOutput {
    /// The writable region available without allocating. May be empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the output can no longer be written to.
    fn current_region(&mut self) -> Result<&mut [u8]>;

    /// A contiguous writable region of at least `size_hint` bytes (at least one byte if
    /// `size_hint` is zero), allocating if the output can grow.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Range`] if the output cannot provide a region that large, or another
    /// error if the output can no longer be written to.
    fn writable(&mut self, size_hint: usize) -> Result<&mut [u8]>;

    /// Commits the first `count` bytes of the most recently returned region.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Range`] if `count` exceeds the region, and [`Error::Io`] if a stream
    /// output fails to accept the bytes.
    fn commit(&mut self, count: usize) -> Result<()>;

    /// Writes and commits all of `bytes`, filling the current region first and continuing in
    /// new regions as needed.
    ///
    /// # Errors
    ///
    /// As for [`writable()`][Self::writable] and [`commit()`][Self::commit].
    fn write_all(&mut self, mut bytes: &[u8]) -> Result<()> {
        while !bytes.is_empty() {
            let region = if self.current_region()?.is_empty() {
                self.writable(bytes.len().min(MAX_MULTI_SEGMENT_SIZE_HINT))?
            } else {
                self.current_region()?
            };

            let count = region.len().min(bytes.len());
            region[..count].copy_from_slice(&bytes[..count]);
            self.commit(count)?;

            bytes = &bytes[count..];
        }

        Ok(())
    }
}

impl WriterOutput for ArcBufferWriter {
    fn current_region(&mut self) -> Result<&mut [u8]> {
        Self::current_region(self)
    }

    fn writable(&mut self, size_hint: usize) -> Result<&mut [u8]> {
        self.writable_region(size_hint)
    }

    fn commit(&mut self, count: usize) -> Result<()> {
        self.advance_writer(count)
    }
}

impl WriterOutput for SegmentedBuffer {
    fn current_region(&mut self) -> Result<&mut [u8]> {
        Ok(self.spare())
    }

    fn writable(&mut self, size_hint: usize) -> Result<&mut [u8]> {
        Ok(self.reserve(size_hint))
    }

    fn commit(&mut self, count: usize) -> Result<()> {
        self.advance(count)
    }
}

impl<O: WriterOutput + ?Sized> WriterOutput for &mut O {
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    fn current_region(&mut self) -> Result<&mut [u8]> {
        (**self).current_region()
    }

    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    fn writable(&mut self, size_hint: usize) -> Result<&mut [u8]> {
        (**self).writable(size_hint)
    }

    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    fn commit(&mut self, count: usize) -> Result<()> {
        (**self).commit(count)
    }
}

/// Output into a fixed, caller-provided byte slice.
///
/// Writing more than fits fails with [`Error::Range`].
#[derive(Debug)]
pub struct SliceOutput<'a> {
    data: &'a mut [u8],
    len: usize,
}

impl<'a> SliceOutput<'a> {
    /// Creates an output that fills `data` from the start.
    #[must_use]
    pub const fn new(data: &'a mut [u8]) -> Self {
        Self { data, len: 0 }
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

    /// The bytes written so far.
    #[must_use]
    pub fn written(&self) -> &[u8] {
        &self.data[..self.len]
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.len
    }
}

impl WriterOutput for SliceOutput<'_> {
    fn current_region(&mut self) -> Result<&mut [u8]> {
        Ok(&mut self.data[self.len..])
    }

    fn writable(&mut self, size_hint: usize) -> Result<&mut [u8]> {
        let needed = size_hint.max(1);
        let remaining = self.remaining();
        if needed > remaining {
            return Err(Error::range("output capacity", needed, remaining));
        }

        Ok(&mut self.data[self.len..])
    }

    fn commit(&mut self, count: usize) -> Result<()> {
        let remaining = self.remaining();
        if count > remaining {
            return Err(Error::range("commit length", count, remaining));
        }

        self.len += count;
        Ok(())
    }
}

const DEFAULT_STREAM_SCRATCH_SIZE: usize = 4096;

/// Output into any [`Write`] stream.
///
/// Regions are lent from a scratch buffer and every commit writes the committed bytes to the
/// stream straight away, so nothing is left pending when the output is dropped. Wrap slow
/// streams in a [`BufWriter`][std::io::BufWriter] to batch the underlying writes.
#[derive(Debug)]
pub struct StreamOutput<W> {
    stream: W,
    scratch: Vec<u8>,
}

impl<W: Write> StreamOutput<W> {
    /// Creates an output with a 4 KiB scratch buffer.
    #[must_use]
    pub fn new(stream: W) -> Self {
        Self::with_capacity(DEFAULT_STREAM_SCRATCH_SIZE, stream)
    }

    /// Creates an output whose scratch buffer starts out with `capacity` bytes.
    ///
    /// The scratch buffer grows if a larger contiguous region is requested.
    #[must_use]
    pub fn with_capacity(capacity: usize, stream: W) -> Self {
        Self {
            stream,
            scratch: vec![0; capacity.max(1)],
        }
    }

    /// The stream the output writes to.
    #[must_use]
    pub fn get_ref(&self) -> &W {
        &self.stream
    }

    /// Returns the stream the output writes to.
    #[must_use]
    pub fn into_inner(self) -> W {
        self.stream
    }
}

impl<W: Write> WriterOutput for StreamOutput<W> {
    fn current_region(&mut self) -> Result<&mut [u8]> {
        Ok(&mut self.scratch)
    }

    fn writable(&mut self, size_hint: usize) -> Result<&mut [u8]> {
        if size_hint > self.scratch.len() {
            self.scratch.resize(size_hint, 0);
        }

        Ok(&mut self.scratch)
    }

    fn commit(&mut self, count: usize) -> Result<()> {
        let Some(committed) = self.scratch.get(..count) else {
            return Err(Error::range("commit length", count, self.scratch.len()));
        };

        self.stream.write_all(committed)?;
        Ok(())
    }
}
