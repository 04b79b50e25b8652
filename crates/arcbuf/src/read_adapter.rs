// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::{self, BufRead, Read};

use crate::Segments;

/// Adapter that implements [`Read`] and [`BufRead`] over the bytes of an [`ArcBuffer`][1].
///
/// Create an instance via [`ArcBuffer::reader()`][2].
///
/// The buffer's pages already hold the data, so [`BufRead`] is implemented directly over them
/// without an intermediate buffer. Prefer this over wrapping in [`std::io::BufReader`].
///
/// [1]: crate::ArcBuffer
/// [2]: crate::ArcBuffer::reader
#[derive(Debug)]
pub struct ArcBufferRead<'a> {
    current: &'a [u8],
    rest: Segments<'a>,
}

impl<'a> ArcBufferRead<'a> {
    pub(crate) fn new(mut segments: Segments<'a>) -> Self {
        Self {
            current: segments.next().unwrap_or_default(),
            rest: segments,
        }
    }

    fn refill(&mut self) {
        while self.current.is_empty() {
            let Some(next) = self.rest.next() else { return };
            self.current = next;
        }
    }
}

impl Read for ArcBufferRead<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut copied = 0;

        while copied < buf.len() {
            self.refill();
            if self.current.is_empty() {
                break;
            }

            let count = self.current.len().min(buf.len() - copied);
            buf[copied..copied + count].copy_from_slice(&self.current[..count]);
            self.current = &self.current[count..];
            copied += count;
        }

        Ok(copied)
    }
}

impl BufRead for ArcBufferRead<'_> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.refill();
        Ok(self.current)
    }

    fn consume(&mut self, amount: usize) {
        let mut amount = amount;

        while amount > 0 {
            self.refill();
            if self.current.is_empty() {
                return;
            }

            let count = amount.min(self.current.len());
            self.current = &self.current[count..];
            amount -= count;
        }
    }
}
