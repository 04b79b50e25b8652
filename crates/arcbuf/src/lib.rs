// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Pooled, reference-counted byte pages with zero-copy slices and binary codecs.
//!
//! Network and serialization code tends to write a stream of bytes in one place and hand pieces
//! of it to consumers elsewhere, often on other threads. Copying every piece is wasteful and
//! keeping one big buffer alive until every consumer is done is wasteful too. This crate sits
//! between the two: bytes live in fixed-size pages rented from a [`PagePool`], and every page
//! goes back to the pool on its own as soon as nobody uses it any more.
//!
//! # Writing
//!
//! An [`ArcBufferWriter`] appends bytes to a chain of pages, renting a new page whenever the
//! current one is full. It also has a consume cursor, so it works as a FIFO byte queue: a socket
//! reader can receive into [`writable_regions()`][ArcBufferWriter::writable_regions] and a
//! parser can consume whole messages from the front.
//!
//! ```
//! use arcbuf::ArcBufferWriter;
//!
//! let mut writer = ArcBufferWriter::new();
//! writer.write(b"GET / HTTP/1.1\r\n")?;
//!
//! let request_line = writer.consume_slice(16)?;
//! assert_eq!(request_line.to_vec()?, b"GET / HTTP/1.1\r\n");
//! # Ok::<(), arcbuf::Error>(())
//! ```
//!
//! # Sharing
//!
//! [`consume_slice()`][ArcBufferWriter::consume_slice] and
//! [`peek_slice()`][ArcBufferWriter::peek_slice] return an [`ArcBuffer`]: a capability over a range
//! of bytes that pins every page the range spans. A buffer is cheap to create, copies nothing and
//! may outlive the writer. The pages return to the pool when the last pin on them is released.
//!
//! Pages are recycled, so a buffer that has been released must never observe the bytes of a
//! page's next life. Every page carries a version that changes whenever it is returned to the
//! pool, and every buffer remembers the version it was created against. Operations on a buffer
//! whose page has moved on fail with [`Error::StaleCapability`] instead of reading foreign data.
//!
//! ```
//! use arcbuf::ArcBufferWriter;
//!
//! let mut writer = ArcBufferWriter::new();
//! writer.write(b"hello world")?;
//!
//! let hello = writer.consume_slice(5)?;
//! drop(writer);
//!
//! // The buffer keeps its page alive after the writer is gone.
//! let handle = std::thread::spawn(move || hello.to_vec());
//! assert_eq!(handle.join().unwrap()?, b"hello");
//! # Ok::<(), arcbuf::Error>(())
//! ```
//!
//! # Encoding
//!
//! The [`codec`] module has a binary [`Writer`][codec::Writer] and [`Reader`][codec::Reader] for
//! bytes, little-endian integers and compact variable-length integers. The writer targets an
//! [`ArcBufferWriter`], a [`SegmentedBuffer`], a fixed slice or any [`std::io::Write`]. The reader
//! decodes a slice, an [`ArcBuffer`], a [`SegmentedBuffer`] or any [`std::io::Read`].
//!
//! ```
//! use arcbuf::SegmentedBuffer;
//! use arcbuf::codec::{Reader, Writer};
//!
//! let mut buffer = SegmentedBuffer::new();
//! let mut writer = Writer::new(&mut buffer);
//! writer.write_var_i64(-42)?;
//! writer.write_u32(7)?;
//!
//! let mut reader = Reader::from_segmented(&buffer);
//! assert_eq!(reader.read_var_i64()?, -42);
//! assert_eq!(reader.read_u32()?, 7);
//! # Ok::<(), arcbuf::Error>(())
//! ```
//!
//! # Standard I/O
//!
//! [`ArcBufferWriter`] implements [`std::io::Write`] and [`ArcBuffer::reader()`] returns an
//! adapter implementing [`std::io::Read`] and [`std::io::BufRead`].
//!
//! # Compatibility with the `bytes` crate
//!
//! With the `bytes-compat` feature enabled, `ArcBuffer::to_bytes()` copies a buffer into a
//! [`bytes::Bytes`](https://docs.rs/bytes/latest/bytes/struct.Bytes.html).

mod buffer;
pub mod codec;
mod constants;
mod error;
mod page;
mod pool;
mod read_adapter;
mod segmented;
mod segments;
mod write_adapter;
mod writer;

pub use buffer::ArcBuffer;
pub use constants::{DEFAULT_PAGE_SIZE, MAX_INLINE_SEGMENTS};
pub use error::{Error, Result, Staleness};
pub use page::Page;
pub use pool::PagePool;
pub use read_adapter::ArcBufferRead;
pub use segmented::{SegmentedBuffer, SegmentedBufferSegments};
pub use segments::{ArraySegment, ArraySegments, OwnedSegments, PageSegment, PageSegments, Segments};
pub use writer::ArcBufferWriter;
