// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Binary encoding and decoding on top of byte sinks and sources.
//!
//! A [`Writer`] encodes into any [`WriterOutput`], such as an
//! [`ArcBufferWriter`][crate::ArcBufferWriter], a [`SegmentedBuffer`][crate::SegmentedBuffer], a
//! fixed slice or an [`std::io::Write`] stream. A [`Reader`] decodes from any [`ReaderInput`], such
//! as a slice, a chain of segments or an [`std::io::Read`] stream.
//!
//! Both support single bytes, byte runs, little-endian fixed-width integers and the prefix
//! varint format described in [`varint`].

mod input;
mod output;
mod reader;
pub mod varint;
mod writer;

pub use input::{ChainInput, ReaderInput, SliceInput, StreamInput};
pub use output::{SliceOutput, StreamOutput, WriterOutput};
pub use reader::Reader;
pub use writer::Writer;
