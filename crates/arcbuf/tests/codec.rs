// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for the binary `Reader` and `Writer`.

use std::io::Cursor;
use std::num::NonZero;

use arcbuf::codec::varint::{encoded_len_u32, encoded_len_u64};
use arcbuf::codec::{Reader, StreamOutput, Writer};
use arcbuf::{ArcBufferWriter, PagePool, SegmentedBuffer};

const U32_BOUNDARIES: &[u32] = &[0, 1, 127, 128, 16_383, 16_384, 2_097_151, 2_097_152, 268_435_455, 268_435_456, u32::MAX];

fn u64_boundaries() -> Vec<u64> {
    let mut values = vec![0, u64::MAX];
    for bits in (7..64).step_by(7) {
        values.push((1 << bits) - 1);
        values.push(1 << bits);
    }
    values
}

#[test]
fn var_ints_survive_small_pages() {
    let pool = PagePool::with_page_size(NonZero::new(7).unwrap());
    let mut buffer = ArcBufferWriter::with_pool(pool);

    let mut expected_len = 0;
    {
        let mut writer = Writer::new(&mut buffer);
        for &value in U32_BOUNDARIES {
            writer.write_var_u32(value).unwrap();
            expected_len += encoded_len_u32(value);
        }
        for value in u64_boundaries() {
            writer.write_var_u64(value).unwrap();
            expected_len += encoded_len_u64(value);
        }
        assert_eq!(writer.position(), expected_len as u64);
    }

    assert_eq!(buffer.len().unwrap(), expected_len);

    let message = buffer.consume_slice(expected_len).unwrap();
    let mut reader = Reader::from_buffer(&message).unwrap();
    for &value in U32_BOUNDARIES {
        assert_eq!(reader.read_var_u32().unwrap(), value);
    }
    for value in u64_boundaries() {
        assert_eq!(reader.read_var_u64().unwrap(), value);
    }
    assert!(reader.read_byte().unwrap_err().is_truncated());
}

#[test]
fn record_with_marker_bytes() {
    const START: u8 = 0xF0;
    const END: u8 = 0xF1;

    let mut buffer = SegmentedBuffer::with_segment_size(NonZero::new(5).unwrap());
    {
        let mut writer = Writer::new(&mut buffer);
        writer.write_byte(START).unwrap();
        writer.write_var_u32(3).unwrap();
        writer.write_bytes(b"abc").unwrap();
        writer.write_i64(-9).unwrap();
        writer.write_byte(END).unwrap();
    }

    let mut reader = Reader::from_segmented(&buffer);
    assert_eq!(reader.read_byte().unwrap(), START);
    let len = reader.read_var_u32().unwrap() as usize;
    assert_eq!(reader.read_vec(len).unwrap(), b"abc");
    assert_eq!(reader.read_i64().unwrap(), -9);
    assert_eq!(reader.read_byte().unwrap(), END);
}

#[test]
fn stream_round_trip_with_forking() {
    let mut writer = Writer::new(StreamOutput::new(Vec::new()));
    writer.write_u32(0xDEAD_BEEF).unwrap();
    writer.write_var_i32(-300).unwrap();
    writer.write_bytes(b"tail").unwrap();
    let bytes = writer.into_output().into_inner();

    let mut reader = Reader::from_seekable_stream(Cursor::new(bytes)).unwrap();
    assert_eq!(reader.read_u32().unwrap(), 0xDEAD_BEEF);
    let after_header = reader.position();

    let mut tail = reader.fork_from(after_header + 2).unwrap();
    assert_eq!(tail.read_vec(4).unwrap(), b"tail");

    reader.resume_from(after_header).unwrap();
    assert_eq!(reader.read_var_i32().unwrap(), -300);
}

#[test]
fn copy_buffer_between_writers() {
    let mut source = ArcBufferWriter::with_pool(PagePool::with_page_size(NonZero::new(6).unwrap()));
    Writer::new(&mut source).write_bytes(b"shared across writers").unwrap();
    let payload = source.consume_slice(21).unwrap();

    let mut destination = ArcBufferWriter::with_pool(PagePool::with_page_size(NonZero::new(4).unwrap()));
    assert_eq!(payload.copy_to_output(&mut destination).unwrap(), 21);

    let mut reader = Reader::from_writer(&destination).unwrap();
    assert_eq!(reader.read_vec(21).unwrap(), b"shared across writers");
}
