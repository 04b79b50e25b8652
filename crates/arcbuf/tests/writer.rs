// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for `ArcBufferWriter` and the buffers taken from it.

use std::num::NonZero;
use std::sync::mpsc;
use std::thread;

use arcbuf::{ArcBuffer, ArcBufferWriter, DEFAULT_PAGE_SIZE, Error, PagePool, Staleness};

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

#[test]
fn forty_thousand_bytes_in_standard_pages() {
    let pool = PagePool::new();
    assert_eq!(pool.page_size(), 16_384);

    let mut writer = ArcBufferWriter::with_pool(pool.clone());
    let data = pattern(40_000);
    writer.write(&data).unwrap();
    assert_eq!(writer.page_count().unwrap(), 3);

    let everything = writer.peek_slice(40_000).unwrap();
    let mut flat = vec![0; 40_000];
    assert_eq!(everything.copy_to_slice(&mut flat).unwrap(), 40_000);
    assert_eq!(flat, data);

    let first_page = writer.consume_slice(16_384).unwrap();
    writer.write(&[0xAB; 100]).unwrap();
    assert_eq!(writer.len().unwrap(), 40_000 - 16_384 + 100);

    assert_eq!(first_page.to_vec().unwrap(), &data[..16_384]);

    drop(writer);
    drop(everything);
    assert_eq!(pool.idle_pages(), 2);

    drop(first_page);
    assert_eq!(pool.idle_pages(), 3);
}

#[test]
fn round_trip_around_page_boundaries() {
    let page_size = 64;
    let pool = PagePool::with_page_size(NonZero::new(page_size).unwrap());

    for len in [0, 1, page_size - 1, page_size, page_size + 1, 3 * page_size + 5] {
        let mut writer = ArcBufferWriter::with_pool(pool.clone());
        let data = pattern(len);
        writer.write(&data).unwrap();

        let consumed = writer.consume_slice(len).unwrap();
        assert_eq!(consumed.len(), len);
        assert_eq!(consumed.to_vec().unwrap(), data, "length {len}");
        assert!(writer.is_empty().unwrap());
    }
}

#[test]
fn unconsumed_length_tracks_writes_and_consumes() {
    let pool = PagePool::with_page_size(NonZero::new(10).unwrap());
    let mut writer = ArcBufferWriter::with_pool(pool);

    let mut written = 0;
    let mut consumed = 0;
    for step in 1..50 {
        writer.write(&pattern(step)).unwrap();
        written += step;

        let take = step / 2;
        writer.skip(take).unwrap();
        consumed += take;

        assert_eq!(writer.len().unwrap(), written - consumed);
    }

    assert!(matches!(writer.skip(written - consumed + 1), Err(Error::Range { .. })));
    assert_eq!(writer.len().unwrap(), written - consumed);
}

#[test]
fn buffers_released_on_other_threads_return_pages() {
    let pool = PagePool::with_page_size(NonZero::new(32).unwrap());
    let mut writer = ArcBufferWriter::with_pool(pool.clone());

    let data = pattern(32 * 20);
    writer.write(&data).unwrap();

    let (sender, receiver) = mpsc::channel::<(usize, ArcBuffer)>();
    let consumer = thread::spawn(move || {
        let mut received = Vec::new();
        for (offset, buffer) in receiver {
            received.push((offset, buffer.to_vec().unwrap()));
        }
        received
    });

    let mut offset = 0;
    for chunk in [1, 31, 32, 50, 100, 426] {
        sender.send((offset, writer.consume_slice(chunk).unwrap())).unwrap();
        offset += chunk;
    }
    drop(sender);
    writer.dispose();

    for (offset, bytes) in consumer.join().unwrap() {
        assert_eq!(bytes, &data[offset..offset + bytes.len()]);
    }

    assert_eq!(pool.idle_pages(), 20);
}

#[test]
fn recycled_page_is_detected_through_weak_slice() {
    let pool = PagePool::with_page_size(NonZero::new(16).unwrap());
    let mut writer = ArcBufferWriter::with_pool(pool.clone());
    writer.write(&[1; 16]).unwrap();

    let strong = writer.consume_slice(16).unwrap();
    // SAFETY: The slice is only used to check that recycling is detected.
    let weak = unsafe { strong.slice_unpinned(4..8) }.unwrap();
    drop(strong);
    writer.dispose();

    let mut successor = ArcBufferWriter::with_pool(pool);
    successor.write(&[2; 16]).unwrap();

    assert!(matches!(
        weak.to_vec(),
        Err(Error::StaleCapability(Staleness::VersionMismatch { .. }))
    ));
}

#[test]
fn disposed_writer_rejects_everything() {
    let mut writer = ArcBufferWriter::new();
    assert_eq!(writer.pool().page_size(), DEFAULT_PAGE_SIZE.get());
    writer.write(b"data").unwrap();

    writer.dispose();
    writer.dispose();

    assert!(writer.is_disposed());
    assert!(matches!(writer.write(b"x"), Err(Error::Disposed)));
    assert!(matches!(writer.len(), Err(Error::Disposed)));
    assert!(matches!(writer.peek_slice(0), Err(Error::Disposed)));
    assert!(matches!(writer.reset(), Err(Error::Disposed)));
}
