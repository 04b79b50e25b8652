// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::{self, Write};

use crate::ArcBufferWriter;

/// Appends to the writer, renting pages on demand.
///
/// Every write is accepted in full. Writing to a disposed writer fails with an error of kind
/// [`io::ErrorKind::Other`].
impl Write for ArcBufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Self::write(self, buf)?;
        Ok(buf.len())
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        Self::write(self, buf)?;
        Ok(())
    }

    #[cfg_attr(test, mutants::skip)] // Nothing to flush.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use new_zealand::nz;

    use super::*;
    use crate::PagePool;

    #[test]
    fn smoke_test() {
        let mut writer = ArcBufferWriter::with_pool(PagePool::with_page_size(nz!(8)));

        write!(writer, "Hello, {}!", "world").unwrap();
        Write::write_all(&mut writer, b" Bye.").unwrap();
        writer.flush().unwrap();

        assert_eq!(writer.consume_slice(18).unwrap().to_vec().unwrap(), b"Hello, world! Bye.");
    }

    #[test]
    fn disposed_writer_fails() {
        let mut writer = ArcBufferWriter::with_pool(PagePool::with_page_size(nz!(8)));
        writer.dispose();

        let error = Write::write(&mut writer, b"x").unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::Other);
    }
}
