// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use thiserror::Error;

/// Any error that may arise from pages, buffers and the binary codecs built on them.
///
/// Every variant except [`Error::Truncated`] (and possibly [`Error::Io`]) is a violation of an
/// API contract by the caller and retrying the same operation will fail the same way.
/// [`Error::Truncated`] is different: on a stream or a writer that is still being filled it means
/// more data has to arrive before the read can succeed. Use [`Error::is_truncated()`] to tell
/// the two apart.
///
/// # Thread safety
///
/// This type is thread-safe.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The writer was disposed and cannot be used any more.
    #[error("the buffer writer has been disposed")]
    Disposed,

    /// A length, offset or position is outside the range the operation can serve, or a
    /// destination is too small for the requested copy.
    #[error("{what} out of range: requested {requested}, limit {limit}")]
    Range {
        /// What was out of range.
        what: &'static str,
        /// The value the caller asked for.
        requested: u64,
        /// The largest value that would have been accepted.
        limit: u64,
    },

    /// A capability no longer refers to the data it was created for.
    ///
    /// This indicates a use-after-recycle bug in the caller.
    #[error("stale capability: {0}")]
    StaleCapability(Staleness),

    /// The input ended before the read could be satisfied.
    #[error("input truncated: {needed} more bytes needed")]
    Truncated {
        /// How many additional bytes would have been required.
        needed: u64,
    },

    /// The input or output kind has no implementation for the requested operation.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// A variable-length integer was wider than its target type allows.
    #[error("malformed variable-length integer: {width} bytes, at most {max_width} allowed")]
    MalformedVarInt {
        /// The width signalled by the length code.
        width: u32,
        /// The widest encoding the target type permits.
        max_width: u32,
    },

    /// We are forwarding an error received from the standard library's I/O APIs.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Why a capability was found to be stale.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Staleness {
    /// The page was recycled since the capability was created.
    VersionMismatch {
        /// The version the capability was created against.
        token: u64,
        /// The version the page has now.
        current: u64,
    },

    /// The version matches but nobody holds a pin on the page.
    NotPinned,

    /// The capability already released its own pin.
    Released,

    /// A page the capability spans is no longer linked into the chain.
    ChainBroken,
}

impl std::fmt::Display for Staleness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VersionMismatch { token, current } => {
                write!(f, "page version is {current} but the capability was issued for version {token}")
            }
            Self::NotPinned => f.write_str("page is not pinned by anyone"),
            Self::Released => f.write_str("the capability has already been released"),
            Self::ChainBroken => f.write_str("a spanned page is no longer linked"),
        }
    }
}

impl Error {
    /// Whether the error means the input ran out before the read completed.
    ///
    /// Unlike every other error, this one can go away once more data arrives.
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        match self {
            Self::Truncated { .. } => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }

    pub(crate) fn range(what: &'static str, requested: usize, limit: usize) -> Self {
        Self::Range {
            what,
            requested: requested as u64,
            limit: limit as u64,
        }
    }

    pub(crate) fn truncated(needed: usize) -> Self {
        Self::Truncated { needed: needed as u64 }
    }
}

/// A specialized `Result` for buffer and codec operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents the error as a standard I/O error, for use from `Read` and `Write` adapters.
impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::Io(error) => error,
            Error::Truncated { .. } => Self::new(std::io::ErrorKind::UnexpectedEof, value),
            Error::Range { .. } | Error::Unsupported(_) => Self::new(std::io::ErrorKind::InvalidInput, value),
            _ => Self::other(value),
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::io::ErrorKind;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, std::error::Error);

    #[test]
    fn truncated_is_distinguishable() {
        assert!(Error::truncated(3).is_truncated());
        assert!(Error::Io(std::io::Error::from(ErrorKind::UnexpectedEof)).is_truncated());

        assert!(!Error::Disposed.is_truncated());
        assert!(!Error::range("count", 5, 4).is_truncated());
        assert!(!Error::StaleCapability(Staleness::NotPinned).is_truncated());
        assert!(!Error::Io(std::io::Error::from(ErrorKind::BrokenPipe)).is_truncated());
    }

    #[test]
    fn into_io_error_preserves_kind() {
        let io: std::io::Error = Error::truncated(1).into();
        assert_eq!(io.kind(), ErrorKind::UnexpectedEof);

        let io: std::io::Error = Error::range("count", 2, 1).into();
        assert_eq!(io.kind(), ErrorKind::InvalidInput);

        let io: std::io::Error = Error::Io(std::io::Error::from(ErrorKind::WouldBlock)).into();
        assert_eq!(io.kind(), ErrorKind::WouldBlock);

        let io: std::io::Error = Error::Disposed.into();
        assert_eq!(io.kind(), ErrorKind::Other);
    }

    #[test]
    fn display_mentions_details() {
        let message = Error::StaleCapability(Staleness::VersionMismatch { token: 3, current: 4 }).to_string();
        assert!(message.contains("version 3"));
        assert!(message.contains('4'));

        let message = Error::range("slice end", 10, 8).to_string();
        assert_eq!(message, "slice end out of range: requested 10, limit 8");
    }
}
