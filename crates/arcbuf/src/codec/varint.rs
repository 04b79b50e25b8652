// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Variable-length integer wire format.
//!
//! A value is shifted left past a unary length code held in the low bits of the first bytes: the
//! number of trailing zero bits before the first set bit tells how many bytes follow the first
//! one. The encoding is little-endian, so the narrowest value that needs `w` bytes occupies
//! `7 * w` payload bits:
//!
//! | value bits | width | first byte  |
//! |------------|-------|-------------|
//! | 0..=7      | 1     | `xxxx_xxx1` |
//! | 8..=14     | 2     | `xxxx_xx10` |
//! | 15..=21    | 3     | `xxxx_x100` |
//! | ...        | ...   | ...         |
//! | 57..=63    | 9     | `0000_0000`, second byte `xxxx_xxx1` |
//! | 64         | 10    | `0000_0000`, second byte `xxxx_xx10` |
//!
//! A `u32` is at most 5 bytes wide and a `u64` at most 10.
//!
//! Signed values are mapped to unsigned ones with zigzag encoding first, so that values of small
//! magnitude stay narrow whatever their sign.

use crate::{Error, Result};

/// Widest encoding of a `u32`.
pub const MAX_VAR_U32_LEN: usize = 5;

/// Widest encoding of a `u64`.
pub const MAX_VAR_U64_LEN: usize = 10;

/// Number of bytes [`Writer::write_var_u32()`][crate::codec::Writer::write_var_u32] emits for `value`.
#[must_use]
pub const fn encoded_len_u32(value: u32) -> usize {
    ((value | 1).ilog2() / 7) as usize + 1
}

/// Number of bytes [`Writer::write_var_u64()`][crate::codec::Writer::write_var_u64] emits for `value`.
#[must_use]
pub const fn encoded_len_u64(value: u64) -> usize {
    ((value | 1).ilog2() / 7) as usize + 1
}

/// Maps a signed value onto an unsigned one, interleaving positive and negative values.
#[must_use]
pub const fn zigzag_encode_32(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)).cast_unsigned()
}

/// Reverses [`zigzag_encode_32()`].
#[must_use]
pub const fn zigzag_decode_32(value: u32) -> i32 {
    (value >> 1).cast_signed() ^ (value & 1).cast_signed().wrapping_neg()
}

/// Maps a signed value onto an unsigned one, interleaving positive and negative values.
#[must_use]
pub const fn zigzag_encode_64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)).cast_unsigned()
}

/// Reverses [`zigzag_encode_64()`].
#[must_use]
pub const fn zigzag_decode_64(value: u64) -> i64 {
    (value >> 1).cast_signed() ^ (value & 1).cast_signed().wrapping_neg()
}

/// Encodes a `u32` into the low bytes of a word. Only the first `width` bytes are meaningful.
pub(crate) fn encode_u32(value: u32) -> ([u8; 8], usize) {
    let extra = encoded_len_u32(value) - 1;
    let word = ((u64::from(value) << 1) | 1) << extra;

    (word.to_le_bytes(), extra + 1)
}

/// Encodes a `u64` into ten bytes. Only the first `width` bytes are meaningful.
pub(crate) fn encode_u64(value: u64) -> ([u8; MAX_VAR_U64_LEN], usize) {
    let extra = encoded_len_u64(value) - 1;

    // The shifted value no longer fits a word beyond 8 bytes; the bits shifted out continue in
    // the trailing two bytes.
    let lower = ((value << 1) | 1) << extra;
    let upper = (value >> (63 - extra)).to_le_bytes();

    let mut bytes = [0; MAX_VAR_U64_LEN];
    bytes[..8].copy_from_slice(&lower.to_le_bytes());
    bytes[8] = upper[0];
    bytes[9] = upper[1];

    (bytes, extra + 1)
}

/// Width of a `u32` encoding, given its first byte.
pub(crate) fn width_u32(header: u8) -> Result<usize> {
    let width = (0x100 | u32::from(header)).trailing_zeros() as usize + 1;
    check_width(width, MAX_VAR_U32_LEN)
}

/// Width of a `u64` encoding, given its first byte and (only consulted if the first byte is zero)
/// its second byte.
pub(crate) fn width_u64(header: u8, second: impl FnOnce() -> Result<u8>) -> Result<usize> {
    if header != 0 {
        return Ok(header.trailing_zeros() as usize + 1);
    }

    let width = (0x100 | u32::from(second()?)).trailing_zeros() as usize + 9;
    check_width(width, MAX_VAR_U64_LEN)
}

/// Decodes a `u32` from the start of `bytes`, returning the value and the encoded width.
///
/// Bytes beyond the encoded width are ignored, whatever they hold.
pub(crate) fn decode_u32(bytes: [u8; 8]) -> Result<(u32, usize)> {
    let word = u64::from_le_bytes(bytes);
    let low_half = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);

    // A zero low half gives 33, which is rejected like any other over-wide code.
    let width = low_half.trailing_zeros() as usize + 1;
    let width = check_width(width, MAX_VAR_U32_LEN)?;

    let value = (word & low_bits(width * 8)) >> width;
    let value = u32::try_from(value).map_err(|_overflow| Error::MalformedVarInt {
        width: width_u32_for_error(width),
        max_width: width_u32_for_error(MAX_VAR_U32_LEN),
    })?;

    Ok((value, width))
}

/// Decodes a `u64` from the start of `bytes`, returning the value and the encoded width.
///
/// Bytes beyond the encoded width are ignored, whatever they hold.
pub(crate) fn decode_u64(bytes: [u8; MAX_VAR_U64_LEN]) -> Result<(u64, usize)> {
    let mut lower = [0; 8];
    lower.copy_from_slice(&bytes[..8]);
    let word = u64::from_le_bytes(lower);

    let width = word.trailing_zeros() as usize + 1;
    let width = check_width(width, MAX_VAR_U64_LEN)?;

    // The length code consumes `width` bits, so the two trailing bytes continue right after the
    // 64 - `width` payload bits held by the word.
    let upper = u64::from(u16::from_le_bytes([bytes[8], bytes[9]]));
    let value = (word >> width) | (upper << (64 - width));

    let mask = match width {
        MAX_VAR_U64_LEN => u64::MAX,
        _ => low_bits(width * 7),
    };

    Ok((value & mask, width))
}

fn check_width(width: usize, max_width: usize) -> Result<usize> {
    if width > max_width {
        return Err(Error::MalformedVarInt {
            width: width_u32_for_error(width),
            max_width: width_u32_for_error(max_width),
        });
    }

    Ok(width)
}

#[expect(clippy::cast_possible_truncation, reason = "widths are at most 65")]
const fn width_u32_for_error(width: usize) -> u32 {
    width as u32
}

/// A mask of the low `bits` bits, for `bits` below 64.
const fn low_bits(bits: usize) -> u64 {
    (1 << bits) - 1
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    const U32_BOUNDARIES: &[u32] = &[
        0,
        1,
        127,
        128,
        16_383,
        16_384,
        2_097_151,
        2_097_152,
        268_435_455,
        268_435_456,
        u32::MAX,
    ];

    fn u64_boundaries() -> Vec<u64> {
        let mut values = vec![0, 1, u64::MAX];
        for width in 1..=9 {
            let largest = (1_u64 << (7 * width)) - 1;
            values.push(largest);
            values.push(largest + 1);
        }
        values.push(u64::MAX - 1);
        values
    }

    fn minimal_width(bits: u32) -> usize {
        (bits.max(1) as usize).div_ceil(7)
    }

    #[test]
    fn known_encodings() {
        assert_eq!(encode_u32(0).0[0], 0b0000_0001);
        assert_eq!(encode_u32(1).0[0], 0b0000_0011);
        assert_eq!(encode_u32(127).0[0], 0b1111_1111);

        let (bytes, width) = encode_u32(128);
        assert_eq!(width, 2);
        assert_eq!(&bytes[..2], &[0b0000_0010, 0b0000_0010]);
    }

    #[test]
    fn u32_round_trip_at_boundaries() {
        for &value in U32_BOUNDARIES {
            let (bytes, width) = encode_u32(value);
            assert_eq!(width, encoded_len_u32(value));
            assert_eq!(width, minimal_width(32 - value.leading_zeros()), "value {value}");

            assert_eq!(decode_u32(bytes).unwrap(), (value, width), "value {value}");
        }
    }

    #[test]
    fn u64_round_trip_at_boundaries() {
        for value in u64_boundaries() {
            let (bytes, width) = encode_u64(value);
            assert_eq!(width, encoded_len_u64(value));
            assert_eq!(width, minimal_width(64 - value.leading_zeros()).min(MAX_VAR_U64_LEN), "value {value}");

            assert_eq!(decode_u64(bytes).unwrap(), (value, width), "value {value}");
        }
    }

    #[test]
    fn decode_ignores_trailing_garbage() {
        for &value in U32_BOUNDARIES {
            let (mut bytes, width) = encode_u32(value);
            bytes[width..].fill(0xFF);
            assert_eq!(decode_u32(bytes).unwrap(), (value, width));
        }

        for value in u64_boundaries() {
            let (mut bytes, width) = encode_u64(value);
            bytes[width..].fill(0xFF);
            assert_eq!(decode_u64(bytes).unwrap(), (value, width));
        }
    }

    #[test]
    fn u32_and_u64_encodings_agree() {
        for &value in U32_BOUNDARIES {
            let (narrow, width) = encode_u32(value);
            let (wide, wide_width) = encode_u64(u64::from(value));

            assert_eq!(width, wide_width);
            assert_eq!(&narrow[..width], &wide[..width]);
        }
    }

    #[test]
    fn over_wide_u32_is_rejected() {
        // Length code for six bytes.
        let bytes = [0b0010_0000, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            decode_u32(bytes),
            Err(Error::MalformedVarInt { width: 6, max_width: 5 })
        ));

        assert!(matches!(decode_u32([0; 8]), Err(Error::MalformedVarInt { width: 33, .. })));

        assert!(matches!(width_u32(0b0100_0000), Err(Error::MalformedVarInt { width: 7, .. })));
        assert!(matches!(width_u32(0), Err(Error::MalformedVarInt { width: 9, .. })));
        assert_eq!(width_u32(0b1000).unwrap(), 4);
    }

    #[test]
    fn five_byte_u32_above_range_is_rejected() {
        // Five bytes carry 35 payload bits; set one above bit 31.
        let value = 1_u64 << 33;
        let word = ((value << 1) | 1) << 4;
        assert!(matches!(
            decode_u32(word.to_le_bytes()),
            Err(Error::MalformedVarInt { width: 5, max_width: 5 })
        ));
    }

    #[test]
    fn u64_width_from_header() {
        assert_eq!(width_u64(1, || unreachable!()).unwrap(), 1);
        assert_eq!(width_u64(0b1000_0000, || unreachable!()).unwrap(), 8);
        assert_eq!(width_u64(0, || Ok(1)).unwrap(), 9);
        assert_eq!(width_u64(0, || Ok(0b10)).unwrap(), 10);
        assert!(matches!(
            width_u64(0, || Ok(0b100)),
            Err(Error::MalformedVarInt { width: 11, max_width: 10 })
        ));
        assert!(matches!(width_u64(0, || Err(Error::truncated(1))), Err(Error::Truncated { .. })));
    }

    #[test]
    fn over_wide_u64_is_rejected() {
        let mut bytes = [0; MAX_VAR_U64_LEN];
        bytes[1] = 0b0000_0100;
        assert!(matches!(
            decode_u64(bytes),
            Err(Error::MalformedVarInt { width: 11, max_width: 10 })
        ));
    }

    #[test]
    fn zigzag() {
        for (signed, unsigned) in [(0, 0), (-1, 1), (1, 2), (-2, 3), (i32::MAX, u32::MAX - 1), (i32::MIN, u32::MAX)] {
            assert_eq!(zigzag_encode_32(signed), unsigned);
            assert_eq!(zigzag_decode_32(unsigned), signed);
        }

        for (signed, unsigned) in [(0, 0), (-1, 1), (1, 2), (i64::MAX, u64::MAX - 1), (i64::MIN, u64::MAX)] {
            assert_eq!(zigzag_encode_64(signed), unsigned);
            assert_eq!(zigzag_decode_64(unsigned), signed);
        }
    }
}
