// VCDIFF variable-length integers (RFC 3284, Section 2).
//
// Base-128, big-endian: most-significant group first.
// Each byte has bit 7 set except the final byte.
// Identical to xdelta3's `xd3_read_size` / `xd3_emit_size`.

use std::io::{self, Read, Write};

/// Maximum encoded length for a 64-bit value (ceil(64/7) = 10).
const MAX_VARINT_LEN: usize = 10;

/// Overflow guard for 32-bit accumulator: if these bits are set before a
/// shift, the next `<< 7` would overflow.
const U32_OVERFLOW_MASK: u32 = 0xFE00_0000;

/// Overflow guard for 64-bit accumulator.
const U64_OVERFLOW_MASK: u64 = 0xFE00_0000_0000_0000;

// ---------------------------------------------------------------------------
// Decoding from byte slices
// ---------------------------------------------------------------------------

/// Decode a `u64` from a byte slice.
/// Returns `(value, bytes_consumed)` or an error.
///
/// Matches xdelta3 `READ_INTEGER_TYPE` with `UINT64_OFLOW_MASK`.
pub fn read_u64(data: &[u8]) -> Result<(u64, usize), VarIntError> {
    let mut val: u64 = 0;
    for (i, &byte) in data.iter().enumerate() {
        if val & U64_OVERFLOW_MASK != 0 {
            return Err(VarIntError::Overflow);
        }
        val = (val << 7) | u64::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Ok((val, i + 1));
        }
    }
    Err(VarIntError::Underflow)
}

/// Decode a `u32` from a byte slice.
pub fn read_u32(data: &[u8]) -> Result<(u32, usize), VarIntError> {
    let mut val: u32 = 0;
    for (i, &byte) in data.iter().enumerate() {
        if val & U32_OVERFLOW_MASK != 0 {
            return Err(VarIntError::Overflow);
        }
        val = (val << 7) | u32::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Ok((val, i + 1));
        }
    }
    Err(VarIntError::Underflow)
}

// ---------------------------------------------------------------------------
// Decoding from `Read` (header parsing)
// ---------------------------------------------------------------------------

/// Read a `u64` varint from a streaming source.
///
/// A truncated integer surfaces as `UnexpectedEof`, which the streaming
/// decoder treats as "need more input".
pub fn stream_read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut val: u64 = 0;
    let mut buf = [0u8; 1];
    loop {
        r.read_exact(&mut buf)?;
        let byte = buf[0];
        if val & U64_OVERFLOW_MASK != 0 {
            return Err(VarIntError::Overflow.into());
        }
        val = (val << 7) | u64::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Ok(val);
        }
    }
}

/// Read a `usize` varint from a streaming source.
pub fn stream_read_usize<R: Read>(r: &mut R) -> io::Result<usize> {
    let val = stream_read_u64(r)?;
    usize::try_from(val).map_err(|_| VarIntError::Overflow.into())
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode a `u64` into the tail of `buf`.
/// Returns the number of bytes written (1..=10).
///
/// Matches xdelta3 `EMIT_INTEGER_TYPE`: fills the scratch buffer from the
/// end, MSB set on all bytes, then clears MSB on the final byte.
#[inline]
pub fn encode_u64(mut num: u64, buf: &mut [u8; MAX_VARINT_LEN]) -> usize {
    let mut i = MAX_VARINT_LEN;
    loop {
        i -= 1;
        buf[i] = (num as u8 & 0x7F) | 0x80;
        num >>= 7;
        if num == 0 {
            break;
        }
    }
    buf[MAX_VARINT_LEN - 1] &= 0x7F;
    MAX_VARINT_LEN - i
}

/// Encode a `u64` and write it to a `Write` sink.
pub fn write_u64<W: Write>(w: &mut W, num: u64) -> io::Result<()> {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let len = encode_u64(num, &mut buf);
    w.write_all(&buf[MAX_VARINT_LEN - len..])
}

/// Return the encoded byte-length of a `u64` value.
/// Matches xdelta3 `xd3_sizeof_uint64_t`.
#[inline]
pub fn sizeof_u64(num: u64) -> usize {
    let bits = 64 - num.leading_zeros();
    (bits.max(1).div_ceil(7) as usize).min(MAX_VARINT_LEN)
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VarIntError {
    /// Not enough input bytes to complete the integer.
    #[error("varint underflow (truncated input)")]
    Underflow,
    /// Value would overflow the target integer type.
    #[error("varint overflow")]
    Overflow,
}

impl From<VarIntError> for io::Error {
    fn from(e: VarIntError) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, e)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_encodings() {
        assert_eq!(read_u64(&[0x00]).unwrap(), (0, 1));
        assert_eq!(read_u64(&[0x7F]).unwrap(), (127, 1));
        assert_eq!(read_u64(&[0x81, 0x00]).unwrap(), (128, 2));
        // 300 = (10) (0101100)
        assert_eq!(read_u64(&[0x82, 0x2C]).unwrap(), (300, 2));
        assert_eq!(read_u32(&[0x82, 0x2C, 0xFF]).unwrap(), (300, 2));
    }

    #[test]
    fn encode_matches_decode() {
        let cases: &[u64] = &[0, 1, 127, 128, 16383, 16384, u32::MAX as u64, u64::MAX];
        let mut buf = [0u8; MAX_VARINT_LEN];
        for &val in cases {
            let len = encode_u64(val, &mut buf);
            let (decoded, consumed) = read_u64(&buf[MAX_VARINT_LEN - len..]).unwrap();
            assert_eq!(decoded, val);
            assert_eq!(consumed, len);
            assert_eq!(sizeof_u64(val), len, "sizeof mismatch for {val}");
        }
    }

    #[test]
    fn overflow_detection_u32() {
        let mut buf = [0u8; MAX_VARINT_LEN];
        let len = encode_u64(u64::MAX, &mut buf);
        let result = read_u32(&buf[MAX_VARINT_LEN - len..]);
        assert_eq!(result, Err(VarIntError::Overflow));
    }

    #[test]
    fn underflow_detection() {
        let data = [0x80, 0x80, 0x80];
        assert_eq!(read_u64(&data), Err(VarIntError::Underflow));
        assert_eq!(read_u64(&[]), Err(VarIntError::Underflow));
    }

    #[test]
    fn truncated_stream_is_unexpected_eof() {
        let mut cursor = std::io::Cursor::new([0x81u8, 0x80]);
        let err = stream_read_u64(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn write_then_stream_read() {
        let mut out = Vec::new();
        write_u64(&mut out, 123_456_789).unwrap();
        let mut cursor = std::io::Cursor::new(&out);
        assert_eq!(stream_read_u64(&mut cursor).unwrap(), 123_456_789);
        assert_eq!(cursor.position() as usize, out.len());
    }
}
