//! Script number encoding
//!
//! Stack elements that feed arithmetic are little-endian sign-magnitude
//! scalars: magnitude bytes least-significant first, with the sign bit
//! in the most significant bit of the final byte. Zero is the empty
//! byte sequence. The 4-byte operand limit is enforced where numbers
//! are popped, not here, so untouched oversized data can still ride the
//! stack.

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::Zero;

/// Serialize a number to its minimal sign-magnitude form.
pub fn encode(n: &BigInt) -> Vec<u8> {
    if n.is_zero() {
        return Vec::new();
    }
    let negative = n.sign() == Sign::Minus;
    let mut bytes = n.magnitude().to_bytes_le();
    if bytes.last().copied().unwrap_or(0) & 0x80 != 0 {
        // Top magnitude bit is taken; the sign needs a byte of its own.
        bytes.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        let last = bytes.last_mut().expect("non-zero number has bytes");
        *last |= 0x80;
    }
    bytes
}

/// Parse a sign-magnitude scalar. Accepts any length; callers enforce
/// operand size limits.
pub fn decode(data: &[u8]) -> BigInt {
    if data.is_empty() {
        return BigInt::zero();
    }
    let mut bytes = data.to_vec();
    let last = bytes.last_mut().expect("checked non-empty");
    let negative = *last & 0x80 != 0;
    *last &= 0x7f;
    let magnitude = BigUint::from_bytes_le(&bytes);
    if negative {
        -BigInt::from(magnitude)
    } else {
        BigInt::from(magnitude)
    }
}

/// Truthiness of a stack element: false iff every byte is zero, or the
/// element is a negative zero (all zeros below a trailing 0x80).
pub fn cast_to_bool(data: &[u8]) -> bool {
    for (i, byte) in data.iter().enumerate() {
        if *byte != 0 {
            return !(i == data.len() - 1 && *byte == 0x80);
        }
    }
    false
}

/// Encode a small machine integer, the common case for opcode results.
pub fn encode_i64(n: i64) -> Vec<u8> {
    encode(&BigInt::from(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(n: i64, expected: &[u8]) {
        let encoded = encode(&BigInt::from(n));
        assert_eq!(encoded, expected, "encoding of {n}");
        assert_eq!(decode(&encoded), BigInt::from(n), "round-trip of {n}");
    }

    #[test]
    fn test_encode_vectors() {
        check(0, &[]);
        check(1, &[0x01]);
        check(-1, &[0x81]);
        check(127, &[0x7f]);
        check(-127, &[0xff]);
        check(128, &[0x80, 0x00]);
        check(-128, &[0x80, 0x80]);
        check(255, &[0xff, 0x00]);
        check(256, &[0x00, 0x01]);
        check(-255, &[0xff, 0x80]);
        check(0x7fff_ffff, &[0xff, 0xff, 0xff, 0x7f]);
        check(-0x7fff_ffff, &[0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn test_decode_tolerates_padding() {
        // Non-minimal forms still decode to the same value.
        assert_eq!(decode(&[0x01, 0x00]), BigInt::from(1));
        assert_eq!(decode(&[0x01, 0x80]), BigInt::from(-1));
        assert_eq!(decode(&[0x00, 0x00]), BigInt::zero());
        assert_eq!(decode(&[0x00, 0x80]), BigInt::zero());
    }

    #[test]
    fn test_cast_to_bool() {
        assert!(!cast_to_bool(&[]));
        assert!(!cast_to_bool(&[0x00]));
        assert!(!cast_to_bool(&[0x00, 0x00]));
        assert!(!cast_to_bool(&[0x80]));
        assert!(!cast_to_bool(&[0x00, 0x80]));
        assert!(cast_to_bool(&[0x01]));
        assert!(cast_to_bool(&[0x80, 0x00]));
        assert!(cast_to_bool(&[0x00, 0x01]));
        assert!(cast_to_bool(&[0x01, 0x80]));
    }
}
