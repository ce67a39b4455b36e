#![forbid(unsafe_code)]
//! Order-preserving numeric encoders shared by [`crate::compound_key`].
//!
//! These are the per-component building blocks; `compound_key` composes
//! them with a tag byte and a direction flip to get the full codec §4.1
//! describes.

pub mod ord {
    //! Order-preserving encoders for big-endian fixed-width integers and
    //! floats.

    use core::convert::TryInto;

    const U64_LEN: usize = core::mem::size_of::<u64>();
    const SIGN_BIT: u64 = 1 << 63;

    /// Big-endian encoding for lexicographic order preservation.
    pub fn put_u64_be(dst: &mut [u8], v: u64) {
        assert!(dst.len() >= U64_LEN, "destination too small");
        dst[..U64_LEN].copy_from_slice(&v.to_be_bytes());
    }

    /// Decodes a u64 from big-endian byte order.
    pub fn get_u64_be(src: &[u8]) -> u64 {
        let head = src
            .get(..U64_LEN)
            .unwrap_or_else(|| panic!("u64 source shorter than 8 bytes (have {})", src.len()));
        let bytes: [u8; U64_LEN] = head.try_into().unwrap();
        u64::from_be_bytes(bytes)
    }

    /// Encodes a signed i64 with order preservation (flip sign bit for sorting).
    pub fn put_i64_be(dst: &mut [u8], v: i64) {
        let flipped = (v as u64) ^ SIGN_BIT;
        put_u64_be(dst, flipped);
    }

    /// Decodes a signed i64 with order preservation.
    pub fn get_i64_be(src: &[u8]) -> i64 {
        let flipped = get_u64_be(src);
        let raw = flipped ^ SIGN_BIT;
        raw as i64
    }

    /// Encodes an f64 with order preservation. NaN is accepted and sorts
    /// above every finite value, matching [`crate::value::Value`]'s total
    /// order.
    pub fn put_f64_be(dst: &mut [u8], v: f64) {
        let bits = encode_f64_bits(v);
        put_u64_be(dst, bits);
    }

    /// Decodes an f64 with order preservation.
    pub fn get_f64_be(src: &[u8]) -> f64 {
        let bits = get_u64_be(src);
        let decoded = decode_f64_bits(bits);
        f64::from_bits(decoded)
    }

    fn encode_f64_bits(v: f64) -> u64 {
        let bits = v.to_bits();
        if bits & SIGN_BIT != 0 && !v.is_nan() {
            !bits
        } else {
            bits ^ SIGN_BIT
        }
    }

    fn decode_f64_bits(encoded: u64) -> u64 {
        if encoded & SIGN_BIT != 0 {
            encoded ^ SIGN_BIT
        } else {
            !encoded
        }
    }
}
