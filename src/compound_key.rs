//! Byte-comparable encoding of a sequence of `(Value, Direction)` pairs,
//! used as B+-tree keys by [`crate::index_manager`] (§4.1).
//!
//! Encoding per component:
//! - a tag byte (`null=0, bool=1, int=2, number=3, string=4`) so cross-type
//!   order matches [`Value`]'s total order;
//! - `Bool` → one byte;
//! - `Int` → big-endian `i64` with the sign bit flipped, so negative sorts
//!   below positive;
//! - `Number` → big-endian `f64` bits, sign-bit-flipped if non-negative,
//!   bitwise-inverted if negative — this also makes NaN (sign=0, all-ones
//!   exponent) sort above every finite positive, matching [`Value`]'s order;
//! - `String` → bytes with `0x00` escaped as `0x00 0x01`, terminated by
//!   `0x00 0x00`, so no string is a byte-prefix of another;
//! - a trailing [`crate::node_store::NodeId`] (8 big-endian bytes) ascending,
//!   guaranteeing every encoded key is unique even when the preceding fields
//!   tie.
//!
//! `Direction::Desc` on a component bitwise-NOTs every byte it emits.
//!
//! Keys are truncated past [`MAX_KEY_LEN`] rather than erroring — callers
//! must keep indexed fields within that budget (§4.1: "fails silently by
//! truncation past a fixed max key size").

use crate::node_store::NodeId;
use crate::primitives::bytes::ord;
use crate::value::{Direction, Value};

/// Fixed ceiling on encoded key length. Chosen well above the 255-byte
/// floor §4.1 asks for so a handful of indexed string fields still fit.
pub const MAX_KEY_LEN: usize = 512;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_NUMBER: u8 = 3;
const TAG_STRING: u8 = 4;

/// A fully encoded, byte-comparable key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompoundKey(pub Vec<u8>);

impl CompoundKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn has_prefix(&self, prefix: &CompoundKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn compare(&self, other: &CompoundKey) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }

    /// Smallest possible key that could appear in any tree (empty byte
    /// string).
    pub fn min() -> CompoundKey {
        CompoundKey(Vec::new())
    }

    /// A key guaranteed to sort after every key with the given prefix: the
    /// prefix followed by a single `0xFF` byte. Used to build an exclusive
    /// upper bound for prefix scans.
    pub fn max_with_prefix(prefix: &CompoundKey) -> CompoundKey {
        let mut bytes = prefix.0.clone();
        bytes.push(0xFF);
        CompoundKey(bytes)
    }
}

/// One component of a key being built: either a tagged [`Value`] or an edge
/// field, which contributes the target's raw `NodeId` instead (§3: "edge
/// fields contribute the first target's NodeId").
#[derive(Debug, Clone)]
pub enum KeyField {
    Value { value: Value, direction: Direction },
    EdgeTarget { target: NodeId, direction: Direction },
}

impl KeyField {
    pub fn asc(value: Value) -> Self {
        KeyField::Value {
            value,
            direction: Direction::Asc,
        }
    }

    pub fn new(value: Value, direction: Direction) -> Self {
        KeyField::Value { value, direction }
    }

    pub fn edge_target(target: NodeId, direction: Direction) -> Self {
        KeyField::EdgeTarget { target, direction }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            KeyField::Value { value, direction } => encode_value(value, *direction, out),
            KeyField::EdgeTarget { target, direction } => {
                let start = out.len();
                let mut buf = [0u8; 8];
                ord::put_u64_be(&mut buf, target.0);
                out.extend_from_slice(&buf);
                if *direction == Direction::Desc {
                    for b in &mut out[start..] {
                        *b = !*b;
                    }
                }
            }
        }
    }
}

fn encode_value(value: &Value, direction: Direction, out: &mut Vec<u8>) {
    let start = out.len();
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(*b as u8);
        }
        Value::Int(i) => {
            out.push(TAG_INT);
            let mut buf = [0u8; 8];
            ord::put_i64_be(&mut buf, *i);
            out.extend_from_slice(&buf);
        }
        Value::Number(n) => {
            out.push(TAG_NUMBER);
            let mut buf = [0u8; 8];
            ord::put_f64_be(&mut buf, *n);
            out.extend_from_slice(&buf);
        }
        Value::String(s) => {
            out.push(TAG_STRING);
            for &b in s.as_bytes() {
                if b == 0x00 {
                    out.push(0x00);
                    out.push(0x01);
                } else {
                    out.push(b);
                }
            }
            out.push(0x00);
            out.push(0x00);
        }
    }
    if direction == Direction::Desc {
        for b in &mut out[start..] {
            *b = !*b;
        }
    }
}

fn append_node_id(id: NodeId, out: &mut Vec<u8>) {
    out.extend_from_slice(&id.0.to_be_bytes());
}

fn truncate(mut bytes: Vec<u8>) -> Vec<u8> {
    bytes.truncate(MAX_KEY_LEN);
    bytes
}

/// Encodes a full index key: the node's indexed fields (in index-definition
/// order) followed by the node's own id ascending, so the key is unique
/// even when every indexed field ties with another node's.
pub fn encode_full(fields: &[KeyField], node: NodeId) -> CompoundKey {
    let mut out = Vec::with_capacity(16 * (fields.len() + 1));
    for field in fields {
        field.encode_into(&mut out);
    }
    append_node_id(node, &mut out);
    CompoundKey(truncate(out))
}

/// Encodes a prefix (equality values only, no trailing node id) for range
/// scans and coverage lookups.
pub fn encode_partial(fields: &[KeyField]) -> CompoundKey {
    let mut out = Vec::with_capacity(16 * fields.len());
    for field in fields {
        field.encode_into(&mut out);
    }
    CompoundKey(truncate(out))
}

/// Encodes a prefix that starts with an edge field (the edge's target
/// `NodeId`, per §3 "edge fields contribute the first target's NodeId"),
/// used by cross-entity indexes to scope a scan to one parent. Encoded as
/// raw 8-byte big-endian (NodeId is already unsigned-ascending) rather than
/// through the tagged `Value` path, since an edge field is never compared
/// against a differently-typed field.
pub fn encode_edge_prefix(target: NodeId, direction: Direction) -> CompoundKey {
    let mut out = target.0.to_be_bytes().to_vec();
    if direction == Direction::Desc {
        for b in &mut out {
            *b = !*b;
        }
    }
    CompoundKey(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(values: &[(Value, Direction)], node: NodeId) -> Vec<u8> {
        let fields: Vec<KeyField> = values
            .iter()
            .cloned()
            .map(|(v, d)| KeyField::new(v, d))
            .collect();
        encode_full(&fields, node).0
    }

    #[test]
    fn cross_type_order_is_preserved() {
        let node = NodeId(1);
        let null_key = key(&[(Value::Null, Direction::Asc)], node);
        let bool_key = key(&[(Value::Bool(false), Direction::Asc)], node);
        let int_key = key(&[(Value::Int(i64::MIN), Direction::Asc)], node);
        let num_key = key(&[(Value::Number(f64::MIN), Direction::Asc)], node);
        let str_key = key(&[(Value::String(String::new()), Direction::Asc)], node);
        assert!(null_key < bool_key);
        assert!(bool_key < int_key);
        assert!(int_key < num_key);
        assert!(num_key < str_key);
    }

    #[test]
    fn int_order_matches_value_order() {
        let node = NodeId(1);
        let mut ints = vec![-100i64, -1, 0, 1, 100, i64::MIN, i64::MAX];
        let mut encoded: Vec<(i64, Vec<u8>)> = ints
            .iter()
            .map(|&i| (i, key(&[(Value::Int(i), Direction::Asc)], node)))
            .collect();
        encoded.sort_by(|a, b| a.1.cmp(&b.1));
        ints.sort();
        let sorted_ints: Vec<i64> = encoded.into_iter().map(|(i, _)| i).collect();
        assert_eq!(sorted_ints, ints);
    }

    #[test]
    fn float_order_matches_value_order_including_nan() {
        let node = NodeId(1);
        let mut floats = vec![f64::MIN, -1.5, -0.0, 0.0, 1.5, f64::MAX, f64::NAN];
        let mut encoded: Vec<(usize, Vec<u8>)> = floats
            .iter()
            .enumerate()
            .map(|(i, &f)| (i, key(&[(Value::Number(f), Direction::Asc)], node)))
            .collect();
        encoded.sort_by(|a, b| a.1.cmp(&b.1));
        let order: Vec<usize> = encoded.into_iter().map(|(i, _)| i).collect();
        // NaN (index 6) must come last; everything else is already ascending.
        assert_eq!(*order.last().unwrap(), 6);
        assert_eq!(&order[..6], &[0, 1, 2, 3, 4, 5]);
        let _ = &mut floats;
    }

    #[test]
    fn descending_direction_reverses_byte_order() {
        let node = NodeId(1);
        let a = key(&[(Value::Int(1), Direction::Desc)], node);
        let b = key(&[(Value::Int(2), Direction::Desc)], node);
        assert!(a > b, "descending int 1 must sort after descending int 2");
    }

    #[test]
    fn trailing_node_id_breaks_ties() {
        let fields = [KeyField::asc(Value::Int(5))];
        let a = encode_full(&fields, NodeId(1));
        let b = encode_full(&fields, NodeId(2));
        assert!(a < b);
    }

    #[test]
    fn string_escaping_prevents_prefix_collisions() {
        let node = NodeId(1);
        let short = key(&[(Value::String("ab".into()), Direction::Asc)], node);
        let long = key(&[(Value::String("ab\u{0}c".into()), Direction::Asc)], node);
        // "ab" terminator (0x00 0x00) must sort before "ab\0c"'s escaped
        // 0x00 byte (0x00 0x01), so short < long even though short's bytes
        // are a literal prefix of long's up to the terminator.
        assert!(short < long);
    }

    #[test]
    fn has_prefix_detects_edge_scope() {
        let prefix = encode_partial(&[KeyField::asc(Value::Int(42))]);
        let full = encode_full(&[KeyField::asc(Value::Int(42))], NodeId(7));
        assert!(full.has_prefix(&prefix));
        let other_prefix = encode_partial(&[KeyField::asc(Value::Int(43))]);
        assert!(!full.has_prefix(&other_prefix));
    }
}
