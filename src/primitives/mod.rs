//! Low-level, allocation-conscious building blocks shared by the node
//! store, index manager, and view engine (§9: "compile-time generic
//! containers parameterised by field names" are re-expressed here as
//! ordinary generic types over an injected comparator, rather than a
//! macro naming prev/next fields by string).

/// Byte-level utilities and order-preserving encoding, shared with
/// [`crate::compound_key`].
pub mod bytes;

/// A key-grouped map (one key to many values), used by the inverted edge
/// index and per-type subscription registries.
pub mod keyed_map;

/// A sorted array with an injected three-way comparator, used for edge
/// target lists and view result sets.
pub mod sorted_vec;
