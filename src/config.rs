//! Tunables the spec leaves as implementation parameters rather than
//! protocol: compound-key byte budget, B+ tree fanout, rollup cascade
//! depth guard, and the default viewport height a freshly activated view
//! starts with (§4.1, §4.2, §4.5, §4.8).
//!
//! Modeled on the teacher's `db::config::Config`/`SyncMode` shape: a plain
//! struct with a `Default` impl plus a couple of named presets, minus every
//! field that names disk, WAL, or mmap behavior (§2 of `SPEC_FULL.md`).

/// A named preset for [`GraphConfig`], the way the teacher's `SyncMode`
/// selects a durability/throughput tradeoff; here the tradeoff is memory
/// footprint versus tree depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigProfile {
    /// Small fanout, shallow cascade guard — good for unit tests where
    /// stressing tree splits matters more than raw throughput.
    Compact,
    /// The defaults: fanout and cascade depth sized for typical
    /// interactive-UI graphs.
    Balanced,
    /// Wide fanout for large graphs where tree depth dominates lookup cost.
    Wide,
}

#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Ceiling on an encoded [`crate::compound_key::CompoundKey`]'s byte
    /// length; fields beyond it are silently truncated (§4.1).
    pub max_key_len: usize,
    /// Minimum fanout for [`crate::btree::BTree`] nodes before a split is
    /// forced (§4.2).
    pub btree_min_fanout: usize,
    /// Guard against runaway rollup cascades on a schema with a (notionally
    /// impossible, per §4.5) dependency cycle.
    pub max_rollup_cascade_depth: usize,
    /// Height a freshly constructed [`crate::view::View`] uses before the
    /// caller calls `set_height`.
    pub default_viewport_height: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        GraphConfig::balanced()
    }
}

impl GraphConfig {
    pub fn from_profile(profile: ConfigProfile) -> Self {
        match profile {
            ConfigProfile::Compact => GraphConfig::compact(),
            ConfigProfile::Balanced => GraphConfig::balanced(),
            ConfigProfile::Wide => GraphConfig::wide(),
        }
    }

    pub fn compact() -> Self {
        GraphConfig {
            max_key_len: 256,
            btree_min_fanout: 4,
            max_rollup_cascade_depth: 32,
            default_viewport_height: 20,
        }
    }

    pub fn balanced() -> Self {
        GraphConfig {
            max_key_len: 512,
            btree_min_fanout: 16,
            max_rollup_cascade_depth: 64,
            default_viewport_height: 50,
        }
    }

    pub fn wide() -> Self {
        GraphConfig {
            max_key_len: 512,
            btree_min_fanout: 64,
            max_rollup_cascade_depth: 64,
            default_viewport_height: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_balanced() {
        let default = GraphConfig::default();
        let balanced = GraphConfig::balanced();
        assert_eq!(default.max_key_len, balanced.max_key_len);
        assert_eq!(default.btree_min_fanout, balanced.btree_min_fanout);
    }

    #[test]
    fn profiles_are_distinct() {
        let compact = GraphConfig::compact();
        let wide = GraphConfig::wide();
        assert!(compact.btree_min_fanout < wide.btree_min_fanout);
    }
}
