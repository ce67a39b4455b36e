//! A one-to-many map from key to an insertion-ordered set of values, used
//! by the inverted edge index (§4.6: "target id -> set of (source id,
//! edge id) pairs referencing it") and by per-type subscription
//! registries (§4.7).

use std::hash::Hash;

use rustc_hash::FxHashMap;

#[derive(Debug, Clone)]
pub struct KeyedMap<K, V> {
    map: FxHashMap<K, Vec<V>>,
}

impl<K, V> Default for KeyedMap<K, V> {
    fn default() -> Self {
        KeyedMap { map: FxHashMap::default() }
    }
}

impl<K, V> KeyedMap<K, V>
where
    K: Eq + Hash + Clone,
    V: PartialEq,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `value` under `key` unless it's already present for that key.
    pub fn insert(&mut self, key: K, value: V) {
        let bucket = self.map.entry(key).or_default();
        if !bucket.contains(&value) {
            bucket.push(value);
        }
    }

    /// Removes one occurrence of `value` under `key`. Drops the bucket
    /// entirely once empty so [`Self::len_keys`] reflects only live keys.
    pub fn remove(&mut self, key: &K, value: &V) {
        if let Some(bucket) = self.map.get_mut(key) {
            bucket.retain(|v| v != value);
            if bucket.is_empty() {
                self.map.remove(key);
            }
        }
    }

    pub fn get(&self, key: &K) -> &[V] {
        self.map.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn remove_key(&mut self, key: &K) -> Vec<V> {
        self.map.remove(key).unwrap_or_default()
    }

    pub fn len_keys(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Keys whose bucket contains at least one value satisfying `pred`.
    /// `O(keys * bucket size)`; used for the rare reverse lookups (scrubbing
    /// every bucket a given source might appear in) that don't go through
    /// the primary key.
    pub fn keys_matching<'a, F>(&'a self, pred: F) -> impl Iterator<Item = K> + 'a
    where
        F: Fn(&[V]) -> bool + 'a,
    {
        self.map
            .iter()
            .filter(move |(_, bucket)| pred(bucket))
            .map(|(k, _)| k.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_dedups_and_remove_drops_empty_bucket() {
        let mut m: KeyedMap<u64, u64> = KeyedMap::new();
        m.insert(1, 10);
        m.insert(1, 10);
        m.insert(1, 20);
        assert_eq!(m.get(&1), &[10, 20]);

        m.remove(&1, &10);
        assert_eq!(m.get(&1), &[20]);
        m.remove(&1, &20);
        assert!(!m.contains_key(&1));
        assert!(m.is_empty());
    }

    #[test]
    fn distinct_keys_do_not_interfere() {
        let mut m: KeyedMap<u64, u64> = KeyedMap::new();
        m.insert(1, 100);
        m.insert(2, 200);
        assert_eq!(m.get(&1), &[100]);
        assert_eq!(m.get(&2), &[200]);
        m.remove_key(&1);
        assert!(!m.contains_key(&1));
        assert_eq!(m.get(&2), &[200]);
    }
}
