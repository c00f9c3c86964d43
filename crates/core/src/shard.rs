//! Shard routing policies.
//!
//! A [`ShardFunction`] is a pure function from shard-key values to the shard
//! numbers holding them. Given the same values it must always answer the same
//! shards; the request builder relies on that to fan requests out.

use std::fmt;

use serde::Serialize;
use smallvec::SmallVec;

use crate::Value;

/// Non-empty, sorted, deduplicated set of shard numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ShardSet(SmallVec<[u32; 4]>);

impl ShardSet {
    pub fn single(shard: u32) -> Self { Self(smallvec::smallvec![shard]) }

    /// Every shard of a `count`-shard cluster (at least shard 0).
    pub fn all(count: u32) -> Self { Self((0..count.max(1)).collect()) }

    pub fn insert(&mut self, shard: u32) {
        if let Err(idx) = self.0.binary_search(&shard) { self.0.insert(idx, shard); }
    }

    pub fn union(&mut self, other: &ShardSet) {
        for s in other.iter() { self.insert(s); }
    }

    pub fn contains(&self, shard: u32) -> bool { self.0.binary_search(&shard).is_ok() }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ { self.0.iter().copied() }
    pub fn as_slice(&self) -> &[u32] { &self.0 }
}

impl FromIterator<u32> for ShardSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut set = ShardSet(SmallVec::new());
        for s in iter { set.insert(s); }
        if set.is_empty() { set.insert(0); }
        set
    }
}

/// Maps shard-key values to shard numbers.
///
/// `values` holds one value per configured shard field, in shard-field order.
pub trait ShardFunction: Send + Sync + fmt::Debug {
    fn shard_count(&self) -> u32;
    fn route(&self, values: &[Value]) -> ShardSet;
}

/// One shard holds everything. Used when no routing function is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleShard;
impl ShardFunction for SingleShard {
    fn shard_count(&self) -> u32 { 1 }
    fn route(&self, _values: &[Value]) -> ShardSet { ShardSet::single(0) }
}

/// Hash bucketing: FNV-1a over the shard-key values, modulo `shards`.
#[derive(Debug, Clone, Copy)]
pub struct ModuloShards { shards: u32 }

impl ModuloShards {
    pub fn new(shards: u32) -> Self { Self { shards: shards.max(1) } }
}

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

fn fnv1a(mut h: u64, bytes: &[u8]) -> u64 {
    for b in bytes { h ^= *b as u64; h = h.wrapping_mul(FNV_PRIME); }
    h
}

fn hash_value(h: u64, v: &Value) -> u64 {
    match v {
        Value::Nil => fnv1a(h, &[0]),
        Value::Bool(b) => fnv1a(fnv1a(h, &[1]), &[*b as u8]),
        Value::Int(i) => fnv1a(fnv1a(h, &[2]), &i.to_le_bytes()),
        Value::Float(x) => fnv1a(fnv1a(h, &[3]), &x.to_bits().to_le_bytes()),
        Value::Str(s) => fnv1a(fnv1a(h, &[4]), s.as_bytes()),
        Value::Array(items) => items.iter().fold(fnv1a(h, &[5]), hash_value),
    }
}

impl ShardFunction for ModuloShards {
    fn shard_count(&self) -> u32 { self.shards }

    fn route(&self, values: &[Value]) -> ShardSet {
        if self.shards <= 1 { return ShardSet::single(0); }
        let h = values.iter().fold(FNV_OFFSET, hash_value);
        ShardSet::single((h % self.shards as u64) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_set_is_sorted_and_deduplicated() {
        let set: ShardSet = [3, 1, 3, 0].into_iter().collect();
        assert_eq!(set.as_slice(), &[0, 1, 3]);
        let empty: ShardSet = std::iter::empty().collect();
        assert_eq!(empty.as_slice(), &[0]);
    }

    #[test]
    fn modulo_is_deterministic_and_in_range() {
        let f = ModuloShards::new(8);
        let key = [Value::Int(42), Value::from("eu")];
        let a = f.route(&key);
        assert_eq!(a, f.route(&key));
        assert_eq!(a.len(), 1);
        assert!(a.iter().all(|s| s < 8));
        assert_eq!(ModuloShards::new(0).route(&key), ShardSet::single(0));
    }

    #[test]
    fn single_shard_always_routes_to_zero() {
        assert_eq!(SingleShard.route(&[Value::Int(7)]), ShardSet::single(0));
        assert_eq!(ShardSet::all(SingleShard.shard_count()), ShardSet::single(0));
    }
}
