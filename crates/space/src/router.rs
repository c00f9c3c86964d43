//! Shard routing over the configured shard-key fields.

use std::sync::Arc;

use smallvec::SmallVec;
use spacekit_core::{ShardFunction, ShardSet, SpaceError, SpaceResult, Value, TAIL};
use spacekit_schema::{FieldSchema, IndexCatalog};

/// Resolves which shards a tuple, key or key batch touches.
///
/// Shard-key fields are located once: as tuple positions for writes, and as
/// offsets inside every index that contains all of them for key lookups.
/// Whenever the shard key cannot be fully read from the input the request
/// fans out to every shard.
#[derive(Debug, Clone)]
pub struct ShardRouter {
    fields: Vec<String>,
    positions: SmallVec<[usize; 4]>,
    by_index: Vec<Option<SmallVec<[usize; 4]>>>,
    function: Arc<dyn ShardFunction>,
}

impl ShardRouter {
    /// `fields` defaults to the primary index fields.
    pub fn new(
        schema: &FieldSchema,
        indexes: &IndexCatalog,
        fields: Option<Vec<String>>,
        function: Arc<dyn ShardFunction>,
    ) -> SpaceResult<Self> {
        let fields = fields.unwrap_or_else(|| indexes.primary().fields().to_vec());
        if fields.is_empty() {
            return Err(SpaceError::SchemaDefinition("shard key declares no fields".into()));
        }
        let mut positions = SmallVec::new();
        for name in fields.iter() {
            match schema.position(name) {
                Some(p) if name != TAIL => positions.push(p),
                _ => return Err(SpaceError::SchemaDefinition(format!("wrong shard field name {:?}", name))),
            }
        }
        let by_index = indexes
            .iter()
            .map(|idx| fields.iter().map(|f| idx.fields().iter().position(|i| i == f)).collect::<Option<SmallVec<_>>>())
            .collect();
        Ok(Self { fields, positions, by_index, function })
    }

    pub fn fields(&self) -> &[String] { &self.fields }
    pub fn shard_count(&self) -> u32 { self.function.shard_count() }
    pub fn all(&self) -> ShardSet { ShardSet::all(self.shard_count()) }

    fn route(&self, values: &[Value]) -> ShardSet {
        if self.shard_count() <= 1 { return ShardSet::single(0); }
        self.function.route(values)
    }

    /// Shard owning a full tuple (insert/replace).
    pub fn for_tuple(&self, tuple: &[Value]) -> ShardSet {
        let values: SmallVec<[Value; 4]> = self.positions.iter().map(|&p| tuple.get(p).cloned().unwrap_or_default()).collect();
        self.route(&values)
    }

    /// Shards a key on `index_no` can live on.
    pub fn for_key(&self, index_no: usize, key: &[Value]) -> ShardSet {
        if self.shard_count() <= 1 { return ShardSet::single(0); }
        let offsets = match self.by_index.get(index_no) {
            Some(Some(offsets)) => offsets,
            _ => return self.all(),
        };
        let mut values: SmallVec<[Value; 4]> = SmallVec::with_capacity(offsets.len());
        for &o in offsets.iter() {
            match key.get(o) {
                Some(v) => values.push(v.clone()),
                None => return self.all(),
            }
        }
        self.route(&values)
    }

    /// Union of the shards of every key in a batch.
    pub fn for_keys(&self, index_no: usize, keys: &[Vec<Value>]) -> ShardSet {
        let total = self.shard_count().max(1) as usize;
        let mut out: Option<ShardSet> = None;
        for key in keys {
            let shards = self.for_key(index_no, key);
            match out.as_mut() {
                Some(set) => set.union(&shards),
                None => out = Some(shards),
            }
            if out.as_ref().map_or(false, |s| s.len() >= total) { break; }
        }
        out.unwrap_or_else(|| self.all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spacekit_core::{ModuloShards, PrimitiveType::*, SingleShard};
    use spacekit_schema::{field, FieldDecl};

    /// Routes integer keys to `value % 4`; tuples of several values sum them.
    #[derive(Debug)]
    struct ByValue;

    impl ShardFunction for ByValue {
        fn shard_count(&self) -> u32 { 4 }
        fn route(&self, values: &[Value]) -> ShardSet {
            let sum: i64 = values.iter().filter_map(Value::as_int).sum();
            ShardSet::single((sum.rem_euclid(4)) as u32)
        }
    }

    fn names(v: &[&str]) -> Vec<String> { v.iter().map(|s| s.to_string()).collect() }

    fn setup(shard_fields: Option<Vec<String>>, f: Arc<dyn ShardFunction>) -> ShardRouter {
        let schema = FieldSchema::compile(vec![
            field("id", Int32),
            field("region", Int32),
            field("name", Str),
            FieldDecl::tail([Str]),
        ])
        .unwrap();
        let indexes = IndexCatalog::build(&schema, None, vec![names(&["name", "region"]), names(&["region", "id"])]).unwrap();
        ShardRouter::new(&schema, &indexes, shard_fields, f).unwrap()
    }

    #[test]
    fn single_key_routes_to_one_shard() {
        let r = setup(None, Arc::new(ByValue));
        assert_eq!(r.for_key(0, &[Value::Int(6)]), ShardSet::single(2));
        assert_eq!(r.for_tuple(&[Value::Int(5), Value::Int(0), Value::from("x")]), ShardSet::single(1));
    }

    #[test]
    fn index_without_shard_key_fans_out() {
        let r = setup(None, Arc::new(ByValue));
        assert_eq!(r.for_key(1, &[Value::from("x"), Value::Int(1)]), ShardSet::all(4));
        // index 2 holds `id` at offset 1; a one-value key does not reach it
        assert_eq!(r.for_key(2, &[Value::Int(1)]), ShardSet::all(4));
        assert_eq!(r.for_key(2, &[Value::Int(1), Value::Int(3)]), ShardSet::single(3));
    }

    #[test]
    fn batches_union_their_shards() {
        let r = setup(None, Arc::new(ByValue));
        let keys = vec![vec![Value::Int(1)], vec![Value::Int(5)], vec![Value::Int(2)]];
        assert_eq!(r.for_keys(0, &keys).as_slice(), &[1, 2]);
    }

    #[test]
    fn composite_shard_keys_are_read_in_index_order() {
        let r = setup(Some(names(&["id", "region"])), Arc::new(ByValue));
        // index 2 is (region, id)
        let keys = vec![vec![Value::Int(0), Value::Int(0)], vec![Value::Int(1), Value::Int(2)]];
        assert_eq!(r.for_keys(2, &keys).as_slice(), &[0, 3]);
        assert_eq!(r.for_keys(1, &[vec![Value::from("x"), Value::Int(1)]]), ShardSet::all(4));
        assert_eq!(r.for_tuple(&[Value::Int(1), Value::Int(2)]), ShardSet::single(3));
    }

    #[test]
    fn single_shard_short_circuits() {
        let r = setup(None, Arc::new(SingleShard));
        assert_eq!(r.for_key(1, &[]), ShardSet::single(0));
        assert_eq!(r.for_keys(2, &[]), ShardSet::single(0));
        let r = setup(None, Arc::new(ModuloShards::new(16)));
        assert_eq!(r.for_key(0, &[Value::Int(9)]).len(), 1);
    }

    #[test]
    fn shard_fields_must_be_named_fields() {
        let schema = FieldSchema::compile(vec![field("id", Int32), FieldDecl::tail([Str])]).unwrap();
        let indexes = IndexCatalog::build(&schema, None, vec![]).unwrap();
        assert!(ShardRouter::new(&schema, &indexes, Some(names(&["nope"])), Arc::new(SingleShard)).is_err());
        assert!(ShardRouter::new(&schema, &indexes, Some(names(&[TAIL])), Arc::new(SingleShard)).is_err());
    }
}
