//! Index catalog: per-index field lists, key layouts and index resolution.

use smallvec::SmallVec;
use spacekit_core::{Codec, Layout, Record, SpaceError, SpaceResult, Trailing, Value, TAIL};
use tracing::trace;

use crate::FieldSchema;

#[derive(Debug, Clone, PartialEq)]
pub struct IndexDef {
    fields: SmallVec<[String; 4]>,
    layout: Layout,
}

impl IndexDef {
    pub fn fields(&self) -> &[String] { &self.fields }

    /// Key layout: one codec per index field, longer keys rejected.
    pub fn layout(&self) -> &Layout { &self.layout }

    /// First `n` field names, or `None` when the index is shorter.
    fn prefix(&self, n: usize) -> Option<&[String]> { self.fields.get(..n) }
}

/// Index picked for a query plus the query's field names in index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedIndex<'a> {
    pub index_no: usize,
    pub fields: &'a [String],
}

/// Primary key as accepted by get/update/delete.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimaryKey {
    /// Field values by name; must name exactly the primary index fields.
    Named(Record),
    /// Values already in primary index order.
    Raw(Vec<Value>),
}

impl From<Record> for PrimaryKey { fn from(r: Record) -> Self { PrimaryKey::Named(r) } }
impl From<Vec<Value>> for PrimaryKey { fn from(v: Vec<Value>) -> Self { PrimaryKey::Raw(v) } }
impl From<Value> for PrimaryKey {
    fn from(v: Value) -> Self {
        match v {
            Value::Array(items) => PrimaryKey::Raw(items),
            other => PrimaryKey::Raw(vec![other]),
        }
    }
}
impl From<i64> for PrimaryKey { fn from(v: i64) -> Self { PrimaryKey::Raw(vec![Value::Int(v)]) } }
impl From<i32> for PrimaryKey { fn from(v: i32) -> Self { PrimaryKey::Raw(vec![Value::from(v)]) } }
impl From<&str> for PrimaryKey { fn from(v: &str) -> Self { PrimaryKey::Raw(vec![Value::from(v)]) } }

/// Every index of a space; index 0 is the primary.
#[derive(Debug, Clone)]
pub struct IndexCatalog {
    indexes: Vec<IndexDef>,
}

impl IndexCatalog {
    /// `primary` defaults to the first declared field.
    pub fn build(schema: &FieldSchema, primary: Option<Vec<String>>, secondary: Vec<Vec<String>>) -> SpaceResult<Self> {
        let primary = match primary {
            Some(p) => p,
            None => schema.field_names().iter().take(1).cloned().collect(),
        };
        let mut indexes = Vec::with_capacity(secondary.len() + 1);
        for (no, fields) in std::iter::once(primary).chain(secondary).enumerate() {
            if fields.is_empty() {
                return Err(SpaceError::SchemaDefinition(format!("index {} declares no fields", no)));
            }
            let mut codecs: Vec<Codec> = Vec::with_capacity(fields.len());
            for name in fields.iter() {
                let codec = if name == TAIL { None } else { schema.codec(name) };
                match codec {
                    Some(c) => codecs.push(c.clone()),
                    None => {
                        return Err(SpaceError::SchemaDefinition(format!(
                            "wrong index field name {:?} in index {} {:?}",
                            name, no, fields
                        )))
                    }
                }
            }
            indexes.push(IndexDef { fields: fields.into_iter().collect(), layout: Layout::new(codecs, Trailing::Reject) });
        }
        Ok(Self { indexes })
    }

    pub fn len(&self) -> usize { self.indexes.len() }
    pub fn is_empty(&self) -> bool { self.indexes.is_empty() }
    pub fn get(&self, index_no: usize) -> Option<&IndexDef> { self.indexes.get(index_no) }
    pub fn primary(&self) -> &IndexDef { &self.indexes[0] }
    pub fn iter(&self) -> impl Iterator<Item = &IndexDef> + '_ { self.indexes.iter() }

    pub fn fields(&self, index_no: usize) -> Option<&[String]> { self.get(index_no).map(IndexDef::fields) }
    pub fn layout(&self, index_no: usize) -> Option<&Layout> { self.get(index_no).map(IndexDef::layout) }

    /// Pick the index serving a query on `requested` fields.
    ///
    /// Declared order wins: an index whose prefix equals the request in order
    /// is taken first. Only then is the request compared as a set against each
    /// prefix; the first hit in declaration order wins and the returned field
    /// list is that index's prefix, so callers reorder their keys to it.
    pub fn resolve<S: AsRef<str>>(&self, requested: &[S]) -> SpaceResult<ResolvedIndex<'_>> {
        let n = requested.len();
        let exact = self.indexes.iter().enumerate().find_map(|(no, idx)| {
            let prefix = idx.prefix(n)?;
            prefix.iter().zip(requested).all(|(a, b)| a == b.as_ref()).then_some(ResolvedIndex { index_no: no, fields: prefix })
        });
        if let Some(found) = exact { return Ok(found); }

        let mut wanted: SmallVec<[&str; 4]> = requested.iter().map(AsRef::as_ref).collect();
        wanted.sort_unstable();
        for (no, idx) in self.indexes.iter().enumerate() {
            let Some(prefix) = idx.prefix(n) else { continue };
            let mut have: SmallVec<[&str; 4]> = prefix.iter().map(String::as_str).collect();
            have.sort_unstable();
            if have == wanted {
                trace!(index_no = no, ?prefix, "index matched as field set");
                return Ok(ResolvedIndex { index_no: no, fields: prefix });
            }
        }
        Err(SpaceError::IndexNotFound(requested.iter().map(|s| s.as_ref().to_string()).collect()))
    }

    /// Primary key values in primary index order.
    pub fn prepare_primary_key(&self, key: PrimaryKey) -> SpaceResult<Vec<Value>> {
        match key {
            PrimaryKey::Raw(values) => Ok(values),
            PrimaryKey::Named(rec) => {
                let pk = self.primary().fields();
                let extra: Vec<String> = rec.names().filter(|n| !pk.iter().any(|f| f == *n)).map(String::from).collect();
                if !extra.is_empty() { return Err(SpaceError::UnexpectedKeyField(extra)); }
                let missing: Vec<String> = pk.iter().filter(|f| !rec.contains(f)).cloned().collect();
                if !missing.is_empty() { return Err(SpaceError::MissingField(missing)); }
                Ok(pk.iter().map(|f| rec.get(f).cloned().unwrap_or_default()).collect())
            }
        }
    }
}
