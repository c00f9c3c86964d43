//! spacekit core types: tuple values, named records, result rows.
//!
//! Everything here is plain data shared by the schema compiler, the request
//! builder and transports.

#![forbid(unsafe_code)]

use std::any::Any;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;

pub mod codec;
pub mod error;
pub mod shard;

pub use codec::{Codec, CodecError, FieldCodec, Layout, PrimitiveType, Trailing};
pub use error::{SpaceError, SpaceResult};
pub use shard::{ModuloShards, ShardFunction, ShardSet, SingleShard};

/// Reserved field name of the variable-length trailing group.
pub const TAIL: &str = "_tail";

/// A single tuple slot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<Value>),
}

impl Value {
    pub fn is_nil(&self) -> bool { matches!(self, Value::Nil) }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Append this value to `out`, splicing nested arrays at any depth.
    pub fn flatten_into(self, out: &mut Vec<Value>) {
        match self {
            Value::Array(items) => {
                for item in items { item.flatten_into(out); }
            }
            other => out.push(other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 { f.write_str(", ")?; }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<bool> for Value { fn from(v: bool) -> Self { Value::Bool(v) } }
impl From<i64> for Value { fn from(v: i64) -> Self { Value::Int(v) } }
impl From<i32> for Value { fn from(v: i32) -> Self { Value::Int(v as i64) } }
impl From<u32> for Value { fn from(v: u32) -> Self { Value::Int(v as i64) } }
impl From<f64> for Value { fn from(v: f64) -> Self { Value::Float(v) } }
impl From<&str> for Value { fn from(v: &str) -> Self { Value::Str(v.to_string()) } }
impl From<String> for Value { fn from(v: String) -> Self { Value::Str(v) } }

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self { Value::Array(v.into_iter().map(Into::into).collect()) }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self { v.map(Into::into).unwrap_or(Value::Nil) }
}

/// Named record: field name to value, in insertion order.
///
/// Order is observable: the first select key's field order drives index
/// resolution, so this is not a hash map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: SmallVec<[(String, Value); 8]>,
}

impl Record {
    pub fn new() -> Self { Self::default() }

    /// Set `name`, keeping the original slot when it already exists.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.fields.push((name, value));
                None
            }
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool { self.get(name).is_some() }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let idx = self.fields.iter().position(|(k, _)| k == name)?;
        Some(self.fields.remove(idx).1)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ { self.fields.iter().map(|(k, _)| k.as_str()) }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize { self.fields.len() }
    pub fn is_empty(&self) -> bool { self.fields.is_empty() }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut rec = Record::new();
        for (k, v) in iter { rec.insert(k, v); }
        rec
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = smallvec::IntoIter<[(String, Value); 8]>;
    fn into_iter(self) -> Self::IntoIter { self.fields.into_iter() }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in self.fields.iter() { map.serialize_entry(k, v)?; }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RecordVisitor;

        impl<'de> Visitor<'de> for RecordVisitor {
            type Value = Record;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of field names to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Record, A::Error> {
                let mut rec = Record::new();
                while let Some((k, v)) = access.next_entry::<String, Value>()? {
                    rec.insert(k, v);
                }
                Ok(rec)
            }
        }

        deserializer.deserialize_map(RecordVisitor)
    }
}

/// Build a [`Record`] from `name => value` pairs.
#[macro_export]
macro_rules! record {
    () => { $crate::Record::new() };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut rec = $crate::Record::new();
        $( rec.insert($name, $value); )+
        rec
    }};
}

/// One stage value of a translator chain.
pub enum Row {
    /// Raw positional tuple as returned by storage.
    Tuple(Vec<Value>),
    Record(Record),
    /// Downstream representation produced by an application translator.
    Object(Box<dyn Any + Send>),
}

impl Row {
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Row::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_record(self) -> Option<Record> {
        match self {
            Row::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_tuple(self) -> Option<Vec<Value>> {
        match self {
            Row::Tuple(t) => Some(t),
            _ => None,
        }
    }

    pub fn downcast<T: Any>(self) -> Option<T> {
        match self {
            Row::Object(obj) => obj.downcast::<T>().ok().map(|b| *b),
            _ => None,
        }
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Row::Tuple(t) => f.debug_tuple("Tuple").field(t).finish(),
            Row::Record(r) => f.debug_tuple("Record").field(r).finish(),
            Row::Object(_) => f.write_str("Object(..)"),
        }
    }
}

pub mod prelude {
    pub use super::{
        Codec, Layout, ModuloShards, PrimitiveType, Record, Row, ShardFunction, ShardSet, SingleShard,
        SpaceError, SpaceResult, Trailing, Value, TAIL,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_keeps_insertion_order_and_replaces_in_place() {
        let mut rec = record! { "b" => 1, "a" => "x" };
        rec.insert("b", 2);
        assert_eq!(rec.names().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(rec.get("b"), Some(&Value::Int(2)));
    }

    #[test]
    fn record_deserializes_in_document_order() {
        let rec: Record = serde_json::from_str(r#"{"name": "x", "id": 5, "tags": ["a", null]}"#).unwrap();
        assert_eq!(rec.names().collect::<Vec<_>>(), vec!["name", "id", "tags"]);
        assert_eq!(rec.get("tags"), Some(&Value::Array(vec![Value::from("a"), Value::Nil])));
    }

    #[test]
    fn flatten_splices_nested_arrays() {
        let mut out = Vec::new();
        Value::from(vec![Value::from(vec![1, 2]), Value::from(3)]).flatten_into(&mut out);
        assert_eq!(out, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn row_downcasts_objects() {
        let row = Row::Object(Box::new(42u8));
        assert_eq!(row.downcast::<u8>(), Some(42));
    }
}
