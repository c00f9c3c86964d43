//! Record <-> tuple translation and result translator chains.

use std::fmt;
use std::sync::Arc;

use spacekit_core::{Record, Row, SpaceError, SpaceResult, Value, TAIL};

use crate::FieldSchema;

/// One stage of a result translator chain.
pub trait Translator: Send + Sync {
    fn translate(&self, row: Row) -> Row;
}

impl<F> Translator for F
where
    F: Fn(Row) -> Row + Send + Sync,
{
    fn translate(&self, row: Row) -> Row { self(row) }
}

impl FieldSchema {
    /// Positional tuple for a named record.
    ///
    /// Missing fields become `Nil`, except a missing `_tail` which is simply
    /// left out. A sequence in the `_tail` slot is spliced in flat.
    pub fn record_to_tuple(&self, record: &Record) -> SpaceResult<Vec<Value>> {
        let unknown: Vec<String> = record.names().filter(|n| !self.contains(n)).map(String::from).collect();
        if !unknown.is_empty() {
            return Err(SpaceError::UnknownField { fields: unknown, context: "record" });
        }
        let mut tuple: Vec<Value> = self
            .field_names()
            .iter()
            .map(|name| record.get(name).cloned().unwrap_or_default())
            .collect();
        match record.get(TAIL) {
            None | Some(Value::Nil) => {}
            Some(tail) => tail.clone().flatten_into(&mut tuple),
        }
        Ok(tuple)
    }

    /// Named record for a positional tuple.
    ///
    /// Slots past the named fields are grouped under `_tail`: a flat list for
    /// single-type groups, one list per repetition otherwise.
    pub fn tuple_to_record(&self, tuple: Vec<Value>) -> Record {
        to_record(self.field_names(), self.tail_size(), self.tail_declared(), tuple)
    }

    /// Chain whose only stage is [`ToRecord`] for this schema.
    pub fn default_chain(&self) -> TranslatorChain { TranslatorChain::new(ToRecord::new(self)) }
}

fn to_record(names: &[String], tail_size: usize, keep_empty_tail: bool, tuple: Vec<Value>) -> Record {
    let mut rec = Record::new();
    let mut slots = tuple.into_iter();
    for name in names {
        rec.insert(name.as_str(), slots.next().unwrap_or_default());
    }
    let rest: Vec<Value> = slots.collect();
    if rest.is_empty() && !keep_empty_tail {
        return rec;
    }
    let tail = if tail_size > 1 {
        rest.chunks(tail_size).map(|group| Value::Array(group.to_vec())).collect()
    } else {
        rest
    };
    rec.insert(TAIL, Value::Array(tail));
    rec
}

/// First stage of the default chain: tuple to [`Record`].
#[derive(Debug, Clone)]
pub struct ToRecord {
    names: Arc<[String]>,
    tail_size: usize,
    tail_declared: bool,
}

impl ToRecord {
    pub fn new(schema: &FieldSchema) -> Self {
        Self { names: schema.field_names().into(), tail_size: schema.tail_size(), tail_declared: schema.tail_declared() }
    }
}

impl Translator for ToRecord {
    fn translate(&self, row: Row) -> Row {
        match row {
            Row::Tuple(t) => Row::Record(to_record(&self.names, self.tail_size, self.tail_declared, t)),
            other => other,
        }
    }
}

/// Ordered, shared translator stages. Extending a chain yields a new chain.
#[derive(Clone)]
pub struct TranslatorChain {
    stages: Arc<[Arc<dyn Translator>]>,
}

impl TranslatorChain {
    pub fn new(first: impl Translator + 'static) -> Self { Self { stages: Arc::from(vec![Arc::new(first) as Arc<dyn Translator>]) } }

    /// Chain with no stages: rows stay raw tuples.
    pub fn empty() -> Self { Self { stages: Arc::from(Vec::<Arc<dyn Translator>>::new()) } }

    pub fn with(&self, stage: Arc<dyn Translator>) -> Self {
        let mut stages: Vec<Arc<dyn Translator>> = self.stages.iter().cloned().collect();
        stages.push(stage);
        Self { stages: stages.into() }
    }

    pub fn len(&self) -> usize { self.stages.len() }
    pub fn is_empty(&self) -> bool { self.stages.is_empty() }

    /// Run `tuple` through every stage in order.
    pub fn apply(&self, tuple: Vec<Value>) -> Row {
        self.stages.iter().fold(Row::Tuple(tuple), |row, stage| stage.translate(row))
    }
}

impl fmt::Debug for TranslatorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslatorChain").field("stages", &self.stages.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{field, FieldDecl};
    use spacekit_core::{record, PrimitiveType::*};

    fn plain() -> FieldSchema {
        FieldSchema::compile(vec![field("id", Int32), field("name", Str), field("tags", Str)]).unwrap()
    }

    fn pairs() -> FieldSchema {
        FieldSchema::compile(vec![field("id", Int32), FieldDecl::tail([Str, Int32])]).unwrap()
    }

    #[test]
    fn projects_in_schema_order_and_drops_missing_tail() {
        let t = plain().record_to_tuple(&record! { "name" => "x", "id" => 5 }).unwrap();
        assert_eq!(t, vec![Value::Int(5), Value::from("x"), Value::Nil]);
    }

    #[test]
    fn unknown_fields_are_listed() {
        let err = plain().record_to_tuple(&record! { "id" => 1, "bogus" => 2, "other" => 3 }).unwrap_err();
        assert_eq!(
            err,
            SpaceError::UnknownField { fields: vec!["bogus".into(), "other".into()], context: "record" }
        );
    }

    #[test]
    fn tail_is_flattened_and_regrouped() {
        let s = pairs();
        let rec = record! {
            "id" => 1,
            TAIL => Value::from(vec![Value::from(vec![Value::from("a"), Value::from(1)]), Value::from(vec![Value::from("b"), Value::from(2)])]),
        };
        let tuple = s.record_to_tuple(&rec).unwrap();
        assert_eq!(tuple, vec![Value::Int(1), Value::from("a"), Value::Int(1), Value::from("b"), Value::Int(2)]);
        assert_eq!(s.tuple_to_record(tuple), rec);
    }

    #[test]
    fn round_trip_through_default_chain() {
        let s = plain();
        let rec = record! { "id" => 5, "name" => "x", "tags" => "t" };
        let row = s.default_chain().apply(s.record_to_tuple(&rec).unwrap());
        assert_eq!(row.into_record(), Some(rec));

        let single = FieldSchema::compile(vec![field("id", Int32), FieldDecl::tail([Str])]).unwrap();
        let rec = record! { "id" => 1, TAIL => vec!["a", "b"] };
        assert_eq!(single.tuple_to_record(single.record_to_tuple(&rec).unwrap()), rec);
    }

    #[test]
    fn declared_tail_is_always_present() {
        let rec = pairs().tuple_to_record(vec![Value::Int(1)]);
        assert_eq!(rec.get(TAIL), Some(&Value::Array(vec![])));
        let rec = plain().tuple_to_record(vec![Value::Int(1)]);
        assert_eq!(rec.get("tags"), Some(&Value::Nil));
        assert!(!rec.contains(TAIL));
    }

    #[test]
    fn chain_extension_leaves_receiver_alone() {
        let base = plain().default_chain();
        let ext = base.with(Arc::new(|row: Row| match row {
            Row::Record(r) => Row::Object(Box::new(r.get("name").cloned())),
            other => other,
        }));
        assert_eq!(base.len(), 1);
        assert_eq!(ext.len(), 2);
        let out = ext.apply(vec![Value::Int(1), Value::from("n")]);
        assert_eq!(out.downcast::<Option<Value>>(), Some(Some(Value::from("n"))));
        assert!(TranslatorChain::empty().apply(vec![Value::Nil]).into_tuple().is_some());
    }
}
