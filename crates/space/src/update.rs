//! Update entries and their rewriting to tuple positions.

use serde::Deserialize;
use spacekit_api::{FieldOp, UpdateOp};
use spacekit_core::{SpaceError, SpaceResult, TAIL};
use spacekit_schema::FieldSchema;

/// One caller-side update entry.
///
/// Integer positions address slots *inside* the trailing group: position 0
/// is the first tail slot, never the first field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawEntry")]
pub enum UpdateEntry {
    Field(String, UpdateOp),
    Position(usize, UpdateOp),
    /// One operation per tail slot, starting at the first.
    Tail(Vec<UpdateOp>),
}

impl UpdateEntry {
    pub fn field(name: impl Into<String>, op: UpdateOp) -> Self { UpdateEntry::Field(name.into(), op) }
    pub fn position(pos: usize, op: UpdateOp) -> Self { UpdateEntry::Position(pos, op) }
    pub fn tail(ops: impl IntoIterator<Item = UpdateOp>) -> Self { UpdateEntry::Tail(ops.into_iter().collect()) }
}

/// Wire shape: `[target, op]`, with `["_tail", [op, ...]]` for tail groups.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Group(String, Vec<UpdateOp>),
    Named(String, UpdateOp),
    Position(usize, UpdateOp),
}

impl TryFrom<RawEntry> for UpdateEntry {
    type Error = String;

    fn try_from(raw: RawEntry) -> Result<Self, Self::Error> {
        match raw {
            RawEntry::Group(name, ops) if name == TAIL => Ok(UpdateEntry::Tail(ops)),
            RawEntry::Group(name, _) => Err(format!("only `_tail` takes a list of operations, got {:?}", name)),
            RawEntry::Named(name, op) => Ok(UpdateEntry::Field(name, op)),
            RawEntry::Position(pos, op) => Ok(UpdateEntry::Position(pos, op)),
        }
    }
}

/// Rewrite entries to absolute tuple positions, preserving order.
pub fn resolve_updates(schema: &FieldSchema, entries: &[UpdateEntry]) -> SpaceResult<Vec<FieldOp>> {
    let tail = schema.tail_position();
    let mut ops = Vec::with_capacity(entries.len());
    let mut unknown: Vec<String> = Vec::new();
    for entry in entries {
        match entry {
            UpdateEntry::Position(pos, op) => {
                let position = tail
                    .checked_add(*pos)
                    .ok_or_else(|| SpaceError::InvalidRequest(format!("tail position {} out of range", pos)))?;
                ops.push(FieldOp { position, op: op.clone() });
            }
            UpdateEntry::Tail(sub) => {
                ops.extend(sub.iter().enumerate().map(|(i, op)| FieldOp { position: tail + i, op: op.clone() }));
            }
            UpdateEntry::Field(name, _) if name == TAIL => {
                return Err(SpaceError::InvalidRequest("`_tail` update takes a list of operations".into()));
            }
            UpdateEntry::Field(name, op) => match schema.position(name) {
                Some(position) => ops.push(FieldOp { position, op: op.clone() }),
                None => {
                    if !unknown.contains(name) { unknown.push(name.clone()); }
                }
            },
        }
    }
    if !unknown.is_empty() {
        return Err(SpaceError::UnknownField { fields: unknown, context: "update" });
    }
    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spacekit_core::{PrimitiveType::*, Value};
    use spacekit_schema::{field, FieldDecl};

    fn set(v: &str) -> UpdateOp { UpdateOp::Set(Value::from(v)) }

    #[test]
    fn positions_are_tail_relative() {
        let s = FieldSchema::compile(vec![field("a", Int32), field("b", Str), field("c", Str), FieldDecl::tail([Str, Str])]).unwrap();
        let ops = resolve_updates(&s, &[UpdateEntry::position(0, set("v"))]).unwrap();
        assert_eq!(ops, vec![FieldOp { position: 3, op: set("v") }]);
        let ops = resolve_updates(&s, &[UpdateEntry::tail([set("v1"), set("v2")])]).unwrap();
        assert_eq!(ops.iter().map(|o| o.position).collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(ops[1].op, set("v2"));
    }

    #[test]
    fn named_fields_keep_their_position() {
        let s = FieldSchema::compile(vec![field("id", Int32), field("name", Str), field("tags", Str)]).unwrap();
        let ops = resolve_updates(&s, &[UpdateEntry::field("name", set("x")), UpdateEntry::position(1, UpdateOp::Delete)]).unwrap();
        assert_eq!(ops, vec![FieldOp { position: 1, op: set("x") }, FieldOp { position: 4, op: UpdateOp::Delete }]);
    }

    #[test]
    fn unknown_names_are_collected() {
        let s = FieldSchema::compile(vec![field("id", Int32)]).unwrap();
        let err = resolve_updates(
            &s,
            &[UpdateEntry::field("x", UpdateOp::Add(1)), UpdateEntry::field("id", UpdateOp::Add(1)), UpdateEntry::field("y", UpdateOp::Add(1))],
        )
        .unwrap_err();
        assert_eq!(err, SpaceError::UnknownField { fields: vec!["x".into(), "y".into()], context: "update" });
        assert!(matches!(
            resolve_updates(&s, &[UpdateEntry::field(TAIL, UpdateOp::Delete)]),
            Err(SpaceError::InvalidRequest(_))
        ));
    }

    #[test]
    fn oversized_positions_are_rejected() {
        let s = FieldSchema::compile(vec![field("id", Int32), field("name", Str)]).unwrap();
        let err = resolve_updates(&s, &[UpdateEntry::position(usize::MAX, UpdateOp::Delete)]).unwrap_err();
        assert!(matches!(err, SpaceError::InvalidRequest(ref m) if m.contains("out of range")));
    }

    #[test]
    fn entries_parse_from_json_pairs() {
        let entries: Vec<UpdateEntry> =
            serde_json::from_str(r#"[["name", {"set": "x"}], [0, {"add": 1}], ["_tail", [{"set": "a"}, "delete"]]]"#).unwrap();
        assert_eq!(
            entries,
            vec![
                UpdateEntry::field("name", set("x")),
                UpdateEntry::position(0, UpdateOp::Add(1)),
                UpdateEntry::tail([set("a"), UpdateOp::Delete]),
            ]
        );
        assert!(serde_json::from_str::<UpdateEntry>(r#"["name", [{"set": "x"}]]"#).is_err());
    }
}
