//! spacekit schema: compile field declarations into a positional layout.
//!
//! A space is declared as an ordered list of `(name, type)` pairs. The reserved
//! name `_tail` declares a repeating group of types for every slot past the
//! named fields; it must come last. Without it an empty group is synthesized
//! at the end so tail-relative updates still have a position to address.

#![forbid(unsafe_code)]

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use spacekit_core::{Codec, Layout, PrimitiveType, SpaceError, SpaceResult, Trailing, TAIL};
use tracing::debug;

pub mod index;
pub mod translate;

pub use index::{IndexCatalog, IndexDef, PrimaryKey, ResolvedIndex};
pub use translate::{ToRecord, Translator, TranslatorChain};

/// One declared field. `_tail` carries every codec of the trailing group,
/// ordinary fields exactly one.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub codecs: SmallVec<[Codec; 2]>,
}

impl FieldDecl {
    pub fn new(name: impl Into<String>, codec: impl Into<Codec>) -> Self {
        Self { name: name.into(), codecs: smallvec::smallvec![codec.into()] }
    }

    pub fn tail<I, C>(codecs: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Codec>,
    {
        Self { name: TAIL.to_string(), codecs: codecs.into_iter().map(Into::into).collect() }
    }

    /// Declaration from textual type tags, e.g. `("id", ["int"])`.
    pub fn parse<S: AsRef<str>>(name: impl Into<String>, tags: &[S]) -> SpaceResult<Self> {
        let codecs = tags.iter().map(|t| t.as_ref().parse::<Codec>()).collect::<SpaceResult<_>>()?;
        Ok(Self { name: name.into(), codecs })
    }

    pub fn is_tail(&self) -> bool { self.name == TAIL }
}

/// Compiled, immutable field layout of a space.
#[derive(Debug, Clone)]
pub struct FieldSchema {
    positions: FxHashMap<String, usize>,
    names: Vec<String>,
    codecs: Vec<Codec>,
    tail_codecs: Vec<Codec>,
    tail_declared: bool,
    layout: Layout,
}

impl FieldSchema {
    pub fn compile(decls: impl IntoIterator<Item = FieldDecl>) -> SpaceResult<Self> {
        let mut positions: FxHashMap<String, usize> = FxHashMap::default();
        let mut names: Vec<String> = Vec::new();
        let mut codecs: Vec<Codec> = Vec::new();
        let mut tail: Option<Vec<Codec>> = None;

        for decl in decls {
            if tail.is_some() {
                return Err(SpaceError::SchemaDefinition(format!(
                    "`_tail` must be last (found {:?} after it)",
                    decl.name
                )));
            }
            if decl.is_tail() {
                if decl.codecs.is_empty() {
                    return Err(SpaceError::SchemaDefinition("`_tail` declares no types".into()));
                }
                tail = Some(decl.codecs.into_vec());
                continue;
            }
            if decl.codecs.len() != 1 {
                return Err(SpaceError::SchemaDefinition(format!(
                    "field {:?} must declare exactly one type, got {}",
                    decl.name,
                    decl.codecs.len()
                )));
            }
            if positions.contains_key(&decl.name) {
                return Err(SpaceError::SchemaDefinition(format!("duplicate field {:?}", decl.name)));
            }
            positions.insert(decl.name.clone(), names.len());
            names.push(decl.name);
            codecs.extend(decl.codecs);
        }

        let last = match codecs.last() {
            Some(c) => c.clone(),
            None => return Err(SpaceError::SchemaDefinition("at least one named field is required".into())),
        };
        let tail_position = names.len();
        positions.insert(TAIL.to_string(), tail_position);

        let tail_declared = tail.is_some();
        let tail_codecs = tail.unwrap_or_else(|| vec![last]);
        let layout = if tail_declared {
            let mut flat = codecs.clone();
            flat.extend(tail_codecs.iter().cloned());
            Layout::new(flat, Trailing::Repeat(tail_codecs.len()))
        } else {
            Layout::new(codecs.clone(), Trailing::None)
        };

        let schema = Self { positions, names, codecs, tail_codecs, tail_declared, layout };
        debug!(
            fields = schema.names.len(),
            tail_position = schema.tail_position(),
            tail_size = schema.tail_size(),
            "compiled field schema"
        );
        Ok(schema)
    }

    /// Position of a field; `_tail` answers the first trailing slot.
    pub fn position(&self, name: &str) -> Option<usize> { self.positions.get(name).copied() }

    /// Codec of an ordinary field.
    pub fn codec(&self, name: &str) -> Option<&Codec> { self.position(name).and_then(|p| self.codecs.get(p)) }

    pub fn contains(&self, name: &str) -> bool { self.positions.contains_key(name) }

    /// Ordinary field names in declaration order (never `_tail`).
    pub fn field_names(&self) -> &[String] { &self.names }

    pub fn tail_position(&self) -> usize { self.names.len() }

    /// Number of declared trailing slots; 0 when `_tail` was not declared.
    pub fn tail_size(&self) -> usize { if self.tail_declared { self.tail_codecs.len() } else { 0 } }

    pub fn tail_declared(&self) -> bool { self.tail_declared }

    /// Types of the trailing group. For an implicit group this is the last
    /// ordinary field's type.
    pub fn tail_codecs(&self) -> &[Codec] { &self.tail_codecs }

    /// Flattened tuple layout: named codecs, then the declared tail codecs.
    pub fn layout(&self) -> &Layout { &self.layout }

    /// Layout used to decode procedure results: every field codec followed
    /// by the tail codecs (implicit or not), the tail repeating.
    pub fn result_layout(&self) -> Layout {
        let mut flat = self.codecs.clone();
        flat.extend(self.tail_codecs.iter().cloned());
        Layout::new(flat, Trailing::Repeat(self.tail_codecs.len()))
    }
}

/// Shorthand for an ordinary field with a primitive type.
pub fn field(name: &str, t: PrimitiveType) -> FieldDecl { FieldDecl::new(name, t) }
