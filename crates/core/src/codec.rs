//! Field codecs and the flattened type layouts handed to transports.
//!
//! A field is either one of the primitive wire types, addressed by a type tag
//! (`int`, `str`, ...), or a custom codec that brings its own encode/decode.
//! Both resolve to a [`Codec`] once, when the schema is compiled.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{SpaceError, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Int8,
    Int16,
    Int32,
    Int64,
    VarInt,
    Str,
    Bytes,
    Auto,
}

impl PrimitiveType {
    pub fn tag(&self) -> &'static str {
        match self {
            PrimitiveType::Int8 => "int8",
            PrimitiveType::Int16 => "int16",
            PrimitiveType::Int32 => "int",
            PrimitiveType::Int64 => "int64",
            PrimitiveType::VarInt => "varint",
            PrimitiveType::Str => "str",
            PrimitiveType::Bytes => "bytes",
            PrimitiveType::Auto => "auto",
        }
    }
}

impl FromStr for PrimitiveType {
    type Err = SpaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches(':') {
            "int8" => Ok(PrimitiveType::Int8),
            "int16" => Ok(PrimitiveType::Int16),
            "int" | "int32" | "integer" => Ok(PrimitiveType::Int32),
            "int64" => Ok(PrimitiveType::Int64),
            "varint" => Ok(PrimitiveType::VarInt),
            "str" | "string" => Ok(PrimitiveType::Str),
            "bytes" => Ok(PrimitiveType::Bytes),
            "auto" => Ok(PrimitiveType::Auto),
            other => Err(SpaceError::SchemaDefinition(format!("unknown field type {:?}", other))),
        }
    }
}

impl Serialize for PrimitiveType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.tag())
    }
}

impl<'de> Deserialize<'de> for PrimitiveType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        tag.parse().map_err(serde::de::Error::custom)
    }
}

/// Failure reported by a custom codec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("codec {codec}: {message}")]
pub struct CodecError {
    pub codec: String,
    pub message: String,
}

/// Application supplied value codec, passed through to the transport untouched.
pub trait FieldCodec: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError>;
}

#[derive(Debug, Clone)]
pub enum Codec {
    Primitive(PrimitiveType),
    Custom(Arc<dyn FieldCodec>),
}

impl Codec {
    pub fn custom(codec: impl FieldCodec + 'static) -> Self { Codec::Custom(Arc::new(codec)) }

    pub fn name(&self) -> &str {
        match self {
            Codec::Primitive(t) => t.tag(),
            Codec::Custom(c) => c.name(),
        }
    }
}

impl From<PrimitiveType> for Codec {
    fn from(t: PrimitiveType) -> Self { Codec::Primitive(t) }
}

impl FromStr for Codec {
    type Err = SpaceError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { s.parse::<PrimitiveType>().map(Codec::Primitive) }
}

impl PartialEq for Codec {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Codec::Primitive(a), Codec::Primitive(b)) => a == b,
            (Codec::Custom(a), Codec::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Serialize for Codec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// What the transport does with slots past the end of `Layout::codecs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trailing {
    /// No trailing group; extra slots have no declared type.
    None,
    /// The last `n` codecs repeat for every extra slot.
    Repeat(usize),
    /// Extra slots are an error (index keys).
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Layout {
    pub codecs: Vec<Codec>,
    pub trailing: Trailing,
}

impl Layout {
    pub fn new(codecs: Vec<Codec>, trailing: Trailing) -> Self { Self { codecs, trailing } }

    pub fn len(&self) -> usize { self.codecs.len() }
    pub fn is_empty(&self) -> bool { self.codecs.is_empty() }

    /// Codec for tuple slot `pos`, following the trailing rule past the end.
    pub fn codec_at(&self, pos: usize) -> Option<&Codec> {
        if let Some(c) = self.codecs.get(pos) { return Some(c); }
        match self.trailing {
            Trailing::Repeat(n) if n > 0 && n <= self.codecs.len() => {
                let base = self.codecs.len() - n;
                self.codecs.get(base + (pos - base) % n)
            }
            _ => None,
        }
    }
}
