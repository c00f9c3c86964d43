//! Request-building errors. All of them are raised before anything reaches a
//! transport.

/// Pre-flight validation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpaceError {
    #[error("schema definition: {0}")]
    SchemaDefinition(String),
    #[error("unknown fields {fields:?} in {context}")]
    UnknownField { fields: Vec<String>, context: &'static str },
    #[error("values required for all primary index fields (missing {0:?})")]
    MissingField(Vec<String>),
    #[error("fields {0:?} are not part of the primary index")]
    UnexpectedKeyField(Vec<String>),
    #[error("no index found for fields {0:?}")]
    IndexNotFound(Vec<String>),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub type SpaceResult<T> = Result<T, SpaceError>;
