//! spacekit transport contract.
//!
//! The request builder never talks to the network. It produces fully resolved
//! request descriptors and hands them, with a one-shot callback, to a
//! [`Transport`]. Transports encode, dispatch to the listed shards, merge the
//! replies, run them through the descriptor's translator chain and invoke the
//! callback exactly once.

#![forbid(unsafe_code)]

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use spacekit_core::{Layout, Row, ShardSet, Value};
use spacekit_schema::TranslatorChain;
use tokio::sync::oneshot;

pub mod recording;

pub use recording::RecordingTransport;

/// Transport or storage failure, delivered through the callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("timeout after {0} ms")]
    Timeout(u64),
    #[error("storage error {code}: {message}")]
    Storage { code: u32, message: String },
    #[error("disconnected: {0}")]
    Disconnected(String),
    #[error("callback dropped without a response")]
    Dropped,
}

pub type Response = Result<Vec<Row>, TransportError>;

/// Completion handler; invoked at most once, on a context chosen by the transport.
pub type Callback = Box<dyn FnOnce(Response) + Send + 'static>;

/// How many matches a select returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Limit {
    /// First match only.
    First,
    Count(u32),
    #[default]
    Unbounded,
}

/// Conflict policy for tuple writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertMode {
    /// Fail when the primary key already exists.
    Add,
    /// Insert or overwrite.
    Replace,
}

/// Single-field update operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOp {
    Set(Value),
    Add(i64),
    And(i64),
    Or(i64),
    Xor(i64),
    Splice { offset: i64, length: i64, value: String },
    Delete,
    Insert(Value),
}

/// Update operation addressed to a tuple slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldOp {
    pub position: usize,
    pub op: UpdateOp,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectRequest {
    pub space_no: u32,
    pub index_no: usize,
    pub offset: u32,
    pub limit: Limit,
    /// Keys in index field order, all of the same length.
    pub keys: Vec<Vec<Value>>,
    pub field_types: Layout,
    pub index_types: Layout,
    pub shard_numbers: ShardSet,
    #[serde(skip)]
    pub translators: TranslatorChain,
}

#[derive(Debug, Clone, Serialize)]
pub struct InsertRequest {
    pub space_no: u32,
    pub mode: InsertMode,
    pub tuple: Vec<Value>,
    pub field_types: Layout,
    pub return_tuple: bool,
    pub shard_numbers: ShardSet,
    #[serde(skip)]
    pub translators: TranslatorChain,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateRequest {
    pub space_no: u32,
    pub key: Vec<Value>,
    pub ops: Vec<FieldOp>,
    pub field_types: Layout,
    pub index_types: Layout,
    pub return_tuple: bool,
    pub shard_numbers: ShardSet,
    #[serde(skip)]
    pub translators: TranslatorChain,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteRequest {
    pub space_no: u32,
    pub key: Vec<Value>,
    pub field_types: Layout,
    pub index_types: Layout,
    pub return_tuple: bool,
    pub shard_numbers: ShardSet,
    #[serde(skip)]
    pub translators: TranslatorChain,
}

/// Stored procedure invocation.
#[derive(Debug, Clone, Serialize)]
pub struct CallRequest {
    pub function: String,
    pub args: Vec<Value>,
    /// Argument layout; `None` lets the transport infer it.
    pub arg_types: Option<Layout>,
    pub return_tuple: bool,
    /// Result layout; `None` returns untyped tuples.
    pub returns: Option<Layout>,
    #[serde(skip)]
    pub translators: Option<TranslatorChain>,
}

/// Any request, as captured by [`RecordingTransport`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Select(SelectRequest),
    Insert(InsertRequest),
    Update(UpdateRequest),
    Delete(DeleteRequest),
    Call(CallRequest),
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Select(_) => "select",
            Request::Insert(r) => match r.mode {
                InsertMode::Add => "insert",
                InsertMode::Replace => "replace",
            },
            Request::Update(_) => "update",
            Request::Delete(_) => "delete",
            Request::Call(_) => "call",
        }
    }

    /// Chain the transport runs result tuples through, if any.
    pub fn translators(&self) -> Option<&TranslatorChain> {
        match self {
            Request::Select(r) => Some(&r.translators),
            Request::Insert(r) => Some(&r.translators),
            Request::Update(r) => Some(&r.translators),
            Request::Delete(r) => Some(&r.translators),
            Request::Call(r) => if r.return_tuple { r.translators.as_ref() } else { None },
        }
    }
}

/// Dispatches request descriptors. Every method returns immediately; the
/// outcome is reported through `cb`.
pub trait Transport: Send + Sync {
    fn select(&self, req: SelectRequest, cb: Callback);
    fn insert(&self, req: InsertRequest, cb: Callback);
    fn update(&self, req: UpdateRequest, cb: Callback);
    fn delete(&self, req: DeleteRequest, cb: Callback);
    fn call(&self, req: CallRequest, cb: Callback);
}

/// Future side of a callback created by [`completion`].
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<Response>,
}

impl Completion {
    /// Non-blocking poll: `None` while the callback has not fired yet.
    pub fn try_take(&mut self) -> Option<Response> {
        match self.rx.try_recv() {
            Ok(res) => Some(res),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(TransportError::Dropped)),
        }
    }
}

impl Future for Completion {
    type Output = Response;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Response> {
        Pin::new(&mut self.rx).poll(cx).map(|res| res.unwrap_or(Err(TransportError::Dropped)))
    }
}

/// Callback paired with a future resolving to whatever it is called with.
pub fn completion() -> (Callback, Completion) {
    let (tx, rx) = oneshot::channel::<Response>();
    let cb: Callback = Box::new(move |res| {
        let _ = tx.send(res);
    });
    (cb, Completion { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completion_resolves_with_callback_value() {
        let (cb, done) = completion();
        std::thread::spawn(move || cb(Ok(vec![Row::Tuple(vec![Value::Int(1)])])));
        let rows = done.await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn dropped_callback_reports_dropped() {
        let (cb, mut done) = completion();
        assert!(done.try_take().is_none());
        drop(cb);
        assert_eq!(done.try_take().map(|r| r.unwrap_err()), Some(TransportError::Dropped));
    }

    #[test]
    fn update_ops_deserialize_from_tagged_json() {
        let ops: Vec<UpdateOp> = serde_json::from_str(r#"[{"set": "x"}, {"add": 2}, "delete"]"#).unwrap();
        assert_eq!(ops, vec![UpdateOp::Set(Value::from("x")), UpdateOp::Add(2), UpdateOp::Delete]);
    }
}
