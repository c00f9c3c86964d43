//! Recording transport: keeps every request it is handed and answers from a
//! queue of canned replies.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use spacekit_core::{Row, Value};
use tracing::trace;

use crate::{
    Callback, CallRequest, DeleteRequest, InsertRequest, Request, SelectRequest, Transport, TransportError,
    UpdateRequest,
};

/// Canned reply: raw tuples (run through the request's chain) or a failure.
pub type Reply = Result<Vec<Vec<Value>>, TransportError>;

#[derive(Debug, Default)]
pub struct RecordingTransport {
    requests: Mutex<Vec<Request>>,
    replies: Mutex<VecDeque<Reply>>,
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> { m.lock().unwrap_or_else(|e| e.into_inner()) }

impl RecordingTransport {
    pub fn new() -> Self { Self::default() }

    /// Queue the reply for the next request. Without one, requests succeed
    /// with no rows.
    pub fn push_reply(&self, reply: Reply) { locked(&self.replies).push_back(reply); }

    pub fn requests(&self) -> Vec<Request> { locked(&self.requests).clone() }

    pub fn last(&self) -> Option<Request> { locked(&self.requests).last().cloned() }

    pub fn take_requests(&self) -> Vec<Request> { std::mem::take(&mut *locked(&self.requests)) }

    pub fn len(&self) -> usize { locked(&self.requests).len() }
    pub fn is_empty(&self) -> bool { locked(&self.requests).is_empty() }

    fn submit(&self, req: Request, cb: Callback) {
        let reply = locked(&self.replies).pop_front().unwrap_or_else(|| Ok(Vec::new()));
        trace!(op = req.name(), "recorded request");
        let response = reply.map(|tuples| match req.translators() {
            Some(chain) => tuples.into_iter().map(|t| chain.apply(t)).collect(),
            None => tuples.into_iter().map(Row::Tuple).collect(),
        });
        locked(&self.requests).push(req);
        cb(response);
    }
}

impl Transport for RecordingTransport {
    fn select(&self, req: SelectRequest, cb: Callback) { self.submit(Request::Select(req), cb) }
    fn insert(&self, req: InsertRequest, cb: Callback) { self.submit(Request::Insert(req), cb) }
    fn update(&self, req: UpdateRequest, cb: Callback) { self.submit(Request::Update(req), cb) }
    fn delete(&self, req: DeleteRequest, cb: Callback) { self.submit(Request::Delete(req), cb) }
    fn call(&self, req: CallRequest, cb: Callback) { self.submit(Request::Call(req), cb) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{completion, Limit};
    use spacekit_core::{Layout, PrimitiveType, ShardSet, Trailing};
    use spacekit_schema::{field, FieldSchema};

    fn select(chain: spacekit_schema::TranslatorChain) -> SelectRequest {
        SelectRequest {
            space_no: 1,
            index_no: 0,
            offset: 0,
            limit: Limit::First,
            keys: vec![vec![Value::Int(1)]],
            field_types: Layout::new(vec![PrimitiveType::Int32.into()], Trailing::None),
            index_types: Layout::new(vec![PrimitiveType::Int32.into()], Trailing::Reject),
            shard_numbers: ShardSet::single(0),
            translators: chain,
        }
    }

    #[tokio::test]
    async fn replies_are_translated_through_the_request_chain() {
        let schema = FieldSchema::compile(vec![field("id", PrimitiveType::Int32)]).unwrap();
        let t = RecordingTransport::new();
        t.push_reply(Ok(vec![vec![Value::Int(1)]]));
        let (cb, done) = completion();
        t.select(select(schema.default_chain()), cb);
        let rows = done.await.unwrap();
        assert_eq!(rows[0].as_record().and_then(|r| r.get("id")), Some(&Value::Int(1)));
        assert_eq!(t.len(), 1);
        assert_eq!(t.last().map(|r| r.name()), Some("select"));
    }

    #[tokio::test]
    async fn failures_pass_through_untouched() {
        let t = RecordingTransport::new();
        t.push_reply(Err(TransportError::Timeout(50)));
        let (cb, done) = completion();
        t.select(select(spacekit_schema::TranslatorChain::empty()), cb);
        assert_eq!(done.await.unwrap_err(), TransportError::Timeout(50));
        assert_eq!(t.take_requests().len(), 1);
        assert!(t.is_empty());
    }
}
