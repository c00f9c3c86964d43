//! spacekit space: the request-building facade.
//!
//! A [`Space`] turns named records and queries into positional request
//! descriptors for one space of the store: it picks the index, orders key
//! values, routes to shards, rewrites updates and attaches the translator
//! chain that turns result tuples back into records. It performs no I/O; the
//! finished descriptor goes to the configured [`Transport`] together with the
//! caller's callback.
//!
//! Validation failures are returned synchronously, before the transport sees
//! anything. Transport failures only ever arrive through the callback.

#![forbid(unsafe_code)]

use std::sync::Arc;

use metrics::counter;
use smallvec::SmallVec;
use spacekit_api::{
    Callback, CallRequest, DeleteRequest, InsertMode, InsertRequest, Limit, SelectRequest, Transport, UpdateRequest,
};
use spacekit_core::{
    Codec, Layout, PrimitiveType, Record, Row, ShardFunction, ShardSet, SingleShard, SpaceError, SpaceResult, Trailing,
    Value,
};
use spacekit_schema::{FieldDecl, FieldSchema, IndexCatalog, PrimaryKey, Translator, TranslatorChain};
use tracing::debug;

pub mod config;
pub mod router;
pub mod update;

pub use config::{FieldDef, SpaceDef, SpacesConfig, TypeSpec};
pub use router::ShardRouter;
pub use update::{resolve_updates, UpdateEntry};

/// Select keys.
#[derive(Debug, Clone, PartialEq)]
pub enum Keys {
    /// One key. When its first value is a sequence the record is read as
    /// columns, like [`Keys::Columns`].
    One(Record),
    /// Several keys naming the same fields.
    Many(Vec<Record>),
    /// Parallel value sequences per field, transposed into keys.
    Columns(Record),
}

impl From<Record> for Keys { fn from(r: Record) -> Self { Keys::One(r) } }
impl From<Vec<Record>> for Keys { fn from(v: Vec<Record>) -> Self { Keys::Many(v) } }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelectOpts {
    pub offset: u32,
    pub limit: Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteOpts {
    /// Ask the store to send back the tuple as it is after the write.
    pub return_tuple: bool,
}

impl WriteOpts {
    pub fn returning() -> Self { Self { return_tuple: true } }
}

/// Space number passed as the leading procedure argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpaceArg {
    /// This space's number.
    #[default]
    Own,
    Other(u32),
    /// No leading space argument.
    Omit,
}

/// Result shape of a procedure call.
#[derive(Debug, Clone)]
pub enum Returns {
    Layout(Layout),
    /// Ad-hoc schema; results come back as records of these fields.
    Fields(Vec<FieldDecl>),
}

#[derive(Clone, Default)]
pub struct CallOpts {
    pub space: SpaceArg,
    pub arg_types: Option<Layout>,
    /// `call` defaults this to true, `invoke` to false.
    pub return_tuple: Option<bool>,
    pub returns: Option<Returns>,
    /// Stages appended after the default record translation.
    pub translators: Vec<Arc<dyn Translator>>,
}

/// Definition of a space before compilation.
#[derive(Default)]
pub struct SpaceBuilder {
    space_no: u32,
    fields: Vec<FieldDecl>,
    primary: Option<Vec<String>>,
    indexes: Vec<Vec<String>>,
    shard_fields: Option<Vec<String>>,
    shard_fn: Option<Arc<dyn ShardFunction>>,
}

fn owned(names: &[&str]) -> Vec<String> { names.iter().map(|s| s.to_string()).collect() }

impl SpaceBuilder {
    pub fn new(space_no: u32) -> Self { Self { space_no, ..Default::default() } }

    pub fn field(mut self, decl: FieldDecl) -> Self {
        self.fields.push(decl);
        self
    }

    pub fn fields(mut self, decls: impl IntoIterator<Item = FieldDecl>) -> Self {
        self.fields.extend(decls);
        self
    }

    pub fn primary(mut self, fields: &[&str]) -> Self {
        self.primary = Some(owned(fields));
        self
    }

    pub fn index(mut self, fields: &[&str]) -> Self {
        self.indexes.push(owned(fields));
        self
    }

    pub fn shard_fields(mut self, fields: &[&str]) -> Self {
        self.shard_fields = Some(owned(fields));
        self
    }

    pub fn shard_fn(mut self, f: Arc<dyn ShardFunction>) -> Self {
        self.shard_fn = Some(f);
        self
    }

    pub(crate) fn from_parts(
        space_no: u32,
        fields: Vec<FieldDecl>,
        primary: Option<Vec<String>>,
        indexes: Vec<Vec<String>>,
        shard_fields: Option<Vec<String>>,
        shard_fn: Option<Arc<dyn ShardFunction>>,
    ) -> Self {
        Self { space_no, fields, primary, indexes, shard_fields, shard_fn }
    }

    /// Compile schema, indexes and shard key. Without a shard function every
    /// request goes to shard 0.
    pub fn build(self, transport: Arc<dyn Transport>) -> SpaceResult<Space> {
        let schema = FieldSchema::compile(self.fields)?;
        let indexes = IndexCatalog::build(&schema, self.primary, self.indexes)?;
        let shard_fn = self.shard_fn.unwrap_or_else(|| Arc::new(SingleShard));
        let router = ShardRouter::new(&schema, &indexes, self.shard_fields, shard_fn)?;
        let translators = schema.default_chain();
        debug!(
            space_no = self.space_no,
            indexes = indexes.len(),
            shards = router.shard_count(),
            "space defined"
        );
        Ok(Space {
            inner: Arc::new(SpaceInner { space_no: self.space_no, schema, indexes, router, transport }),
            translators,
        })
    }
}

struct SpaceInner {
    space_no: u32,
    schema: FieldSchema,
    indexes: IndexCatalog,
    router: ShardRouter,
    transport: Arc<dyn Transport>,
}

/// Request builder for one space. Cheap to clone and safe to share.
#[derive(Clone)]
pub struct Space {
    inner: Arc<SpaceInner>,
    translators: TranslatorChain,
}

impl std::fmt::Debug for Space {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Space")
            .field("space_no", &self.inner.space_no)
            .field("fields", &self.inner.schema.field_names())
            .field("indexes", &self.inner.indexes.len())
            .field("translators", &self.translators.len())
            .finish()
    }
}

enum Batch {
    Rows(Vec<Record>),
    Columns(Record),
}

impl Batch {
    fn first(&self) -> Option<&Record> {
        match self {
            Batch::Rows(rows) => rows.first(),
            Batch::Columns(rec) => Some(rec),
        }
    }
}

impl From<Keys> for Batch {
    fn from(keys: Keys) -> Self {
        match keys {
            Keys::One(rec) if matches!(rec.iter().next(), Some((_, Value::Array(_)))) => Batch::Columns(rec),
            Keys::One(rec) => Batch::Rows(vec![rec]),
            Keys::Many(rows) => Batch::Rows(rows),
            Keys::Columns(rec) => Batch::Columns(rec),
        }
    }
}

/// Key values in `order`; the record must name exactly those fields.
fn project_key(rec: &Record, order: &[String]) -> SpaceResult<Vec<Value>> {
    if rec.len() != order.len() || !order.iter().all(|f| rec.contains(f)) {
        return Err(SpaceError::InvalidRequest(format!(
            "select keys must name the same fields: expected {:?}, got {:?}",
            order,
            rec.names().collect::<Vec<_>>()
        )));
    }
    Ok(order.iter().map(|f| rec.get(f).cloned().unwrap_or_default()).collect())
}

/// Turn per-field value sequences into keys in `order`.
fn transpose(rec: &Record, order: &[String]) -> SpaceResult<Vec<Vec<Value>>> {
    let mut columns: SmallVec<[&[Value]; 4]> = SmallVec::with_capacity(order.len());
    for name in order {
        match rec.get(name) {
            Some(Value::Array(values)) => columns.push(values),
            Some(_) => return Err(SpaceError::InvalidRequest(format!("column {:?} must be a sequence", name))),
            None => return Err(SpaceError::InvalidRequest(format!("column {:?} missing", name))),
        }
    }
    let len = columns.first().map_or(0, |c| c.len());
    if columns.iter().any(|c| c.len() != len) {
        return Err(SpaceError::InvalidRequest("columns differ in length".into()));
    }
    if len == 0 {
        return Err(SpaceError::InvalidRequest("select needs at least one key".into()));
    }
    Ok((0..len).map(|i| columns.iter().map(|c| c[i].clone()).collect()).collect())
}

impl Space {
    pub fn builder(space_no: u32) -> SpaceBuilder { SpaceBuilder::new(space_no) }

    pub fn space_no(&self) -> u32 { self.inner.space_no }
    pub fn schema(&self) -> &FieldSchema { &self.inner.schema }
    pub fn indexes(&self) -> &IndexCatalog { &self.inner.indexes }
    pub fn router(&self) -> &ShardRouter { &self.inner.router }
    pub fn translators(&self) -> &TranslatorChain { &self.translators }

    /// Same space with one more translator stage; `self` is left unchanged.
    pub fn with_translator(&self, stage: impl Translator + 'static) -> Space {
        Space { inner: Arc::clone(&self.inner), translators: self.translators.with(Arc::new(stage)) }
    }

    /// Named-record form of a raw tuple, run through this space's chain.
    pub fn translate(&self, tuple: Vec<Value>) -> Row { self.translators.apply(tuple) }

    pub fn record_to_tuple(&self, record: &Record) -> SpaceResult<Vec<Value>> { self.inner.schema.record_to_tuple(record) }

    fn index_types(&self, index_no: usize) -> SpaceResult<Layout> {
        self.inner
            .indexes
            .layout(index_no)
            .cloned()
            .ok_or_else(|| SpaceError::InvalidRequest(format!("no index {}", index_no)))
    }

    fn sent(&self, op: &'static str, shards: &ShardSet) {
        counter!("space_requests_total", 1, "op" => op);
        debug!(space_no = self.inner.space_no, op, shards = ?shards.as_slice(), "request built");
    }

    /// Select by any index. The index is chosen from the field names of the
    /// first key; every key is reordered to that index before encoding.
    pub fn select(&self, keys: impl Into<Keys>, offset: u32, limit: Limit, cb: Callback) -> SpaceResult<()> {
        let batch = Batch::from(keys.into());
        let first = batch.first().ok_or_else(|| SpaceError::InvalidRequest("select needs at least one key".into()))?;
        let requested: SmallVec<[&str; 4]> = first.names().collect();
        let resolved = self.inner.indexes.resolve(requested.as_slice())?;
        let keys = match &batch {
            Batch::Rows(rows) => rows.iter().map(|r| project_key(r, resolved.fields)).collect::<SpaceResult<Vec<_>>>()?,
            Batch::Columns(rec) => transpose(rec, resolved.fields)?,
        };
        let index_no = resolved.index_no;
        let shard_numbers = self.inner.router.for_keys(index_no, &keys);
        let req = SelectRequest {
            space_no: self.inner.space_no,
            index_no,
            offset,
            limit,
            keys,
            field_types: self.inner.schema.layout().clone(),
            index_types: self.index_types(index_no)?,
            shard_numbers,
            translators: self.translators.clone(),
        };
        self.sent("select", &req.shard_numbers);
        self.inner.transport.select(req, cb);
        Ok(())
    }

    pub fn all(&self, keys: impl Into<Keys>, cb: Callback, opts: SelectOpts) -> SpaceResult<()> {
        self.select(keys, opts.offset, opts.limit, cb)
    }

    pub fn find_first(&self, key: impl Into<Keys>, cb: Callback) -> SpaceResult<()> { self.select(key, 0, Limit::First, cb) }

    /// Select on the primary index; keys may be named or raw.
    pub fn select_by_primary_keys<K>(&self, keys: K, cb: Callback, opts: SelectOpts) -> SpaceResult<()>
    where
        K: IntoIterator,
        K::Item: Into<PrimaryKey>,
    {
        let keys = keys
            .into_iter()
            .map(|k| self.inner.indexes.prepare_primary_key(k.into()))
            .collect::<SpaceResult<Vec<_>>>()?;
        self.select_primary(keys, opts.offset, opts.limit, cb)
    }

    pub fn get_by_primary_key(&self, pk: impl Into<PrimaryKey>, cb: Callback) -> SpaceResult<()> {
        let pk = self.inner.indexes.prepare_primary_key(pk.into())?;
        self.select_primary(vec![pk], 0, Limit::First, cb)
    }

    fn select_primary(&self, keys: Vec<Vec<Value>>, offset: u32, limit: Limit, cb: Callback) -> SpaceResult<()> {
        if keys.is_empty() {
            return Err(SpaceError::InvalidRequest("select needs at least one key".into()));
        }
        let shard_numbers = self.inner.router.for_keys(0, &keys);
        let req = SelectRequest {
            space_no: self.inner.space_no,
            index_no: 0,
            offset,
            limit,
            keys,
            field_types: self.inner.schema.layout().clone(),
            index_types: self.index_types(0)?,
            shard_numbers,
            translators: self.translators.clone(),
        };
        self.sent("select", &req.shard_numbers);
        self.inner.transport.select(req, cb);
        Ok(())
    }

    /// Insert; the store rejects an existing primary key.
    pub fn insert(&self, record: &Record, cb: Callback, opts: WriteOpts) -> SpaceResult<()> {
        self.write(InsertMode::Add, record, cb, opts)
    }

    /// Insert or overwrite.
    pub fn replace(&self, record: &Record, cb: Callback, opts: WriteOpts) -> SpaceResult<()> {
        self.write(InsertMode::Replace, record, cb, opts)
    }

    fn write(&self, mode: InsertMode, record: &Record, cb: Callback, opts: WriteOpts) -> SpaceResult<()> {
        let tuple = self.inner.schema.record_to_tuple(record)?;
        let shard_numbers = self.inner.router.for_tuple(&tuple);
        let req = InsertRequest {
            space_no: self.inner.space_no,
            mode,
            tuple,
            field_types: self.inner.schema.layout().clone(),
            return_tuple: opts.return_tuple,
            shard_numbers,
            translators: self.translators.clone(),
        };
        self.sent(if mode == InsertMode::Add { "insert" } else { "replace" }, &req.shard_numbers);
        self.inner.transport.insert(req, cb);
        Ok(())
    }

    pub fn update(&self, pk: impl Into<PrimaryKey>, entries: &[UpdateEntry], cb: Callback, opts: WriteOpts) -> SpaceResult<()> {
        let key = self.inner.indexes.prepare_primary_key(pk.into())?;
        let ops = resolve_updates(&self.inner.schema, entries)?;
        let shard_numbers = self.inner.router.for_key(0, &key);
        let req = UpdateRequest {
            space_no: self.inner.space_no,
            key,
            ops,
            field_types: self.inner.schema.layout().clone(),
            index_types: self.index_types(0)?,
            return_tuple: opts.return_tuple,
            shard_numbers,
            translators: self.translators.clone(),
        };
        self.sent("update", &req.shard_numbers);
        self.inner.transport.update(req, cb);
        Ok(())
    }

    pub fn delete(&self, pk: impl Into<PrimaryKey>, cb: Callback, opts: WriteOpts) -> SpaceResult<()> {
        let key = self.inner.indexes.prepare_primary_key(pk.into())?;
        let shard_numbers = self.inner.router.for_key(0, &key);
        let req = DeleteRequest {
            space_no: self.inner.space_no,
            key,
            field_types: self.inner.schema.layout().clone(),
            index_types: self.index_types(0)?,
            return_tuple: opts.return_tuple,
            shard_numbers,
            translators: self.translators.clone(),
        };
        self.sent("delete", &req.shard_numbers);
        self.inner.transport.delete(req, cb);
        Ok(())
    }

    /// Leading space argument and matching argument types. The space number
    /// travels as a string; untyped arguments default to strings too.
    fn call_args(&self, args: Vec<Value>, opts: &CallOpts) -> (Vec<Value>, Option<Layout>) {
        let space_no = match opts.space {
            SpaceArg::Own => self.inner.space_no,
            SpaceArg::Other(n) => n,
            SpaceArg::Omit => return (args, opts.arg_types.clone()),
        };
        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(Value::Int(space_no as i64));
        all.extend(args);
        let str_codec = Codec::Primitive(PrimitiveType::Str);
        let types = match &opts.arg_types {
            Some(given) => {
                let mut codecs = vec![str_codec];
                codecs.extend(given.codecs.iter().cloned());
                Layout::new(codecs, given.trailing)
            }
            None => Layout::new(vec![str_codec], Trailing::Repeat(1)),
        };
        (all, Some(types))
    }

    fn extra_chain(base: Option<TranslatorChain>, extra: &[Arc<dyn Translator>]) -> Option<TranslatorChain> {
        if extra.is_empty() { return base; }
        let mut chain = base.unwrap_or_else(TranslatorChain::empty);
        for stage in extra { chain = chain.with(Arc::clone(stage)); }
        Some(chain)
    }

    /// Call a stored procedure expecting tuples of this space.
    ///
    /// Unless told otherwise, the result is decoded with the space layout and
    /// translated with the space chain.
    pub fn call(&self, function: &str, args: Vec<Value>, cb: Callback, opts: CallOpts) -> SpaceResult<()> {
        let (args, arg_types) = self.call_args(args, &opts);
        let return_tuple = opts.return_tuple.unwrap_or(true);
        let (returns, translators) = if !return_tuple {
            (None, None)
        } else {
            match opts.returns {
                None => (Some(self.inner.schema.result_layout()), Self::extra_chain(Some(self.translators.clone()), &opts.translators)),
                Some(Returns::Layout(layout)) => (Some(layout), Self::extra_chain(None, &opts.translators)),
                Some(Returns::Fields(decls)) => {
                    let schema = FieldSchema::compile(decls)?;
                    (Some(schema.layout().clone()), Self::extra_chain(Some(schema.default_chain()), &opts.translators))
                }
            }
        };
        let req = CallRequest { function: function.to_string(), args, arg_types, return_tuple, returns, translators };
        self.sent("call", &ShardSet::single(0));
        self.inner.transport.call(req, cb);
        Ok(())
    }

    /// Call a stored procedure without result inference.
    pub fn invoke(&self, function: &str, args: Vec<Value>, cb: Callback, opts: CallOpts) -> SpaceResult<()> {
        let (args, arg_types) = self.call_args(args, &opts);
        let return_tuple = opts.return_tuple.unwrap_or(false);
        let returns = match opts.returns {
            Some(Returns::Layout(layout)) => Some(layout),
            Some(Returns::Fields(decls)) => Some(FieldSchema::compile(decls)?.layout().clone()),
            None => None,
        };
        let translators = Self::extra_chain(None, &opts.translators);
        let req = CallRequest { function: function.to_string(), args, arg_types, return_tuple, returns, translators };
        self.sent("invoke", &ShardSet::single(0));
        self.inner.transport.call(req, cb);
        Ok(())
    }
}
