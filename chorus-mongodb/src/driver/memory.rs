//! An in-process driver.
//!
//! [`MemoryDriver`] keeps collections in a shared [`MemoryStore`] and
//! understands the subset of the query language the bridge itself
//! produces: equality (including array membership), the comparison and set
//! operators, `$and`/`$or`/`$nor`, and the common update operators. Every
//! call is recorded in a [`CallLog`], and a failure can be queued for any
//! kind of call with [`MemoryStore::fail_next`].

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use bson::oid::ObjectId;
use bson::{Bson, Document, doc};
use parking_lot::{Mutex, RwLock};
use tracing::trace;

use super::{
    Connection, Driver, DriverOp, FindAndModify, Namespace, RemoteCursor, UpdateOutcome,
    UpdateRequest, bulk_reply, command_results,
};
use crate::config::ServerConfig;
use crate::error::{MongoError, MongoResult};
use crate::options::{BulkOptions, ReadPreference, SearchOptions, WriteConcern};

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverCall {
    /// What kind of call.
    pub op: DriverOp,
    /// Namespace, database or server spec the call was made on.
    pub target: String,
    /// Filter or command document sent, if any.
    pub filter: Option<Document>,
    /// Number of documents written.
    pub documents: usize,
    /// Write concern sent with a write.
    pub write_concern: Option<WriteConcern>,
    /// Search or bulk options, as command fields.
    pub options: Option<Document>,
}

impl DriverCall {
    fn new(op: DriverOp, target: impl Into<String>) -> Self {
        Self {
            op,
            target: target.into(),
            filter: None,
            documents: 0,
            write_concern: None,
            options: None,
        }
    }

    fn filter(mut self, filter: &Document) -> Self {
        self.filter = Some(filter.clone());
        self
    }

    fn documents(mut self, n: usize) -> Self {
        self.documents = n;
        self
    }

    fn write_concern(mut self, wc: Option<&WriteConcern>) -> Self {
        self.write_concern = wc.copied();
        self
    }

    fn options(mut self, options: Document) -> Self {
        self.options = Some(options);
        self
    }
}

/// Shared, append-only record of driver calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<DriverCall>>>,
}

impl CallLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, call: DriverCall) {
        trace!(op = %call.op, target = %call.target, "Memory driver call");
        self.calls.lock().push(call);
    }

    /// Every call so far, oldest first.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().clone()
    }

    /// The kinds of call so far, oldest first.
    pub fn ops(&self) -> Vec<DriverOp> {
        self.calls.lock().iter().map(|c| c.op).collect()
    }

    /// How many calls of one kind were made.
    pub fn count(&self, op: DriverOp) -> usize {
        self.calls.lock().iter().filter(|c| c.op == op).count()
    }

    /// The most recent call of one kind.
    pub fn last(&self, op: DriverOp) -> Option<DriverCall> {
        self.calls.lock().iter().rev().find(|c| c.op == op).cloned()
    }

    /// Forget every call.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

/// Collections and bookkeeping shared by every memory connection.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<Namespace, Vec<Document>>>,
    log: CallLog,
    failures: Mutex<HashMap<DriverOp, VecDeque<String>>>,
    connections: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The call log.
    pub fn calls(&self) -> &CallLog {
        &self.log
    }

    /// Make the next call of kind `op` fail with `message`.
    pub fn fail_next(&self, op: DriverOp, message: impl Into<String>) {
        self.failures
            .lock()
            .entry(op)
            .or_default()
            .push_back(message.into());
    }

    /// Put documents straight into a collection.
    pub fn seed(&self, ns: &Namespace, docs: impl IntoIterator<Item = Document>) {
        let mut collections = self.collections.write();
        let coll = collections.entry(ns.clone()).or_default();
        for mut doc in docs {
            ensure_id(&mut doc);
            coll.push(doc);
        }
    }

    /// A snapshot of a collection.
    pub fn documents(&self, ns: &Namespace) -> Vec<Document> {
        self.collections.read().get(ns).cloned().unwrap_or_default()
    }

    /// Names of the collections in a database.
    pub fn collection_names(&self, db: &str) -> Vec<String> {
        self.collections
            .read()
            .keys()
            .filter(|ns| ns.db == db)
            .map(|ns| ns.coll.clone())
            .collect()
    }

    /// Connections opened so far.
    pub fn connections_opened(&self) -> usize {
        self.connections.load(AtomicOrdering::Relaxed)
    }

    fn check(&self, op: DriverOp) -> MongoResult<()> {
        let queued = self.failures.lock().get_mut(&op).and_then(VecDeque::pop_front);
        match queued {
            Some(message) => Err(MongoError::driver(message)),
            None => Ok(()),
        }
    }
}

/// Driver whose connections all share one [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryDriver {
    store: Arc<MemoryStore>,
}

impl MemoryDriver {
    /// A driver over a fresh store.
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    /// A driver over an existing store.
    pub fn with_store(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn connect(&self, config: &ServerConfig) -> MongoResult<Box<dyn Connection>> {
        self.store.log.record(DriverCall::new(DriverOp::Connect, config.spec()));
        self.store.check(DriverOp::Connect)?;
        self.store.connections.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(Box::new(MemoryConnection {
            store: Arc::clone(&self.store),
        }))
    }
}

struct MemoryConnection {
    store: Arc<MemoryStore>,
}

struct MemoryCursor {
    docs: VecDeque<Document>,
}

impl RemoteCursor for MemoryCursor {
    fn next_document(&mut self) -> MongoResult<Option<Document>> {
        Ok(self.docs.pop_front())
    }
}

fn ensure_id(doc: &mut Document) {
    if !doc.contains_key("_id") {
        let mut with_id = doc! { "_id": ObjectId::new() };
        with_id.extend(std::mem::take(doc));
        *doc = with_id;
    }
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    }
}

fn compare(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        _ if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

fn same(a: &Bson, b: &Bson) -> bool {
    compare(a, b) == Some(Ordering::Equal)
}

fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) | Some(Bson::Undefined) => 0,
        Some(Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) => 1,
        Some(Bson::String(_) | Bson::Symbol(_)) => 2,
        Some(Bson::Document(_)) => 3,
        Some(Bson::Array(_)) => 4,
        Some(Bson::Binary(_)) => 5,
        Some(Bson::ObjectId(_)) => 6,
        Some(Bson::Boolean(_)) => 7,
        Some(Bson::DateTime(_)) => 8,
        Some(_) => 9,
    }
}

fn sort_order(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => compare(x, y).unwrap_or_else(|| type_rank(a).cmp(&type_rank(b))),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_document()?.get(part)?;
    }
    Some(current)
}

fn equals_or_contains(value: Option<&Bson>, target: &Bson) -> bool {
    match (value, target) {
        (None, Bson::Null) => true,
        (None, _) => false,
        (Some(Bson::Array(_)), Bson::Array(_)) => value == Some(target),
        (Some(Bson::Array(items)), _) => items.iter().any(|item| same(item, target)),
        (Some(v), _) => same(v, target),
    }
}

fn operator_matches(value: Option<&Bson>, op: &str, arg: &Bson) -> MongoResult<bool> {
    let ordered = |wanted: &[Ordering]| {
        value
            .and_then(|v| compare(v, arg))
            .is_some_and(|ord| wanted.contains(&ord))
    };
    let members = || {
        arg.as_array()
            .ok_or_else(|| MongoError::driver(format!("{} needs an array", op)))
    };
    Ok(match op {
        "$eq" => equals_or_contains(value, arg),
        "$ne" => !equals_or_contains(value, arg),
        "$gt" => ordered(&[Ordering::Greater]),
        "$gte" => ordered(&[Ordering::Greater, Ordering::Equal]),
        "$lt" => ordered(&[Ordering::Less]),
        "$lte" => ordered(&[Ordering::Less, Ordering::Equal]),
        "$in" => members()?.iter().any(|m| equals_or_contains(value, m)),
        "$nin" => !members()?.iter().any(|m| equals_or_contains(value, m)),
        "$all" => members()?.iter().all(|m| equals_or_contains(value, m)),
        "$exists" => value.is_some() == !matches!(arg, Bson::Boolean(false) | Bson::Null),
        "$size" => match (value, as_number(arg)) {
            (Some(Bson::Array(items)), Some(n)) => items.len() as f64 == n,
            _ => false,
        },
        other => return Err(MongoError::driver(format!("unknown operator: {}", other))),
    })
}

fn is_operator_doc(value: &Bson) -> Option<&Document> {
    value
        .as_document()
        .filter(|d| d.keys().next().is_some_and(|k| k.starts_with('$')))
}

fn matches(doc: &Document, filter: &Document) -> MongoResult<bool> {
    for (key, cond) in filter {
        let ok = match key.as_str() {
            "$and" | "$or" | "$nor" => {
                let clauses = cond
                    .as_array()
                    .ok_or_else(|| MongoError::driver(format!("{} needs an array", key)))?;
                let mut hits = 0;
                for clause in clauses {
                    let clause = clause
                        .as_document()
                        .ok_or_else(|| MongoError::driver(format!("{} entries must be documents", key)))?;
                    if matches(doc, clause)? {
                        hits += 1;
                    }
                }
                match key.as_str() {
                    "$and" => hits == clauses.len(),
                    "$or" => hits > 0,
                    _ => hits == 0,
                }
            }
            _ => {
                let value = lookup(doc, key);
                match is_operator_doc(cond) {
                    Some(ops) => {
                        let mut all = true;
                        for (op, arg) in ops {
                            all &= operator_matches(value, op, arg)?;
                        }
                        all
                    }
                    None => equals_or_contains(value, cond),
                }
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sort_documents(docs: &mut [Document], sort: &Document) {
    docs.sort_by(|a, b| {
        for (key, direction) in sort {
            let mut ord = sort_order(lookup(a, key), lookup(b, key));
            if as_number(direction).is_some_and(|d| d < 0.0) {
                ord = ord.reverse();
            }
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null | Bson::Undefined => false,
        other => as_number(other).is_none_or(|n| n != 0.0),
    }
}

fn project(doc: Document, projection: &Document) -> Document {
    let including = projection
        .iter()
        .any(|(key, value)| key != "_id" && truthy(value));
    let keep_id = projection.get("_id").is_none_or(truthy);
    if including {
        doc.into_iter()
            .filter(|(key, _)| {
                (key == "_id" && keep_id) || projection.get(key).is_some_and(truthy)
            })
            .collect()
    } else {
        doc.into_iter()
            .filter(|(key, _)| {
                if key == "_id" {
                    keep_id
                } else {
                    projection.get(key).is_none_or(truthy)
                }
            })
            .collect()
    }
}

fn add_numbers(current: Option<&Bson>, delta: &Bson) -> MongoResult<Bson> {
    match (current, delta) {
        (None, d) => Ok(d.clone()),
        (Some(Bson::Int32(a)), Bson::Int32(b)) => Ok(a
            .checked_add(*b)
            .map_or_else(|| Bson::Int64(i64::from(*a) + i64::from(*b)), Bson::Int32)),
        (Some(Bson::Int64(a)), Bson::Int32(b)) => Ok(Bson::Int64(a.saturating_add(i64::from(*b)))),
        (Some(Bson::Int32(a)), Bson::Int64(b)) => Ok(Bson::Int64(i64::from(*a).saturating_add(*b))),
        (Some(Bson::Int64(a)), Bson::Int64(b)) => Ok(Bson::Int64(a.saturating_add(*b))),
        (Some(a), b) => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => Ok(Bson::Double(x + y)),
            _ => Err(MongoError::driver("cannot apply $inc to a non-numeric value")),
        },
    }
}

fn each_value(value: &Bson) -> Vec<Bson> {
    match value.as_document().and_then(|d| d.get_array("$each").ok()) {
        Some(items) => items.clone(),
        None => vec![value.clone()],
    }
}

fn apply_update(doc: &mut Document, update: &Document) -> MongoResult<()> {
    if !update.keys().any(|k| k.starts_with('$')) {
        let id = doc.get("_id").cloned();
        doc.clear();
        if let Some(id) = id {
            doc.insert("_id", id);
        }
        for (key, value) in update {
            if key != "_id" || !doc.contains_key("_id") {
                doc.insert(key.clone(), value.clone());
            }
        }
        return Ok(());
    }
    for (op, fields) in update {
        let fields = fields
            .as_document()
            .ok_or_else(|| MongoError::driver(format!("{} needs a document", op)))?;
        for (key, value) in fields {
            match op.as_str() {
                "$set" => {
                    doc.insert(key.clone(), value.clone());
                }
                "$unset" => {
                    doc.remove(key);
                }
                "$inc" => {
                    let sum = add_numbers(doc.get(key), value)?;
                    doc.insert(key.clone(), sum);
                }
                "$push" | "$addToSet" => {
                    let mut items = match doc.get(key) {
                        None => Vec::new(),
                        Some(Bson::Array(items)) => items.clone(),
                        Some(_) => {
                            return Err(MongoError::driver(format!(
                                "{} target '{}' is not an array",
                                op, key
                            )));
                        }
                    };
                    for item in each_value(value) {
                        if op == "$push" || !items.iter().any(|x| same(x, &item)) {
                            items.push(item);
                        }
                    }
                    doc.insert(key.clone(), items);
                }
                "$pull" => {
                    if let Some(Bson::Array(items)) = doc.get_mut(key) {
                        items.retain(|x| !same(x, value));
                    }
                }
                other => {
                    return Err(MongoError::driver(format!("unknown update operator: {}", other)));
                }
            }
        }
    }
    Ok(())
}

fn upsert_seed(filter: &Document) -> Document {
    filter
        .iter()
        .filter(|(key, value)| !key.starts_with('$') && is_operator_doc(value).is_none())
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn check_unique(existing: &[Document], doc: &Document, ns: &Namespace) -> MongoResult<()> {
    let id = doc.get("_id");
    if id.is_some() && existing.iter().any(|d| d.get("_id") == id) {
        return Err(MongoError::driver(format!(
            "E11000 duplicate key error collection: {} index: _id_",
            ns
        )));
    }
    Ok(())
}

impl MemoryConnection {
    fn select(&self, ns: &Namespace, filter: &Document) -> MongoResult<Vec<Document>> {
        let collections = self.store.collections.read();
        let mut found = Vec::new();
        for doc in collections.get(ns).map(Vec::as_slice).unwrap_or_default() {
            if matches(doc, filter)? {
                found.push(doc.clone());
            }
        }
        Ok(found)
    }

    fn execute(&self, db: &str, command: &Document) -> MongoResult<Document> {
        let Some((name, arg)) = command.iter().next() else {
            return Err(MongoError::driver("empty command document"));
        };
        let coll_arg = || {
            arg.as_str()
                .map(|c| Namespace::new(db, c))
                .ok_or_else(|| MongoError::driver(format!("{} needs a collection name", name)))
        };
        match name.as_str() {
            "ping" => Ok(doc! { "ok": 1.0 }),
            "hello" | "isMaster" | "ismaster" => Ok(doc! {
                "isWritablePrimary": true,
                "ismaster": true,
                "maxBsonObjectSize": 16_777_216,
                "ok": 1.0,
            }),
            "buildInfo" | "buildinfo" => Ok(doc! { "version": "0.0.0-memory", "ok": 1.0 }),
            "count" => {
                let ns = coll_arg()?;
                let query = command.get_document("query").cloned().unwrap_or_default();
                let n = self.select(&ns, &query)?.len();
                Ok(doc! { "n": n as i64, "ok": 1.0 })
            }
            "distinct" => {
                let ns = coll_arg()?;
                let key = command
                    .get_str("key")
                    .map_err(|_| MongoError::driver("distinct needs a key"))?;
                let query = command.get_document("query").cloned().unwrap_or_default();
                let mut values: Vec<Bson> = Vec::new();
                for doc in self.select(&ns, &query)? {
                    let found = match lookup(&doc, key) {
                        Some(Bson::Array(items)) => items.clone(),
                        Some(v) => vec![v.clone()],
                        None => Vec::new(),
                    };
                    for v in found {
                        if !values.iter().any(|x| same(x, &v)) {
                            values.push(v);
                        }
                    }
                }
                Ok(doc! { "values": values, "ok": 1.0 })
            }
            "listCollections" => {
                let batch: Vec<Bson> = self
                    .store
                    .collection_names(db)
                    .into_iter()
                    .map(|name| Bson::Document(doc! { "name": name, "type": "collection" }))
                    .collect();
                Ok(doc! {
                    "cursor": { "id": 0_i64, "ns": format!("{}.$cmd.listCollections", db), "firstBatch": batch },
                    "ok": 1.0,
                })
            }
            "drop" => {
                let ns = coll_arg()?;
                match self.store.collections.write().remove(&ns) {
                    Some(_) => Ok(doc! { "ns": ns.to_string(), "ok": 1.0 }),
                    None => Err(MongoError::driver("ns not found")),
                }
            }
            "dropDatabase" => {
                self.store.collections.write().retain(|ns, _| ns.db != db);
                Ok(doc! { "dropped": db, "ok": 1.0 })
            }
            other => Err(MongoError::driver(format!("no such command: '{}'", other))),
        }
    }
}

impl Connection for MemoryConnection {
    fn insert_one(
        &mut self,
        ns: &Namespace,
        mut doc: Document,
        write_concern: Option<&WriteConcern>,
    ) -> MongoResult<()> {
        self.store.log.record(
            DriverCall::new(DriverOp::InsertOne, ns.to_string())
                .documents(1)
                .write_concern(write_concern),
        );
        self.store.check(DriverOp::InsertOne)?;
        ensure_id(&mut doc);
        let mut collections = self.store.collections.write();
        let coll = collections.entry(ns.clone()).or_default();
        check_unique(coll, &doc, ns)?;
        coll.push(doc);
        Ok(())
    }

    fn insert_many(
        &mut self,
        ns: &Namespace,
        docs: Vec<Document>,
        options: &BulkOptions,
    ) -> MongoResult<Document> {
        self.store.log.record(
            DriverCall::new(DriverOp::InsertMany, ns.to_string())
                .documents(docs.len())
                .write_concern(options.write_concern.as_ref())
                .options(options.to_document()),
        );
        self.store.check(DriverOp::InsertMany)?;
        let mut collections = self.store.collections.write();
        let coll = collections.entry(ns.clone()).or_default();
        let mut batch = Vec::with_capacity(docs.len());
        for mut doc in docs {
            ensure_id(&mut doc);
            check_unique(coll, &doc, ns)?;
            check_unique(&batch, &doc, ns)?;
            batch.push(doc);
        }
        let inserted = batch.len() as u64;
        coll.extend(batch);
        Ok(bulk_reply(inserted))
    }

    fn delete(
        &mut self,
        ns: &Namespace,
        filter: Document,
        single: bool,
        write_concern: Option<&WriteConcern>,
    ) -> MongoResult<u64> {
        self.store.log.record(
            DriverCall::new(DriverOp::Delete, ns.to_string())
                .filter(&filter)
                .options(doc! { "single": single })
                .write_concern(write_concern),
        );
        self.store.check(DriverOp::Delete)?;
        let mut collections = self.store.collections.write();
        let Some(coll) = collections.get_mut(ns) else {
            return Ok(0);
        };
        let mut doomed = Vec::new();
        for (index, doc) in coll.iter().enumerate() {
            if single && !doomed.is_empty() {
                break;
            }
            if matches(doc, &filter)? {
                doomed.push(index);
            }
        }
        for index in doomed.iter().rev() {
            coll.remove(*index);
        }
        Ok(doomed.len() as u64)
    }

    fn update(&mut self, ns: &Namespace, request: UpdateRequest) -> MongoResult<UpdateOutcome> {
        self.store.log.record(
            DriverCall::new(DriverOp::Update, ns.to_string())
                .filter(&request.filter)
                .options(doc! { "upsert": request.upsert, "multi": request.multi })
                .write_concern(request.write_concern.as_ref()),
        );
        self.store.check(DriverOp::Update)?;
        let mut collections = self.store.collections.write();
        let coll = collections.entry(ns.clone()).or_default();
        let mut outcome = UpdateOutcome::default();
        for doc in coll.iter_mut() {
            if !request.multi && outcome.matched > 0 {
                break;
            }
            if matches(doc, &request.filter)? {
                outcome.matched += 1;
                let before = doc.clone();
                apply_update(doc, &request.update)?;
                if *doc != before {
                    outcome.modified += 1;
                }
            }
        }
        if outcome.matched == 0 && request.upsert {
            let mut doc = upsert_seed(&request.filter);
            apply_update(&mut doc, &request.update)?;
            ensure_id(&mut doc);
            outcome.upserted_id = doc.get("_id").cloned();
            coll.push(doc);
        }
        Ok(outcome)
    }

    fn find(
        &mut self,
        ns: &Namespace,
        filter: Document,
        options: &SearchOptions,
        _read_preference: Option<&ReadPreference>,
    ) -> MongoResult<Box<dyn RemoteCursor>> {
        self.store.log.record(
            DriverCall::new(DriverOp::Find, ns.to_string())
                .filter(&filter)
                .options(options.to_document()),
        );
        self.store.check(DriverOp::Find)?;
        let mut docs = self.select(ns, &filter)?;
        if let Some(sort) = &options.sort {
            sort_documents(&mut docs, sort);
        }
        let skip = options.skip.unwrap_or(0) as usize;
        let limit = match options.limit {
            Some(n) if n != 0 => n.unsigned_abs() as usize,
            _ => usize::MAX,
        };
        let docs = docs
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|doc| match &options.projection {
                Some(projection) => project(doc, projection),
                None => doc,
            })
            .collect();
        Ok(Box::new(MemoryCursor { docs }))
    }

    fn estimated_count(
        &mut self,
        ns: &Namespace,
        options: &SearchOptions,
        _read_preference: Option<&ReadPreference>,
    ) -> MongoResult<u64> {
        self.store.log.record(
            DriverCall::new(DriverOp::EstimatedCount, ns.to_string()).options(options.to_document()),
        );
        self.store.check(DriverOp::EstimatedCount)?;
        Ok(self.store.collections.read().get(ns).map_or(0, Vec::len) as u64)
    }

    fn count_documents(
        &mut self,
        ns: &Namespace,
        filter: Document,
        options: &SearchOptions,
        _read_preference: Option<&ReadPreference>,
    ) -> MongoResult<u64> {
        self.store.log.record(
            DriverCall::new(DriverOp::CountDocuments, ns.to_string())
                .filter(&filter)
                .options(options.to_document()),
        );
        self.store.check(DriverOp::CountDocuments)?;
        Ok(self.select(ns, &filter)?.len() as u64)
    }

    fn find_and_modify(
        &mut self,
        ns: &Namespace,
        request: FindAndModify,
    ) -> MongoResult<Option<Document>> {
        self.store.log.record(
            DriverCall::new(DriverOp::FindAndModify, ns.to_string())
                .filter(&request.query)
                .write_concern(request.write_concern.as_ref()),
        );
        self.store.check(DriverOp::FindAndModify)?;
        let mut candidates = self.select(ns, &request.query)?;
        if let Some(sort) = &request.sort {
            sort_documents(&mut candidates, sort);
        }
        let shaped = |doc: Document| match &request.fields {
            Some(fields) => project(doc, fields),
            None => doc,
        };
        let mut collections = self.store.collections.write();
        let coll = collections.entry(ns.clone()).or_default();

        let Some(target) = candidates.into_iter().next() else {
            if !request.upsert || request.remove {
                return Ok(None);
            }
            let mut doc = upsert_seed(&request.query);
            if let Some(update) = &request.update {
                apply_update(&mut doc, update)?;
            }
            ensure_id(&mut doc);
            coll.push(doc.clone());
            return Ok(request.return_new.then(|| shaped(doc)));
        };

        let Some(index) = coll.iter().position(|d| *d == target) else {
            return Ok(None);
        };
        if request.remove {
            return Ok(Some(shaped(coll.remove(index))));
        }
        if let Some(update) = &request.update {
            apply_update(&mut coll[index], update)?;
        }
        let result = if request.return_new {
            coll[index].clone()
        } else {
            target
        };
        Ok(Some(shaped(result)))
    }

    fn run_command(&mut self, db: &str, command: Document) -> MongoResult<Vec<Document>> {
        self.store
            .log
            .record(DriverCall::new(DriverOp::Command, db).filter(&command));
        self.store.check(DriverOp::Command)?;
        self.execute(db, &command).map(command_results)
    }

    fn command_simple(&mut self, db: &str, command: Document) -> MongoResult<Document> {
        self.store
            .log
            .record(DriverCall::new(DriverOp::CommandSimple, db).filter(&command));
        self.store.check(DriverOp::CommandSimple)?;
        self.execute(db, &command)
    }
}
