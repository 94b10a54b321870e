//! Collection operations.
//!
//! Every operation resolves its options and flags, encodes its arguments,
//! borrows one pooled connection for the driver call, decodes the result
//! and gives the connection back before returning, whether or not the call
//! succeeded. Arguments are encoded before a connection is borrowed, so an
//! encoding failure never reaches the driver.

use std::time::Instant;

use bson::Document;
use chorus_value::{Table, Value};
use tracing::{info, warn};

use crate::codec::Codec;
use crate::collection::Collection;
use crate::driver::{FindAndModify, UpdateRequest};
use crate::error::{MongoError, MongoResult};
use crate::flags::BehaviorFlags;
use crate::options::{
    BulkOptions, ReadPreference, SearchOptions, SearchPurpose, WriteConcern, projection_document,
};

/// Encode a query. Void, `#f` and the empty choice match everything.
pub(crate) fn query_document(query: &Value, codec: &Codec<'_>) -> MongoResult<Document> {
    match query {
        Value::Void | Value::Bool(false) => Ok(Document::new()),
        Value::Choice(choice) if choice.is_empty() => Ok(Document::new()),
        Value::Table(table) => codec.encode_table(table),
        other => Err(MongoError::bad_query(format!(
            "a query must be a table, not a {}",
            other.kind_name()
        ))),
    }
}

fn is_identifier(value: &Value) -> bool {
    matches!(value, Value::Oid(_) | Value::ObjectId(_))
}

/// Apply `f` to each target in turn and combine the results into a choice.
///
/// The first failure stops the iteration and is returned; results already
/// produced are dropped.
pub fn pointwise<T, F>(targets: &[T], mut f: F) -> MongoResult<Value>
where
    F: FnMut(&T) -> MongoResult<Value>,
{
    let mut results = Vec::with_capacity(targets.len());
    for target in targets {
        results.push(f(target)?);
    }
    Ok(Value::choice(results))
}

fn log_op(flags: BehaviorFlags, coll: &Collection, op: &str, count: u64, started: Instant) {
    if flags.contains(BehaviorFlags::LOGOPS) {
        info!(
            collection = %coll.namespace(),
            op = op,
            count = count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "MongoDB operation"
        );
    }
}

impl Collection {
    fn id_query(&self, id: &Value, codec: &Codec<'_>) -> MongoResult<Document> {
        codec.encode_table(&Table::new().with(self.oidslot().clone(), id.clone()))
    }

    fn selector_document(&self, selector: &Value, codec: &Codec<'_>) -> MongoResult<Document> {
        if is_identifier(selector) {
            self.id_query(selector, codec)
        } else {
            query_document(selector, codec)
        }
    }

    /// Insert a document, or every document of a choice.
    ///
    /// A single document returns `#t`. A choice is written as one bulk
    /// operation and returns the decoded acknowledgment document. Every
    /// document of a choice is encoded before anything is sent.
    pub fn insert(&self, value: &Value, options: &Value) -> MongoResult<Value> {
        let started = Instant::now();
        let (layers, flags) = self.call(options);
        let codec = self.codec(flags);

        if let Value::Choice(choice) = value {
            let docs = choice
                .iter()
                .map(|v| codec.encode_document(v))
                .collect::<MongoResult<Vec<_>>>()?;
            if docs.is_empty() {
                return Ok(Value::empty_choice());
            }
            let count = docs.len() as u64;
            let bulk = BulkOptions::resolve(&layers);
            let reply = self.with_connection(flags, |conn| {
                conn.insert_many(self.namespace(), docs, &bulk)
            })?;
            log_op(flags, self, "insert", count, started);
            return codec.decode_document(&reply);
        }

        let doc = codec.encode_document(value)?;
        let write_concern = WriteConcern::resolve(&layers);
        self.with_connection(flags, |conn| {
            conn.insert_one(self.namespace(), doc, write_concern.as_ref())
        })?;
        log_op(flags, self, "insert", 1, started);
        Ok(Value::Bool(true))
    }

    /// Remove documents.
    ///
    /// An identifier, or a table carrying the identifier field (or `_id`),
    /// removes that one document. Any other table is a query whose every
    /// match is removed. Other values are taken as an identifier.
    pub fn remove(&self, selector: &Value, options: &Value) -> MongoResult<bool> {
        let started = Instant::now();
        let (layers, flags) = self.call(options);
        let codec = self.codec(flags);

        let (filter, single) = match selector {
            Value::Table(table) => {
                let id = table
                    .get(self.oidslot())
                    .map(|id| (self.oidslot().clone(), id))
                    .or_else(|| table.get_named("_id").map(|id| ("_id".into(), id)));
                match id {
                    Some((slot, id)) => (codec.encode_table(&Table::new().with(slot, id.clone()))?, true),
                    None => (codec.encode_table(table)?, false),
                }
            }
            other => (self.id_query(other, &codec)?, true),
        };
        let write_concern = WriteConcern::resolve(&layers);
        let removed = self.with_connection(flags, |conn| {
            conn.delete(self.namespace(), filter, single, write_concern.as_ref())
        })?;
        log_op(flags, self, "remove", removed, started);
        Ok(true)
    }

    /// Update the documents matching `query`.
    ///
    /// Every match is updated unless the `single` option is set; `upsert`
    /// inserts when nothing matches. With `softfail`, a driver failure is
    /// logged and returns `false`.
    pub fn update(&self, query: &Value, update: &Value, options: &Value) -> MongoResult<bool> {
        self.write_update(query, update, options, false)
    }

    /// Update the documents matching `query`, inserting when none match.
    pub fn upsert(&self, query: &Value, update: &Value, options: &Value) -> MongoResult<bool> {
        self.write_update(query, update, options, true)
    }

    fn write_update(&self, query: &Value, update: &Value, options: &Value, upsert: bool) -> MongoResult<bool> {
        let started = Instant::now();
        let (layers, flags) = self.call(options);
        let codec = self.codec(flags);
        let request = UpdateRequest {
            filter: self.selector_document(query, &codec)?,
            update: codec.encode_document(update)?,
            upsert: upsert || layers.test("upsert"),
            multi: !layers.test("single"),
            write_concern: WriteConcern::resolve(&layers),
        };
        match self.with_connection(flags, |conn| conn.update(self.namespace(), request)) {
            Ok(outcome) => {
                log_op(flags, self, "update", outcome.matched, started);
                Ok(true)
            }
            Err(err) if err.is_driver() && layers.test("softfail") => {
                warn!(collection = %self.namespace(), error = %err, "Update failed");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Every document matching `query`.
    ///
    /// Returns a choice, or a sequence in server order when `sorted` is set.
    pub fn find(&self, query: &Value, options: &Value) -> MongoResult<Value> {
        let started = Instant::now();
        let (layers, flags) = self.call(options);
        let codec = self.codec(flags);
        let filter = query_document(query, &codec)?;
        let search = SearchOptions::resolve(&layers, self.server().settings(), &codec, SearchPurpose::Find)?;
        let read_preference = ReadPreference::resolve(&layers, &codec)?;

        let docs = self.with_connection(flags, |conn| {
            let mut cursor = conn.find(self.namespace(), filter, &search, read_preference.as_ref())?;
            let mut docs = Vec::new();
            while let Some(doc) = cursor.next_document()? {
                docs.push(doc);
            }
            Ok(docs)
        })?;
        let values = docs
            .iter()
            .map(|doc| codec.decode_document(doc))
            .collect::<MongoResult<Vec<_>>>()?;
        log_op(flags, self, "find", values.len() as u64, started);
        Ok(if layers.test("sorted") {
            Value::Sequence(values)
        } else {
            Value::choice(values)
        })
    }

    /// Count the documents matching `query`.
    ///
    /// An empty query counts from collection metadata without sending a
    /// filter; any other table is counted exactly.
    pub fn count(&self, query: &Value, options: &Value) -> MongoResult<u64> {
        let started = Instant::now();
        let (layers, flags) = self.call(options);
        let codec = self.codec(flags);
        let filter = match query {
            Value::Void | Value::Bool(false) => None,
            Value::Choice(choice) if choice.is_empty() => None,
            Value::Table(table) if table.is_empty() => None,
            Value::Table(table) => Some(codec.encode_table(table)?),
            other => {
                return Err(MongoError::bad_query(format!(
                    "cannot count with a {} query",
                    other.kind_name()
                )));
            }
        };
        let search = SearchOptions::resolve(&layers, self.server().settings(), &codec, SearchPurpose::Count)?;
        let read_preference = ReadPreference::resolve(&layers, &codec)?;
        let count = self.with_connection(flags, |conn| match filter {
            None => conn.estimated_count(self.namespace(), &search, read_preference.as_ref()),
            Some(filter) => conn.count_documents(self.namespace(), filter, &search, read_preference.as_ref()),
        })?;
        log_op(flags, self, "count", count, started);
        Ok(count)
    }

    /// The first document matching an identifier or query, or the empty
    /// choice.
    ///
    /// An identifier is looked up in the identifier field, a table is a
    /// query and any other value is looked up as `_id`.
    pub fn get(&self, key: &Value, options: &Value) -> MongoResult<Value> {
        let started = Instant::now();
        let (layers, flags) = self.call(options);
        let codec = self.codec(flags);
        let filter = match key {
            Value::Table(table) => codec.encode_table(table)?,
            id if is_identifier(id) => self.id_query(id, &codec)?,
            other => codec.encode_table(&Table::new().with("_id", other.clone()))?,
        };
        let mut search = SearchOptions::resolve(&layers, self.server().settings(), &codec, SearchPurpose::Find)?;
        search.limit = Some(1);
        let read_preference = ReadPreference::resolve(&layers, &codec)?;

        let doc = self.with_connection(flags, |conn| {
            conn.find(self.namespace(), filter, &search, read_preference.as_ref())?
                .next_document()
        })?;
        log_op(flags, self, "get", u64::from(doc.is_some()), started);
        match doc {
            Some(doc) => codec.decode_document(&doc),
            None => Ok(Value::empty_choice()),
        }
    }

    /// Find one document and update or remove it.
    ///
    /// Options: `sort`/`sorted` (a table) picks among several matches,
    /// `fields`/`return` shapes the result, `upsert` inserts when nothing
    /// matches, `remove` deletes the document. The new state is returned
    /// unless `original` is set or `new` is `#f`. Nothing matching returns
    /// the empty choice.
    pub fn modify(&self, query: &Value, update: &Value, options: &Value) -> MongoResult<Value> {
        let started = Instant::now();
        let (layers, flags) = self.call(options);
        let codec = self.codec(flags);

        let sort = match layers.get_specified("sort").or_else(|| layers.get_specified("sorted")) {
            Some(Value::Table(table)) => Some(codec.encode_table(table)?),
            _ => None,
        };
        let fields = match layers.get_specified("fields").or_else(|| layers.get_specified("return")) {
            Some(spec) => projection_document(spec, &codec)?,
            None => None,
        };
        let remove = layers.test("remove");
        let request = FindAndModify {
            query: self.selector_document(query, &codec)?,
            sort,
            update: if remove { None } else { Some(codec.encode_document(update)?) },
            fields,
            remove,
            upsert: layers.test("upsert"),
            return_new: !layers.test("original") && layers.get_bool("new", true),
            write_concern: WriteConcern::resolve(&layers),
        };

        let doc = self.with_connection(flags, |conn| conn.find_and_modify(self.namespace(), request))?;
        log_op(flags, self, "modify", u64::from(doc.is_some()), started);
        match doc {
            Some(doc) => codec.decode_document(&doc),
            None => Ok(Value::empty_choice()),
        }
    }
}
