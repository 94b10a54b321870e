//! Server-side cursors.
//!
//! A [`Cursor`] keeps one pooled connection checked out from the moment it
//! is opened until its results run out or it is closed. Because that
//! connection must never be used by two threads at once, a cursor remembers
//! the thread that opened it and refuses to fetch from any other thread
//! with [`MongoError::ThreadConflict`]. The refusal changes nothing, so the
//! owning thread can carry on reading afterwards.
//!
//! The `mongodb:threads:reckless` setting (or a `reckless` option) turns the
//! check off.

use std::thread::{self, ThreadId};

use bson::Document;
use chorus_value::Value;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::collection::Collection;
use crate::driver::RemoteCursor;
use crate::error::{MongoError, MongoResult};
use crate::flags::BehaviorFlags;
use crate::ops::query_document;
use crate::options::{OptionLayers, ReadPreference, SearchOptions, SearchPurpose, resolve_flags};
use crate::pool::PooledConnection;

struct CursorState {
    remote: Option<Box<dyn RemoteCursor>>,
    conn: Option<PooledConnection>,
    buffered: Option<Document>,
    skipped: u64,
    read: u64,
    done: bool,
    closed: bool,
}

impl CursorState {
    fn release(&mut self) {
        self.remote = None;
        if let Some(conn) = self.conn.take() {
            conn.release();
        }
    }

    fn finish(&mut self) {
        self.done = true;
        self.release();
    }

    fn next(&mut self) -> MongoResult<Option<Document>> {
        if let Some(doc) = self.buffered.take() {
            return Ok(Some(doc));
        }
        if self.done {
            return Ok(None);
        }
        let next = match self.remote.as_mut() {
            Some(remote) => remote.next_document()?,
            None => None,
        };
        if next.is_none() {
            self.finish();
        }
        Ok(next)
    }
}

/// An open query over a collection.
pub struct Cursor {
    collection: Collection,
    query: Value,
    options: OptionLayers,
    flags: BehaviorFlags,
    owner: ThreadId,
    reckless: bool,
    state: Mutex<CursorState>,
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Cursor")
            .field("collection", &self.collection.namespace().to_string())
            .field("query", &self.query)
            .field("owner", &self.owner)
            .field("skipped", &state.skipped)
            .field("read", &state.read)
            .field("done", &state.done)
            .field("closed", &state.closed)
            .finish()
    }
}

impl Cursor {
    /// Open a cursor over the documents of `collection` matching `query`.
    ///
    /// The search options (`skip`, `limit`, `sorted`, `return`, `batch`,
    /// `maxwait`, ...) and read preference are resolved from `options`
    /// layered over the collection's.
    pub fn open(collection: &Collection, query: &Value, options: &Value) -> MongoResult<Self> {
        let (layers, flags) = collection.call(options);
        let server = collection.server();
        let codec = collection.codec(flags);
        let filter = query_document(query, &codec)?;
        let search = SearchOptions::resolve(&layers, server.settings(), &codec, SearchPurpose::Find)?;
        let read_preference = ReadPreference::resolve(&layers, &codec)?;

        let mut conn = server.acquire(flags)?;
        let remote = conn
            .connection()?
            .find(collection.namespace(), filter, &search, read_preference.as_ref())
            .map_err(|e| e.with_context(collection.context()))?;

        let reckless = server.settings().reckless_threading || layers.test("reckless");
        if flags.contains(BehaviorFlags::LOGOPS) {
            info!(collection = %collection.namespace(), query = %query, "Opened cursor");
        } else {
            debug!(collection = %collection.namespace(), "Opened cursor");
        }
        Ok(Self {
            collection: collection.clone(),
            query: query.clone(),
            options: layers,
            flags,
            owner: thread::current().id(),
            reckless,
            state: Mutex::new(CursorState {
                remote: Some(remote),
                conn: Some(conn),
                buffered: None,
                skipped: search.skip.unwrap_or(0),
                read: 0,
                done: false,
                closed: false,
            }),
        })
    }

    /// The collection being read.
    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// The query the cursor was opened with.
    pub fn query(&self) -> &Value {
        &self.query
    }

    /// Behavior flags used to decode results.
    pub fn flags(&self) -> BehaviorFlags {
        self.flags
    }

    fn check_thread(&self) -> MongoResult<()> {
        let current = thread::current().id();
        if current == self.owner || self.reckless {
            return Ok(());
        }
        Err(MongoError::ThreadConflict {
            owner: format!("{:?}", self.owner),
            current: format!("{:?}", current),
        })
    }

    /// Whether no documents remain.
    ///
    /// Fetches one document ahead when none is buffered; that document is
    /// returned by the next read.
    pub fn is_exhausted(&self) -> MongoResult<bool> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(MongoError::CursorClosed);
        }
        if state.buffered.is_some() {
            return Ok(false);
        }
        if state.done {
            return Ok(true);
        }
        self.check_thread()?;
        match state.next()? {
            Some(doc) => {
                state.buffered = Some(doc);
                Ok(false)
            }
            None => Ok(true),
        }
    }

    /// Skip up to `n` documents, returning how many were skipped.
    pub fn skip(&self, n: u64) -> MongoResult<u64> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(MongoError::CursorClosed);
        }
        if state.done && state.buffered.is_none() {
            return Ok(0);
        }
        self.check_thread()?;
        let mut skipped = 0;
        while skipped < n && state.next()?.is_some() {
            skipped += 1;
        }
        state.skipped += skipped;
        trace!(collection = %self.collection.namespace(), skipped, "Skipped cursor documents");
        Ok(skipped)
    }

    /// Read up to `n` documents.
    ///
    /// The result is a choice, or a sequence in server order when the
    /// `sorted` option is set. An exhausted cursor returns an empty result.
    ///
    /// A document that fails to decode stays at the head of the cursor and
    /// the error is returned; `skip(1)` moves past it.
    pub fn read(&self, n: usize, options: &Value) -> MongoResult<Value> {
        let layers = OptionLayers::for_call(options, &self.options);
        self.read_as(n, options, layers.test("sorted"))
    }

    /// Read up to `n` documents as a sequence in server order.
    pub fn read_ordered(&self, n: usize, options: &Value) -> MongoResult<Value> {
        self.read_as(n, options, true)
    }

    fn read_as(&self, n: usize, options: &Value, ordered: bool) -> MongoResult<Value> {
        let empty = || {
            if ordered {
                Value::Sequence(Vec::new())
            } else {
                Value::empty_choice()
            }
        };
        let mut state = self.state.lock();
        if state.closed {
            return Err(MongoError::CursorClosed);
        }
        if state.done && state.buffered.is_none() {
            return Ok(empty());
        }
        self.check_thread()?;
        if n == 0 {
            return Ok(empty());
        }

        let flags = resolve_flags(options, self.flags);
        let codec = self.collection.codec(flags);
        let mut values = Vec::with_capacity(n.min(1024));
        while values.len() < n {
            let Some(doc) = state.next()? else {
                break;
            };
            match codec.decode_document(&doc) {
                Ok(value) => values.push(value),
                Err(e) => {
                    state.read += values.len() as u64;
                    state.buffered = Some(doc);
                    warn!(
                        collection = %self.collection.namespace(),
                        decoded = values.len(),
                        error = %e,
                        "Could not decode cursor document"
                    );
                    return Err(e);
                }
            }
        }
        state.read += values.len() as u64;
        if flags.contains(BehaviorFlags::LOGOPS) {
            info!(
                collection = %self.collection.namespace(),
                count = values.len(),
                total = state.read,
                "Read from cursor"
            );
        }
        Ok(if ordered {
            Value::Sequence(values)
        } else {
            Value::choice(values)
        })
    }

    /// Release the cursor's connection. Closing twice does nothing.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.buffered = None;
        state.release();
        debug!(
            collection = %self.collection.namespace(),
            read = state.read,
            "Closed cursor"
        );
    }

    /// Documents skipped, including the `skip` option.
    pub fn skip_count(&self) -> u64 {
        self.state.lock().skipped
    }

    /// Documents returned by reads.
    pub fn read_count(&self) -> u64 {
        self.state.lock().read
    }

    /// Whether the cursor was closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Whether the server has no more documents.
    pub fn is_done(&self) -> bool {
        self.state.lock().done
    }
}

impl Collection {
    /// Open a cursor over the documents matching `query`.
    pub fn cursor(&self, query: &Value, options: &Value) -> MongoResult<Cursor> {
        Cursor::open(self, query, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MongoContext;
    use crate::driver::{DriverOp, MemoryDriver, Namespace};
    use bson::doc;
    use chorus_value::Table;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn setup(n: i32) -> (MemoryDriver, Collection) {
        let driver = MemoryDriver::new();
        driver.store().seed(
            &Namespace::new("crm", "users"),
            (0..n).map(|i| doc! { "_id": i, "n": i }),
        );
        let coll = MongoContext::builder()
            .driver(Arc::new(driver.clone()))
            .build()
            .unwrap()
            .open(&Value::from("mongodb://localhost/crm"), &Value::Void)
            .unwrap()
            .collection("users", &Value::Void)
            .unwrap();
        (driver, coll)
    }

    fn ns_of(value: &Value) -> Vec<i64> {
        let items = match value {
            Value::Sequence(items) => items.as_slice(),
            other => other.as_members(),
        };
        items
            .iter()
            .filter_map(|v| v.as_table()?.get_named("n")?.as_int())
            .collect()
    }

    #[test]
    fn test_read_in_batches_until_done() {
        let (_driver, coll) = setup(5);
        let cursor = coll.cursor(&Value::Void, &Value::Void).unwrap();
        assert_eq!(cursor.server_stats_active(), 1);

        let first = cursor.read_ordered(2, &Value::Void).unwrap();
        assert_eq!(ns_of(&first), vec![0, 1]);
        let rest = cursor.read_ordered(10, &Value::Void).unwrap();
        assert_eq!(ns_of(&rest), vec![2, 3, 4]);
        assert!(cursor.is_done());
        assert_eq!(cursor.read_count(), 5);
        assert_eq!(cursor.server_stats_active(), 0);

        assert_eq!(cursor.read(3, &Value::Void).unwrap(), Value::empty_choice());
        assert_eq!(cursor.read_ordered(3, &Value::Void).unwrap(), Value::Sequence(vec![]));
    }

    #[test]
    fn test_sorted_option_gives_sequence() {
        let (_driver, coll) = setup(3);
        let cursor = coll.cursor(&Value::Void, &Value::Void).unwrap();
        let options = Value::symbol("sorted");
        assert!(matches!(cursor.read(2, &options).unwrap(), Value::Sequence(_)));
        assert!(matches!(cursor.read(1, &Value::Void).unwrap(), Value::Table(_)));
    }

    #[test]
    fn test_is_exhausted_buffers_one_document() {
        let (_driver, coll) = setup(1);
        let cursor = coll.cursor(&Value::Void, &Value::Void).unwrap();
        assert!(!cursor.is_exhausted().unwrap());
        assert!(!cursor.is_exhausted().unwrap());
        let docs = cursor.read_ordered(5, &Value::Void).unwrap();
        assert_eq!(ns_of(&docs), vec![0]);
        assert!(cursor.is_exhausted().unwrap());
    }

    #[test]
    fn test_decode_failure_keeps_document_at_head() {
        let (driver, coll) = setup(0);
        driver.store().seed(
            &Namespace::new("crm", "users"),
            [
                doc! { "_id": 0, "n": 0 },
                doc! { "_id": 1, "n": 1 },
                doc! { "_id": 2, "n": { "%knotag": 5 } },
                doc! { "_id": 3, "n": 3 },
            ],
        );
        let cursor = coll.cursor(&Value::Void, &Value::Void).unwrap();

        assert!(cursor.read_ordered(10, &Value::Void).unwrap_err().is_codec());
        assert_eq!(cursor.read_count(), 2);
        assert!(!cursor.is_done());
        assert!(cursor.read_ordered(1, &Value::Void).unwrap_err().is_codec());
        assert_eq!(cursor.read_count(), 2);

        assert_eq!(cursor.skip(1).unwrap(), 1);
        let rest = cursor.read_ordered(10, &Value::Void).unwrap();
        assert_eq!(ns_of(&rest), vec![3]);
        assert_eq!(cursor.read_count(), 3);
    }

    #[test]
    fn test_skip_counts() {
        let (_driver, coll) = setup(6);
        let options = Value::Table(Table::new().with("skip", 1));
        let cursor = coll.cursor(&Value::Void, &options).unwrap();
        assert_eq!(cursor.skip_count(), 1);
        assert_eq!(cursor.skip(2).unwrap(), 2);
        assert_eq!(cursor.skip_count(), 3);
        let docs = cursor.read_ordered(1, &Value::Void).unwrap();
        assert_eq!(ns_of(&docs), vec![3]);
        assert_eq!(cursor.skip(10).unwrap(), 2);
        assert_eq!(cursor.skip(1).unwrap(), 0);
    }

    #[test]
    fn test_query_and_limit_reach_driver() {
        let (driver, coll) = setup(10);
        let query = Value::Table(Table::new().with(
            "n",
            Value::Table(Table::new().with("$gte", 4)),
        ));
        let options = Value::Table(Table::new().with("limit", 3));
        let cursor = coll.cursor(&query, &options).unwrap();
        let docs = cursor.read_ordered(10, &Value::Void).unwrap();
        assert_eq!(ns_of(&docs), vec![4, 5, 6]);

        let call = driver.store().calls().last(DriverOp::Find).unwrap();
        assert_eq!(call.filter, Some(doc! { "n": { "$gte": 4 } }));
        assert_eq!(call.options.unwrap().get_i64("limit").unwrap(), 3);
    }

    #[test]
    fn test_closed_cursor() {
        let (_driver, coll) = setup(3);
        let cursor = coll.cursor(&Value::Void, &Value::Void).unwrap();
        cursor.close();
        cursor.close();
        assert!(cursor.is_closed());
        assert!(matches!(cursor.read(1, &Value::Void), Err(MongoError::CursorClosed)));
        assert!(matches!(cursor.is_exhausted(), Err(MongoError::CursorClosed)));
        assert_eq!(cursor.collection().server().pool_stats().releases, 2);
    }

    #[test]
    fn test_bad_query() {
        let (_driver, coll) = setup(1);
        let err = coll.cursor(&Value::from(3), &Value::Void).unwrap_err();
        assert!(matches!(err, MongoError::BadQuery(_)));
        assert_eq!(coll.server().pool_stats().active, 0);
    }

    impl Cursor {
        fn server_stats_active(&self) -> usize {
            self.collection.server().pool_stats().active
        }
    }
}
