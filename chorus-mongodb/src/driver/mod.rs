//! The seam between the bridge and a document database client.
//!
//! Everything above this module talks to the database through three
//! object-safe traits:
//!
//! - [`Driver`] opens connections for a [`ServerConfig`];
//! - [`Connection`] runs one call at a time and is what the pool lends out;
//! - [`RemoteCursor`] iterates the documents of a find.
//!
//! Calls are synchronous and block the calling thread. The
//! [`memory`] driver keeps everything in process and records each call;
//! the `mongodb-driver` feature adds a driver backed by the official
//! client's blocking API.

pub mod memory;
#[cfg(feature = "mongodb-driver")]
pub mod mongo;

use std::fmt;

use bson::{Bson, Document, doc};

use crate::config::ServerConfig;
use crate::error::MongoResult;
use crate::options::{BulkOptions, ReadPreference, SearchOptions, WriteConcern};

pub use memory::{CallLog, DriverCall, MemoryDriver, MemoryStore};
#[cfg(feature = "mongodb-driver")]
pub use mongo::MongoDriver;

/// A `database.collection` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    /// Database name.
    pub db: String,
    /// Collection name.
    pub coll: String,
}

impl Namespace {
    /// Create a namespace.
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

/// The kinds of call a connection serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverOp {
    /// Opening a connection.
    Connect,
    /// Inserting one document.
    InsertOne,
    /// Inserting a batch of documents.
    InsertMany,
    /// Deleting documents.
    Delete,
    /// Updating documents.
    Update,
    /// Opening a find cursor.
    Find,
    /// Counting from collection metadata.
    EstimatedCount,
    /// Counting documents matching a filter.
    CountDocuments,
    /// Find-and-modify.
    FindAndModify,
    /// A command returning a set of documents.
    Command,
    /// A command returning its reply document.
    CommandSimple,
}

impl DriverOp {
    /// Name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::InsertOne => "insert_one",
            Self::InsertMany => "insert_many",
            Self::Delete => "delete",
            Self::Update => "update",
            Self::Find => "find",
            Self::EstimatedCount => "estimated_count",
            Self::CountDocuments => "count_documents",
            Self::FindAndModify => "find_and_modify",
            Self::Command => "command",
            Self::CommandSimple => "command_simple",
        }
    }
}

impl fmt::Display for DriverOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An update to send.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    /// Which documents to update.
    pub filter: Document,
    /// Operator document or replacement.
    pub update: Document,
    /// Insert when nothing matches.
    pub upsert: bool,
    /// Update every match instead of the first.
    pub multi: bool,
    /// Write concern, when one was asked for.
    pub write_concern: Option<WriteConcern>,
}

/// What an update did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// Documents matched.
    pub matched: u64,
    /// Documents changed.
    pub modified: u64,
    /// Identifier of an upserted document.
    pub upserted_id: Option<Bson>,
}

/// A find-and-modify request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindAndModify {
    /// Which document to modify.
    pub query: Document,
    /// Order used to pick among several matches.
    pub sort: Option<Document>,
    /// Operator document or replacement; ignored when removing.
    pub update: Option<Document>,
    /// Fields to return.
    pub fields: Option<Document>,
    /// Remove the document instead of updating it.
    pub remove: bool,
    /// Insert when nothing matches.
    pub upsert: bool,
    /// Return the document after the change.
    pub return_new: bool,
    /// Write concern, when one was asked for.
    pub write_concern: Option<WriteConcern>,
}

/// Acknowledgment document for a bulk write, shaped like the server's
/// bulk reply.
pub fn bulk_reply(inserted: u64) -> Document {
    doc! {
        "nInserted": inserted as i64,
        "nMatched": 0_i64,
        "nModified": 0_i64,
        "nRemoved": 0_i64,
        "nUpserted": 0_i64,
        "writeErrors": [],
    }
}

/// Documents a command reply stands for: the first batch of a cursor
/// reply, or the reply itself.
pub fn command_results(reply: Document) -> Vec<Document> {
    if let Ok(cursor) = reply.get_document("cursor") {
        if let Ok(batch) = cursor.get_array("firstBatch") {
            return batch
                .iter()
                .filter_map(|b| b.as_document().cloned())
                .collect();
        }
    }
    vec![reply]
}

/// Opens connections to a database deployment.
pub trait Driver: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Open a connection.
    fn connect(&self, config: &ServerConfig) -> MongoResult<Box<dyn Connection>>;
}

/// One connection. The pool guarantees a connection is used by a single
/// caller at a time.
pub trait Connection: Send {
    /// Insert one document.
    fn insert_one(
        &mut self,
        ns: &Namespace,
        doc: Document,
        write_concern: Option<&WriteConcern>,
    ) -> MongoResult<()>;

    /// Insert a batch, returning the bulk acknowledgment document.
    fn insert_many(
        &mut self,
        ns: &Namespace,
        docs: Vec<Document>,
        options: &BulkOptions,
    ) -> MongoResult<Document>;

    /// Delete the first match (`single`) or every match.
    fn delete(
        &mut self,
        ns: &Namespace,
        filter: Document,
        single: bool,
        write_concern: Option<&WriteConcern>,
    ) -> MongoResult<u64>;

    /// Update documents.
    fn update(&mut self, ns: &Namespace, request: UpdateRequest) -> MongoResult<UpdateOutcome>;

    /// Open a cursor over the matches of `filter`.
    fn find(
        &mut self,
        ns: &Namespace,
        filter: Document,
        options: &SearchOptions,
        read_preference: Option<&ReadPreference>,
    ) -> MongoResult<Box<dyn RemoteCursor>>;

    /// Count every document from collection metadata. No filter is sent.
    fn estimated_count(
        &mut self,
        ns: &Namespace,
        options: &SearchOptions,
        read_preference: Option<&ReadPreference>,
    ) -> MongoResult<u64>;

    /// Count documents matching `filter`.
    fn count_documents(
        &mut self,
        ns: &Namespace,
        filter: Document,
        options: &SearchOptions,
        read_preference: Option<&ReadPreference>,
    ) -> MongoResult<u64>;

    /// Find one document and modify or remove it.
    fn find_and_modify(
        &mut self,
        ns: &Namespace,
        request: FindAndModify,
    ) -> MongoResult<Option<Document>>;

    /// Run a command, returning the documents it produced.
    fn run_command(&mut self, db: &str, command: Document) -> MongoResult<Vec<Document>>;

    /// Run a command, returning its reply.
    fn command_simple(&mut self, db: &str, command: Document) -> MongoResult<Document>;

    /// Ping the admin database.
    fn ping(&mut self) -> MongoResult<()> {
        self.command_simple("admin", doc! { "ping": 1 }).map(|_| ())
    }
}

/// A server-side cursor.
pub trait RemoteCursor: Send {
    /// The next document, or `None` when the cursor is exhausted.
    fn next_document(&mut self) -> MongoResult<Option<Document>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_namespace_display() {
        assert_eq!(Namespace::new("crm", "users").to_string(), "crm.users");
    }

    #[test]
    fn test_command_results() {
        let reply = doc! {
            "cursor": { "firstBatch": [{ "name": "a" }, { "name": "b" }], "id": 0_i64 },
            "ok": 1,
        };
        assert_eq!(
            command_results(reply),
            vec![doc! { "name": "a" }, doc! { "name": "b" }]
        );

        let reply = doc! { "ok": 1 };
        assert_eq!(command_results(reply.clone()), vec![reply]);
    }

    #[test]
    fn test_bulk_reply() {
        let reply = bulk_reply(3);
        assert_eq!(reply.get_i64("nInserted").unwrap(), 3);
        assert!(reply.get_array("writeErrors").unwrap().is_empty());
    }
}
