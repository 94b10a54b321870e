//! Driver backed by the official MongoDB client.
//!
//! Uses the client's blocking API. One client is created per distinct
//! connection string and shared by every connection opened for it; the
//! client keeps its own pool of sockets underneath.

use std::collections::HashMap;
use std::sync::Arc;

use bson::{Bson, Document};
use mongodb::options::{
    Acknowledgment, CountOptions, CursorType, DeleteOptions, EstimatedDocumentCountOptions,
    FindOneAndDeleteOptions, FindOneAndReplaceOptions, FindOneAndUpdateOptions, FindOptions,
    InsertManyOptions, InsertOneOptions, ReadPreference as DriverReadPreference,
    ReadPreferenceOptions, ReplaceOptions, ReturnDocument, SelectionCriteria, UpdateOptions,
    WriteConcern as DriverWriteConcern,
};
use mongodb::sync::{Client, Collection as DriverCollection};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{
    Connection, Driver, FindAndModify, Namespace, RemoteCursor, UpdateOutcome, UpdateRequest,
    bulk_reply, command_results,
};
use crate::config::ServerConfig;
use crate::error::{MongoError, MongoResult};
use crate::options::{BulkOptions, ReadMode, ReadPreference, SearchOptions, WriteAck, WriteConcern};

/// Driver using `mongodb::sync::Client`.
#[derive(Clone, Default)]
pub struct MongoDriver {
    clients: Arc<Mutex<HashMap<String, Client>>>,
}

impl std::fmt::Debug for MongoDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoDriver")
            .field("clients", &self.clients.lock().len())
            .finish()
    }
}

impl MongoDriver {
    /// Create a driver.
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self, config: &ServerConfig) -> MongoResult<Client> {
        let uri = connection_string(config);
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(&uri) {
            return Ok(client.clone());
        }
        let client = Client::with_uri_str(&uri)
            .map_err(|e| MongoError::from(e).with_context(config.uri.to_string()))?;
        info!(uri = %config.uri, "MongoDB client created");
        clients.insert(uri, client.clone());
        Ok(client)
    }
}

/// The connection string for a configuration, with its timeouts, pool size
/// and TLS files as URI options.
fn connection_string(config: &ServerConfig) -> String {
    let mut uri = config.uri.clone();
    if let Some(timeout) = config.connect_timeout {
        uri.set_param("connectTimeoutMS", timeout.as_millis().to_string());
    }
    if let Some(timeout) = config.server_selection_timeout {
        uri.set_param("serverSelectionTimeoutMS", timeout.as_millis().to_string());
    }
    if config.socket_timeout.is_some() {
        debug!("Socket timeouts are left to the driver");
    }
    if let Some(n) = config.max_pool_size {
        uri.set_param("maxPoolSize", n.to_string());
    }
    if let Some(name) = &config.app_name {
        uri.set_param("appName", name.clone());
    }
    if let Some(source) = &config.auth_source {
        uri.set_param("authSource", source.clone());
    }
    if let Some(tls) = &config.tls {
        uri.set_param("tls", "true");
        if let Some(ca) = &tls.ca_file {
            uri.set_param("tlsCAFile", ca.display().to_string());
        }
        if let Some(cert) = &tls.cert_file {
            uri.set_param("tlsCertificateKeyFile", cert.display().to_string());
        }
        if tls.cert_password.is_some() || tls.crl_file.is_some() || tls.ca_dir.is_some() {
            warn!(
                uri = %config.uri,
                "Certificate passwords, CRL files and CA directories are not supported by this driver"
            );
        }
    }
    uri.to_connection_string()
}

impl Driver for MongoDriver {
    fn name(&self) -> &'static str {
        "mongodb"
    }

    fn connect(&self, config: &ServerConfig) -> MongoResult<Box<dyn Connection>> {
        Ok(Box::new(MongoConnection {
            client: self.client(config)?,
        }))
    }
}

fn write_concern(wc: Option<&WriteConcern>) -> Option<DriverWriteConcern> {
    let wc = wc?;
    let mut concern = DriverWriteConcern::default();
    concern.w = match wc.ack {
        WriteAck::Default => None,
        WriteAck::Unacknowledged | WriteAck::ErrorsIgnored => Some(Acknowledgment::Nodes(0)),
        WriteAck::Majority => Some(Acknowledgment::Majority),
        WriteAck::Nodes(n) => Some(Acknowledgment::Nodes(n)),
    };
    concern.w_timeout = wc.wtimeout;
    Some(concern)
}

fn selection_criteria(pref: Option<&ReadPreference>) -> Option<SelectionCriteria> {
    let pref = pref?;
    let mut options = ReadPreferenceOptions::default();
    if !pref.tags.is_empty() {
        let tag_sets = pref
            .tags
            .iter()
            .map(|doc| {
                doc.iter()
                    .map(|(k, v)| match v {
                        Bson::String(s) => (k.clone(), s.clone()),
                        other => (k.clone(), other.to_string()),
                    })
                    .collect()
            })
            .collect();
        options.tag_sets = Some(tag_sets);
    }
    let pref = match pref.mode {
        ReadMode::Primary => DriverReadPreference::Primary,
        ReadMode::PrimaryPreferred => DriverReadPreference::PrimaryPreferred { options },
        ReadMode::Secondary => DriverReadPreference::Secondary { options },
        ReadMode::SecondaryPreferred => DriverReadPreference::SecondaryPreferred { options },
        ReadMode::Nearest => DriverReadPreference::Nearest { options },
    };
    Some(SelectionCriteria::ReadPreference(pref))
}

fn is_operator_update(update: &Document) -> bool {
    update.keys().next().is_some_and(|k| k.starts_with('$'))
}

struct MongoConnection {
    client: Client,
}

impl MongoConnection {
    fn collection(&self, ns: &Namespace) -> DriverCollection<Document> {
        self.client.database(&ns.db).collection(&ns.coll)
    }
}

struct MongoCursor {
    inner: mongodb::sync::Cursor<Document>,
}

impl RemoteCursor for MongoCursor {
    fn next_document(&mut self) -> MongoResult<Option<Document>> {
        self.inner.next().transpose().map_err(MongoError::from)
    }
}

impl Connection for MongoConnection {
    fn insert_one(
        &mut self,
        ns: &Namespace,
        doc: Document,
        write_concern: Option<&WriteConcern>,
    ) -> MongoResult<()> {
        let mut options = InsertOneOptions::default();
        options.write_concern = self::write_concern(write_concern);
        self.collection(ns).insert_one(doc, options)?;
        Ok(())
    }

    fn insert_many(
        &mut self,
        ns: &Namespace,
        docs: Vec<Document>,
        options: &BulkOptions,
    ) -> MongoResult<Document> {
        let mut insert = InsertManyOptions::default();
        insert.ordered = Some(options.ordered);
        insert.write_concern = write_concern(options.write_concern.as_ref());
        let result = self.collection(ns).insert_many(docs, insert)?;
        Ok(bulk_reply(result.inserted_ids.len() as u64))
    }

    fn delete(
        &mut self,
        ns: &Namespace,
        filter: Document,
        single: bool,
        write_concern: Option<&WriteConcern>,
    ) -> MongoResult<u64> {
        let mut options = DeleteOptions::default();
        options.write_concern = self::write_concern(write_concern);
        let coll = self.collection(ns);
        let result = if single {
            coll.delete_one(filter, options)?
        } else {
            coll.delete_many(filter, options)?
        };
        Ok(result.deleted_count)
    }

    fn update(&mut self, ns: &Namespace, request: UpdateRequest) -> MongoResult<UpdateOutcome> {
        let coll = self.collection(ns);
        let concern = write_concern(request.write_concern.as_ref());
        let result = if !is_operator_update(&request.update) {
            let mut options = ReplaceOptions::default();
            options.upsert = Some(request.upsert);
            options.write_concern = concern;
            coll.replace_one(request.filter, request.update, options)?
        } else {
            let mut options = UpdateOptions::default();
            options.upsert = Some(request.upsert);
            options.write_concern = concern;
            if request.multi {
                coll.update_many(request.filter, request.update, options)?
            } else {
                coll.update_one(request.filter, request.update, options)?
            }
        };
        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    fn find(
        &mut self,
        ns: &Namespace,
        filter: Document,
        options: &SearchOptions,
        read_preference: Option<&ReadPreference>,
    ) -> MongoResult<Box<dyn RemoteCursor>> {
        let mut find = FindOptions::default();
        find.max_time = options.max_time_ms.map(|ms| std::time::Duration::from_millis(ms.into()));
        find.no_cursor_timeout = options.no_cursor_timeout.then_some(true);
        find.skip = options.skip;
        find.limit = options.limit;
        if options.tailable {
            find.cursor_type = Some(CursorType::TailableAwait);
            find.max_await_time = options
                .max_await_ms
                .map(|ms| std::time::Duration::from_millis(ms.into()));
        }
        find.batch_size = options.batch_size;
        if options.single_batch {
            // A negative limit asks for a single batch.
            find.limit = Some(-options.limit.unwrap_or(0).abs().max(1));
        }
        find.allow_disk_use = options.allow_disk_use;
        find.sort = options.sort.clone();
        find.projection = options.projection.clone();
        find.selection_criteria = selection_criteria(read_preference);
        let cursor = self.collection(ns).find(filter, find)?;
        Ok(Box::new(MongoCursor { inner: cursor }))
    }

    fn estimated_count(
        &mut self,
        ns: &Namespace,
        options: &SearchOptions,
        read_preference: Option<&ReadPreference>,
    ) -> MongoResult<u64> {
        let mut count = EstimatedDocumentCountOptions::default();
        count.max_time = options.max_time_ms.map(|ms| std::time::Duration::from_millis(ms.into()));
        count.selection_criteria = selection_criteria(read_preference);
        Ok(self.collection(ns).estimated_document_count(count)?)
    }

    fn count_documents(
        &mut self,
        ns: &Namespace,
        filter: Document,
        options: &SearchOptions,
        read_preference: Option<&ReadPreference>,
    ) -> MongoResult<u64> {
        let mut count = CountOptions::default();
        count.max_time = options.max_time_ms.map(|ms| std::time::Duration::from_millis(ms.into()));
        count.selection_criteria = selection_criteria(read_preference);
        Ok(self.collection(ns).count_documents(filter, count)?)
    }

    fn find_and_modify(
        &mut self,
        ns: &Namespace,
        request: FindAndModify,
    ) -> MongoResult<Option<Document>> {
        let coll = self.collection(ns);
        let concern = write_concern(request.write_concern.as_ref());
        let returned = if request.return_new {
            ReturnDocument::After
        } else {
            ReturnDocument::Before
        };
        if request.remove {
            let mut options = FindOneAndDeleteOptions::default();
            options.sort = request.sort;
            options.projection = request.fields;
            options.write_concern = concern;
            return Ok(coll.find_one_and_delete(request.query, options)?);
        }
        let Some(update) = request.update else {
            return Err(MongoError::bad_query(
                "find-and-modify needs an update unless it removes",
            ));
        };
        if is_operator_update(&update) {
            let mut options = FindOneAndUpdateOptions::default();
            options.sort = request.sort;
            options.projection = request.fields;
            options.upsert = Some(request.upsert);
            options.return_document = Some(returned);
            options.write_concern = concern;
            Ok(coll.find_one_and_update(request.query, update, options)?)
        } else {
            let mut options = FindOneAndReplaceOptions::default();
            options.sort = request.sort;
            options.projection = request.fields;
            options.upsert = Some(request.upsert);
            options.return_document = Some(returned);
            options.write_concern = concern;
            Ok(coll.find_one_and_replace(request.query, update, options)?)
        }
    }

    fn run_command(&mut self, db: &str, command: Document) -> MongoResult<Vec<Document>> {
        let reply = self.client.database(db).run_command(command, None)?;
        Ok(command_results(reply))
    }

    fn command_simple(&mut self, db: &str, command: Document) -> MongoResult<Document> {
        Ok(self.client.database(db).run_command(command, None)?)
    }
}
