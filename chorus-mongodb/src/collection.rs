//! Collections on an opened server.

use std::sync::Arc;

use chorus_value::{Slot, Value};
use tracing::{debug, error};

use crate::codec::Codec;
use crate::driver::{Connection, Namespace};
use crate::error::{MongoError, MongoResult};
use crate::fieldmap::FieldMap;
use crate::flags::BehaviorFlags;
use crate::options::{OptionLayers, resolve_flags};
use crate::server::Server;

/// Name of the identifier field when no `oidslot` option is given.
pub const DEFAULT_ID_FIELD: &str = "_id";

/// A collection handle.
///
/// Collections are clonable and hold their [`Server`], so every pooled
/// connection they borrow goes back to a live pool.
#[derive(Clone)]
pub struct Collection {
    server: Server,
    name: String,
    namespace: Namespace,
    options: OptionLayers,
    flags: BehaviorFlags,
    oidslot: Slot,
    fieldmap: Option<Arc<FieldMap>>,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("namespace", &self.namespace.to_string())
            .field("server", &self.server.spec())
            .field("oidslot", &self.oidslot)
            .field("flags", &self.flags)
            .finish()
    }
}

impl Collection {
    pub(crate) fn open(server: &Server, name: &str, options: &Value) -> MongoResult<Self> {
        let (db, coll) = match name.split_once('/') {
            Some((db, coll)) => (db.to_string(), coll),
            None => match server.dbname() {
                Some(db) => (db.to_string(), name),
                None => {
                    return Err(MongoError::config(format!(
                        "no database name for collection '{}' on {}",
                        name,
                        server.uri()
                    )));
                }
            },
        };
        if db.is_empty() || coll.is_empty() {
            return Err(MongoError::config(format!("invalid collection name '{}'", name)));
        }

        let layers = OptionLayers::for_call(options, server.options());
        let flags = resolve_flags(options, server.flags());
        let oidslot = match layers.get_specified("oidslot") {
            None => Slot::symbol(DEFAULT_ID_FIELD),
            Some(Value::Symbol(sym)) => Slot::Symbol(sym.clone()),
            Some(other) => {
                error!(value = %other, collection = %name, "Invalid oidslot, using _id");
                Slot::symbol(DEFAULT_ID_FIELD)
            }
        };

        let namespace = Namespace::new(db, coll);
        debug!(namespace = %namespace, server = %server.spec(), "Opened collection");
        Ok(Self {
            name: coll.to_string(),
            server: server.clone(),
            fieldmap: server.fieldmap().cloned(),
            namespace,
            options: layers,
            flags,
            oidslot,
        })
    }

    /// The collection name, without the database.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The database name.
    pub fn database(&self) -> &str {
        &self.namespace.db
    }

    /// The `database.collection` namespace.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// The server this collection lives on.
    pub fn server(&self) -> &Server {
        &self.server
    }

    /// The identifier field.
    pub fn oidslot(&self) -> &Slot {
        &self.oidslot
    }

    /// Collection option layers, followed by the server's.
    pub fn options(&self) -> &OptionLayers {
        &self.options
    }

    /// Behavior flags for operations on this collection.
    pub fn flags(&self) -> BehaviorFlags {
        self.flags
    }

    /// The field map in effect.
    pub fn fieldmap(&self) -> Option<&Arc<FieldMap>> {
        self.fieldmap.as_ref()
    }

    /// The same collection with its own field map.
    pub fn with_fieldmap(mut self, fieldmap: FieldMap) -> Self {
        self.fieldmap = Some(Arc::new(fieldmap));
        self
    }

    /// A codec for this collection's field map.
    pub fn codec(&self, flags: BehaviorFlags) -> Codec<'_> {
        Codec::new(self.server.registry(), self.fieldmap.as_deref(), flags)
    }

    /// `uri>collection`, attached to driver errors.
    pub fn context(&self) -> String {
        format!("{}>{}", self.server.uri(), self.name)
    }

    /// The option layers and flags for one call.
    pub(crate) fn call(&self, options: &Value) -> (OptionLayers, BehaviorFlags) {
        (
            OptionLayers::for_call(options, &self.options),
            resolve_flags(options, self.flags),
        )
    }

    /// Run `f` on a pooled connection, returning the connection before
    /// this returns. Driver errors carry [`Collection::context`].
    pub(crate) fn with_connection<T, F>(&self, flags: BehaviorFlags, f: F) -> MongoResult<T>
    where
        F: FnOnce(&mut dyn Connection) -> MongoResult<T>,
    {
        let mut conn = self.server.acquire(flags)?;
        let result = f(conn.connection()?);
        conn.release();
        result.map_err(|e| e.with_context(self.context()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MongoContext;
    use crate::driver::MemoryDriver;
    use chorus_value::Table;
    use pretty_assertions::assert_eq;

    fn server(uri: &str) -> Server {
        MongoContext::builder()
            .driver(Arc::new(MemoryDriver::new()))
            .build()
            .unwrap()
            .open(&Value::from(uri), &Value::Void)
            .unwrap()
    }

    #[test]
    fn test_open_on_server_database() {
        let coll = server("mongodb://localhost/crm")
            .collection("users", &Value::Void)
            .unwrap();
        assert_eq!(coll.name(), "users");
        assert_eq!(coll.database(), "crm");
        assert_eq!(coll.oidslot(), &Slot::symbol("_id"));
        assert_eq!(coll.context(), "mongodb://localhost/crm>users");
    }

    #[test]
    fn test_database_override() {
        let coll = server("mongodb://localhost/crm")
            .collection("audit/events", &Value::Void)
            .unwrap();
        assert_eq!(coll.database(), "audit");
        assert_eq!(coll.name(), "events");
        assert_eq!(coll.namespace().to_string(), "audit.events");
    }

    #[test]
    fn test_missing_database_is_config_error() {
        let err = server("mongodb://localhost")
            .collection("users", &Value::Void)
            .unwrap_err();
        assert!(err.is_config());
        assert!(server("mongodb://localhost").collection("crm/users", &Value::Void).is_ok());
        assert!(server("mongodb://localhost/crm").collection("crm/", &Value::Void).is_err());
    }

    #[test]
    fn test_oidslot_option() {
        let server = server("mongodb://localhost/crm");
        let options = Value::Table(Table::new().with("oidslot", Value::symbol("key")));
        let coll = server.collection("users", &options).unwrap();
        assert_eq!(coll.oidslot(), &Slot::symbol("key"));

        let options = Value::Table(Table::new().with("oidslot", 12));
        let coll = server.collection("users", &options).unwrap();
        assert_eq!(coll.oidslot(), &Slot::symbol("_id"));
    }

    #[test]
    fn test_collection_options_layer_over_server() {
        let server = MongoContext::builder()
            .driver(Arc::new(MemoryDriver::new()))
            .build()
            .unwrap()
            .open(
                &Value::from("mongodb://localhost/crm"),
                &Value::Table(Table::new().with("limit", 5).with("skip", 1)),
            )
            .unwrap();
        let coll = server
            .collection("users", &Value::Table(Table::new().with("limit", 10)))
            .unwrap();
        let (layers, _) = coll.call(&Value::Table(Table::new().with("skip", 2)));
        assert_eq!(layers.get_int("limit"), Some(10));
        assert_eq!(layers.get_int("skip"), Some(2));
        assert_eq!(coll.options().get_int("skip"), Some(1));
    }
}
