//! Opened servers.
//!
//! A [`Server`] is a cheap, clonable handle: every clone shares the same
//! configuration, connection pool and option layer. Collections and cursors
//! hold a clone, so the pool they release into outlives them.

use std::sync::Arc;
use std::time::Instant;

use chorus_value::{Table, Value};
use tracing::{debug, info};

use crate::codec::Codec;
use crate::collection::Collection;
use crate::config::ServerConfig;
use crate::context::MongoContext;
use crate::error::{MongoError, MongoResult};
use crate::fieldmap::FieldMap;
use crate::flags::BehaviorFlags;
use crate::options::{OptionLayers, resolve_flags};
use crate::pool::{ConnectionPool, PoolStats, PooledConnection};
use crate::registry::SlotRegistry;
use crate::settings::Settings;

/// An opened database server.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    config: Arc<ServerConfig>,
    pool: Arc<ConnectionPool>,
    registry: Arc<SlotRegistry>,
    settings: Arc<Settings>,
    options: OptionLayers,
    flags: BehaviorFlags,
    fieldmap: Option<Arc<FieldMap>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("uri", &self.uri())
            .field("dbname", &self.dbname())
            .field("flags", &self.inner.flags)
            .finish()
    }
}

impl Server {
    pub(crate) fn open(
        context: &MongoContext,
        target: &Value,
        options: &Value,
        fieldmap: Option<Arc<FieldMap>>,
    ) -> MongoResult<Self> {
        let started = Instant::now();
        let uri = context.resolve_uri(target)?;
        let layers = OptionLayers::for_call(options, context.defaults());
        let flags = resolve_flags(options, context.settings().effective_flags());
        let config = Arc::new(ServerConfig::from_options(
            &uri,
            &layers,
            context.settings(),
            context.config_source(),
        )?);
        let pool = ConnectionPool::new(Arc::clone(context.driver()), Arc::clone(&config));

        if config.smoketest {
            let mut conn = pool.acquire(!flags.contains(BehaviorFlags::NOBLOCK))?;
            conn.connection()?.ping().map_err(|e| {
                MongoError::driver(format!("connect failed: {}", e)).with_context(config.uri.to_string())
            })?;
        }

        let server = Self {
            inner: Arc::new(ServerInner {
                config,
                pool,
                registry: Arc::clone(context.registry()),
                settings: Arc::clone(context.settings()),
                options: layers,
                flags,
                fieldmap,
            }),
        };
        if flags.contains(BehaviorFlags::LOGOPS) {
            info!(
                uri = %server.uri(),
                dbname = server.dbname().unwrap_or(""),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Opened MongoDB server"
            );
        } else {
            debug!(uri = %server.uri(), "Opened MongoDB server");
        }
        Ok(server)
    }

    /// The database name, if the URI or options named one.
    pub fn dbname(&self) -> Option<&str> {
        self.inner.config.dbname.as_deref()
    }

    /// `user@host`, or just the host.
    pub fn spec(&self) -> String {
        self.inner.config.spec()
    }

    /// The connection URI with the password redacted.
    pub fn uri(&self) -> String {
        self.inner.config.uri.to_string()
    }

    /// The server's option layers, including process-wide defaults.
    pub fn options(&self) -> &OptionLayers {
        &self.inner.options
    }

    /// Behavior flags in effect for this server.
    pub fn flags(&self) -> BehaviorFlags {
        self.inner.flags
    }

    /// The resolved configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Connection pool statistics.
    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    /// The slot registry codecs use.
    pub fn registry(&self) -> &SlotRegistry {
        &self.inner.registry
    }

    /// Process-wide settings.
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// The server-wide field map.
    pub fn fieldmap(&self) -> Option<&Arc<FieldMap>> {
        self.inner.fieldmap.as_ref()
    }

    /// A description of the server as a table.
    ///
    /// Keys: `dbname`, `username`, `mechanism`, `authsource`, `hosts`,
    /// `connections`, `poolmax` and `ssl`.
    pub fn info(&self) -> Table {
        let config = &self.inner.config;
        let uri = &config.uri;
        let mut info = Table::new();
        if let Some(db) = self.dbname() {
            info.insert("dbname", Value::from(db));
        }
        if let Some(user) = uri.username() {
            info.insert("username", Value::from(user));
        }
        if let Some(mechanism) = uri.param("authMechanism") {
            info.insert("mechanism", Value::from(mechanism));
        }
        if let Some(source) = &config.auth_source {
            info.insert("authsource", Value::from(source.as_str()));
        }
        info.insert(
            "hosts",
            Value::choice(uri.hosts().iter().map(|h| Value::from(h.host.as_str()))),
        );
        info.insert(
            "connections",
            Value::choice(
                uri.hosts()
                    .iter()
                    .map(|h| Value::from(format!("{}:{}", h.host, h.port_or_default()))),
            ),
        );
        info.insert("poolmax", Value::Int(self.inner.pool.max_size() as i64));
        info.insert("ssl", Value::Bool(config.uses_tls()));
        info
    }

    /// Open a collection on this server.
    ///
    /// A `db/coll` name selects the database before the slash.
    pub fn collection(&self, name: &str, options: &Value) -> MongoResult<Collection> {
        Collection::open(self, name, options)
    }

    /// A codec using this server's registry and field map.
    pub fn codec(&self, flags: BehaviorFlags) -> Codec<'_> {
        Codec::new(&self.inner.registry, self.inner.fieldmap.as_deref(), flags)
    }

    /// Borrow a pooled connection, blocking unless `flags` has `NOBLOCK`.
    pub fn acquire(&self, flags: BehaviorFlags) -> MongoResult<PooledConnection> {
        self.inner.pool.acquire(!flags.contains(BehaviorFlags::NOBLOCK))
    }

    /// Resolve the layers and flags for a call made directly on the server.
    pub(crate) fn call(&self, options: &Value) -> (OptionLayers, BehaviorFlags) {
        (
            OptionLayers::for_call(options, &self.inner.options),
            resolve_flags(options, self.inner.flags),
        )
    }

    /// Close the pool. Outstanding connections are dropped when returned,
    /// and later operations fail with a pool error.
    pub fn close(&self) {
        debug!(uri = %self.uri(), "Closing MongoDB server");
        self.inner.pool.close();
    }

    /// Whether two handles share the same server.
    pub fn same_server(&self, other: &Server) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverOp, MemoryDriver};
    use crate::settings::MapConfigSource;
    use pretty_assertions::assert_eq;

    fn context(driver: &MemoryDriver) -> MongoContext {
        MongoContext::builder()
            .driver(Arc::new(driver.clone()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_open_pings_admin() {
        let driver = MemoryDriver::new();
        let server = context(&driver)
            .open(&Value::from("mongodb://alice:pw@db1.example/crm"), &Value::Void)
            .unwrap();
        assert_eq!(server.dbname(), Some("crm"));
        assert_eq!(server.spec(), "alice@db1.example");
        assert!(!server.uri().contains("pw"));
        assert_eq!(driver.store().calls().count(DriverOp::CommandSimple), 1);
        assert_eq!(server.pool_stats().idle, 1);
    }

    #[test]
    fn test_open_without_smoketest() {
        let driver = MemoryDriver::new();
        let options = Value::Table(Table::new().with("smoketest", false));
        let server = context(&driver)
            .open(&Value::from("mongodb://localhost/crm"), &options)
            .unwrap();
        assert_eq!(driver.store().connections_opened(), 0);
        assert_eq!(server.pool_stats().opened, 0);
    }

    #[test]
    fn test_failed_smoketest() {
        let driver = MemoryDriver::new();
        driver.store().fail_next(DriverOp::CommandSimple, "unreachable");
        let err = context(&driver)
            .open(&Value::from("mongodb://localhost/crm"), &Value::Void)
            .unwrap_err();
        assert!(err.is_driver());
        assert!(err.to_string().contains("connect failed"));
        assert!(err.to_string().contains("localhost"));
    }

    #[test]
    fn test_open_from_config_key() {
        let driver = MemoryDriver::new();
        let source = MapConfigSource::new().set("crm", "mongodb://db.example:27018/crm");
        let context = MongoContext::builder()
            .driver(Arc::new(driver))
            .config_source(Arc::new(source))
            .build()
            .unwrap();
        let server = context.open(&Value::symbol("crm"), &Value::Void).unwrap();
        assert_eq!(server.dbname(), Some("crm"));
    }

    #[test]
    fn test_info() {
        let driver = MemoryDriver::new();
        let options = Value::Table(Table::new().with("poolmax", 4).with("authsource", "admin"));
        let server = context(&driver)
            .open(&Value::from("mongodb://bob@a.example,b.example:27018/crm"), &options)
            .unwrap();
        let info = server.info();
        assert_eq!(info.get_named("dbname"), Some(&Value::from("crm")));
        assert_eq!(info.get_named("username"), Some(&Value::from("bob")));
        assert_eq!(info.get_named("authsource"), Some(&Value::from("admin")));
        assert_eq!(info.get_named("poolmax"), Some(&Value::Int(4)));
        assert_eq!(info.get_named("ssl"), Some(&Value::Bool(false)));
        assert_eq!(
            info.get_named("connections"),
            Some(&Value::choice([
                Value::from("a.example:27017"),
                Value::from("b.example:27018"),
            ]))
        );
    }

    #[test]
    fn test_closed_server_refuses_connections() {
        let driver = MemoryDriver::new();
        let server = context(&driver)
            .open(&Value::from("mongodb://localhost/crm"), &Value::Void)
            .unwrap();
        let clone = server.clone();
        server.close();
        assert!(clone.acquire(BehaviorFlags::DEFAULTS).unwrap_err().is_pool());
        assert!(clone.same_server(&server));
    }
}
