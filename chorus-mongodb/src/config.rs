//! Server connection configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MongoError, MongoResult};
use crate::options::OptionLayers;
use crate::settings::{ConfigSource, Settings};
use crate::uri::MongoUri;

/// TLS settings for a server connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Client certificate (PEM).
    pub cert_file: Option<PathBuf>,
    /// Password for the client certificate key.
    pub cert_password: Option<String>,
    /// CA bundle.
    pub ca_file: Option<PathBuf>,
    /// Directory of CA certificates.
    pub ca_dir: Option<PathBuf>,
    /// Certificate revocation list.
    pub crl_file: Option<PathBuf>,
}

impl TlsConfig {
    /// Check that every configured path exists.
    pub fn validate(&self) -> MongoResult<()> {
        let files = [
            ("certfile", &self.cert_file),
            ("cafile", &self.ca_file),
            ("crlfile", &self.crl_file),
        ];
        for (what, path) in files {
            if let Some(path) = path {
                if !path.is_file() {
                    return Err(MongoError::config(format!(
                        "{} '{}' is not a readable file",
                        what,
                        path.display()
                    )));
                }
            }
        }
        if let Some(dir) = &self.ca_dir {
            if !dir.is_dir() {
                return Err(MongoError::config(format!(
                    "cadir '{}' is not a directory",
                    dir.display()
                )));
            }
        }
        Ok(())
    }
}

/// Everything needed to open a server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Parsed connection string, with option overrides applied.
    pub uri: MongoUri,
    /// Database name.
    pub dbname: Option<String>,
    /// Application name reported to the server.
    pub app_name: Option<String>,
    /// Authentication source database.
    pub auth_source: Option<String>,
    /// Maximum connections held by this server's pool.
    pub pool_max: Option<u32>,
    /// Maximum connections the driver keeps per host.
    pub max_pool_size: Option<u32>,
    /// Socket timeout.
    pub socket_timeout: Option<Duration>,
    /// Connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout.
    pub server_selection_timeout: Option<Duration>,
    /// TLS settings, when TLS is on.
    pub tls: Option<TlsConfig>,
    /// Ping the admin database when the server is opened.
    pub smoketest: bool,
}

impl ServerConfig {
    /// Create a builder.
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }

    /// Configuration for a URI with every option left at its default.
    pub fn from_uri(uri: &str) -> MongoResult<Self> {
        Self::builder().uri(uri).build()
    }

    /// Resolve a configuration from open options.
    ///
    /// Connection properties (`appname`, `username`, `password`,
    /// `authsource`) come from the options or else from `mongodb:<name>`
    /// in `source`. Timeouts and TLS files fall back to `settings`.
    pub fn from_options(
        uri: &str,
        options: &OptionLayers,
        settings: &Settings,
        source: &dyn ConfigSource,
    ) -> MongoResult<Self> {
        let property = |name: &str| {
            options
                .get_string(name)
                .or_else(|| source.get(&format!("mongodb:{}", name)))
        };
        let millis = |name: &str, default: Option<Duration>| match options.get_int(name) {
            Some(ms) if ms > 0 => Some(Duration::from_millis(ms as u64)),
            Some(_) => None,
            None => default,
        };
        let file = |name: &str, default: &Option<String>| {
            options
                .get_string(name)
                .or_else(|| default.clone())
                .map(PathBuf::from)
        };

        let ca_file = file("cafile", &settings.ca_file);
        let mut builder = Self::builder()
            .uri(uri)
            .smoketest(options.get_bool("smoketest", true));
        if let Some(db) = options.get_string("dbname") {
            builder = builder.dbname(db);
        }
        if let Some(name) = property("appname") {
            builder = builder.app_name(name);
        }
        if let Some(user) = property("username") {
            builder = builder.username(user);
        }
        if let Some(pass) = property("password") {
            builder = builder.password(pass);
        }
        if let Some(auth) = property("authsource") {
            builder = builder.auth_source(auth);
        }
        if let Some(n) = options.get_int("poolmax").and_then(|n| u32::try_from(n).ok()) {
            builder = builder.pool_max(n);
        }
        let max_pool = options
            .get_int("maxpool")
            .and_then(|n| u32::try_from(n).ok())
            .or(settings.max_pools);
        if let Some(n) = max_pool.filter(|n| *n > 0) {
            builder = builder.max_pool_size(n);
        }
        if let Some(t) = millis("timeout", settings.socket_timeout) {
            builder = builder.socket_timeout(t);
        }
        if let Some(t) = millis("ctimeout", settings.connect_timeout) {
            builder = builder.connect_timeout(t);
        }
        if let Some(t) = millis("stimeout", settings.server_selection_timeout) {
            builder = builder.server_selection_timeout(t);
        }

        let want_tls = options.get_bool("ssl", settings.default_ssl) || ca_file.is_some();
        if want_tls {
            builder = builder.tls(TlsConfig {
                cert_file: file("certfile", &settings.cert_file).or_else(|| file("pem", &None)),
                cert_password: options.get_string("certpass"),
                ca_file,
                ca_dir: file("cadir", &settings.ca_dir),
                crl_file: file("crlfile", &None),
            });
        }
        builder.build()
    }

    /// Whether TLS is in effect.
    pub fn uses_tls(&self) -> bool {
        self.tls.is_some() || self.uri.tls_requested()
    }

    /// `user@host`, or just the host.
    pub fn spec(&self) -> String {
        self.uri.spec()
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    uri: Option<String>,
    dbname: Option<String>,
    app_name: Option<String>,
    username: Option<String>,
    password: Option<String>,
    auth_source: Option<String>,
    pool_max: Option<u32>,
    max_pool_size: Option<u32>,
    socket_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    server_selection_timeout: Option<Duration>,
    tls: Option<TlsConfig>,
    smoketest: Option<bool>,
}

impl ServerConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection string.
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Set the database, overriding the URI path.
    pub fn dbname(mut self, dbname: impl Into<String>) -> Self {
        self.dbname = Some(dbname.into());
        self
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    /// Set the user name.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the authentication database.
    pub fn auth_source(mut self, source: impl Into<String>) -> Self {
        self.auth_source = Some(source.into());
        self
    }

    /// Set the number of pooled connections.
    pub fn pool_max(mut self, n: u32) -> Self {
        self.pool_max = Some(n);
        self
    }

    /// Set the driver's per-host pool size.
    pub fn max_pool_size(mut self, n: u32) -> Self {
        self.max_pool_size = Some(n);
        self
    }

    /// Set the socket timeout.
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = Some(timeout);
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the server selection timeout.
    pub fn server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.server_selection_timeout = Some(timeout);
        self
    }

    /// Turn on TLS with these settings.
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Set a CA file, turning on TLS.
    pub fn ca_file(mut self, path: impl AsRef<Path>) -> Self {
        self.tls.get_or_insert_with(TlsConfig::default).ca_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Enable or disable the ping at open.
    pub fn smoketest(mut self, enabled: bool) -> Self {
        self.smoketest = Some(enabled);
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> MongoResult<ServerConfig> {
        let text = self
            .uri
            .ok_or_else(|| MongoError::config("a connection URI is required"))?;
        let mut uri = MongoUri::parse(&text)?;

        if let Some(db) = &self.dbname {
            if db.is_empty() || db.contains(['/', '\\', ' ', '"', '$', '.']) {
                return Err(MongoError::config(format!("invalid database name '{}'", db)));
            }
            uri.set_database(db.clone());
        }
        uri.set_credentials(self.username, self.password);
        if let Some(tls) = &self.tls {
            tls.validate()?;
            uri.set_param("tls", "true");
        }

        let app_name = self
            .app_name
            .or_else(|| uri.param("appname").map(str::to_string));
        let auth_source = self
            .auth_source
            .or_else(|| uri.param("authsource").map(str::to_string));
        let max_pool_size = self
            .max_pool_size
            .or_else(|| uri.param("maxpoolsize").and_then(|v| v.parse().ok()));

        let config = ServerConfig {
            dbname: uri.database().map(str::to_string),
            uri,
            app_name,
            auth_source,
            pool_max: self.pool_max,
            max_pool_size,
            socket_timeout: self.socket_timeout,
            connect_timeout: self.connect_timeout,
            server_selection_timeout: self.server_selection_timeout,
            tls: self.tls,
            smoketest: self.smoketest.unwrap_or(true),
        };
        debug!(
            uri = %config.uri,
            dbname = ?config.dbname,
            tls = config.uses_tls(),
            "Built server configuration"
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MapConfigSource;
    use chorus_value::Table;
    use pretty_assertions::assert_eq;

    fn existing_file() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml")
    }

    #[test]
    fn test_builder_defaults() {
        let config = ServerConfig::from_uri("mongodb://localhost/crm").unwrap();
        assert_eq!(config.dbname.as_deref(), Some("crm"));
        assert!(config.smoketest);
        assert!(!config.uses_tls());
        assert_eq!(config.spec(), "localhost");
    }

    #[test]
    fn test_builder_overrides_uri() {
        let config = ServerConfig::builder()
            .uri("mongodb://h/old?appName=svc")
            .dbname("new")
            .username("bob")
            .password("pw")
            .smoketest(false)
            .build()
            .unwrap();
        assert_eq!(config.dbname.as_deref(), Some("new"));
        assert_eq!(config.app_name.as_deref(), Some("svc"));
        assert_eq!(config.spec(), "bob@h");
        assert_eq!(config.uri.password(), Some("pw"));
        assert!(!config.smoketest);
    }

    #[test]
    fn test_builder_errors() {
        assert!(ServerConfig::builder().build().unwrap_err().is_config());
        assert!(
            ServerConfig::builder()
                .uri("mongodb://h")
                .dbname("bad/name")
                .build()
                .unwrap_err()
                .is_config()
        );
        assert!(
            ServerConfig::builder()
                .uri("mongodb://h")
                .ca_file("/definitely/not/here.pem")
                .build()
                .unwrap_err()
                .is_config()
        );
    }

    #[test]
    fn test_tls_from_ca_file() {
        let config = ServerConfig::builder()
            .uri("mongodb://h/db")
            .ca_file(existing_file())
            .build()
            .unwrap();
        assert!(config.uses_tls());
        assert_eq!(config.uri.param("tls"), Some("true"));
    }

    #[test]
    fn test_tls_from_json() {
        let tls: TlsConfig = serde_json::from_value(serde_json::json!({
            "ca_file": "/etc/ssl/mongo-ca.pem",
            "cert_password": "hunter2",
        }))
        .unwrap();
        assert_eq!(tls.ca_file, Some(PathBuf::from("/etc/ssl/mongo-ca.pem")));
        assert_eq!(tls.cert_password.as_deref(), Some("hunter2"));
        assert!(tls.cert_file.is_none());
    }

    #[test]
    fn test_from_options() {
        let options = OptionLayers::from_table(
            Table::new()
                .with("dbname", "sales")
                .with("appname", "reports")
                .with("timeout", 1500)
                .with("poolmax", 4)
                .with("smoketest", false),
        );
        let settings = Settings {
            connect_timeout: Some(Duration::from_secs(3)),
            max_pools: Some(8),
            ..Settings::default()
        };
        let source = MapConfigSource::new()
            .set("mongodb:username", "svc")
            .set("mongodb:appname", "ignored");

        let config =
            ServerConfig::from_options("mongodb://h", &options, &settings, &source).unwrap();
        assert_eq!(config.dbname.as_deref(), Some("sales"));
        assert_eq!(config.app_name.as_deref(), Some("reports"));
        assert_eq!(config.uri.username(), Some("svc"));
        assert_eq!(config.socket_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.pool_max, Some(4));
        assert_eq!(config.max_pool_size, Some(8));
        assert!(!config.smoketest);
        assert!(config.tls.is_none());
    }

    #[test]
    fn test_from_options_ssl_default() {
        let settings = Settings {
            default_ssl: true,
            ..Settings::default()
        };
        let config = ServerConfig::from_options(
            "mongodb://h/db",
            &OptionLayers::new(),
            &settings,
            &MapConfigSource::new(),
        )
        .unwrap();
        assert!(config.uses_tls());

        let options = OptionLayers::from_table(Table::new().with("ssl", false));
        let config =
            ServerConfig::from_options("mongodb://h/db", &options, &settings, &MapConfigSource::new())
                .unwrap();
        assert!(!config.uses_tls());
    }
}
