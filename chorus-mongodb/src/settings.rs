//! Process-wide configuration.
//!
//! Settings are read once from a [`ConfigSource`] and shared by every
//! server opened through a [`MongoContext`](crate::context::MongoContext).
//! Configuration keys use the `mongodb:` prefix:
//!
//! | Key                        | Meaning                                  |
//! |----------------------------|------------------------------------------|
//! | `mongodb:flags`            | default behavior flags (bitmask)         |
//! | `mongodb:logops`           | log every operation                      |
//! | `mongodb:logcmds`          | log every command                        |
//! | `mongodb:noblock`          | fail instead of waiting for a connection |
//! | `mongodb:ssl`              | use TLS by default                       |
//! | `mongodb:cert`             | default client certificate file          |
//! | `mongodb:cafile`           | default CA file                          |
//! | `mongodb:cadir`            | default CA directory                     |
//! | `mongodb:choiceslots`      | extra choice-slots, comma separated      |
//! | `mongodb:timeout`          | socket timeout, ms                       |
//! | `mongodb:connect:timeout`  | connect timeout, ms                      |
//! | `mongodb:server:timeout`   | server selection timeout, ms             |
//! | `mongodb:maxpools`         | driver pool size limit                   |
//! | `mongodb:maxruntime`       | default `maxTimeMS` for queries          |
//! | `mongodb:maxwait`          | default tailable wait, ms                |
//! | `mongodb:batchsize`        | default batch size, 0 for single batch   |
//! | `mongodb:usedisk`          | default `allowDiskUse`                   |
//! | `mongodb:threads:reckless` | skip the cursor thread check             |

use std::collections::HashMap;
use std::time::Duration;

use chorus_value::{Slot, Table};
use tracing::{debug, warn};

use crate::error::MongoResult;
use crate::flags::BehaviorFlags;
use crate::registry::SlotRegistry;

/// Source of configuration values.
pub trait ConfigSource: Send + Sync {
    /// Get a raw configuration value.
    fn get(&self, key: &str) -> Option<String>;

    /// Check if a key is set.
    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Get a string value, or `default`.
    fn get_str(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Get an integer value. Unparseable values are logged and ignored.
    fn get_int(&self, key: &str) -> Option<i64> {
        let raw = self.get(key)?;
        match raw.trim().parse::<i64>() {
            Ok(n) => Some(n),
            Err(_) => {
                warn!(key = key, value = %raw, "Ignoring non-integer configuration value");
                None
            }
        }
    }

    /// Get a boolean value, or `default`.
    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            None => default,
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" | "#t" => true,
                "0" | "false" | "no" | "off" | "#f" | "" => false,
                _ => {
                    warn!(key = key, value = %raw, "Ignoring non-boolean configuration value");
                    default
                }
            },
        }
    }
}

/// Configuration from environment variables.
///
/// A key maps to an upper-cased variable with a `CHORUS_` prefix and
/// separators turned into underscores: `mongodb:connect:timeout` is read
/// from `CHORUS_MONGODB_CONNECT_TIMEOUT`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvConfigSource;

impl EnvConfigSource {
    /// The environment variable consulted for a key.
    pub fn var_name(key: &str) -> String {
        let mut name = String::with_capacity(key.len() + 7);
        name.push_str("CHORUS_");
        for c in key.chars() {
            if c.is_ascii_alphanumeric() {
                name.push(c.to_ascii_uppercase());
            } else {
                name.push('_');
            }
        }
        name
    }
}

impl ConfigSource for EnvConfigSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(Self::var_name(key)).ok()
    }
}

/// Configuration backed by a map. Keys are matched case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct MapConfigSource {
    vars: HashMap<String, String>,
}

impl MapConfigSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value.
    pub fn set(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.vars
            .insert(key.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Add several values.
    pub fn with_vars(mut self, vars: HashMap<String, String>) -> Self {
        self.vars.extend(
            vars.into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v)),
        );
        self
    }
}

impl ConfigSource for MapConfigSource {
    fn get(&self, key: &str) -> Option<String> {
        self.vars.get(&key.to_ascii_lowercase()).cloned()
    }
}

/// Process-wide defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Behavior flags used when an operation specifies none.
    pub default_flags: BehaviorFlags,
    /// Log every operation.
    pub log_ops: bool,
    /// Log every command document.
    pub log_cmds: bool,
    /// Fail instead of waiting when the pool is exhausted.
    pub no_block: bool,
    /// Use TLS unless a server says otherwise.
    pub default_ssl: bool,
    /// Default client certificate file.
    pub cert_file: Option<String>,
    /// Default CA file.
    pub ca_file: Option<String>,
    /// Default CA directory.
    pub ca_dir: Option<String>,
    /// Default socket timeout.
    pub socket_timeout: Option<Duration>,
    /// Default connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Default server selection timeout.
    pub server_selection_timeout: Option<Duration>,
    /// Default limit on pooled connections per server.
    pub max_pools: Option<u32>,
    /// Default `maxTimeMS` for queries.
    pub max_runtime_ms: Option<u32>,
    /// Default tailable wait; any value makes queries tailable.
    pub max_wait_ms: Option<u32>,
    /// Default batch size. `Some(0)` asks for a single batch.
    pub batch_size: Option<u32>,
    /// Default `allowDiskUse`; `None` leaves it to the server.
    pub allow_disk_use: Option<bool>,
    /// Skip the cursor thread-affinity check.
    pub reckless_threading: bool,
    /// Choice-slots registered in addition to the standard ones.
    pub choice_slots: Vec<String>,
    /// The most general option layer.
    pub defaults: Table,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_flags: BehaviorFlags::DEFAULTS,
            log_ops: false,
            log_cmds: false,
            no_block: false,
            default_ssl: false,
            cert_file: None,
            ca_file: None,
            ca_dir: None,
            socket_timeout: None,
            connect_timeout: None,
            server_selection_timeout: None,
            max_pools: None,
            max_runtime_ms: None,
            max_wait_ms: None,
            batch_size: None,
            allow_disk_use: None,
            reckless_threading: false,
            choice_slots: Vec::new(),
            defaults: Table::new(),
        }
    }
}

fn positive_ms(source: &dyn ConfigSource, keys: &[&str]) -> Option<Duration> {
    keys.iter()
        .find_map(|key| source.get_int(key))
        .and_then(|ms| u64::try_from(ms).ok())
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

fn non_negative_u32(source: &dyn ConfigSource, key: &str) -> Option<u32> {
    source.get_int(key).and_then(|n| u32::try_from(n).ok())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split([',', ' ', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Settings {
    /// Load settings, falling back to defaults for anything unset.
    pub fn from_source(source: &dyn ConfigSource) -> Self {
        let default_flags = match source.get_int("mongodb:flags") {
            Some(bits) => match u32::try_from(bits) {
                Ok(bits) => BehaviorFlags::from_bits(bits),
                Err(_) => {
                    warn!(value = bits, "Ignoring negative mongodb:flags");
                    BehaviorFlags::DEFAULTS
                }
            },
            None => BehaviorFlags::DEFAULTS,
        };

        let mut choice_slots = Vec::new();
        for key in ["mongodb:choiceslots", "mongodb:multislots"] {
            if let Some(raw) = source.get(key) {
                choice_slots.extend(split_list(&raw));
            }
        }

        let allow_disk_use = if source.contains("mongodb:usedisk") {
            Some(source.get_bool("mongodb:usedisk", false))
        } else {
            None
        };

        let settings = Self {
            default_flags,
            log_ops: source.get_bool("mongodb:logops", false),
            log_cmds: source.get_bool("mongodb:logcmds", false),
            no_block: source.get_bool("mongodb:noblock", false),
            default_ssl: source.get_bool("mongodb:ssl", false),
            cert_file: source.get("mongodb:cert"),
            ca_file: source.get("mongodb:cafile"),
            ca_dir: source.get("mongodb:cadir"),
            socket_timeout: positive_ms(source, &["mongodb:timeout", "mongodb:socket_timeout"]),
            connect_timeout: positive_ms(source, &["mongodb:connect:timeout"]),
            server_selection_timeout: positive_ms(source, &["mongodb:server:timeout"]),
            max_pools: non_negative_u32(source, "mongodb:maxpools").filter(|n| *n > 0),
            max_runtime_ms: non_negative_u32(source, "mongodb:maxruntime").filter(|n| *n > 0),
            max_wait_ms: non_negative_u32(source, "mongodb:maxwait").filter(|n| *n > 0),
            batch_size: non_negative_u32(source, "mongodb:batchsize"),
            allow_disk_use,
            reckless_threading: source.get_bool("mongodb:threads:reckless", false),
            choice_slots,
            defaults: Table::new(),
        };
        debug!(
            flags = ?settings.effective_flags(),
            choice_slots = settings.choice_slots.len(),
            "Loaded MongoDB settings"
        );
        settings
    }

    /// Set the process-wide default option table.
    pub fn with_defaults(mut self, defaults: Table) -> Self {
        self.defaults = defaults;
        self
    }

    /// Default flags with the logging and blocking settings folded in.
    pub fn effective_flags(&self) -> BehaviorFlags {
        let mut flags = self.default_flags;
        if self.log_ops {
            flags |= BehaviorFlags::LOGOPS;
        }
        if self.no_block {
            flags |= BehaviorFlags::NOBLOCK;
        }
        flags
    }

    /// Build a slot registry with the standard and configured choice-slots.
    pub fn registry(&self) -> MongoResult<SlotRegistry> {
        let registry = SlotRegistry::standard();
        for name in &self.choice_slots {
            registry.register_choice_slot(Slot::symbol(name))?;
        }
        Ok(registry)
    }
}
