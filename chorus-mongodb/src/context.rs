//! The process-wide service object.
//!
//! A [`MongoContext`] owns what would otherwise be global state: the slot
//! registry, the loaded [`Settings`], the configuration source and the
//! driver. Servers opened through it share all four. Tests build a fresh
//! context per case.
//!
//! ```rust
//! use std::sync::Arc;
//! use chorus_mongodb::context::MongoContext;
//! use chorus_mongodb::driver::MemoryDriver;
//! use chorus_value::Value;
//!
//! let context = MongoContext::builder()
//!     .driver(Arc::new(MemoryDriver::new()))
//!     .build()
//!     .unwrap();
//! let server = context
//!     .open(&Value::from("mongodb://localhost/crm"), &Value::Void)
//!     .unwrap();
//! assert_eq!(server.dbname(), Some("crm"));
//! ```

use std::sync::Arc;

use chorus_value::{Slot, Value};
use tracing::debug;

use crate::collection::Collection;
use crate::driver::Driver;
use crate::error::{MongoError, MongoResult};
use crate::fieldmap::FieldMap;
use crate::options::OptionLayers;
use crate::registry::SlotRegistry;
use crate::server::Server;
use crate::settings::{ConfigSource, EnvConfigSource, MapConfigSource, Settings};

/// Shared registry, settings, configuration source and driver.
#[derive(Clone)]
pub struct MongoContext {
    registry: Arc<SlotRegistry>,
    settings: Arc<Settings>,
    source: Arc<dyn ConfigSource>,
    driver: Arc<dyn Driver>,
    defaults: OptionLayers,
}

impl std::fmt::Debug for MongoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoContext")
            .field("driver", &self.driver.name())
            .field("choice_slots", &self.registry.choice_slot_count())
            .field("settings", &self.settings)
            .finish()
    }
}

impl MongoContext {
    /// Create a builder.
    pub fn builder() -> MongoContextBuilder {
        MongoContextBuilder::new()
    }

    /// A context configured from `CHORUS_MONGODB_*` environment variables.
    pub fn from_env(driver: Arc<dyn Driver>) -> MongoResult<Self> {
        Self::builder()
            .driver(driver)
            .config_source(Arc::new(EnvConfigSource))
            .build()
    }

    /// The slot registry.
    pub fn registry(&self) -> &Arc<SlotRegistry> {
        &self.registry
    }

    /// Process-wide settings.
    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    /// The configuration source.
    pub fn config_source(&self) -> &dyn ConfigSource {
        self.source.as_ref()
    }

    /// The driver.
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// The process-wide option layer.
    pub fn defaults(&self) -> &OptionLayers {
        &self.defaults
    }

    /// Register an additional choice-slot.
    pub fn register_choice_slot(&self, slot: impl Into<Slot>) -> MongoResult<usize> {
        self.registry.register_choice_slot(slot)
    }

    /// Open a server. `target` is a URI string or a symbol naming a
    /// configuration entry that holds one.
    pub fn open(&self, target: &Value, options: &Value) -> MongoResult<Server> {
        Server::open(self, target, options, None)
    }

    /// Open a server whose collections share a field map.
    pub fn open_with_fieldmap(
        &self,
        target: &Value,
        options: &Value,
        fieldmap: FieldMap,
    ) -> MongoResult<Server> {
        Server::open(self, target, options, Some(Arc::new(fieldmap)))
    }

    /// Open a collection on a server named by URI or configuration entry.
    pub fn open_collection(&self, target: &Value, name: &str, options: &Value) -> MongoResult<Collection> {
        self.open(target, options)?.collection(name, options)
    }

    /// The URI a target stands for.
    pub(crate) fn resolve_uri(&self, target: &Value) -> MongoResult<String> {
        match target {
            Value::String(uri) => Ok(uri.to_string()),
            Value::Symbol(key) => match self.source.get(key.as_str()) {
                Some(uri) => {
                    debug!(key = %key, "Resolved MongoDB URI from configuration");
                    Ok(uri)
                }
                None => Err(MongoError::config(format!(
                    "no MongoDB URI configured for '{}'",
                    key
                ))),
            },
            other => Err(MongoError::config(format!(
                "a MongoDB URI must be a string or a configuration key, not a {}",
                other.kind_name()
            ))),
        }
    }
}

/// Builder for [`MongoContext`].
#[derive(Default)]
pub struct MongoContextBuilder {
    driver: Option<Arc<dyn Driver>>,
    source: Option<Arc<dyn ConfigSource>>,
    settings: Option<Settings>,
    registry: Option<SlotRegistry>,
}

impl MongoContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the driver.
    pub fn driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Set the configuration source. Settings not given explicitly are
    /// loaded from it.
    pub fn config_source(mut self, source: Arc<dyn ConfigSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the settings.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Use a prepared slot registry.
    pub fn registry(mut self, registry: SlotRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Build the context.
    pub fn build(self) -> MongoResult<MongoContext> {
        let driver = self
            .driver
            .ok_or_else(|| MongoError::config("a driver is required"))?;
        let source = self
            .source
            .unwrap_or_else(|| Arc::new(MapConfigSource::new()));
        let settings = match self.settings {
            Some(settings) => settings,
            None => Settings::from_source(source.as_ref()),
        };
        let registry = match self.registry {
            Some(registry) => {
                for slot in &settings.choice_slots {
                    registry.register_choice_slot(slot.as_str())?;
                }
                registry
            }
            None => settings.registry()?,
        };
        let defaults = OptionLayers::new().then(Arc::new(settings.defaults.clone()));
        debug!(
            driver = driver.name(),
            choice_slots = registry.choice_slot_count(),
            flags = ?settings.effective_flags(),
            "Built MongoDB context"
        );
        Ok(MongoContext {
            registry: Arc::new(registry),
            settings: Arc::new(settings),
            source,
            driver,
            defaults,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryDriver;
    use pretty_assertions::assert_eq;

    fn memory() -> Arc<dyn Driver> {
        Arc::new(MemoryDriver::new())
    }

    #[test]
    fn test_build_requires_driver() {
        assert!(MongoContext::builder().build().unwrap_err().is_config());
    }

    #[test]
    fn test_settings_from_source() {
        let source = MapConfigSource::new()
            .set("mongodb:logops", "yes")
            .set("mongodb:choiceslots", "tags, aliases");
        let context = MongoContext::builder()
            .driver(memory())
            .config_source(Arc::new(source))
            .build()
            .unwrap();
        assert!(context.settings().log_ops);
        assert!(context.registry().is_choice_slot(&Slot::symbol("tags")));
        assert!(context.registry().is_choice_slot(&Slot::symbol("$in")));
    }

    #[test]
    fn test_resolve_uri() {
        let source = MapConfigSource::new().set("crmdb", "mongodb://db.example/crm");
        let context = MongoContext::builder()
            .driver(memory())
            .config_source(Arc::new(source))
            .build()
            .unwrap();
        assert_eq!(
            context.resolve_uri(&Value::symbol("crmdb")).unwrap(),
            "mongodb://db.example/crm"
        );
        assert!(context.resolve_uri(&Value::symbol("missing")).unwrap_err().is_config());
        assert!(context.resolve_uri(&Value::from(3)).unwrap_err().is_config());
    }

    #[test]
    fn test_registry_is_per_context() {
        let a = MongoContext::builder().driver(memory()).build().unwrap();
        let b = MongoContext::builder().driver(memory()).build().unwrap();
        a.register_choice_slot("only_here").unwrap();
        assert!(a.registry().is_choice_slot(&Slot::symbol("only_here")));
        assert!(!b.registry().is_choice_slot(&Slot::symbol("only_here")));
    }
}
