//! # chorus-mongodb
//!
//! A MongoDB bridge for Chorus dynamic values.
//!
//! This crate provides:
//! - A document codec between [`Value`](chorus_value::Value) tables and BSON
//! - Key/slot policy with an injectable operator table and choice-slot registry
//! - Layered option resolution (call, collection, server, process)
//! - Servers with a bounded connection pool, collections and thread-affine cursors
//! - Insert, remove, update, find, count, get, find-and-modify and commands
//! - A driver seam with an in-memory driver, plus the official driver behind
//!   the `mongodb-driver` feature
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use chorus_mongodb::prelude::*;
//! use chorus_value::{Table, Value};
//!
//! let context = MongoContext::builder()
//!     .driver(Arc::new(MemoryDriver::new()))
//!     .build()?;
//! let users = context
//!     .open(&Value::from("mongodb://localhost/crm"), &Value::Void)?
//!     .collection("users", &Value::Void)?;
//!
//! let alice = Value::Table(Table::new().with("name", "alice").with("age", 30));
//! users.insert(&alice, &Value::Void)?;
//!
//! let query = Value::Table(Table::new().with("name", "alice"));
//! assert_eq!(users.count(&query, &Value::Void)?, 1);
//! # Ok::<(), MongoError>(())
//! ```
//!
//! ## Choice-slots
//!
//! Fields registered as choice-slots always store a plain array and always
//! decode to a set, whatever order the server returns:
//!
//! ```rust
//! use std::sync::Arc;
//! use chorus_mongodb::prelude::*;
//! use chorus_value::{Table, Value};
//!
//! let context = MongoContext::builder()
//!     .driver(Arc::new(MemoryDriver::new()))
//!     .build()?;
//! context.register_choice_slot("tags")?;
//! let posts = context.open_collection(
//!     &Value::from("mongodb://localhost/blog"),
//!     "posts",
//!     &Value::Void,
//! )?;
//!
//! let tags = Value::choice([Value::from("x"), Value::from("y")]);
//! posts.insert(&Value::Table(Table::new().with("title", "t").with("tags", tags.clone())), &Value::Void)?;
//! let found = posts.get(&Value::Table(Table::new().with("title", "t")), &Value::Void)?;
//! assert_eq!(found.as_table().and_then(|t| t.get_sym("tags")), Some(&tags));
//! # Ok::<(), MongoError>(())
//! ```

pub mod codec;
pub mod collection;
pub mod command;
pub mod config;
pub mod context;
pub mod cursor;
pub mod driver;
pub mod error;
pub mod fieldmap;
pub mod flags;
pub mod keys;
pub mod logging;
pub mod ops;
pub mod options;
pub mod pool;
pub mod registry;
pub mod server;
pub mod settings;
pub mod uri;

pub use bson::oid::ObjectId;
pub use bson::{Bson, Document, doc};
pub use codec::Codec;
pub use collection::Collection;
pub use command::{Target, command, command_one, make_command, raw_command};
pub use config::{ServerConfig, ServerConfigBuilder, TlsConfig};
pub use context::{MongoContext, MongoContextBuilder};
pub use cursor::Cursor;
pub use driver::{Connection, Driver, MemoryDriver, RemoteCursor};
#[cfg(feature = "mongodb-driver")]
pub use driver::MongoDriver;
pub use error::{MongoError, MongoResult};
pub use fieldmap::{FieldMap, FieldTransform};
pub use flags::BehaviorFlags;
pub use ops::pointwise;
pub use options::{OptionLayers, ReadPreference, SearchOptions, WriteAck, WriteConcern};
pub use pool::{ConnectionPool, PoolStats};
pub use registry::SlotRegistry;
pub use server::Server;
pub use settings::{ConfigSource, EnvConfigSource, MapConfigSource, Settings};
pub use uri::MongoUri;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::codec::Codec;
    pub use crate::collection::Collection;
    pub use crate::command::{Target, command, command_one, raw_command};
    pub use crate::context::MongoContext;
    pub use crate::cursor::Cursor;
    pub use crate::driver::{Driver, MemoryDriver};
    #[cfg(feature = "mongodb-driver")]
    pub use crate::driver::MongoDriver;
    pub use crate::error::{MongoError, MongoResult};
    pub use crate::fieldmap::FieldMap;
    pub use crate::flags::BehaviorFlags;
    pub use crate::ops::pointwise;
    pub use crate::server::Server;
    pub use crate::settings::{ConfigSource, MapConfigSource, Settings};
    pub use bson::{Bson, Document, doc};
}
