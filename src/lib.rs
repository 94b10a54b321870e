//! # Chorus
//!
//! Choice-valued dynamic values stored in MongoDB.
//!
//! Chorus provides:
//! - A dynamic value model where any result may be a set of alternatives
//! - A lossless document codec between value tables and BSON
//! - Servers, collections and cursors over a pluggable driver
//! - Layered option resolution from call to process defaults
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use chorus::prelude::*;
//!
//! let context = MongoContext::builder()
//!     .driver(Arc::new(MemoryDriver::new()))
//!     .build()?;
//! let server = context.open(&Value::from("mongodb://localhost/shop"), &Value::Void)?;
//! let orders = server.collection("orders", &Value::Void)?;
//!
//! orders.insert(&Value::Table(Table::new().with("sku", "A-1").with("qty", 2)), &Value::Void)?;
//! let found = orders.find(&Value::Table(Table::new().with("sku", "A-1")), &Value::Void)?;
//! assert_eq!(found.as_members().len(), 1);
//! # Ok::<(), chorus::mongodb::MongoError>(())
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// The dynamic value model.
pub mod value {
    pub use chorus_value::*;
}

/// The MongoDB bridge.
pub mod mongodb {
    pub use chorus_mongodb::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use chorus_mongodb::prelude::*;
    pub use chorus_value::prelude::*;
}

// Re-export key types at the crate root
pub use chorus_mongodb::{Collection, Cursor, MongoContext, MongoError, MongoResult, Server};
pub use chorus_value::{Choice, Slot, Symbol, Table, Value};
