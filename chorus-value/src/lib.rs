//! # chorus-value
//!
//! The dynamic value model used by Chorus.
//!
//! This crate provides:
//! - [`Value`], a closed sum type over every kind of host value
//! - [`Choice`], the unordered, flattened set used for multi-valued results
//! - [`Table`] and [`Slot`], ordered associative tables with symbolic keys
//! - [`Symbol`], process-wide interned names
//! - A textual printer and parser ([`text`])
//!
//! ## Example
//!
//! ```rust
//! use chorus_value::{Table, Value};
//!
//! let doc = Table::new()
//!     .with("name", "a")
//!     .with("tags", Value::choice([Value::from("x"), Value::from("y")]));
//!
//! assert_eq!(doc.get_sym("name"), Some(&Value::from("a")));
//! assert_eq!(doc.get_sym("tags").map(|v| v.as_members().len()), Some(2));
//! ```

pub mod choice;
pub mod error;
pub mod symbol;
pub mod table;
pub mod text;
pub mod value;

pub use choice::Choice;
pub use error::{ParseError, ParseResult};
pub use symbol::Symbol;
pub use table::{Slot, Table};
pub use value::{Compound, Oid, Regex, RegexFlags, Value};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::choice::Choice;
    pub use crate::symbol::Symbol;
    pub use crate::table::{Slot, Table};
    pub use crate::text::{parse, unparse};
    pub use crate::value::{Compound, Oid, Regex, RegexFlags, Value};
}
