//! Per-field codec overrides.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chorus_value::{Slot, Table, Value, text};
use tracing::warn;

use crate::error::{MongoError, MongoResult};

/// A user-supplied value transform.
pub type TransformFn = Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>;

/// How a field's value is rewritten on its way in or out.
#[derive(Clone)]
pub enum FieldTransform {
    /// Apply a function.
    Function(TransformFn),
    /// Replace the value with its entry in a table, when it has one.
    Lookup(Table),
    /// Store the value as text and parse it back on read.
    Text,
}

impl FieldTransform {
    /// Wrap a closure as a transform.
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self::Function(Arc::new(f))
    }

    fn lookup(table: &Table, value: &Value) -> Option<Value> {
        Slot::from_value(value).and_then(|slot| table.get(&slot).cloned())
    }

    fn apply_encode(&self, value: &Value) -> Result<Option<Value>, String> {
        match self {
            Self::Function(f) => f(value).map(Some),
            Self::Lookup(table) => Ok(Self::lookup(table, value)),
            Self::Text => Ok(Some(Value::String(text::unparse(value).into()))),
        }
    }

    fn apply_decode(&self, value: &Value) -> Result<Option<Value>, String> {
        match self {
            Self::Function(f) => f(value).map(Some),
            Self::Lookup(table) => Ok(Self::lookup(table, value)),
            Self::Text => match value.as_str() {
                Some(s) => text::parse(s).map(Some).map_err(|e| e.to_string()),
                None => Ok(None),
            },
        }
    }
}

impl fmt::Debug for FieldTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function(_) => f.write_str("Function(..)"),
            Self::Lookup(t) => write!(f, "Lookup({} entries)", t.len()),
            Self::Text => f.write_str("Text"),
        }
    }
}

/// Field-level codec policy attached to a server or collection.
///
/// ```rust
/// use chorus_mongodb::fieldmap::{FieldMap, FieldTransform};
///
/// let fieldmap = FieldMap::new()
///     .choice_slot("tags")
///     .raw_slot("Headers")
///     .decode_with("created", FieldTransform::Text);
/// ```
#[derive(Debug, Clone, Default)]
pub struct FieldMap {
    choice_slots: HashSet<Slot>,
    sym_slots: HashSet<Slot>,
    raw_slots: HashSet<Slot>,
    encoders: HashMap<Slot, FieldTransform>,
    decoders: HashMap<Slot, FieldTransform>,
}

impl FieldMap {
    /// Create an empty field map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a field as always holding a set.
    pub fn choice_slot(mut self, slot: impl Into<Slot>) -> Self {
        self.choice_slots.insert(slot.into());
        self
    }

    /// Mark a field as storing symbols as bare strings.
    pub fn sym_slot(mut self, slot: impl Into<Slot>) -> Self {
        self.sym_slots.insert(slot.into());
        self
    }

    /// Mark a field's key as a raw string.
    pub fn raw_slot(mut self, slot: impl Into<Slot>) -> Self {
        self.raw_slots.insert(slot.into());
        self
    }

    /// Transform a field's value before it is encoded.
    pub fn encode_with(mut self, slot: impl Into<Slot>, transform: FieldTransform) -> Self {
        self.encoders.insert(slot.into(), transform);
        self
    }

    /// Transform a field's value after it is decoded.
    pub fn decode_with(mut self, slot: impl Into<Slot>, transform: FieldTransform) -> Self {
        self.decoders.insert(slot.into(), transform);
        self
    }

    /// Whether the field is a choice-slot.
    pub fn is_choice_slot(&self, slot: &Slot) -> bool {
        self.choice_slots.contains(slot)
    }

    /// Whether the field is a symbol slot.
    pub fn is_sym_slot(&self, slot: &Slot) -> bool {
        self.sym_slots.contains(slot)
    }

    /// Whether the field's key is raw.
    pub fn is_raw_slot(&self, slot: &Slot) -> bool {
        self.raw_slots.contains(slot)
    }

    /// Rewrite a value before encoding.
    ///
    /// Returns `None` when no transform applies. A failing transform aborts
    /// the document.
    pub fn encode_value(&self, slot: &Slot, value: &Value) -> MongoResult<Option<Value>> {
        match self.encoders.get(slot) {
            None => Ok(None),
            Some(transform) => transform.apply_encode(value).map_err(|e| {
                MongoError::codec(format!("field transform for {} failed: {}", slot, e))
            }),
        }
    }

    /// Rewrite a value after decoding.
    ///
    /// A failing transform is logged and the decoded value is kept.
    pub fn decode_value(&self, slot: &Slot, value: Value) -> Value {
        let Some(transform) = self.decoders.get(slot) else {
            return value;
        };
        match transform.apply_decode(&value) {
            Ok(Some(new_value)) if !new_value.is_void() => new_value,
            Ok(_) => value,
            Err(e) => {
                warn!(slot = %slot, error = %e, "Field transform failed, keeping decoded value");
                value
            }
        }
    }
}
