//! Associative tables keyed by slots.

use std::borrow::Cow;
use std::fmt;

use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::symbol::Symbol;
use crate::value::{Oid, Value};

/// A table key.
///
/// A slot is either an interned symbol, a literal string that must be
/// written verbatim, or an object identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    /// An interned name.
    Symbol(Symbol),
    /// A literal string key.
    String(SmolStr),
    /// An object identifier key.
    Oid(Oid),
}

impl Slot {
    /// A symbol slot.
    pub fn symbol(name: &str) -> Self {
        Self::Symbol(Symbol::intern(name))
    }

    /// A literal string slot.
    pub fn string(name: impl Into<SmolStr>) -> Self {
        Self::String(name.into())
    }

    /// The slot's name, if it is a symbol or string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Symbol(s) => Some(s.as_str()),
            Self::String(s) => Some(s.as_str()),
            Self::Oid(_) => None,
        }
    }

    /// The slot's name as text, rendering OIDs in `@hi/lo` form.
    pub fn name(&self) -> Cow<'_, str> {
        match self {
            Self::Symbol(s) => Cow::Borrowed(s.as_str()),
            Self::String(s) => Cow::Borrowed(s.as_str()),
            Self::Oid(oid) => Cow::Owned(oid.to_string()),
        }
    }

    /// Whether this is a symbol slot.
    pub fn is_symbol(&self) -> bool {
        matches!(self, Self::Symbol(_))
    }

    /// Whether this is a literal string slot.
    pub fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    /// Convert the slot into a value.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Symbol(s) => Value::Symbol(s.clone()),
            Self::String(s) => Value::String(s.clone()),
            Self::Oid(oid) => Value::Oid(*oid),
        }
    }

    /// Convert a value into a slot, if it has a slot form.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Symbol(s) => Some(Self::Symbol(s.clone())),
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Oid(oid) => Some(Self::Oid(*oid)),
            _ => None,
        }
    }
}

impl From<&str> for Slot {
    fn from(name: &str) -> Self {
        Self::symbol(name)
    }
}

impl From<Symbol> for Slot {
    fn from(sym: Symbol) -> Self {
        Self::Symbol(sym)
    }
}

impl From<Oid> for Slot {
    fn from(oid: Oid) -> Self {
        Self::Oid(oid)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Symbol(s) => write!(f, "{}", s),
            Self::String(s) => write!(f, "{:?}", s.as_str()),
            Self::Oid(oid) => write!(f, "{}", oid),
        }
    }
}

/// An insertion-ordered map from slots to values.
///
/// Equality compares contents and ignores insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table(IndexMap<Slot, Value>);

impl Table {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty table with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self(IndexMap::with_capacity(capacity))
    }

    /// Insert a value, returning the previous one.
    ///
    /// Storing `Void` removes the slot.
    pub fn insert(&mut self, slot: impl Into<Slot>, value: Value) -> Option<Value> {
        let slot = slot.into();
        if value.is_void() {
            self.0.shift_remove(&slot)
        } else {
            self.0.insert(slot, value)
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, slot: impl Into<Slot>, value: impl Into<Value>) -> Self {
        self.insert(slot, value.into());
        self
    }

    /// Look up a slot.
    pub fn get(&self, slot: &Slot) -> Option<&Value> {
        self.0.get(slot)
    }

    /// Look up a symbol slot by name.
    pub fn get_sym(&self, name: &str) -> Option<&Value> {
        self.0.get(&Slot::symbol(name))
    }

    /// Look up a slot by name, trying the symbol form then the string form.
    pub fn get_named(&self, name: &str) -> Option<&Value> {
        self.get_sym(name)
            .or_else(|| self.0.get(&Slot::string(name)))
    }

    /// Whether a slot is present.
    pub fn contains(&self, slot: &Slot) -> bool {
        self.0.contains_key(slot)
    }

    /// Remove a slot, preserving the order of the remaining entries.
    pub fn remove(&mut self, slot: &Slot) -> Option<Value> {
        self.0.shift_remove(slot)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over entries in insertion order.
    pub fn iter(&self) -> indexmap::map::Iter<'_, Slot, Value> {
        self.0.iter()
    }

    /// Iterate over keys in insertion order.
    pub fn keys(&self) -> indexmap::map::Keys<'_, Slot, Value> {
        self.0.keys()
    }
}

impl FromIterator<(Slot, Value)> for Table {
    fn from_iter<I: IntoIterator<Item = (Slot, Value)>>(iter: I) -> Self {
        let mut table = Table::new();
        for (k, v) in iter {
            table.insert(k, v);
        }
        table
    }
}

impl IntoIterator for Table {
    type Item = (Slot, Value);
    type IntoIter = indexmap::map::IntoIter<Slot, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Table {
    type Item = (&'a Slot, &'a Value);
    type IntoIter = indexmap::map::Iter<'a, Slot, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_equality_ignores_order() {
        let a = Table::new().with("x", 1).with("y", 2);
        let b = Table::new().with("y", 2).with("x", 1);
        assert_eq!(a, b);
    }

    #[test]
    fn test_symbol_and_string_slots_differ() {
        let table = Table::new()
            .with("name", "sym")
            .with(Slot::string("name"), "str");

        assert_eq!(table.len(), 2);
        assert_eq!(table.get_sym("name"), Some(&Value::from("sym")));
        assert_eq!(table.get(&Slot::string("name")), Some(&Value::from("str")));
    }

    #[test]
    fn test_void_insert_removes() {
        let mut table = Table::new().with("a", 1).with("b", 2);
        table.insert("a", Value::Void);

        assert_eq!(table.len(), 1);
        assert!(table.get_sym("a").is_none());
        assert_eq!(table.keys().next(), Some(&Slot::symbol("b")));
    }

    #[test]
    fn test_slot_value_conversion() {
        let oid = Oid::from_parts(1, 2);
        assert_eq!(Slot::from_value(&Value::Oid(oid)), Some(Slot::Oid(oid)));
        assert_eq!(Slot::from_value(&Value::from(3)), None);
        assert_eq!(Slot::symbol("k").to_value(), Value::symbol("k"));
    }
}
