//! Operator-name table and choice-slot registry.
//!
//! A [`SlotRegistry`] is built once, usually at process start, and shared
//! through an `Arc` by every server and collection that encodes or decodes
//! documents. Tests construct a fresh registry per case.
//!
//! The operator table maps the lower-cased spelling of database operators
//! (`$addtoset`) to their canonical casing (`$addToSet`). It is sorted when
//! the registry is built and never changes afterward.
//!
//! The choice-slot list records keys whose values are always arrays that
//! denote sets. It is an insertion-ordered hash set, so indices follow
//! registration order and lookups stay constant time. Reads take a shared
//! lock; registration appends under the write lock and is bounded by a
//! fixed capacity.

use chorus_value::Slot;
use indexmap::IndexSet;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{MongoError, MongoResult};

/// Maximum number of choice-slots a registry accepts by default.
pub const MAX_CHOICE_SLOTS: usize = 2032;

/// Maximum number of entries in the operator table.
pub const OPERATOR_CAPACITY: usize = 8000;

/// Operators whose canonical spelling has embedded uppercase.
pub const DEFAULT_OPERATORS: &[&str] = &[
    "$elemMatch",
    "$ifNull",
    "$setOnInsert",
    "$currentDate",
    "$indexStats",
    "$addToSet",
    "$setEquals",
    "$setIntersection",
    "$setUnion",
    "$setDifference",
    "$setIsSubset",
    "$anyElementTrue",
    "$allElementsTrue",
    "$stdDevPop",
    "$stdDevSamp",
    "$toLower",
    "$toUpper",
    "$arrayElemAt",
    "$concatArrays",
    "$isArray",
    "$dayOfYear",
    "$dayOfMonth",
    "$dayOfWeek",
    "$pullAll",
    "$pushAll",
    "$comment",
    "$geoNear",
    "$geoWithin",
    "$geoIntersects",
    "$nearSphere",
    "$bitsAllSet",
    "$bitsAllClear",
    "$bitsAnySet",
    "$bitsAnyClear",
    "$or",
    "$and",
    "$not",
    "$nor",
    "$gt",
    "$gte",
    "$lt",
    "$lte",
    "$eq",
    "$ne",
    "$nin",
    "$in",
    "$exists",
    "$maxScan",
    "$maxTimeMS",
    "$returnKey",
    "$showDiskLoc",
];

/// Query operators whose operands are sets, registered by
/// [`SlotRegistry::standard`].
pub const STANDARD_CHOICE_SLOTS: &[&str] = &["$each", "$in", "$nin", "$all", "$and", "$or", "$nor"];

/// Shared key policy state: operator casing and choice-slots.
#[derive(Debug)]
pub struct SlotRegistry {
    /// `(lower-cased, canonical)` pairs sorted by the lower-cased name.
    operators: Vec<(Box<str>, Box<str>)>,
    choice_slots: RwLock<IndexSet<Slot>>,
    capacity: usize,
}

impl Default for SlotRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotRegistry {
    /// A registry with the default operator table and no choice-slots.
    pub fn new() -> Self {
        Self {
            operators: sorted_operators(DEFAULT_OPERATORS.iter().copied()),
            choice_slots: RwLock::new(IndexSet::new()),
            capacity: MAX_CHOICE_SLOTS,
        }
    }

    /// A registry with the default operator table and the set-valued
    /// query operators as choice-slots.
    pub fn standard() -> Self {
        let registry = Self::new();
        let mut slots = registry.choice_slots.write();
        slots.extend(STANDARD_CHOICE_SLOTS.iter().map(|name| Slot::symbol(name)));
        drop(slots);
        registry
    }

    /// Create a builder for a customized registry.
    pub fn builder() -> SlotRegistryBuilder {
        SlotRegistryBuilder::new()
    }

    /// The canonical spelling of an operator name, matched case-insensitively.
    pub fn canonical_operator(&self, name: &str) -> Option<&str> {
        if !name.starts_with('$') {
            return None;
        }
        let lower = name.to_ascii_lowercase();
        self.operators
            .binary_search_by(|(key, _)| key.as_ref().cmp(lower.as_str()))
            .ok()
            .map(|i| self.operators[i].1.as_ref())
    }

    /// Number of operators in the table.
    pub fn operator_count(&self) -> usize {
        self.operators.len()
    }

    /// Register a choice-slot, returning its index.
    ///
    /// Registering a slot twice returns the existing index. Registering past
    /// the capacity fails and leaves the registry unchanged.
    pub fn register_choice_slot(&self, slot: impl Into<Slot>) -> MongoResult<usize> {
        let slot = slot.into();
        let mut slots = self.choice_slots.write();
        if let Some(index) = slots.get_index_of(&slot) {
            return Ok(index);
        }
        if slots.len() >= self.capacity {
            warn!(slot = %slot, capacity = self.capacity, "Choice-slot registry is full");
            return Err(MongoError::registry(format!(
                "too many choice-slots declared (capacity {}), rejected {}",
                self.capacity, slot
            )));
        }
        slots.insert(slot);
        debug!(count = slots.len(), "Registered choice-slot");
        Ok(slots.len() - 1)
    }

    /// Whether a slot is registered as a choice-slot.
    pub fn is_choice_slot(&self, slot: &Slot) -> bool {
        self.choice_slots.read().contains(slot)
    }

    /// A snapshot of the registered choice-slots, in registration order.
    pub fn choice_slots(&self) -> Vec<Slot> {
        self.choice_slots.read().iter().cloned().collect()
    }

    /// Number of registered choice-slots.
    pub fn choice_slot_count(&self) -> usize {
        self.choice_slots.read().len()
    }

    /// Maximum number of choice-slots.
    pub fn choice_slot_capacity(&self) -> usize {
        self.capacity
    }
}

fn sorted_operators<'a, I>(names: I) -> Vec<(Box<str>, Box<str>)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut ops: Vec<(Box<str>, Box<str>)> = names
        .into_iter()
        .map(|name| (name.to_ascii_lowercase().into(), name.into()))
        .collect();
    ops.sort_by(|a, b| a.0.cmp(&b.0));
    ops.dedup_by(|a, b| a.0 == b.0);
    ops
}

/// Builder for [`SlotRegistry`].
#[derive(Debug)]
pub struct SlotRegistryBuilder {
    operators: Vec<String>,
    choice_slots: Vec<Slot>,
    capacity: usize,
}

impl Default for SlotRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotRegistryBuilder {
    /// Start from the default operator table.
    pub fn new() -> Self {
        Self {
            operators: DEFAULT_OPERATORS.iter().map(|s| s.to_string()).collect(),
            choice_slots: Vec::new(),
            capacity: MAX_CHOICE_SLOTS,
        }
    }

    /// Add an operator with its canonical casing.
    pub fn operator(mut self, name: impl Into<String>) -> Self {
        self.operators.push(name.into());
        self
    }

    /// Pre-register a choice-slot.
    pub fn choice_slot(mut self, slot: impl Into<Slot>) -> Self {
        self.choice_slots.push(slot.into());
        self
    }

    /// Set the choice-slot capacity.
    pub fn choice_slot_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Build the registry.
    pub fn build(self) -> MongoResult<SlotRegistry> {
        let operators = sorted_operators(self.operators.iter().map(String::as_str));
        if operators.len() > OPERATOR_CAPACITY {
            return Err(MongoError::registry(format!(
                "operator table holds {} entries, capacity is {}",
                operators.len(),
                OPERATOR_CAPACITY
            )));
        }
        let registry = SlotRegistry {
            operators,
            choice_slots: RwLock::new(IndexSet::new()),
            capacity: self.capacity,
        };
        for slot in self.choice_slots {
            registry.register_choice_slot(slot)?;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_operator_lookup() {
        let registry = SlotRegistry::new();
        assert_eq!(registry.canonical_operator("$addtoset"), Some("$addToSet"));
        assert_eq!(registry.canonical_operator("$ADDTOSET"), Some("$addToSet"));
        assert_eq!(registry.canonical_operator("$gt"), Some("$gt"));
        assert_eq!(registry.canonical_operator("$unknownop"), None);
        assert_eq!(registry.canonical_operator("addtoset"), None);
    }

    #[test]
    fn test_register_duplicate_returns_existing_index() {
        let registry = SlotRegistry::new();
        assert_eq!(registry.register_choice_slot("tags").unwrap(), 0);
        assert_eq!(registry.register_choice_slot("owners").unwrap(), 1);
        assert_eq!(registry.register_choice_slot("tags").unwrap(), 0);
        assert_eq!(registry.choice_slot_count(), 2);
        assert!(registry.is_choice_slot(&Slot::symbol("tags")));
        assert!(!registry.is_choice_slot(&Slot::string("tags")));
    }

    #[test]
    fn test_capacity_rejection_leaves_registry_intact() {
        let registry = SlotRegistry::builder()
            .choice_slot_capacity(2)
            .build()
            .unwrap();
        registry.register_choice_slot("a").unwrap();
        registry.register_choice_slot("b").unwrap();

        let err = registry.register_choice_slot("c").unwrap_err();
        assert!(err.is_registry());
        assert_eq!(registry.choice_slots(), vec![Slot::symbol("a"), Slot::symbol("b")]);
    }

    #[test]
    fn test_standard_choice_slots() {
        let registry = SlotRegistry::standard();
        assert_eq!(registry.choice_slot_count(), STANDARD_CHOICE_SLOTS.len());
        assert!(registry.is_choice_slot(&Slot::symbol("$in")));
        assert!(registry.is_choice_slot(&Slot::symbol("$each")));
        assert!(!SlotRegistry::new().is_choice_slot(&Slot::symbol("$in")));
    }

    #[test]
    fn test_full_registry_lookups_and_order() {
        let registry = SlotRegistry::new();
        for i in 0..MAX_CHOICE_SLOTS {
            let slot = Slot::symbol(&format!("field{}", i));
            assert_eq!(registry.register_choice_slot(slot).unwrap(), i);
        }
        assert!(registry.register_choice_slot("overflow").unwrap_err().is_registry());

        assert!(registry.is_choice_slot(&Slot::symbol("field0")));
        assert!(registry.is_choice_slot(&Slot::symbol("field2031")));
        assert!(!registry.is_choice_slot(&Slot::symbol("overflow")));
        assert_eq!(registry.register_choice_slot("field1000").unwrap(), 1000);

        let slots = registry.choice_slots();
        assert_eq!(slots.first(), Some(&Slot::symbol("field0")));
        assert_eq!(slots.last(), Some(&Slot::symbol("field2031")));
    }

    #[test]
    fn test_builder_custom_operator() {
        let registry = SlotRegistry::builder()
            .operator("$jsonSchema")
            .choice_slot("tags")
            .build()
            .unwrap();
        assert_eq!(registry.canonical_operator("$jsonschema"), Some("$jsonSchema"));
        assert_eq!(registry.operator_count(), DEFAULT_OPERATORS.len() + 1);
        assert!(registry.is_choice_slot(&Slot::symbol("tags")));
    }
}
