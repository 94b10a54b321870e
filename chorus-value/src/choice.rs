//! Unordered sets of values.

use crate::value::Value;

/// An unordered, duplicate-free set of values.
///
/// Choices never nest: adding a choice to a choice adds its elements.
/// Equality is set equality, independent of insertion order.
#[derive(Debug, Clone, Default)]
pub struct Choice(Vec<Value>);

impl Choice {
    /// Create an empty choice.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a choice from values, flattening nested choices and dropping duplicates.
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let mut choice = Self::new();
        for value in values {
            choice.insert(value);
        }
        choice
    }

    /// Add a value. Returns `false` if an equal value was already present.
    pub fn insert(&mut self, value: Value) -> bool {
        match value {
            Value::Choice(inner) => {
                let mut added = false;
                for v in inner.0 {
                    added |= self.insert(v);
                }
                added
            }
            Value::Void => false,
            other => {
                if self.0.contains(&other) {
                    false
                } else {
                    self.0.push(other);
                    true
                }
            }
        }
    }

    /// Whether an equal value is a member.
    pub fn contains(&self, value: &Value) -> bool {
        self.0.contains(value)
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the choice has no members.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over members in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.0.iter()
    }

    /// Members as a slice.
    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    /// Consume into the member list.
    pub fn into_vec(self) -> Vec<Value> {
        self.0
    }
}

impl PartialEq for Choice {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.iter().all(|v| other.0.contains(v))
    }
}

impl FromIterator<Value> for Choice {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::from_values(iter)
    }
}

impl IntoIterator for Choice {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Choice {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
