//! Key/slot policy.
//!
//! Decides how a table key is written as a document field name and how a
//! field name is read back into a key, together with the per-field flags
//! (choice-slot, symbol slot, raw key) that govern the field's value.
//!
//! A field name is interned only when it is short and made of plain
//! characters; anything else stays a raw string so arbitrary data in field
//! names never floods the symbol table.

use chorus_value::{Slot, Symbol, Value, text};
use tracing::trace;

use crate::fieldmap::FieldMap;
use crate::flags::BehaviorFlags;
use crate::registry::SlotRegistry;

/// Longest field name that is interned.
pub const MAX_INTERNED_KEY_LEN: usize = 32;

/// Stand-in for `.` in stored field names.
pub const PERIOD_ESCAPE: char = '\u{02}';

const EXTRA_KEY_CHARS: &[u8] = b"_-%./$";

/// How a field name is represented on the host side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass {
    /// Kept as a literal string.
    Raw,
    /// Interned as a symbol. `case_sensitive` is set when the name has
    /// uppercase characters that must survive as written.
    Interned {
        /// Whether the name carries uppercase characters.
        case_sensitive: bool,
    },
}

impl KeyClass {
    /// Whether the key is interned.
    pub fn is_interned(&self) -> bool {
        matches!(self, Self::Interned { .. })
    }
}

/// Classify a field name.
///
/// ```rust
/// use chorus_mongodb::keys::{classify_key, KeyClass};
///
/// assert_eq!(classify_key("name"), KeyClass::Interned { case_sensitive: false });
/// assert_eq!(classify_key("userId"), KeyClass::Interned { case_sensitive: true });
/// assert_eq!(classify_key("has space"), KeyClass::Raw);
/// ```
pub fn classify_key(key: &str) -> KeyClass {
    if key.is_empty() || key.len() > MAX_INTERNED_KEY_LEN {
        return KeyClass::Raw;
    }
    let mut case_sensitive = false;
    for b in key.bytes() {
        if b.is_ascii_uppercase() {
            case_sensitive = true;
        } else if !(b.is_ascii_alphanumeric() || EXTRA_KEY_CHARS.contains(&b)) {
            return KeyClass::Raw;
        }
    }
    KeyClass::Interned { case_sensitive }
}

fn escape_periods(name: String) -> String {
    if name.contains('.') {
        name.replace('.', "\u{02}")
    } else {
        name
    }
}

fn unescape_periods(field: &str) -> std::borrow::Cow<'_, str> {
    if field.contains(PERIOD_ESCAPE) {
        std::borrow::Cow::Owned(field.replace(PERIOD_ESCAPE, "."))
    } else {
        std::borrow::Cow::Borrowed(field)
    }
}

/// Key policy bound to a registry and an optional field map.
#[derive(Debug, Clone, Copy)]
pub struct KeyPolicy<'a> {
    registry: &'a SlotRegistry,
    fieldmap: Option<&'a FieldMap>,
}

impl<'a> KeyPolicy<'a> {
    /// Create a policy.
    pub fn new(registry: &'a SlotRegistry, fieldmap: Option<&'a FieldMap>) -> Self {
        Self { registry, fieldmap }
    }

    /// The field map in effect.
    pub fn fieldmap(&self) -> Option<&'a FieldMap> {
        self.fieldmap
    }

    /// Whether the slot must be written and read as a raw string.
    pub fn is_raw(&self, slot: &Slot) -> bool {
        slot.is_string() || self.fieldmap.is_some_and(|fm| fm.is_raw_slot(slot))
    }

    /// Whether the slot always holds a set.
    pub fn is_choice_slot(&self, slot: &Slot) -> bool {
        self.registry.is_choice_slot(slot) || self.fieldmap.is_some_and(|fm| fm.is_choice_slot(slot))
    }

    /// The flags governing a field's value.
    pub fn field_flags(&self, slot: &Slot, flags: BehaviorFlags) -> BehaviorFlags {
        if self.is_raw(slot) {
            return flags.for_raw_key();
        }
        let mut flags = flags;
        if self.is_choice_slot(slot) {
            flags |= BehaviorFlags::CHOICESLOT;
        }
        if self.fieldmap.is_some_and(|fm| fm.is_sym_slot(slot)) {
            flags |= BehaviorFlags::SYMSLOT;
        }
        flags
    }

    /// The stored field name for a slot, and the flags for its value.
    pub fn encode(&self, slot: &Slot, flags: BehaviorFlags) -> (String, BehaviorFlags) {
        let field_flags = self.field_flags(slot, flags);
        let name = match slot {
            Slot::String(s) if flags.contains(BehaviorFlags::COLONIZE) && s.starts_with(':') => {
                format!("\\{}", s)
            }
            Slot::String(s) => s.to_string(),
            Slot::Symbol(sym) if self.is_raw(slot) => sym.as_str().to_string(),
            Slot::Symbol(sym) => self.symbol_field(sym, flags),
            Slot::Oid(oid) => oid.to_string(),
        };
        (escape_periods(name), field_flags)
    }

    fn symbol_field(&self, sym: &Symbol, flags: BehaviorFlags) -> String {
        if let Some(canonical) = self.registry.canonical_operator(sym.as_str()) {
            return canonical.to_string();
        }
        let plain = classify_key(sym.as_str()).is_interned();
        if flags.contains(BehaviorFlags::SLOTIFY) && plain {
            sym.as_str().to_string()
        } else if flags.contains(BehaviorFlags::COLONIZE) || !plain {
            format!(":{}", text::unparse(&Value::Symbol(sym.clone())))
        } else {
            format!(":{}", sym.as_str())
        }
    }

    /// The slot for a stored field name, and the flags for its value.
    pub fn decode(&self, field: &str, flags: BehaviorFlags) -> (Slot, BehaviorFlags) {
        let field = unescape_periods(field);
        let slot = decode_slot(&field, flags);
        trace!(field = %field, slot = %slot, "Decoded field name");
        let field_flags = self.field_flags(&slot, flags);
        (slot, field_flags)
    }
}

fn decode_slot(field: &str, flags: BehaviorFlags) -> Slot {
    if !flags.contains(BehaviorFlags::SLOTIFY) {
        return Slot::string(field);
    }
    if let Some(escaped) = field.strip_prefix('\\') {
        if escaped.starts_with(':') {
            return Slot::string(escaped);
        }
    }
    let parse_as_slot = |text_form: &str| {
        text::parse_prefixed(text_form)
            .ok()
            .and_then(|v| Slot::from_value(&v))
            .unwrap_or_else(|| Slot::string(field))
    };
    if flags.contains(BehaviorFlags::COLONIZE) && field.starts_with(':') && field.len() > 1 {
        return parse_as_slot(field);
    }
    if text::is_oid_literal(field) {
        return parse_as_slot(field);
    }
    if let Some(rest) = field.strip_prefix(':') {
        if text::is_oid_literal(rest) {
            return parse_as_slot(rest);
        }
    }
    match classify_key(field) {
        KeyClass::Raw => Slot::string(field),
        KeyClass::Interned { .. } => Slot::symbol(field),
    }
}
