//! Conversion between dynamic values and BSON documents.
//!
//! A [`Codec`] binds the key policy (operator table, choice-slots, field
//! map) to a set of [`BehaviorFlags`]. Encoding is all-or-nothing: a value
//! that cannot be represented aborts the whole document and no partial
//! document is ever returned.
//!
//! ## Wire forms
//!
//! | Value | BSON |
//! |-------|------|
//! | integer | `int32` when it fits, else `int64` |
//! | choice | array, led by [`CHOICE_TAG`] unless the field is a choice-slot |
//! | empty choice | `null` (or `[]` in a choice-slot) |
//! | pair | `{":|>car>|": .., ":|>cdr>|": ..}` |
//! | compound | `{"%knotag": tag, "0": .., "1": ..}` |
//! | OID `@hi/lo` | object id `00000000 hi lo` |
//!
//! ```rust
//! use chorus_mongodb::codec::Codec;
//! use chorus_mongodb::registry::SlotRegistry;
//! use chorus_mongodb::flags::BehaviorFlags;
//! use chorus_value::{Table, Value};
//!
//! let registry = SlotRegistry::new();
//! let codec = Codec::new(&registry, None, BehaviorFlags::DEFAULTS);
//! let doc = codec
//!     .encode_document(&Value::Table(Table::new().with("name", "alice")))
//!     .unwrap();
//! assert_eq!(doc.get_str("name").unwrap(), "alice");
//! ```

mod decode;
mod encode;

use crate::fieldmap::FieldMap;
use crate::flags::BehaviorFlags;
use crate::keys::KeyPolicy;
use crate::registry::SlotRegistry;

/// Leading array element marking an array as a set.
pub const CHOICE_TAG: &str = "%%ChOiCe%%";

/// Field holding the first element of an encoded pair.
pub const CAR_FIELD: &str = ":|>car>|";

/// Field holding the second element of an encoded pair.
pub const CDR_FIELD: &str = ":|>cdr>|";

/// Field holding the tag of an encoded compound.
pub const COMPOUND_TAG_FIELD: &str = "%knotag";

/// Largest compound arity accepted on decode.
pub const MAX_COMPOUND_FIELDS: usize = 16;

/// Deepest nesting accepted on encode.
pub const MAX_DEPTH: usize = 100;

/// Compound tags with dedicated encodings.
pub mod tags {
    /// A 12-byte database object id held as bytes.
    pub const OBJECT_ID: &str = "mongoid";
    /// A compound written as a plain array.
    pub const VECTOR: &str = "%mongovec";
    /// A `(timestamp, increment)` BSON timestamp.
    pub const TIMESTAMP: &str = "mongotime";
    /// Binary data with the user-defined subtype.
    pub const USER_BINARY: &str = "mongouser";
    /// Binary data with the MD5 subtype.
    pub const MD5: &str = "md5hash";
    /// Binary data with the function subtype.
    pub const FUNCTION: &str = "mongofun";
    /// Symbol standing for the BSON max key.
    pub const MAX_KEY: &str = "mongomax";
    /// Symbol standing for the BSON min key.
    pub const MIN_KEY: &str = "mongomin";
}

/// Document codec bound to a key policy and flags.
#[derive(Debug, Clone, Copy)]
pub struct Codec<'a> {
    keys: KeyPolicy<'a>,
    flags: BehaviorFlags,
}

impl<'a> Codec<'a> {
    /// Create a codec.
    pub fn new(
        registry: &'a SlotRegistry,
        fieldmap: Option<&'a FieldMap>,
        flags: BehaviorFlags,
    ) -> Self {
        Self {
            keys: KeyPolicy::new(registry, fieldmap),
            flags,
        }
    }

    /// The flags in effect.
    pub fn flags(&self) -> BehaviorFlags {
        self.flags
    }

    /// The same codec with different flags.
    pub fn with_flags(self, flags: BehaviorFlags) -> Self {
        Self { flags, ..self }
    }

    /// The key policy in effect.
    pub fn keys(&self) -> &KeyPolicy<'a> {
        &self.keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fieldmap::{FieldMap, FieldTransform};
    use bson::{Bson, doc};
    use chorus_value::{Choice, Oid, Regex, RegexFlags, Slot, Table, Value};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn round_trip(codec: &Codec<'_>, value: &Value) -> Value {
        let doc = codec.encode_document(value).unwrap();
        codec.decode_document(&doc).unwrap()
    }

    fn sample() -> Value {
        let nested = Table::new().with("city", "Lyon").with("zip", 69001);
        let mut table = Table::new()
            .with("name", "alice")
            .with("age", 30)
            .with("big", 5_000_000_000i64)
            .with("score", 1.5)
            .with("ok", true)
            .with("tags", Value::choice(vec![Value::from("x"), Value::from("y")]))
            .with("nested", nested)
            .with(
                "seq",
                Value::Sequence(vec![Value::from(1), Value::from(2), Value::from("three")]),
            )
            .with("who", Value::symbol("Bob"))
            .with("colon", ":literal")
            .with("slash", "\\x")
            .with("when", Utc.timestamp_millis_opt(1_600_000_000_123).unwrap())
            .with("uuid", Uuid::from_u128(0x1234_5678_9abc_def0_1122_3344_5566_7788))
            .with("empty", Value::empty_choice());
        table.insert("id", Value::Oid(Oid::from_parts(0x1000, 0x2a)));
        table.insert("pair", Value::pair(Value::from(1), Value::from("x")));
        table.insert("rx", Value::Regex(Regex::new("^a.*", RegexFlags::from_options("i"))));
        table.insert("bytes", Value::Bytes(vec![0, 1, 2, 255]));
        table.insert("point", Value::compound("point", vec![Value::from(1), Value::from(2)]));
        table.insert(
            "blob",
            Value::compound(tags::USER_BINARY, vec![Value::Bytes(vec![9, 9])]),
        );
        table.insert(
            "stamp",
            Value::compound(
                tags::TIMESTAMP,
                vec![
                    Value::Timestamp(Utc.timestamp_opt(1_600_000_000, 0).unwrap()),
                    Value::from(7),
                ],
            ),
        );
        table.insert("objid", Value::ObjectId([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]));
        table.insert(Slot::Oid(Oid::from_parts(1, 2)), Value::from("oid keyed"));
        table.insert(Slot::string("Raw Key"), Value::from("raw"));
        Value::Table(table)
    }

    #[test]
    fn test_round_trip_with_defaults() {
        let registry = SlotRegistry::new();
        let codec = Codec::new(&registry, None, BehaviorFlags::DEFAULTS);
        let value = sample();
        assert_eq!(round_trip(&codec, &value), value);
    }

    #[test]
    fn test_integer_widths() {
        let registry = SlotRegistry::new();
        let codec = Codec::new(&registry, None, BehaviorFlags::DEFAULTS);
        let doc = codec
            .encode_document(&Value::Table(
                Table::new().with("small", 5).with("large", 1i64 << 40),
            ))
            .unwrap();
        assert_eq!(doc.get("small"), Some(&Bson::Int32(5)));
        assert_eq!(doc.get("large"), Some(&Bson::Int64(1 << 40)));
    }

    #[test]
    fn test_oversized_integer_is_an_error() {
        let registry = SlotRegistry::new();
        let codec = Codec::new(&registry, None, BehaviorFlags::DEFAULTS);
        let value = Value::Table(Table::new().with("n", Value::BigInt(i128::from(i64::MAX) + 1)));
        assert!(codec.encode_document(&value).unwrap_err().is_codec());

        let fits = Value::Table(Table::new().with("n", Value::BigInt(42)));
        assert_eq!(
            codec.encode_document(&fits).unwrap(),
            doc! { "n": 42 }
        );
    }

    #[test]
    fn test_choice_sentinel() {
        let registry = SlotRegistry::new();
        let codec = Codec::new(&registry, None, BehaviorFlags::DEFAULTS);
        let value = Value::Table(
            Table::new().with("tags", Value::choice(vec![Value::from(1), Value::from(2)])),
        );
        let doc = codec.encode_document(&value).unwrap();
        assert_eq!(
            doc.get_array("tags").unwrap(),
            &vec![Bson::String(CHOICE_TAG.into()), Bson::Int32(1), Bson::Int32(2)]
        );

        let prefchoices = codec.with_flags(BehaviorFlags::DEFAULTS | BehaviorFlags::PREFCHOICES);
        let doc = prefchoices.encode_document(&value).unwrap();
        assert_eq!(
            doc.get_array("tags").unwrap(),
            &vec![Bson::Int32(1), Bson::Int32(2)]
        );
        assert_eq!(prefchoices.decode_document(&doc).unwrap(), value);
    }

    #[test]
    fn test_array_decode_precedence() {
        let registry = SlotRegistry::new();
        registry.register_choice_slot("tags").unwrap();
        let codec = Codec::new(&registry, None, BehaviorFlags::DEFAULTS);

        let doc = doc! {
            "tags": ["a", "b"],
            "seq": ["a", "b"],
            "set": [CHOICE_TAG, "a", "b"],
            "one": [CHOICE_TAG, "a"],
        };
        let table = codec.decode_table(&doc).unwrap();
        let ab = Value::choice(vec![Value::from("a"), Value::from("b")]);
        assert_eq!(table.get_sym("tags"), Some(&ab));
        assert_eq!(
            table.get_sym("seq"),
            Some(&Value::Sequence(vec![Value::from("a"), Value::from("b")]))
        );
        assert_eq!(table.get_sym("set"), Some(&ab));
        assert_eq!(table.get_sym("one"), Some(&Value::from("a")));

        let prefchoices = codec.with_flags(BehaviorFlags::DEFAULTS | BehaviorFlags::PREFCHOICES);
        let table = prefchoices.decode_table(&doc).unwrap();
        assert_eq!(table.get_sym("seq"), Some(&ab));
    }

    #[test]
    fn test_choice_slot_wraps_single_values() {
        let registry = SlotRegistry::new();
        let fieldmap = FieldMap::new().choice_slot("owners");
        let codec = Codec::new(&registry, Some(&fieldmap), BehaviorFlags::DEFAULTS);

        let value = Value::Table(Table::new().with("owners", "ann"));
        let doc = codec.encode_document(&value).unwrap();
        assert_eq!(doc, doc! { "owners": ["ann"] });
        assert_eq!(codec.decode_document(&doc).unwrap(), value);

        let empty = Value::Table(Table::new().with("owners", Value::empty_choice()));
        let doc = codec.encode_document(&empty).unwrap();
        assert_eq!(doc, doc! { "owners": [] });
    }

    #[test]
    fn test_colon_strings_are_escaped() {
        let registry = SlotRegistry::new();
        let codec = Codec::new(&registry, None, BehaviorFlags::DEFAULTS);
        let value = Value::Table(Table::new().with("s", ":looks-like-a-symbol"));
        let doc = codec.encode_document(&value).unwrap();
        assert_eq!(doc.get_str("s").unwrap(), "\\:looks-like-a-symbol");
        assert_eq!(codec.decode_document(&doc).unwrap(), value);

        let plain = codec.with_flags(BehaviorFlags::SLOTIFY);
        let doc = plain.encode_document(&value).unwrap();
        assert_eq!(doc.get_str("s").unwrap(), ":looks-like-a-symbol");
    }

    #[test]
    fn test_symbol_forms() {
        let registry = SlotRegistry::new();
        let fieldmap = FieldMap::new().sym_slot("kind");
        let codec = Codec::new(&registry, Some(&fieldmap), BehaviorFlags::DEFAULTS);
        let value = Value::Table(
            Table::new()
                .with("kind", Value::symbol("Widget"))
                .with("other", Value::symbol("Widget")),
        );
        let doc = codec.encode_document(&value).unwrap();
        assert_eq!(doc.get_str("kind").unwrap(), "widget");
        assert_eq!(doc.get_str("other").unwrap(), ":Widget");

        let bare = Codec::new(&registry, None, BehaviorFlags::SLOTIFY);
        let doc = bare.encode_document(&value).unwrap();
        assert_eq!(doc.get_str("other").unwrap(), "Widget");
    }

    #[test]
    fn test_symslot_decodes_marked_strings() {
        let registry = SlotRegistry::new();
        let fieldmap = FieldMap::new().sym_slot("ref");
        let codec = Codec::new(&registry, Some(&fieldmap), BehaviorFlags::SLOTIFY);
        let table = codec
            .decode_table(&doc! { "ref": "@1/2", "plain": "@1/2" })
            .unwrap();
        assert_eq!(table.get_sym("ref"), Some(&Value::Oid(Oid::from_parts(1, 2))));
        assert_eq!(table.get_sym("plain"), Some(&Value::from("@1/2")));
    }

    #[test]
    fn test_special_bson_types() {
        let registry = SlotRegistry::new();
        let codec = Codec::new(&registry, None, BehaviorFlags::DEFAULTS);
        let table = codec
            .decode_table(&doc! {
                "max": Bson::MaxKey,
                "min": Bson::MinKey,
                "nothing": Bson::Null,
                "gone": Bson::Undefined,
            })
            .unwrap();
        assert_eq!(table.get_sym("max"), Some(&Value::symbol(tags::MAX_KEY)));
        assert_eq!(table.get_sym("min"), Some(&Value::symbol(tags::MIN_KEY)));
        assert_eq!(table.get_sym("nothing"), Some(&Value::Choice(Choice::new())));
        assert!(!table.contains(&Slot::symbol("gone")));
    }

    #[test]
    fn test_object_id_compound() {
        let registry = SlotRegistry::new();
        let codec = Codec::new(&registry, None, BehaviorFlags::DEFAULTS);
        let bytes = vec![0xab; 12];
        let value = Value::Table(
            Table::new().with("_id", Value::compound(tags::OBJECT_ID, vec![Value::Bytes(bytes)])),
        );
        let doc = codec.encode_document(&value).unwrap();
        assert_eq!(
            doc.get_object_id("_id").unwrap().bytes(),
            [0xab; 12]
        );

        let short = Value::Table(
            Table::new().with("_id", Value::compound(tags::OBJECT_ID, vec![Value::Bytes(vec![1])])),
        );
        assert!(codec.encode_document(&short).unwrap_err().is_codec());
    }

    #[test]
    fn test_mongovec_encodes_as_array() {
        let registry = SlotRegistry::new();
        let codec = Codec::new(&registry, None, BehaviorFlags::DEFAULTS);
        let value = Value::Table(Table::new().with(
            "v",
            Value::compound(tags::VECTOR, vec![Value::from(1), Value::from(2)]),
        ));
        let doc = codec.encode_document(&value).unwrap();
        assert_eq!(doc, doc! { "v": [1, 2] });
    }

    #[test]
    fn test_compound_arity_limit() {
        let registry = SlotRegistry::new();
        let codec = Codec::new(&registry, None, BehaviorFlags::DEFAULTS);
        let doc = doc! { "c": { "%knotag": ":wide", "0": 1, "16": 2 } };
        assert!(codec.decode_table(&doc).unwrap_err().is_codec());

        let doc = doc! { "c": { "%knotag": ":narrow", "2": 3 } };
        let table = codec.decode_table(&doc).unwrap();
        assert_eq!(
            table.get_sym("c"),
            Some(&Value::compound("narrow", vec![Value::Void, Value::Void, Value::from(3)]))
        );
    }

    #[test]
    fn test_textual_fallback() {
        let registry = SlotRegistry::new();
        let codec = Codec::new(&registry, None, BehaviorFlags::DEFAULTS);
        let value = Value::Table(Table::new().with("r", Value::Ratio(1, 3)));
        let doc = codec.encode_document(&value).unwrap();
        assert_eq!(doc.get_str("r").unwrap(), ":1/3");
        assert_eq!(codec.decode_document(&doc).unwrap(), value);
    }

    #[test]
    fn test_unparseable_colon_string_is_kept() {
        let registry = SlotRegistry::new();
        let codec = Codec::new(&registry, None, BehaviorFlags::DEFAULTS);
        let table = codec.decode_table(&doc! { "s": ":(unclosed" }).unwrap();
        assert_eq!(table.get_sym("s"), Some(&Value::from(":(unclosed")));
    }

    #[test]
    fn test_deeply_nested_colon_text_is_kept() {
        let registry = SlotRegistry::new();
        let codec = Codec::new(&registry, None, BehaviorFlags::DEFAULTS);
        let deep = format!(":{}", "{".repeat(10_000));

        let table = codec.decode_table(&doc! { "note": deep.as_str() }).unwrap();
        assert_eq!(table.get_sym("note"), Some(&Value::from(deep.as_str())));

        let mut doc = bson::Document::new();
        doc.insert(deep.clone(), 1);
        let table = codec.decode_table(&doc).unwrap();
        assert_eq!(table.get(&Slot::string(deep.as_str())), Some(&Value::from(1)));
    }

    #[test]
    fn test_top_level_must_be_a_table() {
        let registry = SlotRegistry::new();
        let codec = Codec::new(&registry, None, BehaviorFlags::DEFAULTS);
        assert!(codec.encode_document(&Value::from(3)).unwrap_err().is_codec());
        assert_eq!(codec.encode_document(&Value::Void).unwrap(), bson::Document::new());
        assert_eq!(
            codec.decode_document(&bson::Document::new()).unwrap(),
            Value::Table(Table::new())
        );
    }

    #[test]
    fn test_nesting_limit() {
        let registry = SlotRegistry::new();
        let codec = Codec::new(&registry, None, BehaviorFlags::DEFAULTS);
        let mut value = Value::from(1);
        for _ in 0..(MAX_DEPTH + 5) {
            value = Value::Table(Table::new().with("n", value));
        }
        assert!(codec.encode_document(&value).unwrap_err().is_codec());
    }

    #[test]
    fn test_fieldmap_transforms() {
        let registry = SlotRegistry::new();
        let fieldmap = FieldMap::new()
            .encode_with("when", FieldTransform::Text)
            .decode_with("when", FieldTransform::Text)
            .encode_with("bad", FieldTransform::function(|_| Err("refused".into())));
        let codec = Codec::new(&registry, Some(&fieldmap), BehaviorFlags::DEFAULTS);

        let value = Value::Table(Table::new().with("when", Value::Ratio(2, 5)));
        let doc = codec.encode_document(&value).unwrap();
        assert_eq!(doc.get_str("when").unwrap(), "2/5");
        assert_eq!(codec.decode_document(&doc).unwrap(), value);

        let bad = Value::Table(Table::new().with("bad", 1));
        assert!(codec.encode_document(&bad).unwrap_err().is_codec());
    }
}
