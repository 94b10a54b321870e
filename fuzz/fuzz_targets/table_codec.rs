//! Structured fuzz target for the table codec.
//!
//! Builds tables from arbitrary keys and scalar values. Whatever encodes
//! must decode again, and tables with plain keys must come back equal.
//!
//! Run with:
//! ```bash
//! cargo +nightly fuzz run fuzz_table_codec
//! ```

#![no_main]

use arbitrary::Arbitrary;
use chorus_mongodb::keys::classify_key;
use chorus_mongodb::{BehaviorFlags, Codec, SlotRegistry};
use chorus_value::{Slot, Table, Value};
use libfuzzer_sys::fuzz_target;

/// A scalar the codec round-trips exactly.
#[derive(Debug, Arbitrary)]
enum FuzzScalar {
    Int(i64),
    Bool(bool),
    Text(String),
    Bytes(Vec<u8>),
    Symbol(String),
}

impl FuzzScalar {
    fn to_value(&self) -> Option<Value> {
        Some(match self {
            Self::Int(n) => Value::Int(*n),
            Self::Bool(b) => Value::Bool(*b),
            Self::Text(s) => Value::from(s.as_str()),
            Self::Bytes(b) => Value::Bytes(b.clone()),
            // Only plain names are stored as bare symbols.
            Self::Symbol(s)
                if !s.is_empty() && s.len() <= 32 && s.bytes().all(|b| b.is_ascii_alphanumeric()) =>
            {
                Value::symbol(s)
            }
            Self::Symbol(_) => return None,
        })
    }
}

#[derive(Debug, Arbitrary)]
struct FuzzTable {
    fields: Vec<(String, FuzzScalar)>,
}

fuzz_target!(|input: FuzzTable| {
    let mut table = Table::new();
    let mut plain = true;
    for (key, scalar) in &input.fields {
        if key.is_empty() || key.starts_with(['$', '\\', ':', '@']) || key.contains('\0') {
            continue;
        }
        let Some(value) = scalar.to_value() else {
            continue;
        };
        plain &= classify_key(key).is_interned() && !key.contains('\u{2}');
        table.insert(Slot::symbol(key), value);
    }
    let value = Value::Table(table);

    let registry = SlotRegistry::new();
    let codec = Codec::new(&registry, None, BehaviorFlags::DEFAULTS);
    if let Ok(doc) = codec.encode_document(&value) {
        let back = codec.decode_document(&doc).expect("encoded document must decode");
        if plain {
            assert_eq!(back, value);
        }
    }
});
