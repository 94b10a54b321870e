//! Fuzz target for document decoding.
//!
//! Reads arbitrary bytes as BSON and decodes whatever parses, under a
//! random choice of behavior flags. Decoding must return errors, never
//! panic, and must respect the nesting limit.
//!
//! Run with:
//! ```bash
//! cargo +nightly fuzz run fuzz_document_decode
//! ```

#![no_main]

use bson::Document;
use chorus_mongodb::{BehaviorFlags, Codec, FieldMap, SlotRegistry};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&bits, rest)) = data.split_first() else {
        return;
    };
    let Ok(doc) = Document::from_reader(rest) else {
        return;
    };

    let registry = SlotRegistry::standard();
    let fieldmap = FieldMap::new().choice_slot("tags").sym_slot("kind");
    let flags = BehaviorFlags::from_bits(u32::from(bits) & 0x3f);
    let codec = Codec::new(&registry, Some(&fieldmap), flags);
    let _ = codec.decode_document(&doc);
});
