//! Fuzz target for the value text parser.
//!
//! Feeds arbitrary strings to the parser. Anything that parses must print
//! back to text that parses again.
//!
//! Run with:
//! ```bash
//! cargo +nightly fuzz run fuzz_value_text
//! ```

#![no_main]

use chorus_value::text;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(value) = text::parse(input) {
            let printed = text::unparse(&value);
            assert!(
                text::parse(&printed).is_ok(),
                "printed form {printed:?} of {input:?} does not parse"
            );
        }
    }
});
