//! Fuzz target for the connection URI parser.
//!
//! Anything that parses must render to a connection string that parses
//! to the same hosts. The redacted form must never contain the password.
//!
//! Run with:
//! ```bash
//! cargo +nightly fuzz run fuzz_mongo_uri
//! ```

#![no_main]

use chorus_mongodb::MongoUri;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(uri) = MongoUri::parse(input) else {
        return;
    };

    let reparsed = MongoUri::parse(&uri.to_connection_string())
        .expect("rendered connection string must parse");
    assert_eq!(reparsed.hosts(), uri.hosts());

    if let Some(password) = uri.password().filter(|p| p.len() > 3) {
        assert!(!uri.to_string().contains(&format!(":{}@", password)));
    }
});
