//! Option resolution.
//!
//! Options reach an operation from up to four places: the call itself, the
//! collection, the server and the process-wide [`Settings`]. They are kept
//! as an immutable [`OptionLayers`] list, most specific first, and every
//! lookup returns the first layer that has the key. Nothing is merged or
//! mutated.
//!
//! The resolvers in this module turn those layers into the typed pieces an
//! operation hands to the driver: behavior flags, write concern, read
//! preference, search options and bulk options.

use std::sync::Arc;
use std::time::Duration;

use bson::{Bson, Document, doc};
use chorus_value::{Slot, Table, Value};
use tracing::{error, warn};

use crate::codec::Codec;
use crate::error::MongoResult;
use crate::flags::BehaviorFlags;
use crate::settings::Settings;

/// An ordered list of option tables, most specific first.
#[derive(Debug, Clone, Default)]
pub struct OptionLayers {
    layers: Vec<Arc<Table>>,
}

fn unspecified(value: &Value) -> bool {
    value.is_absent()
}

/// The option table a call-site value stands for.
///
/// Tables are used as they are. A symbol, or a set of symbols, is shorthand
/// for a table mapping each symbol to `#t`. Anything else has no options.
pub fn option_table(value: &Value) -> Option<Table> {
    match value {
        Value::Table(table) => Some(table.clone()),
        Value::Symbol(sym) => Some(Table::new().with(sym.clone(), true)),
        Value::Choice(choice) => {
            let table: Table = choice
                .iter()
                .filter_map(|v| match v {
                    Value::Symbol(sym) => Some((Slot::Symbol(sym.clone()), Value::Bool(true))),
                    _ => None,
                })
                .collect();
            if table.is_empty() { None } else { Some(table) }
        }
        _ => None,
    }
}

impl OptionLayers {
    /// No options at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// Layers holding a single table.
    pub fn from_table(table: Table) -> Self {
        Self::new().then(Arc::new(table))
    }

    /// Append a more general layer.
    pub fn then(mut self, layer: Arc<Table>) -> Self {
        if !layer.is_empty() {
            self.layers.push(layer);
        }
        self
    }

    /// Append every layer of `general` after these.
    pub fn then_all(mut self, general: &OptionLayers) -> Self {
        self.layers.extend(general.layers.iter().cloned());
        self
    }

    /// Put a call-site option value in front of `general`.
    pub fn for_call(call: &Value, general: &OptionLayers) -> Self {
        let mut layers = Self::new();
        if let Some(table) = option_table(call) {
            layers = layers.then(Arc::new(table));
        }
        layers.then_all(general)
    }

    /// The tables, most specific first.
    pub fn layers(&self) -> &[Arc<Table>] {
        &self.layers
    }

    /// Whether there are no layers.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// The value of an option from the most specific layer that sets it.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.layers.iter().find_map(|layer| layer.get_named(name))
    }

    /// The value of an option, treating absent values as unset.
    pub fn get_specified(&self, name: &str) -> Option<&Value> {
        self.get(name).filter(|v| !unspecified(v))
    }

    /// Whether an option is set to anything but `#f`.
    pub fn test(&self, name: &str) -> bool {
        self.get_specified(name).is_some_and(|v| !v.is_false())
    }

    /// A boolean option with a default for when it is unset.
    pub fn get_bool(&self, name: &str, default: bool) -> bool {
        match self.get_specified(name) {
            None => default,
            Some(v) => !v.is_false(),
        }
    }

    /// An integer option.
    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get_specified(name).and_then(Value::as_int)
    }

    /// A string option, accepting strings and symbols.
    pub fn get_string(&self, name: &str) -> Option<String> {
        match self.get_specified(name)? {
            Value::String(s) => Some(s.to_string()),
            Value::Symbol(sym) => Some(sym.as_str().to_string()),
            other => {
                error!(option = name, kind = other.kind_name(), "Option must be a string");
                None
            }
        }
    }
}

/// Resolve behavior flags from a call-site option value.
///
/// - void, `#f` or the empty choice keep `base`;
/// - a non-negative integer is taken as the bitmask;
/// - a symbol or set of symbols starts from [`BehaviorFlags::DEFAULTS`]
///   and applies each name. `raw` zeroes every flag before the other names
///   are applied;
/// - a table resolves its nested `bson` entry first (or starts from
///   `base`), then applies `raw`, `slotify`, `colonize`, `prefchoices`,
///   `prefvecs`, `noblock` and `logops` entries. A `#f` entry clears the
///   flag and any other value sets it.
///
/// ```rust
/// use chorus_mongodb::flags::BehaviorFlags;
/// use chorus_mongodb::options::resolve_flags;
/// use chorus_value::Value;
///
/// let flags = resolve_flags(&Value::symbol("prefchoices"), BehaviorFlags::NONE);
/// assert!(flags.contains(BehaviorFlags::DEFAULTS | BehaviorFlags::PREFCHOICES));
///
/// let raw = Value::choice([Value::symbol("raw"), Value::symbol("logops")]);
/// assert_eq!(resolve_flags(&raw, BehaviorFlags::DEFAULTS), BehaviorFlags::LOGOPS);
/// ```
pub fn resolve_flags(options: &Value, base: BehaviorFlags) -> BehaviorFlags {
    match options {
        Value::Void | Value::Bool(false) => base,
        Value::Choice(choice) if choice.is_empty() => base,
        Value::Int(n) => match u32::try_from(*n) {
            Ok(bits) => BehaviorFlags::from_bits(bits),
            Err(_) => base,
        },
        Value::Symbol(_) | Value::Choice(_) => flags_from_names(options.as_members()),
        Value::Table(table) => flags_from_table(table, base),
        _ => base,
    }
}

fn flags_from_names(names: &[Value]) -> BehaviorFlags {
    let has = |name: &str| names.iter().any(|v| v.is_symbol_named(name));
    let mut flags = BehaviorFlags::DEFAULTS;
    if has("raw") {
        flags = BehaviorFlags::NONE;
    }
    for (set, clear, flag) in [
        ("slotify", "stringkeys", BehaviorFlags::SLOTIFY),
        ("colonize", "rawstrings", BehaviorFlags::COLONIZE),
    ] {
        if has(set) {
            flags |= flag;
        } else if has(clear) {
            flags = flags.without(flag);
        }
    }
    if has("prefchoices") {
        flags |= BehaviorFlags::PREFCHOICES;
    }
    if has("prefvecs") {
        flags = flags.without(BehaviorFlags::PREFCHOICES);
    }
    if has("logops") {
        flags |= BehaviorFlags::LOGOPS;
    }
    if has("noblock") {
        flags |= BehaviorFlags::NOBLOCK;
    }
    flags
}

fn flags_from_table(table: &Table, base: BehaviorFlags) -> BehaviorFlags {
    let entry = |name: &str| table.get_named(name).filter(|v| !unspecified(v));
    let mut flags = match entry("bson") {
        Some(nested) => resolve_flags(nested, base),
        None => base,
    };
    if entry("raw").is_some_and(|v| !v.is_false()) {
        flags = BehaviorFlags::NONE;
    }
    for (name, flag) in [
        ("slotify", BehaviorFlags::SLOTIFY),
        ("colonize", BehaviorFlags::COLONIZE),
    ] {
        if let Some(v) = entry(name) {
            flags.set(flag, !v.is_false());
        }
    }
    if entry("prefchoices").is_some_and(|v| !v.is_false()) {
        flags |= BehaviorFlags::PREFCHOICES;
    }
    if entry("prefvecs").is_some_and(|v| !v.is_false()) {
        flags = flags.without(BehaviorFlags::PREFCHOICES);
    }
    if entry("noblock").is_some_and(|v| !v.is_false()) {
        flags |= BehaviorFlags::NOBLOCK;
    }
    if entry("logops").is_some_and(|v| !v.is_false()) {
        flags |= BehaviorFlags::LOGOPS;
    }
    flags
}

/// The acknowledgment a write waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAck {
    /// The driver's default.
    Default,
    /// Fire and forget.
    Unacknowledged,
    /// Fire and forget, ignoring network errors too.
    ErrorsIgnored,
    /// A majority of the replica set.
    Majority,
    /// An explicit number of nodes.
    Nodes(u32),
}

impl WriteAck {
    /// Translate a `write` option value. Invalid values are logged and the
    /// default acknowledgment is used.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Void => Self::Default,
            Value::Bool(false) => Self::Unacknowledged,
            Value::Bool(true) => Self::Majority,
            Value::Int(n) if *n < 0 => Self::ErrorsIgnored,
            Value::Int(n) if *n > 0 => match u32::try_from(*n) {
                Ok(nodes) => Self::Nodes(nodes),
                Err(_) => {
                    error!(value = n, "Bad MongoDB write concern");
                    Self::Default
                }
            },
            other => {
                error!(value = %other, "Bad MongoDB write concern");
                Self::Default
            }
        }
    }
}

/// A write concern: acknowledgment plus an optional wait limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteConcern {
    /// What to wait for.
    pub ack: WriteAck,
    /// How long to wait for it.
    pub wtimeout: Option<Duration>,
}

impl WriteConcern {
    /// A concern with only an acknowledgment.
    pub fn new(ack: WriteAck) -> Self {
        Self { ack, wtimeout: None }
    }

    /// Resolve the `write` and `wtimeout` options.
    ///
    /// Returns `None` when neither is set.
    pub fn resolve(options: &OptionLayers) -> Option<Self> {
        let write = options.get_specified("write");
        let wait = options.get_specified("wtimeout");
        if write.is_none() && wait.is_none() {
            return None;
        }
        let ack = write.map_or(WriteAck::Default, WriteAck::from_value);
        let wtimeout = wait
            .and_then(Value::as_int)
            .and_then(|ms| u64::try_from(ms).ok())
            .map(Duration::from_millis);
        Some(Self { ack, wtimeout })
    }

    /// The `writeConcern` document sent with commands.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        match self.ack {
            WriteAck::Default => {}
            WriteAck::Unacknowledged | WriteAck::ErrorsIgnored => {
                doc.insert("w", 0);
            }
            WriteAck::Majority => {
                doc.insert("w", "majority");
            }
            WriteAck::Nodes(n) => {
                doc.insert("w", i64::from(n));
            }
        }
        if let Some(wait) = self.wtimeout {
            doc.insert("wtimeout", wait.as_millis() as i64);
        }
        doc
    }
}

/// Which replica set members a read may go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// The primary only.
    #[default]
    Primary,
    /// The primary when available.
    PrimaryPreferred,
    /// Secondaries only.
    Secondary,
    /// Secondaries when available.
    SecondaryPreferred,
    /// The lowest-latency member.
    Nearest,
}

impl ReadMode {
    /// Look up a mode by its option name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "primary" => Some(Self::Primary),
            "primary+" | "primarypreferred" => Some(Self::PrimaryPreferred),
            "secondary" => Some(Self::Secondary),
            "secondary+" | "secondarypreferred" => Some(Self::SecondaryPreferred),
            "nearest" => Some(Self::Nearest),
            _ => None,
        }
    }

    /// The server's name for the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::PrimaryPreferred => "primaryPreferred",
            Self::Secondary => "secondary",
            Self::SecondaryPreferred => "secondaryPreferred",
            Self::Nearest => "nearest",
        }
    }
}

/// A read preference: a mode plus tag sets.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadPreference {
    /// The mode.
    pub mode: ReadMode,
    /// Tag documents, in the order given.
    pub tags: Vec<Document>,
}

impl ReadPreference {
    /// Resolve the `read` option.
    ///
    /// Symbols set the mode (unknown names are logged and read as primary),
    /// tables are encoded as tag documents, other values are logged and
    /// skipped. Returns `None` when the option is unset.
    pub fn resolve(options: &OptionLayers, codec: &Codec<'_>) -> MongoResult<Option<Self>> {
        let Some(spec) = options.get_specified("read") else {
            return Ok(None);
        };
        let mut pref = Self::default();
        for item in spec.as_members() {
            match item {
                Value::Symbol(sym) => {
                    pref.mode = ReadMode::from_name(&sym.as_str().to_ascii_lowercase())
                        .unwrap_or_else(|| {
                            error!(mode = %sym, "Bad MongoDB read mode");
                            ReadMode::Primary
                        });
                }
                Value::Table(table) => pref.tags.push(codec.encode_table(table)?),
                other => error!(value = %other, "Bad MongoDB read preference"),
            }
        }
        Ok(Some(pref))
    }
}

/// What a set of search options is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPurpose {
    /// A find or cursor: every option applies.
    Find,
    /// A count: only the time limits apply.
    Count,
}

/// Options for find-style operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOptions {
    /// Server-side time limit.
    pub max_time_ms: Option<u32>,
    /// Keep idle cursors open.
    pub no_cursor_timeout: bool,
    /// Documents to skip.
    pub skip: Option<u64>,
    /// Maximum documents to return.
    pub limit: Option<i64>,
    /// Tailable cursor that waits for data.
    pub tailable: bool,
    /// How long a tailable cursor waits for new data.
    pub max_await_ms: Option<u32>,
    /// Documents per batch.
    pub batch_size: Option<u32>,
    /// Return everything in one batch and close the cursor.
    pub single_batch: bool,
    /// Let the server spill to disk.
    pub allow_disk_use: Option<bool>,
    /// Sort document.
    pub sort: Option<Document>,
    /// Projection document.
    pub projection: Option<Document>,
}

fn u32_option(name: &str, value: &Value) -> Option<u32> {
    match value.as_int().map(u32::try_from) {
        Some(Ok(n)) if n < u32::MAX => Some(n),
        _ => {
            error!(option = name, value = %value, "Invalid value");
            None
        }
    }
}

impl SearchOptions {
    /// Resolve search options from the option layers.
    pub fn resolve(
        options: &OptionLayers,
        settings: &Settings,
        codec: &Codec<'_>,
        purpose: SearchPurpose,
    ) -> MongoResult<Self> {
        let mut search = Self {
            max_time_ms: match options.get_specified("maxruntime") {
                None => settings.max_runtime_ms,
                Some(v) => u32_option("maxruntime", v),
            },
            no_cursor_timeout: options.test("notimeout"),
            ..Self::default()
        };
        if purpose == SearchPurpose::Count {
            return Ok(search);
        }

        search.skip = options
            .get_int("skip")
            .and_then(|n| u64::try_from(n).ok())
            .filter(|n| *n > 0);
        search.limit = options.get_int("limit");

        match options.get_specified("maxwait") {
            None => {
                search.tailable = settings.max_wait_ms.is_some();
                search.max_await_ms = settings.max_wait_ms;
            }
            Some(Value::Bool(true)) => search.tailable = true,
            Some(v @ Value::Int(_)) => {
                search.tailable = true;
                search.max_await_ms = u32_option("maxwait", v);
            }
            Some(_) => {}
        }

        match options.get_specified("batch") {
            None => match settings.batch_size {
                Some(0) => search.single_batch = true,
                other => search.batch_size = other,
            },
            Some(Value::Bool(false)) => search.single_batch = true,
            Some(v @ Value::Int(_)) => search.batch_size = u32_option("batch", v).filter(|n| *n > 0),
            Some(_) => {}
        }

        search.allow_disk_use = match options.get_specified("usedisk") {
            None => settings.allow_disk_use,
            Some(v) => Some(!v.is_false()),
        };

        if let Some(Value::Table(sort)) = options.get_specified("sorted") {
            search.sort = Some(codec.encode_table(sort)?);
        }
        if let Some(projection) = options.get_specified("return") {
            search.projection = projection_document(projection, codec)?;
        }
        Ok(search)
    }

    /// The options as the server's find command fields.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        if let Some(ms) = self.max_time_ms {
            doc.insert("maxTimeMS", i64::from(ms));
        }
        if self.no_cursor_timeout {
            doc.insert("noCursorTimeout", true);
        }
        if let Some(skip) = self.skip {
            doc.insert("skip", skip as i64);
        }
        if let Some(limit) = self.limit {
            doc.insert("limit", limit);
        }
        if self.tailable {
            doc.insert("tailable", true);
            doc.insert("awaitData", true);
        }
        if let Some(ms) = self.max_await_ms {
            doc.insert("maxAwaitTimeMS", i64::from(ms));
        }
        if let Some(size) = self.batch_size {
            doc.insert("batchSize", i64::from(size));
        }
        if self.single_batch {
            doc.insert("singleBatch", true);
        }
        if let Some(disk) = self.allow_disk_use {
            doc.insert("allowDiskUse", disk);
        }
        if let Some(sort) = &self.sort {
            doc.insert("sort", sort.clone());
        }
        if let Some(projection) = &self.projection {
            doc.insert("projection", projection.clone());
        }
        doc
    }
}

/// Build a projection from a field name, a set of names, or a table.
pub fn projection_document(spec: &Value, codec: &Codec<'_>) -> MongoResult<Option<Document>> {
    if let Value::Table(table) = spec {
        return codec.encode_table(table).map(Some);
    }
    let mut fields = Table::new();
    for item in spec.as_members() {
        match Slot::from_value(item) {
            Some(slot @ (Slot::Symbol(_) | Slot::String(_))) => {
                fields.insert(slot, Value::Int(1));
            }
            _ => warn!(value = %item, "Ignoring projection entry"),
        }
    }
    if fields.is_empty() {
        return Ok(None);
    }
    codec.encode_table(&fields).map(Some)
}

/// Options for bulk writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BulkOptions {
    /// Stop at the first failing write.
    pub ordered: bool,
    /// Write concern for the whole batch.
    pub write_concern: Option<WriteConcern>,
}

impl BulkOptions {
    /// Resolve the `sorted`, `write` and `wtimeout` options.
    pub fn resolve(options: &OptionLayers) -> Self {
        Self {
            ordered: options.test("sorted"),
            write_concern: WriteConcern::resolve(options),
        }
    }

    /// The options as bulk write command fields.
    pub fn to_document(&self) -> Document {
        let mut doc = doc! { "ordered": self.ordered };
        if let Some(wc) = &self.write_concern {
            doc.insert("writeConcern", Bson::Document(wc.to_document()));
        }
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SlotRegistry;
    use pretty_assertions::assert_eq;

    fn layers(tables: Vec<Table>) -> OptionLayers {
        tables
            .into_iter()
            .fold(OptionLayers::new(), |acc, t| acc.then(Arc::new(t)))
    }

    #[test]
    fn test_first_layer_wins() {
        let call = Table::new().with("limit", 5);
        let collection = Table::new().with("limit", 10).with("skip", 2);
        let server = Table::new().with("skip", 7).with("batch", 3);
        let opts = layers(vec![call, collection.clone(), server]);

        assert_eq!(opts.get_int("limit"), Some(5));
        assert_eq!(opts.get_int("skip"), Some(2));
        assert_eq!(opts.get_int("batch"), Some(3));
        assert_eq!(opts.get("missing"), None);
        // inputs untouched
        assert_eq!(collection.get_sym("limit"), Some(&Value::from(10)));
    }

    #[test]
    fn test_call_shorthand() {
        let general = layers(vec![Table::new().with("sorted", false)]);
        let opts = OptionLayers::for_call(&Value::symbol("sorted"), &general);
        assert!(opts.test("sorted"));

        let opts = OptionLayers::for_call(&Value::Void, &general);
        assert!(!opts.test("sorted"));
        assert_eq!(opts.layers().len(), 1);
    }

    #[test]
    fn test_flags_from_shorthand() {
        let base = BehaviorFlags::LOGOPS;
        assert_eq!(resolve_flags(&Value::Void, base), base);
        assert_eq!(resolve_flags(&Value::Bool(false), base), base);
        assert_eq!(resolve_flags(&Value::Int(4), base), BehaviorFlags::PREFCHOICES);

        let names = Value::choice([Value::symbol("stringkeys"), Value::symbol("noblock")]);
        let flags = resolve_flags(&names, base);
        assert!(!flags.contains(BehaviorFlags::SLOTIFY));
        assert!(flags.contains(BehaviorFlags::COLONIZE));
        assert!(flags.contains(BehaviorFlags::NOBLOCK));
        assert!(!flags.contains(BehaviorFlags::LOGOPS));

        let raw = Value::choice([Value::symbol("raw"), Value::symbol("colonize")]);
        assert_eq!(resolve_flags(&raw, base), BehaviorFlags::COLONIZE);
    }

    #[test]
    fn test_flags_from_table() {
        let base = BehaviorFlags::DEFAULTS;
        let opts = Value::Table(
            Table::new()
                .with("colonize", false)
                .with("prefchoices", true)
                .with("limit", 3),
        );
        let flags = resolve_flags(&opts, base);
        assert!(flags.contains(BehaviorFlags::SLOTIFY));
        assert!(!flags.contains(BehaviorFlags::COLONIZE));
        assert!(flags.contains(BehaviorFlags::PREFCHOICES));

        let nested = Value::Table(
            Table::new()
                .with("bson", Value::symbol("raw"))
                .with("logops", true),
        );
        assert_eq!(resolve_flags(&nested, base), BehaviorFlags::LOGOPS);

        let raw = Value::Table(Table::new().with("raw", true).with("slotify", true));
        assert_eq!(resolve_flags(&raw, base), BehaviorFlags::SLOTIFY);
    }

    #[test]
    fn test_write_ack_translation() {
        assert_eq!(WriteAck::from_value(&Value::Bool(false)), WriteAck::Unacknowledged);
        assert_eq!(WriteAck::from_value(&Value::Bool(true)), WriteAck::Majority);
        assert_eq!(WriteAck::from_value(&Value::Int(3)), WriteAck::Nodes(3));
        assert_eq!(WriteAck::from_value(&Value::Int(-1)), WriteAck::ErrorsIgnored);
        assert_eq!(WriteAck::from_value(&Value::Int(0)), WriteAck::Default);
        assert_eq!(WriteAck::from_value(&Value::from("lots")), WriteAck::Default);
    }

    #[test]
    fn test_write_concern_resolve() {
        assert_eq!(WriteConcern::resolve(&OptionLayers::new()), None);

        let opts = layers(vec![Table::new().with("wtimeout", 250)]);
        let wc = WriteConcern::resolve(&opts).unwrap();
        assert_eq!(wc.ack, WriteAck::Default);
        assert_eq!(wc.wtimeout, Some(Duration::from_millis(250)));

        let opts = layers(vec![Table::new().with("write", true)]);
        let wc = WriteConcern::resolve(&opts).unwrap();
        assert_eq!(wc.to_document(), doc! { "w": "majority" });
    }

    #[test]
    fn test_read_preference() {
        let registry = SlotRegistry::new();
        let codec = Codec::new(&registry, None, BehaviorFlags::DEFAULTS);

        let opts = layers(vec![Table::new().with("read", Value::symbol("secondary+"))]);
        let pref = ReadPreference::resolve(&opts, &codec).unwrap().unwrap();
        assert_eq!(pref.mode, ReadMode::SecondaryPreferred);

        let spec = Value::choice([
            Value::symbol("nearest"),
            Value::Table(Table::new().with("dc", "east")),
        ]);
        let opts = layers(vec![Table::new().with("read", spec)]);
        let pref = ReadPreference::resolve(&opts, &codec).unwrap().unwrap();
        assert_eq!(pref.mode, ReadMode::Nearest);
        assert_eq!(pref.tags, vec![doc! { "dc": "east" }]);

        let opts = layers(vec![Table::new().with("read", Value::symbol("fastest"))]);
        let pref = ReadPreference::resolve(&opts, &codec).unwrap().unwrap();
        assert_eq!(pref.mode, ReadMode::Primary);

        assert_eq!(ReadPreference::resolve(&OptionLayers::new(), &codec).unwrap(), None);
    }

    #[test]
    fn test_search_options_find() {
        let registry = SlotRegistry::new();
        let codec = Codec::new(&registry, None, BehaviorFlags::DEFAULTS);
        let opts = layers(vec![
            Table::new()
                .with("skip", 10)
                .with("limit", 5)
                .with("batch", false)
                .with("usedisk", true)
                .with("maxruntime", 2000)
                .with("sorted", Table::new().with("age", -1))
                .with("return", Value::choice([Value::symbol("name"), Value::symbol("age")])),
        ]);
        let search =
            SearchOptions::resolve(&opts, &Settings::default(), &codec, SearchPurpose::Find).unwrap();

        assert_eq!(search.skip, Some(10));
        assert_eq!(search.limit, Some(5));
        assert!(search.single_batch);
        assert_eq!(search.batch_size, None);
        assert_eq!(search.allow_disk_use, Some(true));
        assert_eq!(search.max_time_ms, Some(2000));
        assert_eq!(search.sort, Some(doc! { "age": -1 }));
        assert_eq!(search.projection, Some(doc! { "name": 1, "age": 1 }));
        assert!(!search.tailable);
    }

    #[test]
    fn test_search_options_process_defaults() {
        let registry = SlotRegistry::new();
        let codec = Codec::new(&registry, None, BehaviorFlags::DEFAULTS);
        let settings = Settings {
            max_runtime_ms: Some(500),
            max_wait_ms: Some(100),
            batch_size: Some(0),
            ..Settings::default()
        };
        let search =
            SearchOptions::resolve(&OptionLayers::new(), &settings, &codec, SearchPurpose::Find)
                .unwrap();
        assert_eq!(search.max_time_ms, Some(500));
        assert!(search.tailable);
        assert!(search.single_batch);

        let doc = search.to_document();
        assert_eq!(doc.get_bool("awaitData").ok(), Some(true));
        assert_eq!(doc.get_i64("maxTimeMS").ok(), Some(500));
    }

    #[test]
    fn test_search_options_count_and_invalid_runtime() {
        let registry = SlotRegistry::new();
        let codec = Codec::new(&registry, None, BehaviorFlags::DEFAULTS);
        let opts = layers(vec![
            Table::new()
                .with("maxruntime", -5)
                .with("notimeout", true)
                .with("limit", 5),
        ]);
        let search =
            SearchOptions::resolve(&opts, &Settings::default(), &codec, SearchPurpose::Count)
                .unwrap();
        assert_eq!(search.max_time_ms, None);
        assert!(search.no_cursor_timeout);
        assert_eq!(search.limit, None);
    }

    #[test]
    fn test_projection_forms() {
        let registry = SlotRegistry::new();
        let codec = Codec::new(&registry, None, BehaviorFlags::DEFAULTS);
        assert_eq!(
            projection_document(&Value::symbol("name"), &codec).unwrap(),
            Some(doc! { "name": 1 })
        );
        assert_eq!(
            projection_document(&Value::from("Raw Field"), &codec).unwrap(),
            Some(doc! { "Raw Field": 1 })
        );
        assert_eq!(
            projection_document(&Value::Table(Table::new().with("_id", 0)), &codec).unwrap(),
            Some(doc! { "_id": 0 })
        );
        assert_eq!(projection_document(&Value::from(3), &codec).unwrap(), None);
    }

    #[test]
    fn test_bulk_options() {
        let opts = layers(vec![Table::new().with("sorted", true).with("write", 2)]);
        let bulk = BulkOptions::resolve(&opts);
        assert!(bulk.ordered);
        assert_eq!(bulk.write_concern, Some(WriteConcern::new(WriteAck::Nodes(2))));
        assert_eq!(
            bulk.to_document(),
            doc! { "ordered": true, "writeConcern": { "w": 2_i64 } }
        );
    }
}
