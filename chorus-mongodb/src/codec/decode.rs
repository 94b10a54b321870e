//! BSON to value.

use bson::spec::BinarySubtype;
use bson::{Bson, Document};
use chorus_value::{Compound, Oid, Regex, RegexFlags, Symbol, Table, Value, text};
use chrono::{DateTime, TimeZone, Utc};
use tracing::warn;
use uuid::Uuid;

use super::{CAR_FIELD, CDR_FIELD, CHOICE_TAG, COMPOUND_TAG_FIELD, Codec, MAX_COMPOUND_FIELDS, tags};
use crate::error::{MongoError, MongoResult};
use crate::flags::BehaviorFlags;

impl Codec<'_> {
    /// Decode a document. The result is always a table.
    pub fn decode_document(&self, doc: &Document) -> MongoResult<Value> {
        self.decode_table(doc).map(Value::Table)
    }

    /// Decode a document into a table.
    pub fn decode_table(&self, doc: &Document) -> MongoResult<Table> {
        self.doc_to_table(doc, self.flags)
    }

    /// Decode a single BSON value under the codec's flags.
    pub fn decode_value(&self, bson: &Bson) -> MongoResult<Value> {
        self.bson_to_value(bson, self.flags)
    }

    fn doc_to_table(&self, doc: &Document, flags: BehaviorFlags) -> MongoResult<Table> {
        let mut table = Table::with_capacity(doc.len());
        for (field, bson) in doc {
            let (slot, field_flags) = self.keys().decode(field, flags);
            let value = self.bson_to_value(bson, field_flags)?;
            let value = match self.keys().fieldmap() {
                Some(fm) => fm.decode_value(&slot, value),
                None => value,
            };
            table.insert(slot, value);
        }
        Ok(table)
    }

    fn bson_to_value(&self, bson: &Bson, flags: BehaviorFlags) -> MongoResult<Value> {
        let children = flags.for_children();
        let value = match bson {
            Bson::Double(f) => Value::Float(*f),
            Bson::Boolean(b) => Value::Bool(*b),
            Bson::Int32(n) => Value::Int(i64::from(*n)),
            Bson::Int64(n) => Value::Int(*n),
            Bson::String(s) => decode_string(s, flags),
            Bson::Binary(bin) => decode_binary(bin.subtype, &bin.bytes),
            Bson::ObjectId(oid) => {
                let bytes = oid.bytes();
                if bytes[..4] == [0, 0, 0, 0] {
                    let hi = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
                    let lo = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
                    Value::Oid(Oid::from_parts(hi, lo))
                } else {
                    Value::ObjectId(bytes)
                }
            }
            Bson::Undefined => Value::Void,
            Bson::Null => Value::empty_choice(),
            Bson::DateTime(dt) => Value::Timestamp(dt.to_chrono()),
            Bson::Timestamp(ts) => Value::compound(
                tags::TIMESTAMP,
                vec![
                    Value::Timestamp(seconds_to_time(ts.time)),
                    Value::Int(i64::from(ts.increment)),
                ],
            ),
            Bson::MaxKey => Value::symbol(tags::MAX_KEY),
            Bson::MinKey => Value::symbol(tags::MIN_KEY),
            Bson::RegularExpression(rx) => Value::Regex(Regex::new(
                rx.pattern.clone(),
                RegexFlags::from_options(&rx.options),
            )),
            Bson::Array(items) => self.decode_array(items, flags)?,
            Bson::Document(doc) => self.decode_nested(doc, children)?,
            Bson::Symbol(s) => Value::symbol(s),
            Bson::JavaScriptCode(code) => Value::string(code.as_str()),
            other => Value::string(other.to_string()),
        };
        Ok(value)
    }

    fn decode_array(&self, items: &[Bson], flags: BehaviorFlags) -> MongoResult<Value> {
        let tagged = matches!(items.first(), Some(Bson::String(s)) if s == CHOICE_TAG);
        let as_set = flags.contains(BehaviorFlags::CHOICESLOT)
            || flags.contains(BehaviorFlags::PREFCHOICES)
            || tagged;
        let items = if as_set && tagged { &items[1..] } else { items };
        let children = flags.for_children();
        let elements = items
            .iter()
            .map(|item| self.bson_to_value(item, children))
            .collect::<MongoResult<Vec<_>>>()?;
        if as_set {
            Ok(Value::choice(elements))
        } else {
            Ok(Value::Sequence(elements))
        }
    }

    fn decode_nested(&self, doc: &Document, flags: BehaviorFlags) -> MongoResult<Value> {
        if let Some(car) = doc.get(CAR_FIELD) {
            let car = self.bson_to_value(car, flags)?;
            let cdr = match doc.get(CDR_FIELD) {
                Some(cdr) => self.bson_to_value(cdr, flags)?,
                None => Value::Void,
            };
            return Ok(Value::pair(car, cdr));
        }
        if let Some(tag) = doc.get(COMPOUND_TAG_FIELD) {
            return self.decode_compound(tag, doc, flags);
        }
        self.doc_to_table(doc, flags).map(Value::Table)
    }

    fn decode_compound(&self, tag: &Bson, doc: &Document, flags: BehaviorFlags) -> MongoResult<Value> {
        let tag = match self.bson_to_value(tag, flags)? {
            Value::Symbol(sym) => sym,
            Value::String(s) => Symbol::intern(s.strip_prefix(':').unwrap_or(&s)),
            other => {
                return Err(MongoError::codec(format!(
                    "compound tag must be a symbol, got a {}",
                    other.kind_name()
                )));
            }
        };
        let mut elements: Vec<Value> = Vec::new();
        for (field, bson) in doc {
            let Ok(index) = field.parse::<usize>() else {
                continue;
            };
            if index >= MAX_COMPOUND_FIELDS {
                warn!(tag = %tag, index, "Compound field index out of range");
                return Err(MongoError::codec(format!(
                    "compound {} has field {}, limit is {}",
                    tag, index, MAX_COMPOUND_FIELDS
                )));
            }
            if elements.len() <= index {
                elements.resize(index + 1, Value::Void);
            }
            elements[index] = self.bson_to_value(bson, flags)?;
        }
        Ok(Value::Compound(Compound::new(tag, elements)))
    }
}

fn seconds_to_time(seconds: u32) -> DateTime<Utc> {
    Utc.timestamp_opt(i64::from(seconds), 0)
        .single()
        .unwrap_or_default()
}

fn decode_binary(subtype: BinarySubtype, bytes: &[u8]) -> Value {
    let packet = || Value::Bytes(bytes.to_vec());
    match subtype {
        BinarySubtype::Uuid | BinarySubtype::UuidOld => match Uuid::from_slice(bytes) {
            Ok(uuid) => Value::Uuid(uuid),
            Err(_) => packet(),
        },
        BinarySubtype::UserDefined(_) => Value::compound(tags::USER_BINARY, vec![packet()]),
        BinarySubtype::Md5 => Value::compound(tags::MD5, vec![packet()]),
        BinarySubtype::Function => Value::compound(tags::FUNCTION, vec![packet()]),
        _ => packet(),
    }
}

fn decode_string(s: &str, flags: BehaviorFlags) -> Value {
    if flags.contains(BehaviorFlags::COLONIZE) {
        if s.starts_with(':') {
            return parse_or_keep(s);
        }
        if let Some(escaped) = s.strip_prefix('\\') {
            return Value::string(escaped);
        }
    }
    if flags.contains(BehaviorFlags::SYMSLOT) && s.starts_with([':', '@', '#']) {
        return parse_or_keep(s);
    }
    Value::string(s)
}

fn parse_or_keep(s: &str) -> Value {
    match text::parse_prefixed(s) {
        Ok(value) => value,
        Err(e) => {
            warn!(text = s, error = %e, "Could not parse stored value, keeping the string");
            Value::string(s)
        }
    }
}
