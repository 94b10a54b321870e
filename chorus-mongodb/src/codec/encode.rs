//! Value to BSON.

use bson::spec::BinarySubtype;
use bson::{Binary, Bson, Document, oid::ObjectId};
use chorus_value::{Choice, Compound, Oid, Table, Value, text};
use tracing::warn;

use super::{CAR_FIELD, CDR_FIELD, CHOICE_TAG, COMPOUND_TAG_FIELD, Codec, MAX_DEPTH, tags};
use crate::error::{MongoError, MongoResult};
use crate::flags::BehaviorFlags;

/// The ObjectId standing for an OID: four zero bytes, then `hi` and `lo`.
pub(crate) fn oid_to_object_id(oid: Oid) -> ObjectId {
    let mut bytes = [0u8; 12];
    bytes[4..8].copy_from_slice(&oid.hi().to_be_bytes());
    bytes[8..12].copy_from_slice(&oid.lo().to_be_bytes());
    ObjectId::from_bytes(bytes)
}

fn binary(subtype: BinarySubtype, bytes: Vec<u8>) -> Bson {
    Bson::Binary(Binary { subtype, bytes })
}

impl Codec<'_> {
    /// Encode a table (or void, as an empty document) into a document.
    pub fn encode_document(&self, value: &Value) -> MongoResult<Document> {
        match value {
            Value::Table(table) => self.encode_table(table),
            Value::Void => Ok(Document::new()),
            other => Err(MongoError::codec(format!(
                "cannot encode a {} as a document",
                other.kind_name()
            ))),
        }
    }

    /// Encode a table into a document.
    pub fn encode_table(&self, table: &Table) -> MongoResult<Document> {
        self.table_to_doc(table, self.flags, 0)
    }

    /// Encode a single value. `Void` has no encoding and yields `None`.
    pub fn encode_value(&self, value: &Value) -> MongoResult<Option<Bson>> {
        self.value_to_bson(value, self.flags, 0)
    }

    fn table_to_doc(&self, table: &Table, flags: BehaviorFlags, depth: usize) -> MongoResult<Document> {
        if depth > MAX_DEPTH {
            return Err(MongoError::codec(format!(
                "document nesting exceeds {} levels",
                MAX_DEPTH
            )));
        }
        let mut doc = Document::new();
        for (slot, value) in table.iter() {
            let (field, field_flags) = self.keys().encode(slot, flags);
            let transformed = match self.keys().fieldmap() {
                Some(fm) => fm.encode_value(slot, value)?,
                None => None,
            };
            let value = transformed.as_ref().unwrap_or(value);
            if let Some(bson) = self.value_to_bson(value, field_flags, depth + 1)? {
                doc.insert(field, bson);
            }
        }
        Ok(doc)
    }

    fn value_to_bson(&self, value: &Value, flags: BehaviorFlags, depth: usize) -> MongoResult<Option<Bson>> {
        if depth > MAX_DEPTH {
            return Err(MongoError::codec(format!(
                "value nesting exceeds {} levels",
                MAX_DEPTH
            )));
        }
        let children = flags.for_children();

        if flags.contains(BehaviorFlags::CHOICESLOT) {
            return match value {
                Value::Void => Ok(None),
                Value::Choice(choice) => self.choice_to_bson(choice, flags, depth).map(Some),
                single => {
                    let element = self.element_to_bson(single, children, depth)?;
                    Ok(Some(Bson::Array(vec![element])))
                }
            };
        }

        let bson = match value {
            Value::Void => return Ok(None),
            Value::Bool(b) => Bson::Boolean(*b),
            Value::Int(n) => integer_to_bson(*n),
            Value::BigInt(n) => match i64::try_from(*n) {
                Ok(small) => integer_to_bson(small),
                Err(_) => {
                    warn!(value = %n, "Integer does not fit in 64 bits");
                    return Err(MongoError::codec(format!(
                        "integer {} does not fit in 64 bits",
                        n
                    )));
                }
            },
            Value::Float(f) => Bson::Double(*f),
            Value::String(s) => Bson::String(escape_string(s, flags)),
            Value::Bytes(bytes) => binary(BinarySubtype::Generic, bytes.clone()),
            Value::Char(c) => Bson::String(c.to_string()),
            Value::Symbol(sym) => {
                if flags.contains(BehaviorFlags::SYMSLOT) {
                    Bson::String(sym.as_str().to_lowercase())
                } else if flags.contains(BehaviorFlags::COLONIZE) {
                    Bson::String(format!(":{}", text::unparse(value)))
                } else {
                    Bson::String(sym.as_str().to_string())
                }
            }
            Value::Oid(oid) => Bson::ObjectId(oid_to_object_id(*oid)),
            Value::ObjectId(bytes) => Bson::ObjectId(ObjectId::from_bytes(*bytes)),
            Value::Timestamp(ts) => Bson::DateTime(bson::DateTime::from_millis(ts.timestamp_millis())),
            Value::Uuid(uuid) => binary(BinarySubtype::Uuid, uuid.as_bytes().to_vec()),
            Value::Regex(rx) => Bson::RegularExpression(bson::Regex {
                pattern: rx.source.clone(),
                options: rx.flags.to_options(),
            }),
            Value::Sequence(items) => Bson::Array(self.elements_to_bson(items, children, depth)?),
            Value::Table(table) => Bson::Document(self.table_to_doc(table, children, depth + 1)?),
            Value::Pair(car, cdr) => {
                let mut doc = Document::new();
                if let Some(car) = self.value_to_bson(car, children, depth + 1)? {
                    doc.insert(CAR_FIELD, car);
                }
                if let Some(cdr) = self.value_to_bson(cdr, children, depth + 1)? {
                    doc.insert(CDR_FIELD, cdr);
                }
                Bson::Document(doc)
            }
            Value::Compound(compound) => self.compound_to_bson(compound, children, depth)?,
            Value::Choice(choice) if choice.is_empty() => Bson::Null,
            Value::Choice(choice) => self.choice_to_bson(choice, flags, depth)?,
            Value::Ratio(..) => Bson::String(textual(value, flags)),
        };
        Ok(Some(bson))
    }

    fn element_to_bson(&self, value: &Value, flags: BehaviorFlags, depth: usize) -> MongoResult<Bson> {
        Ok(self
            .value_to_bson(value, flags, depth + 1)?
            .unwrap_or(Bson::Undefined))
    }

    fn elements_to_bson(&self, items: &[Value], flags: BehaviorFlags, depth: usize) -> MongoResult<Vec<Bson>> {
        items
            .iter()
            .map(|item| self.element_to_bson(item, flags, depth))
            .collect()
    }

    fn choice_to_bson(&self, choice: &Choice, flags: BehaviorFlags, depth: usize) -> MongoResult<Bson> {
        let tagged = !(flags.contains(BehaviorFlags::CHOICESLOT)
            || flags.contains(BehaviorFlags::PREFCHOICES));
        let mut array = Vec::with_capacity(choice.len() + usize::from(tagged));
        if tagged {
            array.push(Bson::String(CHOICE_TAG.to_string()));
        }
        array.extend(self.elements_to_bson(choice.as_slice(), flags.for_children(), depth)?);
        Ok(Bson::Array(array))
    }

    fn compound_to_bson(&self, compound: &Compound, flags: BehaviorFlags, depth: usize) -> MongoResult<Bson> {
        let elements = compound.elements.as_slice();
        match (compound.tag.as_str(), elements) {
            (tags::OBJECT_ID, [Value::Bytes(bytes)]) => {
                let bytes: [u8; 12] = bytes.as_slice().try_into().map_err(|_| {
                    MongoError::codec(format!("object id needs 12 bytes, got {}", bytes.len()))
                })?;
                return Ok(Bson::ObjectId(ObjectId::from_bytes(bytes)));
            }
            (tags::VECTOR, _) => {
                return Ok(Bson::Array(self.elements_to_bson(elements, flags, depth)?));
            }
            (tags::TIMESTAMP, [Value::Timestamp(ts), increment]) => {
                if let (Ok(time), Some(Ok(increment))) = (
                    u32::try_from(ts.timestamp()),
                    increment.as_int().map(u32::try_from),
                ) {
                    return Ok(Bson::Timestamp(bson::Timestamp { time, increment }));
                }
            }
            (tags::USER_BINARY, [Value::Bytes(bytes)]) => {
                return Ok(binary(BinarySubtype::UserDefined(0x80), bytes.clone()));
            }
            (tags::MD5, [Value::Bytes(bytes)]) => {
                return Ok(binary(BinarySubtype::Md5, bytes.clone()));
            }
            (tags::FUNCTION, [Value::Bytes(bytes)]) => {
                return Ok(binary(BinarySubtype::Function, bytes.clone()));
            }
            _ => {}
        }

        let mut doc = Document::new();
        let tag = Value::Symbol(compound.tag.clone());
        if let Some(tag) = self.value_to_bson(&tag, flags, depth + 1)? {
            doc.insert(COMPOUND_TAG_FIELD, tag);
        }
        for (i, element) in elements.iter().enumerate() {
            if let Some(bson) = self.value_to_bson(element, flags, depth + 1)? {
                doc.insert(i.to_string(), bson);
            }
        }
        Ok(Bson::Document(doc))
    }
}

fn integer_to_bson(n: i64) -> Bson {
    match i32::try_from(n) {
        Ok(small) => Bson::Int32(small),
        Err(_) => Bson::Int64(n),
    }
}

/// Strings that would read back as colon forms get a `\` prefix.
fn escape_string(s: &str, flags: BehaviorFlags) -> String {
    if flags.contains(BehaviorFlags::COLONIZE) && (s.starts_with(':') || s.starts_with('\\')) {
        format!("\\{}", s)
    } else {
        s.to_string()
    }
}

fn textual(value: &Value, flags: BehaviorFlags) -> String {
    if flags.contains(BehaviorFlags::COLONIZE) {
        format!(":{}", text::unparse(value))
    } else {
        text::unparse(value)
    }
}
