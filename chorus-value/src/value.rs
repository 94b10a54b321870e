//! The dynamic value type.

use std::fmt;

use chrono::{DateTime, Utc};
use smol_str::SmolStr;
use uuid::Uuid;

use crate::choice::Choice;
use crate::symbol::Symbol;
use crate::table::Table;

/// A 64-bit object identifier, split into high and low words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid(u64);

impl Oid {
    /// Create an OID from its raw address.
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Create an OID from its high and low words.
    pub const fn from_parts(hi: u32, lo: u32) -> Self {
        Self(((hi as u64) << 32) | lo as u64)
    }

    /// The high word.
    pub const fn hi(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// The low word.
    pub const fn lo(&self) -> u32 {
        self.0 as u32
    }

    /// The raw address.
    pub const fn addr(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{:x}/{:x}", self.hi(), self.lo())
    }
}

/// Regular expression matching flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegexFlags {
    /// Extended syntax (`x`).
    pub extended: bool,
    /// Case-insensitive matching (`i`).
    pub case_insensitive: bool,
    /// Multi-line anchors (`m`).
    pub multiline: bool,
}

impl RegexFlags {
    /// Parse an option string such as `"im"`. Unknown letters are ignored.
    pub fn from_options(options: &str) -> Self {
        Self {
            extended: options.contains('x'),
            case_insensitive: options.contains('i'),
            multiline: options.contains('m'),
        }
    }

    /// Render as an option string, in `x`, `i`, `m` order.
    pub fn to_options(&self) -> String {
        let mut out = String::with_capacity(3);
        if self.extended {
            out.push('x');
        }
        if self.case_insensitive {
            out.push('i');
        }
        if self.multiline {
            out.push('m');
        }
        out
    }
}

/// A regular expression: source text plus flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Regex {
    /// Pattern source.
    pub source: String,
    /// Matching flags.
    pub flags: RegexFlags,
}

impl Regex {
    /// Create a regex value.
    pub fn new(source: impl Into<String>, flags: RegexFlags) -> Self {
        Self {
            source: source.into(),
            flags,
        }
    }
}

/// A tagged tuple.
#[derive(Debug, Clone, PartialEq)]
pub struct Compound {
    /// The type tag.
    pub tag: Symbol,
    /// Positional elements.
    pub elements: Vec<Value>,
}

impl Compound {
    /// Create a compound.
    pub fn new(tag: impl Into<Symbol>, elements: Vec<Value>) -> Self {
        Self {
            tag: tag.into(),
            elements,
        }
    }

    /// Whether the compound carries the named tag.
    pub fn has_tag(&self, name: &str) -> bool {
        self.tag.as_str() == name
    }
}

/// A dynamic value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// No value.
    #[default]
    Void,
    /// A boolean.
    Bool(bool),
    /// A fixed-precision integer.
    Int(i64),
    /// A wide integer. Only canonical outside the `i64` range.
    BigInt(i128),
    /// A floating point number.
    Float(f64),
    /// An exact ratio of two integers.
    Ratio(i64, i64),
    /// A string.
    String(SmolStr),
    /// A byte string.
    Bytes(Vec<u8>),
    /// A character.
    Char(char),
    /// An interned symbol.
    Symbol(Symbol),
    /// A 64-bit object identifier.
    Oid(Oid),
    /// A 96-bit database object identifier.
    ObjectId([u8; 12]),
    /// A point in time.
    Timestamp(DateTime<Utc>),
    /// A UUID.
    Uuid(Uuid),
    /// A regular expression.
    Regex(Regex),
    /// An ordered sequence.
    Sequence(Vec<Value>),
    /// An associative table.
    Table(Table),
    /// A tagged compound.
    Compound(Compound),
    /// A cons-like pair.
    Pair(Box<Value>, Box<Value>),
    /// An unordered set of values.
    Choice(Choice),
}

impl Value {
    /// A symbol value.
    pub fn symbol(name: &str) -> Self {
        Self::Symbol(Symbol::intern(name))
    }

    /// A string value.
    pub fn string(s: impl Into<SmolStr>) -> Self {
        Self::String(s.into())
    }

    /// An integer, stored as `Int` when it fits in 64 bits.
    pub fn integer(n: i128) -> Self {
        match i64::try_from(n) {
            Ok(small) => Self::Int(small),
            Err(_) => Self::BigInt(n),
        }
    }

    /// A pair.
    pub fn pair(car: Value, cdr: Value) -> Self {
        Self::Pair(Box::new(car), Box::new(cdr))
    }

    /// A tagged compound.
    pub fn compound(tag: &str, elements: Vec<Value>) -> Self {
        Self::Compound(Compound::new(tag, elements))
    }

    /// The empty choice.
    pub fn empty_choice() -> Self {
        Self::Choice(Choice::new())
    }

    /// Combine values into a choice.
    ///
    /// A single surviving member is returned as itself rather than wrapped.
    pub fn choice<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let choice = Choice::from_values(values);
        if choice.len() == 1 {
            choice.into_vec().pop().unwrap_or_default()
        } else {
            Self::Choice(choice)
        }
    }

    /// Whether this is `Void`.
    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }

    /// Whether this is the empty choice.
    pub fn is_empty_choice(&self) -> bool {
        matches!(self, Self::Choice(c) if c.is_empty())
    }

    /// Whether this is `Void` or the empty choice.
    pub fn is_absent(&self) -> bool {
        self.is_void() || self.is_empty_choice()
    }

    /// Whether this is `#f`.
    pub fn is_false(&self) -> bool {
        matches!(self, Self::Bool(false))
    }

    /// Whether this is `#t`.
    pub fn is_true(&self) -> bool {
        matches!(self, Self::Bool(true))
    }

    /// The members of a choice, the value itself, or nothing for absent values.
    pub fn as_members(&self) -> &[Value] {
        match self {
            Self::Choice(c) => c.as_slice(),
            Self::Void => &[],
            other => std::slice::from_ref(other),
        }
    }

    /// The integer value, if it fits in 64 bits.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::BigInt(n) => i64::try_from(*n).ok(),
            _ => None,
        }
    }

    /// The string contents of a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// The symbol, if this is one.
    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Self::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// The table, if this is one.
    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Self::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Whether this is a symbol with the given name.
    pub fn is_symbol_named(&self, name: &str) -> bool {
        matches!(self, Self::Symbol(s) if s.as_str() == name)
    }

    /// A short name for the value's kind, used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Bool(_) => "boolean",
            Self::Int(_) | Self::BigInt(_) => "integer",
            Self::Float(_) => "float",
            Self::Ratio(..) => "ratio",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Char(_) => "character",
            Self::Symbol(_) => "symbol",
            Self::Oid(_) => "oid",
            Self::ObjectId(_) => "objectid",
            Self::Timestamp(_) => "timestamp",
            Self::Uuid(_) => "uuid",
            Self::Regex(_) => "regex",
            Self::Sequence(_) => "sequence",
            Self::Table(_) => "table",
            Self::Compound(_) => "compound",
            Self::Pair(..) => "pair",
            Self::Choice(_) => "choice",
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(n as i64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s.into())
    }
}

impl From<Symbol> for Value {
    fn from(s: Symbol) -> Self {
        Self::Symbol(s)
    }
}

impl From<Oid> for Value {
    fn from(oid: Oid) -> Self {
        Self::Oid(oid)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Self::Uuid(u)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Self::Timestamp(t)
    }
}

impl From<Table> for Value {
    fn from(t: Table) -> Self {
        Self::Table(t)
    }
}

impl From<Choice> for Value {
    fn from(c: Choice) -> Self {
        Self::Choice(c)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Sequence(v)
    }
}
