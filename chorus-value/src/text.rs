//! Textual printer and parser for values.
//!
//! The printed form is what document encoders fall back to for values with
//! no native document type, and what decoders parse back from `:`-prefixed
//! strings.
//!
//! | Value       | Printed form                  |
//! |-------------|-------------------------------|
//! | void        | `#void`                       |
//! | booleans    | `#t`, `#f`                    |
//! | integers    | `42`, `-7`                    |
//! | floats      | `1.5`, `2.0`, `1e300`         |
//! | ratios      | `3/4`                         |
//! | strings     | `"a \"quoted\" string"`       |
//! | bytes       | `#X"00ff"`                    |
//! | characters  | `#\a`, `#\space`              |
//! | symbols     | `name`, `\|with space\|`      |
//! | OIDs        | `@1a/2b`                      |
//! | object ids  | `#O"5f1d...(24 hex digits)"`  |
//! | timestamps  | `#T2024-01-02T03:04:05.678Z`  |
//! | UUIDs       | `#U67e55044-10b1-...`         |
//! | regexes     | `#/^ab+c$/i`                  |
//! | sequences   | `#(1 2 3)`                    |
//! | tables      | `#[name "x" age 3]`           |
//! | compounds   | `#%(point 1 2)`               |
//! | pairs       | `(a . b)`                     |
//! | choices     | `{1 2 3}`                     |

use std::fmt::{self, Write as _};

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use crate::choice::Choice;
use crate::error::{ParseError, ParseResult};
use crate::symbol::Symbol;
use crate::table::{Slot, Table};
use crate::value::{Compound, Oid, Regex, RegexFlags, Value};

const DELIMITERS: &[char] = &['(', ')', '[', ']', '{', '}', '"', ';'];

/// Deepest container nesting the parser accepts.
pub const MAX_NESTING: usize = 100;

/// Render a value in its textual form.
pub fn unparse(value: &Value) -> String {
    value.to_string()
}

/// Parse a complete value from text.
///
/// ```rust
/// use chorus_value::{text, Value};
///
/// assert_eq!(text::parse("42").unwrap(), Value::Int(42));
/// assert_eq!(text::parse("name").unwrap(), Value::symbol("name"));
/// ```
pub fn parse(input: &str) -> ParseResult<Value> {
    let mut parser = Parser::new(input);
    parser.skip_ws();
    let value = parser.value()?;
    parser.skip_ws();
    if parser.pos < input.len() {
        return Err(ParseError::Trailing(parser.pos));
    }
    Ok(value)
}

/// Parse text that may carry a leading `:` quote marker.
pub fn parse_prefixed(input: &str) -> ParseResult<Value> {
    parse(input.strip_prefix(':').unwrap_or(input))
}

fn is_plain_symbol(name: &str) -> bool {
    let Some(first) = name.chars().next() else {
        return false;
    };
    if name == "." || matches!(first, '#' | ':' | '@' | '\'' | '|') || looks_numeric(name) {
        return false;
    }
    name.chars()
        .all(|c| !c.is_whitespace() && !DELIMITERS.contains(&c) && c != '|' && c != '\\')
}

fn looks_numeric(token: &str) -> bool {
    let bytes = token.as_bytes();
    match bytes {
        [] => false,
        [b'+' | b'-' | b'.', rest @ ..] => rest.first().is_some_and(|b| b.is_ascii_digit()),
        [first, ..] => first.is_ascii_digit(),
    }
}

fn write_string(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            other => f.write_char(other)?,
        }
    }
    f.write_char('"')
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for b in bytes {
        write!(f, "{:02x}", b)?;
    }
    Ok(())
}

fn write_symbol(f: &mut fmt::Formatter<'_>, sym: &Symbol) -> fmt::Result {
    if is_plain_symbol(sym.as_str()) {
        f.write_str(sym.as_str())
    } else {
        f.write_char('|')?;
        for c in sym.as_str().chars() {
            if c == '|' || c == '\\' {
                f.write_char('\\')?;
            }
            f.write_char(c)?;
        }
        f.write_char('|')
    }
}

fn write_seq<'a, I>(f: &mut fmt::Formatter<'_>, items: I) -> fmt::Result
where
    I: IntoIterator<Item = &'a Value>,
{
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            f.write_char(' ')?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

fn write_slot(f: &mut fmt::Formatter<'_>, slot: &Slot) -> fmt::Result {
    match slot {
        Slot::Symbol(s) => write_symbol(f, s),
        Slot::String(s) => write_string(f, s),
        Slot::Oid(oid) => write!(f, "{}", oid),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => f.write_str("#void"),
            Value::Bool(true) => f.write_str("#t"),
            Value::Bool(false) => f.write_str("#f"),
            Value::Int(n) => write!(f, "{}", n),
            Value::BigInt(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Ratio(n, d) => write!(f, "{}/{}", n, d),
            Value::String(s) => write_string(f, s),
            Value::Bytes(b) => {
                f.write_str("#X\"")?;
                write_hex(f, b)?;
                f.write_char('"')
            }
            Value::Char(' ') => f.write_str("#\\space"),
            Value::Char('\n') => f.write_str("#\\newline"),
            Value::Char('\t') => f.write_str("#\\tab"),
            Value::Char(c) => write!(f, "#\\{}", c),
            Value::Symbol(s) => write_symbol(f, s),
            Value::Oid(oid) => write!(f, "{}", oid),
            Value::ObjectId(bytes) => {
                f.write_str("#O\"")?;
                write_hex(f, bytes)?;
                f.write_char('"')
            }
            Value::Timestamp(t) => {
                write!(f, "#T{}", t.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            Value::Uuid(u) => write!(f, "#U{}", u.hyphenated()),
            Value::Regex(rx) => {
                f.write_str("#/")?;
                for c in rx.source.chars() {
                    if c == '/' {
                        f.write_char('\\')?;
                    }
                    f.write_char(c)?;
                }
                write!(f, "/{}", rx.flags.to_options())
            }
            Value::Sequence(items) => {
                f.write_str("#(")?;
                write_seq(f, items)?;
                f.write_char(')')
            }
            Value::Table(table) => {
                f.write_str("#[")?;
                for (i, (k, v)) in table.iter().enumerate() {
                    if i > 0 {
                        f.write_char(' ')?;
                    }
                    write_slot(f, k)?;
                    write!(f, " {}", v)?;
                }
                f.write_char(']')
            }
            Value::Compound(c) => {
                f.write_str("#%(")?;
                write_symbol(f, &c.tag)?;
                for e in &c.elements {
                    write!(f, " {}", e)?;
                }
                f.write_char(')')
            }
            Value::Pair(car, cdr) => write!(f, "({} . {})", car, cdr),
            Value::Choice(choice) => {
                f.write_char('{')?;
                write_seq(f, choice)?;
                f.write_char('}')
            }
        }
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0, depth: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn expect(&mut self, want: char) -> ParseResult<()> {
        match self.bump() {
            Some(c) if c == want => Ok(()),
            Some(c) => Err(ParseError::Unexpected {
                ch: c,
                offset: self.pos - c.len_utf8(),
            }),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn unexpected(&self) -> ParseError {
        match self.peek() {
            Some(ch) => ParseError::Unexpected {
                ch,
                offset: self.pos,
            },
            None => ParseError::UnexpectedEnd,
        }
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn token(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || DELIMITERS.contains(&c) {
                break;
            }
            self.bump();
        }
        &self.src[start..self.pos]
    }

    fn value(&mut self) -> ParseResult<Value> {
        if self.depth > MAX_NESTING {
            return Err(ParseError::TooDeep {
                limit: MAX_NESTING,
                offset: self.pos,
            });
        }
        self.depth += 1;
        let value = self.form();
        self.depth -= 1;
        value
    }

    fn form(&mut self) -> ParseResult<Value> {
        match self.peek() {
            None => Err(ParseError::UnexpectedEnd),
            Some('"') => Ok(Value::String(self.string()?.into())),
            Some('|') => Ok(Value::Symbol(self.quoted_symbol()?)),
            Some('#') => self.hash_form(),
            Some('(') => self.pair(),
            Some('{') => {
                self.bump();
                let items = self.items('}')?;
                Ok(Value::Choice(Choice::from_values(items)))
            }
            Some(')' | ']' | '}' | ';') => Err(self.unexpected()),
            Some(_) => self.atom(),
        }
    }

    fn items(&mut self, close: char) -> ParseResult<Vec<Value>> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => return Err(ParseError::UnexpectedEnd),
                Some(c) if c == close => {
                    self.bump();
                    return Ok(items);
                }
                Some(_) => items.push(self.value()?),
            }
        }
    }

    fn string(&mut self) -> ParseResult<String> {
        self.expect('"')?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(ParseError::UnexpectedEnd),
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some(c) => out.push(c),
                    None => return Err(ParseError::UnexpectedEnd),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn quoted_symbol(&mut self) -> ParseResult<Symbol> {
        self.expect('|')?;
        let mut name = String::new();
        loop {
            match self.bump() {
                None => return Err(ParseError::UnexpectedEnd),
                Some('|') => return Ok(Symbol::intern(&name)),
                Some('\\') => match self.bump() {
                    Some(c) => name.push(c),
                    None => return Err(ParseError::UnexpectedEnd),
                },
                Some(c) => name.push(c),
            }
        }
    }

    fn hex_string(&mut self) -> ParseResult<Vec<u8>> {
        let text = self.string()?;
        decode_hex(&text).ok_or_else(|| ParseError::invalid("hex", text))
    }

    fn hash_form(&mut self) -> ParseResult<Value> {
        self.expect('#')?;
        match self.peek() {
            Some('(') => {
                self.bump();
                Ok(Value::Sequence(self.items(')')?))
            }
            Some('[') => {
                self.bump();
                let items = self.items(']')?;
                if items.len() % 2 != 0 {
                    return Err(ParseError::invalid("table", "odd number of elements"));
                }
                let mut table = Table::with_capacity(items.len() / 2);
                let mut iter = items.into_iter();
                while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                    let slot = Slot::from_value(&k)
                        .ok_or_else(|| ParseError::invalid("table key", k.to_string()))?;
                    table.insert(slot, v);
                }
                Ok(Value::Table(table))
            }
            Some('%') => {
                self.bump();
                self.expect('(')?;
                let mut items = self.items(')')?.into_iter();
                match items.next() {
                    Some(Value::Symbol(tag)) => Ok(Value::Compound(Compound {
                        tag,
                        elements: items.collect(),
                    })),
                    Some(other) => Err(ParseError::invalid("compound tag", other.to_string())),
                    None => Err(ParseError::invalid("compound", "missing tag")),
                }
            }
            Some('\\') => {
                self.bump();
                let first = self.bump().ok_or(ParseError::UnexpectedEnd)?;
                let rest = self.token();
                if rest.is_empty() {
                    return Ok(Value::Char(first));
                }
                let name = format!("{}{}", first, rest);
                match name.as_str() {
                    "space" => Ok(Value::Char(' ')),
                    "newline" => Ok(Value::Char('\n')),
                    "tab" => Ok(Value::Char('\t')),
                    _ => Err(ParseError::invalid("character", name)),
                }
            }
            Some('/') => {
                self.bump();
                let mut source = String::new();
                loop {
                    match self.bump() {
                        None => return Err(ParseError::UnexpectedEnd),
                        Some('/') => break,
                        Some('\\') if self.peek() == Some('/') => {
                            self.bump();
                            source.push('/');
                        }
                        Some(c) => source.push(c),
                    }
                }
                let flags = self.token();
                Ok(Value::Regex(Regex::new(source, RegexFlags::from_options(flags))))
            }
            Some('X') => {
                self.bump();
                Ok(Value::Bytes(self.hex_string()?))
            }
            Some('O') => {
                self.bump();
                let bytes = self.hex_string()?;
                let id: [u8; 12] = bytes
                    .try_into()
                    .map_err(|_| ParseError::invalid("object id", "expected 12 bytes"))?;
                Ok(Value::ObjectId(id))
            }
            Some('T') => {
                self.bump();
                let text = self.token();
                DateTime::parse_from_rfc3339(text)
                    .map(|t| Value::Timestamp(t.with_timezone(&Utc)))
                    .map_err(|_| ParseError::invalid("timestamp", text))
            }
            Some('U') => {
                self.bump();
                let text = self.token();
                Uuid::parse_str(text)
                    .map(Value::Uuid)
                    .map_err(|_| ParseError::invalid("uuid", text))
            }
            Some(_) => match self.token() {
                "t" | "true" => Ok(Value::Bool(true)),
                "f" | "false" => Ok(Value::Bool(false)),
                "void" => Ok(Value::Void),
                "" => Err(self.unexpected()),
                other => Err(ParseError::invalid("hash form", format!("#{}", other))),
            },
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn pair(&mut self) -> ParseResult<Value> {
        self.expect('(')?;
        self.skip_ws();
        let car = self.value()?;
        self.skip_ws();
        if self.token() != "." {
            return Err(ParseError::invalid("pair", "expected ' . '"));
        }
        self.skip_ws();
        let cdr = self.value()?;
        self.skip_ws();
        self.expect(')')?;
        Ok(Value::pair(car, cdr))
    }

    fn atom(&mut self) -> ParseResult<Value> {
        let token = self.token();
        if token.is_empty() {
            return Err(self.unexpected());
        }
        if let Some(oid) = token.strip_prefix('@') {
            return parse_oid(oid)
                .map(Value::Oid)
                .ok_or_else(|| ParseError::invalid("oid", token));
        }
        if looks_numeric(token) {
            return parse_number(token);
        }
        Ok(Value::Symbol(Symbol::intern(token)))
    }
}

fn parse_number(token: &str) -> ParseResult<Value> {
    if let Some((n, d)) = token.split_once('/') {
        let numer = n.parse::<i64>();
        let denom = d.parse::<i64>();
        return match (numer, denom) {
            (Ok(numer), Ok(denom)) if denom != 0 => Ok(Value::Ratio(numer, denom)),
            _ => Err(ParseError::invalid("ratio", token)),
        };
    }
    if token.contains(['.', 'e', 'E']) {
        return token
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| ParseError::invalid("float", token));
    }
    token
        .parse::<i128>()
        .map(Value::integer)
        .map_err(|_| ParseError::invalid("integer", token))
}

fn parse_oid(text: &str) -> Option<Oid> {
    let hex = |s: &str, max: usize| {
        if s.is_empty() || s.len() > max || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            None
        } else {
            u64::from_str_radix(s, 16).ok()
        }
    };
    match text.split_once('/') {
        Some((hi, lo)) => {
            let hi = u32::try_from(hex(hi, 8)?).ok()?;
            let lo = u32::try_from(hex(lo, 8)?).ok()?;
            Some(Oid::from_parts(hi, lo))
        }
        None => hex(text, 16).map(Oid::new),
    }
}

/// Whether `text` is an `@hi/lo` or `@addr` OID literal.
pub fn is_oid_literal(text: &str) -> bool {
    text.strip_prefix('@').and_then(parse_oid).is_some()
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(text.get(i..i + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn round_trip(value: Value) {
        let text = unparse(&value);
        let parsed = parse(&text).unwrap_or_else(|e| panic!("{}: {}", text, e));
        assert_eq!(parsed, value, "text was {}", text);
    }

    #[test]
    fn test_atoms_round_trip() {
        round_trip(Value::Int(-42));
        round_trip(Value::integer(i64::MAX as i128 * 4));
        round_trip(Value::Float(1.5));
        round_trip(Value::Float(2.0));
        round_trip(Value::Ratio(3, 4));
        round_trip(Value::from("say \"hi\"\n"));
        round_trip(Value::Bool(true));
        round_trip(Value::Bool(false));
        round_trip(Value::Void);
        round_trip(Value::Char('x'));
        round_trip(Value::Char(' '));
        round_trip(Value::symbol("CamelCase"));
        round_trip(Value::symbol("has space"));
        round_trip(Value::symbol("42"));
        round_trip(Value::Oid(Oid::from_parts(0x1a, 0x2b)));
        round_trip(Value::Bytes(vec![0, 255, 16]));
        round_trip(Value::ObjectId([7; 12]));
    }

    #[test]
    fn test_structured_round_trip() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        round_trip(Value::Timestamp(ts));
        round_trip(Value::Uuid(Uuid::nil()));
        round_trip(Value::Regex(Regex::new("a/b+", RegexFlags::from_options("i"))));
        round_trip(Value::Sequence(vec![Value::from(1), Value::from("two")]));
        round_trip(Value::pair(Value::symbol("a"), Value::from(2)));
        round_trip(Value::choice([Value::from(1), Value::from(2)]));
        round_trip(Value::compound("point", vec![Value::from(1), Value::from(2)]));
        round_trip(Value::Table(
            Table::new()
                .with("name", "x")
                .with(Slot::string("Raw Key"), 3)
                .with(Oid::from_parts(1, 2), true),
        ));
    }

    #[test]
    fn test_parse_prefixed() {
        assert_eq!(parse_prefixed(":foo").unwrap(), Value::symbol("foo"));
        assert_eq!(parse_prefixed(":3/4").unwrap(), Value::Ratio(3, 4));
        assert_eq!(parse_prefixed("bar").unwrap(), Value::symbol("bar"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("(1 2)").is_err());
        assert!(parse("\"open").unwrap_err().is_unexpected_end());
        assert_eq!(parse("1 2"), Err(ParseError::Trailing(2)));
        assert!(parse("@zz/1").is_err());
        assert!(parse("#[a]").is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |n: usize| format!("{}1{}", "#(".repeat(n), ")".repeat(n));
        assert!(parse(&nested(MAX_NESTING)).is_ok());
        assert!(parse(&nested(MAX_NESTING + 1)).unwrap_err().is_too_deep());

        let err = parse(&"{".repeat(10_000)).unwrap_err();
        assert_eq!(err, ParseError::TooDeep { limit: MAX_NESTING, offset: MAX_NESTING + 1 });
        assert!(parse_prefixed(&format!(":{}", "(a . ".repeat(10_000))).unwrap_err().is_too_deep());
    }

    #[test]
    fn test_oid_literals() {
        assert!(is_oid_literal("@1/2"));
        assert!(is_oid_literal("@abcdef"));
        assert!(!is_oid_literal("@123456789/1"));
        assert!(!is_oid_literal("1/2"));
    }
}
