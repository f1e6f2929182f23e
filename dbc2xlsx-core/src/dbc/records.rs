//! DBC section parser
//!
//! Dispatches each logical line on its leading keyword and turns it into an
//! interim [`Record`]. Records are only checked for shape here; names and ids
//! are cross-checked later by the resolver, since DBC allows comments and
//! attributes to reference entities declared further down the file.

use super::tokenizer::{LogicalLine, Token, Tokenizer};
use crate::model::{AttributeScope, AttributeTarget, ByteOrder};
use crate::types::{Diagnostic, Diagnostics, MalformedTokenError};
use std::fmt;

/// Every keyword the section parser knows about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keyword {
    Version,
    NewSymbols,
    BitTiming,
    Nodes,
    ValueTable,
    Message,
    Signal,
    MessageTransmitters,
    Comment,
    AttributeDefinition,
    AttributeDefault,
    AttributeValue,
    ValueDescription,
    SignalValueType,
    ExtendedMultiplexing,
    /// Recognized DBC keyword whose content is not exported
    Unsupported(&'static str),
    /// Anything else; kept so new format extensions do not break parsing
    Unrecognized(String),
}

const UNSUPPORTED_KEYWORDS: &[&str] = &[
    "NS_DESC_",
    "CAT_DEF_",
    "CAT_",
    "FILTER",
    "EV_",
    "EV_DATA_",
    "ENVVAR_DATA_",
    "SGTYPE_",
    "SGTYPE_VAL_",
    "SIG_TYPE_REF_",
    "SIG_GROUP_",
    "SIGTYPE_VALTYPE_",
    "BA_DEF_SGTYPE_",
    "BA_SGTYPE_",
    "BA_DEF_REL_",
    "BA_REL_",
    "BA_DEF_DEF_REL_",
    "BU_SG_REL_",
    "BU_EV_REL_",
    "BU_BO_REL_",
];

impl Keyword {
    pub fn parse(word: &str) -> Self {
        match word {
            "VERSION" => Keyword::Version,
            "NS_" => Keyword::NewSymbols,
            "BS_" => Keyword::BitTiming,
            "BU_" => Keyword::Nodes,
            "VAL_TABLE_" => Keyword::ValueTable,
            "BO_" => Keyword::Message,
            "SG_" => Keyword::Signal,
            "BO_TX_BU_" => Keyword::MessageTransmitters,
            "CM_" => Keyword::Comment,
            "BA_DEF_" => Keyword::AttributeDefinition,
            "BA_DEF_DEF_" => Keyword::AttributeDefault,
            "BA_" => Keyword::AttributeValue,
            "VAL_" => Keyword::ValueDescription,
            "SIG_VALTYPE_" => Keyword::SignalValueType,
            "SG_MUL_VAL_" => Keyword::ExtendedMultiplexing,
            other => match UNSUPPORTED_KEYWORDS.iter().find(|k| **k == other) {
                Some(known) => Keyword::Unsupported(*known),
                None => Keyword::Unrecognized(other.to_string()),
            },
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Keyword::Version => "VERSION",
            Keyword::NewSymbols => "NS_",
            Keyword::BitTiming => "BS_",
            Keyword::Nodes => "BU_",
            Keyword::ValueTable => "VAL_TABLE_",
            Keyword::Message => "BO_",
            Keyword::Signal => "SG_",
            Keyword::MessageTransmitters => "BO_TX_BU_",
            Keyword::Comment => "CM_",
            Keyword::AttributeDefinition => "BA_DEF_",
            Keyword::AttributeDefault => "BA_DEF_DEF_",
            Keyword::AttributeValue => "BA_",
            Keyword::ValueDescription => "VAL_",
            Keyword::SignalValueType => "SIG_VALTYPE_",
            Keyword::ExtendedMultiplexing => "SG_MUL_VAL_",
            Keyword::Unsupported(word) => word,
            Keyword::Unrecognized(word) => word,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Keyword::Unrecognized(_))
    }

    /// Statements that end with `;` and may therefore wrap over several lines
    fn is_semicolon_terminated(&self) -> bool {
        matches!(
            self,
            Keyword::ValueTable
                | Keyword::MessageTransmitters
                | Keyword::Comment
                | Keyword::AttributeDefinition
                | Keyword::AttributeDefault
                | Keyword::AttributeValue
                | Keyword::ValueDescription
                | Keyword::SignalValueType
                | Keyword::ExtendedMultiplexing
        )
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw multiplex marker between the signal name and the colon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplexMarker {
    /// `M`
    Multiplexor,
    /// `m<N>`
    Multiplexed(u64),
    /// `m<N>M`: switched by one selector and itself a selector
    MultiplexedMultiplexor(u64),
}

impl MultiplexMarker {
    fn parse(token: &str) -> Option<Self> {
        if token == "M" {
            return Some(MultiplexMarker::Multiplexor);
        }
        let rest = token.strip_prefix('m')?;
        match rest.strip_suffix('M') {
            Some(digits) => digits.parse().ok().map(MultiplexMarker::MultiplexedMultiplexor),
            None => rest.parse().ok().map(MultiplexMarker::Multiplexed),
        }
    }

    pub fn switch_value(&self) -> Option<u64> {
        match self {
            MultiplexMarker::Multiplexor => None,
            MultiplexMarker::Multiplexed(v) | MultiplexMarker::MultiplexedMultiplexor(v) => Some(*v),
        }
    }

    pub fn is_multiplexor(&self) -> bool {
        matches!(
            self,
            MultiplexMarker::Multiplexor | MultiplexMarker::MultiplexedMultiplexor(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    /// Identifier as written in the file (bit 31 flags an extended frame)
    pub id: u32,
    pub name: String,
    pub dlc: u32,
    pub sender: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalRecord {
    /// Id of the `BO_` line this signal follows, if it was readable
    pub message_id: Option<u32>,
    /// Line of that `BO_`; binds the signal to one declaration even when ids repeat
    pub message_line: Option<usize>,
    pub name: String,
    pub multiplexer: Option<MultiplexMarker>,
    pub start_bit: u32,
    pub length: u32,
    pub byte_order: ByteOrder,
    pub is_signed: bool,
    pub factor: f64,
    pub offset: f64,
    pub minimum: f64,
    pub maximum: f64,
    pub unit: String,
    pub receivers: Vec<String>,
}

/// Declared type of a `BA_DEF_` attribute
#[derive(Debug, Clone, PartialEq)]
pub enum RawAttributeKind {
    Int { min: i64, max: i64 },
    Hex { min: i64, max: i64 },
    Float { min: f64, max: f64 },
    String,
    Enum(Vec<String>),
}

/// Untyped attribute value as written in the file
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Integer(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Integer(v) => write!(f, "{}", v),
            RawValue::Float(v) => write!(f, "{}", v),
            RawValue::Str(s) => write!(f, "\"{}\"", s),
        }
    }
}

/// Labels attached by `VAL_`: inline pairs or the name of a `VAL_TABLE_`
#[derive(Debug, Clone, PartialEq)]
pub enum ValueDescriptions {
    Inline(Vec<(i64, String)>),
    Table(String),
}

/// Interim record produced for one logical line
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Version(String),
    Nodes(Vec<String>),
    ValueTable {
        name: String,
        entries: Vec<(i64, String)>,
    },
    Message(MessageRecord),
    Signal(SignalRecord),
    MessageTransmitters {
        message_id: u32,
        transmitters: Vec<String>,
    },
    Comment {
        target: AttributeTarget,
        text: String,
    },
    AttributeDefinition {
        scope: AttributeScope,
        name: String,
        kind: RawAttributeKind,
    },
    AttributeDefault {
        name: String,
        value: RawValue,
    },
    AttributeValue {
        name: String,
        target: AttributeTarget,
        value: RawValue,
    },
    ValueDescription {
        message_id: u32,
        signal: String,
        values: ValueDescriptions,
    },
    SignalValueType {
        message_id: u32,
        signal: String,
        value_type: u32,
    },
    ExtendedMultiplexing {
        message_id: u32,
        signal: String,
        multiplexor: String,
        ranges: Vec<(u64, u64)>,
    },
    /// Known keyword whose content is not needed (NS_, BS_, EV_, ...)
    Ignored(Keyword),
    /// Unrecognized keyword
    Skipped(String),
}

/// A record together with the line it started on
#[derive(Debug, Clone, PartialEq)]
pub struct RecordEntry {
    pub line: usize,
    pub record: Record,
}

/// Everything the section parser accumulated, handed over to the resolver
#[derive(Debug, Default)]
pub struct RecordSet {
    pub entries: Vec<RecordEntry>,
    pub(crate) diagnostics: Diagnostics,
}

impl RecordSet {
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.entries.iter().map(|e| &e.record)
    }
}

/// Widest `SG_MUL_VAL_` range that is expanded into switch values
const MAX_SWITCH_RANGE: u64 = 1 << 16;

type FieldResult<T> = std::result::Result<T, String>;

/// Cursor over the tokens of one record
struct Fields<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Fields<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self, what: &str) -> FieldResult<&'t Token> {
        let token = self
            .tokens
            .get(self.pos)
            .ok_or_else(|| format!("missing {}", what))?;
        self.pos += 1;
        Ok(token)
    }

    fn eat(&mut self, symbol: char) -> bool {
        if self.peek().map_or(false, |t| t.is_symbol(symbol)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, symbol: char, what: &str) -> FieldResult<()> {
        match self.next(what)? {
            t if t.is_symbol(symbol) => Ok(()),
            other => Err(format!("expected `{}` for {}, found `{}`", symbol, what, other)),
        }
    }

    fn identifier(&mut self, what: &str) -> FieldResult<String> {
        match self.next(what)? {
            Token::Identifier(ident) => Ok(ident.clone()),
            other => Err(format!("expected {}, found `{}`", what, other)),
        }
    }

    fn string(&mut self, what: &str) -> FieldResult<String> {
        match self.next(what)? {
            Token::Str(s) => Ok(s.clone()),
            other => Err(format!("expected quoted {}, found `{}`", what, other)),
        }
    }

    fn integer(&mut self, what: &str) -> FieldResult<i64> {
        let token = self.next(what)?;
        token
            .as_integer()
            .ok_or_else(|| format!("expected integer {}, found `{}`", what, token))
    }

    fn unsigned(&mut self, what: &str) -> FieldResult<u64> {
        let value = self.integer(what)?;
        u64::try_from(value).map_err(|_| format!("{} must not be negative, found {}", what, value))
    }

    fn id(&mut self, what: &str) -> FieldResult<u32> {
        let value = self.unsigned(what)?;
        u32::try_from(value).map_err(|_| format!("{} {} does not fit in 32 bits", what, value))
    }

    fn number(&mut self, what: &str) -> FieldResult<f64> {
        let token = self.next(what)?;
        token
            .as_number()
            .ok_or_else(|| format!("expected number {}, found `{}`", what, token))
    }

    fn value(&mut self, what: &str) -> FieldResult<RawValue> {
        match self.next(what)? {
            Token::Integer(v) => Ok(RawValue::Integer(*v)),
            Token::Float(v) => Ok(RawValue::Float(*v)),
            Token::Str(s) => Ok(RawValue::Str(s.clone())),
            other => Err(format!("expected {}, found `{}`", what, other)),
        }
    }

    /// Consumes the optional trailing `;` and rejects leftovers
    fn finish(&mut self) -> FieldResult<()> {
        self.eat(';');
        match self.peek() {
            None => Ok(()),
            Some(extra) => Err(format!("unexpected trailing token `{}`", extra)),
        }
    }

    fn is_done(&self) -> bool {
        self.peek().map_or(true, |t| t.is_symbol(';'))
    }
}

fn parse_version(f: &mut Fields) -> FieldResult<Record> {
    let version = f.string("version string")?;
    f.finish()?;
    Ok(Record::Version(version))
}

fn parse_nodes(f: &mut Fields) -> FieldResult<Record> {
    f.expect(':', "node list")?;
    let mut nodes = Vec::new();
    while !f.is_done() {
        if f.eat(',') {
            continue;
        }
        nodes.push(f.identifier("node name")?);
    }
    f.finish()?;
    Ok(Record::Nodes(nodes))
}

fn parse_value_pairs(f: &mut Fields) -> FieldResult<Vec<(i64, String)>> {
    let mut entries = Vec::new();
    while !f.is_done() {
        let value = f.integer("raw value")?;
        let label = f.string("value label")?;
        entries.push((value, label));
    }
    Ok(entries)
}

fn parse_value_table(f: &mut Fields) -> FieldResult<Record> {
    let name = f.identifier("value table name")?;
    let entries = parse_value_pairs(f)?;
    f.finish()?;
    Ok(Record::ValueTable { name, entries })
}

fn parse_message(f: &mut Fields) -> FieldResult<Record> {
    let id = f.id("message id")?;
    let name = f.identifier("message name")?;
    f.expect(':', "message size")?;
    let dlc = f.id("message size")?;
    let sender = if f.is_done() {
        None
    } else {
        Some(f.identifier("transmitter")?)
    };
    f.finish()?;
    Ok(Record::Message(MessageRecord {
        id,
        name,
        dlc,
        sender,
    }))
}

fn parse_signal(f: &mut Fields, message: Option<(u32, usize)>) -> FieldResult<Record> {
    let name = f.identifier("signal name")?;

    let multiplexer = match f.peek() {
        Some(Token::Identifier(marker)) => {
            f.pos += 1;
            Some(
                MultiplexMarker::parse(marker)
                    .ok_or_else(|| format!("invalid multiplex marker `{}`", marker))?,
            )
        }
        _ => None,
    };

    f.expect(':', "bit layout")?;
    let start_bit = f.id("start bit")?;
    f.expect('|', "signal length")?;
    let length = f.id("signal length")?;
    f.expect('@', "byte order")?;
    let byte_order = match f.integer("byte order")? {
        0 => ByteOrder::BigEndian,
        1 => ByteOrder::LittleEndian,
        other => return Err(format!("byte order must be 0 or 1, found {}", other)),
    };
    let is_signed = match f.next("value sign")? {
        t if t.is_symbol('-') => true,
        t if t.is_symbol('+') => false,
        other => return Err(format!("expected `+` or `-` for value sign, found `{}`", other)),
    };

    f.expect('(', "factor")?;
    let factor = f.number("factor")?;
    f.expect(',', "offset")?;
    let offset = f.number("offset")?;
    f.expect(')', "offset")?;

    f.expect('[', "minimum")?;
    let minimum = f.number("minimum")?;
    f.expect('|', "maximum")?;
    let maximum = f.number("maximum")?;
    f.expect(']', "maximum")?;

    let unit = f.string("unit")?;

    let mut receivers = Vec::new();
    while !f.is_done() {
        if f.eat(',') {
            continue;
        }
        receivers.push(f.identifier("receiver")?);
    }
    f.finish()?;

    Ok(Record::Signal(SignalRecord {
        message_id: message.map(|(id, _)| id),
        message_line: message.map(|(_, line)| line),
        name,
        multiplexer,
        start_bit,
        length,
        byte_order,
        is_signed,
        factor,
        offset,
        minimum,
        maximum,
        unit,
        receivers,
    }))
}

fn parse_transmitters(f: &mut Fields) -> FieldResult<Record> {
    let message_id = f.id("message id")?;
    f.expect(':', "transmitter list")?;
    let mut transmitters = Vec::new();
    while !f.is_done() {
        if f.eat(',') {
            continue;
        }
        transmitters.push(f.identifier("transmitter")?);
    }
    f.finish()?;
    Ok(Record::MessageTransmitters {
        message_id,
        transmitters,
    })
}

/// Parses the optional object selector shared by `CM_` and `BA_`.
/// `Ok(None)` means the statement targets an environment variable.
fn parse_target(f: &mut Fields) -> FieldResult<Option<AttributeTarget>> {
    let object = match f.peek() {
        Some(Token::Identifier(object)) => object.as_str(),
        _ => return Ok(Some(AttributeTarget::Global)),
    };
    f.pos += 1;
    match object {
        "BU_" => Ok(Some(AttributeTarget::Node(f.identifier("node name")?))),
        "BO_" => Ok(Some(AttributeTarget::Message(f.id("message id")?))),
        "SG_" => {
            let message_id = f.id("message id")?;
            let signal = f.identifier("signal name")?;
            Ok(Some(AttributeTarget::Signal { message_id, signal }))
        }
        "EV_" => {
            f.identifier("environment variable")?;
            Ok(None)
        }
        other => Err(format!("unknown object type `{}`", other)),
    }
}

fn parse_comment(f: &mut Fields) -> FieldResult<Record> {
    let target = parse_target(f)?;
    let text = f.string("comment text")?;
    f.finish()?;
    Ok(match target {
        Some(target) => Record::Comment { target, text },
        None => Record::Ignored(Keyword::Unsupported("EV_")),
    })
}

fn parse_attribute_definition(f: &mut Fields) -> FieldResult<Record> {
    let scope = match f.peek() {
        Some(Token::Identifier(object)) => {
            let scope = match object.as_str() {
                "BU_" => Some(AttributeScope::Node),
                "BO_" => Some(AttributeScope::Message),
                "SG_" => Some(AttributeScope::Signal),
                "EV_" => None,
                other => return Err(format!("unknown object type `{}`", other)),
            };
            f.pos += 1;
            scope
        }
        _ => Some(AttributeScope::Global),
    };
    let name = f.string("attribute name")?;

    let kind = match f.identifier("attribute type")?.as_str() {
        "INT" => RawAttributeKind::Int {
            min: f.integer("minimum")?,
            max: f.integer("maximum")?,
        },
        "HEX" => RawAttributeKind::Hex {
            min: f.integer("minimum")?,
            max: f.integer("maximum")?,
        },
        "FLOAT" => RawAttributeKind::Float {
            min: f.number("minimum")?,
            max: f.number("maximum")?,
        },
        "STRING" => RawAttributeKind::String,
        "ENUM" => {
            let mut choices = Vec::new();
            while !f.is_done() {
                if f.eat(',') {
                    continue;
                }
                choices.push(f.string("enumeration choice")?);
            }
            RawAttributeKind::Enum(choices)
        }
        other => return Err(format!("unknown attribute type `{}`", other)),
    };
    f.finish()?;

    Ok(match scope {
        Some(scope) => Record::AttributeDefinition { scope, name, kind },
        None => Record::Ignored(Keyword::Unsupported("EV_")),
    })
}

fn parse_attribute_default(f: &mut Fields) -> FieldResult<Record> {
    let name = f.string("attribute name")?;
    let value = f.value("default value")?;
    f.finish()?;
    Ok(Record::AttributeDefault { name, value })
}

fn parse_attribute_value(f: &mut Fields) -> FieldResult<Record> {
    let name = f.string("attribute name")?;
    let target = parse_target(f)?;
    let value = f.value("attribute value")?;
    f.finish()?;
    Ok(match target {
        Some(target) => Record::AttributeValue {
            name,
            target,
            value,
        },
        None => Record::Ignored(Keyword::Unsupported("EV_")),
    })
}

fn parse_value_description(f: &mut Fields) -> FieldResult<Record> {
    // `VAL_ <env var> ...` has no message id
    if let Some(Token::Identifier(_)) = f.peek() {
        return Ok(Record::Ignored(Keyword::Unsupported("EV_")));
    }
    let message_id = f.id("message id")?;
    let signal = f.identifier("signal name")?;
    let values = match f.peek() {
        Some(Token::Identifier(table)) => {
            f.pos += 1;
            ValueDescriptions::Table(table.clone())
        }
        _ => ValueDescriptions::Inline(parse_value_pairs(f)?),
    };
    f.finish()?;
    Ok(Record::ValueDescription {
        message_id,
        signal,
        values,
    })
}

fn parse_signal_value_type(f: &mut Fields) -> FieldResult<Record> {
    let message_id = f.id("message id")?;
    let signal = f.identifier("signal name")?;
    f.eat(':');
    let value_type = f.id("value type")?;
    if value_type > 2 {
        return Err(format!("value type must be 0, 1 or 2, found {}", value_type));
    }
    f.finish()?;
    Ok(Record::SignalValueType {
        message_id,
        signal,
        value_type,
    })
}

fn parse_extended_multiplexing(f: &mut Fields) -> FieldResult<Record> {
    let message_id = f.id("message id")?;
    let signal = f.identifier("signal name")?;
    let multiplexor = f.identifier("multiplexor name")?;
    let mut ranges = Vec::new();
    while !f.is_done() {
        if f.eat(',') {
            continue;
        }
        let low = f.unsigned("range start")?;
        f.expect('-', "range end")?;
        let high = f.unsigned("range end")?;
        if low > high {
            return Err(format!("range {}-{} is reversed", low, high));
        }
        if high - low >= MAX_SWITCH_RANGE {
            return Err(format!("range {}-{} is too wide", low, high));
        }
        ranges.push((low, high));
    }
    if ranges.is_empty() {
        return Err("missing switch value ranges".to_string());
    }
    f.finish()?;
    Ok(Record::ExtendedMultiplexing {
        message_id,
        signal,
        multiplexor,
        ranges,
    })
}

/// Reads every logical line and builds the interim record set
///
/// Only an unterminated quoted string aborts parsing; every other problem is
/// recorded as a diagnostic and the offending record is skipped.
pub fn parse_records(text: &str) -> Result<RecordSet, MalformedTokenError> {
    let mut set = RecordSet::default();
    let mut lines = Tokenizer::new(text).peekable();
    // Id and line of the `BO_` that indented `SG_` lines belong to
    let mut current_message: Option<(u32, usize)> = None;

    while let Some(line) = lines.next() {
        let mut line = line?;
        let keyword = match line.keyword.as_deref() {
            Some(word) => Keyword::parse(word),
            None => {
                set.diagnostics.push(Diagnostic::MalformedRecord {
                    line: line.line,
                    keyword: "<none>".to_string(),
                    reason: format!(
                        "line does not start with a keyword (found `{}`)",
                        line.tokens.first().map(|t| t.to_string()).unwrap_or_default()
                    ),
                });
                continue;
            }
        };

        if keyword == Keyword::NewSymbols {
            // The symbol list that follows `NS_ :` is indented, one per line
            while let Some(Ok(next)) = lines.peek() {
                if !(next.indented && next.tokens.is_empty()) {
                    break;
                }
                lines.next();
            }
        } else if keyword.is_semicolon_terminated() && !line.ends_with(';') {
            absorb_continuation(&mut line, &mut lines)?;
        }

        match keyword {
            Keyword::Message => {
                current_message = line
                    .tokens
                    .first()
                    .and_then(Token::as_integer)
                    .and_then(|id| u32::try_from(id).ok())
                    .map(|id| (id, line.line));
            }
            Keyword::Signal => {}
            _ => current_message = None,
        }

        let mut fields = Fields::new(&line.tokens);
        let parsed = match &keyword {
            Keyword::Version => parse_version(&mut fields),
            Keyword::Nodes => parse_nodes(&mut fields),
            Keyword::ValueTable => parse_value_table(&mut fields),
            Keyword::Message => parse_message(&mut fields),
            Keyword::Signal => parse_signal(&mut fields, current_message),
            Keyword::MessageTransmitters => parse_transmitters(&mut fields),
            Keyword::Comment => parse_comment(&mut fields),
            Keyword::AttributeDefinition => parse_attribute_definition(&mut fields),
            Keyword::AttributeDefault => parse_attribute_default(&mut fields),
            Keyword::AttributeValue => parse_attribute_value(&mut fields),
            Keyword::ValueDescription => parse_value_description(&mut fields),
            Keyword::SignalValueType => parse_signal_value_type(&mut fields),
            Keyword::ExtendedMultiplexing => parse_extended_multiplexing(&mut fields),
            Keyword::NewSymbols | Keyword::BitTiming | Keyword::Unsupported(_) => {
                Ok(Record::Ignored(keyword.clone()))
            }
            Keyword::Unrecognized(word) => {
                set.diagnostics.push(Diagnostic::UnknownKeyword {
                    line: line.line,
                    keyword: word.clone(),
                });
                Ok(Record::Skipped(word.clone()))
            }
        };

        match parsed {
            Ok(record) => {
                if let Record::Ignored(ref keyword) = record {
                    log::debug!("line {}: ignoring {} statement", line.line, keyword);
                }
                set.entries.push(RecordEntry {
                    line: line.line,
                    record,
                });
            }
            Err(reason) => set.diagnostics.push(Diagnostic::MalformedRecord {
                line: line.line,
                keyword: keyword.to_string(),
                reason,
            }),
        }
    }

    log::debug!(
        "Section parser produced {} records, {} diagnostics",
        set.entries.len(),
        set.diagnostics.len()
    );
    Ok(set)
}

/// Appends following lines to a `;`-terminated statement until the `;`
/// shows up or a line starting with a keyword begins the next record
fn absorb_continuation<I>(
    line: &mut LogicalLine,
    lines: &mut std::iter::Peekable<I>,
) -> Result<(), MalformedTokenError>
where
    I: Iterator<Item = Result<LogicalLine, MalformedTokenError>>,
{
    loop {
        let starts_record = match lines.peek() {
            None => return Ok(()),
            Some(Err(_)) => false,
            Some(Ok(next)) => next.keyword.as_deref().map_or(false, |word| {
                Keyword::parse(word).is_known() || (!next.indented && looks_like_keyword(word))
            }),
        };
        if starts_record {
            return Ok(());
        }
        let next = match lines.next() {
            Some(next) => next?,
            None => return Ok(()),
        };
        if let Some(word) = next.keyword {
            line.tokens.push(Token::Identifier(word));
        }
        line.tokens.extend(next.tokens);
        if line.ends_with(';') {
            return Ok(());
        }
    }
}

/// Vendor keywords follow the DBC shape: upper case, ending in `_`
fn looks_like_keyword(word: &str) -> bool {
    word.len() > 1
        && word.ends_with('_')
        && word.starts_with(|c: char| c.is_ascii_uppercase())
        && word
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(text: &str) -> RecordSet {
        parse_records(text).unwrap()
    }

    #[test]
    fn test_keyword_dispatch() {
        assert_eq!(Keyword::parse("BO_"), Keyword::Message);
        assert_eq!(Keyword::parse("SG_MUL_VAL_"), Keyword::ExtendedMultiplexing);
        assert_eq!(Keyword::parse("EV_"), Keyword::Unsupported("EV_"));
        assert_eq!(
            Keyword::parse("FOO_"),
            Keyword::Unrecognized("FOO_".to_string())
        );
        assert!(!Keyword::parse("FOO_").is_known());
    }

    #[test]
    fn test_multiplex_markers() {
        assert_eq!(MultiplexMarker::parse("M"), Some(MultiplexMarker::Multiplexor));
        assert_eq!(MultiplexMarker::parse("m12"), Some(MultiplexMarker::Multiplexed(12)));
        assert_eq!(
            MultiplexMarker::parse("m3M"),
            Some(MultiplexMarker::MultiplexedMultiplexor(3))
        );
        assert_eq!(MultiplexMarker::parse("x1"), None);
        assert_eq!(MultiplexMarker::parse("m"), None);
    }

    #[test]
    fn test_message_and_signals() {
        let set = records(
            "BO_ 291 EngineData: 8 ECU1\n \
             SG_ EngineSpeed : 0|16@1+ (1,0) [0|8000] \"rpm\" ECU2,ECU3\n \
             SG_ Mode M : 16|8@0- (1,0) [0|3] \"\" Vector__XXX\n",
        );
        assert_eq!(set.diagnostics.len(), 0);
        assert_eq!(set.entries.len(), 3);

        match &set.entries[0].record {
            Record::Message(msg) => {
                assert_eq!(msg.id, 291);
                assert_eq!(msg.name, "EngineData");
                assert_eq!(msg.dlc, 8);
                assert_eq!(msg.sender.as_deref(), Some("ECU1"));
            }
            other => panic!("expected message, got {:?}", other),
        }
        match &set.entries[1].record {
            Record::Signal(sig) => {
                assert_eq!(sig.message_id, Some(291));
                assert_eq!(sig.byte_order, ByteOrder::LittleEndian);
                assert!(!sig.is_signed);
                assert_eq!(sig.maximum, 8000.0);
                assert_eq!(sig.unit, "rpm");
                assert_eq!(sig.receivers, vec!["ECU2", "ECU3"]);
            }
            other => panic!("expected signal, got {:?}", other),
        }
        match &set.entries[2].record {
            Record::Signal(sig) => {
                assert_eq!(sig.multiplexer, Some(MultiplexMarker::Multiplexor));
                assert_eq!(sig.byte_order, ByteOrder::BigEndian);
                assert!(sig.is_signed);
            }
            other => panic!("expected signal, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_signal_is_reported_and_skipped() {
        let set = records(
            "BO_ 100 Msg: 8 ECU1\n \
             SG_ Broken : 0|16@1+ (1,0)\n \
             SG_ Fine : 16|8@1+ (1,0) [0|255] \"\" ECU1\n",
        );
        assert_eq!(set.entries.len(), 2);
        assert_eq!(
            set.diagnostics.into_vec(),
            vec![Diagnostic::MalformedRecord {
                line: 2,
                keyword: "SG_".to_string(),
                reason: "missing minimum".to_string(),
            }]
        );
    }

    #[test]
    fn test_signal_keeps_id_of_malformed_message() {
        let set = records("BO_ 300 Broken 8 ECU1\n SG_ Lost : 0|8@1+ (1,0) [0|1] \"\" ECU1\n");
        assert_eq!(set.diagnostics.len(), 1);
        match &set.entries[0].record {
            Record::Signal(sig) => assert_eq!(sig.message_id, Some(300)),
            other => panic!("expected signal, got {:?}", other),
        }
    }

    #[test]
    fn test_ns_block_is_absorbed() {
        let set = records("NS_ :\n\tNS_DESC_\n\tCM_\n\tBA_DEF_\n\nBS_:\nBU_: A B\n");
        assert_eq!(set.diagnostics.len(), 0);
        let records: Vec<_> = set.records().cloned().collect();
        assert_eq!(
            records,
            vec![
                Record::Ignored(Keyword::NewSymbols),
                Record::Ignored(Keyword::BitTiming),
                Record::Nodes(vec!["A".to_string(), "B".to_string()]),
            ]
        );
    }

    #[test]
    fn test_comment_targets() {
        let set = records(
            "CM_ \"network\";\n\
             CM_ BU_ ECU1 \"node\";\n\
             CM_ BO_ 100 \"message\";\n\
             CM_ SG_ 100 Speed \"signal\nsecond line\";\n\
             CM_ EV_ Env \"ignored\";\n",
        );
        let targets: Vec<_> = set
            .records()
            .filter_map(|r| match r {
                Record::Comment { target, .. } => Some(target.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            targets,
            vec![
                AttributeTarget::Global,
                AttributeTarget::Node("ECU1".to_string()),
                AttributeTarget::Message(100),
                AttributeTarget::Signal {
                    message_id: 100,
                    signal: "Speed".to_string()
                },
            ]
        );
        assert_eq!(set.entries[4].record, Record::Ignored(Keyword::Unsupported("EV_")));
    }

    #[test]
    fn test_attribute_statements() {
        let set = records(
            "BA_DEF_ BO_ \"GenMsgCycleTime\" INT 0 10000;\n\
             BA_DEF_ SG_ \"GenSigStartValue\" FLOAT -1.5 1E+003;\n\
             BA_DEF_ \"BusType\" STRING ;\n\
             BA_DEF_ BO_ \"GenMsgSendType\" ENUM \"Cyclic\",\"Event\",\n  \"IfActive\";\n\
             BA_DEF_DEF_ \"GenMsgCycleTime\" 100;\n\
             BA_ \"GenMsgCycleTime\" BO_ 100 20;\n\
             BA_ \"BusType\" \"CAN\";\n",
        );
        assert_eq!(set.diagnostics.len(), 0);
        let records: Vec<_> = set.records().cloned().collect();
        assert_eq!(
            records[0],
            Record::AttributeDefinition {
                scope: AttributeScope::Message,
                name: "GenMsgCycleTime".to_string(),
                kind: RawAttributeKind::Int { min: 0, max: 10000 },
            }
        );
        assert_eq!(
            records[1],
            Record::AttributeDefinition {
                scope: AttributeScope::Signal,
                name: "GenSigStartValue".to_string(),
                kind: RawAttributeKind::Float { min: -1.5, max: 1000.0 },
            }
        );
        assert_eq!(
            records[3],
            Record::AttributeDefinition {
                scope: AttributeScope::Message,
                name: "GenMsgSendType".to_string(),
                kind: RawAttributeKind::Enum(vec![
                    "Cyclic".to_string(),
                    "Event".to_string(),
                    "IfActive".to_string()
                ]),
            }
        );
        assert_eq!(
            records[5],
            Record::AttributeValue {
                name: "GenMsgCycleTime".to_string(),
                target: AttributeTarget::Message(100),
                value: RawValue::Integer(20),
            }
        );
        assert_eq!(
            records[6],
            Record::AttributeValue {
                name: "BusType".to_string(),
                target: AttributeTarget::Global,
                value: RawValue::Str("CAN".to_string()),
            }
        );
    }

    #[test]
    fn test_value_descriptions_wrap_lines() {
        let set = records(
            "VAL_TABLE_ OnOff 1 \"On\" 0 \"Off\" ;\n\
             VAL_ 100 State 0 \"Idle\"\n   1 \"Run\" ;\n\
             VAL_ 100 Switch OnOff ;\n\
             VAL_ EnvVar 0 \"x\" ;\n",
        );
        assert_eq!(set.diagnostics.len(), 0);
        let records: Vec<_> = set.records().cloned().collect();
        assert_eq!(
            records[1],
            Record::ValueDescription {
                message_id: 100,
                signal: "State".to_string(),
                values: ValueDescriptions::Inline(vec![
                    (0, "Idle".to_string()),
                    (1, "Run".to_string())
                ]),
            }
        );
        assert_eq!(
            records[2],
            Record::ValueDescription {
                message_id: 100,
                signal: "Switch".to_string(),
                values: ValueDescriptions::Table("OnOff".to_string()),
            }
        );
        assert_eq!(records[3], Record::Ignored(Keyword::Unsupported("EV_")));
    }

    #[test]
    fn test_missing_semicolon_stops_at_next_keyword() {
        let set = records("CM_ BO_ 100 \"no terminator\"\nBU_: A\n");
        assert_eq!(set.diagnostics.len(), 0);
        assert_eq!(set.entries.len(), 2);
        assert_eq!(set.entries[1].record, Record::Nodes(vec!["A".to_string()]));
    }

    #[test]
    fn test_missing_semicolon_stops_at_vendor_keyword() {
        let set = records("CM_ BO_ 100 \"note\"\nFOO_ 1 2;\n");
        assert_eq!(
            set.entries[0].record,
            Record::Comment {
                target: AttributeTarget::Message(100),
                text: "note".to_string(),
            }
        );
        assert_eq!(set.entries[1].record, Record::Skipped("FOO_".to_string()));
        assert_eq!(
            set.diagnostics.into_vec(),
            vec![Diagnostic::UnknownKeyword {
                line: 2,
                keyword: "FOO_".to_string()
            }]
        );
        assert!(looks_like_keyword("SGTYPE_VAL_"));
        assert!(!looks_like_keyword("ECU1"));
        assert!(!looks_like_keyword("_"));
    }

    #[test]
    fn test_signals_bind_to_their_message_line() {
        let set = records(
            "BO_ 100 First: 8 ECU1\n SG_ A : 0|8@1+ (1,0) [0|1] \"\" ECU1\n\
             BO_ 100 Second: 8 ECU1\n SG_ B : 8|8@1+ (1,0) [0|1] \"\" ECU1\n",
        );
        let owners: Vec<(Option<u32>, Option<usize>)> = set
            .records()
            .filter_map(|r| match r {
                Record::Signal(sig) => Some((sig.message_id, sig.message_line)),
                _ => None,
            })
            .collect();
        assert_eq!(owners, vec![(Some(100), Some(1)), (Some(100), Some(3))]);
    }

    #[test]
    fn test_signal_after_other_statement_has_no_message() {
        let set = records(
            "BO_ 100 Msg: 8 ECU1\n SG_ A : 0|8@1+ (1,0) [0|1] \"\" ECU1\n\
             CM_ BO_ 100 \"note\";\n SG_ Stray : 8|8@1+ (1,0) [0|1] \"\" ECU1\n",
        );
        match &set.entries[3].record {
            Record::Signal(sig) => {
                assert_eq!(sig.name, "Stray");
                assert_eq!(sig.message_id, None);
                assert_eq!(sig.message_line, None);
            }
            other => panic!("expected signal, got {:?}", other),
        }
    }

    #[test]
    fn test_extended_multiplexing_and_value_type() {
        let set = records(
            "SG_MUL_VAL_ 100 Sub Mode 0-3, 8-8;\nSIG_VALTYPE_ 100 Temp : 1;\n",
        );
        let records: Vec<_> = set.records().cloned().collect();
        assert_eq!(
            records[0],
            Record::ExtendedMultiplexing {
                message_id: 100,
                signal: "Sub".to_string(),
                multiplexor: "Mode".to_string(),
                ranges: vec![(0, 3), (8, 8)],
            }
        );
        assert_eq!(
            records[1],
            Record::SignalValueType {
                message_id: 100,
                signal: "Temp".to_string(),
                value_type: 1,
            }
        );
    }

    #[test]
    fn test_unknown_keyword_is_skipped() {
        let set = records("FOO_ 1 2 3;\nBU_: A\n");
        assert_eq!(set.entries[0].record, Record::Skipped("FOO_".to_string()));
        assert_eq!(
            set.diagnostics.into_vec(),
            vec![Diagnostic::UnknownKeyword {
                line: 1,
                keyword: "FOO_".to_string()
            }]
        );
    }

    #[test]
    fn test_unterminated_string_is_fatal() {
        assert_eq!(
            parse_records("BU_: A\nCM_ \"open\n").unwrap_err(),
            MalformedTokenError { line: 2 }
        );
    }
}
