//! Immutable network model handed to writers
//!
//! This is the flattened result of a DBC conversion: messages with their
//! signals nested inside, nodes, attribute definitions and values, and named
//! value tables. Everything is sorted for deterministic output and nothing
//! is mutated after the model builder emits it.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Bit 31 of a DBC message identifier marks a 29-bit extended frame
pub const EXTENDED_ID_FLAG: u32 = 0x8000_0000;

/// Mask selecting the frame identifier bits
pub const FRAME_ID_MASK: u32 = 0x1FFF_FFFF;

/// A CAN network participant declared in `BU_`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub name: String,
    pub comment: Option<String>,
}

/// A CAN frame definition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    /// Identifier exactly as written in the DBC file (unique per model)
    pub id: u32,
    /// Frame identifier with the extended flag stripped
    pub frame_id: u32,
    /// True for 29-bit identifiers
    pub is_extended: bool,
    pub name: String,
    /// Payload size in bytes
    pub dlc: u32,
    /// Originating node first, then additional `BO_TX_BU_` transmitters
    pub senders: Vec<String>,
    /// From the `GenMsgCycleTime` attribute
    pub cycle_time_ms: Option<i64>,
    pub comment: Option<String>,
    /// Sorted by start bit
    pub signals: Vec<Signal>,
}

impl Message {
    /// Splits a raw DBC identifier into frame id and extended flag
    pub fn split_id(id: u32) -> (u32, bool) {
        (id & FRAME_ID_MASK, id & EXTENDED_ID_FLAG != 0)
    }

    /// Frame id formatted the way bus tools print it (`0x1A0`)
    pub fn frame_id_hex(&self) -> String {
        format!("0x{:X}", self.frame_id)
    }

    pub fn signal(&self, name: &str) -> Option<&Signal> {
        self.signals.iter().find(|s| s.name == name)
    }

    pub fn is_multiplexed(&self) -> bool {
        self.signals.iter().any(|s| s.multiplexing.is_some())
    }
}

/// Byte order for signal extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    /// Little-endian (Intel format, `@1`)
    LittleEndian,
    /// Big-endian (Motorola format, `@0`)
    BigEndian,
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteOrder::LittleEndian => write!(f, "little_endian"),
            ByteOrder::BigEndian => write!(f, "big_endian"),
        }
    }
}

/// Raw value encoding, from `SIG_VALTYPE_`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalValueType {
    #[default]
    Integer,
    Float32,
    Float64,
}

impl SignalValueType {
    pub fn is_float(&self) -> bool {
        !matches!(self, SignalValueType::Integer)
    }
}

/// Role of a signal in a multiplexed message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum MultiplexRole {
    /// Selector signal (`M`)
    Multiplexor,
    /// Present only while `multiplexor` holds one of `switch_values` (`mN`)
    Multiplexed {
        multiplexor: String,
        switch_values: Vec<u64>,
    },
    /// Switched by `multiplexor` and itself a selector (`mNM`)
    MultiplexedMultiplexor {
        multiplexor: String,
        switch_values: Vec<u64>,
    },
}

impl MultiplexRole {
    pub fn is_multiplexor(&self) -> bool {
        matches!(
            self,
            MultiplexRole::Multiplexor | MultiplexRole::MultiplexedMultiplexor { .. }
        )
    }

    pub fn multiplexor(&self) -> Option<&str> {
        match self {
            MultiplexRole::Multiplexor => None,
            MultiplexRole::Multiplexed { multiplexor, .. }
            | MultiplexRole::MultiplexedMultiplexor { multiplexor, .. } => Some(multiplexor),
        }
    }

    pub fn switch_values(&self) -> &[u64] {
        match self {
            MultiplexRole::Multiplexor => &[],
            MultiplexRole::Multiplexed { switch_values, .. }
            | MultiplexRole::MultiplexedMultiplexor { switch_values, .. } => switch_values,
        }
    }
}

/// A bit field inside a message payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub name: String,
    pub start_bit: u32,
    /// Length in bits
    pub length: u32,
    pub byte_order: ByteOrder,
    pub is_signed: bool,
    pub value_type: SignalValueType,
    /// Scale factor to convert raw value to physical value
    pub factor: f64,
    /// Offset to add after scaling
    pub offset: f64,
    pub minimum: f64,
    pub maximum: f64,
    /// Engineering unit (e.g., "km/h", "°C", "V")
    pub unit: Option<String>,
    pub receivers: Vec<String>,
    pub multiplexing: Option<MultiplexRole>,
    /// Raw value -> label, with named tables already expanded
    pub value_table: BTreeMap<i64, String>,
    /// Name of the `VAL_TABLE_` the labels came from, if any
    pub value_table_name: Option<String>,
    pub comment: Option<String>,
}

/// Object type an attribute applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeScope {
    Global,
    Node,
    Message,
    Signal,
}

impl fmt::Display for AttributeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeScope::Global => write!(f, "network"),
            AttributeScope::Node => write!(f, "node"),
            AttributeScope::Message => write!(f, "message"),
            AttributeScope::Signal => write!(f, "signal"),
        }
    }
}

/// Declared type and constraints of an attribute
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttributeKind {
    Integer { min: i64, max: i64 },
    Hex { min: i64, max: i64 },
    Float { min: f64, max: f64 },
    String,
    Enumeration { choices: Vec<String> },
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeKind::Integer { min, max } => write!(f, "INT [{}..{}]", min, max),
            AttributeKind::Hex { min, max } => write!(f, "HEX [0x{:X}..0x{:X}]", min, max),
            AttributeKind::Float { min, max } => write!(f, "FLOAT [{}..{}]", min, max),
            AttributeKind::String => write!(f, "STRING"),
            AttributeKind::Enumeration { choices } => write!(f, "ENUM {}", choices.join(", ")),
        }
    }
}

/// A typed attribute value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeData {
    Integer(i64),
    Float(f64),
    String(String),
    /// Label of the selected enumeration choice
    Enumeration(String),
}

impl AttributeData {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            AttributeData::Integer(v) => Some(*v),
            AttributeData::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeData::Integer(v) => write!(f, "{}", v),
            AttributeData::Float(v) => write!(f, "{}", v),
            AttributeData::String(s) | AttributeData::Enumeration(s) => write!(f, "{}", s),
        }
    }
}

/// A `BA_DEF_` declaration with its resolved default
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeDefinition {
    pub name: String,
    pub scope: AttributeScope,
    pub kind: AttributeKind,
    pub default: AttributeData,
}

/// Entity an attribute value or comment is attached to
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "scope", content = "target", rename_all = "snake_case")]
pub enum AttributeTarget {
    Global,
    Node(String),
    Message(u32),
    Signal { message_id: u32, signal: String },
}

impl AttributeTarget {
    pub fn scope(&self) -> AttributeScope {
        match self {
            AttributeTarget::Global => AttributeScope::Global,
            AttributeTarget::Node(_) => AttributeScope::Node,
            AttributeTarget::Message(_) => AttributeScope::Message,
            AttributeTarget::Signal { .. } => AttributeScope::Signal,
        }
    }
}

impl fmt::Display for AttributeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeTarget::Global => write!(f, "network"),
            AttributeTarget::Node(name) => write!(f, "node {}", name),
            AttributeTarget::Message(id) => write!(f, "message {}", id),
            AttributeTarget::Signal { message_id, signal } => {
                write!(f, "signal {}.{}", message_id, signal)
            }
        }
    }
}

/// A validated `BA_` assignment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeValue {
    /// Name of the attribute definition
    pub name: String,
    pub target: AttributeTarget,
    pub value: AttributeData,
}

/// A named, reusable `VAL_TABLE_`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueTable {
    pub name: String,
    pub entries: BTreeMap<i64, String>,
}

/// The complete converted network
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Model {
    pub version: Option<String>,
    /// Network-level comment
    pub comment: Option<String>,
    /// Declaration order
    pub nodes: Vec<Node>,
    /// Sorted by id
    pub messages: Vec<Message>,
    /// Declaration order
    pub value_tables: Vec<ValueTable>,
    /// Declaration order
    pub attribute_definitions: Vec<AttributeDefinition>,
    /// Sorted by target, then attribute name
    pub attribute_values: Vec<AttributeValue>,
}

impl Model {
    pub fn message(&self, id: u32) -> Option<&Message> {
        self.messages
            .binary_search_by_key(&id, |m| m.id)
            .ok()
            .map(|idx| &self.messages[idx])
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn attribute_definition(&self, name: &str) -> Option<&AttributeDefinition> {
        self.attribute_definitions.iter().find(|d| d.name == name)
    }

    /// All attribute values attached to `target`, in name order
    pub fn attributes_for(
        &self,
        target: &AttributeTarget,
    ) -> impl Iterator<Item = &AttributeValue> + '_ {
        let target = target.clone();
        self.attribute_values
            .iter()
            .filter(move |a| a.target == target)
    }

    /// Iterates every signal together with its message
    pub fn signals(&self) -> impl Iterator<Item = (&Message, &Signal)> {
        self.messages
            .iter()
            .flat_map(|m| m.signals.iter().map(move |s| (m, s)))
    }

    pub fn stats(&self) -> ModelStats {
        ModelStats {
            num_nodes: self.nodes.len(),
            num_messages: self.messages.len(),
            num_signals: self.messages.iter().map(|m| m.signals.len()).sum(),
            num_attributes: self.attribute_values.len(),
            num_value_tables: self.value_tables.len(),
        }
    }
}

/// Model statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelStats {
    pub num_nodes: usize,
    pub num_messages: usize,
    pub num_signals: usize,
    pub num_attributes: usize,
    pub num_value_tables: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_extended_id() {
        assert_eq!(Message::split_id(0x123), (0x123, false));
        assert_eq!(Message::split_id(0x8000_0400), (0x400, true));
    }

    #[test]
    fn test_attribute_target_ordering() {
        let mut targets = vec![
            AttributeTarget::Signal {
                message_id: 1,
                signal: "A".to_string(),
            },
            AttributeTarget::Message(7),
            AttributeTarget::Node("ECU".to_string()),
            AttributeTarget::Global,
            AttributeTarget::Message(3),
        ];
        targets.sort();
        assert_eq!(targets[0], AttributeTarget::Global);
        assert_eq!(targets[2], AttributeTarget::Message(3));
        assert_eq!(targets[4].scope(), AttributeScope::Signal);
    }

    #[test]
    fn test_multiplex_role_accessors() {
        let role = MultiplexRole::MultiplexedMultiplexor {
            multiplexor: "Mode".to_string(),
            switch_values: vec![1, 2],
        };
        assert!(role.is_multiplexor());
        assert_eq!(role.multiplexor(), Some("Mode"));
        assert_eq!(role.switch_values(), &[1, 2]);
        assert!(MultiplexRole::Multiplexor.switch_values().is_empty());
    }

    #[test]
    fn test_attribute_lookup_outlives_target() {
        let model = Model {
            version: None,
            comment: None,
            nodes: Vec::new(),
            messages: Vec::new(),
            value_tables: Vec::new(),
            attribute_definitions: Vec::new(),
            attribute_values: vec![AttributeValue {
                name: "GenSigStartValue".to_string(),
                target: AttributeTarget::Signal {
                    message_id: 100,
                    signal: "Speed".to_string(),
                },
                value: AttributeData::Float(12.5),
            }],
        };
        let found = model
            .attributes_for(&AttributeTarget::Signal {
                message_id: 100,
                signal: "Speed".to_string(),
            })
            .next();
        assert_eq!(found.map(|a| a.name.as_str()), Some("GenSigStartValue"));
        assert_eq!(model.attributes_for(&AttributeTarget::Global).count(), 0);
    }

    #[test]
    fn test_attribute_data_display() {
        assert_eq!(AttributeData::Integer(20).to_string(), "20");
        assert_eq!(AttributeData::Float(0.5).to_string(), "0.5");
        assert_eq!(AttributeData::Enumeration("Cyclic".into()).to_string(), "Cyclic");
        assert_eq!(
            AttributeKind::Hex { min: 0, max: 255 }.to_string(),
            "HEX [0x0..0xFF]"
        );
    }
}
