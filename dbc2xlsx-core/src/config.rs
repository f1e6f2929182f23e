//! Parser configuration types
//!
//! The parser needs very little configuration. Everything presentation
//! related (workbook layout, column widths) belongs to the application layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How the raw bytes of a DBC file are decoded into text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TextEncoding {
    /// UTF-8, falling back to Latin-1 when the file is not valid UTF-8
    #[default]
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    #[serde(rename = "latin-1", alias = "latin1", alias = "cp1252")]
    Latin1,
}

impl TextEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextEncoding::Auto => "auto",
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Latin1 => "latin-1",
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TextEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "auto" => Ok(TextEncoding::Auto),
            "utf-8" | "utf8" => Ok(TextEncoding::Utf8),
            "latin-1" | "latin1" | "iso-8859-1" | "cp1252" => Ok(TextEncoding::Latin1),
            other => Err(format!(
                "unknown encoding `{}` (expected auto, utf-8 or latin-1)",
                other
            )),
        }
    }
}

/// Configuration for the DBC parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseConfig {
    /// Text encoding of the input file
    pub encoding: TextEncoding,

    /// Node name DBC editors write when a message or signal has no
    /// transmitter / receiver. Never listed as a node.
    pub placeholder_node: String,

    /// Message attribute that carries the cycle time in milliseconds
    pub cycle_time_attribute: String,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            encoding: TextEncoding::Auto,
            placeholder_node: default_placeholder_node(),
            cycle_time_attribute: default_cycle_time_attribute(),
        }
    }
}

fn default_placeholder_node() -> String {
    "Vector__XXX".to_string()
}

fn default_cycle_time_attribute() -> String {
    "GenMsgCycleTime".to_string()
}

impl ParseConfig {
    /// Create a new parser configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the input encoding
    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Builder method: set the placeholder node name
    pub fn with_placeholder_node(mut self, name: impl Into<String>) -> Self {
        self.placeholder_node = name.into();
        self
    }

    /// Builder method: set the attribute used for message cycle times
    pub fn with_cycle_time_attribute(mut self, name: impl Into<String>) -> Self {
        self.cycle_time_attribute = name.into();
        self
    }

    /// Check if `node` is the "no node" placeholder
    pub fn is_placeholder(&self, node: &str) -> bool {
        node == self.placeholder_node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_builder() {
        let config = ParseConfig::new()
            .with_encoding(TextEncoding::Latin1)
            .with_placeholder_node("NONE")
            .with_cycle_time_attribute("CycleTime");

        assert_eq!(config.encoding, TextEncoding::Latin1);
        assert!(config.is_placeholder("NONE"));
        assert!(!config.is_placeholder("Vector__XXX"));
        assert_eq!(config.cycle_time_attribute, "CycleTime");
    }

    #[test]
    fn test_defaults() {
        let config = ParseConfig::default();
        assert_eq!(config.encoding, TextEncoding::Auto);
        assert!(config.is_placeholder("Vector__XXX"));
        assert_eq!(config.cycle_time_attribute, "GenMsgCycleTime");
    }

    #[test]
    fn test_encoding_names() {
        assert_eq!("UTF8".parse::<TextEncoding>(), Ok(TextEncoding::Utf8));
        assert_eq!("latin_1".parse::<TextEncoding>(), Ok(TextEncoding::Latin1));
        assert_eq!("auto".parse::<TextEncoding>(), Ok(TextEncoding::Auto));
        assert!("ebcdic".parse::<TextEncoding>().is_err());
        assert_eq!(TextEncoding::Latin1.to_string(), "latin-1");
    }

    #[test]
    fn test_partial_config_deserializes() {
        let config: ParseConfig = serde_json::from_str(r#"{"encoding": "latin-1"}"#).unwrap();
        assert_eq!(config.encoding, TextEncoding::Latin1);
        assert_eq!(config.placeholder_node, "Vector__XXX");
    }
}
