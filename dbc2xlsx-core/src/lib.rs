//! DBC Conversion Library
//!
//! A stateless library that reads CAN network descriptions in the Vector DBC
//! format and turns them into a flat, sorted, serializable model.
//!
//! # Architecture
//!
//! The conversion is a four-stage pipeline:
//! - Tokenizer: raw text into logical lines of typed tokens
//! - Section parser: one interim record per DBC statement
//! - Symbol resolver: links signals, nodes, comments, value tables and
//!   attributes to what they reference, validating attribute values
//! - Model builder: expands value tables and emits the sorted [`Model`]
//!
//! Malformed statements never abort a conversion. They are skipped, logged
//! with `log::warn!` and returned as [`Diagnostic`]s next to the model. Only
//! unreadable input or an unterminated string is fatal, as is a file from
//! which no message could be recovered.
//!
//! The library does NOT write spreadsheets; that lives in the application
//! layer (dbc2xlsx-cli).
//!
//! # Example Usage
//!
//! ```no_run
//! use dbc2xlsx_core::{DbcParser, ParseConfig, TextEncoding};
//! use std::path::Path;
//!
//! let parser = DbcParser::with_config(ParseConfig::new().with_encoding(TextEncoding::Auto));
//! let conversion = parser.parse_file(Path::new("powertrain.dbc")).unwrap();
//!
//! for warning in &conversion.diagnostics {
//!     eprintln!("warning: {}", warning);
//! }
//! for (message, signal) in conversion.model.signals() {
//!     println!("{} {}", message.name, signal.name);
//! }
//! ```

// Public modules
pub mod config;
pub mod dbc;
pub mod model;
pub mod parser;
pub mod types;

// Re-export main types for convenience
pub use config::{ParseConfig, TextEncoding};
pub use model::{
    AttributeData, AttributeDefinition, AttributeKind, AttributeScope, AttributeTarget,
    AttributeValue, ByteOrder, Message, Model, ModelStats, MultiplexRole, Node, Signal,
    SignalValueType, ValueTable,
};
pub use parser::{Conversion, DbcParser};
pub use types::{ConversionError, Diagnostic, MalformedTokenError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
