//! Main parser API
//!
//! [`DbcParser`] is the entry point of the library: it reads a DBC file,
//! decodes its text and runs the conversion pipeline, returning the model
//! together with every recoverable problem found along the way.

use crate::config::{ParseConfig, TextEncoding};
use crate::model::Model;
use crate::types::{ConversionError, Diagnostic, Result};
use std::path::Path;

const BOM: char = '\u{feff}';

/// Result of a successful conversion
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub model: Model,
    /// Recoverable problems in the order they were found
    pub diagnostics: Vec<Diagnostic>,
}

impl Conversion {
    pub fn has_warnings(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

/// The DBC parser - entry point for all conversions
#[derive(Debug, Clone, Default)]
pub struct DbcParser {
    config: ParseConfig,
}

impl DbcParser {
    /// Create a parser with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ParseConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ParseConfig {
        &self.config
    }

    /// Read and convert a DBC file
    ///
    /// # Example
    /// ```no_run
    /// use dbc2xlsx_core::DbcParser;
    /// use std::path::Path;
    ///
    /// let conversion = DbcParser::new().parse_file(Path::new("powertrain.dbc")).unwrap();
    /// println!("{} messages", conversion.model.messages.len());
    /// ```
    pub fn parse_file(&self, path: &Path) -> Result<Conversion> {
        log::info!("Parsing DBC file: {:?}", path);

        let bytes = std::fs::read(path).map_err(|source| ConversionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let text = decode_text(bytes, self.config.encoding)?;
        let conversion = self.parse_str(&text)?;

        log::info!(
            "Parsed {} messages from {:?} ({} warnings)",
            conversion.model.messages.len(),
            path,
            conversion.diagnostics.len()
        );
        Ok(conversion)
    }

    /// Convert DBC text that is already in memory
    pub fn parse_str(&self, text: &str) -> Result<Conversion> {
        let text = text.strip_prefix(BOM).unwrap_or(text);
        crate::dbc::convert(text, &self.config)
    }
}

/// Decodes raw file bytes according to `encoding`
fn decode_text(bytes: Vec<u8>, encoding: TextEncoding) -> Result<String> {
    match encoding {
        TextEncoding::Utf8 => String::from_utf8(bytes).map_err(|e| ConversionError::Encoding {
            encoding: encoding.as_str(),
            reason: e.to_string(),
        }),
        TextEncoding::Latin1 => Ok(latin1(&bytes)),
        TextEncoding::Auto => String::from_utf8(bytes).or_else(|e| {
            // Latin-1 maps every byte, so this cannot fail
            log::warn!("DBC file is not UTF-8 ({}), decoding it as Latin-1", e.utf8_error());
            Ok(latin1(e.as_bytes()))
        }),
    }
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
