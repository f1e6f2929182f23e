//! DBC text pipeline
//!
//! `tokenizer` → `records` → `resolver` → `builder`. Each stage consumes the
//! output of the previous one; only the tokenizer can fail fatally.

pub mod records;
pub mod tokenizer;

mod attributes;
mod builder;
mod resolver;

use crate::config::ParseConfig;
use crate::parser::Conversion;
use crate::types::Result;

/// Runs the whole pipeline over already decoded text
pub(crate) fn convert(text: &str, config: &ParseConfig) -> Result<Conversion> {
    let records = records::parse_records(text)?;
    let network = resolver::resolve(records, config);
    builder::build_model(network, config)
}
