//! Error and diagnostic types for the DBC parser
//!
//! Problems come in two classes. Fatal problems abort the conversion and are
//! returned as a [`ConversionError`]. Recoverable problems are collected as
//! [`Diagnostic`]s: the offending record is skipped, a warning is logged, and
//! the pipeline keeps going.

use serde::Serialize;
use std::path::PathBuf;

/// Result type for parser operations
pub type Result<T> = std::result::Result<T, ConversionError>;

/// Raised by the tokenizer when a quoted string is still open at end of file
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unterminated quoted string starting on line {line}")]
pub struct MalformedTokenError {
    /// Physical line on which the string was opened
    pub line: usize,
}

/// Fatal errors that stop a conversion
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Failed to read DBC file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("DBC file is not valid {encoding}: {reason}")]
    Encoding {
        encoding: &'static str,
        reason: String,
    },

    #[error("Malformed DBC token stream: {0}")]
    MalformedToken(#[from] MalformedTokenError),

    #[error("No messages could be parsed ({} warning(s) raised)", .diagnostics.len())]
    NoMessages { diagnostics: Vec<Diagnostic> },
}

impl ConversionError {
    /// Recoverable diagnostics gathered before the failure, if any
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            ConversionError::NoMessages { diagnostics } => diagnostics,
            _ => &[],
        }
    }
}

/// A recoverable problem found while parsing or resolving a DBC file
///
/// Every variant carries the line on which the offending record starts.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    #[error("line {line}: skipped unrecognized keyword `{keyword}`")]
    UnknownKeyword { line: usize, keyword: String },

    #[error("line {line}: malformed {keyword} record: {reason}")]
    MalformedRecord {
        line: usize,
        keyword: String,
        reason: String,
    },

    #[error("line {line}: signal `{signal}` references undeclared message {}", display_id(.message_id))]
    UnknownMessage {
        line: usize,
        message_id: Option<u32>,
        signal: String,
    },

    #[error("line {line}: multiplexed signal `{signal}` in message {message_id} has no multiplexor{}", display_name(.multiplexor))]
    UnknownMultiplexor {
        line: usize,
        message_id: u32,
        signal: String,
        multiplexor: Option<String>,
    },

    #[error("line {line}: node `{node}` referenced by {referenced_by} is not declared in BU_")]
    UnresolvedNode {
        line: usize,
        node: String,
        referenced_by: String,
    },

    #[error("line {line}: {keyword} target {target} does not exist")]
    UnresolvedTarget {
        line: usize,
        keyword: String,
        target: String,
    },

    #[error("line {line}: value table `{table}` is not defined")]
    UnknownValueTable { line: usize, table: String },

    #[error("line {line}: attribute `{name}` has no BA_DEF_ definition")]
    UnknownAttribute { line: usize, name: String },

    #[error("line {line}: attribute `{name}` is defined for {expected} but assigned to {found}")]
    AttributeScopeMismatch {
        line: usize,
        name: String,
        expected: String,
        found: String,
    },

    #[error("line {line}: invalid value {value} for attribute `{name}` on {target} ({reason}), using default")]
    InvalidAttributeValue {
        line: usize,
        name: String,
        target: String,
        value: String,
        reason: String,
    },

    #[error("line {line}: duplicate {what} `{name}` ignored")]
    Duplicate {
        line: usize,
        what: &'static str,
        name: String,
    },
}

fn display_id(id: &Option<u32>) -> String {
    match id {
        Some(id) => id.to_string(),
        None => "<none>".to_string(),
    }
}

fn display_name(name: &Option<String>) -> String {
    match name {
        Some(name) => format!(" named `{}`", name),
        None => String::new(),
    }
}

impl Diagnostic {
    /// Line on which the offending record starts
    pub fn line(&self) -> usize {
        match self {
            Diagnostic::UnknownKeyword { line, .. }
            | Diagnostic::MalformedRecord { line, .. }
            | Diagnostic::UnknownMessage { line, .. }
            | Diagnostic::UnknownMultiplexor { line, .. }
            | Diagnostic::UnresolvedNode { line, .. }
            | Diagnostic::UnresolvedTarget { line, .. }
            | Diagnostic::UnknownValueTable { line, .. }
            | Diagnostic::UnknownAttribute { line, .. }
            | Diagnostic::AttributeScopeMismatch { line, .. }
            | Diagnostic::InvalidAttributeValue { line, .. }
            | Diagnostic::Duplicate { line, .. } => *line,
        }
    }
}

/// Collects diagnostics and logs each one as it is raised
#[derive(Debug, Default)]
pub(crate) struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub(crate) fn push(&mut self, diagnostic: Diagnostic) {
        log::warn!("{}", diagnostic);
        self.entries.push(diagnostic);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn into_vec(self) -> Vec<Diagnostic> {
        self.entries
    }
}
