//! Symbol resolver
//!
//! Takes the records accumulated by the section parser and links them into a
//! consistency-checked network. Structural entities (nodes, messages,
//! signals) are placed first so that comments, value descriptions and
//! attributes can reference them regardless of where they appear in the
//! file.

use super::attributes::{coerce, definition_kind, implicit_default};
use super::records::{
    MessageRecord, MultiplexMarker, RawAttributeKind, RawValue, Record, RecordEntry, RecordSet,
    SignalRecord, ValueDescriptions,
};
use crate::config::ParseConfig;
use crate::model::{
    AttributeData, AttributeDefinition, AttributeScope, AttributeTarget, MultiplexRole, Node,
    SignalValueType, ValueTable,
};
use crate::types::{Diagnostic, Diagnostics};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Labels attached to a signal; named tables are expanded by the builder
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SignalLabels {
    Inline(BTreeMap<i64, String>),
    Table(String),
}

#[derive(Debug, Clone)]
pub(crate) struct ResolvedSignal {
    pub line: usize,
    pub record: SignalRecord,
    pub multiplexing: Option<MultiplexRole>,
    pub value_type: SignalValueType,
    pub labels: Option<SignalLabels>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct ResolvedMessage {
    pub line: usize,
    pub id: u32,
    pub name: String,
    pub dlc: u32,
    pub senders: Vec<String>,
    pub comment: Option<String>,
    pub signals: Vec<ResolvedSignal>,
}

/// Output of the resolver, in declaration order
#[derive(Debug)]
pub(crate) struct ResolvedNetwork {
    pub version: Option<String>,
    pub comment: Option<String>,
    pub nodes: Vec<Node>,
    pub messages: Vec<ResolvedMessage>,
    pub value_tables: Vec<ValueTable>,
    pub attribute_definitions: Vec<AttributeDefinition>,
    /// Keyed by target and attribute name; a later assignment replaces an earlier one
    pub attribute_values: BTreeMap<(AttributeTarget, String), AttributeData>,
    pub diagnostics: Diagnostics,
}

/// Records that can only be resolved once every node and message is known
#[derive(Default)]
struct Deferred {
    messages: Vec<(usize, MessageRecord)>,
    signals: Vec<(usize, SignalRecord)>,
    transmitters: Vec<(usize, u32, Vec<String>)>,
    multiplexing: Vec<(usize, u32, String, String, Vec<(u64, u64)>)>,
    value_types: Vec<(usize, u32, String, u32)>,
    comments: Vec<(usize, AttributeTarget, String)>,
    descriptions: Vec<(usize, u32, String, ValueDescriptions)>,
    definitions: Vec<(usize, AttributeScope, String, RawAttributeKind)>,
    defaults: Vec<(usize, String, RawValue)>,
    values: Vec<(usize, String, AttributeTarget, RawValue)>,
}

struct Resolver<'c> {
    config: &'c ParseConfig,
    net: ResolvedNetwork,
    node_index: HashMap<String, usize>,
    message_index: HashMap<u32, usize>,
    /// `BO_` line to message index
    message_lines: HashMap<usize, usize>,
    /// `BO_` lines dropped as duplicates, with the dropped message's name
    rejected_messages: HashMap<usize, String>,
    table_index: HashMap<String, usize>,
    definition_index: HashMap<String, usize>,
}

/// Resolves every cross reference in `set`
pub(crate) fn resolve(set: RecordSet, config: &ParseConfig) -> ResolvedNetwork {
    let RecordSet {
        entries,
        diagnostics,
    } = set;
    let mut resolver = Resolver::new(config, diagnostics);
    let mut deferred = Deferred::default();

    for RecordEntry { line, record } in entries {
        match record {
            Record::Version(version) => resolver.net.version = Some(version),
            Record::Nodes(names) => resolver.add_nodes(line, names),
            Record::ValueTable { name, entries } => resolver.add_value_table(line, name, entries),
            Record::Message(message) => deferred.messages.push((line, message)),
            Record::Signal(signal) => deferred.signals.push((line, signal)),
            Record::MessageTransmitters {
                message_id,
                transmitters,
            } => deferred.transmitters.push((line, message_id, transmitters)),
            Record::ExtendedMultiplexing {
                message_id,
                signal,
                multiplexor,
                ranges,
            } => deferred
                .multiplexing
                .push((line, message_id, signal, multiplexor, ranges)),
            Record::SignalValueType {
                message_id,
                signal,
                value_type,
            } => deferred.value_types.push((line, message_id, signal, value_type)),
            Record::Comment { target, text } => deferred.comments.push((line, target, text)),
            Record::ValueDescription {
                message_id,
                signal,
                values,
            } => deferred.descriptions.push((line, message_id, signal, values)),
            Record::AttributeDefinition { scope, name, kind } => {
                deferred.definitions.push((line, scope, name, kind))
            }
            Record::AttributeDefault { name, value } => deferred.defaults.push((line, name, value)),
            Record::AttributeValue {
                name,
                target,
                value,
            } => deferred.values.push((line, name, target, value)),
            Record::Ignored(_) | Record::Skipped(_) => {}
        }
    }

    for (line, message) in deferred.messages {
        resolver.add_message(line, message);
    }
    for (line, signal) in deferred.signals {
        resolver.add_signal(line, signal);
    }
    resolver.add_transmitters(deferred.transmitters);
    resolver.resolve_multiplexing(deferred.multiplexing);
    resolver.apply_value_types(deferred.value_types);
    resolver.attach_comments(deferred.comments);
    resolver.attach_value_descriptions(deferred.descriptions);
    resolver.add_attribute_definitions(deferred.definitions);
    resolver.apply_attribute_defaults(deferred.defaults);
    resolver.assign_attribute_values(deferred.values);

    log::debug!(
        "Resolved {} nodes, {} messages, {} attribute values",
        resolver.net.nodes.len(),
        resolver.net.messages.len(),
        resolver.net.attribute_values.len()
    );
    resolver.net
}

impl<'c> Resolver<'c> {
    fn new(config: &'c ParseConfig, diagnostics: Diagnostics) -> Self {
        Self {
            config,
            net: ResolvedNetwork {
                version: None,
                comment: None,
                nodes: Vec::new(),
                messages: Vec::new(),
                value_tables: Vec::new(),
                attribute_definitions: Vec::new(),
                attribute_values: BTreeMap::new(),
                diagnostics,
            },
            node_index: HashMap::new(),
            message_index: HashMap::new(),
            message_lines: HashMap::new(),
            rejected_messages: HashMap::new(),
            table_index: HashMap::new(),
            definition_index: HashMap::new(),
        }
    }

    fn report(&mut self, diagnostic: Diagnostic) {
        self.net.diagnostics.push(diagnostic);
    }

    fn unresolved(&mut self, line: usize, keyword: &str, target: impl ToString) {
        self.report(Diagnostic::UnresolvedTarget {
            line,
            keyword: keyword.to_string(),
            target: target.to_string(),
        });
    }

    /// Undeclared nodes are reported but kept in the model
    fn check_node(&mut self, line: usize, node: &str, referenced_by: String) {
        if !self.node_index.contains_key(node) {
            self.report(Diagnostic::UnresolvedNode {
                line,
                node: node.to_string(),
                referenced_by,
            });
        }
    }

    fn find_signal_mut(&mut self, message_id: u32, name: &str) -> Option<&mut ResolvedSignal> {
        let idx = *self.message_index.get(&message_id)?;
        self.net.messages[idx]
            .signals
            .iter_mut()
            .find(|s| s.record.name == name)
    }

    fn target_exists(&self, target: &AttributeTarget) -> bool {
        match target {
            AttributeTarget::Global => true,
            AttributeTarget::Node(name) => self.node_index.contains_key(name),
            AttributeTarget::Message(id) => self.message_index.contains_key(id),
            AttributeTarget::Signal { message_id, signal } => self
                .message_index
                .get(message_id)
                .map_or(false, |&idx| {
                    self.net.messages[idx]
                        .signals
                        .iter()
                        .any(|s| s.record.name == *signal)
                }),
        }
    }

    fn add_nodes(&mut self, line: usize, names: Vec<String>) {
        for name in names {
            if self.config.is_placeholder(&name) {
                continue;
            }
            if self.node_index.contains_key(&name) {
                self.report(Diagnostic::Duplicate {
                    line,
                    what: "node",
                    name,
                });
                continue;
            }
            self.node_index.insert(name.clone(), self.net.nodes.len());
            self.net.nodes.push(Node {
                name,
                comment: None,
            });
        }
    }

    fn add_value_table(&mut self, line: usize, name: String, entries: Vec<(i64, String)>) {
        if self.table_index.contains_key(&name) {
            self.report(Diagnostic::Duplicate {
                line,
                what: "value table",
                name,
            });
            return;
        }
        self.table_index.insert(name.clone(), self.net.value_tables.len());
        self.net.value_tables.push(ValueTable {
            name,
            entries: entries.into_iter().collect(),
        });
    }

    fn add_message(&mut self, line: usize, message: MessageRecord) {
        if self.message_index.contains_key(&message.id) {
            self.report(Diagnostic::Duplicate {
                line,
                what: "message",
                name: format!("{} ({})", message.name, message.id),
            });
            self.rejected_messages.insert(line, message.name);
            return;
        }

        let mut senders = Vec::new();
        if let Some(sender) = message.sender {
            if !self.config.is_placeholder(&sender) {
                self.check_node(line, &sender, format!("message {}", message.name));
                senders.push(sender);
            }
        }

        self.message_index.insert(message.id, self.net.messages.len());
        self.message_lines.insert(line, self.net.messages.len());
        self.net.messages.push(ResolvedMessage {
            line,
            id: message.id,
            name: message.name,
            dlc: message.dlc,
            senders,
            comment: None,
            signals: Vec::new(),
        });
    }

    fn add_signal(&mut self, line: usize, mut signal: SignalRecord) {
        let owner = signal.message_line;
        let idx = match owner.and_then(|l| self.message_lines.get(&l).copied()) {
            Some(idx) => idx,
            None => {
                let rejected = owner.and_then(|l| self.rejected_messages.get(&l)).cloned();
                let diagnostic = match rejected {
                    // Signals of a dropped duplicate go with it
                    Some(message_name) => Diagnostic::Duplicate {
                        line,
                        what: "message signal",
                        name: format!("{}.{}", message_name, signal.name),
                    },
                    None => Diagnostic::UnknownMessage {
                        line,
                        message_id: signal.message_id,
                        signal: signal.name,
                    },
                };
                self.report(diagnostic);
                return;
            }
        };

        let message_name = self.net.messages[idx].name.clone();
        if self.net.messages[idx]
            .signals
            .iter()
            .any(|s| s.record.name == signal.name)
        {
            self.report(Diagnostic::Duplicate {
                line,
                what: "signal",
                name: format!("{}.{}", message_name, signal.name),
            });
            return;
        }

        let mut receivers: Vec<String> = Vec::new();
        for receiver in std::mem::take(&mut signal.receivers) {
            if !self.config.is_placeholder(&receiver) && !receivers.contains(&receiver) {
                receivers.push(receiver);
            }
        }
        for receiver in &receivers {
            self.check_node(
                line,
                receiver,
                format!("signal {}.{}", message_name, signal.name),
            );
        }
        signal.receivers = receivers;

        self.net.messages[idx].signals.push(ResolvedSignal {
            line,
            record: signal,
            multiplexing: None,
            value_type: SignalValueType::Integer,
            labels: None,
            comment: None,
        });
    }

    fn add_transmitters(&mut self, transmitters: Vec<(usize, u32, Vec<String>)>) {
        for (line, message_id, names) in transmitters {
            let idx = match self.message_index.get(&message_id) {
                Some(&idx) => idx,
                None => {
                    self.unresolved(line, "BO_TX_BU_", AttributeTarget::Message(message_id));
                    continue;
                }
            };
            let message_name = self.net.messages[idx].name.clone();
            for name in names {
                if self.config.is_placeholder(&name) {
                    continue;
                }
                self.check_node(line, &name, format!("message {}", message_name));
                let senders = &mut self.net.messages[idx].senders;
                if !senders.contains(&name) {
                    senders.push(name);
                }
            }
        }
    }

    /// Links every `mN` signal to its selector. The selector comes from an
    /// `SG_MUL_VAL_` entry when there is one, otherwise it is the message's
    /// `M` signal. Signals whose selector cannot be found are dropped.
    fn resolve_multiplexing(&mut self, entries: Vec<(usize, u32, String, String, Vec<(u64, u64)>)>) {
        let mut extended: HashMap<(u32, String), (String, Vec<(u64, u64)>)> = HashMap::new();
        for (line, message_id, signal, multiplexor, ranges) in entries {
            if self.find_signal_mut(message_id, &signal).is_none() {
                self.unresolved(
                    line,
                    "SG_MUL_VAL_",
                    AttributeTarget::Signal { message_id, signal },
                );
                continue;
            }
            extended.insert((message_id, signal), (multiplexor, ranges));
        }

        for message in &mut self.net.messages {
            let message_id = message.id;
            let default_selector = message
                .signals
                .iter()
                .find(|s| s.record.multiplexer == Some(MultiplexMarker::Multiplexor))
                .map(|s| s.record.name.clone());
            let selector_of = |name: &str| -> Option<String> {
                extended
                    .get(&(message_id, name.to_string()))
                    .map(|(mux, _)| mux.clone())
                    .or_else(|| default_selector.clone())
            };

            // Dropping an `mNM` signal can orphan the signals it switches
            let mut dropped: HashSet<String> = HashSet::new();
            loop {
                let selectors: HashSet<&str> = message
                    .signals
                    .iter()
                    .filter(|s| !dropped.contains(&s.record.name))
                    .filter(|s| s.record.multiplexer.map_or(false, |m| m.is_multiplexor()))
                    .map(|s| s.record.name.as_str())
                    .collect();

                let orphans: Vec<(usize, String, Option<String>)> = message
                    .signals
                    .iter()
                    .filter(|s| !dropped.contains(&s.record.name))
                    .filter(|s| {
                        s.record
                            .multiplexer
                            .map_or(false, |m| m.switch_value().is_some())
                    })
                    .filter_map(|s| {
                        let selector = selector_of(&s.record.name);
                        let found = selector.as_deref().map_or(false, |sel| {
                            sel != s.record.name && selectors.contains(sel)
                        });
                        (!found).then(|| (s.line, s.record.name.clone(), selector))
                    })
                    .collect();

                if orphans.is_empty() {
                    break;
                }
                for (line, signal, multiplexor) in orphans {
                    self.net.diagnostics.push(Diagnostic::UnknownMultiplexor {
                        line,
                        message_id,
                        signal: signal.clone(),
                        multiplexor,
                    });
                    dropped.insert(signal);
                }
            }

            message.signals.retain(|s| !dropped.contains(&s.record.name));

            for signal in &mut message.signals {
                let marker = match signal.record.multiplexer {
                    Some(marker) => marker,
                    None => continue,
                };
                let switch_value = match marker.switch_value() {
                    Some(value) => value,
                    None => {
                        signal.multiplexing = Some(MultiplexRole::Multiplexor);
                        continue;
                    }
                };
                let (multiplexor, switch_values) =
                    match extended.get(&(message_id, signal.record.name.clone())) {
                        Some((mux, ranges)) => (
                            mux.clone(),
                            ranges.iter().flat_map(|&(low, high)| low..=high).collect(),
                        ),
                        None => (
                            default_selector.clone().unwrap_or_default(),
                            vec![switch_value],
                        ),
                    };
                signal.multiplexing = Some(if marker.is_multiplexor() {
                    MultiplexRole::MultiplexedMultiplexor {
                        multiplexor,
                        switch_values,
                    }
                } else {
                    MultiplexRole::Multiplexed {
                        multiplexor,
                        switch_values,
                    }
                });
            }
        }
    }

    fn apply_value_types(&mut self, value_types: Vec<(usize, u32, String, u32)>) {
        for (line, message_id, signal, value_type) in value_types {
            let value_type = match value_type {
                1 => SignalValueType::Float32,
                2 => SignalValueType::Float64,
                _ => SignalValueType::Integer,
            };
            match self.find_signal_mut(message_id, &signal) {
                Some(resolved) => resolved.value_type = value_type,
                None => self.unresolved(
                    line,
                    "SIG_VALTYPE_",
                    AttributeTarget::Signal { message_id, signal },
                ),
            }
        }
    }

    fn attach_comments(&mut self, comments: Vec<(usize, AttributeTarget, String)>) {
        for (line, target, text) in comments {
            let attached = match &target {
                AttributeTarget::Global => {
                    self.net.comment = Some(text);
                    true
                }
                AttributeTarget::Node(name) => match self.node_index.get(name) {
                    Some(&idx) => {
                        self.net.nodes[idx].comment = Some(text);
                        true
                    }
                    None => false,
                },
                AttributeTarget::Message(id) => match self.message_index.get(id) {
                    Some(&idx) => {
                        self.net.messages[idx].comment = Some(text);
                        true
                    }
                    None => false,
                },
                AttributeTarget::Signal { message_id, signal } => {
                    match self.find_signal_mut(*message_id, signal) {
                        Some(resolved) => {
                            resolved.comment = Some(text);
                            true
                        }
                        None => false,
                    }
                }
            };
            if !attached {
                self.unresolved(line, "CM_", target);
            }
        }
    }

    fn attach_value_descriptions(
        &mut self,
        descriptions: Vec<(usize, u32, String, ValueDescriptions)>,
    ) {
        for (line, message_id, signal, values) in descriptions {
            let labels = match values {
                ValueDescriptions::Inline(pairs) => SignalLabels::Inline(pairs.into_iter().collect()),
                ValueDescriptions::Table(table) => {
                    if !self.table_index.contains_key(&table) {
                        self.report(Diagnostic::UnknownValueTable { line, table });
                        continue;
                    }
                    SignalLabels::Table(table)
                }
            };
            match self.find_signal_mut(message_id, &signal) {
                Some(resolved) => resolved.labels = Some(labels),
                None => self.unresolved(line, "VAL_", AttributeTarget::Signal { message_id, signal }),
            }
        }
    }

    fn add_attribute_definitions(
        &mut self,
        definitions: Vec<(usize, AttributeScope, String, RawAttributeKind)>,
    ) {
        for (line, scope, name, kind) in definitions {
            if self.definition_index.contains_key(&name) {
                self.report(Diagnostic::Duplicate {
                    line,
                    what: "attribute definition",
                    name,
                });
                continue;
            }
            let kind = definition_kind(kind);
            let default = implicit_default(&kind);
            self.definition_index
                .insert(name.clone(), self.net.attribute_definitions.len());
            self.net.attribute_definitions.push(AttributeDefinition {
                name,
                scope,
                kind,
                default,
            });
        }
    }

    fn apply_attribute_defaults(&mut self, defaults: Vec<(usize, String, RawValue)>) {
        for (line, name, value) in defaults {
            let idx = match self.definition_index.get(&name) {
                Some(&idx) => idx,
                None => {
                    self.report(Diagnostic::UnknownAttribute { line, name });
                    continue;
                }
            };
            let definition = &mut self.net.attribute_definitions[idx];
            match coerce(&definition.kind, &value) {
                Ok(data) => definition.default = data,
                Err(reason) => self.net.diagnostics.push(Diagnostic::InvalidAttributeValue {
                    line,
                    name,
                    target: "default".to_string(),
                    value: value.to_string(),
                    reason,
                }),
            }
        }
    }

    fn assign_attribute_values(&mut self, values: Vec<(usize, String, AttributeTarget, RawValue)>) {
        for (line, name, target, value) in values {
            let definition = match self.definition_index.get(&name) {
                Some(&idx) => self.net.attribute_definitions[idx].clone(),
                None => {
                    self.report(Diagnostic::UnknownAttribute { line, name });
                    continue;
                }
            };
            if definition.scope != target.scope() {
                self.report(Diagnostic::AttributeScopeMismatch {
                    line,
                    name,
                    expected: definition.scope.to_string(),
                    found: target.scope().to_string(),
                });
                continue;
            }
            if !self.target_exists(&target) {
                self.unresolved(line, "BA_", target);
                continue;
            }

            let data = match coerce(&definition.kind, &value) {
                Ok(data) => data,
                Err(reason) => {
                    self.report(Diagnostic::InvalidAttributeValue {
                        line,
                        name: name.clone(),
                        target: target.to_string(),
                        value: value.to_string(),
                        reason,
                    });
                    definition.default.clone()
                }
            };

            if let Some(previous) = self.net.attribute_values.insert((target, name), data) {
                log::debug!(
                    "line {}: attribute value replaces earlier value {}",
                    line,
                    previous
                );
            }
        }
    }
}
