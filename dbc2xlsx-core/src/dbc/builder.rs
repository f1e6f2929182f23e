//! Model builder
//!
//! Final pipeline stage: expands named value tables, derives per-message
//! cycle times and emits the sorted, immutable [`Model`].

use super::resolver::{ResolvedMessage, ResolvedNetwork, ResolvedSignal, SignalLabels};
use crate::config::ParseConfig;
use crate::model::{
    AttributeData, AttributeScope, AttributeTarget, AttributeValue, Message, Model, Node, Signal,
    ValueTable,
};
use crate::parser::Conversion;
use crate::types::{ConversionError, Result};
use std::collections::{BTreeMap, HashMap};

/// Builds the model, failing when not a single message survived
pub(crate) fn build_model(network: ResolvedNetwork, config: &ParseConfig) -> Result<Conversion> {
    let ResolvedNetwork {
        version,
        comment,
        nodes,
        messages,
        value_tables,
        attribute_definitions,
        attribute_values,
        diagnostics,
    } = network;

    if messages.is_empty() {
        return Err(ConversionError::NoMessages {
            diagnostics: diagnostics.into_vec(),
        });
    }

    let cycle_time_default = attribute_definitions
        .iter()
        .find(|d| d.name == config.cycle_time_attribute && d.scope == AttributeScope::Message)
        .and_then(|d| d.default.as_integer());

    let mut messages: Vec<Message> = {
        let tables: HashMap<&str, &ValueTable> =
            value_tables.iter().map(|t| (t.name.as_str(), t)).collect();
        messages
            .into_iter()
            .map(|message| {
                let key = (
                    AttributeTarget::Message(message.id),
                    config.cycle_time_attribute.clone(),
                );
                let cycle_time_ms = attribute_values
                    .get(&key)
                    .and_then(AttributeData::as_integer)
                    .or(cycle_time_default)
                    // 0 means "not sent cyclically"
                    .filter(|ms| *ms > 0);
                build_message(message, cycle_time_ms, &tables)
            })
            .collect()
    };
    messages.sort_by_key(|m| m.id);

    let nodes = nodes
        .into_iter()
        .map(|node| Node {
            comment: clean_comment(node.comment),
            ..node
        })
        .collect();

    // BTreeMap iteration is already ordered by (target, name)
    let attribute_values = attribute_values
        .into_iter()
        .map(|((target, name), value)| AttributeValue {
            name,
            target,
            value,
        })
        .collect();

    let model = Model {
        version: version.filter(|v| !v.is_empty()),
        comment: clean_comment(comment),
        nodes,
        messages,
        value_tables,
        attribute_definitions,
        attribute_values,
    };

    Ok(Conversion {
        model,
        diagnostics: diagnostics.into_vec(),
    })
}

fn build_message(
    message: ResolvedMessage,
    cycle_time_ms: Option<i64>,
    tables: &HashMap<&str, &ValueTable>,
) -> Message {
    let (frame_id, is_extended) = Message::split_id(message.id);
    let mut signals: Vec<Signal> = message
        .signals
        .into_iter()
        .map(|signal| build_signal(signal, tables))
        .collect();
    signals.sort_by(|a, b| {
        a.start_bit
            .cmp(&b.start_bit)
            .then_with(|| a.name.cmp(&b.name))
    });

    Message {
        id: message.id,
        frame_id,
        is_extended,
        name: message.name,
        dlc: message.dlc,
        senders: message.senders,
        cycle_time_ms,
        comment: clean_comment(message.comment),
        signals,
    }
}

fn build_signal(signal: ResolvedSignal, tables: &HashMap<&str, &ValueTable>) -> Signal {
    let (value_table, value_table_name) = match signal.labels {
        Some(SignalLabels::Inline(entries)) => (entries, None),
        Some(SignalLabels::Table(name)) => {
            let entries = tables
                .get(name.as_str())
                .map(|t| t.entries.clone())
                .unwrap_or_default();
            (entries, Some(name))
        }
        None => (BTreeMap::new(), None),
    };

    let record = signal.record;
    Signal {
        name: record.name,
        start_bit: record.start_bit,
        length: record.length,
        byte_order: record.byte_order,
        is_signed: record.is_signed,
        value_type: signal.value_type,
        factor: record.factor,
        offset: record.offset,
        minimum: record.minimum,
        maximum: record.maximum,
        unit: Some(record.unit).filter(|u| !u.is_empty()),
        receivers: record.receivers,
        multiplexing: signal.multiplexing,
        value_table,
        value_table_name,
        comment: clean_comment(signal.comment),
    }
}

/// Trims surrounding whitespace; blank comments become `None`
fn clean_comment(comment: Option<String>) -> Option<String> {
    comment
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbc::records::parse_records;
    use crate::dbc::resolver::resolve;

    fn build(text: &str) -> Result<Conversion> {
        let config = ParseConfig::default();
        build_model(resolve(parse_records(text).unwrap(), &config), &config)
    }

    #[test]
    fn test_messages_and_signals_are_sorted() {
        let conversion = build(
            "BO_ 300 C: 8 Vector__XXX\n \
             SG_ Z : 16|8@1+ (1,0) [0|0] \"\" Vector__XXX\n \
             SG_ B : 0|8@1+ (1,0) [0|0] \"\" Vector__XXX\n \
             SG_ A : 0|4@1+ (1,0) [0|0] \"\" Vector__XXX\n\
             BO_ 2147483748 Ext: 8 Vector__XXX\n\
             BO_ 100 A: 8 Vector__XXX\n",
        )
        .unwrap();
        let ids: Vec<u32> = conversion.model.messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![100, 300, 0x8000_0064]);

        let ext = &conversion.model.messages[2];
        assert_eq!(ext.frame_id, 100);
        assert!(ext.is_extended);

        let names: Vec<&str> = conversion.model.messages[1]
            .signals
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["A", "B", "Z"]);
    }

    #[test]
    fn test_cycle_time_falls_back_to_default() {
        let conversion = build(
            "BO_ 100 A: 8 Vector__XXX\n\
             BO_ 200 B: 8 Vector__XXX\n\
             BO_ 300 C: 8 Vector__XXX\n\
             BA_DEF_ BO_ \"GenMsgCycleTime\" INT 0 10000;\n\
             BA_DEF_DEF_ \"GenMsgCycleTime\" 100;\n\
             BA_ \"GenMsgCycleTime\" BO_ 100 20;\n\
             BA_ \"GenMsgCycleTime\" BO_ 200 20000;\n",
        )
        .unwrap();
        let cycle: Vec<Option<i64>> = conversion
            .model
            .messages
            .iter()
            .map(|m| m.cycle_time_ms)
            .collect();
        assert_eq!(cycle, vec![Some(20), Some(100), Some(100)]);
        assert_eq!(conversion.diagnostics.len(), 1);
    }

    #[test]
    fn test_zero_cycle_time_is_none() {
        let conversion = build(
            "BO_ 100 A: 8 Vector__XXX\n\
             BA_DEF_ BO_ \"GenMsgCycleTime\" INT 0 0;\n",
        )
        .unwrap();
        assert_eq!(conversion.model.messages[0].cycle_time_ms, None);
    }

    #[test]
    fn test_named_table_is_expanded() {
        let conversion = build(
            "VAL_TABLE_ Gear 0 \"P\" 1 \"R\" 2 \"N\" 3 \"D\";\n\
             BO_ 100 A: 8 Vector__XXX\n \
             SG_ GearPos : 0|2@1+ (1,0) [0|3] \"\" Vector__XXX\n\
             VAL_ 100 GearPos Gear;\n",
        )
        .unwrap();
        let signal = &conversion.model.messages[0].signals[0];
        assert_eq!(signal.value_table.len(), 4);
        assert_eq!(signal.value_table.get(&3).map(String::as_str), Some("D"));
        assert_eq!(signal.value_table_name.as_deref(), Some("Gear"));
        assert_eq!(signal.unit, None);
    }

    #[test]
    fn test_no_messages_is_fatal() {
        let err = build("VERSION \"1.0\"\nBU_: ECU1\nBO_ x Broken: 8 ECU1\n").unwrap_err();
        match err {
            ConversionError::NoMessages { diagnostics } => assert_eq!(diagnostics.len(), 1),
            other => panic!("expected NoMessages, got {:?}", other),
        }
    }

    #[test]
    fn test_comments_are_trimmed() {
        let conversion = build(
            "CM_ \"  network notes \n\";\n\
             BO_ 100 A: 8 Vector__XXX\n\
             CM_ BO_ 100 \"   \";\n",
        )
        .unwrap();
        assert_eq!(conversion.model.comment.as_deref(), Some("network notes"));
        assert_eq!(conversion.model.messages[0].comment, None);
    }
}
