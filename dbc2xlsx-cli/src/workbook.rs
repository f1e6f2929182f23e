//! Workbook generation
//!
//! Every sheet is first built as plain rows of [`Cell`]s from the model and
//! then written with `rust_xlsxwriter`. Keeping the two steps apart lets the
//! row layout be tested without opening a spreadsheet.

use crate::config::WorkbookConfig;
use dbc2xlsx_core::{AttributeTarget, Message, Model, Signal};
use rust_xlsxwriter::{Color, Format, FormatAlign, Workbook, Worksheet, XlsxError};
use std::path::Path;

/// Largest row index a worksheet can hold
const MAX_ROWS: usize = 1_048_576;

/// Longest string a worksheet cell accepts, in characters
const MAX_CELL_CHARS: usize = 32_767;

#[derive(Debug, thiserror::Error)]
pub enum WorkbookError {
    #[error("Failed to write workbook: {0}")]
    Xlsx(#[from] XlsxError),

    #[error("Sheet {sheet} would need {rows} rows, more than a worksheet can hold")]
    TooManyRows { sheet: &'static str, rows: usize },
}

/// A single spreadsheet cell
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    Empty,
}

impl Cell {
    fn text(value: impl Into<String>) -> Self {
        let mut value = value.into();
        if value.is_empty() {
            return Cell::Empty;
        }
        let chars = value.chars().count();
        if chars > MAX_CELL_CHARS {
            log::warn!(
                "Cell text of {} characters truncated to {}",
                chars,
                MAX_CELL_CHARS
            );
            value = value.chars().take(MAX_CELL_CHARS).collect();
        }
        Cell::Text(value)
    }

    fn number(value: impl Into<f64>) -> Self {
        Cell::Number(value.into())
    }

    fn optional_text(value: Option<&str>) -> Self {
        value.map_or(Cell::Empty, Cell::text)
    }

    fn yes_no(value: bool) -> Self {
        Cell::text(if value { "Yes" } else { "No" })
    }

    /// Width of the widest line, in characters
    fn display_width(&self) -> usize {
        match self {
            Cell::Text(s) => s.lines().map(|l| l.chars().count()).max().unwrap_or(0),
            Cell::Number(n) => n.to_string().len(),
            Cell::Empty => 0,
        }
    }
}

/// Rows of one worksheet, header excluded
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: &'static str,
    pub headers: &'static [&'static str],
    pub rows: Vec<Vec<Cell>>,
    /// Columns holding free text that should wrap
    pub wrap_columns: &'static [u16],
}

impl Sheet {
    /// Column widths estimated from content, clamped to the configured range
    pub fn column_widths(&self, config: &WorkbookConfig) -> Vec<f64> {
        self.headers
            .iter()
            .enumerate()
            .map(|(col, header)| {
                let content = self
                    .rows
                    .iter()
                    .filter_map(|row| row.get(col))
                    .map(Cell::display_width)
                    .max()
                    .unwrap_or(0);
                let width = content.max(header.chars().count()) as f64 + 2.0;
                width.clamp(config.min_column_width, config.max_column_width)
            })
            .collect()
    }
}

/// `key=value; ...` for every attribute attached to `target`
fn flatten_attributes(model: &Model, target: &AttributeTarget) -> Cell {
    let joined = model
        .attributes_for(target)
        .map(|a| format!("{}={}", a.name, a.value))
        .collect::<Vec<_>>()
        .join("; ");
    Cell::text(joined)
}

fn signal_target(message: &Message, signal: &Signal) -> AttributeTarget {
    AttributeTarget::Signal {
        message_id: message.id,
        signal: signal.name.clone(),
    }
}

pub fn messages_sheet(model: &Model) -> Sheet {
    let rows = model
        .messages
        .iter()
        .map(|m| {
            vec![
                Cell::text(m.name.as_str()),
                Cell::text(m.frame_id_hex()),
                Cell::number(m.frame_id),
                Cell::yes_no(m.is_extended),
                Cell::number(m.dlc),
                m.cycle_time_ms.map_or(Cell::Empty, |ms| Cell::Number(ms as f64)),
                Cell::text(m.senders.join(", ")),
                Cell::optional_text(m.comment.as_deref()),
                flatten_attributes(model, &AttributeTarget::Message(m.id)),
            ]
        })
        .collect();

    Sheet {
        name: "Messages",
        headers: &[
            "Message Name",
            "Frame ID (Hex)",
            "Frame ID (Dec)",
            "Extended Frame",
            "DLC/Length",
            "Cycle Time (ms)",
            "Senders (Origin Nodes)",
            "Comment",
            "Attributes (Key=Value; ...)",
        ],
        rows,
        wrap_columns: &[7, 8],
    }
}

pub fn signals_sheet(model: &Model) -> Sheet {
    let rows = model
        .signals()
        .map(|(m, s)| {
            let multiplexing = s.multiplexing.as_ref();
            let switch_values = multiplexing
                .map(|r| {
                    r.switch_values()
                        .iter()
                        .map(u64::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            let choices = s
                .value_table
                .iter()
                .map(|(value, label)| format!("{}={}", value, label))
                .collect::<Vec<_>>()
                .join("; ");

            vec![
                Cell::text(m.name.as_str()),
                Cell::text(m.frame_id_hex()),
                Cell::number(m.frame_id),
                Cell::text(s.name.as_str()),
                Cell::number(s.start_bit),
                Cell::number(s.length),
                Cell::text(s.byte_order.to_string()),
                Cell::yes_no(s.is_signed),
                Cell::yes_no(s.value_type.is_float()),
                Cell::Number(s.factor),
                Cell::Number(s.offset),
                Cell::Number(s.minimum),
                Cell::Number(s.maximum),
                Cell::optional_text(s.unit.as_deref()),
                Cell::text(s.receivers.join(", ")),
                Cell::yes_no(multiplexing.map_or(false, |r| r.is_multiplexor())),
                Cell::text(switch_values),
                Cell::optional_text(multiplexing.and_then(|r| r.multiplexor())),
                Cell::text(choices),
                Cell::optional_text(s.comment.as_deref()),
                flatten_attributes(model, &signal_target(m, s)),
            ]
        })
        .collect();

    Sheet {
        name: "Signals",
        headers: &[
            "Message Name",
            "Msg Frame ID (Hex)",
            "Msg Frame ID (Dec)",
            "Signal Name",
            "Start Bit",
            "Length (bits)",
            "Byte Order",
            "Signed",
            "Float",
            "Factor",
            "Offset",
            "Min",
            "Max",
            "Unit",
            "Receivers",
            "Multiplexer",
            "Mux IDs",
            "Mux Signal",
            "Choices / Value Table",
            "Comment",
            "Attributes (Key=Value; ...)",
        ],
        rows,
        wrap_columns: &[18, 19, 20],
    }
}

pub fn nodes_sheet(model: &Model) -> Sheet {
    let rows = model
        .nodes
        .iter()
        .map(|n| {
            vec![
                Cell::text(n.name.as_str()),
                Cell::optional_text(n.comment.as_deref()),
                flatten_attributes(model, &AttributeTarget::Node(n.name.clone())),
            ]
        })
        .collect();

    Sheet {
        name: "Nodes",
        headers: &["Node Name", "Comment", "Attributes (Key=Value; ...)"],
        rows,
        wrap_columns: &[1, 2],
    }
}

/// One row per attribute value, owners named the way they appear elsewhere
pub fn attributes_sheet(model: &Model) -> Sheet {
    let rows = model
        .attribute_values
        .iter()
        .map(|a| {
            let owner = match &a.target {
                AttributeTarget::Global => String::new(),
                AttributeTarget::Node(name) => name.clone(),
                AttributeTarget::Message(id) => model
                    .message(*id)
                    .map_or_else(|| id.to_string(), |m| m.name.clone()),
                AttributeTarget::Signal { message_id, signal } => {
                    let message = model
                        .message(*message_id)
                        .map_or_else(|| message_id.to_string(), |m| m.name.clone());
                    format!("{}.{}", message, signal)
                }
            };
            vec![
                Cell::text(a.target.scope().to_string()),
                Cell::text(owner),
                Cell::text(a.name.as_str()),
                Cell::text(a.value.to_string()),
            ]
        })
        .collect();

    Sheet {
        name: "Attributes",
        headers: &["Scope", "Owner", "Key", "Value"],
        rows,
        wrap_columns: &[],
    }
}

/// Named `VAL_TABLE_` entries first, then the labels of every signal
pub fn value_tables_sheet(model: &Model) -> Sheet {
    let named = model.value_tables.iter().flat_map(|t| {
        t.entries.iter().map(move |(value, label)| {
            vec![
                Cell::text(t.name.as_str()),
                Cell::Empty,
                Cell::Empty,
                Cell::Empty,
                Cell::Number(*value as f64),
                Cell::text(label.as_str()),
            ]
        })
    });
    let per_signal = model.signals().flat_map(|(m, s)| {
        s.value_table.iter().map(move |(value, label)| {
            vec![
                Cell::optional_text(s.value_table_name.as_deref()),
                Cell::text(m.name.as_str()),
                Cell::text(s.name.as_str()),
                Cell::text(m.frame_id_hex()),
                Cell::Number(*value as f64),
                Cell::text(label.as_str()),
            ]
        })
    });
    let rows = named.chain(per_signal).collect();

    Sheet {
        name: "ValueTables",
        headers: &["Table", "Message", "Signal", "Frame ID (Hex)", "Value", "Text"],
        rows,
        wrap_columns: &[],
    }
}

/// All sheets in workbook order
pub fn build_sheets(model: &Model) -> Vec<Sheet> {
    vec![
        messages_sheet(model),
        signals_sheet(model),
        nodes_sheet(model),
        attributes_sheet(model),
        value_tables_sheet(model),
    ]
}

/// Writes the model to an `.xlsx` file at `path`
pub fn write_workbook(model: &Model, path: &Path, config: &WorkbookConfig) -> Result<(), WorkbookError> {
    let mut workbook = Workbook::new();

    let header_format = Format::new()
        .set_bold()
        .set_background_color(Color::RGB(0xE6E6E6))
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter)
        .set_text_wrap();
    let wrap_format = Format::new().set_align(FormatAlign::Top).set_text_wrap();

    for sheet in build_sheets(model) {
        if sheet.rows.len() + 1 > MAX_ROWS {
            return Err(WorkbookError::TooManyRows {
                sheet: sheet.name,
                rows: sheet.rows.len() + 1,
            });
        }
        let worksheet = workbook.add_worksheet();
        write_sheet(worksheet, &sheet, config, &header_format, &wrap_format)?;
        log::debug!("Wrote sheet {} ({} rows)", sheet.name, sheet.rows.len());
    }

    workbook.save(path)?;
    Ok(())
}

fn write_sheet(
    worksheet: &mut Worksheet,
    sheet: &Sheet,
    config: &WorkbookConfig,
    header_format: &Format,
    wrap_format: &Format,
) -> Result<(), XlsxError> {
    worksheet.set_name(sheet.name)?;

    for (col, header) in sheet.headers.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *header, header_format)?;
    }

    for (idx, row) in sheet.rows.iter().enumerate() {
        let row_num = idx as u32 + 1;
        for (col, cell) in row.iter().enumerate() {
            let col = col as u16;
            let wrap = sheet.wrap_columns.contains(&col);
            match cell {
                Cell::Text(text) if wrap => {
                    worksheet.write_string_with_format(row_num, col, text, wrap_format)?;
                }
                Cell::Text(text) => {
                    worksheet.write_string(row_num, col, text)?;
                }
                Cell::Number(value) => {
                    worksheet.write_number(row_num, col, *value)?;
                }
                Cell::Empty => {}
            }
        }
    }

    if config.freeze_header {
        worksheet.set_freeze_panes(1, 0)?;
    }
    if config.autofilter {
        let last_col = sheet.headers.len().saturating_sub(1) as u16;
        worksheet.autofilter(0, 0, sheet.rows.len() as u32, last_col)?;
    }
    for (col, width) in sheet.column_widths(config).into_iter().enumerate() {
        worksheet.set_column_width(col as u16, width)?;
    }
    Ok(())
}
