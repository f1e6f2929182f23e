//! DBC to Excel converter CLI
//!
//! Command-line front end for the dbc2xlsx-core library. It adds:
//! - Logging setup
//! - TOML configuration
//! - Workbook generation (.xlsx)
//! - Optional JSON dump of the converted model

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use dbc2xlsx_core::{Conversion, DbcParser, Diagnostic, Model, TextEncoding};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

mod config;
mod workbook;

use config::AppConfig;

/// dbc2xlsx - Convert CAN DBC files to Excel workbooks
#[derive(Parser, Debug)]
#[command(name = "dbc2xlsx")]
#[command(about = "Convert a CAN DBC file to an Excel (.xlsx) export", long_about = None)]
#[command(version)]
struct Args {
    /// Path to the input .dbc file
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    /// Path to the output .xlsx file
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Logging level
    #[arg(long, value_enum, ignore_case = true, default_value = "info")]
    log_level: LogLevel,

    /// DBC file encoding: auto, utf-8 or latin-1 (overrides the config file)
    #[arg(long, value_name = "ENC")]
    encoding: Option<TextEncoding>,

    /// Path to configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Also dump the converted model as JSON
    #[arg(long, value_name = "FILE")]
    json: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    #[value(alias = "critical")]
    Error,
    #[value(alias = "warning")]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.log_level);

    log::info!("dbc2xlsx v{}", env!("CARGO_PKG_VERSION"));
    log::debug!("Using dbc2xlsx-core v{}", dbc2xlsx_core::VERSION);

    let config = load_app_config(&args)?;
    run(&args, &config)
}

/// Config file values, overridden by command line flags
fn load_app_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };
    if let Some(encoding) = args.encoding {
        config.parser.encoding = encoding;
    }
    Ok(config)
}

fn run(args: &Args, config: &AppConfig) -> Result<()> {
    let parser = DbcParser::with_config(config.parser.clone());
    let conversion = parser
        .parse_file(&args.input)
        .with_context(|| format!("Failed to convert {:?}", args.input))?;

    let stats = conversion.model.stats();
    log::info!(
        "Parsed: {} nodes, {} messages, {} signals, {} attributes",
        stats.num_nodes,
        stats.num_messages,
        stats.num_signals,
        stats.num_attributes
    );
    if conversion.has_warnings() {
        log::warn!(
            "{} warning(s) raised while parsing; affected records were skipped",
            conversion.diagnostics.len()
        );
    }

    log::info!("Writing XLSX: {:?}", args.output);
    workbook::write_workbook(&conversion.model, &args.output, &config.workbook)
        .with_context(|| format!("Failed to write workbook {:?}", args.output))?;
    log::info!("Wrote Excel export: {:?}", args.output);

    if let Some(json_path) = &args.json {
        write_json(&conversion, json_path)?;
        log::info!("Wrote JSON dump: {:?}", json_path);
    }

    Ok(())
}

#[derive(Serialize)]
struct JsonDump<'a> {
    model: &'a Model,
    diagnostics: &'a [Diagnostic],
}

fn write_json(conversion: &Conversion, path: &Path) -> Result<()> {
    let document = JsonDump {
        model: &conversion.model,
        diagnostics: &conversion.diagnostics,
    };
    let text = serde_json::to_string_pretty(&document).context("Failed to serialize model")?;
    fs::write(path, text).with_context(|| format!("Failed to write JSON file {:?}", path))?;
    Ok(())
}

/// Initialize logging with a timestamped format
fn init_logging(level: LogLevel) {
    use env_logger::Builder;
    use std::io::Write;

    Builder::new()
        .filter_level(level.filter())
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {} {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    const DBC: &str = "BU_: ECU1\n\
        BO_ 100 VehicleSpeed: 8 ECU1\n \
        SG_ Speed : 0|16@1+ (0.1,0) [0|250] \"km/h\" Vector__XXX\n";

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["dbc2xlsx", "-i", "in.dbc", "-o", "out.xlsx"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_log_level_names() {
        assert_eq!(args(&[]).log_level, LogLevel::Info);
        assert_eq!(args(&["--log-level", "WARNING"]).log_level, LogLevel::Warn);
        assert_eq!(args(&["--log-level", "CRITICAL"]).log_level, LogLevel::Error);
        assert_eq!(args(&["--log-level", "debug"]).log_level, LogLevel::Debug);
        assert!(Args::try_parse_from(["dbc2xlsx", "-i", "a", "-o", "b", "--log-level", "loud"]).is_err());
    }

    #[test]
    fn test_input_and_output_are_required() {
        assert!(Args::try_parse_from(["dbc2xlsx", "-i", "a.dbc"]).is_err());
        assert!(Args::try_parse_from(["dbc2xlsx", "-o", "a.xlsx"]).is_err());
    }

    #[test]
    fn test_encoding_flag_overrides_config() {
        let config = load_app_config(&args(&["--encoding", "latin-1"])).unwrap();
        assert_eq!(config.parser.encoding, TextEncoding::Latin1);
        assert!(Args::try_parse_from(["dbc2xlsx", "-i", "a", "-o", "b", "--encoding", "koi8"]).is_err());
    }

    #[test]
    fn test_run_writes_workbook_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("net.dbc");
        let output = dir.path().join("net.xlsx");
        let json = dir.path().join("net.json");
        fs::write(&input, DBC).unwrap();

        let args = Args::try_parse_from([
            "dbc2xlsx",
            "-i",
            input.to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
            "--json",
            json.to_str().unwrap(),
        ])
        .unwrap();
        run(&args, &AppConfig::default()).unwrap();

        assert!(output.exists());
        let dump: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(dump["model"]["messages"][0]["name"], "VehicleSpeed");
        assert_eq!(dump["diagnostics"].as_array().map(Vec::len), Some(0));
    }

    #[test]
    fn test_failed_conversion_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("empty.dbc");
        let output = dir.path().join("empty.xlsx");
        fs::write(&input, "VERSION \"\"\n").unwrap();

        let args = Args::try_parse_from([
            "dbc2xlsx",
            "-i",
            input.to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
        ])
        .unwrap();
        let err = run(&args, &AppConfig::default()).unwrap_err();
        assert!(format!("{:#}", err).contains("No messages"));
        assert!(!output.exists());
    }
}
