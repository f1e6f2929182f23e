//! Configuration loading and parsing

use anyhow::{bail, Context, Result};
use dbc2xlsx_core::ParseConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main application configuration (loaded from a TOML file)
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub parser: ParseConfig,
    #[serde(default)]
    pub workbook: WorkbookConfig,
}

/// Workbook layout options
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WorkbookConfig {
    /// Upper bound for estimated column widths (in characters)
    #[serde(default = "default_max_column_width")]
    pub max_column_width: f64,
    /// Lower bound for estimated column widths (in characters)
    #[serde(default = "default_min_column_width")]
    pub min_column_width: f64,
    /// Keep the header row visible while scrolling
    #[serde(default = "default_true")]
    pub freeze_header: bool,
    #[serde(default = "default_true")]
    pub autofilter: bool,
}

impl Default for WorkbookConfig {
    fn default() -> Self {
        Self {
            max_column_width: default_max_column_width(),
            min_column_width: default_min_column_width(),
            freeze_header: true,
            autofilter: true,
        }
    }
}

fn default_max_column_width() -> f64 {
    60.0
}

fn default_min_column_width() -> f64 {
    10.0
}

fn default_true() -> bool {
    true
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate(&config).with_context(|| format!("Invalid config file: {:?}", path))?;
    Ok(config)
}

fn validate(config: &AppConfig) -> Result<()> {
    let workbook = &config.workbook;
    if workbook.min_column_width <= 0.0 || workbook.max_column_width > 255.0 {
        bail!("column widths must lie within 0..255");
    }
    if workbook.min_column_width > workbook.max_column_width {
        bail!(
            "min_column_width ({}) is larger than max_column_width ({})",
            workbook.min_column_width,
            workbook.max_column_width
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbc2xlsx_core::TextEncoding;
    use std::io::Write;

    #[test]
    fn test_config_deserialization() {
        let toml_content = r#"
            [parser]
            encoding = "latin-1"

            [workbook]
            max_column_width = 80
            freeze_header = false
        "#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.parser.encoding, TextEncoding::Latin1);
        assert_eq!(config.parser.placeholder_node, "Vector__XXX");
        assert_eq!(config.workbook.max_column_width, 80.0);
        assert_eq!(config.workbook.min_column_width, 10.0);
        assert!(!config.workbook.freeze_header);
        assert!(config.workbook.autofilter);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_load_config_rejects_inverted_widths() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[workbook]\nmin_column_width = 50\nmax_column_width = 20").unwrap();
        let err = load_config(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("larger than"));
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("no/such/config.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
