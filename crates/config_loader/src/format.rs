//! On-disk configuration formats

use std::path::Path;

use contracts::{ContractError, HubConfig};

/// Configuration file format, chosen by extension
///
/// `.conf` is read as TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Format for `path`
    ///
    /// # Errors
    /// `ConfigParse` when the extension is missing or not recognised
    pub fn of(path: &Path) -> Result<Self, ContractError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "toml" | "conf" => Ok(Self::Toml),
            "json" => Ok(Self::Json),
            "" => Err(ContractError::config_parse(format!(
                "{}: no extension, expected .toml, .conf or .json",
                path.display()
            ))),
            other => Err(ContractError::config_parse(format!(
                "{}: unsupported config format .{other}",
                path.display()
            ))),
        }
    }

    /// Deserialize a snapshot; no validation
    pub fn parse(self, content: &str) -> Result<HubConfig, ContractError> {
        match self {
            Self::Toml => toml::from_str(content).map_err(|e| ContractError::ConfigParse {
                message: format!("TOML parse error: {e}"),
                source: Some(Box::new(e)),
            }),
            Self::Json => serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
                message: format!("JSON parse error: {e}"),
                source: Some(Box::new(e)),
            }),
        }
    }

    /// Render a snapshot the way `--show-settings` prints it
    pub fn render(self, config: &HubConfig) -> Result<String, ContractError> {
        match self {
            Self::Toml => toml::to_string_pretty(config)
                .map_err(|e| ContractError::config_parse(format!("cannot render TOML: {e}"))),
            Self::Json => serde_json::to_string_pretty(config)
                .map_err(|e| ContractError::config_parse(format!("cannot render JSON: {e}"))),
        }
    }
}
