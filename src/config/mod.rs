pub mod toml_config;

pub use toml_config::{BigQueryConfig, Datasets, ServerConfig, TomlConfig};

use crate::utils::error::Result;
#[cfg(feature = "cli")]
use clap::Parser;

/// Loads the TOML file if one was given, otherwise starts from defaults,
/// then applies a command line project override.
pub fn load_config(path: Option<&str>, project_id: Option<&str>) -> Result<TomlConfig> {
    let mut config = match path {
        Some(path) => TomlConfig::from_file(path)?,
        None => TomlConfig::default(),
    };
    if let Some(project_id) = project_id {
        config.bigquery.project_id = Some(project_id.to_string());
    }
    Ok(config)
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "mimic-mcp")]
#[command(about = "MCP server exposing MIMIC-IV aggregation tools over stdio")]
pub struct CliConfig {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Google Cloud project billed for queries
    #[arg(long, env = "MIMIC_PROJECT_ID")]
    pub project_id: Option<String>,

    /// Run a test query against the patients table before serving
    #[arg(long)]
    pub check_connection: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,
}

#[cfg(feature = "cli")]
impl CliConfig {
    pub fn load(&self) -> Result<TomlConfig> {
        load_config(self.config.as_deref(), self.project_id.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_override_without_file() {
        let config = load_config(None, Some("override-project")).unwrap();
        assert_eq!(config.project_id(), Some("override-project"));
        assert_eq!(config.server.name, toml_config::DEFAULT_SERVER_NAME);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_config(Some("/nonexistent/mimic.toml"), None).unwrap_err();
        assert!(matches!(err, crate::utils::error::MimicError::IoError(_)));
    }

    #[cfg(feature = "cli")]
    #[test]
    fn test_cli_parsing() {
        let cli = CliConfig::parse_from([
            "mimic-mcp",
            "--project-id",
            "cli-project",
            "--check-connection",
            "-v",
        ]);
        assert_eq!(cli.project_id.as_deref(), Some("cli-project"));
        assert!(cli.check_connection);
        assert!(cli.verbose);
        assert!(!cli.log_json);
        assert_eq!(cli.load().unwrap().project_id(), Some("cli-project"));
    }
}
