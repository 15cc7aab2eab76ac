use crate::utils::error::{MimicError, Result};
use crate::utils::validation::{
    validate_identifier, validate_positive_number, validate_url, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

pub const DEFAULT_SERVER_NAME: &str = "mimic_query_server";
pub const DEFAULT_ENDPOINT: &str = "https://bigquery.googleapis.com/bigquery/v2";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub server: ServerConfig,
    pub bigquery: BigQueryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_SERVER_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BigQueryConfig {
    /// Billing project the query jobs run in.
    pub project_id: Option<String>,
    pub endpoint: String,
    /// Project hosting the MIMIC-IV datasets.
    pub data_project: String,
    pub hosp_dataset: String,
    pub icu_dataset: String,
    pub location: Option<String>,
    pub access_token: Option<String>,
    pub timeout_seconds: u64,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    pub max_rows: usize,
    pub retry_attempts: u32,
    pub retry_delay_seconds: u64,
}

impl Default for BigQueryConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            data_project: "physionet-data".to_string(),
            hosp_dataset: "mimiciv_3_1_hosp".to_string(),
            icu_dataset: "mimiciv_3_1_icu".to_string(),
            location: None,
            access_token: None,
            timeout_seconds: 30,
            poll_interval_ms: 500,
            max_poll_attempts: 120,
            max_rows: 10_000,
            retry_attempts: 2,
            retry_delay_seconds: 1,
        }
    }
}

/// Fully qualified references to the MIMIC-IV tables.
#[derive(Debug, Clone, PartialEq)]
pub struct Datasets {
    pub data_project: String,
    pub hosp: String,
    pub icu: String,
}

impl Datasets {
    pub fn hosp_table(&self, table: &str) -> String {
        format!("`{}.{}.{}`", self.data_project, self.hosp, table)
    }

    pub fn icu_table(&self, table: &str) -> String {
        format!("`{}.{}.{}`", self.data_project, self.icu, table)
    }
}

impl Default for Datasets {
    fn default() -> Self {
        BigQueryConfig::default().datasets()
    }
}

impl BigQueryConfig {
    pub fn datasets(&self) -> Datasets {
        Datasets {
            data_project: self.data_project.clone(),
            hosp: self.hosp_dataset.clone(),
            icu: self.icu_dataset.clone(),
        }
    }
}

impl TomlConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(MimicError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| MimicError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` with the environment value; unset variables are left as written.
    fn substitute_env_vars(content: &str) -> String {
        static ENV_VAR: OnceLock<Regex> = OnceLock::new();
        let re = ENV_VAR.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid regex"));

        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .into_owned()
    }

    /// Empty strings and unresolved `${VAR}` references count as unset.
    pub fn project_id(&self) -> Option<&str> {
        resolved(self.bigquery.project_id.as_deref())
    }

    pub fn access_token(&self) -> Option<&str> {
        resolved(self.bigquery.access_token.as_deref())
    }

    pub fn validate_config(&self) -> Result<()> {
        let project_id = self.project_id();
        let project_id =
            crate::utils::validation::validate_required_field("bigquery.project_id", &project_id)?;
        validate_identifier("bigquery.project_id", project_id)?;
        validate_url("bigquery.endpoint", &self.bigquery.endpoint)?;
        validate_identifier("bigquery.data_project", &self.bigquery.data_project)?;
        validate_identifier("bigquery.hosp_dataset", &self.bigquery.hosp_dataset)?;
        validate_identifier("bigquery.icu_dataset", &self.bigquery.icu_dataset)?;
        validate_positive_number(
            "bigquery.max_poll_attempts",
            self.bigquery.max_poll_attempts as usize,
            1,
        )?;
        validate_positive_number("bigquery.max_rows", self.bigquery.max_rows, 1)?;
        validate_positive_number(
            "bigquery.timeout_seconds",
            self.bigquery.timeout_seconds as usize,
            1,
        )?;
        crate::utils::validation::validate_non_empty_string("server.name", &self.server.name)?;
        Ok(())
    }
}

fn resolved(value: Option<&str>) -> Option<&str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.starts_with("${"))
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
