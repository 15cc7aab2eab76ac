//! BigQuery REST v2 client: `jobs.query`, then `jobs.getQueryResults` for
//! polling and paging.

use crate::config::{BigQueryConfig, Datasets, TomlConfig};
use crate::domain::model::{Column, QueryParameter, QueryResult, SqlQuery};
use crate::domain::ports::QueryExecutor;
use crate::utils::error::{MimicError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
const GCLOUD_TOKEN_LIFETIME: Duration = Duration::from_secs(45 * 60);

/// Where bearer tokens come from.
pub enum TokenSource {
    Static(String),
    /// Token printed by an external command, cached until it nears expiry.
    Command(TokenCommand),
}

pub struct TokenCommand {
    program: String,
    args: Vec<String>,
    lifetime: Duration,
    cache: Mutex<Option<(String, Instant)>>,
}

impl TokenSource {
    pub fn from_config(config: &TomlConfig) -> Self {
        if let Some(token) = config.access_token() {
            return Self::Static(token.to_string());
        }
        match std::env::var(TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => Self::Static(token.trim().to_string()),
            _ => Self::gcloud(),
        }
    }

    /// `gcloud auth print-access-token`
    pub fn gcloud() -> Self {
        Self::command("gcloud", ["auth", "print-access-token"])
    }

    pub fn command<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Command(TokenCommand {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            lifetime: GCLOUD_TOKEN_LIFETIME,
            cache: Mutex::new(None),
        })
    }

    /// How long a command token is reused before the command runs again.
    pub fn with_lifetime(self, lifetime: Duration) -> Self {
        match self {
            Self::Command(command) => Self::Command(TokenCommand { lifetime, ..command }),
            other => other,
        }
    }

    pub fn is_refreshable(&self) -> bool {
        matches!(self, Self::Command(_))
    }

    pub async fn token(&self) -> Result<String> {
        match self {
            Self::Static(token) => Ok(token.clone()),
            Self::Command(command) => {
                let mut cache = command.cache.lock().await;
                if let Some((token, fetched_at)) = cache.as_ref() {
                    if fetched_at.elapsed() < command.lifetime {
                        return Ok(token.clone());
                    }
                }
                let token = command.run().await?;
                *cache = Some((token.clone(), Instant::now()));
                Ok(token)
            }
        }
    }

    pub async fn invalidate(&self) {
        if let Self::Command(command) = self {
            command.cache.lock().await.take();
        }
    }
}

impl TokenCommand {
    async fn run(&self) -> Result<String> {
        tracing::debug!("Requesting access token from {}", self.program);
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .output()
            .await
            .map_err(|e| MimicError::AuthError {
                message: format!("could not run {}: {}", self.program, e),
            })?;

        if !output.status.success() {
            return Err(MimicError::AuthError {
                message: format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(MimicError::AuthError {
                message: format!("{} returned an empty access token", self.program),
            });
        }
        Ok(token)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameter_mode: Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    query_parameters: Vec<WireParameter>,
    timeout_ms: u64,
    max_results: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireParameter {
    name: String,
    parameter_type: WireParameterType,
    parameter_value: WireParameterValue,
}

#[derive(Serialize)]
struct WireParameterType {
    #[serde(rename = "type")]
    param_type: String,
}

#[derive(Serialize)]
struct WireParameterValue {
    value: String,
}

impl From<&QueryParameter> for WireParameter {
    fn from(p: &QueryParameter) -> Self {
        Self {
            name: p.name.clone(),
            parameter_type: WireParameterType {
                param_type: p.param_type.clone(),
            },
            parameter_value: WireParameterValue {
                value: p.value.clone(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    schema: Option<TableSchema>,
    job_reference: Option<JobReference>,
    #[serde(default)]
    rows: Vec<WireRow>,
    #[serde(default)]
    job_complete: bool,
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<Column>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireRow {
    #[serde(default)]
    f: Vec<WireCell>,
}

#[derive(Debug, Deserialize)]
struct WireCell {
    #[serde(default)]
    v: Value,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

fn into_rows(rows: Vec<WireRow>) -> impl Iterator<Item = Vec<Value>> {
    rows.into_iter()
        .map(|row| row.f.into_iter().map(|cell| cell.v).collect())
}

pub struct BigQueryClient {
    client: Client,
    settings: BigQueryConfig,
    project_id: String,
    tokens: TokenSource,
}

impl BigQueryClient {
    pub fn new(settings: BigQueryConfig, project_id: String, tokens: TokenSource) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("mimic-mcp/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(settings.timeout_seconds + 10))
            .build()?;
        Ok(Self {
            client,
            settings,
            project_id,
            tokens,
        })
    }

    pub fn from_config(config: &TomlConfig) -> Result<Self> {
        let project_id = config
            .project_id()
            .ok_or_else(|| MimicError::MissingConfigError {
                field: "bigquery.project_id".to_string(),
            })?
            .to_string();
        Self::new(
            config.bigquery.clone(),
            project_id,
            TokenSource::from_config(config),
        )
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn datasets(&self) -> Datasets {
        self.settings.datasets()
    }

    /// Probes access to the MIMIC-IV hosp dataset with a one-row query.
    pub async fn check_connection(&self) -> Result<()> {
        let sql = format!(
            "SELECT 1 FROM {} LIMIT 1",
            self.datasets().hosp_table("patients")
        );
        self.execute(&SqlQuery::new(sql)).await?;
        tracing::info!(
            "BigQuery client initialized and connection tested successfully (project {})",
            self.project_id
        );
        Ok(())
    }

    fn queries_url(&self) -> String {
        format!(
            "{}/projects/{}/queries",
            self.settings.endpoint.trim_end_matches('/'),
            self.project_id
        )
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<T> {
        let mut attempt = 0;
        let mut refreshed_token = false;
        loop {
            let token = self.tokens.token().await?;
            match self.send_once(build().bearer_auth(token)).await {
                Err(MimicError::BigQueryError { status: 401, .. })
                    if self.tokens.is_refreshable() && !refreshed_token =>
                {
                    tracing::debug!("Access token rejected, refreshing");
                    self.tokens.invalidate().await;
                    refreshed_token = true;
                }
                Err(e) if e.is_retryable() && attempt < self.settings.retry_attempts => {
                    attempt += 1;
                    tracing::warn!(
                        "BigQuery request failed ({}), retry {}/{}",
                        e,
                        attempt,
                        self.settings.retry_attempts
                    );
                    let delay = self.settings.retry_delay_seconds * attempt as u64;
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                }
                other => return other,
            }
        }
    }

    async fn send_once<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        tracing::debug!("BigQuery response status: {}", status);

        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let body = response.text().await.unwrap_or_default();
        Err(MimicError::BigQueryError {
            status: status.as_u16(),
            message: error_message(&body),
        })
    }

    async fn get_query_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> Result<QueryResponse> {
        let url = format!("{}/{}", self.queries_url(), job.job_id);
        let location = job
            .location
            .as_deref()
            .or(self.settings.location.as_deref());

        let mut params: Vec<(&str, String)> = vec![
            ("timeoutMs", (self.settings.timeout_seconds * 1000).to_string()),
            ("maxResults", self.settings.max_rows.to_string()),
        ];
        if let Some(location) = location {
            params.push(("location", location.to_string()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }

        self.send_json(|| self.client.get(&url).query(&params)).await
    }
}

#[async_trait]
impl QueryExecutor for BigQueryClient {
    async fn execute(&self, query: &SqlQuery) -> Result<QueryResult> {
        tracing::debug!("Executing BigQuery query:\n{}", query.sql);

        let url = self.queries_url();
        let body = QueryRequest {
            query: &query.sql,
            use_legacy_sql: false,
            parameter_mode: (!query.parameters.is_empty()).then_some("NAMED"),
            query_parameters: query.parameters.iter().map(WireParameter::from).collect(),
            timeout_ms: self.settings.timeout_seconds * 1000,
            max_results: self.settings.max_rows,
            location: self.settings.location.as_deref(),
        };

        let mut response: QueryResponse =
            self.send_json(|| self.client.post(&url).json(&body)).await?;

        let mut polls = 0;
        while !response.job_complete {
            let job = response.job_reference.clone().ok_or_else(|| {
                MimicError::processing("incomplete query response carries no job reference")
            })?;
            if polls >= self.settings.max_poll_attempts {
                return Err(MimicError::QueryTimeoutError {
                    job_id: job.job_id,
                    attempts: polls,
                });
            }
            polls += 1;
            tracing::debug!("Job {} still running (poll {})", job.job_id, polls);
            tokio::time::sleep(Duration::from_millis(self.settings.poll_interval_ms)).await;
            response = self.get_query_results(&job, None).await?;
        }

        let columns = response.schema.take().map(|s| s.fields).unwrap_or_default();
        let mut rows: Vec<Vec<Value>> = into_rows(std::mem::take(&mut response.rows)).collect();

        let mut page_token = response.page_token.take();
        while let Some(token) = page_token {
            if rows.len() >= self.settings.max_rows {
                tracing::warn!(
                    "Result truncated at {} rows (bigquery.max_rows)",
                    self.settings.max_rows
                );
                break;
            }
            let job = response.job_reference.as_ref().ok_or_else(|| {
                MimicError::processing("paged query response carries no job reference")
            })?;
            let page = self.get_query_results(job, Some(&token)).await?;
            rows.extend(into_rows(page.rows));
            page_token = page.page_token;
        }
        rows.truncate(self.settings.max_rows);

        tracing::debug!("Query returned {} rows", rows.len());
        Ok(QueryResult { columns, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_from_envelope() {
        let body = r#"{"error":{"code":403,"message":"Access Denied: Table physionet-data:mimiciv_3_1_hosp.patients","errors":[]}}"#;
        assert_eq!(
            error_message(body),
            "Access Denied: Table physionet-data:mimiciv_3_1_hosp.patients"
        );
        assert_eq!(error_message("  upstream unavailable \n"), "upstream unavailable");
    }

    #[test]
    fn test_query_request_shape() {
        let query = SqlQuery::new("SELECT @p")
            .with_parameter(QueryParameter::string("p", "A41%"));
        let body = QueryRequest {
            query: &query.sql,
            use_legacy_sql: false,
            parameter_mode: Some("NAMED"),
            query_parameters: query.parameters.iter().map(WireParameter::from).collect(),
            timeout_ms: 1000,
            max_results: 10,
            location: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["useLegacySql"], false);
        assert_eq!(json["parameterMode"], "NAMED");
        assert_eq!(json["queryParameters"][0]["parameterType"]["type"], "STRING");
        assert_eq!(json["queryParameters"][0]["parameterValue"]["value"], "A41%");
        assert!(json.get("location").is_none());
    }

    #[test]
    fn test_static_token_from_config() {
        let config = TomlConfig::from_toml_str("[bigquery]\naccess_token = \"abc\"\n").unwrap();
        assert!(matches!(TokenSource::from_config(&config), TokenSource::Static(t) if t == "abc"));
    }

    #[tokio::test]
    async fn test_failing_token_command_is_auth_error() {
        let missing = TokenSource::command("mimic-no-such-token-helper", ["print"]);
        assert!(matches!(missing.token().await, Err(MimicError::AuthError { .. })));

        let empty = TokenSource::command("true", Vec::<String>::new());
        match empty.token().await {
            Err(MimicError::AuthError { message }) => assert!(message.contains("empty access token")),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_gcloud_is_the_default_command() {
        let source = TokenSource::gcloud();
        assert!(source.is_refreshable());
        match source {
            TokenSource::Command(command) => {
                assert_eq!(command.program, "gcloud");
                assert_eq!(command.args, vec!["auth", "print-access-token"]);
                assert_eq!(command.lifetime, GCLOUD_TOKEN_LIFETIME);
            }
            TokenSource::Static(_) => panic!("expected a command source"),
        }
    }

    #[tokio::test]
    async fn test_missing_project_is_rejected() {
        let config = TomlConfig::default();
        assert!(matches!(
            BigQueryClient::from_config(&config),
            Err(MimicError::MissingConfigError { .. })
        ));
    }
}
