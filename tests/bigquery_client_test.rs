use httpmock::prelude::*;
use mimic_mcp::config::BigQueryConfig;
use mimic_mcp::core::QueryExecutor;
use mimic_mcp::domain::model::{QueryParameter, SqlQuery};
use mimic_mcp::{BigQueryClient, MimicError, TokenSource};
use serde_json::json;

const QUERIES_PATH: &str = "/projects/test-project/queries";

fn client_for(server: &MockServer, tweak: impl FnOnce(&mut BigQueryConfig)) -> BigQueryClient {
    let mut settings = BigQueryConfig {
        endpoint: server.base_url(),
        poll_interval_ms: 5,
        retry_attempts: 1,
        retry_delay_seconds: 0,
        ..Default::default()
    };
    tweak(&mut settings);
    BigQueryClient::new(
        settings,
        "test-project".to_string(),
        TokenSource::Static("test-token".to_string()),
    )
    .unwrap()
}

fn example_rows(values: &[&str]) -> serde_json::Value {
    json!(values
        .iter()
        .map(|v| json!({"f": [{"v": v}]}))
        .collect::<Vec<_>>())
}

#[tokio::test]
async fn test_query_returns_schema_and_rows() {
    let server = MockServer::start();
    let query_mock = server.mock(|when, then| {
        when.method(POST)
            .path(QUERIES_PATH)
            .header("authorization", "Bearer test-token")
            .body_contains("\"useLegacySql\":false")
            .body_contains("\"parameterMode\":\"NAMED\"")
            .body_contains("A41%");
        then.status(200)
            .header("Content-Type", "application/json")
            .json_body(json!({
                "kind": "bigquery#queryResponse",
                "jobComplete": true,
                "jobReference": {"projectId": "test-project", "jobId": "job_a", "location": "US"},
                "schema": {"fields": [
                    {"name": "average_age", "type": "BIGNUMERIC", "mode": "NULLABLE"}
                ]},
                "rows": [{"f": [{"v": "66.5"}]}],
                "totalRows": "1"
            }));
    });

    let client = client_for(&server, |_| {});
    let query = SqlQuery::new("SELECT AVG(x) AS average_age FROM t WHERE code LIKE @p")
        .with_parameter(QueryParameter::string("p", "A41%"));
    let result = client.execute(&query).await.unwrap();

    query_mock.assert();
    assert_eq!(result.columns.len(), 1);
    assert_eq!(result.columns[0].name, "average_age");
    assert_eq!(result.columns[0].field_type, "BIGNUMERIC");
    assert_eq!(result.rows, vec![vec![json!("66.5")]]);
}

#[tokio::test]
async fn test_polls_until_job_complete() {
    let server = MockServer::start();
    let query_mock = server.mock(|when, then| {
        when.method(POST).path(QUERIES_PATH);
        then.status(200).json_body(json!({
            "jobComplete": false,
            "jobReference": {"projectId": "test-project", "jobId": "job_slow", "location": "US"}
        }));
    });
    let poll_mock = server.mock(|when, then| {
        when.method(GET)
            .path(format!("{}/job_slow", QUERIES_PATH))
            .query_param("location", "US");
        then.status(200).json_body(json!({
            "jobComplete": true,
            "jobReference": {"projectId": "test-project", "jobId": "job_slow", "location": "US"},
            "schema": {"fields": [{"name": "example", "type": "STRING"}]},
            "rows": example_rows(&["Heparin", "Insulin"])
        }));
    });

    let client = client_for(&server, |_| {});
    let result = client.execute(&SqlQuery::new("SELECT 1")).await.unwrap();

    query_mock.assert();
    poll_mock.assert();
    assert_eq!(result.column_strings("example"), vec!["Heparin", "Insulin"]);
}

#[tokio::test]
async fn test_gives_up_after_max_polls() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path(QUERIES_PATH);
        then.status(200).json_body(json!({
            "jobComplete": false,
            "jobReference": {"projectId": "test-project", "jobId": "job_stuck"}
        }));
    });
    let poll_mock = server.mock(|when, then| {
        when.method(GET).path(format!("{}/job_stuck", QUERIES_PATH));
        then.status(200).json_body(json!({
            "jobComplete": false,
            "jobReference": {"projectId": "test-project", "jobId": "job_stuck"}
        }));
    });

    let client = client_for(&server, |s| s.max_poll_attempts = 2);
    let err = client.execute(&SqlQuery::new("SELECT 1")).await.unwrap_err();

    poll_mock.assert_hits(2);
    match err {
        MimicError::QueryTimeoutError { job_id, attempts } => {
            assert_eq!(job_id, "job_stuck");
            assert_eq!(attempts, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_follows_page_tokens() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path(QUERIES_PATH);
        then.status(200).json_body(json!({
            "jobComplete": true,
            "jobReference": {"projectId": "test-project", "jobId": "job_paged", "location": "EU"},
            "schema": {"fields": [{"name": "example", "type": "STRING"}]},
            "rows": example_rows(&["A", "B"]),
            "pageToken": "page-2"
        }));
    });
    let page_mock = server.mock(|when, then| {
        when.method(GET)
            .path(format!("{}/job_paged", QUERIES_PATH))
            .query_param("pageToken", "page-2")
            .query_param("location", "EU");
        then.status(200).json_body(json!({
            "jobComplete": true,
            "jobReference": {"projectId": "test-project", "jobId": "job_paged", "location": "EU"},
            "schema": {"fields": [{"name": "example", "type": "STRING"}]},
            "rows": example_rows(&["C"])
        }));
    });

    let client = client_for(&server, |_| {});
    let result = client.execute(&SqlQuery::new("SELECT 1")).await.unwrap();

    page_mock.assert();
    assert_eq!(result.column_strings("example"), vec!["A", "B", "C"]);
}

#[tokio::test]
async fn test_max_rows_truncates_without_fetching_more_pages() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path(QUERIES_PATH);
        then.status(200).json_body(json!({
            "jobComplete": true,
            "jobReference": {"projectId": "test-project", "jobId": "job_big"},
            "schema": {"fields": [{"name": "example", "type": "STRING"}]},
            "rows": example_rows(&["A", "B", "C"]),
            "pageToken": "more"
        }));
    });
    let page_mock = server.mock(|when, then| {
        when.method(GET).path(format!("{}/job_big", QUERIES_PATH));
        then.status(200).json_body(json!({"jobComplete": true, "rows": []}));
    });

    let client = client_for(&server, |s| s.max_rows = 2);
    let result = client.execute(&SqlQuery::new("SELECT 1")).await.unwrap();

    page_mock.assert_hits(0);
    assert_eq!(result.rows.len(), 2);
}

#[tokio::test]
async fn test_error_envelope_is_surfaced_without_retry() {
    let server = MockServer::start();
    let query_mock = server.mock(|when, then| {
        when.method(POST).path(QUERIES_PATH);
        then.status(403).json_body(json!({
            "error": {
                "code": 403,
                "message": "Access Denied: Table physionet-data:mimiciv_3_1_hosp.patients",
                "errors": [{"reason": "accessDenied"}]
            }
        }));
    });

    let client = client_for(&server, |_| {});
    let err = client.execute(&SqlQuery::new("SELECT 1")).await.unwrap_err();

    query_mock.assert_hits(1);
    match err {
        MimicError::BigQueryError { status, message } => {
            assert_eq!(status, 403);
            assert!(message.starts_with("Access Denied"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start();
    let query_mock = server.mock(|when, then| {
        when.method(POST).path(QUERIES_PATH);
        then.status(503).body("backend unavailable");
    });

    let client = client_for(&server, |_| {});
    let err = client.execute(&SqlQuery::new("SELECT 1")).await.unwrap_err();

    query_mock.assert_hits(2);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_check_connection_queries_patients() {
    let server = MockServer::start();
    let connection_check = server.mock(|when, then| {
        when.method(POST)
            .path(QUERIES_PATH)
            .body_contains("SELECT 1 FROM `physionet-data.mimiciv_3_1_hosp.patients` LIMIT 1");
        then.status(200).json_body(json!({
            "jobComplete": true,
            "schema": {"fields": [{"name": "f0_", "type": "INTEGER"}]},
            "rows": [{"f": [{"v": "1"}]}]
        }));
    });

    let client = client_for(&server, |_| {});
    client.check_connection().await.unwrap();
    connection_check.assert();
}

/// Token helper printing `token-<n>`, where n counts its invocations in `counter`.
#[cfg(unix)]
fn counting_token_source(counter: &std::path::Path) -> TokenSource {
    let script = format!(
        "n=$(cat '{0}' 2>/dev/null || echo 0); n=$((n+1)); echo $n > '{0}'; echo token-$n",
        counter.display()
    );
    TokenSource::command("sh", ["-c".to_string(), script])
}

#[cfg(unix)]
fn invocations(counter: &std::path::Path) -> String {
    std::fs::read_to_string(counter).unwrap().trim().to_string()
}

#[cfg(unix)]
#[tokio::test]
async fn test_rejected_command_token_is_refreshed_once_then_cached() {
    let dir = tempfile::TempDir::new().unwrap();
    let counter = dir.path().join("count");

    let server = MockServer::start();
    let stale = server.mock(|when, then| {
        when.method(POST)
            .path(QUERIES_PATH)
            .header("authorization", "Bearer token-1");
        then.status(401).json_body(json!({
            "error": {"code": 401, "message": "Request had invalid authentication credentials."}
        }));
    });
    let fresh = server.mock(|when, then| {
        when.method(POST)
            .path(QUERIES_PATH)
            .header("authorization", "Bearer token-2");
        then.status(200).json_body(json!({
            "jobComplete": true,
            "schema": {"fields": [{"name": "f0_", "type": "INTEGER"}]},
            "rows": [{"f": [{"v": "1"}]}]
        }));
    });

    let settings = BigQueryConfig {
        endpoint: server.base_url(),
        retry_delay_seconds: 0,
        ..Default::default()
    };
    let client = BigQueryClient::new(
        settings,
        "test-project".to_string(),
        counting_token_source(&counter),
    )
    .unwrap();

    client.execute(&SqlQuery::new("SELECT 1")).await.unwrap();
    client.execute(&SqlQuery::new("SELECT 1")).await.unwrap();

    stale.assert_hits(1);
    fresh.assert_hits(2);
    assert_eq!(invocations(&counter), "2");
}

#[cfg(unix)]
#[tokio::test]
async fn test_second_rejection_is_not_refreshed_again() {
    let dir = tempfile::TempDir::new().unwrap();
    let counter = dir.path().join("count");

    let server = MockServer::start();
    let rejected = server.mock(|when, then| {
        when.method(POST).path(QUERIES_PATH);
        then.status(401)
            .json_body(json!({"error": {"code": 401, "message": "Invalid Credentials"}}));
    });

    let settings = BigQueryConfig {
        endpoint: server.base_url(),
        retry_delay_seconds: 0,
        ..Default::default()
    };
    let client = BigQueryClient::new(
        settings,
        "test-project".to_string(),
        counting_token_source(&counter),
    )
    .unwrap();

    let err = client.execute(&SqlQuery::new("SELECT 1")).await.unwrap_err();

    rejected.assert_hits(2);
    assert_eq!(invocations(&counter), "2");
    assert!(matches!(err, MimicError::BigQueryError { status: 401, .. }));
}

#[cfg(unix)]
#[tokio::test]
async fn test_expired_command_token_is_fetched_again() {
    let dir = tempfile::TempDir::new().unwrap();
    let counter = dir.path().join("count");

    let server = MockServer::start();
    let first = server.mock(|when, then| {
        when.method(POST)
            .path(QUERIES_PATH)
            .header("authorization", "Bearer token-1");
        then.status(200).json_body(json!({"jobComplete": true, "rows": []}));
    });
    let second = server.mock(|when, then| {
        when.method(POST)
            .path(QUERIES_PATH)
            .header("authorization", "Bearer token-2");
        then.status(200).json_body(json!({"jobComplete": true, "rows": []}));
    });

    let settings = BigQueryConfig {
        endpoint: server.base_url(),
        ..Default::default()
    };
    let tokens = counting_token_source(&counter).with_lifetime(std::time::Duration::ZERO);
    let client = BigQueryClient::new(settings, "test-project".to_string(), tokens).unwrap();

    client.execute(&SqlQuery::new("SELECT 1")).await.unwrap();
    client.execute(&SqlQuery::new("SELECT 1")).await.unwrap();

    first.assert_hits(1);
    second.assert_hits(1);
    assert_eq!(invocations(&counter), "2");
}
