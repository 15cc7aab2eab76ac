//! MIMIC-IV tool definitions and the request handler behind the MCP server.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::protocol::{
    methods, InitializeResult, McpHandler, McpRequest, McpResponse, ToolCallResult,
    ToolDefinition,
};
use crate::config::Datasets;
use crate::core::aggregation::{self, Metric, CONDITIONS};
use crate::core::prediction;
use crate::domain::ports::QueryExecutor;
use crate::utils::error::{MimicError, Result};

pub const GET_MIMIC_AGGREGATION: &str = "get_mimic_aggregation";
pub const PREDICT_ICD_CODE: &str = "predict_icd_code";

pub fn tool_definitions() -> Vec<ToolDefinition> {
    let metrics: Vec<&str> = Metric::ALL.iter().map(Metric::as_str).collect();
    let conditions: Vec<&str> = CONDITIONS.iter().map(|c| c.name).collect();

    vec![
        ToolDefinition {
            name: GET_MIMIC_AGGREGATION.to_string(),
            description: "Performs aggregation queries on the MIMIC-IV dataset.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "metric": {
                        "type": "string",
                        "enum": metrics,
                        "description": "The aggregation metric to calculate."
                    },
                    "condition": {
                        "type": "string",
                        "description": format!(
                            "The condition to filter on. Required for 'average_age'. Known conditions: {}.",
                            conditions.join(", ")
                        )
                    }
                },
                "required": ["metric"]
            }),
        },
        ToolDefinition {
            name: PREDICT_ICD_CODE.to_string(),
            description: "Placeholder for predicting an ICD code from patient data. Requires a trained ML model.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "patient_profile": {
                        "type": "object",
                        "description": "Patient demographic, vital and lab data, e.g. {\"age\": 40, \"gender\": \"F\", \"vital_signs\": {\"heart_rate\": 88}, \"lab_results\": {\"wbc\": 10.1}}",
                        "properties": {
                            "age": {"type": "integer"},
                            "gender": {"type": "string"},
                            "race": {"type": "string"},
                            "vital_signs": {"type": "object"},
                            "lab_results": {"type": "object"}
                        },
                        "required": ["age", "gender"]
                    }
                },
                "required": ["patient_profile"]
            }),
        },
    ]
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct AggregationArgs {
    metric: String,
    #[serde(default)]
    condition: Option<String>,
}

/// Answers MCP requests with the MIMIC-IV tools backed by `executor`.
pub struct MimicHandler<E: QueryExecutor> {
    executor: E,
    datasets: Datasets,
    server_name: String,
}

impl<E: QueryExecutor> MimicHandler<E> {
    pub fn new(executor: E, datasets: Datasets, server_name: impl Into<String>) -> Self {
        Self {
            executor,
            datasets,
            server_name: server_name.into(),
        }
    }

    pub async fn call_tool(&self, params: Value) -> Result<ToolCallResult> {
        let params: ToolCallParams = serde_json::from_value(params)
            .map_err(|e| MimicError::invalid_params(format!("invalid tools/call params: {}", e)))?;
        tracing::info!("Tool call: {}", params.name);

        match params.name.as_str() {
            GET_MIMIC_AGGREGATION => {
                let args: AggregationArgs =
                    match serde_json::from_value(Value::Object(params.arguments)) {
                        Ok(args) => args,
                        Err(e) => {
                            return Ok(ToolCallResult::error(format!(
                                "Error: invalid arguments for {}: {}",
                                GET_MIMIC_AGGREGATION, e
                            )))
                        }
                    };
                let reply = aggregation::get_mimic_aggregation(
                    &self.executor,
                    &self.datasets,
                    &args.metric,
                    args.condition.as_deref(),
                )
                .await;
                Ok(reply.into())
            }
            PREDICT_ICD_CODE => match params.arguments.get("patient_profile") {
                Some(Value::Object(profile)) => Ok(prediction::predict_icd_code(profile).into()),
                _ => Ok(ToolCallResult::error(
                    "Error: 'patient_profile' must be an object",
                )),
            },
            other => Err(MimicError::invalid_params(format!("Unknown tool: {}", other))),
        }
    }
}

#[async_trait]
impl<E: QueryExecutor> McpHandler for MimicHandler<E> {
    async fn handle_request(&self, request: McpRequest) -> Option<McpResponse> {
        let Some(id) = request.id else {
            if !request.method.starts_with(methods::NOTIFICATION_PREFIX) {
                tracing::warn!("Ignoring request without id: {}", request.method);
            }
            return None;
        };

        let outcome = match request.method.as_str() {
            methods::INITIALIZE => {
                if let Some(client) = request.params.get("clientInfo") {
                    tracing::info!("Client connected: {}", client);
                }
                serde_json::to_value(InitializeResult::for_server(&self.server_name))
                    .map_err(MimicError::from)
            }
            methods::PING => Ok(json!({})),
            methods::LIST_TOOLS => Ok(json!({ "tools": tool_definitions() })),
            methods::CALL_TOOL => match self.call_tool(request.params).await {
                Ok(result) => serde_json::to_value(result).map_err(MimicError::from),
                Err(e) => Err(e),
            },
            other => Err(MimicError::MethodNotFound {
                method: other.to_string(),
            }),
        };

        Some(match outcome {
            Ok(result) => McpResponse::success(id, result),
            Err(e) => {
                tracing::warn!("Request failed: {}", e);
                McpResponse::from_error(id, &e)
            }
        })
    }
}
