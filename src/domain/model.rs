use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Named scalar bound to an `@name` placeholder in standard SQL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParameter {
    pub name: String,
    pub param_type: String,
    pub value: String,
}

impl QueryParameter {
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: "STRING".to_string(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlQuery {
    pub sql: String,
    pub parameters: Vec<QueryParameter>,
}

impl SqlQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: QueryParameter) -> Self {
        self.parameters.push(parameter);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

/// Rows as returned by the query API: one JSON cell per column, `null` for NULL.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResult {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Non-null values of one column rendered as text.
    pub fn column_strings(&self, name: &str) -> Vec<String> {
        let Some(index) = self.column_index(name) else {
            return Vec::new();
        };
        self.rows
            .iter()
            .filter_map(|row| row.get(index))
            .filter(|cell| !cell.is_null())
            .map(|cell| render_cell(cell, "STRING"))
            .collect()
    }

    /// Plain-text table: header line then one line per row, cells right-aligned, no index.
    pub fn to_table_string(&self) -> String {
        let rendered: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .enumerate()
                    .map(|(i, col)| {
                        row.get(i)
                            .map(|cell| render_cell(cell, &col.field_type))
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .collect();

        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, col)| {
                rendered
                    .iter()
                    .map(|row| row[i].chars().count())
                    .chain(std::iter::once(col.name.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let format_line = |cells: Vec<&str>| -> String {
            cells
                .iter()
                .zip(&widths)
                .map(|(cell, width)| format!("{:>width$}", cell, width = *width))
                .collect::<Vec<_>>()
                .join("  ")
        };

        let mut lines = vec![format_line(
            self.columns.iter().map(|c| c.name.as_str()).collect(),
        )];
        for row in &rendered {
            lines.push(format_line(row.iter().map(String::as_str).collect()));
        }
        lines.join("\n")
    }
}

fn render_cell(cell: &Value, field_type: &str) -> String {
    match cell {
        Value::Null => "NULL".to_string(),
        Value::String(s) if field_type == "TIMESTAMP" => render_timestamp(s),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_timestamp(raw: &str) -> String {
    let Ok(seconds) = raw.parse::<f64>() else {
        return raw.to_string();
    };
    let micros = (seconds * 1_000_000.0).round() as i64;
    DateTime::<Utc>::from_timestamp_micros(micros)
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| raw.to_string())
}

/// Demographics, vitals and labs supplied to `predict_icd_code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientProfile {
    pub age: i64,
    pub gender: String,
    #[serde(default)]
    pub race: Option<String>,
    #[serde(default)]
    pub vital_signs: HashMap<String, Value>,
    #[serde(default)]
    pub lab_results: HashMap<String, Value>,
}

/// Text answer of a tool call; `is_error` marks failures the caller should see as such.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolReply {
    pub text: String,
    pub is_error: bool,
}

impl ToolReply {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

/// One row of the template input CSV.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionTemplate {
    pub template_type: String,
    pub phrasing: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedQuestion {
    #[serde(rename = "Template_Type")]
    pub template_type: String,
    #[serde(rename = "Generated_Question")]
    pub question: String,
}

/// Templates plus the example values fetched for every placeholder they use.
#[derive(Debug, Clone, Default)]
pub struct ExtractedTemplates {
    pub templates: Vec<QuestionTemplate>,
    pub examples: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationReport {
    pub templates_read: usize,
    pub questions_generated: usize,
    pub output_path: Option<String>,
}
