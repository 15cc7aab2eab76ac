use crate::config::Datasets;
use crate::domain::model::{QueryParameter, SqlQuery, ToolReply};
use crate::domain::ports::QueryExecutor;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    AverageAge,
    PatientCount,
}

impl Metric {
    pub const ALL: [Metric; 2] = [Metric::AverageAge, Metric::PatientCount];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::AverageAge => "average_age",
            Metric::PatientCount => "patient_count",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = AggregationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| AggregationError::UnsupportedMetric(s.to_string()))
    }
}

/// Diagnosis definition as ICD `LIKE` patterns for both coding versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Condition {
    pub name: &'static str,
    pub icd9_pattern: &'static str,
    pub icd10_pattern: &'static str,
}

// Simplified code sets; sepsis has many more codes than these two prefixes.
pub const CONDITIONS: &[Condition] = &[Condition {
    name: "sepsis",
    icd9_pattern: "99591",
    icd10_pattern: "A41%",
}];

pub fn find_condition(name: &str) -> Option<&'static Condition> {
    let name = name.trim().to_lowercase();
    CONDITIONS.iter().find(|c| c.name == name)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationError {
    #[error("Error: 'condition' parameter is required for '{0}' metric.")]
    ConditionRequired(Metric),

    #[error("Error: Condition '{condition}' not implemented for '{metric}'.")]
    UnknownCondition { condition: String, metric: Metric },

    #[error("Error: Unsupported metric '{0}'.")]
    UnsupportedMetric(String),
}

const DIAGNOSIS_FILTER: &str = "(d.icd_version = 9 AND d.icd_code LIKE @icd9_pattern)
        OR (d.icd_version = 10 AND d.icd_code LIKE @icd10_pattern)";

fn with_condition_parameters(query: SqlQuery, condition: &Condition) -> SqlQuery {
    query
        .with_parameter(QueryParameter::string("icd9_pattern", condition.icd9_pattern))
        .with_parameter(QueryParameter::string("icd10_pattern", condition.icd10_pattern))
}

fn resolve_condition(metric: Metric, condition: &str) -> Result<&'static Condition, AggregationError> {
    find_condition(condition).ok_or_else(|| AggregationError::UnknownCondition {
        condition: condition.to_string(),
        metric,
    })
}

pub fn build_aggregation_query(
    metric: &str,
    condition: Option<&str>,
    datasets: &Datasets,
) -> Result<SqlQuery, AggregationError> {
    let metric: Metric = metric.parse()?;
    let condition = condition.filter(|c| !c.trim().is_empty());

    match metric {
        Metric::AverageAge => {
            let condition = condition.ok_or(AggregationError::ConditionRequired(metric))?;
            let condition = resolve_condition(metric, condition)?;
            // Age at admission is anchor_age shifted by the years between anchor_year and admittime.
            let sql = format!(
                "SELECT AVG(CAST(adm.admission_age AS BIGNUMERIC)) AS average_age
FROM (
    SELECT DISTINCT
        a.hadm_id,
        p.anchor_age + (EXTRACT(YEAR FROM a.admittime) - p.anchor_year) AS admission_age
    FROM {admissions} a
    JOIN {patients} p ON a.subject_id = p.subject_id
    JOIN {diagnoses} d ON a.hadm_id = d.hadm_id
    WHERE {filter}
) adm",
                admissions = datasets.hosp_table("admissions"),
                patients = datasets.hosp_table("patients"),
                diagnoses = datasets.hosp_table("diagnoses_icd"),
                filter = DIAGNOSIS_FILTER,
            );
            Ok(with_condition_parameters(SqlQuery::new(sql), condition))
        }
        Metric::PatientCount => match condition {
            None => Ok(SqlQuery::new(format!(
                "SELECT COUNT(DISTINCT subject_id) AS total_patients
FROM {patients}",
                patients = datasets.hosp_table("patients"),
            ))),
            Some(condition) => {
                let condition = resolve_condition(metric, condition)?;
                let sql = format!(
                    "SELECT COUNT(DISTINCT d.subject_id) AS total_patients
FROM {diagnoses} d
WHERE {filter}",
                    diagnoses = datasets.hosp_table("diagnoses_icd"),
                    filter = DIAGNOSIS_FILTER,
                );
                Ok(with_condition_parameters(SqlQuery::new(sql), condition))
            }
        },
    }
}

/// `get_mimic_aggregation` tool body.
pub async fn get_mimic_aggregation<E: QueryExecutor + ?Sized>(
    executor: &E,
    datasets: &Datasets,
    metric: &str,
    condition: Option<&str>,
) -> ToolReply {
    let query = match build_aggregation_query(metric, condition, datasets) {
        Ok(query) => query,
        Err(e) => {
            tracing::info!("Rejected aggregation request: {}", e);
            return ToolReply::error(e.to_string());
        }
    };

    match executor.execute(&query).await {
        Ok(result) if result.is_empty() => {
            ToolReply::ok("No results found for the specified aggregation.")
        }
        Ok(result) => ToolReply::ok(result.to_table_string()),
        Err(e) => {
            tracing::error!("BigQuery query failed: {}", e);
            ToolReply::error(format!("Error executing BigQuery query: {}", e))
        }
    }
}
