use crate::config::Datasets;
use crate::domain::model::SqlQuery;
use crate::domain::ports::QueryExecutor;

pub const IN_HOSPITAL_MORTALITY: &str = "In-hospital mortality";

/// Placeholder names understood in question templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaceholderKind {
    ExposureIntervention,
    Outcome,
    Measurement,
    PatientPopulation,
    OutcomeMeasurement,
}

impl PlaceholderKind {
    pub const ALL: [PlaceholderKind; 5] = [
        PlaceholderKind::ExposureIntervention,
        PlaceholderKind::Outcome,
        PlaceholderKind::Measurement,
        PlaceholderKind::PatientPopulation,
        PlaceholderKind::OutcomeMeasurement,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PlaceholderKind::ExposureIntervention => "Exposure/Intervention",
            PlaceholderKind::Outcome => "Outcome",
            PlaceholderKind::Measurement => "Measurement",
            PlaceholderKind::PatientPopulation => "Patient Population",
            PlaceholderKind::OutcomeMeasurement => "Outcome/Measurement",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Query returning a single `example` column with at most `fetch_limit` rows.
    pub fn query(&self, datasets: &Datasets, fetch_limit: usize) -> SqlQuery {
        let half = (fetch_limit / 2).max(1);
        let parts = match self {
            PlaceholderKind::ExposureIntervention => {
                vec![top_drugs(datasets, half), top_procedures(datasets, half)]
            }
            PlaceholderKind::Outcome => vec![
                top_discharge_locations(datasets, half),
                top_diagnoses(datasets, half),
                mortality_literal(),
            ],
            PlaceholderKind::Measurement => {
                vec![blood_lab_labels(datasets, half), chart_item_labels(datasets, half)]
            }
            PlaceholderKind::PatientPopulation => {
                vec![top_admission_types(datasets, half), top_diagnoses(datasets, half)]
            }
            PlaceholderKind::OutcomeMeasurement => vec![
                blood_lab_labels(datasets, half),
                top_diagnoses(datasets, half),
                mortality_literal(),
            ],
        };

        SqlQuery::new(format!(
            "{}\nORDER BY example\nLIMIT {}",
            parts.join("\nUNION ALL\n"),
            fetch_limit
        ))
    }
}

fn top_drugs(datasets: &Datasets, limit: usize) -> String {
    format!(
        "(SELECT drug AS example FROM {} WHERE drug IS NOT NULL GROUP BY drug ORDER BY COUNT(*) DESC LIMIT {})",
        datasets.hosp_table("prescriptions"),
        limit
    )
}

fn top_procedures(datasets: &Datasets, limit: usize) -> String {
    format!(
        "(SELECT TRIM(dp.long_title) AS example FROM {} pr JOIN {} dp ON pr.icd_code = dp.icd_code AND pr.icd_version = dp.icd_version WHERE dp.long_title IS NOT NULL GROUP BY example ORDER BY COUNT(*) DESC LIMIT {})",
        datasets.hosp_table("procedures_icd"),
        datasets.hosp_table("d_icd_procedures"),
        limit
    )
}

fn top_diagnoses(datasets: &Datasets, limit: usize) -> String {
    format!(
        "(SELECT TRIM(dd.long_title) AS example FROM {} di JOIN {} dd ON di.icd_code = dd.icd_code AND di.icd_version = dd.icd_version WHERE dd.long_title IS NOT NULL GROUP BY example ORDER BY COUNT(*) DESC LIMIT {})",
        datasets.hosp_table("diagnoses_icd"),
        datasets.hosp_table("d_icd_diagnoses"),
        limit
    )
}

fn top_discharge_locations(datasets: &Datasets, limit: usize) -> String {
    format!(
        "(SELECT discharge_location AS example FROM {} WHERE discharge_location IS NOT NULL GROUP BY discharge_location ORDER BY COUNT(*) DESC LIMIT {})",
        datasets.hosp_table("admissions"),
        limit
    )
}

fn top_admission_types(datasets: &Datasets, limit: usize) -> String {
    format!(
        "(SELECT admission_type AS example FROM {} WHERE admission_type IS NOT NULL GROUP BY admission_type ORDER BY COUNT(*) DESC LIMIT {})",
        datasets.hosp_table("admissions"),
        limit
    )
}

// Dictionary tables only; ranking by labevents/chartevents volume would scan hundreds of millions of rows.
fn blood_lab_labels(datasets: &Datasets, limit: usize) -> String {
    format!(
        "(SELECT DISTINCT label AS example FROM {} WHERE fluid = 'Blood' AND label IS NOT NULL ORDER BY example LIMIT {})",
        datasets.hosp_table("d_labitems"),
        limit
    )
}

fn chart_item_labels(datasets: &Datasets, limit: usize) -> String {
    format!(
        "(SELECT DISTINCT label AS example FROM {} WHERE category IN ('Routine Vital Signs', 'Respiratory', 'Labs', 'Neurological') AND label IS NOT NULL ORDER BY example LIMIT {})",
        datasets.icu_table("d_items"),
        limit
    )
}

fn mortality_literal() -> String {
    format!("(SELECT '{}' AS example)", IN_HOSPITAL_MORTALITY)
}

/// Example values for one placeholder; unknown names and failed queries yield none.
pub async fn fetch_examples<E: QueryExecutor + ?Sized>(
    executor: &E,
    datasets: &Datasets,
    placeholder: &str,
    fetch_limit: usize,
) -> Vec<String> {
    let Some(kind) = PlaceholderKind::from_name(placeholder) else {
        tracing::warn!("No query defined for placeholder type '{}'.", placeholder);
        return Vec::new();
    };

    tracing::info!(
        "Fetching up to {} examples for placeholder type: {}...",
        fetch_limit,
        placeholder
    );
    match executor.execute(&kind.query(datasets, fetch_limit)).await {
        Ok(result) => {
            let examples = result.column_strings("example");
            tracing::info!("  Fetched {} examples.", examples.len());
            examples
        }
        Err(e) => {
            tracing::error!(
                "Error executing BigQuery query for {}: {} ({})",
                placeholder,
                e,
                e.recovery_suggestion()
            );
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{Column, QueryResult};
    use crate::utils::error::{MimicError, Result};
    use async_trait::async_trait;
    use serde_json::json;

    struct FixedExecutor(Option<QueryResult>);

    #[async_trait]
    impl QueryExecutor for FixedExecutor {
        async fn execute(&self, _query: &SqlQuery) -> Result<QueryResult> {
            self.0.clone().ok_or_else(|| MimicError::BigQueryError {
                status: 400,
                message: "Syntax error".to_string(),
            })
        }
    }

    #[test]
    fn test_names_round_trip() {
        for kind in PlaceholderKind::ALL {
            assert_eq!(PlaceholderKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(PlaceholderKind::from_name("Comorbidity"), None);
    }

    #[test]
    fn test_query_limits_split_between_halves() {
        let sql = PlaceholderKind::ExposureIntervention
            .query(&Datasets::default(), 20)
            .sql;
        assert!(sql.contains("`physionet-data.mimiciv_3_1_hosp.prescriptions`"));
        assert!(sql.contains("`physionet-data.mimiciv_3_1_hosp.d_icd_procedures`"));
        assert_eq!(sql.matches("LIMIT 10)").count(), 2);
        assert!(sql.ends_with("ORDER BY example\nLIMIT 20"));
    }

    #[test]
    fn test_small_fetch_limit_keeps_one_row_per_half() {
        let sql = PlaceholderKind::Measurement.query(&Datasets::default(), 1).sql;
        assert_eq!(sql.matches("LIMIT 1)").count(), 2);
        assert!(sql.contains("`physionet-data.mimiciv_3_1_icu.d_items`"));
    }

    #[test]
    fn test_outcome_queries_include_mortality() {
        for kind in [PlaceholderKind::Outcome, PlaceholderKind::OutcomeMeasurement] {
            let sql = kind.query(&Datasets::default(), 20).sql;
            assert!(sql.contains("SELECT 'In-hospital mortality' AS example"));
        }
    }

    #[tokio::test]
    async fn test_fetch_examples_reads_example_column() {
        let executor = FixedExecutor(Some(QueryResult {
            columns: vec![Column {
                name: "example".to_string(),
                field_type: "STRING".to_string(),
            }],
            rows: vec![vec![json!("HOME")], vec![json!("In-hospital mortality")]],
        }));
        let examples = fetch_examples(&executor, &Datasets::default(), "Outcome", 20).await;
        assert_eq!(examples, vec!["HOME", "In-hospital mortality"]);
    }

    #[tokio::test]
    async fn test_fetch_examples_failures_yield_nothing() {
        let executor = FixedExecutor(None);
        assert!(fetch_examples(&executor, &Datasets::default(), "Outcome", 20)
            .await
            .is_empty());
        assert!(fetch_examples(&executor, &Datasets::default(), "Unknown", 20)
            .await
            .is_empty());
    }
}
