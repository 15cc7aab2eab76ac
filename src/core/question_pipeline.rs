use crate::config::Datasets;
use crate::core::placeholders::{fetch_examples, PlaceholderKind};
use crate::core::templates::{find_placeholders, generate_permutations};
use crate::domain::model::{ExtractedTemplates, GeneratedQuestion, QuestionTemplate};
use crate::domain::ports::{Pipeline, QueryExecutor, Storage};
use crate::utils::error::{MimicError, Result};
use crate::utils::validation::{validate_path, validate_positive_number, Validate};
use std::collections::BTreeSet;

pub const PHRASING_COLUMN: &str = "Original_Phrasing";
pub const TYPE_COLUMN: &str = "Template_Type";
const MISSING_TYPE: &str = "N/A";

#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub input_path: String,
    pub output_path: String,
    /// Maximum permutations per template.
    pub limit: usize,
    /// Maximum example values per placeholder type.
    pub fetch_limit: usize,
}

impl Validate for GenerationOptions {
    fn validate(&self) -> Result<()> {
        validate_path("input", &self.input_path)?;
        validate_path("output", &self.output_path)?;
        validate_positive_number("limit", self.limit, 1)?;
        validate_positive_number("fetch_limit", self.fetch_limit, 1)?;
        Ok(())
    }
}

/// Reads templates, fills their placeholders with MIMIC-IV values and writes the questions as CSV.
pub struct QuestionPipeline<S: Storage, E: QueryExecutor> {
    storage: S,
    executor: E,
    datasets: Datasets,
    options: GenerationOptions,
}

impl<S: Storage, E: QueryExecutor> QuestionPipeline<S, E> {
    pub fn new(storage: S, executor: E, datasets: Datasets, options: GenerationOptions) -> Self {
        Self {
            storage,
            executor,
            datasets,
            options,
        }
    }

    fn parse_templates(&self, data: &[u8]) -> Result<Vec<QuestionTemplate>> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(data);
        let headers = reader.headers()?.clone();

        let phrasing_idx = headers
            .iter()
            .position(|h| h.trim() == PHRASING_COLUMN)
            .ok_or_else(|| MimicError::ValidationError {
                message: format!("Input CSV must contain a column named '{}'", PHRASING_COLUMN),
            })?;
        let type_idx = headers.iter().position(|h| h.trim() == TYPE_COLUMN);
        if type_idx.is_none() {
            tracing::warn!(
                "'{}' column not found in input CSV. Output will use '{}'.",
                TYPE_COLUMN,
                MISSING_TYPE
            );
        }

        let mut templates = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let phrasing = record.get(phrasing_idx).unwrap_or("").trim();
            if phrasing.is_empty() {
                tracing::warn!("Skipping row {}: empty {}", line + 2, PHRASING_COLUMN);
                continue;
            }
            let template_type = type_idx
                .and_then(|i| record.get(i))
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .unwrap_or(MISSING_TYPE);

            templates.push(QuestionTemplate {
                template_type: template_type.to_string(),
                phrasing: phrasing.to_string(),
            });
        }
        Ok(templates)
    }
}

/// Placeholder types to query; the combined Outcome/Measurement is served from its two parts.
pub fn needed_placeholder_types(templates: &[QuestionTemplate]) -> BTreeSet<String> {
    let mut needed = BTreeSet::new();
    for template in templates {
        for name in find_placeholders(&template.phrasing) {
            if name == PlaceholderKind::OutcomeMeasurement.name() {
                needed.insert(PlaceholderKind::Outcome.name().to_string());
                needed.insert(PlaceholderKind::Measurement.name().to_string());
            } else {
                needed.insert(name);
            }
        }
    }
    needed
}

#[async_trait::async_trait]
impl<S: Storage, E: QueryExecutor> Pipeline for QuestionPipeline<S, E> {
    async fn extract(&self) -> Result<ExtractedTemplates> {
        tracing::info!("Reading input CSV: {}", self.options.input_path);
        let data = self.storage.read_file(&self.options.input_path).await?;
        let templates = self.parse_templates(&data)?;

        let needed = needed_placeholder_types(&templates);
        tracing::info!("Identified needed placeholder types: {:?}", needed);

        let mut extracted = ExtractedTemplates {
            templates,
            ..Default::default()
        };
        for name in needed {
            let examples = fetch_examples(
                &self.executor,
                &self.datasets,
                &name,
                self.options.fetch_limit,
            )
            .await;
            extracted.examples.insert(name, examples);
        }

        let outcome = extracted.examples.get(PlaceholderKind::Outcome.name());
        let measurement = extracted.examples.get(PlaceholderKind::Measurement.name());
        if outcome.is_some() || measurement.is_some() {
            let combined: Vec<String> = outcome
                .into_iter()
                .chain(measurement)
                .flatten()
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .take(self.options.fetch_limit)
                .collect();
            extracted.examples.insert(
                PlaceholderKind::OutcomeMeasurement.name().to_string(),
                combined,
            );
        }

        Ok(extracted)
    }

    async fn transform(&self, data: ExtractedTemplates) -> Result<Vec<GeneratedQuestion>> {
        let mut questions = Vec::new();
        for template in &data.templates {
            for question in
                generate_permutations(&template.phrasing, &data.examples, self.options.limit)
            {
                questions.push(GeneratedQuestion {
                    template_type: template.template_type.clone(),
                    question,
                });
            }
        }
        tracing::info!("Generated a total of {} questions.", questions.len());
        Ok(questions)
    }

    async fn load(&self, questions: Vec<GeneratedQuestion>) -> Result<Option<String>> {
        if questions.is_empty() {
            tracing::info!("No permutations were generated to write to the output file.");
            return Ok(None);
        }

        let mut writer = csv::WriterBuilder::new()
            .quote_style(csv::QuoteStyle::Always)
            .from_writer(Vec::new());
        for question in &questions {
            writer.serialize(question)?;
        }
        let data = writer
            .into_inner()
            .map_err(|e| MimicError::processing(format!("could not flush CSV output: {}", e.error())))?;

        tracing::info!(
            "Writing {} rows to output CSV: {}",
            questions.len(),
            self.options.output_path
        );
        self.storage
            .write_file(&self.options.output_path, &data)
            .await?;
        Ok(Some(self.options.output_path.clone()))
    }
}
