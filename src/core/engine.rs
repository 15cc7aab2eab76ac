use crate::domain::model::GenerationReport;
use crate::domain::ports::Pipeline;
use crate::utils::error::Result;
use crate::utils::monitor::SystemMonitor;

pub struct GenerationEngine<P: Pipeline> {
    pipeline: P,
    monitor: SystemMonitor,
}

impl<P: Pipeline> GenerationEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self::new_with_monitoring(pipeline, false)
    }

    pub fn new_with_monitoring(pipeline: P, monitor_enabled: bool) -> Self {
        Self {
            pipeline,
            monitor: SystemMonitor::new(monitor_enabled),
        }
    }

    pub async fn run(&self) -> Result<GenerationReport> {
        tracing::info!("Starting question generation");
        self.monitor.log_stats("Start");

        let extracted = self.pipeline.extract().await?;
        let templates_read = extracted.templates.len();
        tracing::info!(
            "Loaded {} templates and examples for {} placeholder types",
            templates_read,
            extracted.examples.len()
        );
        self.monitor.log_stats("Extract");

        let questions = self.pipeline.transform(extracted).await?;
        let questions_generated = questions.len();
        self.monitor.log_stats("Transform");

        let output_path = self.pipeline.load(questions).await?;
        self.monitor.log_stats("Load");
        self.monitor.log_final_stats();

        Ok(GenerationReport {
            templates_read,
            questions_generated,
            output_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{ExtractedTemplates, GeneratedQuestion, QuestionTemplate};
    use crate::utils::error::MimicError;
    use async_trait::async_trait;

    struct StubPipeline {
        fail_extract: bool,
    }

    #[async_trait]
    impl Pipeline for StubPipeline {
        async fn extract(&self) -> Result<ExtractedTemplates> {
            if self.fail_extract {
                return Err(MimicError::processing("no templates"));
            }
            Ok(ExtractedTemplates {
                templates: vec![QuestionTemplate {
                    template_type: "count".to_string(),
                    phrasing: "How many admissions?".to_string(),
                }],
                ..Default::default()
            })
        }

        async fn transform(&self, data: ExtractedTemplates) -> Result<Vec<GeneratedQuestion>> {
            Ok(data
                .templates
                .into_iter()
                .map(|t| GeneratedQuestion {
                    template_type: t.template_type,
                    question: t.phrasing,
                })
                .collect())
        }

        async fn load(&self, questions: Vec<GeneratedQuestion>) -> Result<Option<String>> {
            Ok((!questions.is_empty()).then(|| "out.csv".to_string()))
        }
    }

    #[tokio::test]
    async fn test_run_reports_counts() {
        let engine = GenerationEngine::new(StubPipeline { fail_extract: false });
        let report = engine.run().await.unwrap();
        assert_eq!(
            report,
            GenerationReport {
                templates_read: 1,
                questions_generated: 1,
                output_path: Some("out.csv".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_run_propagates_errors() {
        let engine = GenerationEngine::new(StubPipeline { fail_extract: true });
        assert!(engine.run().await.is_err());
    }
}
