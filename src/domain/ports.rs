use crate::domain::model::{ExtractedTemplates, GeneratedQuestion, QueryResult, SqlQuery};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Runs standard SQL against the warehouse holding MIMIC-IV.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: &SqlQuery) -> Result<QueryResult>;
}

#[async_trait]
impl<E: QueryExecutor + ?Sized> QueryExecutor for Arc<E> {
    async fn execute(&self, query: &SqlQuery) -> Result<QueryResult> {
        (**self).execute(query).await
    }
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn extract(&self) -> Result<ExtractedTemplates>;
    async fn transform(&self, data: ExtractedTemplates) -> Result<Vec<GeneratedQuestion>>;
    /// Returns the output location, or `None` when there was nothing to write.
    async fn load(&self, questions: Vec<GeneratedQuestion>) -> Result<Option<String>>;
}
