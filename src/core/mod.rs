pub mod aggregation;
pub mod engine;
pub mod placeholders;
pub mod prediction;
pub mod question_pipeline;
pub mod templates;

pub use crate::domain::model::{QueryResult, SqlQuery, ToolReply};
pub use crate::domain::ports::{Pipeline, QueryExecutor, Storage};
pub use crate::utils::error::Result;
