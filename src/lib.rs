pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod mcp;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::{BigQueryClient, LocalStorage, TokenSource};
pub use config::TomlConfig;
pub use core::{engine::GenerationEngine, question_pipeline::QuestionPipeline};
pub use mcp::{McpServer, MimicHandler};
pub use utils::error::{MimicError, Result};
