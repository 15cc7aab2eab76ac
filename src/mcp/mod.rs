//! Model Context Protocol server over stdio.

pub mod protocol;
pub mod tools;

pub use protocol::{McpHandler, McpRequest, McpResponse, McpServer};
pub use tools::MimicHandler;
