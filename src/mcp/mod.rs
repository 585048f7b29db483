//! MCP (Model Context Protocol) adapter
//!
//! A thin JSON-RPC-over-stdio surface; every tool call validates its input
//! and delegates to core operations.

pub mod protocol;
pub mod tools;

pub use protocol::{McpHandler, McpRequest, McpResponse, McpServer};
