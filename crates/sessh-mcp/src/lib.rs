//! sessh-mcp - Model Context Protocol server for sessh
//!
//! Exposes the sessh session operations (`open`, `run`, `logs`, `status`,
//! `close`) as MCP tools over newline-delimited JSON-RPC on stdio. Every
//! tool call runs exactly one sessh process.

pub mod error;
pub mod protocol;
pub mod server;

pub use error::{McpError, Result};
pub use server::{McpServer, SERVER_NAME};
