//! MOF Tools MCP Server Library
//!
//! This crate provides a Model Context Protocol (MCP) server exposing
//! validated tools for Metal-Organic Framework research.
//!
//! # Architecture
//!
//! - **core**: Configuration, error handling, the MCP server handler and transports
//! - **domains**: Business logic organized by bounded contexts
//!   - **tools**: Schema layer, descriptors, registry, catalog, dispatcher and the MOF tools
//!
//! # Example
//!
//! ```rust,no_run
//! use mof_tools_server::core::{Config, McpServer};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = McpServer::new(Config::from_env())?;
//!     let envelope = server
//!         .dispatcher()
//!         .invoke("search_mofs", json!({ "query": "MOF-5" }))
//!         .await;
//!     println!("{envelope}");
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod domains;

// Re-export commonly used types for convenience
pub use core::{Config, Error, McpServer, Result};
