//! Tools domain module.
//!
//! Tools are named, versioned capabilities MCP clients can call. Every call
//! goes through the same contract: the arguments are checked against the
//! tool's input schema, the implementation runs, and its envelope is checked
//! against the output schema before it is serialized.
//!
//! ## Architecture
//!
//! - `schema.rs` - Typed input/output contracts, violations, canonical JSON
//! - `descriptor.rs` - Immutable tool metadata and its builder
//! - `handlers.rs` - The implementation trait and function-name table
//! - `registry.rs` - Catalog of descriptors (lookup, filtering, counts)
//! - `catalog.rs` - YAML tool definitions compiled into a registry
//! - `dispatcher.rs` - Single entry point turning calls into envelopes
//! - `definitions/` - The MOF tools (one file per tool)
//! - `error.rs` - Per-call and startup error types
//!
//! ## Adding a New Tool
//!
//! 1. Create a new file in `definitions/` with params and output structs
//! 2. Implement `ToolImplementation` and expose a `binding()`
//! 3. Add it to `builtin_implementations` in `definitions/mod.rs`
//! 4. Declare it in `tool_definitions.yaml`

pub mod catalog;
pub mod definitions;
pub mod descriptor;
pub mod dispatcher;
mod error;
mod handlers;
mod registry;
pub mod schema;

pub use catalog::{ToolDefinition, ToolDefinitions, compile_catalog};
pub use definitions::{Collaborators, builtin_implementations};
pub use descriptor::{ToolCategory, ToolDescriptor, ToolStatus, ToolSummary};
pub use dispatcher::{DispatchExit, DispatchOutcome, Dispatcher};
pub use error::{ConfigError, EntryError, ToolError};
pub use handlers::*;
pub use registry::ToolRegistry;
pub use schema::{
    Failure, InputSchema, OutputSchema, SchemaError, ToolParams, ValidationError, canonical_json,
};
