//! MCP Server implementation and lifecycle management.
//!
//! This module contains the main server handler that implements the MCP
//! protocol on top of the tool dispatcher.
//!
//! ## Tool Architecture
//!
//! Tools are declared in `tool_definitions.yaml` (or the file named by
//! `MCP_TOOL_DEFINITIONS`) and implemented in `domains/tools/definitions/`.
//! The catalog is compiled once here, at startup; after that the server only
//! holds immutable state and every call goes through the [`Dispatcher`].
//! **Adding a new tool does NOT require modifying this file!**

use rmcp::{
    ErrorData as McpError, RoleServer, ServerHandler, model::*, service::RequestContext,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::config::Config;
use super::error::{Error, Result};
use crate::domains::tools::catalog::{builtin_definitions, compile_catalog, load_definitions};
use crate::domains::tools::definitions::CommandBackend;
use crate::domains::tools::{
    Collaborators, DispatchOutcome, Dispatcher, ToolCategory, ToolDescriptor, ToolRegistry,
    builtin_implementations,
};

/// The main MCP server handler.
///
/// This struct implements the `ServerHandler` trait from rmcp and forwards
/// tool requests to the dispatcher.
#[derive(Clone)]
pub struct McpServer {
    /// Server configuration.
    config: Arc<Config>,

    /// Dispatcher over the compiled tool catalog.
    dispatcher: Dispatcher,
}

impl McpServer {
    /// Create a new MCP server, compiling the tool catalog.
    ///
    /// Fails when the tool definitions cannot be read or any entry is
    /// invalid; a server never starts with a partial catalog.
    pub fn new(config: Config) -> Result<Self> {
        let definitions = match &config.catalog.definitions_path {
            Some(path) => load_definitions(path)?,
            None => builtin_definitions()?,
        };

        let mut collaborators = Collaborators::new()?;
        if let Some(command) = &config.dependencies.energy_command {
            let backend = CommandBackend::from_command_line(command)
                .ok_or_else(|| Error::config("MCP_ENERGY_COMMAND is empty"))?
                .with_timeout(Duration::from_secs(config.dependencies.backend_timeout_secs));
            collaborators = collaborators.with_backend(Arc::new(backend));
        }

        let implementations = builtin_implementations(&collaborators)?;
        let registry = compile_catalog(&definitions, &implementations)?;
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            collaborators.available_dependencies(),
        );

        Ok(Self::with_dispatcher(config, dispatcher))
    }

    /// Create a server around an already built dispatcher.
    pub fn with_dispatcher(config: Config, dispatcher: Dispatcher) -> Self {
        Self {
            config: Arc::new(config),
            dispatcher,
        }
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.config.server.name
    }

    /// Get the server version.
    pub fn version(&self) -> &str {
        &self.config.server.version
    }

    /// Get the server configuration.
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// The tool catalog.
    pub fn registry(&self) -> &ToolRegistry {
        self.dispatcher.registry()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    // ========================================================================
    // Transport-neutral tool operations
    // ========================================================================

    /// List tools as JSON, optionally filtered by category and tag.
    ///
    /// An unknown category is reported as an error message.
    pub fn list_tools(
        &self,
        category: Option<&str>,
        tag: Option<&str>,
    ) -> std::result::Result<Vec<Value>, String> {
        let category = category
            .map(str::parse::<ToolCategory>)
            .transpose()
            .map_err(|e| e.to_string())?;

        Ok(self
            .registry()
            .list(category, tag)
            .into_iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name(),
                    "description": t.description(),
                    "category": t.category(),
                    "version": t.version(),
                    "tags": t.tags(),
                    "status": t.status(),
                    "requires": t.requires(),
                    "inputSchema": &*t.input_schema().json_schema(),
                    "outputSchema": &*t.output_schema().json_schema(),
                })
            })
            .collect())
    }

    /// Number of tools per category, every category included.
    pub fn categories(&self) -> Value {
        let counts: serde_json::Map<String, Value> = self
            .registry()
            .counts_by_category()
            .into_iter()
            .map(|(category, count)| (category.to_string(), Value::from(count)))
            .collect();
        Value::Object(counts)
    }

    /// Call a tool by name.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> DispatchOutcome {
        self.dispatcher.dispatch(name, arguments).await
    }
}

/// Describe a registered tool the way MCP clients expect it.
pub fn to_mcp_tool(descriptor: &ToolDescriptor) -> Tool {
    Tool {
        name: descriptor.name().to_string().into(),
        description: Some(descriptor.description().to_string().into()),
        input_schema: descriptor.input_schema().json_schema(),
        annotations: None,
        output_schema: Some(descriptor.output_schema().json_schema()),
        icons: None,
        meta: None,
        title: None,
    }
}

/// Wrap a dispatch outcome in an MCP tool result.
///
/// The canonical envelope is always the text content. Successful envelopes
/// are also attached as structured content, matching the advertised output
/// schema.
pub fn to_call_result(outcome: DispatchOutcome) -> CallToolResult {
    let structured_content = if outcome.success {
        serde_json::from_str(&outcome.envelope).ok()
    } else {
        None
    };
    CallToolResult {
        content: vec![Content::text(outcome.envelope)],
        structured_content,
        is_error: Some(!outcome.success),
        meta: None,
    }
}

impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "MOF research tools: search the MOF database, parse CIF/XYZ/POSCAR \
                 structures, calculate energies and forces, and optimize geometries. \
                 Every tool returns a JSON envelope with a 'success' field."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    #[instrument(skip(self, _context))]
    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<ListToolsResult, McpError> {
        info!("Listing tools");
        let tools = self
            .registry()
            .list(None, None)
            .into_iter()
            .map(|t| to_mcp_tool(t.as_ref()))
            .collect();
        Ok(ListToolsResult {
            tools,
            next_cursor: None,
            meta: None,
        })
    }

    #[instrument(skip(self, request, _context), fields(tool = %request.name))]
    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        let arguments = request.arguments.map(Value::Object).unwrap_or(Value::Null);
        let outcome = self.dispatcher.dispatch(&request.name, arguments).await;
        if !outcome.success {
            warn!("Tool call ended with {:?}", outcome.exit);
        }
        Ok(to_call_result(outcome))
    }
}
