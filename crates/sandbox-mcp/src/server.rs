//! SandboxServer - MCP server that exposes each sandbox as a tool.
//!
//! The tool set is data-driven: one tool per loaded sandbox definition.
//! The registry is built once and shared read-only by every session.

use crate::handler::{HandlerError, ToolHandler};
use crate::tool::new_tool;

use rmcp::{
    handler::server::ServerHandler,
    model::*,
    service::{RequestContext, RoleServer},
    ErrorData,
};
use sandbox_core::{ContainerRuntime, SandboxConfig};
use std::collections::HashMap;
use std::sync::Arc;

/// One registered sandbox and its derived tool.
#[derive(Debug, Clone)]
pub struct RegisteredTool {
    /// Source definition.
    pub config: Arc<SandboxConfig>,
    /// Tool descriptor advertised to clients.
    pub tool: Tool,
}

/// Immutable set of tools, built once at startup.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Register one tool per sandbox definition, in order.
    ///
    /// Ids are unique after a successful load; a repeated id here keeps the
    /// first registration.
    pub fn new(configs: impl IntoIterator<Item = SandboxConfig>) -> Self {
        let mut registry = Self::default();
        for config in configs {
            if registry.by_name.contains_key(&config.id) {
                tracing::warn!(tool = %config.id, "Duplicate tool id ignored");
                continue;
            }
            let tool = new_tool(&config);
            registry
                .by_name
                .insert(config.id.clone(), registry.tools.len());
            tracing::info!(tool = %config.id, "Added tool from config");
            registry.tools.push(RegisteredTool {
                config: Arc::new(config),
                tool,
            });
        }
        registry
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.by_name.get(name).map(|&i| &self.tools[i])
    }

    /// All tool descriptors, in registration order.
    pub fn tools(&self) -> Vec<Tool> {
        self.tools.iter().map(|t| t.tool.clone()).collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// MCP server for sandbox tools.
#[derive(Clone)]
pub struct SandboxServer {
    /// Registered tools, shared by every session
    registry: Arc<ToolRegistry>,

    /// Runs validated calls on the container runtime
    handler: ToolHandler,
}

impl SandboxServer {
    /// Create a server exposing `configs` as tools backed by `runtime`.
    pub fn new(
        configs: impl IntoIterator<Item = SandboxConfig>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Self {
            registry: Arc::new(ToolRegistry::new(configs)),
            handler: ToolHandler::new(runtime),
        }
    }

    /// Get a reference to the tool registry.
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Helper to create success result with JSON content
    fn json_result<T: serde::Serialize>(data: &T) -> CallToolResult {
        match serde_json::to_string_pretty(data) {
            Ok(json) => CallToolResult::success(vec![Content::text(json)]),
            Err(e) => CallToolResult::error(vec![Content::text(format!(
                "JSON serialization error: {e}"
            ))]),
        }
    }

    /// Helper to create error result
    fn error_result(message: impl Into<String>) -> CallToolResult {
        CallToolResult::error(vec![Content::text(message.into())])
    }

    /// Dispatch one call by tool name.
    ///
    /// Per-call failures come back as error results, never as protocol errors.
    pub async fn call(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> CallToolResult {
        let Some(entry) = self.registry.get(name) else {
            return Self::error_result(format!("Unknown tool: {name}"));
        };

        match self.handler.handle(&entry.config, arguments, cancel).await {
            Ok(response) => {
                tracing::info!(
                    tool = %name,
                    exit_code = response.exit_code,
                    timed_out = response.timed_out,
                    "Sandbox call completed"
                );
                Self::json_result(&response)
            }
            Err(e @ HandlerError::Validation(_)) => {
                tracing::debug!(tool = %name, error = %e, "Rejected call");
                Self::error_result(e.to_string())
            }
            Err(e) => {
                tracing::error!(tool = %name, error = %e, "Sandbox call failed");
                Self::error_result(e.to_string())
            }
        }
    }
}

// ============================================================================
// ServerHandler Implementation
// ============================================================================

impl ServerHandler for SandboxServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Sandbox MCP Server - each tool runs a program in a fresh, isolated Docker \
                 container and returns its exit code, stdout and stderr. A non-zero exit code \
                 is the program's own failure, not a tool failure."
                    .into(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult {
            tools: self.registry.tools(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(self
            .call(&request.name, request.arguments, &context.ct)
            .await)
    }
}
