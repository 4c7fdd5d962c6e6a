//! # sandbox-mcp
//!
//! MCP (Model Context Protocol) server exposing Docker-backed sandboxes as
//! tools to AI agents.
//!
//! Every directory under the sandboxes path with a `config.json` becomes
//! one tool. Calling the tool runs the sandbox image in a fresh container
//! with the caller's arguments and returns exit code, stdout and stderr.
//!
//! ## Quick Start
//!
//! ```bash
//! sandbox-mcp --pull     # fetch the default sandboxes
//! sandbox-mcp --build    # build one image per sandbox
//! sandbox-mcp --stdio    # serve over stdin/stdout
//! sandbox-mcp --sse      # serve over HTTP/SSE on 0.0.0.0:10061
//! ```
//!
//! Configure via environment variables:
//!
//! ```bash
//! export SANDBOX_MCP_SANDBOXES_PATH=/srv/sandboxes
//! export SANDBOX_MCP_HTTP_PORT=10061
//! ```
//!
//! ## Components
//!
//! | Module | Role |
//! |--------|------|
//! | `tool` | Sandbox definition to MCP tool descriptor |
//! | `handler` | Argument validation and sandbox invocation |
//! | `server` | Tool registry and `ServerHandler` |
//! | `transport` | stdio and HTTP/SSE serving |

mod config;
pub mod handler;
pub mod http;
mod server;
pub mod tool;
mod transport;
mod types;

pub use config::{AppConfig, ConfigError, DEFAULT_HTTP_PORT};
pub use handler::{HandlerError, ToolHandler, ValidationError};
pub use server::{RegisteredTool, SandboxServer, ToolRegistry};
pub use tool::new_tool;
pub use transport::{serve, Transport, TransportError};
pub use types::*;
