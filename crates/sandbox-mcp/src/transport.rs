//! Serving the tool set over one of two session models.
//!
//! - [`Transport::Stdio`]: one session on stdin/stdout, requests answered
//!   strictly in turn; ends when the stream closes.
//! - [`Transport::Sse`]: an HTTP endpoint where each client has its own
//!   concurrently served session; ends on bind failure or shutdown.
//!
//! Both serve the same [`SandboxServer`], so tool registration and dispatch
//! are shared.

use crate::http;
use crate::server::SandboxServer;
use rmcp::transport::stdio;
use rmcp::ServiceExt;
use std::future::Future;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};

/// Session framing for the MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Single duplex session over process stdin/stdout.
    Stdio,
    /// Multi-client HTTP with SSE streaming on the given address.
    Sse(SocketAddr),
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Sse(addr) => write!(f, "sse ({addr})"),
        }
    }
}

/// A transport failed to start or died while serving.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("MCP session error: {0}")]
    Session(String),
}

/// Serve `server` over `transport` until it ends or `shutdown` resolves.
pub async fn serve(
    server: SandboxServer,
    transport: Transport,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), TransportError> {
    tracing::info!(
        %transport,
        tools = server.registry().len(),
        "Starting sandbox MCP server"
    );

    match transport {
        Transport::Sse(addr) => http::serve(server, addr, shutdown).await?,
        Transport::Stdio => {
            let (stdin, stdout) = stdio();
            serve_stream(server, stdin, stdout, shutdown).await?;
        }
    }

    Ok(())
}

/// Serve one duplex session on a reader/writer pair.
///
/// Requests are answered in turn; returns when the peer closes the stream
/// or `shutdown` resolves.
pub(crate) async fn serve_stream<R, W>(
    server: SandboxServer,
    reader: R,
    writer: W,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), TransportError>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let session = async move {
        let service = server
            .serve((reader, writer))
            .await
            .map_err(|e| TransportError::Session(e.to_string()))?;
        tracing::info!("Stream session ready");

        let reason = service
            .waiting()
            .await
            .map_err(|e| TransportError::Session(e.to_string()))?;
        tracing::info!(?reason, "Stream session closed");
        Ok(())
    };

    tokio::select! {
        result = session => result,
        _ = shutdown => {
            tracing::info!("Stream transport shutting down");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rmcp::model::{CallToolRequestParam, CallToolResult};
    use sandbox_core::{
        BuildError, BuildOutcome, BuildRequest, ContainerRuntime, RunOutput, RunRequest,
        RuntimeError, SandboxConfig,
    };
    use serde_json::json;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    /// Answers every run with the rendered command as stdout.
    struct EchoRuntime;

    #[async_trait]
    impl ContainerRuntime for EchoRuntime {
        async fn build_image(
            &self,
            _request: BuildRequest,
            _cancel: &CancellationToken,
        ) -> Result<BuildOutcome, BuildError> {
            unreachable!()
        }

        async fn run(
            &self,
            request: RunRequest,
            _cancel: &CancellationToken,
        ) -> Result<RunOutput, RuntimeError> {
            Ok(RunOutput {
                stdout: request.command.join(" "),
                ..Default::default()
            })
        }
    }

    fn echo_server() -> SandboxServer {
        let config = SandboxConfig::from_json(
            r#"{"id": "echo", "description": "Echo", "command": ["echo", "{{msg}}"],
                "parameters": [{"name": "msg", "type": "string"}]}"#,
            "echo",
            std::path::Path::new("echo/config.json"),
        )
        .unwrap();
        SandboxServer::new(vec![config], Arc::new(EchoRuntime))
    }

    fn call(msg: &str) -> CallToolRequestParam {
        serde_json::from_value(json!({"name": "echo", "arguments": {"msg": msg}})).unwrap()
    }

    fn stdout_of(result: &CallToolResult) -> String {
        let text: String = result
            .content
            .iter()
            .filter_map(|c| c.as_text().map(|t| t.text.clone()))
            .collect();
        let body: serde_json::Value = serde_json::from_str(&text).unwrap();
        body["stdout"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_stream_session_lists_and_calls_tools() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_io);
        let session = tokio::spawn(serve_stream(
            echo_server(),
            server_read,
            server_write,
            std::future::pending(),
        ));

        let client = ().serve(tokio::io::split(client_io)).await.unwrap();

        let tools = client.list_tools(Default::default()).await.unwrap();
        let names: Vec<_> = tools.tools.iter().map(|t| t.name.to_string()).collect();
        assert_eq!(names, vec!["echo"]);

        // Answered in order on the one session.
        let first = client.call_tool(call("one")).await.unwrap();
        let second = client.call_tool(call("two")).await.unwrap();
        assert_eq!(stdout_of(&first), "echo one");
        assert_eq!(stdout_of(&second), "echo two");

        let invalid: CallToolRequestParam =
            serde_json::from_value(json!({"name": "echo", "arguments": {}})).unwrap();
        let rejected = client.call_tool(invalid).await.unwrap();
        assert_eq!(rejected.is_error, Some(true));

        client.cancel().await.unwrap();
        session.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stream_session_ends_on_shutdown() {
        let (_client_io, server_io) = tokio::io::duplex(1024);
        let (server_read, server_write) = tokio::io::split(server_io);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let session = tokio::spawn(serve_stream(echo_server(), server_read, server_write, async move {
            let _ = rx.await;
        }));

        tx.send(()).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), session)
            .await
            .expect("session should stop on shutdown")
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_transport_display() {
        assert_eq!(Transport::Stdio.to_string(), "stdio");
        let addr: SocketAddr = "0.0.0.0:10061".parse().unwrap();
        assert_eq!(Transport::Sse(addr).to_string(), "sse (0.0.0.0:10061)");
    }
}
