//! HTTP/SSE transport for remote agents.
//!
//! This module exposes the MCP protocol via rmcp's StreamableHttpService.
//! Every client gets its own session; all sessions share one tool registry.
//!
//! ## Endpoints
//!
//! - `POST /mcp` - JSON-RPC requests
//! - `GET /mcp` - SSE stream for server-initiated messages
//! - `GET /health` - Health check
//! - `GET /` - Server info

use crate::server::SandboxServer;
use axum::{
    extract::State,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the HTTP router for the MCP server.
///
/// The returned router can be served directly with axum or composed
/// into a larger application.
pub fn build_router(server: SandboxServer) -> Router {
    tracing::debug!("Building HTTP router");

    let tool_names: Arc<Vec<String>> = Arc::new(
        server
            .registry()
            .tools()
            .iter()
            .map(|t| t.name.to_string())
            .collect(),
    );

    let session_manager = Arc::new(LocalSessionManager::default());
    let mcp_service = StreamableHttpService::new(
        move || Ok(server.clone()),
        session_manager,
        StreamableHttpServerConfig::default(),
    );

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/", get(root_handler))
        .with_state(tool_names)
        // MCP endpoint as a fallback/nested service
        .fallback_service(mcp_service)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    tracing::debug!("HTTP router built with routes: /, /health, /mcp");
    router
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    tracing::trace!("Health check request");
    Json(serde_json::json!({
        "status": "healthy",
        "service": "sandbox-mcp"
    }))
}

/// Root endpoint with server info.
async fn root_handler(State(tools): State<Arc<Vec<String>>>) -> impl IntoResponse {
    tracing::trace!("Root page request");
    Json(serde_json::json!({
        "service": "sandbox-mcp",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoint": "/mcp",
        "tools": tools.as_slice(),
    }))
}

/// Start the HTTP server.
///
/// This function runs until the server is shut down via the provided
/// shutdown signal. Bind and accept failures are returned.
pub async fn serve(
    server: SandboxServer,
    addr: std::net::SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let router = build_router(server);

    tracing::info!(%addr, "Starting HTTP/SSE server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::debug!(%addr, "TCP listener bound");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use sandbox_core::{
        BuildError, BuildOutcome, BuildRequest, ContainerRuntime, RunOutput, RunRequest,
        RuntimeError, SandboxConfig,
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    struct NoRuntime;

    #[async_trait]
    impl ContainerRuntime for NoRuntime {
        async fn build_image(
            &self,
            _request: BuildRequest,
            _cancel: &CancellationToken,
        ) -> Result<BuildOutcome, BuildError> {
            unreachable!()
        }

        async fn run(
            &self,
            _request: RunRequest,
            _cancel: &CancellationToken,
        ) -> Result<RunOutput, RuntimeError> {
            Err(RuntimeError::Unreachable("test".into()))
        }
    }

    fn server() -> SandboxServer {
        let config = SandboxConfig::from_json(
            r#"{"id": "echo", "description": "Echo"}"#,
            "echo",
            std::path::Path::new("echo/config.json"),
        )
        .unwrap();
        SandboxServer::new(vec![config], Arc::new(NoRuntime))
    }

    async fn get_json(router: Router, uri: &str) -> serde_json::Value {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let body = get_json(build_router(server()), "/health").await;
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_root_lists_tools() {
        let body = get_json(build_router(server()), "/").await;
        assert_eq!(body["tools"], serde_json::json!(["echo"]));
    }

    /// POST one JSON-RPC message to the MCP endpoint.
    ///
    /// Returns the status, the session id header and the first JSON-RPC
    /// response found in the body, if any.
    async fn post_mcp(
        router: &Router,
        session: Option<&str>,
        message: Value,
    ) -> (StatusCode, Option<String>, Option<Value>) {
        let mut request = Request::post("/mcp")
            .header("host", "localhost")
            .header("content-type", "application/json")
            .header("accept", "application/json, text/event-stream");
        if let Some(session) = session {
            request = request.header("mcp-session-id", session);
        }
        let response = router
            .clone()
            .oneshot(request.body(Body::from(message.to_string())).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let session_id = response
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        if status != StatusCode::OK {
            return (status, session_id, None);
        }

        let mut body = response.into_body();
        let mut buffer = String::new();
        while let Some(frame) = tokio::time::timeout(Duration::from_secs(5), body.frame())
            .await
            .expect("response should arrive")
        {
            if let Ok(data) = frame.unwrap().into_data() {
                buffer.push_str(&String::from_utf8_lossy(&data));
            }
            if let Some(reply) = first_reply(&buffer) {
                return (status, session_id, Some(reply));
            }
        }
        (status, session_id, first_reply(&buffer))
    }

    /// First JSON-RPC response in a plain JSON or SSE body.
    fn first_reply(buffer: &str) -> Option<Value> {
        if let Ok(value) = serde_json::from_str::<Value>(buffer) {
            return Some(value);
        }
        buffer
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .filter_map(|data| serde_json::from_str::<Value>(data.trim()).ok())
            .find(|value| value.get("id").is_some())
    }

    /// Initialize a session and call the echo tool on it.
    async fn session_calls_echo(router: Router) -> (String, Value) {
        let (status, session, reply) = post_mcp(
            &router,
            None,
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "test-client", "version": "0.0.0"}
                }
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let session = session.expect("initialize should open a session");
        assert!(reply.unwrap()["result"]["capabilities"]["tools"].is_object());

        let (status, _, _) = post_mcp(
            &router,
            Some(&session),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        )
        .await;
        assert!(status.is_success(), "initialized notification: {status}");

        let (status, _, reply) = post_mcp(
            &router,
            Some(&session),
            json!({
                "jsonrpc": "2.0",
                "id": 2,
                "method": "tools/call",
                "params": {"name": "echo", "arguments": {}}
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        (session, reply.expect("tools/call should be answered"))
    }

    #[tokio::test]
    async fn test_concurrent_sessions_are_independent() {
        let router = build_router(server());

        let (a, b) = tokio::join!(
            session_calls_echo(router.clone()),
            session_calls_echo(router.clone())
        );

        assert_ne!(a.0, b.0);
        for (_, reply) in [a, b] {
            assert_eq!(reply["id"], 2);
            // Runtime failures come back as tool errors, not protocol errors.
            assert_eq!(reply["result"]["isError"], true);
            let text = reply["result"]["content"][0]["text"].as_str().unwrap();
            assert!(text.contains("container runtime unreachable"), "{text}");
        }
    }
}
