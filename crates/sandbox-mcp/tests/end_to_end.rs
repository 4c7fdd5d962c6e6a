//! End-to-end tests: definitions on disk to tool calls.
//!
//! The Docker-backed test requires a running Docker daemon.
//!
//! Run with: `cargo test -p sandbox-mcp -- --ignored`

use async_trait::async_trait;
use rmcp::model::{CallToolResult, JsonObject};
use sandbox_core::{
    build_image, load_sandbox_configs, BuildError, BuildOutcome, BuildRequest, ContainerRuntime,
    DockerRuntime, RunOutput, RunRequest, RuntimeError,
};
use sandbox_mcp::SandboxServer;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const ECHO_DEFINITION: &str = r#"{
    "id": "echo",
    "description": "Echo a message",
    "command": ["echo", "{{msg}}"],
    "timeout": 10,
    "parameters": [
        {"name": "msg", "type": "string", "required": true, "description": "Text to echo"}
    ]
}"#;

fn write_echo_sandbox(root: &Path) {
    let dir = root.join("echo");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("config.json"), ECHO_DEFINITION).unwrap();
    std::fs::write(dir.join("Dockerfile"), "FROM alpine:3\n").unwrap();
}

fn text(result: &CallToolResult) -> String {
    result
        .content
        .iter()
        .filter_map(|c| c.as_text().map(|t| t.text.clone()))
        .collect()
}

fn msg(value: &str) -> Option<JsonObject> {
    let mut args = JsonObject::new();
    args.insert("msg".into(), value.into());
    Some(args)
}

/// Pretends to be `echo`: joins the rendered command after the program name.
#[derive(Default)]
struct EchoRuntime {
    runs: AtomicUsize,
}

#[async_trait]
impl ContainerRuntime for EchoRuntime {
    async fn build_image(
        &self,
        request: BuildRequest,
        _cancel: &CancellationToken,
    ) -> Result<BuildOutcome, BuildError> {
        Ok(BuildOutcome {
            image: request.image,
            log: Vec::new(),
        })
    }

    async fn run(
        &self,
        request: RunRequest,
        _cancel: &CancellationToken,
    ) -> Result<RunOutput, RuntimeError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(RunOutput {
            exit_code: 0,
            stdout: format!("{}\n", request.command[1..].join(" ")),
            ..Default::default()
        })
    }
}

#[tokio::test]
async fn test_echo_scenario_with_fake_runtime() {
    let root = tempfile::tempdir().unwrap();
    write_echo_sandbox(root.path());

    let configs = load_sandbox_configs(root.path()).unwrap();
    let runtime = Arc::new(EchoRuntime::default());
    let server = SandboxServer::new(configs, runtime.clone());
    assert_eq!(server.registry().len(), 1);

    let ok = server
        .call("echo", msg("hi"), &CancellationToken::new())
        .await;
    assert_ne!(ok.is_error, Some(true));
    let body: serde_json::Value = serde_json::from_str(&text(&ok)).unwrap();
    assert_eq!(body["exitCode"], 0);
    assert!(body["stdout"].as_str().unwrap().contains("hi"));

    let rejected = server
        .call("echo", Some(JsonObject::new()), &CancellationToken::new())
        .await;
    assert_eq!(rejected.is_error, Some(true));
    assert!(text(&rejected).contains("missing required parameter: msg"));

    assert_eq!(runtime.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_duplicate_ids_register_nothing() {
    let root = tempfile::tempdir().unwrap();
    write_echo_sandbox(root.path());
    let copy = root.path().join("echo-copy");
    std::fs::create_dir_all(&copy).unwrap();
    std::fs::write(copy.join("config.json"), ECHO_DEFINITION).unwrap();

    assert!(load_sandbox_configs(root.path()).is_err());
}

#[tokio::test]
#[ignore = "Requires Docker daemon"]
async fn test_echo_scenario_with_docker() {
    let root = tempfile::tempdir().unwrap();
    write_echo_sandbox(root.path());
    let configs = load_sandbox_configs(root.path()).unwrap();

    let runtime = DockerRuntime::connect().await.expect("Docker must be running");
    build_image(&runtime, &configs[0], root.path(), &CancellationToken::new())
        .await
        .expect("echo image should build");

    let server = SandboxServer::new(configs, Arc::new(runtime));

    let ok = server
        .call("echo", msg("hi"), &CancellationToken::new())
        .await;
    let body: serde_json::Value = serde_json::from_str(&text(&ok)).unwrap();
    assert_eq!(body["exitCode"], 0);
    assert!(body["stdout"].as_str().unwrap().contains("hi"));

    let rejected = server.call("echo", None, &CancellationToken::new()).await;
    assert_eq!(rejected.is_error, Some(true));
}
