//! Tool response types.

use sandbox_core::RunOutput;
use serde::Serialize;

/// Result of a sandbox invocation.
///
/// A non-zero exit code is still a successful tool call: the sandbox ran
/// and this is what it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecResponse {
    /// Exit code of the sandboxed program (0 = success, -1 = killed).
    pub exit_code: i64,

    /// Standard output.
    pub stdout: String,

    /// Standard error.
    pub stderr: String,

    /// Set when the sandbox was killed for exceeding its timeout.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
}

impl From<RunOutput> for ExecResponse {
    fn from(output: RunOutput) -> Self {
        Self {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            timed_out: output.timed_out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_camel_case() {
        let response = ExecResponse {
            exit_code: 2,
            stdout: "out".into(),
            stderr: "err".into(),
            timed_out: false,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["exitCode"], 2);
        assert_eq!(json["stdout"], "out");
        assert!(json.get("timedOut").is_none());
    }

    #[test]
    fn test_timed_out_included_when_set() {
        let response = ExecResponse::from(RunOutput {
            exit_code: -1,
            timed_out: true,
            ..Default::default()
        });
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["timedOut"], true);
    }
}
