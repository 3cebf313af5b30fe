//! runCommand: shell execution with a timeout and bounded output capture.

use super::{parse_args, truncate_output, ToolExecutor, ToolResult};
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Commands/patterns that are blocked for safety (system-level destruction)
const BLOCKED_PATTERNS: &[&str] = &[
    "sudo ",
    "rm -rf /",
    "rm -rf /*",
    "rm -rf ~",
    "mkfs",
    "dd if=",
    ":(){", // fork bomb
    "chmod -R 777 /",
    "chown -R",
    "> /dev/",
    "curl | sh",
    "curl | bash",
    "wget | sh",
    "wget | bash",
];

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunCommandArgs {
    command: String,
    #[serde(default)]
    cwd: Option<String>,
    /// Milliseconds
    #[serde(default, alias = "timeoutMs")]
    timeout: Option<u64>,
}

pub(super) async fn run_command(exec: &ToolExecutor, args: &serde_json::Value) -> ToolResult {
    let args: RunCommandArgs = match parse_args(args) {
        Ok(a) => a,
        Err(result) => return result,
    };
    let command = args.command.trim();
    if command.is_empty() {
        return ToolResult::failure("Invalid arguments: command must not be empty");
    }

    let cmd_lower = command.to_lowercase();
    if let Some(pattern) = BLOCKED_PATTERNS
        .iter()
        .find(|p| cmd_lower.contains(&p.to_lowercase()))
    {
        return ToolResult::failure(format!(
            "Command blocked for safety: contains '{}'. Commands may not damage the system outside the project.",
            pattern
        ));
    }

    let cwd = match exec.resolve_path(args.cwd.as_deref().unwrap_or(".")) {
        Ok(p) => p,
        Err(denied) => return ToolResult::failure(denied),
    };
    if !cwd.is_dir() {
        return ToolResult::failure(format!(
            "Working directory not found: {}",
            args.cwd.unwrap_or_default()
        ));
    }

    let config = exec.config();
    let timeout_ms = args.timeout.unwrap_or(config.command_timeout_ms).max(1);
    let output_limit = config.command_max_output_bytes;

    let mut child = match Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(&cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return ToolResult::failure(format!("Failed to execute command: {}", e)),
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let run = async {
        tokio::join!(
            read_bounded(stdout, output_limit),
            read_bounded(stderr, output_limit),
            child.wait()
        )
    };

    let outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), run).await;
    let (stdout, stderr, status) = match outcome {
        Ok(done) => done,
        Err(_) => {
            let _ = child.kill().await;
            tracing::warn!(command, timeout_ms, "command timed out");
            return ToolResult::failure(format!("Command timed out after {}ms: {}", timeout_ms, command))
                .with_metadata(serde_json::json!({ "timedOut": true }));
        }
    };

    let status = match status {
        Ok(s) => s,
        Err(e) => return ToolResult::failure(format!("Failed to wait for command: {}", e)),
    };
    let exit_code = status.code().unwrap_or(-1);

    let mut result = String::new();
    if !stdout.text.is_empty() {
        result.push_str(&stdout.text);
    }
    if !stderr.text.is_empty() {
        if !result.is_empty() {
            result.push_str("\n--- stderr ---\n");
        }
        result.push_str(&stderr.text);
    }
    if result.is_empty() {
        result = format!("Command completed with exit code {}", exit_code);
    } else if exit_code != 0 {
        result.push_str(&format!("\n[exit code: {}]", exit_code));
    }

    let tool_result = ToolResult {
        success: status.success(),
        result: truncate_output(result, config.read_file_max_bytes),
        metadata: None,
    };
    tool_result.with_metadata(serde_json::json!({
        "exitCode": exit_code,
        "timedOut": false,
        "outputTruncated": stdout.truncated || stderr.truncated,
    }))
}

struct Captured {
    text: String,
    truncated: bool,
}

/// Read a stream to completion, keeping at most `limit` bytes.
///
/// Keeps draining past the limit so the child never blocks on a full pipe.
async fn read_bounded<R: AsyncRead + Unpin>(reader: Option<R>, limit: usize) -> Captured {
    let Some(mut reader) = reader else {
        return Captured {
            text: String::new(),
            truncated: false,
        };
    };
    let mut kept: Vec<u8> = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = limit.saturating_sub(kept.len());
                if room < n {
                    truncated = true;
                }
                kept.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    Captured {
        text: String::from_utf8_lossy(&kept).into_owned(),
        truncated,
    }
}
