//! Sandboxed tool definitions and execution for agent-driven investigation.
//!
//! Every tool runs against a single project root. Paths are confined to that
//! root, output is truncated, and failures come back as `ToolResult` values
//! with `success = false`; nothing here returns an error to the caller.

mod fs;
mod package;
mod propose;
mod runtime;
mod shell;

pub use propose::{parse_proposal, Proposal};

use crate::config::ToolConfig;
use ignore::overrides::{Override, OverrideBuilder};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

// ═══════════════════════════════════════════════════════════════════════════
//  TOOL REGISTRY
// ═══════════════════════════════════════════════════════════════════════════

/// The fixed set of tools the reasoning loop may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    ReadFile,
    SearchCode,
    ListFiles,
    RunCommand,
    CheckPackage,
    AnalyzeRuntimeError,
    ProposeChanges,
}

impl ToolName {
    pub const ALL: [ToolName; 7] = [
        ToolName::ReadFile,
        ToolName::SearchCode,
        ToolName::ListFiles,
        ToolName::RunCommand,
        ToolName::CheckPackage,
        ToolName::AnalyzeRuntimeError,
        ToolName::ProposeChanges,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::ReadFile => "readFile",
            ToolName::SearchCode => "searchCode",
            ToolName::ListFiles => "listFiles",
            ToolName::RunCommand => "runCommand",
            ToolName::CheckPackage => "checkPackage",
            ToolName::AnalyzeRuntimeError => "analyzeRuntimeError",
            ToolName::ProposeChanges => "proposeChanges",
        }
    }

    /// Exact-name lookup; anything not registered is `None`.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    pub fn is_registered(name: &str) -> bool {
        Self::parse(name).is_some()
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool call parsed out of a reasoning response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    pub fn is_proposal(&self) -> bool {
        self.name == ToolName::ProposeChanges.as_str()
    }
}

/// Result of executing a tool. `result` is always readable text; `metadata`
/// carries structured data for programmatic consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn ok(result: impl Into<String>) -> Self {
        Self {
            success: true,
            result: result.into(),
            metadata: None,
        }
    }

    pub fn failure(result: impl Into<String>) -> Self {
        Self {
            success: false,
            result: result.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  TOOL DEFINITIONS
// ═══════════════════════════════════════════════════════════════════════════

/// Tool description handed to the reasoning provider.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: serde_json::Value,
}

pub fn get_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: ToolName::ReadFile.as_str(),
            description: "Read a file from the project. Pass startLine/endLine for a line-numbered excerpt; otherwise the whole file is returned (truncated when large).",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File path relative to the project root" },
                    "startLine": { "type": "integer", "description": "First line to read (1-indexed)" },
                    "endLine": { "type": "integer", "description": "Last line to read (inclusive)" }
                },
                "required": ["path"]
            }),
        },
        ToolDefinition {
            name: ToolName::SearchCode.as_str(),
            description: "Search project files for a regex or literal pattern. Skips dependency and version-control directories. Returns path:line: text matches.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string", "description": "Regex (or literal) to search for" },
                    "filePattern": { "type": "string", "description": "Glob restricting searched files, e.g. \"**/*.ts\" or \"*.{ts,html}\"" },
                    "caseSensitive": { "type": "boolean", "description": "Match case exactly (default: false)" }
                },
                "required": ["pattern"]
            }),
        },
        ToolDefinition {
            name: ToolName::ListFiles.as_str(),
            description: "List a directory. Directories end with '/'. Dependency and hidden directories are skipped.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "directory": { "type": "string", "description": "Directory relative to the project root (default: root)" },
                    "recursive": { "type": "boolean", "description": "Walk subdirectories (default: false)" },
                    "pattern": { "type": "string", "description": "Glob filter applied to file names" }
                }
            }),
        },
        ToolDefinition {
            name: ToolName::RunCommand.as_str(),
            description: "Run a shell command in the project. Output is captured even on failure and truncated when large.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "The shell command to execute" },
                    "cwd": { "type": "string", "description": "Working directory relative to the project root" },
                    "timeout": { "type": "integer", "description": "Timeout in milliseconds (default: 60000)" }
                },
                "required": ["command"]
            }),
        },
        ToolDefinition {
            name: ToolName::CheckPackage.as_str(),
            description: "Inspect a dependency: declared and installed versions, and whether it can run in a browser bundle.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "packageName": { "type": "string", "description": "npm package name, e.g. \"rxjs\" or \"@angular/core\"" },
                    "checkBrowserCompat": { "type": "boolean", "description": "Classify browser compatibility (default: true)" }
                },
                "required": ["packageName"]
            }),
        },
        ToolDefinition {
            name: ToolName::AnalyzeRuntimeError.as_str(),
            description: "Match a runtime error message and stack trace against known failure signatures and extract implicated packages.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "errorMessage": { "type": "string", "description": "The error message" },
                    "stackTrace": { "type": "string", "description": "Optional stack trace" }
                },
                "required": ["errorMessage"]
            }),
        },
        ToolDefinition {
            name: ToolName::ProposeChanges.as_str(),
            description: "Finish the investigation by proposing file changes. Prefer search/replace pairs over full content.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "changes": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "file": { "type": "string" },
                                "type": { "type": "string", "enum": ["create", "modify", "delete"] },
                                "content": { "type": "string" },
                                "search": { "type": "string" },
                                "replace": { "type": "string" },
                                "reasoning": { "type": "string" }
                            },
                            "required": ["file", "type", "reasoning"]
                        }
                    },
                    "explanation": { "type": "string" },
                    "confidence": { "type": "number", "minimum": 0, "maximum": 1 }
                },
                "required": ["changes", "explanation", "confidence"]
            }),
        },
    ]
}

// ═══════════════════════════════════════════════════════════════════════════
//  TOOL EXECUTION
// ═══════════════════════════════════════════════════════════════════════════

/// Directories never searched or listed.
pub(crate) const SKIP_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    ".svn",
    ".hg",
    "dist",
    "build",
    "coverage",
    ".angular",
    ".next",
    "target",
];

pub(crate) fn is_skipped_dir(name: &str) -> bool {
    SKIP_DIRS.contains(&name) || name.starts_with('.')
}

/// Executes tools against one project root.
#[derive(Debug, Clone)]
pub struct ToolExecutor {
    root: PathBuf,
    config: ToolConfig,
}

impl ToolExecutor {
    pub fn new(root: impl Into<PathBuf>, config: ToolConfig) -> Self {
        let root = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self { root, config }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    /// Execute a tool call. Never panics or errors; failures are encoded in the result.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(name) = ToolName::parse(&call.name) else {
            tracing::warn!(tool = %call.name, "rejected call to unknown tool");
            return ToolResult::failure(format!("Unknown tool: {}", call.name));
        };
        tracing::debug!(tool = %name, id = %call.id, "executing tool");

        match name {
            ToolName::RunCommand => shell::run_command(self, &call.arguments).await,
            ToolName::ProposeChanges => propose::propose_changes(&call.arguments),
            ToolName::AnalyzeRuntimeError => runtime::analyze_runtime_error(&call.arguments),
            ToolName::ReadFile | ToolName::SearchCode | ToolName::ListFiles | ToolName::CheckPackage => {
                let executor = self.clone();
                let args = call.arguments.clone();
                match tokio::task::spawn_blocking(move || executor.execute_blocking(name, &args)).await {
                    Ok(result) => result,
                    Err(err) => ToolResult::failure(format!("Tool {} did not finish: {}", name, err)),
                }
            }
        }
    }

    fn execute_blocking(&self, name: ToolName, args: &serde_json::Value) -> ToolResult {
        match name {
            ToolName::ReadFile => fs::read_file(self, args),
            ToolName::SearchCode => fs::search_code(self, args),
            ToolName::ListFiles => fs::list_files(self, args),
            ToolName::CheckPackage => package::check_package(self, args),
            other => ToolResult::failure(format!("Tool {} cannot run on the blocking pool", other)),
        }
    }

    /// Resolve a user-supplied path inside the project root.
    ///
    /// Relative paths are joined to the root; absolute paths must already lie
    /// inside it. `..` segments are resolved lexically and, for existing
    /// paths, symlinks are resolved too, so nothing outside the root is
    /// reachable.
    pub fn resolve_path(&self, raw: &str) -> Result<PathBuf, String> {
        let trimmed = raw.trim();
        let candidate = Path::new(if trimmed.is_empty() { "." } else { trimmed });
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };

        let denied = || format!("Access denied: '{}' resolves outside the project root", raw);
        let normalized = normalize_lexically(&joined).ok_or_else(denied)?;
        if !normalized.starts_with(&self.root) {
            return Err(denied());
        }
        if let Ok(real) = normalized.canonicalize() {
            if !real.starts_with(&self.root) {
                return Err(denied());
            }
        }
        Ok(normalized)
    }

    /// Root-relative display form with forward slashes.
    pub fn relative_display(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        let shown = rel.to_string_lossy().replace('\\', "/");
        if shown.is_empty() {
            ".".to_string()
        } else {
            shown
        }
    }

    /// Read a file's raw content through the same confinement rules as `readFile`.
    pub fn read_raw(&self, raw: &str) -> Result<String, String> {
        let path = self.resolve_path(raw)?;
        if !path.is_file() {
            return Err(format!("File not found: {}", raw));
        }
        std::fs::read_to_string(&path).map_err(|e| format!("Failed to read {}: {}", raw, e))
    }

    /// Every file under the root with a line matching `pattern`.
    ///
    /// Unlike `searchCode` this is not capped by `search_max_results`.
    pub async fn files_matching(&self, pattern: Regex, file_glob: &str) -> Result<Vec<String>, String> {
        let glob = FileGlob::new(&self.root, file_glob)
            .map_err(|e| format!("Invalid file pattern {}: {}", file_glob, e))?;
        let executor = self.clone();
        tokio::task::spawn_blocking(move || fs::files_matching(&executor, &pattern, Some(&glob)))
            .await
            .map_err(|e| format!("File scan did not finish: {}", e))
    }
}

fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    Some(out)
}

pub(crate) fn parse_args<T: DeserializeOwned>(args: &serde_json::Value) -> Result<T, ToolResult> {
    let args = if args.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        args.clone()
    };
    serde_json::from_value(args).map_err(|e| ToolResult::failure(format!("Invalid arguments: {}", e)))
}

/// Truncate output at a line boundary, appending a marker when anything was cut.
pub(crate) fn truncate_output(result: String, max_bytes: usize) -> String {
    if result.len() <= max_bytes {
        return result;
    }
    let mut cut = max_bytes;
    while cut > 0 && !result.is_char_boundary(cut) {
        cut -= 1;
    }
    let truncate_at = result[..cut].rfind('\n').unwrap_or(cut);
    format!(
        "{}\n\n... [truncated: showing {} of {} bytes]",
        &result[..truncate_at],
        truncate_at,
        result.len()
    )
}

/// A `filePattern`/`pattern` argument compiled with gitignore glob rules.
///
/// Slash-free globs match the file name at any depth; globs containing a
/// slash are anchored at the project root.
#[derive(Debug, Clone)]
pub(crate) struct FileGlob(Override);

impl FileGlob {
    pub(crate) fn new(root: &Path, glob: &str) -> Result<Self, ignore::Error> {
        let mut builder = OverrideBuilder::new(root);
        builder.add(glob.trim())?;
        Ok(Self(builder.build()?))
    }

    /// `path` is absolute under the root, or relative to it.
    pub(crate) fn matches(&self, path: &Path) -> bool {
        self.0.matched(path, false).is_whitelist()
    }
}
