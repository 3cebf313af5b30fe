//! Domain types shared by the diagnoser, the tool layer and the agent.
//!
//! Everything here crosses a process boundary at some point (the cache on
//! disk, the `proposeChanges` payload, the JSON handed back to the build-fix
//! loop) so it all derives serde with camelCase field names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The dependency manifest of the migrated project.
pub const MANIFEST_FILE: &str = "package.json";

/// Manifest sections the fast path edits.
pub const DEPENDENCY_SECTIONS: &[&str] = &["dependencies", "devDependencies"];

/// Closed taxonomy of build/runtime failures produced during a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    Compilation,
    TypeSystem,
    Template,
    Import,
    Dependency,
    Routing,
    ReactiveStream,
    ComponentRegistration,
    #[default]
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Compilation => "compilation",
            ErrorCategory::TypeSystem => "type-system",
            ErrorCategory::Template => "template",
            ErrorCategory::Import => "import",
            ErrorCategory::Dependency => "dependency",
            ErrorCategory::Routing => "routing",
            ErrorCategory::ReactiveStream => "reactive-stream",
            ErrorCategory::ComponentRegistration => "component-registration",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Parse a category label, falling back to `Unknown` for anything unrecognized.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "compilation" => ErrorCategory::Compilation,
            "type-system" | "type" | "types" => ErrorCategory::TypeSystem,
            "template" => ErrorCategory::Template,
            "import" => ErrorCategory::Import,
            "dependency" => ErrorCategory::Dependency,
            "routing" => ErrorCategory::Routing,
            "reactive-stream" | "rxjs" => ErrorCategory::ReactiveStream,
            "component-registration" => ErrorCategory::ComponentRegistration,
            _ => ErrorCategory::Unknown,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One build/runtime failure, as reported by the build-fix loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureSignature {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default)]
    pub category: ErrorCategory,
    #[serde(default)]
    pub raw_output: String,
}

impl FailureSignature {
    pub fn new(message: impl Into<String>, category: ErrorCategory) -> Self {
        Self {
            message: message.into(),
            file: None,
            line: None,
            column: None,
            category,
            raw_output: String::new(),
        }
    }

    pub fn with_location(mut self, file: impl Into<String>, line: Option<u32>, column: Option<u32>) -> Self {
        self.file = Some(file.into());
        self.line = line;
        self.column = column;
        self
    }

    pub fn with_raw_output(mut self, raw_output: impl Into<String>) -> Self {
        self.raw_output = raw_output.into();
        self
    }

    /// `file:line:column` for prompts and logs.
    pub fn location(&self) -> Option<String> {
        let file = self.file.as_deref()?;
        Some(match (self.line, self.column) {
            (Some(l), Some(c)) => format!("{}:{}:{}", file, l, c),
            (Some(l), None) => format!("{}:{}", file, l),
            _ => file.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Result of pattern-based diagnosis of a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnosis {
    pub issue_type: String,
    pub root_cause: String,
    #[serde(default)]
    pub affected_files: Vec<String>,
    pub severity: Severity,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub problematic_packages: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Create,
    Modify,
    Delete,
}

impl ChangeType {
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "create" => Some(ChangeType::Create),
            "modify" => Some(ChangeType::Modify),
            "delete" => Some(ChangeType::Delete),
            _ => None,
        }
    }
}

/// A single localized edit: `search` must match exactly in the target file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchReplace {
    pub search: String,
    pub replace: String,
}

/// One entry of a `proposeChanges` payload, before it is turned into a [`FileChange`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedFix {
    pub file: String,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace: Option<String>,
    #[serde(default)]
    pub reasoning: String,
}

/// An edit to apply to the project: either full content or search/replace pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    pub file: String,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edits: Vec<SearchReplace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl FileChange {
    pub fn replace_content(file: impl Into<String>, content: String, reasoning: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            change_type: ChangeType::Modify,
            content: Some(content),
            edits: Vec::new(),
            reasoning: Some(reasoning.into()),
        }
    }

    /// Convert planned fixes into file changes.
    ///
    /// Search/replace entries for the same file are merged into one change
    /// (in proposal order); a search pair wins over full content when a
    /// planned fix carries both.
    pub fn from_planned(planned: &[PlannedFix]) -> Vec<FileChange> {
        let mut changes: Vec<FileChange> = Vec::new();

        for fix in planned {
            if let (ChangeType::Modify, Some(search)) = (fix.change_type, fix.search.as_ref()) {
                let edit = SearchReplace {
                    search: search.clone(),
                    replace: fix.replace.clone().unwrap_or_default(),
                };
                if let Some(existing) = changes.iter_mut().find(|c| {
                    c.file == fix.file && c.change_type == ChangeType::Modify && c.content.is_none()
                }) {
                    existing.edits.push(edit);
                    if !fix.reasoning.is_empty() {
                        let merged = match existing.reasoning.take() {
                            Some(prev) => format!("{}; {}", prev, fix.reasoning),
                            None => fix.reasoning.clone(),
                        };
                        existing.reasoning = Some(merged);
                    }
                    continue;
                }
                changes.push(FileChange {
                    file: fix.file.clone(),
                    change_type: ChangeType::Modify,
                    content: None,
                    edits: vec![edit],
                    reasoning: non_empty(&fix.reasoning),
                });
                continue;
            }

            changes.push(FileChange {
                file: fix.file.clone(),
                change_type: fix.change_type,
                content: match fix.change_type {
                    ChangeType::Delete => None,
                    _ => fix.content.clone(),
                },
                edits: Vec::new(),
                reasoning: non_empty(&fix.reasoning),
            });
        }

        changes
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// What the agent hands back to the build-fix loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FixResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Vec<FileChange>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_manual_intervention: Option<bool>,
}

impl FixResult {
    pub fn fixed(changes: Vec<FileChange>, reasoning: impl Into<String>, confidence: f64) -> Self {
        Self {
            success: true,
            changes: Some(changes),
            reasoning: Some(reasoning.into()),
            confidence: Some(confidence.clamp(0.0, 1.0)),
            ..Self::default()
        }
    }

    pub fn failed(reasoning: impl Into<String>, suggestions: Vec<String>) -> Self {
        Self {
            success: false,
            reasoning: Some(reasoning.into()),
            suggestions,
            ..Self::default()
        }
    }

    /// A failure the build-fix loop should not retry on its own.
    pub fn manual(error: impl Into<String>, reasoning: impl Into<String>, suggestions: Vec<String>) -> Self {
        Self {
            success: false,
            reasoning: Some(reasoning.into()),
            suggestions,
            error: Some(error.into()),
            requires_manual_intervention: Some(true),
            ..Self::default()
        }
    }

    /// Only successful results that carry a confidence are worth caching.
    pub fn is_cacheable(&self) -> bool {
        self.success && self.confidence.is_some()
    }

    pub fn change_count(&self) -> usize {
        self.changes.as_ref().map(Vec::len).unwrap_or(0)
    }
}
