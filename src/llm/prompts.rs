//! Prompt text for the agent loop and the direct fix path.

use super::client::{truncate_str, DirectFixRequest};
use crate::tools::{get_tool_definitions, ToolCall, ToolResult};
use crate::types::FailureSignature;

/// Build output kept in the analysis prompt, in characters.
pub const BUILD_OUTPUT_LIMIT: usize = 3000;
/// Project context kept in the analysis prompt, in characters.
pub const PROJECT_CONTEXT_LIMIT: usize = 2000;
/// Tool output echoed back into the conversation, in characters.
pub const TOOL_RESULT_LIMIT: usize = 8000;

const AGENT_SYSTEM_INTRO: &str = r#"You are a senior engineer repairing build and runtime failures left behind by a framework major-version migration.

You investigate one failure at a time with the tools below, then finish by calling proposeChanges exactly once.

HOW TO CALL A TOOL:
Write one line per call, in exactly this form:
TOOL_CALL: toolName({"argument": "value"})

Arguments are a single JSON object with double-quoted keys and strings. You may issue several calls in one reply; they run together and their results come back in the order you wrote them.

RULES:
- Read the failing file before proposing a change to it.
- Prefer search/replace pairs over full file content. "search" must be copied exactly from the file and occur once.
- Never change dependency versions; version decisions are made elsewhere.
- Server-only packages (database drivers, crypto/JWT libraries, filesystem helpers) cannot run in browser bundles. Remove them instead of polyfilling.
- Keep edits as small as the fix allows. Do not reformat unrelated code.
- If you cannot find a fix, still call proposeChanges with your best partial change and a low confidence.

AVAILABLE TOOLS:"#;

pub const NO_TOOL_CALL_REPROMPT: &str = "Your last reply contained no tool call I could parse. Continue the investigation with TOOL_CALL: toolName({...}) lines, or finish with TOOL_CALL: proposeChanges({...}).";

pub const DIRECT_FIX_SYSTEM: &str = r#"You are a senior engineer fixing one migration error in one file.

OUTPUT FORMAT (JSON only, no prose):
{
  "changes": [
    {
      "file": "path/relative/to/project",
      "type": "modify",
      "search": "exact text copied from the file",
      "replace": "replacement text",
      "reasoning": "why this edit"
    }
  ],
  "explanation": "1-2 sentences on the root cause and the fix",
  "confidence": 0.0
}

RULES:
- "search" must appear exactly once in the file; include surrounding lines if needed.
- Respect every listed constraint.
- Never edit package.json or change dependency versions.
- confidence is between 0 and 1 and reflects how sure you are the build will pass."#;

/// System prompt for the agent loop: instructions plus every tool schema.
pub fn agent_system_prompt() -> String {
    let mut prompt = String::from(AGENT_SYSTEM_INTRO);
    for tool in get_tool_definitions() {
        let params = serde_json::to_string(&tool.parameters).unwrap_or_else(|_| "{}".to_string());
        prompt.push_str(&format!("\n\n{}\n  {}\n  parameters: {}", tool.name, tool.description, params));
    }
    prompt
}

/// First user turn: the failure, trimmed build output and project context.
pub fn analysis_prompt(signature: &FailureSignature, project_context: Option<&str>) -> String {
    let mut prompt = format!(
        "A build of the migrated project failed.\n\nERROR ({}):\n{}",
        signature.category, signature.message
    );
    if let Some(location) = signature.location() {
        prompt.push_str(&format!("\n\nLOCATION: {}", location));
    }
    let output = signature.raw_output.trim();
    if !output.is_empty() {
        prompt.push_str(&format!(
            "\n\nBUILD OUTPUT:\n{}",
            truncate_with_marker(output, BUILD_OUTPUT_LIMIT)
        ));
    }
    if let Some(context) = project_context.map(str::trim).filter(|c| !c.is_empty()) {
        prompt.push_str(&format!(
            "\n\nPROJECT CONTEXT:\n{}",
            truncate_with_marker(context, PROJECT_CONTEXT_LIMIT)
        ));
    }
    prompt.push_str("\n\nInvestigate the root cause with the tools, then call proposeChanges.");
    prompt
}

/// One user turn echoing every tool result, in call order.
pub fn tool_results_message(results: &[(ToolCall, ToolResult)]) -> String {
    results
        .iter()
        .map(|(call, result)| {
            format!(
                "TOOL_RESULT {} [{}] ({}):\n{}",
                call.name,
                call.id,
                if result.success { "ok" } else { "failed" },
                truncate_with_marker(&result.result, TOOL_RESULT_LIMIT)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn invalid_proposal_message(reason: &str) -> String {
    format!(
        "proposeChanges was rejected: {}\nFix the payload and call TOOL_CALL: proposeChanges({{...}}) again.",
        reason
    )
}

pub fn direct_fix_prompt(request: &DirectFixRequest) -> String {
    let constraints = request
        .constraints
        .iter()
        .filter(|c| !c.trim().is_empty())
        .map(|c| format!("- {}", c.trim()))
        .collect::<Vec<_>>()
        .join("\n");
    let mut prompt = format!(
        "ERROR:\n{}\n\nFILE: {}\n```\n{}\n```\n\nCONSTRAINTS:\n{}",
        request.error_message, request.file_path, request.file_content, constraints
    );
    if let Some(context) = request.context.as_deref().filter(|c| !c.trim().is_empty()) {
        prompt.push_str(&format!(
            "\n\nCONTEXT:\n{}",
            truncate_with_marker(context, PROJECT_CONTEXT_LIMIT)
        ));
    }
    prompt
}

fn truncate_with_marker(text: &str, max_chars: usize) -> String {
    let cut = truncate_str(text, max_chars);
    if cut.len() == text.len() {
        text.to_string()
    } else {
        format!("{}\n... (truncated)", cut)
    }
}
