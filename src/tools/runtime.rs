//! analyzeRuntimeError: the fast-path signature table exposed as a tool.

use super::{parse_args, ToolResult};
use crate::fast_path::{diagnose, extract_packages, extract_stack_files};
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeArgs {
    #[serde(alias = "error_message", alias = "message")]
    error_message: String,
    #[serde(default, alias = "stack_trace", alias = "stack")]
    stack_trace: Option<String>,
}

pub(super) fn analyze_runtime_error(args: &serde_json::Value) -> ToolResult {
    let args: AnalyzeArgs = match parse_args(args) {
        Ok(a) => a,
        Err(result) => return result,
    };
    let stack = args.stack_trace.unwrap_or_default();
    let combined = format!("{}\n{}", args.error_message, stack);
    let packages = extract_packages(&combined);
    let frames = extract_stack_files(&combined);

    let Some(diagnosis) = diagnose(&args.error_message, &stack) else {
        let mut text = String::from("No known failure signature matched.");
        if !packages.is_empty() {
            text.push_str(&format!("\nPackages in stack: {}", packages.join(", ")));
        }
        if !frames.is_empty() {
            text.push_str(&format!("\nProject frames: {}", frames.join(", ")));
        }
        return ToolResult::ok(text).with_metadata(serde_json::json!({
            "issueType": "unknown",
            "confidence": 0.0,
            "packages": packages,
            "affectedFiles": frames,
        }));
    };

    let mut text = format!(
        "Issue type: {}\nConfidence: {:.2}\nRoot cause: {}",
        diagnosis.issue_type, diagnosis.confidence, diagnosis.root_cause
    );
    if !diagnosis.problematic_packages.is_empty() {
        text.push_str(&format!("\nProblematic packages: {}", diagnosis.problematic_packages.join(", ")));
    }
    if !packages.is_empty() {
        text.push_str(&format!("\nPackages in stack: {}", packages.join(", ")));
    }
    if !diagnosis.affected_files.is_empty() {
        text.push_str(&format!("\nAffected files: {}", diagnosis.affected_files.join(", ")));
    }
    if let Some(fix) = &diagnosis.suggested_fix {
        text.push_str(&format!("\nSuggested fix: {}", fix));
    }

    let mut metadata = serde_json::to_value(&diagnosis).unwrap_or_default();
    if let Some(obj) = metadata.as_object_mut() {
        obj.insert("packages".to_string(), serde_json::json!(packages));
    }
    ToolResult::ok(text).with_metadata(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_signature() {
        let result = analyze_runtime_error(&serde_json::json!({
            "errorMessage": "Cannot convert undefined or null to object",
            "stackTrace": "at node_modules/jsonwebtoken/sign.js:4:10\n at src/app/auth.service.ts:3:1"
        }));
        assert!(result.success);
        assert!(result.result.contains("environment-only-package"));
        let meta = result.metadata.unwrap();
        assert_eq!(meta["confidence"], 0.95);
        assert_eq!(meta["packages"][0], "jsonwebtoken");
        assert_eq!(meta["affectedFiles"][0], "src/app/auth.service.ts");
    }

    #[test]
    fn test_unknown_signature_is_still_success() {
        let result = analyze_runtime_error(&serde_json::json!({
            "errorMessage": "weird failure",
            "stackTrace": "at node_modules/rxjs/dist/index.js:1:1"
        }));
        assert!(result.success);
        assert!(result.result.contains("No known failure signature"));
        assert!(result.result.contains("rxjs"));
    }

    #[test]
    fn test_missing_message() {
        let result = analyze_runtime_error(&serde_json::json!({"stackTrace": "x"}));
        assert!(!result.success);
    }
}
