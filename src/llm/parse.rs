//! Parsing of free-text reasoning responses.
//!
//! Tool calls are written as `TOOL_CALL: name({json})`. Providers are sloppy
//! about JSON, so each call gets one repair pass before it is dropped, and a
//! permissive `name({json})` scan picks up registered tools invoked without
//! the marker.

use crate::tools::{parse_proposal, ToolCall, ToolName};
use crate::types::FileChange;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static CALL_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"TOOL_CALL:\s*([A-Za-z_]\w*)\s*\(").expect("valid call marker regex"));

static BARE_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Za-z_]\w*)\s*\(\s*\{").expect("valid bare call regex"));

static BARE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([{,]\s*)([A-Za-z_$][\w$]*)\s*:").expect("valid bare key regex"));

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[}\]])").expect("valid trailing comma regex"));

/// Extract every tool call from a response, in the order they appear.
///
/// Calls whose arguments cannot be parsed even after repair are dropped with
/// a warning. Call ids are `call_1`, `call_2`, ... in output order.
pub fn parse_tool_calls(text: &str) -> Vec<ToolCall> {
    let mut found: Vec<(usize, String, serde_json::Value)> = Vec::new();
    let mut captured: HashSet<String> = HashSet::new();

    for cap in CALL_MARKER.captures_iter(text) {
        let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        let name = name.as_str().to_string();
        match parse_arguments(text, whole.end()) {
            Some(args) => {
                captured.insert(name.clone());
                found.push((whole.start(), name, args));
            }
            None => {
                tracing::warn!(tool = %name, "discarding tool call with unparsable arguments");
            }
        }
    }

    // Registered names only, and only those the marker scan did not already
    // produce. Two unmarked calls to the same tool collapse into the first.
    for cap in BARE_CALL.captures_iter(text) {
        let (Some(name_match), Some(whole)) = (cap.get(1), cap.get(0)) else {
            continue;
        };
        let name = name_match.as_str();
        if !ToolName::is_registered(name) || captured.contains(name) {
            continue;
        }
        let open_paren = whole.as_str().find('(').map(|i| whole.start() + i + 1);
        let Some(args_start) = open_paren else {
            continue;
        };
        match parse_arguments(text, args_start) {
            Some(args) => {
                captured.insert(name.to_string());
                found.push((whole.start(), name.to_string(), args));
            }
            None => {
                tracing::warn!(tool = %name, "discarding unmarked tool call with unparsable arguments");
            }
        }
    }

    found.sort_by_key(|(pos, _, _)| *pos);
    found
        .into_iter()
        .enumerate()
        .map(|(i, (_, name, args))| ToolCall::new(format!("call_{}", i + 1), name, args))
        .collect()
}

/// Parse the JSON object starting at or after `from` (whitespace skipped).
/// `name()` with no arguments yields an empty object.
fn parse_arguments(text: &str, from: usize) -> Option<serde_json::Value> {
    let rest = text.get(from..)?;
    let offset = rest.len() - rest.trim_start().len();
    let start = from + offset;
    match text[start..].chars().next()? {
        ')' => return Some(serde_json::json!({})),
        '{' => {}
        _ => return None,
    }
    let raw = extract_balanced_object(text, start)?;
    if let Ok(value @ serde_json::Value::Object(_)) = serde_json::from_str::<serde_json::Value>(raw) {
        return Some(value);
    }
    let repaired = repair_json(raw);
    match serde_json::from_str::<serde_json::Value>(&repaired) {
        Ok(value @ serde_json::Value::Object(_)) => {
            tracing::debug!("tool call arguments parsed after repair");
            Some(value)
        }
        _ => None,
    }
}

/// The `{...}` starting at byte `start`, honoring quoted strings of either kind.
fn extract_balanced_object(text: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' | '\u{201C}' => quote = Some(if c == '\u{201C}' { '\u{201D}' } else { c }),
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[start..start + i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// One best-effort pass over near-JSON: smart quotes, single-quoted strings,
/// bare keys, trailing commas.
pub(crate) fn repair_json(raw: &str) -> String {
    let normalized = raw
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");
    let double_quoted = single_to_double_quotes(&normalized);
    let keyed = BARE_KEY.replace_all(&double_quoted, "$1\"$2\":");
    TRAILING_COMMA.replace_all(&keyed, "$1").into_owned()
}

fn single_to_double_quotes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut quote: Option<char> = None;
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            None => {
                if c == '\'' {
                    quote = Some('\'');
                    out.push('"');
                } else {
                    if c == '"' {
                        quote = Some('"');
                    }
                    out.push(c);
                }
            }
            Some('\'') => match c {
                '\\' if chars.peek() == Some(&'\'') => {
                    chars.next();
                    out.push('\'');
                }
                '\\' => {
                    out.push(c);
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                }
                '"' => out.push_str("\\\""),
                '\'' => {
                    quote = None;
                    out.push('"');
                }
                _ => out.push(c),
            },
            Some(_) => {
                out.push(c);
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                } else if c == '"' {
                    quote = None;
                }
            }
        }
    }
    out
}

/// Strip markdown code fences from a response
fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    clean.strip_suffix("```").unwrap_or(clean).trim()
}

/// Extract a JSON fragment between matching delimiters
fn extract_json_fragment(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (start <= end).then(|| &text[start..=end])
}

/// A direct-fix answer, normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFix {
    pub changes: Vec<FileChange>,
    pub reasoning: String,
    pub confidence: f64,
}

/// Parse a direct-fix response: either a bare `{changes, explanation,
/// confidence}` object (optionally fenced) or a `proposeChanges` tool call.
/// Changes without a `file` default to `default_file`.
pub fn parse_fix_response(content: &str, default_file: &str) -> Result<ParsedFix, String> {
    let mut payload = parse_tool_calls(content)
        .into_iter()
        .find(ToolCall::is_proposal)
        .map(|call| call.arguments);

    if payload.is_none() {
        let clean = strip_markdown_fences(content);
        let fragment = extract_json_fragment(clean, '{', '}')
            .ok_or_else(|| "response contains no JSON object".to_string())?;
        payload = Some(
            serde_json::from_str(fragment)
                .or_else(|_| serde_json::from_str(&repair_json(fragment)))
                .map_err(|e| format!("invalid JSON: {}", e))?,
        );
    }
    let mut payload = payload.unwrap_or_default();

    if let Some(changes) = payload.get_mut("changes").and_then(|c| c.as_array_mut()) {
        for change in changes.iter_mut().filter_map(|c| c.as_object_mut()) {
            change
                .entry("file")
                .or_insert_with(|| serde_json::Value::String(default_file.to_string()));
            change
                .entry("type")
                .or_insert_with(|| serde_json::Value::String("modify".to_string()));
        }
    }

    let proposal = parse_proposal(&payload)?;
    Ok(ParsedFix {
        changes: FileChange::from_planned(&proposal.changes),
        reasoning: proposal.explanation,
        confidence: proposal.confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_marker_calls_in_order() {
        let text = r#"I'll look at both.
TOOL_CALL: readFile({"path": "src/app.ts"})
TOOL_CALL: searchCode({"pattern": "HttpModule", "filePattern": "*.ts"})"#;
        let calls = parse_tool_calls(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name, "readFile");
        assert_eq!(calls[0].arguments, json!({"path": "src/app.ts"}));
        assert_eq!(calls[1].name, "searchCode");
    }

    #[test]
    fn test_nested_braces_and_strings() {
        let text = r#"TOOL_CALL: proposeChanges({"changes": [{"file": "a.ts", "type": "modify", "search": "if (x) { y(); }", "replace": "}{", "reasoning": "r"}], "explanation": "e", "confidence": 0.7})"#;
        let calls = parse_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert!(calls[0].is_proposal());
        assert_eq!(calls[0].arguments["changes"][0]["search"], "if (x) { y(); }");
    }

    #[test]
    fn test_repair_pass() {
        let text = "TOOL_CALL: readFile({path: 'src/main.ts', startLine: 1, endLine: 20,})";
        let calls = parse_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, json!({"path": "src/main.ts", "startLine": 1, "endLine": 20}));

        let smart = "TOOL_CALL: listFiles({\u{201C}directory\u{201D}: \u{201C}src\u{201D}})";
        assert_eq!(parse_tool_calls(smart)[0].arguments, json!({"directory": "src"}));
    }

    #[test]
    fn test_unrepairable_call_is_discarded() {
        let text = "TOOL_CALL: readFile({path: [[[}) then TOOL_CALL: listFiles({})";
        let calls = parse_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "listFiles");
        assert_eq!(calls[0].id, "call_1");
    }

    #[test]
    fn test_unmarked_calls_registered_only_and_deduped() {
        let text = r#"Let me check: checkPackage({"packageName": "rxjs"}) and console.log({"a": 1})
TOOL_CALL: readFile({"path": "a.ts"})
also readFile({"path": "b.ts"})"#;
        let calls = parse_tool_calls(text);
        let names: Vec<_> = calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["checkPackage", "readFile"]);
        assert_eq!(calls[1].arguments["path"], "a.ts");
    }

    #[test]
    fn test_no_calls() {
        assert!(parse_tool_calls("I think the problem is the router config.").is_empty());
        assert_eq!(parse_tool_calls("TOOL_CALL: listFiles()")[0].arguments, json!({}));
    }

    #[test]
    fn test_repair_json_keeps_apostrophes_in_double_quotes() {
        let repaired = repair_json(r#"{"msg": "can't bind", other: 'say "hi"'}"#);
        let value: serde_json::Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["msg"], "can't bind");
        assert_eq!(value["other"], "say \"hi\"");
    }

    #[test]
    fn test_parse_fix_response_defaults_file() {
        let parsed = parse_fix_response(
            "```json\n{\"changes\": [{\"search\": \"a\", \"replace\": \"b\", \"reasoning\": \"r\"}], \"explanation\": \"why\", \"confidence\": 0.6}\n```",
            "src/x.ts",
        )
        .unwrap();
        assert_eq!(parsed.changes[0].file, "src/x.ts");
        assert_eq!(parsed.reasoning, "why");
        assert!(parse_fix_response("no json here", "x.ts").is_err());
    }
}
