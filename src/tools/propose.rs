//! proposeChanges: shape validation of the agent's final answer.

use super::ToolResult;
use crate::types::{ChangeType, PlannedFix};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

/// A validated `proposeChanges` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub changes: Vec<PlannedFix>,
    pub explanation: String,
    pub confidence: f64,
}

/// Validate the arguments of a `proposeChanges` call.
///
/// Checks shape only: the listed files are not read here, so a proposal
/// whose search text does not occur in the target still validates.
pub fn parse_proposal(args: &serde_json::Value) -> Result<Proposal, String> {
    let obj = args
        .as_object()
        .ok_or_else(|| "proposeChanges expects an object with changes, explanation and confidence".to_string())?;

    let raw_changes = obj
        .get("changes")
        .and_then(|c| c.as_array())
        .ok_or_else(|| "'changes' must be an array".to_string())?;
    if raw_changes.is_empty() {
        return Err("'changes' must contain at least one change".to_string());
    }

    let confidence = obj
        .get("confidence")
        .and_then(|c| c.as_f64())
        .ok_or_else(|| "'confidence' must be a number between 0 and 1".to_string())?;
    if !confidence.is_finite() {
        return Err("'confidence' must be a finite number".to_string());
    }

    let explanation = obj
        .get("explanation")
        .and_then(|e| e.as_str())
        .unwrap_or_default()
        .to_string();

    let mut changes = Vec::with_capacity(raw_changes.len());
    for (index, raw) in raw_changes.iter().enumerate() {
        changes.push(parse_change(index, raw)?);
    }

    Ok(Proposal {
        changes,
        explanation,
        confidence: confidence.clamp(0.0, 1.0),
    })
}

fn parse_change(index: usize, raw: &serde_json::Value) -> Result<PlannedFix, String> {
    let at = |msg: &str| format!("change #{}: {}", index + 1, msg);

    let kind = raw
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| at("missing 'type'"))?;
    if ChangeType::parse(kind).is_none() {
        return Err(at(&format!("unknown type '{}' (expected create, modify or delete)", kind)));
    }

    let fix: PlannedFix = serde_json::from_value(raw.clone()).map_err(|e| at(&e.to_string()))?;

    if fix.file.trim().is_empty() {
        return Err(at("'file' must not be empty"));
    }
    if !is_project_relative(&fix.file) {
        return Err(at(&format!("'{}' must be a path relative to the project root", fix.file)));
    }

    match fix.change_type {
        ChangeType::Create if fix.content.is_none() => Err(at("create requires 'content'")),
        ChangeType::Modify if fix.content.is_none() && fix.search.is_none() => {
            Err(at("modify requires 'content' or a 'search'/'replace' pair"))
        }
        ChangeType::Modify if fix.search.as_deref() == Some("") => Err(at("'search' must not be empty")),
        _ => Ok(fix),
    }
}

fn is_project_relative(file: &str) -> bool {
    let path = Path::new(file);
    !path.is_absolute()
        && !file.starts_with('/')
        && !file.starts_with('\\')
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

pub(super) fn propose_changes(args: &serde_json::Value) -> ToolResult {
    match parse_proposal(args) {
        Ok(proposal) => {
            let summary = proposal
                .changes
                .iter()
                .map(|c| format!("  {:?} {}", c.change_type, c.file))
                .collect::<Vec<_>>()
                .join("\n");
            let text = format!(
                "Proposal accepted: {} change(s), confidence {:.2}\n{}",
                proposal.changes.len(),
                proposal.confidence,
                summary
            );
            ToolResult::ok(text).with_metadata(serde_json::to_value(&proposal).unwrap_or_default())
        }
        Err(e) => ToolResult::failure(format!("Invalid proposal: {}", e)),
    }
}
