//! Request/response checks around the direct fix call.
//!
//! Version decisions and manifest edits belong to the dependency resolver, so
//! the direct fix path refuses to ask about the former or accept the latter.

use super::client::DirectFixRequest;
use crate::types::{FileChange, MANIFEST_FILE};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;

static VERSION_QUESTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:which|what)\s+(?:\S+\s+)?version\b|\b(?:upgrade|downgrade|bump|pin)\s+(?:\S+\s+){0,3}?to\s+(?:version\s+)?v?\d|\bshould\s+(?:i|we)\s+(?:upgrade|downgrade)\b|\bcompatible\s+versions?\b",
    )
    .expect("valid version question regex")
});

/// Why a guardrail refused a request or response. Never retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "kebab-case")]
pub enum GuardrailRejection {
    #[error("the request asks about dependency versions, which the dependency resolver decides")]
    VersionQuestion,
    #[error("the request carries no file content to fix")]
    MissingFileContent,
    #[error("the request carries no explicit constraints")]
    MissingConstraints,
    #[error("the response edits {0}, which only the dependency resolver may change")]
    ManifestChange(String),
}

pub fn check_request(request: &DirectFixRequest) -> Result<(), GuardrailRejection> {
    if VERSION_QUESTION.is_match(&request.error_message) {
        return Err(GuardrailRejection::VersionQuestion);
    }
    if request.file_content.trim().is_empty() {
        return Err(GuardrailRejection::MissingFileContent);
    }
    if request.constraints.iter().all(|c| c.trim().is_empty()) {
        return Err(GuardrailRejection::MissingConstraints);
    }
    Ok(())
}

pub fn check_response(changes: &[FileChange]) -> Result<(), GuardrailRejection> {
    match changes.iter().find(|c| touches_manifest(&c.file)) {
        Some(change) => Err(GuardrailRejection::ManifestChange(change.file.clone())),
        None => Ok(()),
    }
}

fn touches_manifest(file: &str) -> bool {
    Path::new(file)
        .file_name()
        .is_some_and(|name| name == MANIFEST_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(message: &str) -> DirectFixRequest {
        DirectFixRequest {
            error_message: message.to_string(),
            file_path: "src/app.ts".into(),
            file_content: "const a = 1;".into(),
            constraints: vec!["keep public API".into()],
            context: None,
        }
    }

    #[test]
    fn test_version_questions_rejected() {
        for msg in [
            "Which version of @angular/core supports standalone components?",
            "what rxjs version do I need",
            "Should we upgrade zone.js?",
            "upgrade typescript to 5.4",
        ] {
            assert_eq!(check_request(&request(msg)), Err(GuardrailRejection::VersionQuestion), "{}", msg);
        }
    }

    #[test]
    fn test_ordinary_errors_pass() {
        for msg in [
            "Property 'map' does not exist on type 'Observable<any>'",
            "NG0303: Can't bind to 'ngModel' since it isn't a known property of 'input'",
            "error TS2307: Cannot find module '@angular/http'",
        ] {
            assert_eq!(check_request(&request(msg)), Ok(()), "{}", msg);
        }
    }

    #[test]
    fn test_missing_inputs_rejected() {
        let mut req = request("boom");
        req.file_content = "  ".into();
        assert_eq!(check_request(&req), Err(GuardrailRejection::MissingFileContent));

        let mut req = request("boom");
        req.constraints.clear();
        assert_eq!(check_request(&req), Err(GuardrailRejection::MissingConstraints));
    }

    #[test]
    fn test_manifest_changes_rejected() {
        let ok = FileChange::replace_content("src/app.ts", "x".into(), "r");
        let nested = FileChange::replace_content("projects/lib/package.json", "{}".into(), "r");
        assert_eq!(check_response(&[ok.clone()]), Ok(()));
        assert_eq!(
            check_response(&[ok, nested]),
            Err(GuardrailRejection::ManifestChange("projects/lib/package.json".into()))
        );
    }
}
