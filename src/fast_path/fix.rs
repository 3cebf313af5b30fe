//! Deterministic fix for environment-only packages: strip their imports from
//! source files and drop them from the manifest.

use super::ENVIRONMENT_ONLY_ISSUE;
use crate::tools::ToolExecutor;
use crate::types::{Diagnosis, FileChange, FixResult, DEPENDENCY_SECTIONS, MANIFEST_FILE};
use regex::Regex;
use std::collections::BTreeSet;

/// Source files the import remover looks at.
const SOURCE_GLOB: &str = "*.{ts,tsx,js,jsx,mjs,cjs}";

/// Build the five statement shapes that pull in `package` (or a subpath of it).
fn import_patterns(package: &str) -> Vec<Regex> {
    let spec = format!(r#"['"]{}(?:/[^'"\n]*)?['"]"#, regex::escape(package));
    let end = r"[ \t]*;?[ \t]*(?:\r?\n|$)";
    let patterns = [
        // import { a, b } from 'pkg'
        format!(r"(?m)^[ \t]*import\s+(?:type\s+)?\{{[^}}]*\}}\s*from\s*{spec}{end}"),
        // import a from 'pkg' / import * as a from 'pkg' / import a, { b } from 'pkg'
        format!(
            r"(?m)^[ \t]*import\s+(?:type\s+)?(?:\*\s*as\s+[\w$]+|[\w$]+(?:\s*,\s*(?:\{{[^}}]*\}}|\*\s*as\s+[\w$]+))?)\s+from\s*{spec}{end}"
        ),
        // import 'pkg'
        format!(r"(?m)^[ \t]*import\s*{spec}{end}"),
        // const { a } = require('pkg')
        format!(r"(?m)^[ \t]*(?:const|let|var)\s+\{{[^}}]*\}}\s*=\s*require\(\s*{spec}\s*\){end}"),
        // const a = require('pkg') / require('pkg')
        format!(r"(?m)^[ \t]*(?:(?:const|let|var)\s+[\w$]+\s*=\s*)?require\(\s*{spec}\s*\){end}"),
    ];
    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
}

/// Remove every import/require statement referencing `package`.
///
/// Idempotent: running it on already-clean input returns the input unchanged.
pub fn remove_package_imports(content: &str, package: &str) -> String {
    let mut updated = content.to_string();
    for pattern in import_patterns(package) {
        updated = pattern.replace_all(&updated, "").into_owned();
    }
    updated
}

/// Drop `packages` from the dependency sections of a manifest.
///
/// Returns `Ok(None)` when none of them were listed.
pub fn remove_from_manifest(content: &str, packages: &[String]) -> anyhow::Result<Option<String>> {
    let mut manifest: serde_json::Value = serde_json::from_str(content)?;
    let mut removed = false;

    for section in DEPENDENCY_SECTIONS {
        if let Some(deps) = manifest.get_mut(*section).and_then(|v| v.as_object_mut()) {
            let before = deps.len();
            deps.retain(|name, _| !packages.iter().any(|p| p == name));
            removed |= deps.len() != before;
        }
    }

    if !removed {
        return Ok(None);
    }
    let mut out = serde_json::to_string_pretty(&manifest)?;
    if content.ends_with('\n') {
        out.push('\n');
    }
    Ok(Some(out))
}

/// Produce a deterministic fix for an environment-only package diagnosis.
///
/// Returns `None` for any other diagnosis, or when nothing needed changing, so
/// the caller falls through to the full agent.
pub async fn generate_fast_fix(diagnosis: &Diagnosis, executor: &ToolExecutor) -> Option<FixResult> {
    if diagnosis.issue_type != ENVIRONMENT_ONLY_ISSUE || diagnosis.problematic_packages.is_empty() {
        return None;
    }
    let packages = &diagnosis.problematic_packages;

    let mut files: BTreeSet<String> = BTreeSet::new();
    for package in packages {
        let pattern = match Regex::new(&format!(r#"['"]{}(/[^'"]*)?['"]"#, regex::escape(package))) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(package = %package, error = %e, "fast-path usage pattern rejected");
                continue;
            }
        };
        match executor.files_matching(pattern, SOURCE_GLOB).await {
            Ok(found) => files.extend(found),
            Err(e) => tracing::warn!(package = %package, error = %e, "fast-path usage search failed"),
        }
    }

    let mut changes: Vec<FileChange> = Vec::new();
    for file in &files {
        let content = match executor.read_raw(file) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(file = %file, error = %e, "skipping file in fast-path fix");
                continue;
            }
        };
        let updated = packages
            .iter()
            .fold(content.clone(), |acc, package| remove_package_imports(&acc, package));
        if updated != content {
            changes.push(FileChange::replace_content(
                file.clone(),
                updated,
                format!("Remove imports of server-only package(s): {}", packages.join(", ")),
            ));
        }
    }

    if let Ok(manifest) = executor.read_raw(MANIFEST_FILE) {
        match remove_from_manifest(&manifest, packages) {
            Ok(Some(updated)) => changes.push(FileChange::replace_content(
                MANIFEST_FILE,
                updated,
                format!("Remove {} from dependencies", packages.join(", ")),
            )),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "could not parse {}", MANIFEST_FILE),
        }
    }

    if changes.is_empty() {
        tracing::debug!(packages = ?packages, "fast path produced no changes");
        return None;
    }

    tracing::info!(
        packages = ?packages,
        changes = changes.len(),
        "fast path removed server-only packages"
    );
    Some(FixResult::fixed(
        changes,
        format!(
            "{} Removed the package(s) {} from source imports and from {}.",
            diagnosis.root_cause,
            packages.join(", "),
            MANIFEST_FILE
        ),
        diagnosis.confidence,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolConfig;
    use crate::fast_path::diagnose;
    use std::fs;
    use tempfile::tempdir;

    const SOURCE: &str = r#"import { Injectable } from '@angular/core';
import { sign, verify } from 'jsonwebtoken';
import jwt from "jsonwebtoken";
import * as jwtAll from 'jsonwebtoken';
import 'jsonwebtoken/register';
const { decode } = require('jsonwebtoken');
const legacy = require("jsonwebtoken");
require('jsonwebtoken');
import { jsonwebtokenHelper } from './jsonwebtoken-helper';

@Injectable()
export class AuthService {}
"#;

    #[test]
    fn test_removes_all_five_variants() {
        let cleaned = remove_package_imports(SOURCE, "jsonwebtoken");
        assert!(cleaned.contains("import { Injectable } from '@angular/core';"));
        assert!(cleaned.contains("./jsonwebtoken-helper"));
        assert!(!cleaned.contains("from 'jsonwebtoken'"));
        assert!(!cleaned.contains("from \"jsonwebtoken\""));
        assert!(!cleaned.contains("jsonwebtoken/register"));
        assert!(!cleaned.contains("require("));
        assert!(cleaned.contains("export class AuthService {}"));
    }

    #[test]
    fn test_import_removal_is_idempotent() {
        let once = remove_package_imports(SOURCE, "jsonwebtoken");
        let twice = remove_package_imports(&once, "jsonwebtoken");
        assert_eq!(once, twice);

        let clean = "const x = 1;\n";
        assert_eq!(remove_package_imports(clean, "jsonwebtoken"), clean);
    }

    #[test]
    fn test_multiline_named_import() {
        let src = "import {\n  sign,\n  verify,\n} from 'jsonwebtoken';\nconst a = 1;\n";
        assert_eq!(remove_package_imports(src, "jsonwebtoken"), "const a = 1;\n");
    }

    #[test]
    fn test_require_used_inline_is_kept() {
        let src = "const token = require('jsonwebtoken').sign(payload);\n";
        assert_eq!(remove_package_imports(src, "jsonwebtoken"), src);
    }

    #[test]
    fn test_remove_from_manifest_keeps_order() {
        let manifest = "{\n  \"name\": \"app\",\n  \"dependencies\": {\n    \"@angular/core\": \"^17.0.0\",\n    \"jsonwebtoken\": \"^9.0.0\",\n    \"rxjs\": \"^7.8.0\"\n  },\n  \"devDependencies\": {\n    \"jsonwebtoken\": \"^9.0.0\"\n  }\n}\n";
        let updated = remove_from_manifest(manifest, &["jsonwebtoken".to_string()])
            .unwrap()
            .unwrap();
        assert!(!updated.contains("jsonwebtoken"));
        let core = updated.find("@angular/core").unwrap();
        let rxjs = updated.find("rxjs").unwrap();
        assert!(core < rxjs);
        assert!(updated.ends_with('\n'));

        assert!(remove_from_manifest(&updated, &["jsonwebtoken".to_string()])
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_generate_fast_fix_end_to_end() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/app")).unwrap();
        fs::write(dir.path().join("src/app/auth.service.ts"), SOURCE).unwrap();
        fs::write(dir.path().join("src/app/other.ts"), "export const x = 1;\n").unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"dependencies": {"jsonwebtoken": "^9.0.0", "rxjs": "^7.8.0"}}"#,
        )
        .unwrap();

        let diagnosis = diagnose(
            "Cannot convert undefined or null to object",
            "at node_modules/jsonwebtoken/sign.js:1:1",
        )
        .unwrap();
        let executor = ToolExecutor::new(dir.path(), ToolConfig::default());
        let result = generate_fast_fix(&diagnosis, &executor).await.unwrap();

        assert!(result.success);
        assert_eq!(result.confidence, Some(0.95));
        let changes = result.changes.unwrap();
        let files: Vec<_> = changes.iter().map(|c| c.file.as_str()).collect();
        assert_eq!(files, vec!["src/app/auth.service.ts", "package.json"]);
        assert!(!changes[1].content.as_ref().unwrap().contains("jsonwebtoken"));
    }

    #[tokio::test]
    async fn test_generate_fast_fix_covers_every_importing_file() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        for i in 0..60 {
            fs::write(
                dir.path().join(format!("src/f{:02}.ts", i)),
                format!("import {{ sign }} from 'jsonwebtoken';\nexport const v{} = {};\n", i, i),
            )
            .unwrap();
        }
        fs::write(
            dir.path().join("package.json"),
            r#"{"dependencies": {"jsonwebtoken": "^9.0.0"}}"#,
        )
        .unwrap();

        let diagnosis = diagnose(
            "Cannot convert undefined or null to object",
            "at node_modules/jsonwebtoken/sign.js:1:1",
        )
        .unwrap();
        let config = ToolConfig::default();
        assert!(config.search_max_results < 60);
        let executor = ToolExecutor::new(dir.path(), config);
        let result = generate_fast_fix(&diagnosis, &executor).await.unwrap();

        let changes = result.changes.unwrap();
        let sources: Vec<_> = changes.iter().filter(|c| c.file.starts_with("src/")).collect();
        assert_eq!(sources.len(), 60);
        assert!(sources
            .iter()
            .all(|c| !c.content.as_deref().unwrap().contains("jsonwebtoken")));
        assert_eq!(changes.len(), 61);
    }

    #[tokio::test]
    async fn test_generate_fast_fix_none_when_nothing_to_change() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("app.ts"), "export const x = 1;\n").unwrap();
        let diagnosis = diagnose("boom", "at node_modules/express/lib/router.js:1:1").unwrap();
        let executor = ToolExecutor::new(dir.path(), ToolConfig::default());
        assert!(generate_fast_fix(&diagnosis, &executor).await.is_none());
    }

    #[tokio::test]
    async fn test_generate_fast_fix_ignores_other_issue_types() {
        let dir = tempdir().unwrap();
        let diagnosis = diagnose("foo is not a function", "").unwrap();
        let executor = ToolExecutor::new(dir.path(), ToolConfig::default());
        assert!(generate_fast_fix(&diagnosis, &executor).await.is_none());
    }
}
