//! Deterministic diagnosis of well-known failure signatures.
//!
//! `diagnose` is a pure function of its inputs: the same message and build
//! output always produce the same `Diagnosis`. When its confidence clears the
//! fast-track threshold the agent skips the reasoning loop entirely and uses
//! [`fix::generate_fast_fix`] instead.

pub mod fix;

use crate::types::{Diagnosis, Severity};
use regex::Regex;
use std::sync::LazyLock;

pub use fix::{generate_fast_fix, remove_package_imports};

pub const ENVIRONMENT_ONLY_ISSUE: &str = "environment-only-package";

pub(crate) const EXACT_MATCH_CONFIDENCE: f64 = 0.95;
pub(crate) const DENYLIST_CONFIDENCE: f64 = 0.85;
pub(crate) const PATTERN_CONFIDENCE: f64 = 0.7;

/// Packages that only work in a server runtime and break browser bundles.
pub const ENVIRONMENT_ONLY_PACKAGES: &[&str] = &[
    "jsonwebtoken",
    "bcrypt",
    "fs-extra",
    "express",
    "mongoose",
    "nodemailer",
    "pg",
    "mysql",
    "mysql2",
    "sharp",
    "dotenv",
    "winston",
    "child-process-promise",
    "node-fetch",
    "ws",
];

/// A package known to fail with one exact error text after a migration.
struct KnownIncompatibility {
    package: &'static str,
    error_text: &'static str,
    root_cause: &'static str,
}

const KNOWN_INCOMPATIBILITIES: &[KnownIncompatibility] = &[
    KnownIncompatibility {
        package: "jsonwebtoken",
        error_text: "Cannot convert undefined or null to object",
        root_cause: "jsonwebtoken depends on server-only built-ins (crypto streams, util.inherits on Buffer) that the new bundler no longer polyfills",
    },
    KnownIncompatibility {
        package: "bcrypt",
        error_text: "Can't resolve 'fs'",
        root_cause: "bcrypt loads a native addon through the filesystem, which cannot exist in a browser bundle",
    },
];

/// Ordered `(pattern, issue type, hint)` table. First match wins.
static SIGNATURE_PATTERNS: LazyLock<Vec<(Regex, &'static str, &'static str)>> = LazyLock::new(|| {
    let table: &[(&str, &str, &str)] = &[
        (
            r"(?i)(?:process|Buffer|global) is not defined",
            "missing-node-polyfill",
            "A server-runtime global is referenced from browser code; remove the dependency that needs it or provide the global explicitly",
        ),
        (
            r"NullInjectorError|No provider for",
            "missing-provider",
            "Register the injectable in the providers of the bootstrapping config or mark it providedIn: 'root'",
        ),
        (
            r"is not a known element",
            "unregistered-component",
            "Import the component or its module into the consuming standalone component/module",
        ),
        (
            r"Can't bind to '[^']+' since it isn't a known property",
            "unknown-property-binding",
            "The input is not declared on the target component or the declaring module is not imported",
        ),
        (
            r"ExpressionChangedAfterItHasBeenCheckedError",
            "change-detection",
            "A bound value changes during change detection; move the update to a later lifecycle hook",
        ),
        (
            r"(?:pipe|subscribe|map|toPromise) is not a function",
            "reactive-operator-api",
            "Reactive operators moved to pipeable form; rewrite chained operators as pipe(...) calls",
        ),
        (
            r"is not a function",
            "deprecated-api",
            "A function removed or renamed in the new framework version is still called",
        ),
        (
            r"Cannot find module|Module not found|Can't resolve",
            "missing-module",
            "An import path no longer exists after the upgrade; update the import or install the replacement package",
        ),
        (
            r"Cannot read propert(?:y|ies) of (?:undefined|null)",
            "undefined-access",
            "A value is undefined at runtime; check initialization order after the migration",
        ),
        (
            r"has no exported member",
            "removed-export",
            "The symbol was removed or renamed in the new version of the package",
        ),
        (
            r"Cannot match any routes",
            "routing-config",
            "A route definition was not migrated to the new router configuration",
        ),
    ];
    table
        .iter()
        .filter_map(|(pattern, issue, hint)| Regex::new(pattern).ok().map(|re| (re, *issue, *hint)))
        .collect()
});

static PACKAGE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"node_modules[/\\]((?:@[\w.-]+[/\\])?[\w.-]+)").expect("valid package marker regex")
});

static SOURCE_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"((?:[A-Za-z]:)?[\w./\\@-]*?[\w.-]+\.(?:ts|tsx|js|jsx|mjs|cjs|html)):(\d+)(?::(\d+))?")
        .expect("valid source frame regex")
});

/// Package names found inside dependency-directory paths, in first-seen order.
pub fn extract_packages(text: &str) -> Vec<String> {
    let mut packages: Vec<String> = Vec::new();
    for cap in PACKAGE_MARKER.captures_iter(text) {
        let name = cap[1].replace('\\', "/");
        if name.starts_with('.') {
            continue;
        }
        if !packages.contains(&name) {
            packages.push(name);
        }
    }
    packages
}

/// Project source files referenced by stack frames (dependency frames excluded).
pub fn extract_stack_files(text: &str) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    for cap in SOURCE_FRAME.captures_iter(text) {
        let path = cap[1].replace('\\', "/");
        if path.contains("node_modules/") || path.starts_with("http") {
            continue;
        }
        // webpack:///./src/x.ts
        let path = match path.find("///") {
            Some(i) => &path[i + 3..],
            None => path.as_str(),
        };
        let path = path.trim_start_matches("./").to_string();
        if !files.contains(&path) {
            files.push(path);
        }
    }
    files
}

pub fn is_environment_only(package: &str) -> bool {
    ENVIRONMENT_ONLY_PACKAGES.contains(&package)
}

/// Diagnose a failure from its message and the surrounding build output.
///
/// Order: an exact known incompatibility (0.95), then the signature table
/// (0.7, first match wins), then environment-only packages seen in the
/// output (0.85). `None` when nothing matches.
pub fn diagnose(message: &str, raw_output: &str) -> Option<Diagnosis> {
    let combined = if raw_output.is_empty() {
        message.to_string()
    } else {
        format!("{}\n{}", message, raw_output)
    };
    let packages = extract_packages(&combined);
    let affected_files = extract_stack_files(&combined);

    for known in KNOWN_INCOMPATIBILITIES {
        if combined.contains(known.error_text) && packages.iter().any(|p| p == known.package) {
            return Some(Diagnosis {
                issue_type: ENVIRONMENT_ONLY_ISSUE.to_string(),
                root_cause: known.root_cause.to_string(),
                affected_files,
                severity: Severity::Critical,
                confidence: EXACT_MATCH_CONFIDENCE,
                evidence: vec![
                    format!("error text: \"{}\"", known.error_text),
                    format!("stack frame inside node_modules/{}", known.package),
                ],
                suggested_fix: Some(format!(
                    "Remove {} from browser code and from package.json; move its usage behind a server API",
                    known.package
                )),
                problematic_packages: vec![known.package.to_string()],
            });
        }
    }

    for (pattern, issue_type, hint) in SIGNATURE_PATTERNS.iter() {
        if let Some(m) = pattern.find(&combined) {
            let mut evidence = vec![format!("matched \"{}\"", m.as_str())];
            evidence.extend(packages.iter().map(|p| format!("stack references node_modules/{}", p)));
            return Some(Diagnosis {
                issue_type: issue_type.to_string(),
                root_cause: hint.to_string(),
                affected_files,
                severity: Severity::High,
                confidence: PATTERN_CONFIDENCE,
                evidence,
                suggested_fix: Some(hint.to_string()),
                problematic_packages: packages.clone(),
            });
        }
    }

    let environment_only: Vec<String> = packages
        .iter()
        .filter(|p| is_environment_only(p))
        .cloned()
        .collect();
    if !environment_only.is_empty() {
        return Some(Diagnosis {
            issue_type: ENVIRONMENT_ONLY_ISSUE.to_string(),
            root_cause: format!(
                "Server-only package(s) {} are bundled into browser code",
                environment_only.join(", ")
            ),
            affected_files,
            severity: Severity::High,
            confidence: DENYLIST_CONFIDENCE,
            evidence: environment_only
                .iter()
                .map(|p| format!("stack references node_modules/{}", p))
                .collect(),
            suggested_fix: Some("Remove the server-only imports from browser code and from package.json".to_string()),
            problematic_packages: environment_only,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const JWT_STACK: &str = "TypeError: Cannot convert undefined or null to object\n    at Function.getPrototypeOf (<anonymous>)\n    at node_modules/jsonwebtoken/node_modules/safe-buffer/index.js:12:3\n    at Object.<anonymous> (node_modules/jsonwebtoken/sign.js:4:10)\n    at src/app/auth/auth.service.ts:3:1";

    #[test]
    fn test_exact_match_is_high_confidence() {
        let diagnosis = diagnose("Cannot convert undefined or null to object", JWT_STACK).unwrap();
        assert_eq!(diagnosis.issue_type, ENVIRONMENT_ONLY_ISSUE);
        assert_eq!(diagnosis.confidence, 0.95);
        assert_eq!(diagnosis.problematic_packages, vec!["jsonwebtoken".to_string()]);
        assert_eq!(diagnosis.affected_files, vec!["src/app/auth/auth.service.ts".to_string()]);
    }

    #[test]
    fn test_pattern_match_without_packages() {
        let diagnosis = diagnose("TypeError: this.http.get(...).map is not a function", "").unwrap();
        assert_eq!(diagnosis.issue_type, "reactive-operator-api");

        let diagnosis = diagnose("TypeError: foo.bar is not a function", "").unwrap();
        assert_eq!(diagnosis.issue_type, "deprecated-api");
        assert_eq!(diagnosis.confidence, 0.7);
        assert!(diagnosis.problematic_packages.is_empty());
    }

    #[test]
    fn test_denylist_intersection() {
        let output = "Error: boom\n at node_modules/express/lib/router.js:1:1\n at node_modules/rxjs/index.js:2:2\n at node_modules/pg/lib/client.js:5:5";
        let diagnosis = diagnose("Uncaught Error: boom", output).unwrap();
        assert_eq!(diagnosis.issue_type, ENVIRONMENT_ONLY_ISSUE);
        assert_eq!(diagnosis.confidence, 0.85);
        assert_eq!(diagnosis.problematic_packages, vec!["express".to_string(), "pg".to_string()]);
    }

    #[test]
    fn test_no_match_is_none() {
        assert!(diagnose("Something odd happened", "no markers here").is_none());
    }

    #[test]
    fn test_diagnose_is_deterministic() {
        let first = diagnose("Cannot convert undefined or null to object", JWT_STACK);
        for _ in 0..5 {
            assert_eq!(diagnose("Cannot convert undefined or null to object", JWT_STACK), first);
        }
    }

    #[test]
    fn test_extract_packages_handles_scopes_and_dedupes() {
        let text = "at node_modules/@angular/core/fesm2022/core.mjs:1\nat node_modules/@angular/core/x.js\nat node_modules\\lodash\\index.js";
        assert_eq!(extract_packages(text), vec!["@angular/core".to_string(), "lodash".to_string()]);
    }

    #[test]
    fn test_extract_stack_files_skips_dependencies() {
        let text = "at Foo (webpack:///./src/app/a.ts:10:5)\n at node_modules/x/y.js:1:1\n at src/main.ts:2";
        assert_eq!(
            extract_stack_files(text),
            vec!["src/app/a.ts".to_string(), "src/main.ts".to_string()]
        );
    }
}
