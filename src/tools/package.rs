//! checkPackage: manifest lookup plus browser-compatibility classification.

use super::{parse_args, ToolExecutor, ToolResult};
use crate::fast_path::is_environment_only;
use crate::types::MANIFEST_FILE;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

const MANIFEST_SECTIONS: &[&str] = &["dependencies", "devDependencies", "peerDependencies"];

static PACKAGE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:@[a-zA-Z0-9][\w.-]*/)?[a-zA-Z0-9][\w.-]*$").expect("valid package name regex")
});

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckPackageArgs {
    #[serde(alias = "package_name", alias = "name")]
    package_name: String,
    #[serde(default, alias = "check_browser_compat")]
    check_browser_compat: Option<bool>,
}

/// What the installed copy of a dependency says about itself.
#[derive(Debug, Default)]
struct InstalledInfo {
    version: Option<String>,
    has_browser_field: bool,
    has_bin: bool,
    requires_node_engine: bool,
}

pub(super) fn check_package(exec: &ToolExecutor, args: &serde_json::Value) -> ToolResult {
    let args: CheckPackageArgs = match parse_args(args) {
        Ok(a) => a,
        Err(result) => return result,
    };
    let name = args.package_name.trim();
    if !PACKAGE_NAME.is_match(name) || name.contains("..") {
        return ToolResult::failure(format!("Invalid package name: {}", name));
    }
    let check_browser = args.check_browser_compat.unwrap_or(true);

    let manifest = match exec.read_raw(MANIFEST_FILE) {
        Ok(m) => m,
        Err(_) => return ToolResult::failure(format!("No {} found in project root", MANIFEST_FILE)),
    };
    let manifest: serde_json::Value = match serde_json::from_str(&manifest) {
        Ok(v) => v,
        Err(e) => return ToolResult::failure(format!("Failed to parse {}: {}", MANIFEST_FILE, e)),
    };

    let declared = MANIFEST_SECTIONS.iter().find_map(|section| {
        manifest
            .get(*section)
            .and_then(|deps| deps.get(name))
            .and_then(|v| v.as_str())
            .map(|version| (*section, version.to_string()))
    });

    let installed = read_installed(exec, name);
    let is_installed = installed.is_some();
    let info = installed.unwrap_or_default();

    let denylisted = is_environment_only(name);
    let heuristically_server_only =
        is_installed && !info.has_browser_field && info.has_bin && info.requires_node_engine;
    let is_environment_only = check_browser && (denylisted || heuristically_server_only);

    let mut lines = vec![format!("Package: {}", name)];
    match &declared {
        Some((section, version)) => lines.push(format!("Declared: {} in {}", version, section)),
        None => lines.push(format!("Declared: not listed in {}", MANIFEST_FILE)),
    }
    match (&info.version, is_installed) {
        (Some(v), true) => lines.push(format!("Installed: {}", v)),
        (None, true) => lines.push("Installed: yes (version unknown)".to_string()),
        _ => lines.push("Installed: no".to_string()),
    }
    if check_browser {
        lines.push(format!("Browser field: {}", if info.has_browser_field { "yes" } else { "no" }));
    }

    let recommendation = if declared.is_none() && !is_installed {
        format!("{} is neither declared nor installed; the import is stale or the package name is wrong.", name)
    } else if is_environment_only {
        format!(
            "{} only runs in a server runtime and cannot be bundled for the browser. Remove its imports from browser code and drop it from {}, or move the usage behind a server API.",
            name, MANIFEST_FILE
        )
    } else if declared.is_some() && !is_installed {
        format!("{} is declared but not installed; reinstall dependencies before investigating further.", name)
    } else if info.has_browser_field {
        format!("{} ships a browser entry point and should bundle correctly.", name)
    } else {
        format!("No browser-compatibility problems detected for {}.", name)
    };
    lines.push(format!("Recommendation: {}", recommendation));

    ToolResult::ok(lines.join("\n")).with_metadata(serde_json::json!({
        "packageName": name,
        "declaredVersion": declared.as_ref().map(|(_, v)| v.clone()),
        "dependencySection": declared.as_ref().map(|(s, _)| *s),
        "installedVersion": info.version,
        "isInstalled": is_installed,
        "hasBrowserField": info.has_browser_field,
        "isEnvironmentOnly": is_environment_only,
    }))
}

fn read_installed(exec: &ToolExecutor, name: &str) -> Option<InstalledInfo> {
    let raw = exec
        .read_raw(&format!("node_modules/{}/{}", name, MANIFEST_FILE))
        .ok()?;
    let Ok(manifest) = serde_json::from_str::<serde_json::Value>(&raw) else {
        return Some(InstalledInfo::default());
    };
    Some(InstalledInfo {
        version: manifest.get("version").and_then(|v| v.as_str()).map(str::to_string),
        has_browser_field: manifest.get("browser").is_some(),
        has_bin: manifest.get("bin").is_some(),
        requires_node_engine: manifest.get("engines").and_then(|e| e.get("node")).is_some(),
    })
}

#[cfg(test)]
mod tests {
    use crate::config::ToolConfig;
    use crate::tools::{ToolCall, ToolExecutor, ToolResult};
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    async fn check(root: &Path, args: serde_json::Value) -> ToolResult {
        ToolExecutor::new(root, ToolConfig::default())
            .execute(&ToolCall::new("1", "checkPackage", args))
            .await
    }

    fn project(root: &Path) {
        fs::write(
            root.join("package.json"),
            r#"{"dependencies": {"jsonwebtoken": "^9.0.0", "dayjs": "^1.11.0"}, "devDependencies": {"my-cli": "^1.0.0"}}"#,
        )
        .unwrap();
        fs::create_dir_all(root.join("node_modules/dayjs")).unwrap();
        fs::write(
            root.join("node_modules/dayjs/package.json"),
            r#"{"version": "1.11.10", "browser": "dayjs.min.js"}"#,
        )
        .unwrap();
        fs::create_dir_all(root.join("node_modules/my-cli")).unwrap();
        fs::write(
            root.join("node_modules/my-cli/package.json"),
            r#"{"version": "1.0.3", "bin": {"my-cli": "cli.js"}, "engines": {"node": ">=18"}}"#,
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_denylisted_package() {
        let dir = tempdir().unwrap();
        project(dir.path());
        let result = check(dir.path(), serde_json::json!({"packageName": "jsonwebtoken"})).await;
        assert!(result.success);
        let meta = result.metadata.unwrap();
        assert_eq!(meta["isEnvironmentOnly"], true);
        assert_eq!(meta["isInstalled"], false);
        assert_eq!(meta["declaredVersion"], "^9.0.0");
        assert!(result.result.contains("Recommendation"));
    }

    #[tokio::test]
    async fn test_browser_package() {
        let dir = tempdir().unwrap();
        project(dir.path());
        let result = check(dir.path(), serde_json::json!({"packageName": "dayjs"})).await;
        let meta = result.metadata.unwrap();
        assert_eq!(meta["isInstalled"], true);
        assert_eq!(meta["hasBrowserField"], true);
        assert_eq!(meta["isEnvironmentOnly"], false);
        assert_eq!(meta["installedVersion"], "1.11.10");
    }

    #[tokio::test]
    async fn test_installed_cli_is_server_only() {
        let dir = tempdir().unwrap();
        project(dir.path());
        let result = check(dir.path(), serde_json::json!({"packageName": "my-cli"})).await;
        let meta = result.metadata.unwrap();
        assert_eq!(meta["dependencySection"], "devDependencies");
        assert_eq!(meta["isEnvironmentOnly"], true);
    }

    #[tokio::test]
    async fn test_rejects_traversal_names() {
        let dir = tempdir().unwrap();
        project(dir.path());
        let result = check(dir.path(), serde_json::json!({"packageName": "../../etc"})).await;
        assert!(!result.success);
        assert!(result.result.contains("Invalid package name"));
    }

    #[tokio::test]
    async fn test_missing_manifest() {
        let dir = tempdir().unwrap();
        let result = check(dir.path(), serde_json::json!({"packageName": "rxjs"})).await;
        assert!(!result.success);
        assert!(result.result.contains("No package.json"));
    }
}
