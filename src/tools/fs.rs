//! Filesystem tools: readFile, searchCode, listFiles.

use super::{is_skipped_dir, parse_args, truncate_output, FileGlob, ToolExecutor, ToolResult};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use walkdir::WalkDir;

/// Files larger than this are not searched.
const MAX_SEARCH_FILE_BYTES: u64 = 2 * 1024 * 1024;
/// Matched lines are clipped to this many characters.
const MAX_MATCH_LINE_CHARS: usize = 200;

// ═══════════════════════════════════════════════════════════════════════════
//  READ FILE
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadFileArgs {
    path: String,
    #[serde(default, alias = "start_line")]
    start_line: Option<usize>,
    #[serde(default, alias = "end_line")]
    end_line: Option<usize>,
}

pub(super) fn read_file(exec: &ToolExecutor, args: &serde_json::Value) -> ToolResult {
    let args: ReadFileArgs = match parse_args(args) {
        Ok(a) => a,
        Err(result) => return result,
    };

    let target = match exec.resolve_path(&args.path) {
        Ok(p) => p,
        Err(denied) => return ToolResult::failure(denied),
    };
    if !target.is_file() {
        return ToolResult::failure(format!("File not found: {}", args.path));
    }

    let bytes = match fs::read(&target) {
        Ok(b) => b,
        Err(e) => return ToolResult::failure(format!("Failed to read file: {}", e)),
    };
    let content = String::from_utf8_lossy(&bytes);
    let total_lines = content.lines().count();

    if args.start_line.is_none() && args.end_line.is_none() {
        let max = exec.config().read_file_max_bytes;
        let truncated = content.len() > max;
        let output = truncate_output(content.into_owned(), max);
        return ToolResult::ok(output).with_metadata(serde_json::json!({
            "path": args.path,
            "totalLines": total_lines,
            "truncated": truncated,
        }));
    }

    let start = args.start_line.unwrap_or(1);
    let end = args.end_line.unwrap_or(total_lines.max(start));
    if start == 0 || end < start {
        return ToolResult::failure("Invalid range: startLine must be >= 1 and endLine must be >= startLine");
    }
    if start > total_lines {
        return ToolResult::failure(format!(
            "Start line {} exceeds file length ({})",
            start, total_lines
        ));
    }
    let end = end.min(total_lines);

    let mut output = String::new();
    if start > 1 {
        output.push_str(&format!("... (lines 1-{} above)\n\n", start - 1));
    }
    for (i, line) in content.lines().enumerate().skip(start - 1).take(end - start + 1) {
        output.push_str(&format!("{:>4}│ {}\n", i + 1, line));
    }
    if end < total_lines {
        output.push_str(&format!("\n... ({} more lines below)\n", total_lines - end));
    }

    ToolResult::ok(output).with_metadata(serde_json::json!({
        "path": args.path,
        "totalLines": total_lines,
        "startLine": start,
        "endLine": end,
    }))
}

// ═══════════════════════════════════════════════════════════════════════════
//  SEARCH CODE
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchArgs {
    pattern: String,
    #[serde(default, alias = "file_pattern")]
    file_pattern: Option<String>,
    #[serde(default, alias = "case_sensitive")]
    case_sensitive: Option<bool>,
}

pub(super) fn search_code(exec: &ToolExecutor, args: &serde_json::Value) -> ToolResult {
    let args: SearchArgs = match parse_args(args) {
        Ok(a) => a,
        Err(result) => return result,
    };
    if args.pattern.is_empty() {
        return ToolResult::failure("Invalid arguments: pattern must not be empty");
    }

    let case_insensitive = !args.case_sensitive.unwrap_or(false);
    // Not a valid regex? Search for it literally.
    let matcher = RegexBuilder::new(&args.pattern)
        .case_insensitive(case_insensitive)
        .build()
        .or_else(|_| {
            RegexBuilder::new(&regex::escape(&args.pattern))
                .case_insensitive(case_insensitive)
                .build()
        });
    let matcher = match matcher {
        Ok(m) => m,
        Err(e) => return ToolResult::failure(format!("Invalid pattern: {}", e)),
    };

    let file_glob = match args.file_pattern.as_deref() {
        Some(glob) => match FileGlob::new(exec.root(), glob) {
            Ok(g) => Some(g),
            Err(e) => return ToolResult::failure(format!("Invalid file pattern {}: {}", glob, e)),
        },
        None => None,
    };

    let max_results = exec.config().search_max_results;
    let mut lines: Vec<String> = Vec::new();
    let mut files: BTreeSet<String> = BTreeSet::new();
    let mut truncated = false;

    'files: for (rel, path) in searchable_files(exec, file_glob.as_ref()) {
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };

        for (i, line) in content.lines().enumerate() {
            if !matcher.is_match(line) {
                continue;
            }
            if lines.len() >= max_results {
                truncated = true;
                break 'files;
            }
            files.insert(rel.clone());
            lines.push(format!("{}:{}: {}", rel, i + 1, clip_line(line.trim())));
        }
    }

    let metadata = serde_json::json!({
        "matches": lines.len(),
        "files": files.iter().collect::<Vec<_>>(),
        "truncated": truncated,
    });

    if lines.is_empty() {
        return ToolResult::ok("No matches found").with_metadata(metadata);
    }

    let mut output = lines.join("\n");
    if truncated {
        output.push_str(&format!(
            "\n\n... (results truncated at {} matches - narrow the pattern or filePattern)",
            max_results
        ));
    }
    ToolResult::ok(output).with_metadata(metadata)
}

/// Files `searchCode` looks at, in name order: dependency and hidden
/// directories are pruned and oversized files skipped.
fn searchable_files<'a>(
    exec: &'a ToolExecutor,
    glob: Option<&'a FileGlob>,
) -> impl Iterator<Item = (String, PathBuf)> + 'a {
    WalkDir::new(exec.root())
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !(e.file_type().is_dir() && is_skipped_dir(&e.file_name().to_string_lossy()))
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(move |e| glob.is_none_or(|g| g.matches(e.path())))
        .filter(|e| e.metadata().map(|m| m.len() <= MAX_SEARCH_FILE_BYTES).unwrap_or(false))
        .map(move |e| (exec.relative_display(e.path()), e.into_path()))
}

/// Root-relative paths of every searchable file with a line matching `matcher`.
pub(super) fn files_matching(exec: &ToolExecutor, matcher: &Regex, glob: Option<&FileGlob>) -> Vec<String> {
    searchable_files(exec, glob)
        .filter(|(_, path)| {
            fs::read_to_string(path)
                .map(|content| content.lines().any(|line| matcher.is_match(line)))
                .unwrap_or(false)
        })
        .map(|(rel, _)| rel)
        .collect()
}

fn clip_line(line: &str) -> String {
    if line.chars().count() <= MAX_MATCH_LINE_CHARS {
        line.to_string()
    } else {
        format!("{}...", line.chars().take(MAX_MATCH_LINE_CHARS).collect::<String>())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  LIST FILES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ListArgs {
    #[serde(default, alias = "path")]
    directory: Option<String>,
    #[serde(default)]
    recursive: Option<bool>,
    #[serde(default)]
    pattern: Option<String>,
}

pub(super) fn list_files(exec: &ToolExecutor, args: &serde_json::Value) -> ToolResult {
    let args: ListArgs = match parse_args(args) {
        Ok(a) => a,
        Err(result) => return result,
    };
    let directory = args.directory.unwrap_or_else(|| ".".to_string());

    let target = match exec.resolve_path(&directory) {
        Ok(p) => p,
        Err(denied) => return ToolResult::failure(denied),
    };
    if !target.is_dir() {
        return ToolResult::failure(format!("Directory not found: {}", directory));
    }

    let glob = match args.pattern.as_deref() {
        Some(p) => match FileGlob::new(exec.root(), p) {
            Ok(g) => Some(g),
            Err(e) => return ToolResult::failure(format!("Invalid pattern {}: {}", p, e)),
        },
        None => None,
    };

    let max_depth = if args.recursive.unwrap_or(false) { usize::MAX } else { 1 };
    let max_entries = exec.config().list_max_entries;
    let mut entries: Vec<String> = Vec::new();
    let mut truncated = false;

    let walker = WalkDir::new(&target)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(&e.file_name().to_string_lossy()));

    for entry in walker.filter_map(|e| e.ok()) {
        let rel = exec.relative_display(entry.path());
        let is_dir = entry.file_type().is_dir();
        if let Some(glob) = &glob {
            if is_dir || !glob.matches(entry.path()) {
                continue;
            }
        }
        if entries.len() >= max_entries {
            truncated = true;
            break;
        }
        entries.push(if is_dir { format!("{}/", rel) } else { rel });
    }

    let metadata = serde_json::json!({ "count": entries.len(), "truncated": truncated });
    if entries.is_empty() {
        return ToolResult::ok(format!("No entries found in {}", directory)).with_metadata(metadata);
    }

    let mut output = entries.join("\n");
    if truncated {
        output.push_str(&format!("\n\n... (listing truncated at {} entries)", max_entries));
    }
    ToolResult::ok(output).with_metadata(metadata)
}

#[cfg(test)]
mod tests {
    use crate::config::ToolConfig;
    use crate::tools::{ToolCall, ToolExecutor};
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn executor(root: &Path) -> ToolExecutor {
        ToolExecutor::new(root, ToolConfig::default())
    }

    async fn run(root: &Path, name: &str, args: serde_json::Value) -> crate::tools::ToolResult {
        executor(root).execute(&ToolCall::new("1", name, args)).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    //  READ FILE TESTS
    // ═══════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn test_read_file_full() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("main.ts"), "import x from 'y';\nconsole.log(x);\n").unwrap();

        let result = run(dir.path(), "readFile", serde_json::json!({"path": "main.ts"})).await;
        assert!(result.success);
        assert!(result.result.contains("console.log(x);"));
        assert_eq!(result.metadata.unwrap()["truncated"], false);
    }

    #[tokio::test]
    async fn test_read_file_truncates_at_ceiling() {
        let dir = tempdir().unwrap();
        let content = (1..=2000).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        fs::write(dir.path().join("big.ts"), &content).unwrap();

        let result = run(dir.path(), "readFile", serde_json::json!({"path": "big.ts"})).await;
        assert!(result.success);
        assert!(result.result.contains("truncated"));
        assert!(result.result.len() < content.len());
        assert_eq!(result.metadata.unwrap()["truncated"], true);
    }

    #[tokio::test]
    async fn test_read_file_range_is_line_numbered() {
        let dir = tempdir().unwrap();
        let content = (1..=50).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        fs::write(dir.path().join("test.txt"), &content).unwrap();

        let result = run(
            dir.path(),
            "readFile",
            serde_json::json!({"path": "test.txt", "startLine": 10, "endLine": 15}),
        )
        .await;
        assert!(result.success);
        assert!(result.result.contains("  10│ line 10"));
        assert!(result.result.contains("  15│ line 15"));
        assert!(!result.result.contains("line 16"));
        assert!(result.result.contains("lines 1-9 above"));
        assert!(result.result.contains("35 more lines below"));
    }

    #[tokio::test]
    async fn test_read_file_invalid_range() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("test.txt"), "a\nb").unwrap();
        let result = run(
            dir.path(),
            "readFile",
            serde_json::json!({"path": "test.txt", "startLine": 5, "endLine": 2}),
        )
        .await;
        assert!(!result.success);
        assert!(result.result.contains("Invalid range"));
    }

    #[tokio::test]
    async fn test_read_file_not_found() {
        let dir = tempdir().unwrap();
        let result = run(dir.path(), "readFile", serde_json::json!({"path": "nope.ts"})).await;
        assert!(!result.success);
        assert!(result.result.contains("File not found"));
    }

    #[tokio::test]
    async fn test_read_file_cannot_escape_root() {
        let dir = tempdir().unwrap();
        let result = run(dir.path(), "readFile", serde_json::json!({"path": "../../etc/passwd"})).await;
        assert!(!result.success);
        assert!(result.result.contains("Access denied"));
        assert!(!result.result.contains("root:"));
    }

    #[tokio::test]
    async fn test_read_file_missing_args() {
        let dir = tempdir().unwrap();
        let result = run(dir.path(), "readFile", serde_json::json!({})).await;
        assert!(!result.success);
        assert!(result.result.contains("Invalid arguments"));
    }

    // ═══════════════════════════════════════════════════════════════════════
    //  SEARCH CODE TESTS
    // ═══════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn test_search_basic_with_file_pattern() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/app")).unwrap();
        fs::write(dir.path().join("src/app/a.ts"), "import { Http } from '@angular/http';\n").unwrap();
        fs::write(dir.path().join("src/app/a.html"), "<div>@angular/http</div>\n").unwrap();

        let result = run(
            dir.path(),
            "searchCode",
            serde_json::json!({"pattern": "@angular/http", "filePattern": "*.ts"}),
        )
        .await;
        assert!(result.success);
        assert!(result.result.contains("src/app/a.ts:1:"));
        assert!(!result.result.contains("a.html"));
        assert_eq!(result.metadata.unwrap()["files"][0], "src/app/a.ts");
    }

    #[tokio::test]
    async fn test_search_skips_dependency_dirs() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join("node_modules/pkg/index.js"), "needle").unwrap();
        fs::write(dir.path().join(".git/config"), "needle").unwrap();
        fs::write(dir.path().join("app.ts"), "needle").unwrap();

        let result = run(dir.path(), "searchCode", serde_json::json!({"pattern": "needle"})).await;
        assert!(result.result.contains("app.ts"));
        assert!(!result.result.contains("node_modules"));
        assert!(!result.result.contains(".git"));
    }

    #[tokio::test]
    async fn test_search_no_matches_is_success() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("app.ts"), "fn main() {}").unwrap();
        let result = run(dir.path(), "searchCode", serde_json::json!({"pattern": "zzz_nothing"})).await;
        assert!(result.success);
        assert_eq!(result.result, "No matches found");
    }

    #[tokio::test]
    async fn test_search_caps_results() {
        let dir = tempdir().unwrap();
        let content = (0..80).map(|i| format!("hit {}", i)).collect::<Vec<_>>().join("\n");
        fs::write(dir.path().join("many.ts"), content).unwrap();

        let result = run(dir.path(), "searchCode", serde_json::json!({"pattern": "hit"})).await;
        assert!(result.success);
        assert_eq!(result.result.lines().filter(|l| l.starts_with("many.ts:")).count(), 50);
        assert!(result.result.contains("results truncated at 50"));
    }

    #[tokio::test]
    async fn test_files_matching_is_not_capped() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        for i in 0..75 {
            fs::write(dir.path().join(format!("src/f{:02}.ts", i)), "import x from 'pkg';\n").unwrap();
        }
        fs::write(dir.path().join("src/notes.md"), "import x from 'pkg';\n").unwrap();
        fs::write(dir.path().join("node_modules/pkg/index.ts"), "import x from 'pkg';\n").unwrap();

        let files = executor(dir.path())
            .files_matching(regex::Regex::new("'pkg'").unwrap(), "*.{ts,js}")
            .await
            .unwrap();
        assert_eq!(files.len(), 75);
        assert_eq!(files[0], "src/f00.ts");
        assert!(files.iter().all(|f| f.starts_with("src/") && f.ends_with(".ts")));
    }

    #[tokio::test]
    async fn test_invalid_file_pattern_is_reported() {
        let dir = tempdir().unwrap();
        let result = run(
            dir.path(),
            "searchCode",
            serde_json::json!({"pattern": "x", "filePattern": "src/[z-a].ts"}),
        )
        .await;
        assert!(!result.success);
        assert!(result.result.contains("Invalid file pattern"));
    }

    #[tokio::test]
    async fn test_search_case_sensitivity() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "Observable\n").unwrap();

        let insensitive = run(dir.path(), "searchCode", serde_json::json!({"pattern": "observable"})).await;
        assert!(insensitive.result.contains("a.ts:1"));

        let sensitive = run(
            dir.path(),
            "searchCode",
            serde_json::json!({"pattern": "observable", "caseSensitive": true}),
        )
        .await;
        assert_eq!(sensitive.result, "No matches found");
    }

    #[tokio::test]
    async fn test_search_invalid_regex_falls_back_to_literal() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "call(foo\n").unwrap();
        let result = run(dir.path(), "searchCode", serde_json::json!({"pattern": "call(foo"})).await;
        assert!(result.success);
        assert!(result.result.contains("a.ts:1"));
    }

    // ═══════════════════════════════════════════════════════════════════════
    //  LIST FILES TESTS
    // ═══════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn test_list_files_flat_and_recursive() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/app")).unwrap();
        fs::create_dir_all(dir.path().join("node_modules/x")).unwrap();
        fs::create_dir_all(dir.path().join(".hidden")).unwrap();
        fs::write(dir.path().join("package.json"), "{}").unwrap();
        fs::write(dir.path().join("src/app/a.ts"), "").unwrap();

        let flat = run(dir.path(), "listFiles", serde_json::json!({})).await;
        assert!(flat.success);
        assert!(flat.result.contains("src/"));
        assert!(flat.result.contains("package.json"));
        assert!(!flat.result.contains("a.ts"));
        assert!(!flat.result.contains("node_modules"));
        assert!(!flat.result.contains(".hidden"));

        let deep = run(dir.path(), "listFiles", serde_json::json!({"directory": "src", "recursive": true})).await;
        assert!(deep.result.contains("src/app/"));
        assert!(deep.result.contains("src/app/a.ts"));
    }

    #[tokio::test]
    async fn test_list_files_pattern_filters_files() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.ts"), "").unwrap();
        fs::write(dir.path().join("src/a.html"), "").unwrap();

        let result = run(
            dir.path(),
            "listFiles",
            serde_json::json!({"directory": "src", "pattern": "*.ts"}),
        )
        .await;
        assert_eq!(result.result.trim(), "src/a.ts");
    }

    #[tokio::test]
    async fn test_list_files_missing_directory() {
        let dir = tempdir().unwrap();
        let result = run(dir.path(), "listFiles", serde_json::json!({"directory": "nope"})).await;
        assert!(!result.success);
        assert!(result.result.contains("Directory not found"));
    }
}
