//! Response cache: one JSON file per normalized failure signature.
//!
//! Keys are content hashes, so concurrent runs only ever race on whole-file
//! replacement, which the temp-file-then-rename write makes atomic. Entries
//! older than `max_age` are treated as misses and deleted on read.

use crate::config::CacheConfig;
use crate::types::{ErrorCategory, FailureSignature, FixResult};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

/// Context characters folded into the key and stored with the entry.
const CONTEXT_KEY_CHARS: usize = 500;
const ENTRY_EXTENSION: &str = "json";
const IGNORE_FILE: &str = ".gitignore";

// ═══════════════════════════════════════════════════════════════════════════
//  KEYING
// ═══════════════════════════════════════════════════════════════════════════

/// `(pattern, replacement)` pairs applied in order to strip positions from a message.
static POSITION_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r":\d+:\d+", ":L:C"),
        (r"(\.[A-Za-z]{1,5}):\d+\b", "$1:L"),
        (r"\(\d+,\s*\d+\)", "(L,C)"),
        (r"(?i)\bline\s+\d+", "line N"),
        (r"(?i)\bcol(?:umn)?\s+\d+", "column N"),
    ]
    .into_iter()
    .filter_map(|(p, r)| Regex::new(p).ok().map(|re| (re, r)))
    .collect()
});

/// Replace line/column numbers in a message with placeholders.
pub fn normalize_message(message: &str) -> String {
    let mut normalized = message.trim().to_string();
    for (pattern, replacement) in POSITION_PATTERNS.iter() {
        normalized = pattern.replace_all(&normalized, *replacement).into_owned();
    }
    normalized
}

fn truncate_context(context: Option<&str>) -> String {
    context
        .map(|c| c.chars().take(CONTEXT_KEY_CHARS).collect())
        .unwrap_or_default()
}

/// Hex SHA-256 of the normalized signature and a context excerpt.
pub fn cache_key(signature: &FailureSignature, context: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_message(&signature.message).as_bytes());
    hasher.update([0u8]);
    hasher.update(signature.category.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(signature.file.as_deref().unwrap_or_default().as_bytes());
    hasher.update([0u8]);
    hasher.update(signature.line.map(|l| l.to_string()).unwrap_or_default().as_bytes());
    hasher.update([0u8]);
    hasher.update(truncate_context(context).as_bytes());
    hex::encode(hasher.finalize())
}

// ═══════════════════════════════════════════════════════════════════════════
//  ENTRIES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedError {
    pub message: String,
    pub category: ErrorCategory,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
}

/// On-disk layout of one cache file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub error: CachedError,
    #[serde(default)]
    pub context: String,
    pub result: FixResult,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Total bytes of entry files
    pub size: u64,
    pub entries: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

// ═══════════════════════════════════════════════════════════════════════════
//  STORE
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
    enabled: bool,
    max_age: Duration,
}

impl ResponseCache {
    /// Cache rooted at `<project_root>/<config.dir_name>`.
    pub fn new(project_root: &Path, config: &CacheConfig) -> Self {
        Self {
            dir: project_root.join(&config.dir_name),
            enabled: config.enabled,
            max_age: config.max_age(),
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, ENTRY_EXTENSION))
    }

    /// Cached result for this signature, if present and fresh.
    pub fn get(&self, signature: &FailureSignature, context: Option<&str>) -> Option<FixResult> {
        if !self.enabled {
            return None;
        }
        let key = cache_key(signature, context);
        let path = self.entry_path(&key);
        let Ok(content) = fs::read_to_string(&path) else {
            tracing::debug!(key = %key, "cache miss");
            return None;
        };

        let entry: CacheEntry = match serde_json::from_str(&content) {
            Ok(e) => e,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "dropping unreadable cache entry");
                let _ = fs::remove_file(&path);
                return None;
            }
        };

        if self.is_stale(&entry) {
            tracing::debug!(key = %key, cached_at = %entry.time, "evicting stale cache entry");
            let _ = fs::remove_file(&path);
            return None;
        }

        tracing::info!(key = %key, "cache hit");
        Some(entry.result)
    }

    /// Store a result. Best effort: failures are logged, never returned.
    pub fn set(&self, signature: &FailureSignature, context: Option<&str>, result: &FixResult) {
        if !self.enabled {
            return;
        }
        let key = cache_key(signature, context);
        let entry = CacheEntry {
            error: CachedError {
                message: signature.message.clone(),
                category: signature.category,
                file: signature.file.clone(),
                line: signature.line,
            },
            context: truncate_context(context),
            result: result.clone(),
            time: Utc::now(),
        };
        match self.write_entry(&key, &entry) {
            Ok(()) => tracing::debug!(key = %key, "cached fix result"),
            Err(err) => tracing::warn!(key = %key, error = %err, "failed to write cache entry"),
        }
    }

    /// Remove every entry. Returns how many were removed.
    pub fn clear(&self) -> anyhow::Result<usize> {
        let mut removed = 0;
        for path in self.entry_files()? {
            fs::remove_file(&path)?;
            removed += 1;
        }
        tracing::info!(removed, dir = %self.dir.display(), "cleared response cache");
        Ok(removed)
    }

    pub fn stats(&self) -> anyhow::Result<CacheStats> {
        let mut stats = CacheStats::default();
        for path in self.entry_files()? {
            stats.entries += 1;
            stats.size += fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            let Some(time) = fs::read_to_string(&path)
                .ok()
                .and_then(|c| serde_json::from_str::<CacheEntry>(&c).ok())
                .map(|e| e.time)
            else {
                continue;
            };
            stats.oldest = Some(stats.oldest.map_or(time, |t| t.min(time)));
            stats.newest = Some(stats.newest.map_or(time, |t| t.max(time)));
        }
        Ok(stats)
    }

    fn is_stale(&self, entry: &CacheEntry) -> bool {
        let age = Utc::now().signed_duration_since(entry.time);
        match age.to_std() {
            Ok(age) => age > self.max_age,
            // Timestamp in the future: clock skew, keep it.
            Err(_) => false,
        }
    }

    fn entry_files(&self) -> anyhow::Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|e| e == ENTRY_EXTENSION) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn ensure_dir(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let ignore = self.dir.join(IGNORE_FILE);
        if !ignore.exists() {
            fs::write(&ignore, "*\n")?;
        }
        Ok(())
    }

    fn write_entry(&self, key: &str, entry: &CacheEntry) -> anyhow::Result<()> {
        self.ensure_dir()?;
        let content = serde_json::to_string_pretty(entry)?;
        let path = self.entry_path(key);
        let tmp_path = self.dir.join(format!("{}.{}.tmp", key, uuid::Uuid::new_v4()));
        fs::write(&tmp_path, content)?;
        if let Err(err) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileChange;
    use tempfile::tempdir;

    fn signature(message: &str) -> FailureSignature {
        FailureSignature::new(message, ErrorCategory::Import).with_location("src/app/app.module.ts", Some(3), None)
    }

    fn result() -> FixResult {
        FixResult::fixed(
            vec![FileChange::replace_content("src/app/app.module.ts", "x".into(), "r")],
            "replaced HttpModule",
            0.8,
        )
    }

    fn cache(root: &Path) -> ResponseCache {
        ResponseCache::new(root, &CacheConfig::default())
    }

    #[test]
    fn test_normalize_message_strips_positions() {
        assert_eq!(
            normalize_message("src/app.ts:12:5 - error TS2307"),
            "src/app.ts:L:C - error TS2307"
        );
        assert_eq!(normalize_message("at app.component.ts:40"), "at app.component.ts:L");
        assert_eq!(normalize_message("app.ts(12,5): error"), "app.ts(L,C): error");
        assert_eq!(normalize_message("Error on line 7, column 3"), "Error on line N, column N");
    }

    #[test]
    fn test_key_ignores_positions_in_message() {
        let a = cache_key(&signature("src/a.ts:10:5 - Cannot find module 'x'"), None);
        let b = cache_key(&signature("src/a.ts:22:9 - Cannot find module 'x'"), None);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let other_context = cache_key(&signature("src/a.ts:10:5 - Cannot find module 'x'"), Some("angular 17"));
        assert_ne!(a, other_context);
    }

    #[test]
    fn test_round_trip() {
        let dir = tempdir().unwrap();
        let cache = cache(dir.path());
        let sig = signature("Cannot find module '@angular/http'");

        assert!(cache.get(&sig, Some("ctx")).is_none());
        cache.set(&sig, Some("ctx"), &result());
        assert_eq!(cache.get(&sig, Some("ctx")), Some(result()));
        assert!(cache.get(&sig, Some("other ctx")).is_none());

        let ignore = fs::read_to_string(cache.dir().join(".gitignore")).unwrap();
        assert_eq!(ignore, "*\n");
    }

    #[test]
    fn test_entry_file_layout() {
        let dir = tempdir().unwrap();
        let cache = cache(dir.path());
        let sig = signature("boom");
        cache.set(&sig, None, &result());

        let path = cache.entry_path(&cache_key(&sig, None));
        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["error"]["message"], "boom");
        assert_eq!(value["error"]["category"], "import");
        assert_eq!(value["error"]["line"], 3);
        assert_eq!(value["result"]["success"], true);
        assert!(value["time"].is_string());
    }

    #[test]
    fn test_stale_entry_is_evicted() {
        let dir = tempdir().unwrap();
        let cache = cache(dir.path());
        let sig = signature("boom");
        cache.set(&sig, None, &result());

        let path = cache.entry_path(&cache_key(&sig, None));
        let mut entry: CacheEntry = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        entry.time = Utc::now() - chrono::Duration::hours(25);
        fs::write(&path, serde_json::to_string(&entry).unwrap()).unwrap();

        assert!(cache.get(&sig, None).is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_disabled_cache_never_touches_disk() {
        let dir = tempdir().unwrap();
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        let cache = ResponseCache::new(dir.path(), &config);
        let sig = signature("boom");
        cache.set(&sig, None, &result());
        assert!(cache.get(&sig, None).is_none());
        assert!(!cache.dir().exists());
    }

    #[test]
    fn test_stats_and_clear() {
        let dir = tempdir().unwrap();
        let cache = cache(dir.path());
        assert_eq!(cache.stats().unwrap(), CacheStats::default());

        cache.set(&signature("one"), None, &result());
        cache.set(&signature("two"), None, &result());
        let stats = cache.stats().unwrap();
        assert_eq!(stats.entries, 2);
        assert!(stats.size > 0);
        assert!(stats.oldest.unwrap() <= stats.newest.unwrap());

        assert_eq!(cache.clear().unwrap(), 2);
        assert_eq!(cache.stats().unwrap().entries, 0);
        assert!(cache.dir().join(".gitignore").exists());
    }
}
