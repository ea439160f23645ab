//! Source tree scanner.
//!
//! Walks a directory, prunes hidden and dependency/build directories before
//! descending into them, and keeps files whose extension is allow-listed
//! and whose size is within bounds. Rejected files are skipped, never
//! reported as errors.

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::config::ScannerConfig;
use crate::error::{CoreError, Result};
use crate::models::{FileEntry, SourceFile};

pub fn scan(root: &Path, recursive: bool, config: &ScannerConfig) -> Result<Vec<FileEntry>> {
    if !root.exists() {
        return Err(CoreError::NotFound(format!(
            "directory does not exist: {}",
            root.display()
        )));
    }
    if !root.is_dir() {
        return Err(CoreError::InvalidArgument(format!(
            "not a directory: {}",
            root.display()
        )));
    }
    let root = std::path::absolute(root)?;

    let exclude_set = build_globset(&config.exclude_globs)?;
    let allowed: HashSet<String> = config
        .extensions
        .iter()
        .map(|e| normalize_extension(e))
        .collect();

    let walker = WalkDir::new(&root)
        .follow_links(config.follow_symlinks)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .into_iter()
        // Pruning here keeps walkdir from ever reading these directories.
        .filter_entry(|e| e.depth() == 0 || !is_pruned_dir(e, config));

    let mut files = Vec::new();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(&root).unwrap_or(path);
        if exclude_set.is_match(relative) {
            debug!(path = %path.display(), "excluded by glob");
            continue;
        }

        let extension = path
            .extension()
            .map(|e| normalize_extension(&e.to_string_lossy()))
            .unwrap_or_default();
        if !allowed.contains(&extension) {
            debug!(path = %path.display(), "unsupported file extension");
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "stat failed");
                continue;
            }
        };
        if metadata.len() > config.max_file_size {
            debug!(
                path = %path.display(),
                size = metadata.len(),
                max = config.max_file_size,
                "file too large"
            );
            continue;
        }

        let modified_at: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_default();

        files.push(FileEntry {
            path: path.to_path_buf(),
            size: metadata.len(),
            extension,
            modified_at,
        });
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.path.cmp(&b.path));

    debug!(root = %root.display(), count = files.len(), "scan complete");
    Ok(files)
}

/// Read, hash, and decode one scanned file.
///
/// Returns `Encoding` for content that is not UTF-8 text.
pub fn read_source(entry: &FileEntry) -> Result<SourceFile> {
    let bytes = std::fs::read(&entry.path)?;
    let content_hash = hash_bytes(&bytes);
    let content = decode_text(&bytes)
        .ok_or_else(|| CoreError::Encoding(format!("{} is not UTF-8 text", entry.path.display())))?;

    Ok(SourceFile {
        path: entry.path.clone(),
        size: bytes.len() as u64,
        extension: entry.extension.clone(),
        modified_at: entry.modified_at,
        content_hash,
        content,
    })
}

/// SHA-256 of raw bytes as lower-case hex.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// UTF-8 decode, treating embedded NUL bytes as binary.
pub fn decode_text(bytes: &[u8]) -> Option<String> {
    if bytes.contains(&0) {
        return None;
    }
    String::from_utf8(bytes.to_vec()).ok()
}

fn is_pruned_dir(entry: &DirEntry, config: &ScannerConfig) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    (!config.hidden_prefix.is_empty() && name.starts_with(&config.hidden_prefix))
        || config.skip_dirs.iter().any(|d| d == name.as_ref())
}

pub(crate) fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.is_empty() || ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            CoreError::InvalidArgument(format!("bad exclude glob '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| CoreError::InvalidArgument(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("b.py"), "def b():\n    pass\n").unwrap();
        fs::write(root.join("a.rs"), "fn a() {}\n").unwrap();
        fs::write(root.join("notes.docx"), "binary-ish").unwrap();
        fs::write(root.join("README"), "no extension").unwrap();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("sub/c.PY"), "print('c')\n").unwrap();
        fs::create_dir_all(root.join(".hidden")).unwrap();
        fs::write(root.join(".hidden/secret.py"), "x = 1\n").unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("node_modules/pkg/index.js"), "module.exports = 1;\n").unwrap();
        tmp
    }

    fn names(files: &[FileEntry], root: &Path) -> Vec<String> {
        let root = std::path::absolute(root).unwrap();
        files
            .iter()
            .map(|f| f.path.strip_prefix(&root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn test_recursive_scan_prunes_and_filters() {
        let tmp = fixture();
        let files = scan(tmp.path(), true, &ScannerConfig::default()).unwrap();
        assert_eq!(names(&files, tmp.path()), vec!["a.rs", "b.py", "sub/c.PY"]);
        assert_eq!(files[2].extension, ".py");
        assert!(files.iter().all(|f| f.path.is_absolute()));
    }

    #[test]
    fn test_non_recursive_scan_stays_at_top_level() {
        let tmp = fixture();
        let files = scan(tmp.path(), false, &ScannerConfig::default()).unwrap();
        assert_eq!(names(&files, tmp.path()), vec!["a.rs", "b.py"]);
    }

    #[test]
    fn test_size_limit_skips_large_files() {
        let tmp = fixture();
        fs::write(tmp.path().join("big.txt"), "x".repeat(2048)).unwrap();
        let config = ScannerConfig {
            max_file_size: 1024,
            ..ScannerConfig::default()
        };
        let files = scan(tmp.path(), true, &config).unwrap();
        assert!(!names(&files, tmp.path()).contains(&"big.txt".to_string()));
    }

    #[test]
    fn test_exclude_globs() {
        let tmp = fixture();
        let config = ScannerConfig {
            exclude_globs: vec!["sub/**".to_string()],
            ..ScannerConfig::default()
        };
        let files = scan(tmp.path(), true, &config).unwrap();
        assert_eq!(names(&files, tmp.path()), vec!["a.rs", "b.py"]);
    }

    #[test]
    fn test_missing_root_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = scan(&tmp.path().join("nope"), true, &ScannerConfig::default()).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn test_read_source_hashes_raw_bytes() {
        let tmp = fixture();
        let files = scan(tmp.path(), false, &ScannerConfig::default()).unwrap();
        let source = read_source(&files[0]).unwrap();
        assert_eq!(source.content, "fn a() {}\n");
        assert_eq!(source.content_hash, hash_bytes(b"fn a() {}\n"));
        assert_eq!(source.file_name(), "a.rs");
    }

    #[test]
    fn test_read_source_rejects_binary() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("blob.txt"), [0x66u8, 0x00, 0xff, 0xfe]).unwrap();
        let files = scan(tmp.path(), false, &ScannerConfig::default()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(matches!(read_source(&files[0]), Err(CoreError::Encoding(_))));
    }
}
