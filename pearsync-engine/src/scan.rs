//! Local directory scanning

use crate::ignore::IgnoreList;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

/// A file found under the workspace root.
#[derive(Debug, Clone)]
pub struct LocalFile {
    /// Workspace-relative path with `/` separators.
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub size: u64,
    pub mtime_ms: u64,
    pub mode: u32,
}

fn rel_path_of(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

fn mode_of(metadata: &std::fs::Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode()
    }
    #[cfg(not(unix))]
    {
        let _ = metadata;
        0o644
    }
}

pub(crate) fn mtime_ms_of(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Walk the workspace root, pruning ignored directories, and collect
/// every non-ignored file's metadata. Symlinks are not followed.
pub fn scan_dir(root: &Path, ignore: &IgnoreList) -> std::io::Result<Vec<LocalFile>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let Some(rel) = rel_path_of(root, entry.path()) else {
                return false;
            };
            if entry.file_type().is_dir() {
                !ignore.is_ignored_dir(&rel)
            } else {
                !ignore.is_ignored(&rel)
            }
        });

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "walk error, skipping entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(rel_path) = rel_path_of(root, entry.path()) else {
            continue;
        };
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(path = %rel_path, error = %e, "stat failed, skipping");
                continue;
            }
        };
        files.push(LocalFile {
            rel_path,
            abs_path: entry.path().to_path_buf(),
            size: metadata.len(),
            mtime_ms: mtime_ms_of(&metadata),
            mode: mode_of(&metadata),
        });
    }

    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(files)
}

/// Reject manifest paths that could escape the workspace root.
pub(crate) fn is_safe_rel_path(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') || path.contains('\\') {
        return false;
    }
    path.split('/')
        .all(|component| !component.is_empty() && component != "." && component != "..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_files_and_prunes_ignored_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("src")).unwrap();
        std::fs::create_dir_all(tmp.path().join("node_modules/dep")).unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"a").unwrap();
        std::fs::write(tmp.path().join("src/lib.rs"), b"fn x() {}").unwrap();
        std::fs::write(tmp.path().join("node_modules/dep/index.js"), b"x").unwrap();

        let files = scan_dir(tmp.path(), &IgnoreList::defaults()).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "src/lib.rs"]);
        assert_eq!(files[0].size, 1);
        assert!(files[0].mtime_ms > 0);
    }

    #[test]
    fn safe_path_check() {
        assert!(is_safe_rel_path("a/b/c.txt"));
        assert!(is_safe_rel_path("file"));
        assert!(!is_safe_rel_path("/abs"));
        assert!(!is_safe_rel_path("../escape"));
        assert!(!is_safe_rel_path("a/../b"));
        assert!(!is_safe_rel_path("a//b"));
        assert!(!is_safe_rel_path(""));
        assert!(!is_safe_rel_path("a\\b"));
    }
}
