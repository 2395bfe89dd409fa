use crate::util::{normalize_rel_path, CancelToken};
use anyhow::{bail, Context, Result};
use blake3::Hasher;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::WalkBuilder;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// A source file selected for ingestion.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub abs_path: PathBuf,
    pub rel_path: String,
    pub language: String,
    pub content: Vec<u8>,
    pub content_hash: String,
}

#[derive(Debug, Clone)]
struct LanguageSpec {
    name: &'static str,
    extensions: &'static [&'static str],
}

static LANGUAGE_SPECS: &[LanguageSpec] = &[
    LanguageSpec {
        name: "python",
        extensions: &["py"],
    },
    LanguageSpec {
        name: "typescript",
        extensions: &["ts", "tsx"],
    },
    LanguageSpec {
        name: "javascript",
        extensions: &["js", "jsx", "mjs", "cjs"],
    },
    LanguageSpec {
        name: "go",
        extensions: &["go"],
    },
];

/// Directory names skipped regardless of ignore patterns: VCS state,
/// dependency caches, build and coverage output, and the index dir.
static ALWAYS_IGNORED: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".axon",
    "node_modules",
    "__pycache__",
    ".venv",
    "venv",
    ".tox",
    ".eggs",
    ".pytest_cache",
    ".mypy_cache",
    "coverage",
    "htmlcov",
    "dist",
    "build",
];

/// Walks `repo_root` and returns every supported source file, honouring
/// .gitignore plus `ignore_patterns` (gitignore syntax). Directories
/// matched by the ignore rules are pruned without being descended.
/// Files with unknown extensions are dropped; per-file read failures
/// are skipped with a warning. Fails only if the root itself is
/// inaccessible.
pub fn walk_repo(
    repo_root: &Path,
    ignore_patterns: &[String],
    cancel: &CancelToken,
) -> Result<Vec<FileEntry>> {
    if !repo_root.is_dir() {
        bail!("not a directory: {}", repo_root.display());
    }

    let extra_ignores = build_matcher(repo_root, ignore_patterns)?;

    let walker = WalkBuilder::new(repo_root)
        .hidden(false)
        .ignore(true)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(true)
        .parents(false)
        .require_git(false)
        .filter_entry(move |entry| {
            if is_always_ignored(entry.file_name()) {
                return false;
            }
            let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
            !extra_ignores
                .matched_path_or_any_parents(entry.path(), is_dir)
                .is_ignore()
        })
        .build();

    let mut entries = Vec::new();
    for entry in walker {
        cancel.check()?;
        let entry = match entry {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "walk error");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let path = entry.path();
        let Some(language) = detect_language(path) else {
            continue;
        };
        let Ok(rel_path) = normalize_rel_path(repo_root, path) else {
            continue;
        };
        let content = match fs::read(path) {
            Ok(content) => content,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable file");
                continue;
            }
        };
        let mut hasher = Hasher::new();
        hasher.update(&content);
        let content_hash = hasher.finalize().to_hex().to_string();
        entries.push(FileEntry {
            abs_path: path.to_path_buf(),
            rel_path,
            language: language.to_string(),
            content,
            content_hash,
        });
    }

    entries.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(entries)
}

fn build_matcher(repo_root: &Path, patterns: &[String]) -> Result<Gitignore> {
    let mut builder = GitignoreBuilder::new(repo_root);
    for pattern in patterns {
        builder
            .add_line(None, pattern)
            .with_context(|| format!("bad ignore pattern: {pattern}"))?;
    }
    Ok(builder.build()?)
}

fn is_always_ignored(name: &OsStr) -> bool {
    ALWAYS_IGNORED.iter().any(|dir| name == OsStr::new(dir))
}

pub fn detect_language(path: &Path) -> Option<&'static str> {
    let ext = path.extension().and_then(|ext| ext.to_str())?;
    LANGUAGE_SPECS
        .iter()
        .find(|spec| spec.extensions.contains(&ext))
        .map(|spec| spec.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn walks_supported_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.go", "package b");
        write(dir.path(), "a.py", "x = 1");
        write(dir.path(), "sub/c.ts", "const c = 1;");
        write(dir.path(), "README.md", "# nope");

        let entries = walk_repo(dir.path(), &[], &CancelToken::new()).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["a.py", "b.go", "sub/c.ts"]);
        assert_eq!(entries[0].language, "python");
        assert_eq!(entries[1].language, "go");
        assert!(!entries[0].content_hash.is_empty());
    }

    #[test]
    fn always_ignored_dirs_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "keep.go", "package keep");
        write(dir.path(), "node_modules/lib/x.js", "x");
        write(dir.path(), ".axon/cache.go", "package cache");
        write(dir.path(), "__pycache__/m.py", "x = 1");

        let entries = walk_repo(dir.path(), &[], &CancelToken::new()).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["keep.go"]);
    }

    #[test]
    fn custom_ignore_patterns_prune_dirs() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "keep.go", "package keep");
        write(dir.path(), "generated/gen.go", "package gen");
        write(dir.path(), "vendor.py", "x = 1");

        let entries = walk_repo(
            dir.path(),
            &["generated/".to_string(), "vendor.py".to_string()],
            &CancelToken::new(),
        )
        .unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["keep.go"]);
    }

    #[test]
    fn unknown_extensions_dropped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "notes.txt", "hello");
        write(dir.path(), "Makefile", "all:");
        let entries = walk_repo(dir.path(), &[], &CancelToken::new()).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(walk_repo(&missing, &[], &CancelToken::new()).is_err());
    }

    #[test]
    fn cancellation_aborts_walk() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.go", "package a");
        let token = CancelToken::new();
        token.cancel();
        let err = walk_repo(dir.path(), &[], &token).unwrap_err();
        assert!(err.downcast_ref::<crate::util::Cancelled>().is_some());
    }
}
