use anyhow::{Context, Result};
use std::path::{Component, Path};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Error returned when an operation is aborted through a [`CancelToken`].
#[derive(Debug, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Cooperative cancellation handle threaded through long-running
/// operations. Checked at natural granularity: per file in the walker
/// and parser phases, per commit in the git log pass, per node in the
/// embedding pass.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns `Err(Cancelled)` once the token has been tripped.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Cancelled.into())
        } else {
            Ok(())
        }
    }
}

pub fn normalize_rel_path(repo_root: &Path, path: &Path) -> Result<String> {
    let rel = path.strip_prefix(repo_root).with_context(|| {
        format!(
            "strip prefix {} from {}",
            repo_root.display(),
            path.display()
        )
    })?;
    Ok(normalize_path(rel))
}

/// Renders a path as a `/`-separated string regardless of platform.
/// Node IDs embed these strings, so they must not vary by separator.
pub fn normalize_path(path: &Path) -> String {
    let mut parts = Vec::new();
    for comp in path.components() {
        match comp {
            Component::Normal(os) => parts.push(os.to_string_lossy().to_string()),
            Component::ParentDir => parts.push("..".to_string()),
            Component::CurDir => {}
            _ => {}
        }
    }
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// Truncates to at most `max_bytes`, backing off to a char boundary.
pub fn truncate_str_bytes(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// Parent directory of a `/`-separated rel path, or `None` at the root.
pub fn parent_dir(rel_path: &str) -> Option<&str> {
    match rel_path.rfind('/') {
        Some(idx) if idx > 0 => Some(&rel_path[..idx]),
        _ => None,
    }
}

/// Final component of a `/`-separated rel path.
pub fn base_name(rel_path: &str) -> &str {
    match rel_path.rfind('/') {
        Some(idx) => &rel_path[idx + 1..],
        None => rel_path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn normalize_strips_current_dir() {
        let path = PathBuf::from("./src/./lib.rs");
        assert_eq!(normalize_path(&path), "src/lib.rs");
    }

    #[test]
    fn truncate_respects_char_boundary() {
        let s = "héllo";
        // 'é' is two bytes; cutting inside it must back off.
        assert_eq!(truncate_str_bytes(s, 2), "h");
        assert_eq!(truncate_str_bytes(s, 10), "héllo");
    }

    #[test]
    fn parent_and_base() {
        assert_eq!(parent_dir("a/b/c.go"), Some("a/b"));
        assert_eq!(parent_dir("c.go"), None);
        assert_eq!(base_name("a/b/c.go"), "c.go");
        assert_eq!(base_name("c.go"), "c.go");
    }

    #[test]
    fn cancel_token_trips_once() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        token.cancel();
        let err = token.check().unwrap_err();
        assert!(err.downcast_ref::<Cancelled>().is_some());
    }
}
