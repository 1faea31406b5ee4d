//! Per-process path resolution.
//!
//! `resolve(root, chroot, cwd, path)` produces the host path a process may
//! touch: relative paths are anchored at the cwd, cleaned lexically, then
//! jailed under `<root> ∥ <chroot>`. A path that already lies inside the
//! jail is returned unchanged, which makes resolution idempotent.

use std::path::{Component, Path, PathBuf};

/// Lexical cleaning: resolve `.` and `..` without touching the filesystem.
/// `..` at the root stays at the root.
pub fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    // Above the root: discard.
                }
            }
            other => out.push(other),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

fn strip_leading_root(p: &Path) -> &Path {
    p.strip_prefix("/").unwrap_or(p)
}

/// Resolve a process-visible path to a host path.
pub fn resolve(root: &Path, chroot: &Path, cwd: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        cwd.join(p)
    };
    let cleaned = clean(&abs);

    let jail = clean(&root.join(strip_leading_root(chroot)));
    if cleaned.starts_with(&jail) {
        return cleaned;
    }
    clean(&jail.join(strip_leading_root(&cleaned)))
}
