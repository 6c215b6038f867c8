use std::path::{Component, Path};
use std::time::SystemTime;

use tracing::trace;

/// Rejects absolute paths and any path containing a `..` component, per
/// the archive codec's `UnsafePath` rule (spec §4C step 6).
pub fn is_safe_archive_path(path: &Path) -> bool {
    if path.is_absolute() {
        return false;
    }
    path.components().all(|c| match c {
        Component::Normal(_) | Component::CurDir => true,
        Component::ParentDir | Component::RootDir | Component::Prefix(_) => false,
    })
}

/// Sets a file's mtime to "now", for portability with downstream build
/// caches that key off timestamps (spec §4C step 7).
pub fn touch_mtime(path: &Path) -> std::io::Result<()> {
    let now = filetime::FileTime::from_system_time(SystemTime::now());
    trace!(path = %path.display(), "touching mtime");
    filetime::set_file_mtime(path, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn rejects_absolute_paths() {
        assert!(!is_safe_archive_path(&PathBuf::from("/etc/passwd")));
    }

    #[test]
    fn rejects_parent_escape() {
        assert!(!is_safe_archive_path(&PathBuf::from("../../etc/passwd")));
        assert!(!is_safe_archive_path(&PathBuf::from("lib/../../etc/passwd")));
    }

    #[test]
    fn accepts_relative_paths() {
        assert!(is_safe_archive_path(&PathBuf::from("mix.exs")));
        assert!(is_safe_archive_path(&PathBuf::from("lib/foo.ex")));
        assert!(is_safe_archive_path(&PathBuf::from("./lib/foo.ex")));
    }
}
