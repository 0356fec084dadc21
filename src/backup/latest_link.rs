use crate::backup::naming::NAME_SEPARATOR;
use std::path::{Path, PathBuf};

/// Path of the link that always points at a project's newest archive.
pub fn latest_link_path<P: AsRef<Path>>(dest_dir: P, project: &str) -> PathBuf {
    dest_dir.as_ref().join(format!("{project}{NAME_SEPARATOR}latest"))
}

/// Points `<project>_latest` in `dest_dir` at `archive_path`, replacing an older link.
///
/// The link target is the bare file name so the directory can be moved. Many
/// synced or FAT filesystems refuse symlinks; that is logged and ignored.
pub fn link_latest<P1: AsRef<Path>, P2: AsRef<Path>>(dest_dir: P1, archive_path: P2, project: &str) -> Option<PathBuf> {
    let link = latest_link_path(dest_dir, project);
    let Some(target) = archive_path.as_ref().file_name() else {
        tracing::debug!("Archive path {:?} has no file name, not linking", archive_path.as_ref());
        return None;
    };

    if std::fs::symlink_metadata(&link).is_ok() {
        if let Err(e) = std::fs::remove_file(&link) {
            tracing::debug!("Could not remove previous link {:?}: {}", link, e);
            return None;
        }
    }

    match symlink(target, &link) {
        Ok(()) => {
            tracing::info!("Updated {:?} -> {:?}", link, target);
            Some(link)
        }
        Err(e) => {
            tracing::debug!("Could not create link {:?} (fine on filesystems without symlinks): {}", link, e);
            None
        }
    }
}

#[cfg(unix)]
fn symlink(target: &std::ffi::OsStr, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(_target: &std::ffi::OsStr, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symlinks are only created on unix",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_latest_link_path() {
        assert_eq!(
            latest_link_path("/backups", "foo"),
            PathBuf::from("/backups/foo_latest")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_link_is_replaced() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("foo_20250101-1200.zip");
        let second = dir.path().join("foo_20250102-1200.zip");
        std::fs::write(&first, "1").unwrap();
        std::fs::write(&second, "2").unwrap();

        let link = link_latest(dir.path(), &first, "foo").unwrap();
        assert_eq!(std::fs::read_link(&link).unwrap(), PathBuf::from("foo_20250101-1200.zip"));

        link_latest(dir.path(), &second, "foo").unwrap();
        assert_eq!(std::fs::read_link(&link).unwrap(), PathBuf::from("foo_20250102-1200.zip"));
        assert_eq!(std::fs::read_to_string(&link).unwrap(), "2");
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_link_is_replaced() {
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink("gone.zip", dir.path().join("foo_latest")).unwrap();
        let archive = dir.path().join("foo_20250101-1200.zip");
        std::fs::write(&archive, "1").unwrap();

        assert!(link_latest(dir.path(), &archive, "foo").is_some());
    }

    #[test]
    fn test_missing_directory_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");
        assert!(link_latest(&missing, missing.join("foo_x.zip"), "foo").is_none());
    }
}
