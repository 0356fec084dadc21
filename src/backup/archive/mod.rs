pub mod exclusion;
pub mod walkdir_globset;

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use dyn_iter::DynIter;
use itertools::Itertools;
use std::path::{Component, Path};
use std::sync::Arc;

/// A single file selected for the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Where the file is read from.
    pub src: Arc<Path>,

    /// Path relative to the source directory, always with `/` separators.
    ///
    /// Used both for exclusion matching and as the member name inside the archive.
    pub dst: Arc<str>,
}

impl ArchiveEntry {
    pub fn new<A: Into<Arc<Path>>, B: Into<Arc<str>>>(src: A, dst: B) -> ArchiveEntry {
        Self {
            src: src.into(),
            dst: dst.into(),
        }
    }

    /// Builds the entry for `src` found under `base_dir`.
    pub fn from_base<P1: AsRef<Path>, P2: AsRef<Path>>(src: P1, base_dir: P2) -> Result<ArchiveEntry> {
        let relative = src.as_ref().strip_prefix(base_dir.as_ref())?;
        Ok(Self::new(src.as_ref(), to_posix(relative)?))
    }
}

/// Joins the normal components of a relative path with `/`.
pub fn to_posix<P: AsRef<Path>>(relative: P) -> Result<String> {
    relative
        .as_ref()
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_str().map(str::to_owned).ok_or_else(|| {
                Error::from(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Path is not valid UTF-8: {:?}", relative.as_ref()),
                ))
            })),
            _ => None,
        })
        .collect::<Result<Vec<_>>>()
        .map(|parts| parts.into_iter().join("/"))
}

/// Anything that can list the files going into an archive.
///
/// Items are `Err` for entries that could not be inspected; callers record
/// those and keep going.
pub trait ArchiveEntryIterable {
    fn archive_entry_iterator<'a>(&self) -> Result<DynIter<'a, Result<ArchiveEntry>>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_archive_entry_from_base() {
        let entry = ArchiveEntry::from_base("/source/sub/file.txt", "/source").unwrap();
        assert_eq!(entry.src.as_ref(), Path::new("/source/sub/file.txt"));
        assert_eq!(entry.dst.as_ref(), "sub/file.txt");
    }

    #[test]
    fn test_archive_entry_outside_base_is_error() {
        assert!(ArchiveEntry::from_base("/elsewhere/file.txt", "/source").is_err());
    }

    #[test]
    fn test_to_posix() {
        let relative: PathBuf = ["a", "b", "c.txt"].iter().collect();
        assert_eq!(to_posix(&relative).unwrap(), "a/b/c.txt");
        assert_eq!(to_posix("./a/b").unwrap(), "a/b");
    }
}
