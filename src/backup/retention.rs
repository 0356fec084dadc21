use crate::backup::format::ArchiveFormat;
use crate::backup::naming::project_prefix;
use crate::backup::pack::failure_log_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::AddMsg;
use chrono::{DateTime, Local, TimeZone};
use getset::Getters;
use itertools::Itertools;
use std::cmp::Reverse;
use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};

#[derive(Clone, Hash, Eq, PartialEq)]
pub struct ItemWithDateTime<R, T: TimeZone> {
    pub item: R,
    pub date_time: DateTime<T>,
}

impl<R, T: TimeZone> From<(R, DateTime<T>)> for ItemWithDateTime<R, T> {
    fn from(value: (R, DateTime<T>)) -> Self {
        Self {
            item: value.0,
            date_time: value.1,
        }
    }
}

impl<R: Debug, T: TimeZone> Debug for ItemWithDateTime<R, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} @ {:?}", self.item, self.date_time)
    }
}

/// Splits items into (kept, deleted): the `keep` newest survive.
///
/// Ties on time are broken by the item itself, newest-looking name first, so
/// the split does not depend on directory listing order. `keep <= 0` keeps
/// everything.
pub fn get_delete<R, T, I>(iter: I, keep: i64) -> (Vec<ItemWithDateTime<R, T>>, Vec<ItemWithDateTime<R, T>>)
where
    R: Ord,
    T: TimeZone,
    I: IntoIterator<Item = ItemWithDateTime<R, T>>,
{
    let sorted = iter
        .into_iter()
        .sorted_unstable_by(|a, b| {
            Reverse(&a.date_time)
                .cmp(&Reverse(&b.date_time))
                .then_with(|| Reverse(&a.item).cmp(&Reverse(&b.item)))
        })
        .collect_vec();

    let Ok(keep) = usize::try_from(keep) else {
        return (sorted, vec![]);
    };
    if keep == 0 {
        return (sorted, vec![]);
    }

    let mut kept = sorted;
    let deleted = if kept.len() > keep { kept.split_off(keep) } else { vec![] };
    (kept, deleted)
}

/// Regular files in `dir` named `<project>_...` with an archive extension.
///
/// Symlinks (such as the latest-archive link) and sidecar logs are not
/// candidates. A missing directory has no candidates.
pub fn find_candidates<P: AsRef<Path>>(dir: P, project: &str) -> Result<Vec<ItemWithDateTime<PathBuf, Local>>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Ok(vec![]);
    }

    let prefix = project_prefix(project);
    let read_dir = std::fs::read_dir(dir)
        .map_err(Error::from)
        .add_msg(format!("Listing {dir:?} for retention failed"))?;

    let candidates = read_dir
        .filter_map(|res| match res {
            Ok(de) => Some(de),
            Err(e) => {
                tracing::warn!("Skipping unreadable entry in {:?}: {}", dir, e);
                None
            }
        })
        .filter(|de| {
            de.file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(&prefix) && ArchiveFormat::from_path(name).is_some())
        })
        .filter_map(|de| {
            let path = de.path();
            match std::fs::symlink_metadata(&path).and_then(|md| {
                if md.file_type().is_file() {
                    md.modified().map(Some)
                } else {
                    Ok(None)
                }
            }) {
                Ok(Some(modified)) => Some(ItemWithDateTime::from((path, DateTime::<Local>::from(modified)))),
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!("Cannot read modification time of {:?}, leaving it alone: {}", path, e);
                    None
                }
            }
        })
        .collect_vec();

    Ok(candidates)
}

#[derive(Debug, Default, Getters)]
#[getset(get = "pub")]
pub struct RetentionReport {
    kept: Vec<PathBuf>,
    deleted: Vec<PathBuf>,
    failed: Vec<PathBuf>,
    /// Why the `failed` deletions failed; the rest of the batch still ran.
    non_fatal_error: Option<Error>,
}

/// What retention would delete, without touching anything.
pub fn plan_retention<P: AsRef<Path>>(dir: P, project: &str, keep: i64) -> Result<RetentionReport> {
    if keep <= 0 {
        return Ok(RetentionReport::default());
    }
    let (kept, deleted) = get_delete(find_candidates(dir, project)?, keep);
    Ok(RetentionReport {
        kept: kept.into_iter().map(|i| i.item).collect(),
        deleted: deleted.into_iter().map(|i| i.item).collect(),
        failed: vec![],
        non_fatal_error: None,
    })
}

/// Deletes all but the `keep` most recently modified archives of `project` in `dir`.
///
/// Each archive's sidecar failure log goes with it. A failed deletion is
/// logged and reported, and the remaining candidates are still processed.
pub fn apply_retention<P: AsRef<Path>>(dir: P, project: &str, keep: i64) -> Result<RetentionReport> {
    apply_retention_with(dir, project, keep, |path| std::fs::remove_file(path))
}

/// [`apply_retention`] with the archive deletion supplied by the caller.
pub fn apply_retention_with<P, F>(dir: P, project: &str, keep: i64, mut remove: F) -> Result<RetentionReport>
where
    P: AsRef<Path>,
    F: FnMut(&Path) -> std::io::Result<()>,
{
    let plan = plan_retention(dir, project, keep)?;
    let mut errors = vec![];
    let mut deleted = vec![];
    let mut failed = vec![];

    for path in plan.deleted {
        tracing::info!("Removing out of retention file {:?}", path);
        match remove(&path) {
            Ok(()) => {
                remove_sidecar(&path);
                deleted.push(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => deleted.push(path),
            Err(e) => {
                let e = Error::from(e).add_msg(format!("Removing {path:?} failed"));
                tracing::warn!("{}", e);
                errors.push(e);
                failed.push(path);
            }
        }
    }

    Ok(RetentionReport {
        kept: plan.kept,
        deleted,
        failed,
        non_fatal_error: convert_error_vec(errors).err(),
    })
}

fn remove_sidecar(archive: &Path) {
    let sidecar = failure_log_path(archive);
    match std::fs::remove_file(&sidecar) {
        Ok(()) => tracing::debug!("Removed failure log {:?}", sidecar),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Removing failure log {:?} failed: {}", sidecar, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::fs::File;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str, age_minutes: u64) -> PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_minutes * 60))
            .unwrap();
        path
    }

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    fn remaining(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|de| de.unwrap().file_name().to_string_lossy().into_owned())
            .sorted()
            .collect()
    }

    #[test]
    fn test_get_delete_keeps_newest() {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let items = (0..5)
            .map(|i| ItemWithDateTime::from((i, base + chrono::Duration::hours(i))))
            .collect_vec();

        let (kept, deleted) = get_delete(items.clone(), 2);
        assert_eq!(kept.iter().map(|i| i.item).collect_vec(), vec![4, 3]);
        assert_eq!(deleted.iter().map(|i| i.item).collect_vec(), vec![2, 1, 0]);

        let (kept, deleted) = get_delete(items.clone(), 10);
        assert_eq!(kept.len(), 5);
        assert!(deleted.is_empty());

        for keep in [0, -1] {
            let (kept, deleted) = get_delete(items.clone(), keep);
            assert_eq!(kept.len(), 5);
            assert!(deleted.is_empty());
        }
    }

    #[test]
    fn test_get_delete_tie_break_is_stable() {
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let items = vec![
            ItemWithDateTime::from(("b", t)),
            ItemWithDateTime::from(("c", t)),
            ItemWithDateTime::from(("a", t)),
        ];
        let (kept, _) = get_delete(items, 1);
        assert_eq!(kept[0].item, "c");
    }

    #[test]
    fn test_keeps_two_newest_of_five() {
        let dir = TempDir::new().unwrap();
        for (i, age) in [50, 40, 30, 20, 10].iter().enumerate() {
            touch(dir.path(), &format!("foo_2025010{}-1200.zip", i + 1), *age);
        }

        let report = apply_retention(dir.path(), "foo", 2).unwrap();
        assert_eq!(names(report.kept()), vec!["foo_20250105-1200.zip", "foo_20250104-1200.zip"]);
        assert_eq!(report.deleted().len(), 3);
        assert!(report.non_fatal_error().is_none());
        assert_eq!(remaining(dir.path()), vec!["foo_20250104-1200.zip", "foo_20250105-1200.zip"]);
    }

    #[test]
    fn test_failed_deletion_does_not_stop_the_batch() {
        let dir = TempDir::new().unwrap();
        for age in 1..=5 {
            touch(dir.path(), &format!("foo_2025010{}-1200.zip", 6 - age), age);
        }
        touch(dir.path(), "foo_20250103-1200.zip.errors.log", 1);

        let mut attempts = vec![];
        let report = apply_retention_with(dir.path(), "foo", 2, |path| {
            attempts.push(path.to_path_buf());
            if attempts.len() == 1 {
                Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"))
            } else {
                std::fs::remove_file(path)
            }
        })
        .unwrap();

        assert_eq!(attempts.len(), 3);
        assert_eq!(names(report.failed()), vec!["foo_20250103-1200.zip"]);
        assert_eq!(names(report.deleted()), vec!["foo_20250102-1200.zip", "foo_20250101-1200.zip"]);
        let error = report.non_fatal_error().as_ref().unwrap();
        assert!(error.to_string().contains("read-only"), "{error}");
        match error {
            Error::LotsOfError(errors) => assert_eq!(errors.len(), 1),
            _ => panic!("Expected LotsOfError"),
        }
        assert_eq!(
            remaining(dir.path()),
            vec![
                "foo_20250103-1200.zip",
                "foo_20250103-1200.zip.errors.log",
                "foo_20250104-1200.zip",
                "foo_20250105-1200.zip",
            ]
        );
    }

    #[test]
    fn test_retention_is_idempotent() {
        let dir = TempDir::new().unwrap();
        for age in 1..=4 {
            touch(dir.path(), &format!("foo_v1_2025010{age}-1200.tar.gz"), age);
        }

        assert_eq!(apply_retention(dir.path(), "foo", 3).unwrap().deleted().len(), 1);
        let second = apply_retention(dir.path(), "foo", 3).unwrap();
        assert!(second.deleted().is_empty());
        assert_eq!(second.kept().len(), 3);
    }

    #[test]
    fn test_only_project_archives_are_candidates() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "foo_20250101-1200.zip", 30);
        touch(dir.path(), "foo_20250101-1200.zip.errors.log", 30);
        touch(dir.path(), "foo_notes.txt", 40);
        touch(dir.path(), "foobar_20250101-1200.zip", 50);
        touch(dir.path(), "bar_20250101-1200.zip", 60);
        touch(dir.path(), "foo_20250102-1200.tgz", 10);
        std::fs::create_dir(dir.path().join("foo_dir.zip")).unwrap();

        let candidates = find_candidates(dir.path(), "foo").unwrap();
        let found = candidates.into_iter().map(|c| c.item).collect_vec();
        assert_eq!(names(&found).into_iter().sorted().collect_vec(), vec!["foo_20250101-1200.zip", "foo_20250102-1200.tgz"]);

        apply_retention(dir.path(), "foo", 1).unwrap();
        assert_eq!(
            remaining(dir.path()),
            vec![
                "bar_20250101-1200.zip",
                "foo_20250102-1200.tgz",
                "foo_dir.zip",
                "foo_notes.txt",
                "foobar_20250101-1200.zip",
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_latest_symlink_is_not_a_candidate() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "foo_20250101-1200.zip", 10);
        std::os::unix::fs::symlink("foo_20250101-1200.zip", dir.path().join("foo_latest.zip")).unwrap();

        assert_eq!(find_candidates(dir.path(), "foo").unwrap().len(), 1);
    }

    #[test]
    fn test_non_positive_keep_is_noop() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "foo_20250101-1200.zip", 10);
        touch(dir.path(), "foo_20250102-1200.zip", 5);

        for keep in [0, -3] {
            let report = apply_retention(dir.path(), "foo", keep).unwrap();
            assert!(report.deleted().is_empty());
        }
        assert_eq!(remaining(dir.path()).len(), 2);
    }

    #[test]
    fn test_plan_does_not_delete() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "foo_20250101-1200.zip", 10);
        touch(dir.path(), "foo_20250102-1200.zip", 5);

        let plan = plan_retention(dir.path(), "foo", 1).unwrap();
        assert_eq!(names(plan.deleted()), vec!["foo_20250101-1200.zip"]);
        assert_eq!(remaining(dir.path()).len(), 2);
    }

    #[test]
    fn test_missing_directory_has_no_candidates() {
        let dir = TempDir::new().unwrap();
        let report = apply_retention(dir.path().join("missing"), "foo", 1).unwrap();
        assert!(report.kept().is_empty());
        assert!(report.deleted().is_empty());
    }
}
