use crate::backup::archive::exclusion::{ExcludeGlob, ExclusionRules, IGNORE_FILE_NAME};
use crate::backup::archive::walkdir_globset::WalkdirSource;
use crate::backup::archive::ArchiveEntryIterable;
use crate::backup::format::ArchiveFormat;
use crate::backup::function_path;
use crate::backup::latest_link::link_latest;
use crate::backup::naming::ArchiveDescriptor;
use crate::backup::pack::{build_archive, write_failure_log, PackReport};
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::retention::{apply_retention, plan_retention, RetentionReport};
use crate::backup::upload::{Upload, UploadConfig};
use crate::backup::validate::validate_valid_archive_name_part;
use crate::backup::verify::{verify_archive, Verification};
use bon::Builder;
use chrono::{DateTime, TimeZone};
use function_name::named;
use getset::Getters;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use validator::Validate;

fn default_true() -> bool {
    true
}

/// Everything one backup run needs, from the command line or a YAML file.
#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct BackupConfig {
    #[builder(into)]
    source: PathBuf,
    #[builder(into)]
    destination: PathBuf,
    #[validate(custom(function = validate_valid_archive_name_part))]
    #[builder(into)]
    project: String,
    #[validate(custom(function = validate_valid_archive_name_part))]
    #[builder(into)]
    version: Option<String>,
    #[validate(custom(function = validate_valid_archive_name_part))]
    #[builder(into)]
    tag: Option<String>,
    #[serde(default)]
    #[builder(default)]
    format: ArchiveFormat,
    /// Added to the built-in rules and the source's ignore file.
    #[serde(default)]
    #[builder(default)]
    exclude: Vec<ExcludeGlob>,
    #[serde(default)]
    #[builder(default)]
    include_hidden: bool,
    /// Archives of this project to keep, `0` or less disables retention.
    #[serde(default)]
    #[builder(default)]
    keep: i64,
    #[serde(default)]
    #[builder(default)]
    dry_run: bool,
    #[serde(default = "default_true")]
    #[builder(default = true)]
    verify: bool,
    #[serde(default = "default_true")]
    #[builder(default = true)]
    latest_link: bool,
    #[validate(nested)]
    upload: Option<UploadConfig>,
}

/// What a finished run produced.
#[derive(Debug, Getters)]
#[getset(get = "pub")]
pub struct RunReport {
    pack: PackReport,
    failure_log: Option<PathBuf>,
    verification: Option<Verification>,
    latest_link: Option<PathBuf>,
    retention: Option<RetentionReport>,
    remote_path: Option<String>,
}

/// The user's home directory.
pub fn home_dir() -> Result<PathBuf> {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .ok_or(Error::NoHomeDir)
}

/// Expands `~` and anchors relative paths at `home`.
pub fn resolve_against<P: AsRef<Path>>(path: P, home: &Path) -> PathBuf {
    let path = path.as_ref();
    if let Ok(rest) = path.strip_prefix("~") {
        return home.join(rest);
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        home.join(path)
    }
}

/// Like [`resolve_against`], only looking up the home directory when it is needed.
pub fn resolve_from_home<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
    let path = path.as_ref();
    if path.is_absolute() && !path.starts_with("~") {
        return Ok(path.to_path_buf());
    }
    Ok(resolve_against(path, &home_dir()?))
}

/// The source directory's final component, used when no project name is given.
pub fn default_project_name<P: AsRef<Path>>(source: P) -> String {
    source
        .as_ref()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl BackupConfig {
    /// Anchors `source` and `destination` at the home directory.
    pub fn resolve_paths(mut self) -> Result<Self> {
        self.source = resolve_from_home(&self.source)?;
        self.destination = resolve_from_home(&self.destination)?;
        Ok(self)
    }

    /// Turns dry run on without ever turning it off.
    pub fn force_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run |= dry_run;
        self
    }

    /// Supplies an upload credential where the config has none.
    pub fn with_fallback_token(mut self, token: Option<RedactedString>) -> Self {
        self.upload = self.upload.map(|upload| match upload {
            UploadConfig::Dropbox(dropbox) => UploadConfig::Dropbox(dropbox.or_token(token)),
        });
        self
    }

    fn log_summary(&self) {
        info!("Project:     {}", self.project);
        info!("Source:      {:?}", self.source);
        info!("Destination: {:?}", self.destination);
        info!("Format:      {}", self.format);
        info!("Version:     {}", self.version.as_deref().unwrap_or("(none)"));
        info!("Tag:         {}", self.tag.as_deref().unwrap_or("(none)"));
        info!(
            "Exclude:     {}",
            if self.exclude.is_empty() {
                "(none)".to_owned()
            } else {
                self.exclude.iter().join(", ")
            }
        );
        info!("Hidden:      {}", if self.include_hidden { "included" } else { "excluded" });
        info!("Dry run:     {}", self.dry_run);
    }

    /// Runs one backup: archive, verify, link, prune, upload, in that order.
    ///
    /// Only a missing source, unusable exclusion rules, a failure to write the
    /// archive itself, or a failed upload abort the run. Everything after the
    /// archive exists is best-effort and logged, except the upload.
    #[named]
    pub fn run<Tz: TimeZone>(&self, now: DateTime<Tz>) -> Result<RunReport>
    where
        Tz::Offset: Display,
    {
        if !self.source.is_dir() {
            return Err(Error::invalid_source(self.source.clone()).add_fn_name(function_path!()));
        }

        let rules = ExclusionRules::for_source(&self.source, &self.exclude)
            .add_msg(format!(
                "Loading exclusion rules (including {:?}) failed",
                self.source.join(IGNORE_FILE_NAME)
            ))
            .add_fn_name(function_path!())?;

        self.log_summary();

        let descriptor = ArchiveDescriptor::builder()
            .project(self.project.clone())
            .maybe_version(self.version.clone())
            .maybe_tag(self.tag.clone())
            .created_at(now)
            .format(self.format)
            .build();
        let archive_path = self.destination.join(descriptor.file_name());

        let entries = WalkdirSource::builder()
            .src_dir(self.source.clone())
            .rules(rules)
            .include_hidden(self.include_hidden)
            .build()
            .archive_entry_iterator()
            .add_fn_name(function_path!())?;

        let pack = build_archive(entries, &archive_path, self.format, self.dry_run)?;
        let failure_log = self.record_failures(&pack);

        if pack.looks_empty() {
            warn!("Archive {:?} is very small and may be empty", archive_path);
        }

        let verification = (self.verify && !self.dry_run).then(|| match verify_archive(&archive_path) {
            Ok(v) => Some(v),
            Err(e) => {
                error!("Verification failed, the archive is kept: {}", e);
                None
            }
        });

        let latest_link = if self.latest_link && !self.dry_run {
            link_latest(&self.destination, &archive_path, &self.project)
        } else {
            None
        };

        let retention = self.prune();

        if self.dry_run {
            info!(
                "Dry run finished: {} files ({:.1} KiB) would be archived to {:?}",
                pack.file_count(),
                pack.content_bytes() as f64 / 1024.0,
                archive_path
            );
        } else {
            info!(
                "Backup finished: {:?} ({:.1} KiB, {} files, {} failures)",
                archive_path,
                pack.archive_bytes() as f64 / 1024.0,
                pack.file_count(),
                pack.failures().len()
            );
        }

        let remote_path = match &self.upload {
            None => None,
            Some(upload) if self.dry_run => {
                info!("Dry run, would upload {:?} using {:?}", archive_path, upload);
                None
            }
            Some(upload) => Some(
                upload
                    .upload(&archive_path)
                    .map_err(|e| Error::upload_failed(e))
                    .add_fn_name(function_path!())?,
            ),
        };

        Ok(RunReport {
            pack,
            failure_log,
            verification: verification.flatten(),
            latest_link,
            retention,
            remote_path,
        })
    }

    fn record_failures(&self, pack: &PackReport) -> Option<PathBuf> {
        if pack.failures().is_empty() {
            return None;
        }

        warn!("{} files could not be archived", pack.failures().len());
        if self.dry_run {
            return None;
        }

        match write_failure_log(pack.archive_path(), pack.failures()) {
            Ok(path) => {
                warn!("Failures written to {:?}", path);
                Some(path)
            }
            Err(e) => {
                error!("Writing failure log failed: {}", e);
                None
            }
        }
    }

    fn prune(&self) -> Option<RetentionReport> {
        if self.keep <= 0 {
            return None;
        }

        let res = if self.dry_run {
            plan_retention(&self.destination, &self.project, self.keep)
        } else {
            apply_retention(&self.destination, &self.project, self.keep)
        };

        match res {
            Ok(report) => {
                for path in report.deleted() {
                    if self.dry_run {
                        info!("Dry run, would delete {:?}", path);
                    }
                }
                if let Some(e) = report.non_fatal_error() {
                    warn!("{} old archive(s) could not be deleted: {}", report.failed().len(), e);
                }
                info!(
                    "Retention: kept {}, {} {}",
                    report.kept().len(),
                    if self.dry_run { "would delete" } else { "deleted" },
                    report.deleted().len()
                );
                Some(report)
            }
            Err(e) => {
                error!("Retention failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::result_error::error::{EXIT_FAILURE, EXIT_INVALID_SOURCE, EXIT_UPLOAD_FAILED};
    use crate::backup::upload::dropbox::DropboxUploadConfig;
    use chrono::Utc;
    use std::fs;
    use tempfile::TempDir;

    fn sample_source(dir: &Path) -> PathBuf {
        let src = dir.join("proj");
        fs::create_dir_all(src.join("venv")).unwrap();
        fs::write(src.join("a.txt"), "hello").unwrap();
        fs::write(src.join(".env"), "SECRET=1").unwrap();
        fs::write(src.join("venv/x.py"), "print()").unwrap();
        fs::write(src.join("notes.log"), "log").unwrap();
        src
    }

    fn config(src: &Path, dest: &Path) -> BackupConfig {
        BackupConfig::builder()
            .source(src)
            .destination(dest)
            .project("proj")
            .build()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 0).unwrap()
    }

    fn members(report: &RunReport) -> Vec<String> {
        verify_archive(report.pack().archive_path())
            .unwrap()
            .into_members()
            .unwrap()
    }

    #[test]
    fn test_default_run_archives_only_plain_files() {
        let dir = TempDir::new().unwrap();
        let src = sample_source(dir.path());
        let dest = dir.path().join("out");

        let report = config(&src, &dest).run(now()).unwrap();
        assert_eq!(
            report.pack().archive_path(),
            &dest.join("proj_20250102-0304.zip")
        );
        assert_eq!(members(&report), vec!["a.txt"]);
        assert!(report.failure_log().is_none());
        assert!(matches!(report.verification(), Some(Verification::Verified(_))));
        assert!(report.retention().is_none());
        assert!(report.remote_path().is_none());
        #[cfg(unix)]
        assert_eq!(
            fs::read_link(dest.join("proj_latest")).unwrap(),
            PathBuf::from("proj_20250102-0304.zip")
        );
    }

    #[test]
    fn test_name_parts_and_tar_gz() {
        let dir = TempDir::new().unwrap();
        let src = sample_source(dir.path());
        let dest = dir.path().join("out");
        let config = BackupConfig {
            version: Some("1.06".to_owned()),
            tag: Some("Frontend_OK".to_owned()),
            format: ArchiveFormat::TarGz,
            ..config(&src, &dest)
        };

        let report = config.run(now()).unwrap();
        assert_eq!(
            report.pack().archive_path(),
            &dest.join("proj_v1.06_20250102-0304_Frontend_OK.tar.gz")
        );
        assert_eq!(members(&report), vec!["a.txt"]);
    }

    #[test]
    fn test_missing_source() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out");
        let err = config(&dir.path().join("missing"), &dest).run(now()).unwrap_err();
        assert!(matches!(err.root(), Error::InvalidSource(_)));
        assert_eq!(err.exit_code(), EXIT_INVALID_SOURCE);
        assert!(!dest.exists());
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let src = sample_source(dir.path());
        let dest = dir.path().join("out");
        let config = BackupConfig {
            dry_run: true,
            keep: 1,
            ..config(&src, &dest)
        };

        let report = config.run(now()).unwrap();
        assert_eq!(report.pack().file_count(), 1);
        assert!(report.verification().is_none());
        assert!(report.latest_link().is_none());
        assert!(!dest.exists());
    }

    #[test]
    fn test_ignore_file_and_caller_patterns() {
        let dir = TempDir::new().unwrap();
        let src = sample_source(dir.path());
        fs::write(src.join(IGNORE_FILE_NAME), "# secrets\n*.secret\n").unwrap();
        fs::write(src.join("keys.secret"), "k").unwrap();
        fs::write(src.join("drop.me"), "d").unwrap();
        let config = BackupConfig {
            exclude: vec!["*.me".parse().unwrap()],
            ..config(&src, &dir.path().join("out"))
        };

        let report = config.run(now()).unwrap();
        assert_eq!(members(&report), vec!["a.txt"]);
    }

    #[test]
    fn test_same_minute_collision_is_refused() {
        let dir = TempDir::new().unwrap();
        let src = sample_source(dir.path());
        let config = config(&src, &dir.path().join("out"));

        config.run(now()).unwrap();
        let err = config.run(now()).unwrap_err();
        assert!(matches!(err.root(), Error::ArchiveExists(_)));
        assert_eq!(err.exit_code(), EXIT_FAILURE);
    }

    #[test]
    fn test_retention_after_run() {
        let dir = TempDir::new().unwrap();
        let src = sample_source(dir.path());
        let dest = dir.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        for day in 1..=3u64 {
            let old = fs::File::create(dest.join(format!("proj_2024010{day}-0000.zip"))).unwrap();
            old.set_modified(std::time::SystemTime::now() - std::time::Duration::from_secs(86400 * (10 - day)))
                .unwrap();
        }
        let config = BackupConfig {
            keep: 2,
            ..config(&src, &dest)
        };

        let report = config.run(now()).unwrap();
        let retention = report.retention().as_ref().unwrap();
        assert_eq!(retention.deleted().len(), 2);
        assert!(dest.join("proj_20250102-0304.zip").exists());
        assert!(dest.join("proj_20240103-0000.zip").exists());
        assert!(!dest.join("proj_20240101-0000.zip").exists());
        assert!(!dest.join("proj_20240102-0000.zip").exists());
    }

    #[test]
    fn test_upload_without_token_keeps_archive() {
        let dir = TempDir::new().unwrap();
        let src = sample_source(dir.path());
        let dest = dir.path().join("out");
        let config = BackupConfig {
            upload: Some(DropboxUploadConfig::builder().remote_dir("/Backups").build().into()),
            ..config(&src, &dest)
        };

        let err = config.run(now()).unwrap_err();
        assert_eq!(err.exit_code(), EXIT_UPLOAD_FAILED);
        assert!(dest.join("proj_20250102-0304.zip").exists());
    }

    #[test]
    fn test_yaml_config() {
        let config: BackupConfig = serde_yml::from_str(
            r#"
source: /srv/proj
destination: /srv/backups
project: proj
format: tgz
exclude: ["*.bak", "tmp/*"]
keep: 3
upload:
  type: dropbox
  remote_dir: /Backups
"#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(*config.format(), ArchiveFormat::TarGz);
        assert_eq!(config.exclude().len(), 2);
        assert!(*config.verify());
        assert!(*config.latest_link());
        assert!(!*config.dry_run());

        let config = config
            .force_dry_run(true)
            .with_fallback_token(Some(RedactedString::from("sl.env".to_owned())));
        assert!(*config.dry_run());
        let Some(UploadConfig::Dropbox(dropbox)) = config.upload() else {
            panic!("upload config lost");
        };
        assert_eq!(dropbox.token().as_ref().unwrap().inner(), "sl.env");
    }

    #[test]
    fn test_yaml_config_rejects_bad_values() {
        assert!(serde_yml::from_str::<BackupConfig>("source: a\ndestination: b\nproject: p\nformat: rar\n").is_err());
        assert!(serde_yml::from_str::<BackupConfig>("source: a\ndestination: b\nproject: p\nschedule: x\n").is_err());

        let config: BackupConfig = serde_yml::from_str("source: a\ndestination: b\nproject: a/b\n").unwrap();
        assert!(config.validate().is_err());
        let config: BackupConfig = serde_yml::from_str("source: a\ndestination: b\nproject: p\ntag: x/y\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_against_home() {
        let home = Path::new("/home/me");
        assert_eq!(resolve_against("Code/proj", home), PathBuf::from("/home/me/Code/proj"));
        assert_eq!(resolve_against("~/backups", home), PathBuf::from("/home/me/backups"));
        assert_eq!(resolve_against("~", home), PathBuf::from("/home/me"));
        assert_eq!(resolve_against("/srv/proj", home), PathBuf::from("/srv/proj"));
        assert_eq!(resolve_from_home("/srv/proj").unwrap(), PathBuf::from("/srv/proj"));
    }

    #[test]
    fn test_default_project_name() {
        assert_eq!(default_project_name("/home/me/countdown"), "countdown");
        assert_eq!(default_project_name("/"), "");
    }
}
