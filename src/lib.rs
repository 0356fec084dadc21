//! # proj_backup
//!
//! Snapshots a project directory into a single timestamped archive.
//!
//! ## Features
//!
//! - **Selection**: built-in excluded directories and file patterns, a
//!   `.backupignore` file in the source, extra caller globs, hidden files off
//!   by default
//! - **Formats**: zip (deflate) and gzip-compressed tar
//! - **Naming**: `<project>[_v<version>]_<YYYYMMDD-HHMM>[_<tag>].<ext>`
//! - **Safety**: archives are written to a temporary file and never overwrite
//!   an existing one; unreadable files are skipped and listed in a sidecar log
//! - **Retention**: keep the N newest archives of a project
//! - **Upload**: optional Dropbox upload of the finished archive
//!
//! ## Quick Start
//!
//! ```no_run
//! use proj_backup::backup::backup_config::BackupConfig;
//!
//! let config = BackupConfig::builder()
//!     .source("/home/me/Code/countdown")
//!     .destination("/home/me/backups")
//!     .project("countdown")
//!     .keep(5)
//!     .build();
//! let report = config.run(chrono::Local::now())?;
//! println!("{:?}", report.pack().archive_path());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
