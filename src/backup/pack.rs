use crate::backup::archive::ArchiveEntry;
use crate::backup::finish::Finish;
use crate::backup::format::ArchiveFormat;
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};

use chrono::{DateTime, Datelike, Local, Timelike};
use flate2::write::GzEncoder;
use flate2::Compression;
use function_name::named;
use getset::{CopyGetters, Getters};
use itertools::Itertools;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use std::fmt::{Display, Formatter};
use std::fs::{File, Metadata};
use std::io::{BufWriter, IntoInnerError, Read, Write};
use std::path::{Path, PathBuf};

static FAILURE_LOG_SUFFIX: &str = ".errors.log";
static FAILURE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A file that was selected but could not be archived.
#[derive(Clone, Debug, Getters, CopyGetters)]
pub struct FileFailure {
    /// Relative path, `None` when the failure happened while scanning.
    #[getset(get = "pub")]
    path: Option<String>,
    #[getset(get = "pub")]
    error: String,
    #[getset(get_copy = "pub")]
    size: u64,
    #[getset(get = "pub")]
    time: DateTime<Local>,
}

impl Display for FileFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} - {} ({} B) -> {}",
            self.time.format(FAILURE_TIME_FORMAT),
            self.path.as_deref().unwrap_or("(scan)"),
            self.size,
            self.error
        )
    }
}

impl FileFailure {
    fn new(entry: Option<&ArchiveEntry>, error: &Error) -> Self {
        let size = entry
            .and_then(|e| std::fs::metadata(&e.src).ok())
            .map(|md| md.len())
            .unwrap_or(0);
        Self {
            path: entry.map(|e| e.dst.to_string()),
            error: error.to_string().lines().join(" "),
            size,
            time: Local::now(),
        }
    }
}

/// Outcome of writing (or, on a dry run, planning) one archive.
#[derive(Clone, Debug, Getters, CopyGetters)]
pub struct PackReport {
    #[getset(get = "pub")]
    archive_path: PathBuf,
    #[getset(get_copy = "pub")]
    file_count: usize,
    /// Sum of the sizes of the archived source files.
    #[getset(get_copy = "pub")]
    content_bytes: u64,
    /// Size of the archive on disk, zero on a dry run.
    #[getset(get_copy = "pub")]
    archive_bytes: u64,
    #[getset(get = "pub")]
    failures: Vec<FileFailure>,
    #[getset(get_copy = "pub")]
    dry_run: bool,
}

impl PackReport {
    /// Tiny archives are almost always a sign that nothing was selected.
    pub fn looks_empty(&self) -> bool {
        !self.dry_run && (self.file_count == 0 || self.archive_bytes < 100)
    }
}

enum AppendError {
    /// The entry was left out but the container is still consistent.
    Skipped(Error),
    /// The container can no longer be trusted.
    Fatal(Error),
}

/// An open archive container being appended to.
enum ArchiveSink {
    Zip(ZipWriter<File>),
    TarGz(tar::Builder<GzEncoder<BufWriter<File>>>),
}

impl ArchiveSink {
    fn new(format: ArchiveFormat, file: File) -> Self {
        match format {
            ArchiveFormat::Zip => ArchiveSink::Zip(ZipWriter::new(file)),
            ArchiveFormat::TarGz => {
                let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
                ArchiveSink::TarGz(tar::Builder::new(encoder))
            }
        }
    }

    fn append<R: Read>(
        &mut self,
        entry: &ArchiveEntry,
        file: &mut R,
        metadata: &Metadata,
    ) -> std::result::Result<(), AppendError> {
        match self {
            ArchiveSink::Zip(zip) => {
                zip.start_file(entry.dst.as_ref(), zip_options(metadata))
                    .map_err(|e| AppendError::Fatal(e.into()))?;
                if let Err(e) = std::io::copy(file, zip) {
                    if let Err(abort) = zip.abort_file() {
                        return Err(AppendError::Fatal(Error::from(abort).chain(e.into())));
                    }
                    return Err(AppendError::Skipped(e.into()));
                }
                Ok(())
            }
            // The header is out before the first read, so a failing source is
            // zero-filled to its declared size and reported afterwards.
            ArchiveSink::TarGz(tar) => {
                let mut header = tar::Header::new_gnu();
                header.set_metadata(metadata);
                let mut reader = PaddedReader::new(file, metadata.len());
                tar.append_data(&mut header, entry.dst.as_ref(), &mut reader)
                    .map_err(|e| AppendError::Fatal(e.into()))?;
                match reader.into_error() {
                    None => Ok(()),
                    Some(e) => Err(AppendError::Skipped(
                        Error::from(e).add_msg("Member was zero-filled after the failed read"),
                    )),
                }
            }
        }
    }
}

/// Yields exactly `size` bytes whatever the inner reader does.
///
/// A read error or an early end of file is kept aside and the rest is zeros.
struct PaddedReader<R> {
    inner: R,
    size: u64,
    read: u64,
    error: Option<std::io::Error>,
}

impl<R: Read> PaddedReader<R> {
    fn new(inner: R, size: u64) -> Self {
        Self {
            inner,
            size,
            read: 0,
            error: None,
        }
    }

    fn into_error(self) -> Option<std::io::Error> {
        self.error
    }
}

impl<R: Read> Read for PaddedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = self.size - self.read;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let len = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let buf = &mut buf[..len];

        let n = if self.error.is_some() {
            0
        } else {
            match self.inner.read(buf) {
                Ok(0) => {
                    self.error = Some(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("File shrank to {} of {} bytes while archiving", self.read, self.size),
                    ));
                    0
                }
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => return Err(e),
                Err(e) => {
                    self.error = Some(e);
                    0
                }
            }
        };

        let n = if n == 0 {
            buf.fill(0);
            len
        } else {
            n
        };
        self.read += n as u64;
        Ok(n)
    }
}

impl Finish<File> for ArchiveSink {
    fn finish(self) -> Result<File> {
        match self {
            ArchiveSink::Zip(zip) => Finish::finish(zip),
            ArchiveSink::TarGz(tar) => Finish::finish(Finish::finish(tar)?)?
                .into_inner()
                .map_err(IntoInnerError::into_error)
                .map_err(Error::from),
        }
    }
}

fn zip_options(metadata: &Metadata) -> SimpleFileOptions {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(metadata.len() >= u64::from(u32::MAX));

    let options = match metadata.modified().ok().and_then(zip_date_time) {
        Some(dt) => options.last_modified_time(dt),
        None => options,
    };

    #[cfg(unix)]
    let options = {
        use std::os::unix::fs::PermissionsExt;
        options.unix_permissions(metadata.permissions().mode())
    };

    options
}

/// Zip timestamps are local, two-second resolution, and cannot predate 1980.
fn zip_date_time(modified: std::time::SystemTime) -> Option<zip::DateTime> {
    let local = DateTime::<Local>::from(modified);
    zip::DateTime::from_date_and_time(
        u16::try_from(local.year()).ok()?,
        local.month() as u8,
        local.day() as u8,
        local.hour() as u8,
        local.minute() as u8,
        local.second() as u8,
    )
    .ok()
}

/// Where the failure list for `archive_path` is written.
pub fn failure_log_path<P: AsRef<Path>>(archive_path: P) -> PathBuf {
    let mut name = archive_path
        .as_ref()
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(FAILURE_LOG_SUFFIX);
    archive_path.as_ref().with_file_name(name)
}

/// Writes one line per failure next to the archive.
pub fn write_failure_log<P: AsRef<Path>>(archive_path: P, failures: &[FileFailure]) -> Result<PathBuf> {
    let path = failure_log_path(archive_path);
    let mut writer = BufWriter::new(File::create(&path)?);
    for failure in failures {
        writeln!(writer, "{failure}")?;
    }
    writer.into_inner().map_err(IntoInnerError::into_error)?.sync_all()?;
    Ok(path)
}

/// Streams `entries` into a new archive at `archive_path`.
///
/// Files that cannot be read are skipped and returned in the report. The
/// archive is assembled in a hidden temporary file next to the destination and
/// only moved into place once complete; an existing file is never replaced.
///
/// With `dry_run` the entries are still listed and counted, but nothing is
/// created, not even the destination directory.
#[named]
pub fn build_archive<I, P>(entries: I, archive_path: P, format: ArchiveFormat, dry_run: bool) -> Result<PackReport>
where
    I: IntoIterator<Item = Result<ArchiveEntry>>,
    P: AsRef<Path>,
{
    let archive_path = archive_path.as_ref();
    if dry_run {
        return plan_archive(entries, archive_path);
    }

    let res = write_archive(entries, archive_path, format);
    res.add_msg(format!("Creating archive {archive_path:?} failed"))
        .add_fn_name(function_path!())
}

fn plan_archive<I>(entries: I, archive_path: &Path) -> Result<PackReport>
where
    I: IntoIterator<Item = Result<ArchiveEntry>>,
{
    tracing::info!("Dry run, would create archive: {:?}", archive_path);
    let mut report = PackReport {
        archive_path: archive_path.to_path_buf(),
        file_count: 0,
        content_bytes: 0,
        archive_bytes: 0,
        failures: vec![],
        dry_run: true,
    };

    for entry in entries {
        match entry.and_then(|e| Ok((std::fs::metadata(&e.src)?, e))) {
            Ok((md, e)) => {
                tracing::debug!("Would add {:?} ({} B)", e.dst, md.len());
                report.file_count += 1;
                report.content_bytes += md.len();
            }
            Err(e) => {
                tracing::warn!("{}", e);
                report.failures.push(FileFailure::new(None, &e));
            }
        }
    }

    Ok(report)
}

fn write_archive<I>(entries: I, archive_path: &Path, format: ArchiveFormat) -> Result<PackReport>
where
    I: IntoIterator<Item = Result<ArchiveEntry>>,
{
    if archive_path.exists() {
        return Err(Error::archive_exists(archive_path));
    }

    let parent = archive_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)
        .map_err(Error::from)
        .add_msg(format!("Creating destination directory {parent:?} failed"))?;

    let file_name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    // Hidden so a half-written archive never looks like a member of the project.
    let (file, temp_path) = tempfile::Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(".tmp")
        .tempfile_in(parent)?
        .into_parts();

    tracing::info!("Creating archive: {:?}", archive_path);
    let mut sink = ArchiveSink::new(format, file);
    let mut report = PackReport {
        archive_path: archive_path.to_path_buf(),
        file_count: 0,
        content_bytes: 0,
        archive_bytes: 0,
        failures: vec![],
        dry_run: false,
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("{}", e);
                report.failures.push(FileFailure::new(None, &e));
                continue;
            }
        };

        let opened = File::open(&entry.src).and_then(|f| f.metadata().map(|md| (f, md)));
        let (mut src, metadata) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                let e = Error::from(e).add_msg(format!("Skipping {:?}", entry.dst));
                tracing::warn!("{}", e);
                report.failures.push(FileFailure::new(Some(&entry), &e));
                continue;
            }
        };

        match sink.append(&entry, &mut src, &metadata) {
            Ok(()) => {
                tracing::debug!("Added {:?} ({} B)", entry.dst, metadata.len());
                report.file_count += 1;
                report.content_bytes += metadata.len();
            }
            Err(AppendError::Skipped(e)) => {
                let e = e.add_msg(format!("Skipping {:?}", entry.dst));
                tracing::warn!("{}", e);
                report.failures.push(FileFailure::new(Some(&entry), &e));
            }
            Err(AppendError::Fatal(e)) => {
                return Err(e.add_msg(format!("Appending {:?} failed", entry.dst)));
            }
        }
    }

    let file = sink.finish()?;
    file.sync_all()?;
    drop(file);

    temp_path.persist_noclobber(archive_path).map_err(|e| {
        if e.error.kind() == std::io::ErrorKind::AlreadyExists {
            Error::archive_exists(archive_path)
        } else {
            Error::from(e.error)
        }
    })?;

    report.archive_bytes = std::fs::metadata(archive_path)?.len();
    tracing::info!(
        "Archived {} files ({} B) into {:?} ({} B)",
        report.file_count,
        report.content_bytes,
        archive_path,
        report.archive_bytes
    );
    Ok(report)
}
