//! Structural check of a freshly written archive.
//!
//! Only the container index is read: zip central directory, or every tar
//! header. Member contents are not decompressed or checked.

use crate::backup::format::ArchiveFormat;
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};

use flate2::read::GzDecoder;
use function_name::named;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use zip::ZipArchive;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verification {
    /// The index was readable; member names as recorded, in archive order.
    Verified(Vec<String>),
    /// The extension does not name a format we know how to open.
    Skipped,
}

impl Verification {
    pub fn into_members(self) -> Option<Vec<String>> {
        match self {
            Verification::Verified(members) => Some(members),
            Verification::Skipped => None,
        }
    }
}

/// Opens `archive_path` as the format its extension implies and lists its members.
#[named]
pub fn verify_archive<P: AsRef<Path>>(archive_path: P) -> Result<Verification> {
    let archive_path = archive_path.as_ref();
    let Some(format) = ArchiveFormat::from_path(archive_path) else {
        tracing::warn!("Unknown archive type, skipping verification: {:?}", archive_path);
        return Ok(Verification::Skipped);
    };

    tracing::info!("Verifying archive {:?} as {}", archive_path, format);
    let members = match format {
        ArchiveFormat::Zip => list_zip(archive_path),
        ArchiveFormat::TarGz => list_tar_gz(archive_path),
    }
    .add_msg(format!("Archive {archive_path:?} is not a readable {format}"))
    .add_fn_name(function_path!())?;

    tracing::info!("Archive verified, {} members", members.len());
    Ok(Verification::Verified(members))
}

fn list_zip(path: &Path) -> Result<Vec<String>> {
    let mut archive = ZipArchive::new(BufReader::new(File::open(path)?))?;
    (0..archive.len())
        .map(|i| Ok(archive.by_index_raw(i)?.name().to_owned()))
        .collect()
}

fn list_tar_gz(path: &Path) -> Result<Vec<String>> {
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(File::open(path)?)));
    archive
        .entries()?
        .map(|entry| {
            let entry = entry?;
            let path = entry.path()?;
            path.to_str()
                .map(str::to_owned)
                .ok_or_else(|| Error::from(std::io::Error::other(format!("Non UTF-8 member name {path:?}"))))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_unknown_extension_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("foo.rar");
        std::fs::write(&path, "whatever").unwrap();
        assert_eq!(verify_archive(&path).unwrap(), Verification::Skipped);
    }

    #[test]
    fn test_corrupt_zip_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("foo.zip");
        std::fs::write(&path, "not a zip at all").unwrap();
        assert!(verify_archive(&path).is_err());
    }

    #[test]
    fn test_corrupt_tar_gz_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("foo.tar.gz");
        std::fs::write(&path, "not gzip").unwrap();
        assert!(verify_archive(&path).is_err());
    }

    #[test]
    fn test_missing_archive_is_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(verify_archive(temp_dir.path().join("gone.zip")).is_err());
    }

    #[test]
    fn test_tgz_extension_is_opened_as_tar_gz() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("foo.tgz");

        let encoder = flate2::write::GzEncoder::new(File::create(&path).unwrap(), flate2::Compression::fast());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        header.set_size(3);
        header.set_cksum();
        builder.append_data(&mut header, "dir/x.txt", &b"abc"[..]).unwrap();
        builder.into_inner().unwrap().finish().unwrap().flush().unwrap();

        assert_eq!(
            verify_archive(&path).unwrap(),
            Verification::Verified(vec!["dir/x.txt".to_owned()])
        );
    }
}
