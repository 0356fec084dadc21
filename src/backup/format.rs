use crate::backup::file_ext::FileExtProvider;
use crate::backup::result_error::error::Error;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

static ZIP_FILE_EXT: &str = "zip";
static TAR_GZ_FILE_EXT: &str = "tar.gz";
static TGZ_FILE_EXT: &str = "tgz";

/// Container format of the produced archive.
#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ArchiveFormat {
    #[default]
    #[display("zip")]
    Zip,
    #[display("tar.gz")]
    TarGz,
}

impl ArchiveFormat {
    /// Format implied by a file name's extension, `None` when it is not an archive we write.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<ArchiveFormat> {
        let name = path.as_ref().file_name()?.to_str()?;
        if name.ends_with(&format!(".{ZIP_FILE_EXT}")) {
            Some(ArchiveFormat::Zip)
        } else if name.ends_with(&format!(".{TAR_GZ_FILE_EXT}"))
            || name.ends_with(&format!(".{TGZ_FILE_EXT}"))
        {
            Some(ArchiveFormat::TarGz)
        } else {
            None
        }
    }
}

impl FromStr for ArchiveFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zip" => Ok(ArchiveFormat::Zip),
            "tar.gz" | "tgz" => Ok(ArchiveFormat::TarGz),
            other => Err(Error::unknown_format(other)),
        }
    }
}

impl TryFrom<String> for ArchiveFormat {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ArchiveFormat> for String {
    fn from(value: ArchiveFormat) -> Self {
        value.to_string()
    }
}

impl FileExtProvider for ArchiveFormat {
    fn file_ext(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => ZIP_FILE_EXT,
            ArchiveFormat::TarGz => TAR_GZ_FILE_EXT,
        }
    }
}
