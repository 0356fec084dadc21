use crate::backup::result_error::{AddFunctionName, AddMsg};
use itertools::Itertools;
use std::fmt::Debug;
use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;
use thiserror_ext::Construct;

/// Exit status for a run that finished without a fatal error.
pub const EXIT_OK: u8 = 0;
/// Exit status for configuration errors and any other fatal failure.
pub const EXIT_FAILURE: u8 = 1;
/// Exit status when the source directory is missing or not a directory.
pub const EXIT_INVALID_SOURCE: u8 = 2;
/// Exit status when the requested upload did not succeed.
pub const EXIT_UPLOAD_FAILED: u8 = 3;

#[derive(Error, Debug, Construct)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
    #[error(transparent)]
    Globset(#[from] globset::Error),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    StripPrefix(#[from] std::path::StripPrefixError),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error("Unknown archive format {0:?}, expected one of \"zip\", \"tar.gz\", \"tgz\"")]
    UnknownFormat(String),
    #[error("Source directory does not exist or is not a directory: {0:?}")]
    InvalidSource(PathBuf),
    #[error("Archive already exists, refusing to overwrite: {0:?}")]
    ArchiveExists(PathBuf),
    #[error("Home directory could not be determined")]
    NoHomeDir,
    #[error("Missing upload credential, set {0} or pass it explicitly")]
    MissingCredential(String),
    #[error("Upload rejected with status {status}: {body}")]
    UploadRejected { status: u16, body: String },
    #[error("Upload failed:\n{}", indent::indent_all_with("  ", .0.to_string()))]
    UploadFailed(Box<Error>),
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{} failed:\n{}", fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithFnName { fn_name: String, error: Box<Error> },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

impl<S: Into<String>> AddMsg<S> for Error {
    fn add_msg(self, msg: S) -> Self {
        Error::with_msg(msg.into(), self)
    }
}

impl<S: Into<String>> AddFunctionName<S> for Error {
    fn add_fn_name(self, fn_name: S) -> Self {
        Error::with_fn_name(fn_name.into(), self)
    }
}

impl From<Vec<Error>> for Error {
    fn from(errors: Vec<Error>) -> Self {
        if errors.is_empty() {
            panic!("Should not create lots of errors when error is empty")
        }
        Self::LotsOfError(errors.into_iter().flat_map(Error::into_iter).collect_vec())
    }
}

impl Error {
    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(Error::into_iter)),
            e => Box::new(std::iter::once(e)),
        }
    }

    pub fn chain(self, other: Error) -> Error {
        Error::LotsOfError(self.into_iter().chain(other.into_iter()).collect_vec())
    }

    /// Strips context wrappers down to the error that actually happened.
    pub fn root(&self) -> &Error {
        match self {
            Error::WithMsg { error, .. } | Error::WithFnName { error, .. } => error.root(),
            e => e,
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self.root() {
            Error::InvalidSource(_) => EXIT_INVALID_SOURCE,
            Error::UploadFailed(_) => EXIT_UPLOAD_FAILED,
            Error::LotsOfError(errors) => errors
                .iter()
                .map(Error::exit_code)
                .max()
                .unwrap_or(EXIT_FAILURE),
            _ => EXIT_FAILURE,
        }
    }
}

impl From<&Error> for ExitCode {
    fn from(e: &Error) -> Self {
        ExitCode::from(e.exit_code())
    }
}
