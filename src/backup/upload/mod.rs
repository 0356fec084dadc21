pub mod dropbox;

use crate::backup::result_error::result::Result;
use crate::backup::upload::dropbox::DropboxUploadConfig;
use clap::ValueEnum;
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::result;
use validator::{Validate, ValidationErrors};

/// What the remote side does when the target path is already taken.
#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Fail instead of touching the existing remote file.
    #[default]
    #[display("add")]
    Add,
    #[display("overwrite")]
    Overwrite,
}

#[derive(Clone, From, Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum UploadConfig {
    Dropbox(DropboxUploadConfig),
}

impl Validate for UploadConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            Self::Dropbox(inner) => inner.validate(),
        }
    }
}

impl Upload for UploadConfig {
    fn upload(&self, local_path: &Path) -> Result<String> {
        match self {
            Self::Dropbox(inner) => inner.upload(local_path),
        }
    }
}

/// Sends one local archive to remote storage.
pub trait Upload {
    /// Makes exactly one attempt and returns the remote path on success.
    fn upload(&self, local_path: &Path) -> Result<String>;
}
