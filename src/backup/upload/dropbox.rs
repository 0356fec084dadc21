use crate::backup::function_path;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::upload::{Upload, WriteMode};
use bon::Builder;
use function_name::named;
use getset::Getters;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use validator::Validate;

pub static TOKEN_ENV: &str = "DROPBOX_TOKEN";
pub static UPLOAD_ENDPOINT: &str = "https://content.dropboxapi.com/2/files/upload";
static API_ARG_HEADER: &str = "Dropbox-API-Arg";

fn default_endpoint() -> String {
    UPLOAD_ENDPOINT.to_owned()
}

fn default_timeout_secs() -> u64 {
    300
}

/// Upload of an archive into a Dropbox folder through the content API.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct DropboxUploadConfig {
    #[validate(length(min = 1))]
    #[builder(into)]
    remote_dir: String,
    #[serde(default)]
    #[builder(default)]
    mode: WriteMode,
    /// Falls back to the environment when absent.
    #[serde(default)]
    #[validate(nested)]
    token: Option<RedactedString>,
    #[serde(default = "default_endpoint")]
    #[builder(into, default = default_endpoint())]
    endpoint: String,
    #[serde(default = "default_timeout_secs")]
    #[builder(default = default_timeout_secs())]
    timeout_secs: u64,
}

#[derive(Serialize)]
struct UploadArg<'a> {
    path: &'a str,
    mode: WriteMode,
    autorename: bool,
    mute: bool,
}

impl DropboxUploadConfig {
    /// Uses `token` unless the config already carries one.
    pub fn or_token(mut self, token: Option<RedactedString>) -> Self {
        if self.token.is_none() {
            self.token = token;
        }
        self
    }

    /// Remote directory joined with the archive file name, always absolute.
    pub fn remote_path(&self, file_name: &str) -> String {
        let dir = self.remote_dir.trim_end_matches('/');
        if dir.starts_with('/') {
            format!("{dir}/{file_name}")
        } else {
            format!("/{dir}/{file_name}")
        }
    }

    /// JSON for the `Dropbox-API-Arg` header, which must be plain ASCII.
    fn api_arg(&self, remote_path: &str) -> Result<String> {
        let json = serde_json::to_string(&UploadArg {
            path: remote_path,
            mode: self.mode,
            autorename: false,
            mute: false,
        })?;
        Ok(escape_non_ascii(&json))
    }
}

/// Rewrites every char from U+007F up as `\uXXXX`, astral chars as surrogate pairs.
///
/// Only valid inside JSON string literals, which is the only place serde_json
/// emits non-ASCII.
fn escape_non_ascii(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        if (c as u32) < 0x7f {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

impl Upload for DropboxUploadConfig {
    #[named]
    fn upload(&self, local_path: &Path) -> Result<String> {
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| Error::missing_credential(TOKEN_ENV))
            .add_fn_name(function_path!())?;

        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::from(std::io::Error::other(format!("{local_path:?} has no usable file name"))))?;
        let remote_path = self.remote_path(file_name);
        let arg = self.api_arg(&remote_path)?;

        tracing::info!("Uploading {:?} to Dropbox {:?} (mode {})", local_path, remote_path, self.mode);
        let body = File::open(local_path)
            .map_err(Error::from)
            .add_msg(format!("Opening {local_path:?} for upload failed"))?;

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?;
        let response = client
            .post(&self.endpoint)
            .bearer_auth(token.inner())
            .header(API_ARG_HEADER, arg)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .map_err(Error::from)
            .add_msg(format!("Sending {local_path:?} to {:?} failed", self.endpoint))
            .add_fn_name(function_path!())?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::upload_rejected(status.as_u16(), body).add_fn_name(function_path!()));
        }

        tracing::info!("Uploaded to Dropbox: {}", remote_path);
        Ok(remote_path)
    }
}
