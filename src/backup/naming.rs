use crate::backup::file_ext::FileExtProvider;
use crate::backup::format::ArchiveFormat;
use bon::Builder;
use chrono::{DateTime, TimeZone};
use getset::Getters;
use itertools::Itertools;
use std::fmt::Display;

/// Minute resolution, so two runs in the same minute produce the same name.
pub static TIME_FORMAT: &str = "%Y%m%d-%H%M";
pub static NAME_SEPARATOR: &str = "_";

/// Everything that goes into an archive file name.
#[derive(Clone, Debug, Builder, Getters, PartialEq, Eq)]
#[getset(get = "pub")]
pub struct ArchiveDescriptor<Tz: TimeZone> {
    #[builder(into)]
    project: String,
    #[builder(into)]
    version: Option<String>,
    #[builder(into)]
    tag: Option<String>,
    created_at: DateTime<Tz>,
    format: ArchiveFormat,
}

impl<Tz: TimeZone> ArchiveDescriptor<Tz>
where
    Tz::Offset: Display,
{
    pub fn file_name(&self) -> String {
        build_name(
            &self.project,
            self.version.as_deref(),
            self.tag.as_deref(),
            &self.created_at,
            self.format,
        )
    }
}

/// `<project>[_v<version>]_<YYYYMMDD-HHMM>[_<tag>].<ext>`, empty version or tag count as absent.
pub fn build_name<Tz: TimeZone>(
    project: &str,
    version: Option<&str>,
    tag: Option<&str>,
    timestamp: &DateTime<Tz>,
    format: ArchiveFormat,
) -> String
where
    Tz::Offset: Display,
{
    let version = version.filter(|v| !v.is_empty()).map(|v| format!("v{v}"));
    let timestamp = timestamp.format(TIME_FORMAT).to_string();
    let tag = tag.filter(|t| !t.is_empty()).map(str::to_owned);

    let base = std::iter::once(project.to_owned())
        .chain(version)
        .chain(std::iter::once(timestamp))
        .chain(tag)
        .join(NAME_SEPARATOR);

    format!("{base}{}", format.dotted_file_ext())
}

/// Prefix shared by every file that belongs to a project in the destination directory.
pub fn project_prefix(project: &str) -> String {
    format!("{project}{NAME_SEPARATOR}")
}
