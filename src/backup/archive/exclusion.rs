use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;

use derive_more::{Display, From};
use getset::Getters;
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize};

use std::collections::HashSet;
use std::fmt::Formatter;
use std::path::Path;
use std::result;
use std::str::FromStr;

/// Project-local ignore file, read from the root of the source directory.
pub static IGNORE_FILE_NAME: &str = ".backupignore";

/// A path with any segment equal to one of these is never archived.
pub static BUILTIN_EXCLUDED_DIRS: &[&str] = &[
    "venv",
    ".venv",
    ".git",
    "node_modules",
    "__pycache__",
    "dist",
    "build",
    "backups",
];

/// Matched against the file name only.
pub static BUILTIN_EXCLUDED_FILE_GLOBS: &[&str] = &["*.pyc", "*.pyo", "*.log", "*.tmp"];

/// A shell glob matched against a forward-slash relative path.
///
/// Unlike path-aware globs, `*` and `?` also match `/`, so `*.secret`
/// excludes `keys.secret` at any depth.
#[derive(Clone, Debug, From, Display, Serialize, PartialEq, Eq, Getters)]
#[serde(transparent)]
#[getset(get = "pub")]
pub struct ExcludeGlob {
    glob: Glob,
}

fn compile_glob(pattern: &str) -> result::Result<Glob, globset::Error> {
    GlobBuilder::new(pattern).literal_separator(false).build()
}

impl FromStr for ExcludeGlob {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        compile_glob(s)
            .map(ExcludeGlob::from)
            .map_err(Error::from)
            .add_msg(format!("Invalid exclude pattern {s:?}"))
    }
}

struct ExcludeGlobVisitor;

impl Visitor<'_> for ExcludeGlobVisitor {
    type Value = ExcludeGlob;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a glob pattern")
    }

    fn visit_str<E>(self, v: &str) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        compile_glob(v)
            .map(ExcludeGlob::from)
            .map_err(serde::de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for ExcludeGlob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> result::Result<Self, D::Error> {
        deserializer.deserialize_str(ExcludeGlobVisitor)
    }
}

/// Why a path was left out of the archive.
#[derive(Clone, Debug, Display, PartialEq, Eq)]
pub enum ExclusionReason {
    #[display("hidden path")]
    Hidden,
    #[display("excluded directory {_0:?}")]
    ExcludedDir(String),
    #[display("built-in file pattern")]
    BuiltinFilePattern,
    #[display("exclude pattern")]
    Pattern,
}

/// `true` if any segment of the forward-slash path starts with a dot.
pub fn is_hidden(relative_path: &str) -> bool {
    relative_path.split('/').any(|segment| segment.starts_with('.'))
}

/// Reads one glob per line from the ignore file, skipping blanks and `#` comments.
///
/// A missing ignore file yields no patterns.
pub fn read_ignore_file<P: AsRef<Path>>(src_dir: P) -> Result<Vec<ExcludeGlob>> {
    let path = src_dir.as_ref().join(IGNORE_FILE_NAME);
    if !path.is_file() {
        return Ok(vec![]);
    }

    let content = std::fs::read_to_string(&path)
        .map_err(Error::from)
        .add_msg(format!("Reading ignore file {path:?} failed"))?;

    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.parse::<ExcludeGlob>().add_msg(format!("In ignore file {path:?}")))
        .collect()
}

/// The union of every exclusion source, compiled once.
#[derive(Clone, Debug)]
pub struct ExclusionRules {
    excluded_dirs: HashSet<&'static str>,
    builtin_file_globs: GlobSet,
    patterns: GlobSet,
}

impl ExclusionRules {
    /// Built-in rules plus the given patterns.
    pub fn new<I: IntoIterator<Item = ExcludeGlob>>(patterns: I) -> Result<Self> {
        let mut builtin = GlobSetBuilder::new();
        for pattern in BUILTIN_EXCLUDED_FILE_GLOBS {
            builtin.add(compile_glob(pattern)?);
        }

        let mut custom = GlobSetBuilder::new();
        let mut count = 0;
        for pattern in patterns {
            tracing::debug!("Adding exclude pattern {}", pattern);
            custom.add(pattern.glob);
            count += 1;
        }
        tracing::debug!("Compiled {} exclude patterns", count);

        Ok(Self {
            excluded_dirs: BUILTIN_EXCLUDED_DIRS.iter().copied().collect(),
            builtin_file_globs: builtin.build()?,
            patterns: custom.build()?,
        })
    }

    /// Built-in rules, the source's ignore file, then the caller's patterns.
    pub fn for_source<P: AsRef<Path>>(src_dir: P, caller_patterns: &[ExcludeGlob]) -> Result<Self> {
        let from_file = read_ignore_file(src_dir)?;
        Self::new(from_file.into_iter().chain(caller_patterns.iter().cloned()))
    }

    pub fn is_excluded_dir_name(&self, segment: &str) -> bool {
        self.excluded_dirs.contains(segment)
    }

    /// Pattern exclusion only; the hidden-file policy is checked separately.
    pub fn is_excluded(&self, relative_path: &str) -> bool {
        self.pattern_reason(relative_path).is_some()
    }

    fn pattern_reason(&self, relative_path: &str) -> Option<ExclusionReason> {
        if let Some(dir) = relative_path
            .split('/')
            .find(|segment| self.is_excluded_dir_name(segment))
        {
            return Some(ExclusionReason::ExcludedDir(dir.to_owned()));
        }

        let file_name = relative_path.rsplit('/').next().unwrap_or(relative_path);
        if self.builtin_file_globs.is_match(file_name) {
            return Some(ExclusionReason::BuiltinFilePattern);
        }

        if self.patterns.is_match(relative_path) {
            return Some(ExclusionReason::Pattern);
        }

        None
    }

    /// First rule that rejects the path, in the order hidden, directory, file pattern, pattern.
    pub fn exclusion_reason(&self, relative_path: &str, include_hidden: bool) -> Option<ExclusionReason> {
        if !include_hidden && is_hidden(relative_path) {
            return Some(ExclusionReason::Hidden);
        }
        self.pattern_reason(relative_path)
    }

    /// Whether a directory can be skipped without looking at anything below it.
    ///
    /// Only per-segment rules qualify: a glob that does not match the directory
    /// itself may still match files inside it.
    pub fn prunes_dir(&self, dir_name: &str, include_hidden: bool) -> bool {
        (!include_hidden && dir_name.starts_with('.')) || self.is_excluded_dir_name(dir_name)
    }
}
