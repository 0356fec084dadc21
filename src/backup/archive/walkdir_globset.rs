use crate::backup::archive::exclusion::ExclusionRules;
use crate::backup::archive::{ArchiveEntry, ArchiveEntryIterable};
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::validate::validate_dir_exist;

use bon::Builder;
use dyn_iter::{DynIter, IntoDynIterator};
use function_name::named;
use getset::Getters;
use walkdir::{DirEntry, WalkDir};

use std::path::{Path, PathBuf};

/// Walks a source directory and yields every file the exclusion rules let through.
///
/// Entries come out sorted by file name within each directory, so two runs
/// over an unchanged tree produce archive members in the same order.
#[derive(Clone, Debug, Builder, Getters)]
#[getset(get = "pub")]
pub struct WalkdirSource {
    #[builder(into)]
    src_dir: PathBuf,
    rules: ExclusionRules,
    #[builder(default)]
    include_hidden: bool,
}

impl ArchiveEntryIterable for WalkdirSource {
    #[named]
    fn archive_entry_iterator<'a>(&self) -> Result<DynIter<'a, Result<ArchiveEntry>>> {
        if let Err(e) = validate_dir_exist(&self.src_dir) {
            tracing::error!("{}", e);
            return Err(Error::invalid_source(self.src_dir.clone()).add_fn_name(function_path!()));
        }

        tracing::info!(
            "Starting directory scan: {:?} (hidden files {})",
            self.src_dir,
            if self.include_hidden { "included" } else { "excluded" }
        );

        let src_dir = self.src_dir.clone();
        let rules = self.rules.clone();
        let include_hidden = self.include_hidden;
        let prune_rules = self.rules.clone();

        let entries = WalkDir::new(&self.src_dir)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |de| {
                de.depth() == 0
                    || !de.file_type().is_dir()
                    || !de
                        .file_name()
                        .to_str()
                        .is_some_and(|name| prune_rules.prunes_dir(name, include_hidden))
            })
            .filter_map(move |res| match res {
                Ok(de) => process_dir_entry(de, &src_dir, &rules, include_hidden),
                Err(e) => Some(Err(walk_error(e))),
            })
            .map(move |res| res.add_fn_name(function_path!()));

        Ok(entries.into_dyn_iter())
    }
}

fn walk_error(e: walkdir::Error) -> Error {
    let msg = match e.path() {
        Some(p) => format!("Cannot read {p:?}, skipping"),
        None => "Cannot read directory entry, skipping".to_owned(),
    };
    Error::from(e).add_msg(msg)
}

fn process_dir_entry<P: AsRef<Path>>(
    de: DirEntry,
    base_src_dir: P,
    rules: &ExclusionRules,
    include_hidden: bool,
) -> Option<Result<ArchiveEntry>> {
    let p = de.into_path();
    // Follows symlinks, so a link to a regular file is archived as that file.
    if !p.is_file() {
        tracing::trace!("Skipping {:?} not a file", p);
        return None;
    }

    let entry = match ArchiveEntry::from_base(&p, base_src_dir.as_ref()) {
        Ok(entry) => entry,
        Err(e) => {
            return Some(Err(e.add_msg(format!(
                "Stripping {:?} from {:?} failed",
                base_src_dir.as_ref(),
                p
            ))))
        }
    };

    if let Some(reason) = rules.exclusion_reason(&entry.dst, include_hidden) {
        tracing::trace!("Skipping {:?}: {}", entry.dst, reason);
        return None;
    }

    tracing::trace!("Including file: {:?} -> {:?}", entry.src, entry.dst);
    Some(Ok(entry))
}
