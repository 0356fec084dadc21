use chrono::Local;
use clap::Parser;
use proj_backup::backup::archive::exclusion::ExcludeGlob;
use proj_backup::backup::backup_config::{default_project_name, resolve_from_home, BackupConfig};
use proj_backup::backup::format::ArchiveFormat;
use proj_backup::backup::redacted::RedactedString;
use proj_backup::backup::result_error::error::Error;
use proj_backup::backup::result_error::result::Result;
use proj_backup::backup::result_error::AddMsg;
use proj_backup::backup::upload::dropbox::DropboxUploadConfig;
use proj_backup::backup::upload::{UploadConfig, WriteMode};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, Level};
use validator::Validate;

/// Back up a project directory into a timestamped zip or tar.gz archive.
#[derive(Parser, Debug)]
#[command(about, long_about = None, disable_version_flag = true)]
struct Args {
    /// Directory to back up (relative paths start at $HOME)
    #[arg(short, long, required_unless_present = "config")]
    source: Option<PathBuf>,
    /// Project name used in archive names (default: source directory name)
    #[arg(short, long)]
    project: Option<String>,
    /// Destination directory (relative paths start at $HOME)
    #[arg(short, long, env = "BACKUP_DEFAULT_DEST", default_value = "~/backups")]
    dest: PathBuf,
    /// Version put in the archive name, e.g. 1.06
    #[arg(short = 'V', long)]
    version: Option<String>,
    /// Leave the version out of the archive name
    #[arg(long)]
    no_version: bool,
    /// Extra tag put in the archive name, e.g. Frontend_OK
    #[arg(short, long)]
    tag: Option<String>,
    /// Archive format: zip, tar.gz or tgz
    #[arg(long, default_value = "zip")]
    format: String,
    /// Also archive hidden files and directories
    #[arg(long)]
    include_hidden: bool,
    /// Glob of paths to leave out, may be repeated
    #[arg(long)]
    exclude: Vec<String>,
    /// Keep only the N newest archives of this project (0 = off)
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    keep: i64,
    /// Show what would happen without writing anything
    #[arg(long)]
    dry_run: bool,
    /// Do not read the archive back after writing it
    #[arg(long)]
    no_verify: bool,
    /// Do not point <project>_latest at the new archive
    #[arg(long)]
    no_latest_link: bool,
    /// Dropbox folder to upload the archive to. Needs DROPBOX_TOKEN (environment
    /// or .env) or --dropbox-token; without one the local archive is kept and
    /// the run exits with code 3
    #[arg(long)]
    dropbox_path: Option<String>,
    /// Dropbox write mode
    #[arg(long, value_enum, default_value_t = WriteMode::Add)]
    dropbox_mode: WriteMode,
    /// Dropbox access token
    #[arg(long, env = "DROPBOX_TOKEN", hide_env_values = true)]
    dropbox_token: Option<String>,
    /// More logging
    #[arg(short, long)]
    verbose: bool,
    /// Read the whole configuration from a YAML file instead
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn load_yaml_config(path: &Path, dry_run: bool, token: Option<RedactedString>) -> Result<BackupConfig> {
    let config = File::open(path)
        .map_err(Error::from)
        .and_then(|f| serde_yml::from_reader::<_, BackupConfig>(f).map_err(Error::from))
        .add_msg(format!("Parse YAML config failed: {:?}", path))?;
    Ok(config
        .resolve_paths()?
        .force_dry_run(dry_run)
        .with_fallback_token(token))
}

fn config_from_args(args: Args) -> Result<BackupConfig> {
    let token = args
        .dropbox_token
        .filter(|t| !t.is_empty())
        .map(RedactedString::from);
    if let Some(path) = &args.config {
        return load_yaml_config(path, args.dry_run, token);
    }

    let format = args.format.parse::<ArchiveFormat>()?;
    let exclude = args
        .exclude
        .iter()
        .map(|p| p.parse::<ExcludeGlob>())
        .collect::<Result<Vec<_>>>()?;

    let Some(source) = args.source else {
        return Err(Error::invalid_source(PathBuf::new()));
    };
    let source = resolve_from_home(source)?;
    let project = args
        .project
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| default_project_name(&source));
    let version = args.version.filter(|v| !v.is_empty() && !args.no_version);
    let tag = args.tag.filter(|t| !t.is_empty());
    let upload: Option<UploadConfig> = args.dropbox_path.map(|remote_dir| {
        DropboxUploadConfig::builder()
            .remote_dir(remote_dir)
            .mode(args.dropbox_mode)
            .maybe_token(token)
            .build()
            .into()
    });

    Ok(BackupConfig::builder()
        .source(source)
        .destination(resolve_from_home(&args.dest)?)
        .project(project)
        .maybe_version(version)
        .maybe_tag(tag)
        .format(format)
        .exclude(exclude)
        .include_hidden(args.include_hidden)
        .keep(args.keep)
        .dry_run(args.dry_run)
        .verify(!args.no_verify)
        .latest_link(!args.no_latest_link)
        .maybe_upload(upload)
        .build())
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let res = config_from_args(args)
        .add_msg("Invalid configuration")
        .and_then(|bc| {
            bc.validate()
                .map_err(Error::from)
                .map(|_| bc)
                .add_msg("Config validation failed")
        })
        .and_then(|bc| bc.run(Local::now()));

    match res {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::from(&e)
        }
    }
}
