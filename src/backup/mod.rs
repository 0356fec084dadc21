pub mod archive;
pub mod backup_config;
pub mod file_ext;
pub mod finish;
pub mod format;
pub mod latest_link;
pub mod naming;
pub mod pack;
pub mod redacted;
pub mod result_error;
pub mod retention;
pub mod upload;
pub mod validate;
pub mod verify;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
