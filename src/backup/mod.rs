pub mod archiver;
pub mod backup_config;
pub mod change;
pub mod copy;
pub mod dependency;
pub mod engine;
pub mod hasher;
pub mod manifest;
pub mod restore;
pub mod result_error;
pub mod retention;
pub mod source_filter;
pub mod store;
pub mod validate;
pub mod view;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
