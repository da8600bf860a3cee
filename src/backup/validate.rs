//! Validation functions for configuration values.
//!
//! Used as `validator` custom functions on [`BackupConfig`] fields.
//!
//! [`BackupConfig`]: crate::backup::backup_config::BackupConfig

use sanitize_filename::{is_sanitized, sanitize};
use validator::ValidationError;

use std::path::Path;

pub fn validate_dir_exist<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ValidationError::new("InvalidDirectory")
                .with_message(format!("{:?} is not a directory", dir).into()));
        }
    } else {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("{:?} not found", dir).into()));
    }

    Ok(())
}

/// The destination root may not exist yet, but must not be an existing file.
pub fn validate_target_dir<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.as_os_str().is_empty() {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message("target_directory must not be empty".into()));
    }
    if dir.exists() && !dir.is_dir() {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("{:?} is not a directory", dir).into()));
    }

    Ok(())
}

pub fn validate_file_types<S: AsRef<str>>(file_types: &[S]) -> Result<(), ValidationError> {
    if file_types.is_empty() {
        return Err(ValidationError::new("InvalidFileTypes")
            .with_message("file_types must not be empty".into()));
    }
    if let Some(bad) = file_types
        .iter()
        .map(AsRef::as_ref)
        .find(|t| t.trim().trim_start_matches('.').is_empty() || t.contains(['/', '\\']))
    {
        return Err(ValidationError::new("InvalidFileTypes")
            .with_message(format!("Invalid file type {bad:?}").into()));
    }

    Ok(())
}

/// Environment names end up in `requirements_<name>.txt`.
pub fn validate_env_names<S: AsRef<str>>(names: &[S]) -> Result<(), ValidationError> {
    for name in names.iter().map(AsRef::as_ref) {
        if name.is_empty() || !is_sanitized(name) {
            return Err(ValidationError::new("InvalidEnvName").with_message(
                format!(
                    "Invalid environment name {name:?}, try sanitizing like {:?}",
                    sanitize(name)
                )
                .into(),
            ));
        }
    }

    Ok(())
}
