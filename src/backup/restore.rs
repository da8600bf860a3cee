//! Reproducing a backup tree and rebuilding its recorded environments.

use crate::backup::copy::copy_preserving_mtime;
use crate::backup::dependency::RequirementsFile;
use crate::backup::function_path;
use crate::backup::manifest::BackupManifest;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use chrono::{Local, NaiveDate, TimeZone};
use filetime::FileTime;
use function_name::named;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;
use zip::ZipArchive;

/// Environment name used when the requirements carry none.
pub static RESTORED_ENV_NAME: &str = "restored_env";

/// Reproduces `backup` (a directory or `.zip` archive) under `target`.
///
/// `target` is created if missing and must otherwise be empty. Returns the
/// number of files written.
#[named]
pub fn restore_backup<P: AsRef<Path>, Q: AsRef<Path>>(backup: P, target: Q) -> Result<usize> {
    let (backup, target) = (backup.as_ref(), target.as_ref());
    ensure_empty_target(target)?;

    let res = if backup.is_dir() {
        copy_tree(backup, target)
    } else if backup.is_file() {
        extract_archive(backup, target)
    } else {
        Err(Error::NotFound(format!("backup {:?}", backup)))
    };
    let count = res
        .add_msg(format!("Restoring {:?} into {:?} failed", backup, target))
        .add_fn_name(function_path!())?;

    tracing::info!("Restored {} files from {:?} into {:?}", count, backup, target);
    Ok(count)
}

fn ensure_empty_target(target: &Path) -> Result<()> {
    if target.exists() {
        let non_empty = std::fs::read_dir(target)
            .map_err(|e| Error::file_access(target, "list", e))?
            .next()
            .is_some();
        if non_empty {
            return Err(Error::Config(format!(
                "restore target {:?} is not empty",
                target
            )));
        }
    }
    std::fs::create_dir_all(target).map_err(|e| Error::file_access(target, "create", e))
}

fn copy_tree(backup_dir: &Path, target: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in WalkDir::new(backup_dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let dst = target.join(entry.path().strip_prefix(backup_dir)?);
        copy_preserving_mtime(entry.path(), &dst)
            .map_err(|e| Error::file_access(entry.path(), "copy", e))?;
        count += 1;
    }
    Ok(count)
}

fn extract_archive(archive_path: &Path, target: &Path) -> Result<usize> {
    let file =
        File::open(archive_path).map_err(|e| Error::file_access(archive_path, "open", e))?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;

    let mut count = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(Error::Archive(format!(
                "entry {:?} in {:?} escapes the restore target",
                entry.name(),
                archive_path
            )));
        };
        let out_path = target.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)
                .map_err(|e| Error::file_access(&out_path, "create", e))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::file_access(parent, "create", e))?;
        }
        let mut out = File::create(&out_path)
            .map_err(|e| Error::file_access(&out_path, "create", e))?;
        std::io::copy(&mut entry, &mut out)
            .map_err(|e| Error::file_access(&out_path, "extract", e))?;
        drop(out);
        if let Some(mtime) = entry.last_modified().and_then(file_time) {
            filetime::set_file_mtime(&out_path, mtime)
                .map_err(|e| Error::file_access(&out_path, "set mtime", e))?;
        }
        tracing::trace!("Extracted {:?}", out_path);
        count += 1;
    }
    Ok(count)
}

/// Zip entry times are local wall clock time.
fn file_time(time: zip::DateTime) -> Option<FileTime> {
    let local = NaiveDate::from_ymd_opt(
        i32::from(time.year()),
        u32::from(time.month()),
        u32::from(time.day()),
    )?
    .and_hms_opt(
        u32::from(time.hour()),
        u32::from(time.minute()),
        u32::from(time.second()),
    )?;
    let local = Local.from_local_datetime(&local).earliest()?;
    Some(FileTime::from_unix_time(local.timestamp(), 0))
}

/// Requirement listings recorded in the manifest of `backup`.
///
/// With `env_name`, only that environment's listing is returned. A backup
/// without manifest or without a matching listing is [`Error::NotFound`].
pub fn dependency_fragments<P: AsRef<Path>>(
    backup: P,
    env_name: Option<&str>,
) -> Result<Vec<RequirementsFile>> {
    let backup = backup.as_ref();
    let manifest = BackupManifest::load(backup)?;
    let fragments = manifest.dependency_fragment.requirements_for(env_name);
    if fragments.is_empty() {
        return Err(Error::NotFound(match env_name {
            Some(name) => format!("dependencies for environment {name:?} in {:?}", backup),
            None => format!("dependencies in {:?}", backup),
        }));
    }
    Ok(fragments)
}

/// Rebuilds an environment from a requirements listing.
pub trait EnvironmentInstaller {
    /// Returns the location of the created environment.
    fn install(&self, requirements: &RequirementsFile) -> Result<PathBuf>;
}

/// Installs every listing selected by `env_name` from `backup`.
///
/// Without `env_name`, a backup that recorded no packages installs nothing.
pub fn restore_environments<P: AsRef<Path>>(
    backup: P,
    env_name: Option<&str>,
    installer: &dyn EnvironmentInstaller,
) -> Result<Vec<PathBuf>> {
    let backup = backup.as_ref();
    if env_name.is_none() && BackupManifest::load(backup)?.dependency_fragment.is_empty() {
        tracing::warn!("No packages recorded in {:?}, skipping environments", backup);
        return Ok(Vec::new());
    }
    dependency_fragments(backup, env_name)?
        .iter()
        .map(|requirements| installer.install(requirements))
        .collect()
}

/// `python -m venv <venv_root>/<env>` followed by `pip install -r`.
#[derive(Clone, Debug)]
pub struct VenvInstaller {
    python: PathBuf,
    venv_root: PathBuf,
}

impl VenvInstaller {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(python: P, venv_root: Q) -> Self {
        Self {
            python: python.into(),
            venv_root: venv_root.into(),
        }
    }

    /// `~/.virtualenvs`
    pub fn default_venv_root() -> Result<PathBuf> {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".virtualenvs"))
            .ok_or_else(|| Error::Config("cannot determine home directory".to_string()))
    }

    pub fn env_path(&self, requirements: &RequirementsFile) -> PathBuf {
        self.venv_root.join(
            requirements
                .environment
                .as_deref()
                .unwrap_or(RESTORED_ENV_NAME),
        )
    }

    fn pip_path(env_path: &Path) -> PathBuf {
        if cfg!(windows) {
            env_path.join("Scripts").join("pip.exe")
        } else {
            env_path.join("bin").join("pip")
        }
    }
}

fn run_command(command: &mut Command) -> Result<()> {
    let description = format!("{:?}", command);
    tracing::info!("Running {description}");
    let status = command
        .status()
        .map_err(Error::from)
        .add_msg(format!("Starting {description} failed"))?;
    if !status.success() {
        return Err(Error::Install(format!("{description} exited with {status}")));
    }
    Ok(())
}

impl EnvironmentInstaller for VenvInstaller {
    fn install(&self, requirements: &RequirementsFile) -> Result<PathBuf> {
        let env_path = self.env_path(requirements);
        std::fs::create_dir_all(&self.venv_root)
            .map_err(|e| Error::file_access(&self.venv_root, "create", e))?;

        tracing::info!("Creating virtual environment {:?}", env_path);
        run_command(
            Command::new(&self.python)
                .args(["-m", "venv"])
                .arg(&env_path),
        )?;

        let requirements_path = requirements.write_to_dir(&env_path)?;
        tracing::info!("Installing {:?}", requirements_path);
        run_command(
            Command::new(Self::pip_path(&env_path))
                .args(["install", "-r"])
                .arg(&requirements_path),
        )?;

        if cfg!(windows) {
            tracing::info!("Activate with {:?}", env_path.join("Scripts").join("activate"));
        } else {
            tracing::info!("Activate with: source {:?}", env_path.join("bin").join("activate"));
        }
        Ok(env_path)
    }
}
