//! Backups under a destination root: listing, naming, prior-manifest lookup.

use crate::backup::manifest::BackupManifest;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use chrono::{DateTime, NaiveDateTime, TimeDelta, TimeZone};
use std::fmt::Display;
use std::fs::read_dir;
use std::path::{Path, PathBuf};

/// `YYYYMMDD_HHMMSS`, fixed width so name order is chronological order.
pub static BACKUP_NAME_FORMAT: &str = "%Y%m%d_%H%M%S";
pub static ARCHIVE_FILE_EXT: &str = "zip";
/// Suffixes `_01` to `_99` keep same-second runs ordered.
const MAX_NAME_SUFFIX: u32 = 99;
/// How far the newest backup may be ahead of the clock, as after a daylight
/// saving fall-back, before naming refuses to continue.
const MAX_CLOCK_SETBACK: TimeDelta = TimeDelta::hours(1);

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum BackupKind {
    Directory,
    Archive,
}

/// A backup found directly under the destination root.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct BackupEntry {
    /// Directory name, or archive file stem
    pub name: String,
    pub kind: BackupKind,
    pub path: PathBuf,
}

const BACKUP_NAME_LEN: usize = 15;

/// Whether `name` is `YYYYMMDD_HHMMSS` optionally followed by `_NN`.
pub fn is_backup_name(name: &str) -> bool {
    let (Some(stamp), Some(rest)) = (name.get(..BACKUP_NAME_LEN), name.get(BACKUP_NAME_LEN..))
    else {
        return false;
    };
    if NaiveDateTime::parse_from_str(stamp, BACKUP_NAME_FORMAT).is_err() {
        return false;
    }
    match rest.strip_prefix('_') {
        None => rest.is_empty(),
        Some(suffix) => suffix.len() == 2 && suffix.bytes().all(|b| b.is_ascii_digit()),
    }
}

/// Lists backup directories and `.zip` archives directly under `out_dir`.
///
/// Only entries named like [`BACKUP_NAME_FORMAT`] count. A missing `out_dir`
/// has no backups.
pub fn list_backups<P: AsRef<Path>>(out_dir: P) -> Result<Vec<BackupEntry>> {
    let out_dir = out_dir.as_ref();
    if !out_dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for de in read_dir(out_dir)
        .map_err(Error::from)
        .add_msg(format!("Listing backups in {:?} failed", out_dir))?
    {
        let de = de?;
        let path = de.path();
        let file_type = de.file_type()?;
        let candidate = if file_type.is_dir() {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| (n.to_string(), BackupKind::Directory))
        } else if file_type.is_file()
            && path.extension().is_some_and(|ext| ext == ARCHIVE_FILE_EXT)
        {
            path.file_stem()
                .and_then(|n| n.to_str())
                .map(|n| (n.to_string(), BackupKind::Archive))
        } else {
            None
        };

        match candidate {
            Some((name, kind)) if is_backup_name(&name) => {
                entries.push(BackupEntry { name, kind, path })
            }
            _ => tracing::trace!("Ignoring non backup entry {:?}", path),
        }
    }

    Ok(entries)
}

/// Finds the newest readable manifest under `out_dir`.
///
/// Backups are tried from the greatest name down. For equal names the
/// directory is read before the archive. Backups whose manifest is missing or
/// malformed (an interrupted run, for example) are skipped.
pub fn find_latest_manifest<P: AsRef<Path>>(
    out_dir: P,
) -> Result<Option<(BackupEntry, BackupManifest)>> {
    let mut entries = list_backups(out_dir)?;
    entries.sort_by(|a, b| b.name.cmp(&a.name).then(a.kind.cmp(&b.kind)));

    for entry in entries {
        match BackupManifest::load(&entry.path) {
            Ok(manifest) => {
                tracing::info!("Using {:?} as previous backup", entry.path);
                return Ok(Some((entry, manifest)));
            }
            Err(e) => {
                tracing::warn!("Skipping {:?} as previous backup: {e}", entry.path);
            }
        }
    }

    tracing::info!("No previous backup found, every file is new");
    Ok(None)
}

/// Name for a backup created at `dt`.
///
/// The result is strictly greater than every existing backup name. Runs
/// within the same second get a `_NN` suffix. When the newest backup is less
/// than an hour ahead of `dt`, the new name continues its suffixes instead.
/// A clock further behind is an error.
pub fn next_backup_name<P, T>(out_dir: P, dt: &DateTime<T>) -> Result<String>
where
    P: AsRef<Path>,
    T: TimeZone,
    T::Offset: Display,
{
    let base = dt.format(BACKUP_NAME_FORMAT).to_string();
    let newest = list_backups(out_dir.as_ref())?
        .into_iter()
        .map(|e| e.name)
        .max();

    let Some(newest) = newest else {
        return Ok(base);
    };
    if base > newest {
        return Ok(base);
    }
    let base = if newest.starts_with(&base) {
        base
    } else {
        let newest_stamp = newest
            .get(..BACKUP_NAME_LEN)
            .and_then(|stamp| NaiveDateTime::parse_from_str(stamp, BACKUP_NAME_FORMAT).ok());
        match newest_stamp {
            Some(stamp) if stamp - dt.naive_local() < MAX_CLOCK_SETBACK => {
                tracing::warn!("Clock is behind newest backup {newest:?}, continuing its name");
                stamp.format(BACKUP_NAME_FORMAT).to_string()
            }
            _ => {
                return Err(Error::Config(format!(
                    "clock is behind newest backup {newest:?} in {:?} by an hour or more, \
                     refusing to create {base:?}",
                    out_dir.as_ref()
                )))
            }
        }
    };

    (1..=MAX_NAME_SUFFIX)
        .map(|n| format!("{base}_{n:02}"))
        .find(|candidate| *candidate > newest)
        .ok_or_else(|| {
            Error::Config(format!(
                "more than {MAX_NAME_SUFFIX} backups named {base:?} in {:?}",
                out_dir.as_ref()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::manifest::tests::sample_manifest;
    use crate::backup::manifest::MANIFEST_FILE_NAME;
    use chrono::{Local, NaiveDate};
    use tempfile::TempDir;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
            .and_local_timezone(Local)
            .unwrap()
    }

    fn write_backup(out_dir: &Path, name: &str, description: &str) {
        let dir = out_dir.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        let mut manifest = sample_manifest();
        manifest.description = description.to_string();
        manifest.write_to_dir(&dir).unwrap();
    }

    #[test]
    fn test_list_backups_dirs_and_archives_only() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("20240101_000000")).unwrap();
        std::fs::write(temp_dir.path().join("20240102_000000.zip"), "zip").unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), "x").unwrap();
        std::fs::write(temp_dir.path().join("notes.zip"), "x").unwrap();
        std::fs::create_dir(temp_dir.path().join("zz_keep_me")).unwrap();

        let mut entries = list_backups(temp_dir.path()).unwrap();
        entries.sort();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "20240101_000000");
        assert_eq!(entries[0].kind, BackupKind::Directory);
        assert_eq!(entries[1].name, "20240102_000000");
        assert_eq!(entries[1].kind, BackupKind::Archive);
    }

    #[test]
    fn test_is_backup_name() {
        assert!(is_backup_name("20240501_090807"));
        assert!(is_backup_name("20240501_090807_03"));
        assert!(!is_backup_name("20240501_090807_3"));
        assert!(!is_backup_name("20241301_090807"));
        assert!(!is_backup_name("backup"));
        assert!(!is_backup_name("20240501_090807.tmp"));
    }

    #[test]
    fn test_list_backups_missing_out_dir() {
        let temp_dir = TempDir::new().unwrap();
        assert!(list_backups(temp_dir.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_find_latest_manifest_picks_greatest_name() {
        let temp_dir = TempDir::new().unwrap();
        write_backup(temp_dir.path(), "20240101_000000", "old");
        write_backup(temp_dir.path(), "20240301_000000", "new");
        write_backup(temp_dir.path(), "20240201_000000", "middle");

        let (entry, manifest) = find_latest_manifest(temp_dir.path()).unwrap().unwrap();
        assert_eq!(entry.name, "20240301_000000");
        assert_eq!(manifest.description, "new");
    }

    #[test]
    fn test_find_latest_manifest_skips_partial_and_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        write_backup(temp_dir.path(), "20240101_000000", "valid");
        std::fs::create_dir(temp_dir.path().join("20240301_000000")).unwrap();
        let corrupt = temp_dir.path().join("20240201_000000");
        std::fs::create_dir(&corrupt).unwrap();
        std::fs::write(corrupt.join(MANIFEST_FILE_NAME), "{").unwrap();
        std::fs::write(temp_dir.path().join("20240401_000000.zip"), "not a zip").unwrap();

        let (entry, manifest) = find_latest_manifest(temp_dir.path()).unwrap().unwrap();
        assert_eq!(entry.name, "20240101_000000");
        assert_eq!(manifest.description, "valid");
    }

    #[test]
    fn test_find_latest_manifest_none() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("20240301_000000")).unwrap();
        assert!(find_latest_manifest(temp_dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_next_backup_name_plain() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(
            next_backup_name(temp_dir.path(), &at(9, 8, 7)).unwrap(),
            "20240501_090807"
        );

        std::fs::create_dir(temp_dir.path().join("20240501_090807")).unwrap();
        assert_eq!(
            next_backup_name(temp_dir.path(), &at(9, 8, 8)).unwrap(),
            "20240501_090808"
        );
    }

    #[test]
    fn test_next_backup_name_same_second_gets_suffix() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("20240501_090807")).unwrap();
        assert_eq!(
            next_backup_name(temp_dir.path(), &at(9, 8, 7)).unwrap(),
            "20240501_090807_01"
        );

        std::fs::write(temp_dir.path().join("20240501_090807_01.zip"), "zip").unwrap();
        let name = next_backup_name(temp_dir.path(), &at(9, 8, 7)).unwrap();
        assert_eq!(name, "20240501_090807_02");
        assert!(name.as_str() > "20240501_090807_01");
    }

    #[test]
    fn test_next_backup_name_after_clock_fall_back() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("20240501_093000")).unwrap();
        assert_eq!(
            next_backup_name(temp_dir.path(), &at(9, 0, 0)).unwrap(),
            "20240501_093000_01"
        );

        std::fs::create_dir(temp_dir.path().join("20240501_093000_01")).unwrap();
        assert_eq!(
            next_backup_name(temp_dir.path(), &at(9, 0, 1)).unwrap(),
            "20240501_093000_02"
        );
    }

    #[test]
    fn test_next_backup_name_clock_far_behind() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("20240501_110000")).unwrap();
        let err = next_backup_name(temp_dir.path(), &at(9, 0, 0)).unwrap_err();
        assert!(matches!(&err, Error::Config(msg) if msg.contains("an hour or more")));
    }

    #[test]
    fn test_next_backup_name_clock_behind() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("20240501_100000")).unwrap();
        assert!(matches!(
            next_backup_name(temp_dir.path(), &at(9, 0, 0)),
            Err(Error::Config(_))
        ));
    }
}
