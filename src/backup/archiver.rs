use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::source_filter::relative_path_string;
use crate::backup::store::ARCHIVE_FILE_EXT;
use chrono::{DateTime, Datelike, Local, Timelike};
use function_name::named;
use std::fs::File;
use std::io::{BufWriter, IntoInnerError};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// `<backup_dir>.zip`
pub fn archive_path_for<P: AsRef<Path>>(backup_dir: P) -> PathBuf {
    let backup_dir = backup_dir.as_ref();
    let mut name = backup_dir.as_os_str().to_os_string();
    name.push(".");
    name.push(ARCHIVE_FILE_EXT);
    PathBuf::from(name)
}

/// Zips every file under `backup_dir` into `<backup_dir>.zip`.
///
/// Entry names are relative to `backup_dir` so extraction reproduces the
/// tree. The archive is written to a temporary file next to the directory and
/// renamed into place once complete. `backup_dir` is removed only when
/// `keep_original` is false and the rename succeeded.
#[named]
pub fn compress_backup<P: AsRef<Path>>(backup_dir: P, keep_original: bool) -> Result<PathBuf> {
    let backup_dir = backup_dir.as_ref();
    if backup_dir.as_os_str().is_empty() {
        return Err(Error::Archive(
            "backup directory path must not be empty".to_string(),
        ));
    }
    if !backup_dir.is_dir() {
        return Err(Error::Archive(format!(
            "{:?} is not a directory",
            backup_dir
        )));
    }

    let zip_path = archive_path_for(backup_dir);
    let parent = match zip_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    tracing::info!("Compressing {:?} into {:?}", backup_dir, zip_path);
    let file_count = write_archive(backup_dir, &parent, &zip_path)
        .add_msg(format!("Archiving {:?} failed", backup_dir))
        .add_fn_name(function_path!())?;
    tracing::info!("Wrote {} files to {:?}", file_count, zip_path);

    if !keep_original {
        std::fs::remove_dir_all(backup_dir)
            .map_err(|e| Error::file_access(backup_dir, "remove", e))?;
        tracing::info!("Removed uncompressed backup {:?}", backup_dir);
    }

    Ok(zip_path)
}

fn write_archive(backup_dir: &Path, tmp_dir: &Path, zip_path: &Path) -> Result<usize> {
    let mut tmp = NamedTempFile::new_in(tmp_dir)?;
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(BufWriter::new(tmp.as_file_mut()));

    let mut file_count = 0;
    for entry in WalkDir::new(backup_dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = relative_path_string(entry.path().strip_prefix(backup_dir)?) else {
            return Err(Error::Archive(format!(
                "{:?} is not a valid UTF-8 entry name",
                entry.path()
            )));
        };
        let entry_options = match entry.metadata()?.modified().ok().and_then(zip_time) {
            Some(time) => options.last_modified_time(time),
            None => options,
        };
        tracing::trace!("Adding {:?} as {:?}", entry.path(), name);
        writer.start_file(name, entry_options)?;
        let mut src = File::open(entry.path())
            .map_err(|e| Error::file_access(entry.path(), "archive", e))?;
        std::io::copy(&mut src, &mut writer)
            .map_err(|e| Error::file_access(entry.path(), "archive", e))?;
        file_count += 1;
    }

    writer
        .finish()?
        .into_inner()
        .map_err(IntoInnerError::into_error)?
        .sync_all()?;

    tmp.persist(zip_path).map_err(|e| Error::from(e.error))?;
    Ok(file_count)
}

/// Zip stores local wall clock time with 2 second resolution, from 1980 on.
fn zip_time(modified: SystemTime) -> Option<zip::DateTime> {
    let local = DateTime::<Local>::from(modified);
    let year = u16::try_from(local.year()).ok()?;
    zip::DateTime::from_date_and_time(
        year,
        local.month() as u8,
        local.day() as u8,
        local.hour() as u8,
        local.minute() as u8,
        local.second() as u8,
    )
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;
    use zip::ZipArchive;

    fn create_backup_dir(root: &Path) -> PathBuf {
        let dir = root.join("20240501_090807");
        std::fs::create_dir_all(dir.join("pkg/sub")).unwrap();
        std::fs::write(dir.join("main.py"), "print('main')").unwrap();
        std::fs::write(dir.join("pkg/sub/util.py"), "x = 1").unwrap();
        std::fs::write(dir.join("backup_info.json"), "{}").unwrap();
        dir
    }

    fn archive_contents(zip_path: &Path) -> Vec<(String, String)> {
        let mut archive = ZipArchive::new(File::open(zip_path).unwrap()).unwrap();
        let mut contents = Vec::new();
        for i in 0..archive.len() {
            let mut file = archive.by_index(i).unwrap();
            let mut content = String::new();
            file.read_to_string(&mut content).unwrap();
            contents.push((file.name().to_string(), content));
        }
        contents
    }

    #[test]
    fn test_archive_path_for() {
        assert_eq!(
            archive_path_for("/out/20240501_090807"),
            PathBuf::from("/out/20240501_090807.zip")
        );
    }

    #[test]
    fn test_compress_keeps_relative_paths() {
        let temp_dir = TempDir::new().unwrap();
        let dir = create_backup_dir(temp_dir.path());

        let zip_path = compress_backup(&dir, true).unwrap();

        assert_eq!(zip_path, temp_dir.path().join("20240501_090807.zip"));
        assert!(dir.is_dir());
        assert_eq!(
            archive_contents(&zip_path),
            vec![
                ("backup_info.json".to_string(), "{}".to_string()),
                ("main.py".to_string(), "print('main')".to_string()),
                ("pkg/sub/util.py".to_string(), "x = 1".to_string()),
            ]
        );
    }

    #[test]
    fn test_compress_removes_original_when_asked() {
        let temp_dir = TempDir::new().unwrap();
        let dir = create_backup_dir(temp_dir.path());

        let zip_path = compress_backup(&dir, false).unwrap();

        assert!(zip_path.is_file());
        assert!(!dir.exists());
        let leftovers: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(leftovers, vec![zip_path]);
    }

    #[test]
    fn test_compress_records_modification_time() {
        let temp_dir = TempDir::new().unwrap();
        let dir = create_backup_dir(temp_dir.path());
        let mtime = filetime::FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(dir.join("main.py"), mtime).unwrap();

        let zip_path = compress_backup(&dir, true).unwrap();

        let mut archive = ZipArchive::new(File::open(zip_path).unwrap()).unwrap();
        let entry = archive.by_name("main.py").unwrap();
        let stored = entry.last_modified().unwrap();
        let expected = DateTime::<Local>::from(
            std::time::UNIX_EPOCH + std::time::Duration::from_secs(1_600_000_000),
        );
        assert_eq!(i32::from(stored.year()), expected.year());
        assert_eq!(u32::from(stored.month()), expected.month());
        assert_eq!(u32::from(stored.day()), expected.day());
        assert_eq!(u32::from(stored.hour()), expected.hour());
        assert_eq!(u32::from(stored.minute()), expected.minute());
        assert_eq!(u32::from(stored.second()), expected.second());
    }

    #[test]
    fn test_compress_empty_path_fails() {
        assert!(matches!(compress_backup("", false), Err(Error::Archive(_))));
    }

    #[test]
    fn test_compress_missing_dir_fails_without_output() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("20240501_090807");

        assert!(matches!(compress_backup(&missing, false), Err(Error::Archive(_))));
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }
}
