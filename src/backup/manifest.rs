//! Manifest schema (`backup_info.json`) and its reading/writing.

use crate::backup::dependency::DependencyFragment;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

pub static MANIFEST_FILE_NAME: &str = "backup_info.json";
pub static ENVIRONMENT_FILE_NAME: &str = "environment_info.json";
pub static RECORD_FILE_NAME: &str = "backup_record.md";

pub(crate) mod manifest_time {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub static FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(dt: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&dt.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&s, FORMAT).map_err(serde::de::Error::custom)
    }
}

/// One tracked file of a backup run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileRecord {
    #[serde(rename = "path")]
    pub relative_path: String,
    #[serde(rename = "type")]
    pub extension: String,
    #[serde(rename = "size")]
    pub size_bytes: u64,
    #[serde(rename = "hash")]
    pub content_hash: String,
    #[serde(rename = "modified", with = "manifest_time")]
    pub modified_at: NaiveDateTime,
    pub changed_since_last_backup: bool,
}

/// Record of one backup run. Written once, never modified afterwards.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BackupManifest {
    #[serde(rename = "timestamp", with = "manifest_time")]
    pub created_at: NaiveDateTime,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub files: Vec<FileRecord>,
    #[serde(rename = "statistics", default)]
    pub extension_counts: BTreeMap<String, usize>,
    #[serde(rename = "exclude_folders", default)]
    pub excluded_directories: Vec<String>,
    #[serde(flatten)]
    pub dependency_fragment: DependencyFragment,
}

impl BackupManifest {
    /// Relative path to content hash, as used for change detection.
    pub fn hashes_by_path(&self) -> HashMap<String, String> {
        self.files
            .iter()
            .map(|f| (f.relative_path.clone(), f.content_hash.clone()))
            .collect()
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }

    pub fn changed_count(&self) -> usize {
        self.files
            .iter()
            .filter(|f| f.changed_since_last_backup)
            .count()
    }

    pub fn write_to_dir<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf> {
        let path = dir.as_ref().join(MANIFEST_FILE_NAME);
        write_json(&path, self)?;
        tracing::debug!("Wrote manifest {:?}", path);
        Ok(path)
    }

    pub fn from_reader<R: Read>(reader: R, origin: &Path) -> Result<Self> {
        serde_json::from_reader(reader).map_err(|e| Error::ManifestCorrupt {
            path: origin.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn load_from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let path = dir.as_ref().join(MANIFEST_FILE_NAME);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("{:?}", path)))
            }
            Err(e) => {
                return Err(Error::ManifestCorrupt {
                    path,
                    reason: e.to_string(),
                })
            }
        };
        Self::from_reader(BufReader::new(file), &path)
    }

    pub fn load_from_archive<P: AsRef<Path>>(archive_path: P) -> Result<Self> {
        let archive_path = archive_path.as_ref();
        let corrupt = |reason: String| Error::ManifestCorrupt {
            path: archive_path.to_path_buf(),
            reason,
        };
        let file = File::open(archive_path).map_err(|e| corrupt(e.to_string()))?;
        let mut archive = ZipArchive::new(BufReader::new(file)).map_err(|e| corrupt(e.to_string()))?;
        let entry = match archive.by_name(MANIFEST_FILE_NAME) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(Error::NotFound(format!(
                    "{} in {:?}",
                    MANIFEST_FILE_NAME, archive_path
                )))
            }
            Err(e) => return Err(corrupt(e.to_string())),
        };
        Self::from_reader(entry, archive_path)
    }

    /// Loads from a backup directory or a `.zip` archive.
    pub fn load<P: AsRef<Path>>(location: P) -> Result<Self> {
        let location = location.as_ref();
        if location.is_dir() {
            Self::load_from_dir(location)
        } else if location.is_file() {
            Self::load_from_archive(location)
        } else {
            Err(Error::NotFound(format!("backup {:?}", location)))
        }
    }
}

pub(crate) fn write_json<T: Serialize, P: AsRef<Path>>(path: P, value: &T) -> Result<()> {
    let path = path.as_ref();
    let mut writer = File::create(path)
        .map(BufWriter::new)
        .map_err(|e| Error::file_access(path, "create", e))?;
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer
        .flush()
        .map_err(|e| Error::file_access(path, "write", e))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backup::dependency::PackageRecord;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn sample_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(14, 5, 7)
            .unwrap()
    }

    pub(crate) fn sample_manifest() -> BackupManifest {
        BackupManifest {
            created_at: sample_time(),
            description: "nightly".to_string(),
            tags: vec!["ci".to_string()],
            files: vec![FileRecord {
                relative_path: "pkg/a.py".to_string(),
                extension: ".py".to_string(),
                size_bytes: 12,
                content_hash: "ab".repeat(32),
                modified_at: sample_time(),
                changed_since_last_backup: true,
            }],
            extension_counts: BTreeMap::from([(".py".to_string(), 1), (".md".to_string(), 0)]),
            excluded_directories: vec!["__pycache__".to_string()],
            dependency_fragment: DependencyFragment {
                environment: serde_json::json!({"platform": "linux"}),
                packages: vec![PackageRecord {
                    name: "numpy".to_string(),
                    version: "1.26.4".to_string(),
                    location: None,
                    environment: None,
                }],
            },
        }
    }

    #[test]
    fn test_manifest_field_names() {
        let value = serde_json::to_value(sample_manifest()).unwrap();

        assert_eq!(value["timestamp"], "2024-03-09 14:05:07");
        assert_eq!(value["files"][0]["path"], "pkg/a.py");
        assert_eq!(value["files"][0]["type"], ".py");
        assert_eq!(value["files"][0]["size"], 12);
        assert_eq!(value["files"][0]["modified"], "2024-03-09 14:05:07");
        assert_eq!(value["files"][0]["changed_since_last_backup"], true);
        assert_eq!(value["statistics"][".py"], 1);
        assert_eq!(value["exclude_folders"][0], "__pycache__");
        assert_eq!(value["environment"]["platform"], "linux");
        assert_eq!(value["packages"][0]["name"], "numpy");
    }

    #[test]
    fn test_write_then_load_from_dir() {
        let temp_dir = TempDir::new().unwrap();
        let manifest = sample_manifest();

        let path = manifest.write_to_dir(temp_dir.path()).unwrap();
        assert_eq!(path, temp_dir.path().join(MANIFEST_FILE_NAME));
        assert_eq!(BackupManifest::load(temp_dir.path()).unwrap(), manifest);
    }

    #[test]
    fn test_load_accepts_extra_package_fields() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join(MANIFEST_FILE_NAME),
            r#"{"timestamp": "2024-01-01 00:00:00", "description": "", "tags": [],
                "files": [], "statistics": {}, "exclude_folders": [],
                "environment": {"python_version": "3.11"},
                "packages": [{"name": "a", "version": "1", "location": "/x", "environment": "lab", "extra": 1}]}"#,
        )
        .unwrap();

        let manifest = BackupManifest::load_from_dir(temp_dir.path()).unwrap();
        assert_eq!(
            manifest.dependency_fragment.packages[0].environment.as_deref(),
            Some("lab")
        );
    }

    #[test]
    fn test_load_missing_manifest_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        assert!(matches!(
            BackupManifest::load_from_dir(temp_dir.path()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_load_malformed_manifest_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(MANIFEST_FILE_NAME), "{ truncated").unwrap();

        assert!(matches!(
            BackupManifest::load_from_dir(temp_dir.path()),
            Err(Error::ManifestCorrupt { .. })
        ));
    }

    #[test]
    fn test_load_from_archive() {
        let temp_dir = TempDir::new().unwrap();
        let zip_path = temp_dir.path().join("20240309_140507.zip");
        let manifest = sample_manifest();
        {
            let mut writer = zip::ZipWriter::new(File::create(&zip_path).unwrap());
            writer
                .start_file(MANIFEST_FILE_NAME, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer
                .write_all(&serde_json::to_vec(&manifest).unwrap())
                .unwrap();
            writer.finish().unwrap();
        }

        assert_eq!(BackupManifest::load(&zip_path).unwrap(), manifest);
    }

    #[test]
    fn test_derived_values() {
        let manifest = sample_manifest();
        assert_eq!(manifest.total_size(), 12);
        assert_eq!(manifest.changed_count(), 1);
        assert_eq!(
            manifest.hashes_by_path().get("pkg/a.py"),
            Some(&"ab".repeat(32))
        );
    }
}
