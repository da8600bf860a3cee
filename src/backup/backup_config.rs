use crate::backup::copy::RetryPolicy;
use crate::backup::dependency::{DependencySnapshot, NoDependencies, PipSnapshot};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use crate::backup::retention::RetentionConfig;
use crate::backup::source_filter::SourceFilter;
use crate::backup::validate::{
    validate_dir_exist, validate_env_names, validate_file_types, validate_target_dir,
};
use bon::Builder;
use getset::{CopyGetters, Getters, Setters};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fs::File;
use std::path::{Path, PathBuf};
use validator::Validate;

/// Source file types tracked when `file_types` is not configured.
pub static DEFAULT_FILE_TYPES: [&str; 16] = [
    ".py", ".md", ".txt", ".json", ".yml", ".yaml", ".js", ".html", ".css", ".sql", ".sh",
    ".bat", ".ini", ".conf", ".xml", ".toml",
];
static DEFAULT_KEEP_COUNT: usize = 5;

/// Interpreter used when none is configured
#[cfg(windows)]
pub static DEFAULT_PYTHON: &str = "python";
#[cfg(not(windows))]
pub static DEFAULT_PYTHON: &str = "python3";

fn default_file_types() -> Vec<String> {
    DEFAULT_FILE_TYPES.iter().map(|s| s.to_string()).collect()
}

fn default_keep_count() -> usize {
    DEFAULT_KEEP_COUNT
}

fn default_true() -> bool {
    true
}

/// Settings of one backup job, loaded from a YAML or JSON file.
#[skip_serializing_none]
#[derive(
    Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters, CopyGetters, Setters,
)]
pub struct BackupConfig {
    #[validate(custom(function = validate_dir_exist))]
    #[builder(into)]
    #[getset(get = "pub")]
    source_directory: PathBuf,

    /// Destination root, created on the first run
    #[validate(custom(function = validate_target_dir))]
    #[builder(into)]
    #[getset(get = "pub")]
    target_directory: PathBuf,

    #[serde(default)]
    #[builder(default, into)]
    #[getset(get = "pub", set = "pub")]
    description: String,

    #[serde(default)]
    #[builder(default)]
    #[getset(get = "pub", set = "pub")]
    tags: Vec<String>,

    /// Directory names pruned wherever they occur
    #[serde(default)]
    #[builder(default)]
    #[getset(get = "pub")]
    exclude_folders: Vec<String>,

    #[validate(custom(function = validate_file_types))]
    #[serde(default = "default_file_types")]
    #[builder(default = default_file_types())]
    #[getset(get = "pub")]
    file_types: Vec<String>,

    /// Environments whose packages are recorded, matched against install
    /// locations
    #[validate(custom(function = validate_env_names))]
    #[serde(default)]
    #[builder(default)]
    #[getset(get = "pub")]
    env_info_name: Vec<String>,

    /// Interpreter whose packages are recorded
    #[builder(into)]
    #[getset(get = "pub")]
    python: Option<PathBuf>,

    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub", set = "pub")]
    compress_backup: bool,

    /// Keep the backup directory next to its archive
    #[serde(default = "default_true")]
    #[builder(default = true)]
    #[getset(get_copy = "pub")]
    keep_original: bool,

    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    cleanup_enabled: bool,

    #[validate(range(min = 1))]
    #[serde(default = "default_keep_count")]
    #[builder(default = DEFAULT_KEEP_COUNT)]
    #[getset(get_copy = "pub")]
    keep_count: usize,

    #[validate(nested)]
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    copy_retry: RetryPolicy,
}

impl BackupConfig {
    /// Parses and validates a config file. JSON is accepted as YAML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config = File::open(path)
            .map_err(|e| Error::file_access(path, "open config", e))
            .and_then(|f| {
                serde_yml::from_reader::<_, BackupConfig>(f)
                    .map_err(Error::from)
                    .add_msg(format!("Parse config failed: {:?}", path))
            })?;
        config
            .validate()
            .map_err(Error::from)
            .add_msg(format!("Config validation failed: {:?}", path))?;
        tracing::debug!("Loaded config {:?}: {:?}", path, config);
        Ok(config)
    }

    /// The target directory is pruned so a target inside the source is
    /// never backed up into itself.
    pub fn source_filter(&self) -> SourceFilter {
        SourceFilter::new(
            &self.source_directory,
            &self.file_types,
            self.exclude_folders.iter().cloned(),
        )
        .prune_path(&self.target_directory)
    }

    /// Retention to apply after a run, `None` when cleanup is disabled.
    pub fn retention(&self) -> Option<RetentionConfig> {
        self.cleanup_enabled
            .then(|| RetentionConfig::builder().keep_count(self.keep_count).build())
    }

    /// Pip snapshot when an interpreter or environment names are configured,
    /// an empty fragment otherwise.
    pub fn dependency_snapshot(&self) -> Box<dyn DependencySnapshot> {
        if self.python.is_none() && self.env_info_name.is_empty() {
            return Box::new(NoDependencies);
        }
        let python = self
            .python
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PYTHON));
        let env_names = self.env_info_name.iter().map(|n| n.to_lowercase());
        Box::new(PipSnapshot::new(python, env_names))
    }
}
