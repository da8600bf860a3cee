//! One incremental backup run, and the archive/retention steps that follow it.

use crate::backup::archiver::compress_backup;
use crate::backup::backup_config::BackupConfig;
use crate::backup::change::{ChangeSummary, PriorHashes};
use crate::backup::copy::copy_with_retry;
use crate::backup::dependency::{DependencySnapshot, EnvironmentInfo};
use crate::backup::function_path;
use crate::backup::hasher::hash_file;
use crate::backup::manifest::{
    write_json, BackupManifest, FileRecord, ENVIRONMENT_FILE_NAME, RECORD_FILE_NAME,
};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddDebugObjectAndFnName, AddFunctionName, AddMsg};
use crate::backup::source_filter::{normalize_extensions, CandidateFile};
use crate::backup::store::{find_latest_manifest, next_backup_name};
use crate::backup::view::render_record;
use chrono::{DateTime, Local, SubsecRound};
use function_name::named;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Result of [`BackupEngine::run`].
#[derive(Clone, Debug)]
pub struct BackupOutcome {
    pub backup_dir: PathBuf,
    pub manifest: BackupManifest,
    pub summary: ChangeSummary,
}

/// Result of [`BackupEngine::execute`].
#[derive(Clone, Debug)]
pub struct BackupReport {
    pub outcome: BackupOutcome,
    /// Archive written when compression is enabled
    pub archive: Option<PathBuf>,
    /// Backups deleted by retention
    pub removed: Vec<PathBuf>,
}

impl BackupReport {
    /// Where the backup ended up: the archive if the directory was removed.
    pub fn location(&self) -> &Path {
        match &self.archive {
            Some(archive) if !self.outcome.backup_dir.exists() => archive,
            _ => &self.outcome.backup_dir,
        }
    }
}

pub struct BackupEngine {
    config: BackupConfig,
    snapshot: Box<dyn DependencySnapshot>,
}

impl BackupEngine {
    pub fn new(config: BackupConfig, snapshot: Box<dyn DependencySnapshot>) -> Self {
        Self { config, snapshot }
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Backup, then archive and retention as configured.
    ///
    /// Retention only runs once archiving succeeded.
    #[named]
    pub fn execute(&self) -> Result<BackupReport> {
        let outcome = self.run()?;

        let archive = if self.config.compress_backup() {
            Some(
                compress_backup(&outcome.backup_dir, self.config.keep_original())
                    .add_debug_object_and_fn_name(
                        outcome.backup_dir.clone(),
                        function_path!(),
                    )?,
            )
        } else {
            None
        };

        let removed = match self.config.retention() {
            Some(retention) => retention
                .cleanup(self.config.target_directory())
                .add_msg("Removing old backups failed")
                .add_fn_name(function_path!())?,
            None => Vec::new(),
        };

        Ok(BackupReport {
            outcome,
            archive,
            removed,
        })
    }

    pub fn run(&self) -> Result<BackupOutcome> {
        self.run_at(Local::now())
    }

    /// Runs one backup stamped with `now`.
    ///
    /// The first file that cannot be hashed or copied aborts the run. The
    /// partially filled backup directory is left without a manifest.
    #[named]
    pub fn run_at(&self, now: DateTime<Local>) -> Result<BackupOutcome> {
        let filter = self.config.source_filter();
        let candidates = filter.candidates().add_fn_name(function_path!())?;

        let target_dir = self.config.target_directory();
        std::fs::create_dir_all(target_dir)
            .map_err(|e| Error::file_access(target_dir, "create", e))?;

        let prior = find_latest_manifest(target_dir)?
            .map(|(_, manifest)| PriorHashes::from(&manifest))
            .unwrap_or_default();
        tracing::debug!("Previous backup tracks {} files", prior.len());

        let name = next_backup_name(target_dir, &now)?;
        let backup_dir = target_dir.join(&name);
        std::fs::create_dir(&backup_dir)
            .map_err(|e| Error::file_access(&backup_dir, "create", e))?;
        tracing::info!("Creating backup {:?}", backup_dir);

        let mut files = Vec::new();
        let mut summary = ChangeSummary::default();
        for candidate in candidates {
            let candidate = candidate.add_fn_name(function_path!())?;
            let record = self
                .backup_file(&candidate, &backup_dir, &prior, &mut summary)
                .add_msg(format!("Backing up {:?} failed", candidate.relative_path))?;
            files.push(record);
        }

        let mut extension_counts: BTreeMap<String, usize> =
            normalize_extensions(self.config.file_types())
                .into_iter()
                .map(|ext| (ext, 0))
                .collect();
        for file in &files {
            *extension_counts.entry(file.extension.clone()).or_default() += 1;
        }

        let dependency_fragment = self
            .snapshot
            .snapshot()
            .add_msg("Capturing dependencies failed")?;

        let mut excluded_directories = self.config.exclude_folders().clone();
        excluded_directories.sort();
        excluded_directories.dedup();

        let manifest = BackupManifest {
            created_at: now.naive_local().trunc_subsecs(0),
            description: self.config.description().clone(),
            tags: self.config.tags().clone(),
            files,
            extension_counts,
            excluded_directories,
            dependency_fragment,
        };

        for requirements in manifest.dependency_fragment.requirements() {
            requirements.write_to_dir(&backup_dir)?;
        }
        write_json(
            backup_dir.join(ENVIRONMENT_FILE_NAME),
            &EnvironmentInfo::from(&manifest.dependency_fragment),
        )?;
        let record_path = backup_dir.join(RECORD_FILE_NAME);
        std::fs::write(&record_path, render_record(&manifest, &summary))
            .map_err(|e| Error::file_access(&record_path, "write", e))?;
        manifest.write_to_dir(&backup_dir)?;

        tracing::info!(
            "Backup {:?} complete: {} files, {} new, {} modified, {} unchanged",
            backup_dir,
            summary.total(),
            summary.new_files,
            summary.modified_files,
            summary.unchanged_files
        );

        Ok(BackupOutcome {
            backup_dir,
            manifest,
            summary,
        })
    }

    fn backup_file(
        &self,
        candidate: &CandidateFile,
        backup_dir: &Path,
        prior: &PriorHashes,
        summary: &mut ChangeSummary,
    ) -> Result<FileRecord> {
        let content_hash = hash_file(&candidate.path)?;
        let change = prior.classify(&candidate.relative_path, &content_hash);
        summary.record(change);

        let metadata = std::fs::metadata(&candidate.path)
            .map_err(|e| Error::file_access(&candidate.path, "stat", e))?;
        let modified = metadata
            .modified()
            .map_err(|e| Error::file_access(&candidate.path, "stat", e))?;

        let dst = backup_dir.join(&candidate.relative);
        copy_with_retry(&candidate.path, &dst, &self.config.copy_retry())?;
        tracing::debug!("{} {:?}", change, candidate.relative_path);

        Ok(FileRecord {
            relative_path: candidate.relative_path.clone(),
            extension: candidate.extension.clone(),
            size_bytes: metadata.len(),
            content_hash,
            modified_at: DateTime::<Local>::from(modified)
                .naive_local()
                .trunc_subsecs(0),
            changed_since_last_backup: change.is_changed(),
        })
    }
}
