//! # code_backup
//!
//! Incremental, content-addressed backups of a source code tree.
//!
//! ## Features
//!
//! - **Change Detection**: SHA-256 per file, compared with the newest previous backup
//! - **Filtering**: Extension allow-list, excluded directory names pruned during the walk
//! - **Manifests**: `backup_info.json` per backup, plus requirement files and a markdown record
//! - **Compression**: Optional zip archive of each backup
//! - **Retention Management**: Keep the newest N backups
//! - **Restore**: Extract or copy a backup, rebuild its Python environments
//!
//! ## Quick Start
//!
//! ```no_run
//! use code_backup::backup::backup_config::BackupConfig;
//! use code_backup::backup::engine::BackupEngine;
//!
//! // Load configuration from a YAML or JSON file
//! let config = BackupConfig::from_file("config.yml")?;
//! let snapshot = config.dependency_snapshot();
//!
//! // Back up, then compress and clean up as configured
//! let report = BackupEngine::new(config, snapshot).execute()?;
//! println!("Backup written to {:?}", report.location());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
