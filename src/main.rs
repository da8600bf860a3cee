use clap::{Parser, Subcommand};
use code_backup::backup::backup_config::{BackupConfig, DEFAULT_PYTHON};
use code_backup::backup::engine::BackupEngine;
use code_backup::backup::manifest::BackupManifest;
use code_backup::backup::restore::{restore_backup, restore_environments, VenvInstaller};
use code_backup::backup::result_error::result::Result;
use code_backup::backup::result_error::AddMsg;
use code_backup::backup::view::{render_file_listing, ManifestSummary};
use std::path::PathBuf;
use std::process::exit;
use tracing::{error, info};

/// Incremental backups of a source code directory
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a backup as described by a config file
    Backup {
        /// Location of config file
        #[arg(short, long)]
        config: PathBuf,
        /// Overrides the configured description
        #[arg(short, long)]
        description: Option<String>,
        /// Overrides the configured tags
        #[arg(long, num_args = 1..)]
        tags: Option<Vec<String>>,
        /// Skip compression even if the config enables it
        #[arg(long)]
        no_compress: bool,
    },
    /// Show the manifest of a backup directory or archive
    View {
        backup: PathBuf,
        /// Also list every file
        #[arg(long)]
        files: bool,
    },
    /// Restore files and/or Python environments from a backup
    Restore {
        backup: PathBuf,
        /// Only restore this environment
        #[arg(long)]
        env_name: Option<String>,
        /// Restore the backed up files into this empty directory
        #[arg(long)]
        target: Option<PathBuf>,
        /// Do not rebuild environments
        #[arg(long, requires = "target")]
        files_only: bool,
        /// Where virtual environments are created, defaults to ~/.virtualenvs
        #[arg(long)]
        venv_root: Option<PathBuf>,
        /// Interpreter used to create virtual environments
        #[arg(long, default_value = DEFAULT_PYTHON)]
        python: PathBuf,
    },
}

fn backup(
    config: PathBuf,
    description: Option<String>,
    tags: Option<Vec<String>>,
    no_compress: bool,
) -> Result<()> {
    let mut config = BackupConfig::from_file(&config)?;
    if let Some(description) = description {
        config.set_description(description);
    }
    if let Some(tags) = tags {
        config.set_tags(tags);
    }
    if no_compress {
        config.set_compress_backup(false);
    }

    let snapshot = config.dependency_snapshot();
    let report = BackupEngine::new(config, snapshot).execute()?;
    let summary = &report.outcome.summary;
    info!(
        "Backup written to {:?}: {} new, {} modified, {} unchanged",
        report.location(),
        summary.new_files,
        summary.modified_files,
        summary.unchanged_files
    );
    report
        .removed
        .iter()
        .for_each(|removed| info!("Removed old backup {:?}", removed));
    Ok(())
}

fn view(backup: PathBuf, files: bool) -> Result<()> {
    let manifest = BackupManifest::load(&backup)
        .add_msg(format!("Reading backup {:?} failed", backup))?;
    println!("{}", ManifestSummary::from(&manifest));
    if files {
        println!();
        print!("{}", render_file_listing(&manifest));
    }
    Ok(())
}

fn restore(
    backup: PathBuf,
    env_name: Option<String>,
    target: Option<PathBuf>,
    files_only: bool,
    venv_root: Option<PathBuf>,
    python: PathBuf,
) -> Result<()> {
    if let Some(target) = target {
        let count = restore_backup(&backup, &target)?;
        info!("Restored {} files into {:?}", count, target);
    }
    if files_only {
        return Ok(());
    }

    let venv_root = match venv_root {
        Some(root) => root,
        None => VenvInstaller::default_venv_root()?,
    };
    let installer = VenvInstaller::new(python, venv_root);
    for env_path in restore_environments(&backup, env_name.as_deref(), &installer)? {
        info!("Environment restored at {:?}", env_path);
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let res = match args.command {
        Commands::Backup {
            config,
            description,
            tags,
            no_compress,
        } => backup(config, description, tags, no_compress),
        Commands::View { backup, files } => view(backup, files),
        Commands::Restore {
            backup,
            env_name,
            target,
            files_only,
            venv_root,
            python,
        } => restore(backup, env_name, target, files_only, venv_root, python),
    };

    if let Err(e) = res {
        error!("{e}");
        exit(1);
    }
}
