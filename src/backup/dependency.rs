//! Dependency fragments attached to each backup.
//!
//! The engine never inspects the fragment beyond grouping packages into
//! `name==version` requirement files; collecting it is delegated to a
//! [`DependencySnapshot`] supplied by the caller.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Name of the single requirements file used when packages carry no
/// environment.
pub static UNNAMED_REQUIREMENTS_FILE: &str = "requirements.txt";
/// Environment assigned to packages that lack one when others have it.
pub static UNKNOWN_ENVIRONMENT: &str = "unknown";

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
    pub location: Option<String>,
    pub environment: Option<String>,
}

/// Opaque environment payload plus the installed packages.
///
/// Serialized flattened into the manifest as `environment` and `packages`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DependencyFragment {
    #[serde(default)]
    pub environment: serde_json::Value,
    #[serde(default)]
    pub packages: Vec<PackageRecord>,
}

/// Layout of `environment_info.json` written beside each backup.
#[derive(Debug, Serialize)]
pub struct EnvironmentInfo<'a> {
    pub python_environment: &'a serde_json::Value,
    pub installed_packages: &'a [PackageRecord],
}

impl<'a> From<&'a DependencyFragment> for EnvironmentInfo<'a> {
    fn from(fragment: &'a DependencyFragment) -> Self {
        Self {
            python_environment: &fragment.environment,
            installed_packages: &fragment.packages,
        }
    }
}

/// One requirements listing, ready to be written or installed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequirementsFile {
    pub environment: Option<String>,
    pub content: String,
}

impl RequirementsFile {
    pub fn file_name(&self) -> String {
        match &self.environment {
            Some(env) => format!("requirements_{env}.txt"),
            None => UNNAMED_REQUIREMENTS_FILE.to_string(),
        }
    }

    pub fn write_to_dir<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf> {
        let path = dir.as_ref().join(self.file_name());
        std::fs::write(&path, &self.content)
            .map_err(|e| Error::file_access(&path, "write requirements", e))?;
        Ok(path)
    }
}

fn render_requirements<'a, I: IntoIterator<Item = &'a PackageRecord>>(packages: I) -> String {
    packages
        .into_iter()
        .sorted_by(|a, b| a.name.cmp(&b.name))
        .map(|p| format!("{}=={}\n", p.name, p.version))
        .collect()
}

impl DependencyFragment {
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Groups packages into requirement listings.
    ///
    /// When any package is attributed to an environment, one listing per
    /// environment is produced (packages without one go to `unknown`).
    /// Otherwise a single unnamed listing holds every package. An empty
    /// fragment yields no listings.
    pub fn requirements(&self) -> Vec<RequirementsFile> {
        if self.packages.is_empty() {
            return Vec::new();
        }

        if self.packages.iter().all(|p| p.environment.is_none()) {
            return vec![RequirementsFile {
                environment: None,
                content: render_requirements(&self.packages),
            }];
        }

        self.packages
            .iter()
            .into_group_map_by(|p| {
                p.environment
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_ENVIRONMENT.to_string())
            })
            .into_iter()
            .sorted_by(|a, b| a.0.cmp(&b.0))
            .map(|(env, packages)| RequirementsFile {
                environment: Some(env),
                content: render_requirements(packages),
            })
            .collect()
    }

    /// Listings for `env_name`, or all listings when `None`.
    pub fn requirements_for(&self, env_name: Option<&str>) -> Vec<RequirementsFile> {
        let all = self.requirements();
        match env_name {
            None => all,
            Some(name) => all
                .into_iter()
                .filter(|r| r.environment.as_deref() == Some(name))
                .collect(),
        }
    }
}

/// Produces the dependency fragment recorded with a backup.
pub trait DependencySnapshot {
    fn snapshot(&self) -> Result<DependencyFragment>;
}

/// Records an empty fragment.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoDependencies;

impl DependencySnapshot for NoDependencies {
    fn snapshot(&self) -> Result<DependencyFragment> {
        Ok(DependencyFragment::default())
    }
}

/// Snapshot of a Python interpreter's installed packages through `pip list`.
///
/// With `env_names` set, only packages whose install location contains one of
/// the names are kept, tagged with the first name that matched.
#[derive(Clone, Debug)]
pub struct PipSnapshot {
    python: PathBuf,
    env_names: BTreeSet<String>,
}

#[derive(Deserialize)]
struct PipListEntry {
    name: String,
    version: String,
    location: Option<String>,
}

impl PipSnapshot {
    pub fn new<P: Into<PathBuf>, I: IntoIterator<Item = S>, S: Into<String>>(
        python: P,
        env_names: I,
    ) -> Self {
        Self {
            python: python.into(),
            env_names: env_names.into_iter().map(Into::into).collect(),
        }
    }

    fn run_python(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.python)
            .args(args)
            .output()
            .map_err(Error::from)
            .add_msg(format!("Running {:?} {:?} failed", self.python, args))?;
        if !output.status.success() {
            return Err(Error::Snapshot(format!(
                "{:?} {:?} exited with {}: {}",
                self.python,
                args,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn environment_info(&self, python_version: &str) -> serde_json::Value {
        let environment_variables: serde_json::Map<String, serde_json::Value> = std::env::vars()
            .filter(|(k, _)| {
                k.starts_with("PYTHON") || k.starts_with("PATH") || k.starts_with("VIRTUAL_ENV")
            })
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect();

        serde_json::json!({
            "python_version": python_version,
            "platform": std::env::consts::OS,
            "platform_machine": std::env::consts::ARCH,
            "python_path": self.python,
            "environment_variables": environment_variables,
        })
    }
}

/// Turns `pip list --format=json --verbose` output into package records.
pub fn parse_pip_list(json: &str, env_names: &BTreeSet<String>) -> Result<Vec<PackageRecord>> {
    let entries: Vec<PipListEntry> = serde_json::from_str(json)?;
    Ok(entries
        .into_iter()
        .filter_map(|entry| {
            let name = entry.name.to_lowercase();
            if env_names.is_empty() {
                return Some(PackageRecord {
                    name,
                    version: entry.version,
                    location: entry.location,
                    environment: None,
                });
            }
            let location = entry.location.as_deref()?.to_lowercase();
            let environment = env_names.iter().find(|env| location.contains(env.as_str()))?;
            Some(PackageRecord {
                name,
                version: entry.version,
                environment: Some(environment.clone()),
                location: entry.location,
            })
        })
        .collect())
}

impl DependencySnapshot for PipSnapshot {
    fn snapshot(&self) -> Result<DependencyFragment> {
        let python_version = self.run_python(&["--version"])?;
        let listing = self.run_python(&["-m", "pip", "list", "--format=json", "--verbose"])?;
        let packages = parse_pip_list(&listing, &self.env_names)
            .add_msg(format!("Parsing pip output of {:?} failed", self.python))?;

        if !self.env_names.is_empty() && packages.is_empty() {
            tracing::warn!(
                "No packages found for environments {:?}",
                self.env_names
            );
        }
        tracing::info!("Captured {} packages from {:?}", packages.len(), self.python);

        Ok(DependencyFragment {
            environment: self.environment_info(python_version.trim()),
            packages,
        })
    }
}
