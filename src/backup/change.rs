use crate::backup::manifest::BackupManifest;
use derive_more::Display;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    #[display("new")]
    New,
    #[display("modified")]
    Modified,
    #[display("unchanged")]
    Unchanged,
}

impl ChangeKind {
    pub fn is_changed(self) -> bool {
        !matches!(self, ChangeKind::Unchanged)
    }
}

/// Hashes recorded by the previous backup, keyed by relative path.
#[derive(Clone, Debug, Default)]
pub struct PriorHashes {
    hashes: HashMap<String, String>,
}

impl From<&BackupManifest> for PriorHashes {
    fn from(manifest: &BackupManifest) -> Self {
        Self {
            hashes: manifest.hashes_by_path(),
        }
    }
}

impl From<HashMap<String, String>> for PriorHashes {
    fn from(hashes: HashMap<String, String>) -> Self {
        Self { hashes }
    }
}

impl PriorHashes {
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn classify(&self, relative_path: &str, content_hash: &str) -> ChangeKind {
        match self.hashes.get(relative_path) {
            None => ChangeKind::New,
            Some(prior) if prior != content_hash => ChangeKind::Modified,
            Some(_) => ChangeKind::Unchanged,
        }
    }
}

/// Per-run tally of change classifications.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub new_files: usize,
    pub modified_files: usize,
    pub unchanged_files: usize,
}

impl ChangeSummary {
    pub fn record(&mut self, kind: ChangeKind) {
        match kind {
            ChangeKind::New => self.new_files += 1,
            ChangeKind::Modified => self.modified_files += 1,
            ChangeKind::Unchanged => self.unchanged_files += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.new_files + self.modified_files + self.unchanged_files
    }
}
