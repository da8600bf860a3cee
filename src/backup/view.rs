//! Plain-text rendering of manifests for the `view` command and the
//! `backup_record.md` written next to each manifest.

use crate::backup::change::ChangeSummary;
use crate::backup::manifest::{manifest_time, BackupManifest};
use itertools::Itertools;
use std::fmt::{Display, Formatter, Write};

static SIZE_UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

pub fn format_size(size: u64) -> String {
    let mut size = size as f64;
    for unit in SIZE_UNITS {
        if size < 1024.0 {
            return format!("{size:.2} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.2} TB")
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestSummary {
    pub timestamp: String,
    pub description: String,
    pub tags: Vec<String>,
    pub total_files: usize,
    pub total_size: u64,
    pub changed_files: usize,
}

impl From<&BackupManifest> for ManifestSummary {
    fn from(manifest: &BackupManifest) -> Self {
        Self {
            timestamp: manifest.created_at.format(manifest_time::FORMAT).to_string(),
            description: manifest.description.clone(),
            tags: manifest.tags.clone(),
            total_files: manifest.files.len(),
            total_size: manifest.total_size(),
            changed_files: manifest.changed_count(),
        }
    }
}

impl Display for ManifestSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let description = if self.description.is_empty() {
            "-"
        } else {
            self.description.as_str()
        };
        let tags = if self.tags.is_empty() {
            "-".to_string()
        } else {
            self.tags.join(", ")
        };
        writeln!(f, "=== Backup summary ===")?;
        writeln!(f, "Created:       {}", self.timestamp)?;
        writeln!(f, "Description:   {description}")?;
        writeln!(f, "Tags:          {tags}")?;
        writeln!(f)?;
        writeln!(f, "Total files:   {}", self.total_files)?;
        writeln!(f, "Total size:    {}", format_size(self.total_size))?;
        write!(f, "Changed files: {}", self.changed_files)
    }
}

/// One line per file: path, size, modified time, changed flag.
pub fn render_file_listing(manifest: &BackupManifest) -> String {
    let path_width = manifest
        .files
        .iter()
        .map(|f| f.relative_path.len())
        .max()
        .unwrap_or(0)
        .max("File".len());

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<path_width$}  {:>12}  {:<19}  Changed",
        "File", "Size", "Modified"
    );
    for file in &manifest.files {
        let _ = writeln!(
            out,
            "{:<path_width$}  {:>12}  {:<19}  {}",
            file.relative_path,
            format_size(file.size_bytes),
            file.modified_at.format(manifest_time::FORMAT),
            if file.changed_since_last_backup { "yes" } else { "no" }
        );
    }
    out
}

/// Markdown record stored as `backup_record.md`.
pub fn render_record(manifest: &BackupManifest, changes: &ChangeSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Code backup record\n");
    let _ = writeln!(out, "## Summary\n");
    let _ = writeln!(
        out,
        "- Backup time: {}",
        manifest.created_at.format(manifest_time::FORMAT)
    );
    if !manifest.description.is_empty() {
        let _ = writeln!(out, "- Description: {}", manifest.description);
    }
    if !manifest.tags.is_empty() {
        let _ = writeln!(out, "- Tags: {}", manifest.tags.join(", "));
    }
    let _ = writeln!(out, "- Total files: {}", manifest.files.len());
    let _ = writeln!(out, "- Total size: {}", format_size(manifest.total_size()));
    let _ = writeln!(out, "- New files: {}", changes.new_files);
    let _ = writeln!(out, "- Modified files: {}", changes.modified_files);
    let _ = writeln!(out, "- Unchanged files: {}", changes.unchanged_files);

    let requirements = manifest.dependency_fragment.requirements();
    if !requirements.is_empty() {
        let _ = writeln!(out, "\n## Dependencies");
        for listing in requirements {
            match &listing.environment {
                Some(env) => {
                    let _ = writeln!(out, "\n### {env}\n");
                }
                None => {
                    let _ = writeln!(out);
                }
            }
            for line in listing.content.lines() {
                let _ = writeln!(out, "- {line}");
            }
        }
    }

    if !manifest.excluded_directories.is_empty() {
        let _ = writeln!(out, "\n## Excluded folders\n");
        for dir in &manifest.excluded_directories {
            let _ = writeln!(out, "- {dir}");
        }
    }

    let _ = writeln!(out, "\n## File types\n");
    manifest
        .extension_counts
        .iter()
        .filter(|(_, count)| **count > 0)
        .for_each(|(ext, count)| {
            let _ = writeln!(out, "- {ext}: {count}");
        });

    let _ = writeln!(out, "\n## Files\n");
    for file in &manifest.files {
        let _ = writeln!(out, "### {}", file.relative_path);
        let _ = writeln!(out, "- Type: {}", file.extension);
        let _ = writeln!(out, "- Size: {} bytes", file.size_bytes);
        let _ = writeln!(
            out,
            "- Modified: {}",
            file.modified_at.format(manifest_time::FORMAT)
        );
        let _ = writeln!(out, "- Hash: {}", file.content_hash);
        let _ = writeln!(
            out,
            "- Changed: {}\n",
            if file.changed_since_last_backup { "yes" } else { "no" }
        );
    }

    out.lines().map(str::trim_end).join("\n") + "\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::manifest::tests::sample_manifest;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0.00 B");
        assert_eq!(format_size(1023), "1023.00 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024 * 1024), "3.00 TB");
    }

    #[test]
    fn test_summary_from_manifest() {
        let summary = ManifestSummary::from(&sample_manifest());

        assert_eq!(summary.timestamp, "2024-03-09 14:05:07");
        assert_eq!(summary.total_files, 1);
        assert_eq!(summary.total_size, 12);
        assert_eq!(summary.changed_files, 1);

        let text = summary.to_string();
        assert!(text.contains("nightly"));
        assert!(text.contains("ci"));
        assert!(text.contains("12.00 B"));
    }

    #[test]
    fn test_file_listing() {
        let listing = render_file_listing(&sample_manifest());
        let lines: Vec<_> = listing.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("File"));
        assert!(lines[1].starts_with("pkg/a.py"));
        assert!(lines[1].ends_with("yes"));
    }

    #[test]
    fn test_render_record() {
        let changes = ChangeSummary {
            new_files: 1,
            modified_files: 0,
            unchanged_files: 0,
        };
        let record = render_record(&sample_manifest(), &changes);

        assert!(record.starts_with("# Code backup record"));
        assert!(record.contains("- New files: 1"));
        assert!(record.contains("- numpy==1.26.4"));
        assert!(record.contains("- .py: 1"));
        assert!(!record.contains("- .md: 0"));
        assert!(record.contains("### pkg/a.py"));
        assert!(record.contains("- __pycache__"));
    }
}
