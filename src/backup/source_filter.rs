use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};

use dyn_iter::{DynIter, IntoDynIterator};
use function_name::named;
use getset::Getters;
use walkdir::{DirEntry, WalkDir};

use std::cell::OnceCell;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Selects the source files a backup run tracks
///
/// Recursively walks `src_dir` and yields regular files whose extension is
/// in `extensions`. Directories whose name is in `exclude_dirs` are pruned
/// before descent, so nothing below them is ever read. Directories in
/// `pruned_paths` are skipped as well, matched by canonical path.
#[derive(Clone, Debug, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct SourceFilter {
    src_dir: PathBuf,
    /// Lowercase, dot-prefixed
    extensions: BTreeSet<String>,
    exclude_dirs: BTreeSet<String>,
    pruned_paths: BTreeSet<PathBuf>,
}

/// A file accepted by [`SourceFilter`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateFile {
    pub path: PathBuf,
    /// Path relative to the walked root, as found on disk
    pub relative: PathBuf,
    /// `/` separated form of `relative`, unique per file
    pub relative_path: String,
    pub extension: String,
}

pub fn normalize_extension<S: AsRef<str>>(ext: S) -> String {
    let ext = ext.as_ref().trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}

pub fn normalize_extensions<I, S>(exts: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    exts.into_iter().map(normalize_extension).collect()
}

/// Extension of `path` in the form used by the manifest, `None` when the
/// file name has no extension.
pub fn extension_of<P: AsRef<Path>>(path: P) -> Option<String> {
    path.as_ref()
        .extension()
        .map(|e| normalize_extension(e.to_string_lossy()))
}

/// `/` joined components of `relative`, `None` when any of them is not
/// valid UTF-8.
pub fn relative_path_string<P: AsRef<Path>>(relative: P) -> Option<String> {
    relative
        .as_ref()
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()
        .map(|parts| parts.join("/"))
}

impl SourceFilter {
    pub fn new<P, E, S, D, N>(src_dir: P, extensions: E, exclude_dirs: D) -> Self
    where
        P: Into<PathBuf>,
        E: IntoIterator<Item = S>,
        S: AsRef<str>,
        D: IntoIterator<Item = N>,
        N: Into<String>,
    {
        Self {
            src_dir: src_dir.into(),
            extensions: normalize_extensions(extensions),
            exclude_dirs: exclude_dirs.into_iter().map(Into::into).collect(),
            pruned_paths: BTreeSet::new(),
        }
    }

    /// Never descends into `path`, wherever it sits under the source root.
    ///
    /// `path` may not exist yet; it is resolved when the walk starts.
    pub fn prune_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.pruned_paths.insert(path.into());
        self
    }

    /// Starts a fresh walk. Each call returns an independent iterator.
    #[named]
    pub fn candidates<'a>(&self) -> Result<DynIter<'a, Result<CandidateFile>>> {
        if !self.src_dir.is_dir() {
            tracing::error!(
                "Source directory does not exist or is not a directory: {:?}",
                self.src_dir
            );
            return Err(Error::Config(format!(
                "{:?} is not a directory",
                self.src_dir
            )));
        }

        tracing::info!(
            "Starting directory scan: {:?} for {} extensions, excluding {:?}",
            self.src_dir,
            self.extensions.len(),
            self.exclude_dirs
        );

        let src_dir = self.src_dir.clone();
        let extensions = self.extensions.clone();
        let exclude_dirs = self.exclude_dirs.clone();
        let pruned_paths = self.pruned_paths.clone();
        let pruned_canonical = OnceCell::new();

        let entries = WalkDir::new(&self.src_dir)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |de| {
                let pruned = pruned_canonical.get_or_init(|| canonical_paths(&pruned_paths));
                !is_excluded_dir(de, &exclude_dirs) && !is_pruned_dir(de, pruned)
            })
            .filter_map(move |res| match res {
                Ok(de) => process_dir_entry(de, &src_dir, &extensions),
                Err(e) => Some(Err(e.into())),
            })
            .map(move |res| res.add_fn_name(function_path!()));

        Ok(entries.into_dyn_iter())
    }
}

fn is_excluded_dir(de: &DirEntry, exclude_dirs: &BTreeSet<String>) -> bool {
    if de.depth() == 0 || !de.file_type().is_dir() {
        return false;
    }
    let excluded = de
        .file_name()
        .to_str()
        .is_some_and(|name| exclude_dirs.contains(name));
    if excluded {
        tracing::debug!("Pruning excluded directory {:?}", de.path());
    }
    excluded
}

fn canonical_paths(paths: &BTreeSet<PathBuf>) -> BTreeSet<PathBuf> {
    paths.iter().filter_map(|p| p.canonicalize().ok()).collect()
}

fn is_pruned_dir(de: &DirEntry, pruned: &BTreeSet<PathBuf>) -> bool {
    if pruned.is_empty() || de.depth() == 0 || !de.file_type().is_dir() {
        return false;
    }
    let is_pruned = de
        .path()
        .canonicalize()
        .is_ok_and(|canonical| pruned.contains(&canonical));
    if is_pruned {
        tracing::debug!("Pruning {:?}", de.path());
    }
    is_pruned
}

fn process_dir_entry<P: AsRef<Path>>(
    de: DirEntry,
    base_src_dir: P,
    extensions: &BTreeSet<String>,
) -> Option<Result<CandidateFile>> {
    let p = de.into_path();
    if !p.is_file() {
        tracing::trace!("Skipping {:?} not a file", p);
        return None;
    }

    let extension = match extension_of(&p) {
        Some(ext) if extensions.contains(&ext) => ext,
        _ => {
            tracing::trace!("Skipping {:?}, extension not recognized", p);
            return None;
        }
    };

    let relative = match p.strip_prefix(base_src_dir.as_ref()) {
        Ok(stripped_path) => stripped_path.to_path_buf(),
        Err(e) => {
            return Some(Err(Error::from(e).add_msg(format!(
                "Stripping {:?} from {:?} failed",
                base_src_dir.as_ref(),
                p
            ))))
        }
    };

    // lossy conversion could map two names onto one manifest key
    let Some(relative_path) = relative_path_string(&relative) else {
        return Some(Err(Error::file_access(
            p,
            "name",
            std::io::Error::new(ErrorKind::InvalidData, "file name is not valid UTF-8"),
        )));
    };

    tracing::trace!("Including file: {:?} as {:?}", p, relative_path);
    Some(Ok(CandidateFile {
        path: p,
        relative,
        relative_path,
        extension,
    }))
}
