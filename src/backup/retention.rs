use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::store::{list_backups, BackupEntry, BackupKind};
use bon::Builder;
use chrono::{DateTime, TimeZone, Utc};
use getset::CopyGetters;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use validator::Validate;

/// Keep the `keep_count` most recently modified backups, delete the rest.
#[derive(Clone, Copy, Validate, Serialize, Deserialize, Debug, Builder, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct RetentionConfig {
    #[validate(range(min = 1))]
    keep_count: usize,
}

impl RetentionConfig {
    /// Items past the newest `keep_count`, newest first.
    ///
    /// Items with equal time are ordered by `item`, greatest first.
    pub fn get_delete<R, T, I, II>(&self, iter: I) -> impl Iterator<Item = II>
    where
        R: Ord,
        T: TimeZone,
        II: AsRef<ItemWithDateTime<R, T>>,
        I: IntoIterator<Item = II>,
    {
        iter.into_iter()
            .sorted_by(|a, b| {
                let (a, b) = (a.as_ref(), b.as_ref());
                Reverse((&a.date_time, &a.item)).cmp(&Reverse((&b.date_time, &b.item)))
            })
            .skip(self.keep_count)
    }

    /// Deletes out of retention backups under `out_dir` and returns their paths.
    ///
    /// Every deletion is attempted; failures are reported together.
    pub fn cleanup<P: AsRef<Path>>(&self, out_dir: P) -> Result<Vec<PathBuf>> {
        let items: Vec<_> = list_backups(out_dir.as_ref())?
            .into_iter()
            .map(|entry| -> Result<ItemWithDateTime<BackupEntry, Utc>> {
                let modified = std::fs::metadata(&entry.path)
                    .and_then(|m| m.modified())
                    .map_err(|e| Error::file_access(&entry.path, "stat", e))?;
                Ok(ItemWithDateTime::from((entry, DateTime::<Utc>::from(modified))))
            })
            .collect::<Result<_>>()?;

        let mut removed = Vec::new();
        let mut errors = Vec::new();
        for to_delete in self.get_delete(items) {
            let BackupEntry { path, kind, .. } = to_delete.item;
            tracing::info!("Removing out of retention backup {:?}", path);
            let res = match kind {
                BackupKind::Directory => std::fs::remove_dir_all(&path),
                BackupKind::Archive => std::fs::remove_file(&path),
            };
            match res {
                Ok(_) => removed.push(path),
                Err(e) => errors.push(Error::file_access(path, "remove", e)),
            }
        }

        convert_error_vec(errors)?;
        Ok(removed)
    }
}

#[derive(Clone, Hash, Eq, PartialEq)]
pub struct ItemWithDateTime<R, T: TimeZone> {
    pub item: R,
    pub date_time: Rc<DateTime<T>>,
}

impl<R, T: TimeZone> AsRef<ItemWithDateTime<R, T>> for ItemWithDateTime<R, T> {
    fn as_ref(&self) -> &ItemWithDateTime<R, T> {
        self
    }
}

impl<R, T: TimeZone> From<(R, DateTime<T>)> for ItemWithDateTime<R, T> {
    fn from(value: (R, DateTime<T>)) -> Self {
        Self {
            item: value.0,
            date_time: Rc::new(value.1),
        }
    }
}

impl<R: Debug, T: TimeZone> Debug for ItemWithDateTime<R, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}@{:?}", self.item, self.date_time)
    }
}
