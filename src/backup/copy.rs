use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use bon::Builder;
use filetime::FileTime;
use getset::CopyGetters;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use validator::Validate;

static DEFAULT_MAX_ATTEMPTS: u32 = 3;
static DEFAULT_DELAY: Duration = Duration::from_secs(1);

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_delay() -> Duration {
    DEFAULT_DELAY
}

/// Bounded retry with a fixed delay, applied to file copies only
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Validate, Builder, PartialEq, Eq, CopyGetters)]
#[serde(deny_unknown_fields)]
#[getset(get_copy = "pub")]
pub struct RetryPolicy {
    /// Total attempts including the first one
    #[validate(range(min = 1))]
    #[serde(default = "default_max_attempts")]
    #[builder(default = DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,
    #[serde(default = "default_delay", with = "humantime_serde")]
    #[builder(default = DEFAULT_DELAY)]
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Runs `op` until it succeeds or attempts run out.
    ///
    /// The last failure is escalated to [`Error::FileAccess`] for `path`.
    pub fn run<T, F>(&self, path: &Path, operation: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut() -> std::io::Result<T>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if attempt >= max_attempts => {
                    tracing::error!("{operation} {:?} failed after {attempt} attempts: {e}", path);
                    return Err(Error::file_access(path, operation, e));
                }
                Err(e) => {
                    tracing::warn!(
                        "{operation} {:?} failed, retrying in {:?} ({attempt}/{max_attempts}): {e}",
                        path,
                        self.delay
                    );
                    std::thread::sleep(self.delay);
                    attempt += 1;
                }
            }
        }
    }
}

/// Copies `src` to `dst` byte for byte and gives `dst` the mtime of `src`.
///
/// Parent directories of `dst` are created as needed.
pub fn copy_preserving_mtime(src: &Path, dst: &Path) -> std::io::Result<u64> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = std::fs::copy(src, dst)?;
    let metadata = std::fs::metadata(src)?;
    filetime::set_file_mtime(dst, FileTime::from_last_modification_time(&metadata))?;
    Ok(bytes)
}

/// [`copy_preserving_mtime`] under `policy`.
pub fn copy_with_retry(src: &Path, dst: &Path, policy: &RetryPolicy) -> Result<u64> {
    policy.run(src, "copy", || copy_preserving_mtime(src, dst))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;
    use tempfile::TempDir;

    fn no_delay(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(max_attempts)
            .delay(Duration::ZERO)
            .build()
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay(), Duration::from_secs(1));
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_policy_deserialize_humantime() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_attempts": 5, "delay": "250ms"}"#).unwrap();
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.delay(), Duration::from_millis(250));

        let defaulted: RetryPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(defaulted, RetryPolicy::default());
    }

    #[test]
    fn test_zero_attempts_is_invalid() {
        assert!(no_delay(0).validate().is_err());
    }

    #[test]
    fn test_run_recovers_from_transient_failures() {
        let mut calls = 0;
        let result = no_delay(3).run(Path::new("a.py"), "copy", || {
            calls += 1;
            if calls < 3 {
                Err(std::io::Error::new(ErrorKind::Interrupted, "busy"))
            } else {
                Ok(calls)
            }
        });

        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_run_escalates_after_max_attempts() {
        let mut calls = 0;
        let result: Result<()> = no_delay(2).run(Path::new("a.py"), "copy", || {
            calls += 1;
            Err(std::io::Error::new(ErrorKind::PermissionDenied, "denied"))
        });

        assert_eq!(calls, 2);
        match result {
            Err(Error::FileAccess { operation, source, .. }) => {
                assert_eq!(operation, "copy");
                assert_eq!(source.kind(), ErrorKind::PermissionDenied);
            }
            other => panic!("Expected FileAccess error, got {other:?}"),
        }
    }

    #[test]
    fn test_copy_preserves_content_and_mtime() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src.py");
        let dst = temp_dir.path().join("out/nested/dst.py");
        std::fs::write(&src, "print(1)\n").unwrap();
        let mtime = FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&src, mtime).unwrap();

        let bytes = copy_with_retry(&src, &dst, &no_delay(1)).unwrap();

        assert_eq!(bytes, 9);
        assert_eq!(std::fs::read(&dst).unwrap(), b"print(1)\n");
        let copied = std::fs::metadata(&dst).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&copied), mtime);
    }

    #[test]
    fn test_copy_missing_source_is_file_access_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = copy_with_retry(
            &temp_dir.path().join("missing.py"),
            &temp_dir.path().join("out.py"),
            &no_delay(2),
        );

        assert!(matches!(result, Err(Error::FileAccess { .. })));
    }
}
