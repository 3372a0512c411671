//! Download waiting and file assertions

use regex::Regex;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use testbed_common::{PollConfig, Poller, Readiness};
use tracing::{debug, info};

use crate::error::{E2eError, E2eResult};

/// Extensions browsers use while a download is still being written
const PARTIAL_EXTENSIONS: &[&str] = &["crdownload", "part", "tmp", "download"];

fn is_partial(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| PARTIAL_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

/// Newest file in `dir` whose name matches `pattern`, with its size
fn newest_match(dir: &Path, pattern: &Regex) -> E2eResult<Option<(PathBuf, u64)>> {
    if !dir.exists() {
        return Ok(None);
    }

    let mut newest: Option<(PathBuf, u64, std::time::SystemTime)> = None;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();

        if !pattern.is_match(&name) || is_partial(&path) {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified()?;
        if newest.as_ref().map(|(_, _, m)| modified > *m).unwrap_or(true) {
            newest = Some((path, meta.len(), modified));
        }
    }

    Ok(newest.map(|(path, len, _)| (path, len)))
}

/// Wait for a completed download matching `pattern` to appear in `dir`.
///
/// A file counts as complete once it is non-empty, has no partial-download
/// extension, and its size did not change between two consecutive attempts.
pub async fn wait_for_download(
    dir: &Path,
    pattern: &Regex,
    config: PollConfig,
) -> E2eResult<PathBuf> {
    let mut last_seen: Option<(PathBuf, u64)> = None;

    let path = Poller::new(config)
        .describe(format!("download matching /{}/ in {}", pattern, dir.display()))
        .run(|| {
            let current = newest_match(dir, pattern);
            let ready = match current {
                Err(e) => Err(e),
                Ok(None) => Ok(Readiness::Pending),
                Ok(Some((path, len))) => {
                    let stable = len > 0
                        && last_seen
                            .as_ref()
                            .map(|(p, l)| *p == path && *l == len)
                            .unwrap_or(false);
                    debug!("{} is {} bytes (stable: {})", path.display(), len, stable);
                    if stable {
                        Ok(Readiness::Ready(path))
                    } else {
                        last_seen = Some((path, len));
                        Ok(Readiness::Pending)
                    }
                }
            };
            std::future::ready(ready)
        })
        .await?;

    info!("Download complete: {}", path.display());
    Ok(path)
}

/// SHA-256 of a file, hex-encoded
pub fn file_sha256(path: &Path) -> E2eResult<String> {
    let data = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}

pub fn assert_file_sha256(path: &Path, expected: &str) -> E2eResult<()> {
    let actual = file_sha256(path)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(E2eError::AssertionFailed(format!(
            "{} has sha256 {}, expected {}",
            path.display(),
            actual,
            expected
        )))
    }
}

pub fn assert_file_contains(path: &Path, needle: &str) -> E2eResult<()> {
    let content = std::fs::read_to_string(path)?;
    if content.contains(needle) {
        Ok(())
    } else {
        Err(E2eError::AssertionFailed(format!(
            "{} does not contain '{}'",
            path.display(),
            needle
        )))
    }
}

pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> E2eResult<T> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_extensions() {
        assert!(is_partial(Path::new("report.csv.crdownload")));
        assert!(is_partial(Path::new("report.csv.part")));
        assert!(!is_partial(Path::new("report.csv")));
    }

    #[test]
    fn test_sha256_and_contains() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, "hello").unwrap();

        assert_file_sha256(
            &path,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
        )
        .unwrap();
        assert_file_contains(&path, "ell").unwrap();
        assert!(assert_file_contains(&path, "bye").is_err());
    }

    #[test]
    fn test_newest_match_skips_partial() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("export.csv.crdownload"), "a,b").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let pattern = Regex::new(r"^export.*\.csv").unwrap();
        assert!(newest_match(dir.path(), &pattern).unwrap().is_none());

        std::fs::write(dir.path().join("export.csv"), "a,b").unwrap();
        let (path, len) = newest_match(dir.path(), &pattern).unwrap().unwrap();
        assert!(path.ends_with("export.csv"));
        assert_eq!(len, 3);
    }
}
