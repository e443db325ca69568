//! Artifact persistence for audit trails.
//!
//! Executors save audit artifacts (CI watch results, loop summaries) on a best
//! effort basis: a failed save is logged and noted in the step result, never
//! turned into a step failure.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, StepError};

/// Persists artifacts for a task
pub trait ArtifactSaver: Send + Sync {
    /// Save `data` under `filename`, overwriting any previous artifact. Returns the path written.
    fn save(&self, workspace: &str, task_id: &str, filename: &str, data: &[u8]) -> Result<PathBuf>;

    /// Save `data` under the first free versioned name derived from `base_name`
    /// (`ci-result.json`, then `ci-result.1.json`, `ci-result.2.json`, ...).
    /// Returns the filename actually used.
    fn save_versioned(&self, workspace: &str, task_id: &str, base_name: &str, data: &[u8]) -> Result<String>;
}

/// Artifact saver writing to `<root>/<workspace>/<task_id>/<filename>`
#[derive(Debug, Clone)]
pub struct FileArtifactSaver {
    root: PathBuf,
}

impl FileArtifactSaver {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn task_dir(&self, workspace: &str, task_id: &str) -> Result<PathBuf> {
        for (label, part) in [("workspace", workspace), ("task id", task_id)] {
            if part.is_empty() || part.contains(['/', '\\']) || part == ".." {
                return Err(StepError::Artifact(format!("invalid {}: {:?}", label, part)));
            }
        }
        Ok(self.root.join(workspace).join(task_id))
    }
}

/// Split `name.ext` into (`name`, `.ext`); names without an extension get an empty suffix.
fn split_extension(base_name: &str) -> (&str, &str) {
    match base_name.rfind('.') {
        Some(idx) if idx > 0 => (&base_name[..idx], &base_name[idx..]),
        _ => (base_name, ""),
    }
}

fn check_filename(filename: &str) -> Result<()> {
    if filename.is_empty() || filename.contains(['/', '\\']) || filename == ".." {
        return Err(StepError::Artifact(format!("invalid filename: {:?}", filename)));
    }
    Ok(())
}

impl ArtifactSaver for FileArtifactSaver {
    fn save(&self, workspace: &str, task_id: &str, filename: &str, data: &[u8]) -> Result<PathBuf> {
        check_filename(filename)?;
        let dir = self.task_dir(workspace, task_id)?;
        fs::create_dir_all(&dir)?;
        let path = dir.join(filename);
        fs::write(&path, data)?;
        log::debug!("Saved artifact {}", path.display());
        Ok(path)
    }

    fn save_versioned(&self, workspace: &str, task_id: &str, base_name: &str, data: &[u8]) -> Result<String> {
        check_filename(base_name)?;
        let dir = self.task_dir(workspace, task_id)?;
        fs::create_dir_all(&dir)?;

        let (stem, ext) = split_extension(base_name);
        let mut candidate = base_name.to_string();
        let mut version = 0u32;
        loop {
            let path = dir.join(&candidate);
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    use std::io::Write;
                    file.write_all(data)?;
                    log::debug!("Saved versioned artifact {}", path.display());
                    return Ok(candidate);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    version += 1;
                    candidate = format!("{}.{}{}", stem, version, ext);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn saver() -> (FileArtifactSaver, TempDir) {
        let temp = TempDir::new().unwrap();
        (FileArtifactSaver::new(temp.path()), temp)
    }

    #[test]
    fn test_save_writes_under_task_dir() {
        let (saver, temp) = saver();
        let path = saver.save("ws", "task-1", "summary.json", b"{}").unwrap();
        assert_eq!(path, temp.path().join("ws").join("task-1").join("summary.json"));
        assert_eq!(fs::read(&path).unwrap(), b"{}");
    }

    #[test]
    fn test_save_overwrites() {
        let (saver, _temp) = saver();
        saver.save("ws", "task-1", "a.txt", b"one").unwrap();
        let path = saver.save("ws", "task-1", "a.txt", b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
    }

    #[test]
    fn test_save_versioned_picks_next_free_name() {
        let (saver, temp) = saver();
        let first = saver.save_versioned("ws", "task-1", "ci-result.json", b"1").unwrap();
        let second = saver.save_versioned("ws", "task-1", "ci-result.json", b"2").unwrap();
        let third = saver.save_versioned("ws", "task-1", "ci-result.json", b"3").unwrap();

        assert_eq!(first, "ci-result.json");
        assert_eq!(second, "ci-result.1.json");
        assert_eq!(third, "ci-result.2.json");

        let dir = temp.path().join("ws").join("task-1");
        assert_eq!(fs::read(dir.join("ci-result.1.json")).unwrap(), b"2");
    }

    #[test]
    fn test_save_versioned_without_extension() {
        let (saver, _temp) = saver();
        saver.save_versioned("ws", "t", "notes", b"a").unwrap();
        assert_eq!(saver.save_versioned("ws", "t", "notes", b"b").unwrap(), "notes.1");
    }

    #[test]
    fn test_rejects_path_traversal() {
        let (saver, _temp) = saver();
        assert!(saver.save("ws", "t", "../escape", b"x").is_err());
        assert!(saver.save("..", "t", "ok.txt", b"x").is_err());
        assert!(saver.save("ws", "a/b", "ok.txt", b"x").is_err());
    }

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("a.json"), ("a", ".json"));
        assert_eq!(split_extension("a.tar.gz"), ("a.tar", ".gz"));
        assert_eq!(split_extension(".hidden"), (".hidden", ""));
        assert_eq!(split_extension("plain"), ("plain", ""));
    }
}
