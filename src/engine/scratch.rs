//! Throwaway source files.
//!
//! Each execution writes the submitted code to a uniquely named file in
//! the workspace, owner-readable only, and removes it when the execution
//! ends. Removal happens in Drop so the file disappears on every exit
//! path, including panics in the calling thread.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::config::types::{Language, Result};

/// A source file that deletes itself when dropped.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    /// Write `code` to a fresh file under `workspace`, mode 0600.
    pub fn create(workspace: &Path, language: Language, code: &str) -> Result<Self> {
        let name = format!("job-{}.{}", Uuid::new_v4(), language.extension());
        let path = workspace.join(name);

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&path)?;
        file.write_all(code.as_bytes())?;
        file.sync_all()?;

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        // already-gone is fine
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_file_with_content_and_extension() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchFile::create(dir.path(), Language::Python, "print(1)").unwrap();
        assert_eq!(scratch.path().extension().unwrap(), "py");
        assert_eq!(std::fs::read_to_string(scratch.path()).unwrap(), "print(1)");
    }

    #[test]
    fn file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchFile::create(dir.path(), Language::Bash, "echo hi").unwrap();
        let mode = std::fs::metadata(scratch.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn drop_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let scratch =
                ScratchFile::create(dir.path(), Language::JavaScript, "console.log(1)").unwrap();
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn drop_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchFile::create(dir.path(), Language::Python, "x = 1").unwrap();
        std::fs::remove_file(scratch.path()).unwrap();
        // drop must not panic
    }

    #[test]
    fn two_scratches_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let a = ScratchFile::create(dir.path(), Language::Python, "a").unwrap();
        let b = ScratchFile::create(dir.path(), Language::Python, "b").unwrap();
        assert_ne!(a.path(), b.path());
    }
}
