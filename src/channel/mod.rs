//! File-based command channel.
//!
//! Two directories on a shared volume carry the whole protocol:
//!
//! ```text
//! command_dir/<id>.json   controller -> worker   execution request
//! command_dir/<id>.ping   controller -> worker   liveness probe
//! result_dir/<id>.json    worker -> controller   execution result
//! result_dir/<id>.pong    worker -> controller   liveness reply
//! ```
//!
//! Every file is written to a `.tmp` sibling first and renamed into
//! place, so a reader never observes a partial payload. Files travel in
//! one direction and are deleted by their consumer.

pub mod controller;
pub mod worker;

pub use controller::SandboxController;
pub use worker::SandboxWorker;

use std::path::Path;

use serde::Serialize;

use crate::config::types::Result;

pub(crate) const COMMAND_EXT: &str = "json";
pub(crate) const RESULT_EXT: &str = "json";
pub(crate) const PING_EXT: &str = "ping";
pub(crate) const PONG_EXT: &str = "pong";

/// Identity a command file carries in its name, used when the payload
/// cannot be parsed.
pub(crate) fn command_file_id(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Serialize `value` to `path` atomically: owner-only temp file in the
/// same directory, then rename over the final name.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let payload = serde_json::to_string(value)
        .map_err(|e| crate::config::types::SandboxError::Channel(e.to_string()))?;

    {
        use std::io::Write;
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp)?;
        file.write_all(payload.as_bytes())?;
        file.sync_all()?;
    }

    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn atomic_write_leaves_no_tmp_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("value.json");
        write_json_atomic(&path, &json!({ "ok": true })).unwrap();
        assert!(path.exists());
        assert!(!dir.path().join("value.tmp").exists());
    }

    #[test]
    fn atomic_write_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("value.json");
        write_json_atomic(&path, &json!(1)).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn file_id_comes_from_the_stem() {
        assert_eq!(command_file_id(Path::new("/a/b/xyz.json")), "xyz");
    }
}
