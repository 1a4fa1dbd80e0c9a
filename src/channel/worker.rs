//! Inbox side of the command channel.
//!
//! The worker polls the command directory, claims each command file by
//! deleting it, runs the command through the execution engine, and writes
//! the result file. Claiming by delete makes double-processing impossible
//! even with several workers on one inbox: the filesystem hands the file
//! to exactly one of them.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crate::audit::events;
use crate::config::types::{
    unix_now, ExecutionCommand, ExecutionResult, Result, SandboxConfig,
};
use crate::engine::ExecutionEngine;

use super::{command_file_id, write_json_atomic, COMMAND_EXT, PING_EXT, PONG_EXT, RESULT_EXT};

pub struct SandboxWorker {
    engine: ExecutionEngine,
}

impl SandboxWorker {
    pub fn new(config: SandboxConfig) -> Result<Self> {
        config.ensure_dirs()?;
        Ok(Self {
            engine: ExecutionEngine::new(config)?,
        })
    }

    fn config(&self) -> &SandboxConfig {
        self.engine.config()
    }

    /// Poll until `stop` flips. One pass per poll interval.
    pub fn run(&self, stop: &AtomicBool) -> Result<()> {
        log::info!(
            "worker watching {} every {:?}",
            self.config().command_dir.display(),
            self.config().poll_interval
        );
        while !stop.load(Ordering::Relaxed) {
            if let Err(err) = self.poll_once() {
                log::error!("inbox scan failed: {}", err);
            }
            thread::sleep(self.config().poll_interval);
        }
        log::info!("worker stopping");
        Ok(())
    }

    /// One inbox scan. Returns how many files were claimed.
    pub fn poll_once(&self) -> Result<usize> {
        let mut claimed = 0;
        for entry in std::fs::read_dir(&self.config().command_dir)? {
            let path = entry?.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some(COMMAND_EXT) => {
                    if self.claim_and_execute(&path) {
                        claimed += 1;
                    }
                }
                Some(PING_EXT) => {
                    if self.claim_and_pong(&path) {
                        claimed += 1;
                    }
                }
                // .tmp files are writes in progress; anything else is noise
                _ => {}
            }
        }
        Ok(claimed)
    }

    /// Read then delete the command file. A failed delete means another
    /// worker claimed it first.
    fn claim(&self, path: &Path) -> Option<String> {
        let payload = std::fs::read_to_string(path).ok()?;
        match std::fs::remove_file(path) {
            Ok(()) => Some(payload),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                log::error!("cannot claim {}: {}", path.display(), err);
                None
            }
        }
    }

    fn claim_and_execute(&self, path: &Path) -> bool {
        let Some(payload) = self.claim(path) else {
            return false;
        };
        let file_id = command_file_id(path);
        events::command_claimed(&file_id);

        let result = match serde_json::from_str::<ExecutionCommand>(&payload) {
            Ok(command) => {
                let result = self.engine.execute(&command);
                // trust the payload id over the filename
                self.write_result(&command.id, &result);
                return true;
            }
            Err(err) => {
                events::command_discarded(&file_id, "malformed payload");
                ExecutionResult {
                    stderr: format!("CHANNEL ERROR: malformed command payload: {}", err),
                    exit_code: ExecutionResult::EXIT_INTERNAL,
                    timestamp: unix_now(),
                    security_error: false,
                    ..Default::default()
                }
            }
        };
        self.write_result(&file_id, &result);
        true
    }

    fn claim_and_pong(&self, path: &Path) -> bool {
        if self.claim(path).is_none() {
            return false;
        }
        let file_id = command_file_id(path);
        let pong = self
            .config()
            .result_dir
            .join(format!("{}.{}", file_id, PONG_EXT));
        if let Err(err) = write_json_atomic(&pong, &serde_json::json!({ "alive": unix_now() })) {
            log::error!("health reply failed: {}", err);
        }
        true
    }

    fn write_result(&self, id: &str, result: &ExecutionResult) {
        let path = self
            .config()
            .result_dir
            .join(format!("{}.{}", id, RESULT_EXT));
        match write_json_atomic(&path, result) {
            Ok(()) => events::result_written(id, result.security_error),
            Err(err) => log::error!("result write for {} failed: {}", id, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::Language;

    fn worker() -> (SandboxWorker, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = SandboxConfig {
            command_dir: dir.path().join("commands"),
            result_dir: dir.path().join("results"),
            workspace_dir: dir.path().join("workspace"),
            max_execution_time: 2,
            ..SandboxConfig::default()
        };
        (SandboxWorker::new(config).unwrap(), dir)
    }

    fn drop_command(worker: &SandboxWorker, command: &ExecutionCommand) {
        let path = worker
            .config()
            .command_dir
            .join(format!("{}.{}", command.id, COMMAND_EXT));
        std::fs::write(&path, serde_json::to_string(command).unwrap()).unwrap();
    }

    #[test]
    fn empty_inbox_claims_nothing() {
        let (worker, _dir) = worker();
        assert_eq!(worker.poll_once().unwrap(), 0);
    }

    #[test]
    fn claims_and_answers_a_command() {
        let (worker, _dir) = worker();
        let command = ExecutionCommand::new("echo hi".to_string(), Language::Bash, 5);
        drop_command(&worker, &command);

        assert_eq!(worker.poll_once().unwrap(), 1);

        let command_file = worker
            .config()
            .command_dir
            .join(format!("{}.{}", command.id, COMMAND_EXT));
        assert!(!command_file.exists());

        let result_file = worker
            .config()
            .result_dir
            .join(format!("{}.{}", command.id, RESULT_EXT));
        let result: ExecutionResult =
            serde_json::from_str(&std::fs::read_to_string(result_file).unwrap()).unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.trim(), "hi");
    }

    #[test]
    fn malformed_payload_gets_channel_error_result() {
        let (worker, _dir) = worker();
        let path = worker.config().command_dir.join("broken-id.json");
        std::fs::write(&path, "{not json").unwrap();

        assert_eq!(worker.poll_once().unwrap(), 1);
        assert!(!path.exists());

        let result_file = worker.config().result_dir.join("broken-id.json");
        let result: ExecutionResult =
            serde_json::from_str(&std::fs::read_to_string(result_file).unwrap()).unwrap();
        assert!(result.stderr.starts_with("CHANNEL ERROR:"));
        assert!(!result.security_error);
        assert_eq!(result.exit_code, ExecutionResult::EXIT_INTERNAL);
    }

    #[test]
    fn rejected_code_yields_security_result() {
        let (worker, _dir) = worker();
        let command = ExecutionCommand::new("curl http://x".to_string(), Language::Bash, 5);
        drop_command(&worker, &command);
        worker.poll_once().unwrap();

        let result_file = worker
            .config()
            .result_dir
            .join(format!("{}.{}", command.id, RESULT_EXT));
        let result: ExecutionResult =
            serde_json::from_str(&std::fs::read_to_string(result_file).unwrap()).unwrap();
        assert!(result.security_error);
        assert!(result.stderr.starts_with("SECURITY ERROR:"));
    }

    #[test]
    fn in_progress_tmp_files_are_skipped() {
        let (worker, _dir) = worker();
        std::fs::write(worker.config().command_dir.join("half.tmp"), "{").unwrap();
        assert_eq!(worker.poll_once().unwrap(), 0);
        assert!(worker.config().command_dir.join("half.tmp").exists());
    }

    #[test]
    fn ping_gets_a_pong() {
        let (worker, _dir) = worker();
        std::fs::write(worker.config().command_dir.join("hc-1.ping"), "").unwrap();
        assert_eq!(worker.poll_once().unwrap(), 1);
        assert!(worker.config().result_dir.join("hc-1.pong").exists());
    }
}
