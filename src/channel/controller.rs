//! Submission side of the command channel.
//!
//! The controller writes command files into the inbox and polls the
//! outbox for the matching result. It never shares memory with the
//! worker; the directory pair is the whole interface, which lets the two
//! sides live in different containers with a shared volume between them.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use uuid::Uuid;

use crate::config::types::{
    ExecutionCommand, ExecutionResult, Language, Result, SandboxConfig, SandboxError,
};

use super::{write_json_atomic, COMMAND_EXT, PING_EXT, PONG_EXT, RESULT_EXT};

pub struct SandboxController {
    config: SandboxConfig,
}

impl SandboxController {
    pub fn new(config: SandboxConfig) -> Result<Self> {
        config.ensure_dirs()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Queue one command. The file appears in the inbox atomically;
    /// the worker never sees a partial write.
    pub fn submit(&self, command: &ExecutionCommand) -> Result<PathBuf> {
        let path = self
            .config
            .command_dir
            .join(format!("{}.{}", command.id, COMMAND_EXT));
        write_json_atomic(&path, command)?;
        log::debug!("queued command {} ({})", command.id, command.language);
        Ok(path)
    }

    /// Poll the outbox for the result of `command_id`. The wait budget is
    /// the command's own timeout plus a fixed processing overhead; a
    /// worker that cannot answer within that has lost the command.
    pub fn wait_for_result(&self, command_id: &str, timeout: u64) -> Result<ExecutionResult> {
        let budget =
            Duration::from_secs(timeout) + self.config.result_wait_overhead;
        let path = self
            .config
            .result_dir
            .join(format!("{}.{}", command_id, RESULT_EXT));

        let started = Instant::now();
        loop {
            if path.exists() {
                let payload = std::fs::read_to_string(&path)?;
                let result: ExecutionResult = serde_json::from_str(&payload)
                    .map_err(|e| SandboxError::Channel(format!("bad result payload: {}", e)))?;
                std::fs::remove_file(&path)?;
                return Ok(result);
            }
            if started.elapsed() >= budget {
                return Err(SandboxError::ChannelTimeout {
                    command_id: command_id.to_string(),
                    waited_secs: budget.as_secs(),
                });
            }
            thread::sleep(self.config.poll_interval);
        }
    }

    /// Submit and wait, the common round trip.
    pub fn execute(
        &self,
        code: String,
        language: Language,
        timeout: u64,
    ) -> Result<ExecutionResult> {
        let command = ExecutionCommand::new(code, language, timeout);
        let queued = self.submit(&command)?;
        let result = self.wait_for_result(&command.id, command.timeout);
        if result.is_err() {
            // the command may still be sitting unclaimed in the inbox
            let _ = std::fs::remove_file(&queued);
        }
        result
    }

    /// Round-trip liveness probe: drop a ping in the inbox, wait for the
    /// worker's pong.
    pub fn health_check(&self, wait: Duration) -> Result<bool> {
        let id = format!("hc-{}", Uuid::new_v4());
        let ping = self.config.command_dir.join(format!("{}.{}", id, PING_EXT));
        std::fs::write(&ping, b"")?;

        let pong = self.config.result_dir.join(format!("{}.{}", id, PONG_EXT));
        let started = Instant::now();
        while started.elapsed() < wait {
            if pong.exists() {
                let _ = std::fs::remove_file(&pong);
                return Ok(true);
            }
            thread::sleep(self.config.poll_interval);
        }
        // withdraw the unanswered ping so it cannot pile up
        let _ = std::fs::remove_file(&ping);
        Ok(false)
    }

    /// Remove channel files older than `max_age` on both sides. Covers
    /// commands queued while no worker was alive to claim them, and
    /// results (or pongs) written after their waiter had already given up.
    pub fn cleanup_stale(&self, max_age: Duration) -> Result<usize> {
        let mut removed = 0;
        let now = SystemTime::now();
        for dir in [&self.config.command_dir, &self.config.result_dir] {
            for entry in std::fs::read_dir(dir)? {
                let entry = entry?;
                let age = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|t| now.duration_since(t).ok());
                if matches!(age, Some(age) if age > max_age) {
                    if std::fs::remove_file(entry.path()).is_ok() {
                        log::warn!("removed stale channel file {:?}", entry.file_name());
                        removed += 1;
                    }
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> (SandboxController, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = SandboxConfig {
            command_dir: dir.path().join("commands"),
            result_dir: dir.path().join("results"),
            workspace_dir: dir.path().join("workspace"),
            poll_interval: Duration::from_millis(10),
            result_wait_overhead: Duration::from_millis(200),
            ..SandboxConfig::default()
        };
        (SandboxController::new(config).unwrap(), dir)
    }

    #[test]
    fn submit_writes_the_command_file() {
        let (controller, _dir) = controller();
        let command = ExecutionCommand::new("print(1)".to_string(), Language::Python, 5);
        let path = controller.submit(&command).unwrap();
        assert!(path.exists());
        let parsed: ExecutionCommand =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.id, command.id);
        assert_eq!(parsed.code, "print(1)");
    }

    #[test]
    fn wait_times_out_without_a_worker() {
        let (controller, _dir) = controller();
        let err = controller.wait_for_result("nobody", 0).unwrap_err();
        assert!(matches!(err, SandboxError::ChannelTimeout { .. }));
    }

    #[test]
    fn wait_picks_up_and_consumes_the_result() {
        let (controller, _dir) = controller();
        let result = ExecutionResult {
            stdout: "out".to_string(),
            ..Default::default()
        };
        let path = controller.config().result_dir.join("abc.json");
        std::fs::write(&path, serde_json::to_string(&result).unwrap()).unwrap();

        let got = controller.wait_for_result("abc", 1).unwrap();
        assert_eq!(got.stdout, "out");
        assert!(!path.exists());
    }

    #[test]
    fn timed_out_execute_withdraws_the_command() {
        let (controller, _dir) = controller();
        let err = controller
            .execute("print(1)".to_string(), Language::Python, 0)
            .unwrap_err();
        assert!(matches!(err, SandboxError::ChannelTimeout { .. }));
        assert_eq!(
            std::fs::read_dir(&controller.config().command_dir)
                .unwrap()
                .count(),
            0
        );
    }

    #[test]
    fn health_check_false_without_worker_and_withdraws_ping() {
        let (controller, _dir) = controller();
        assert!(!controller.health_check(Duration::from_millis(50)).unwrap());
        assert_eq!(
            std::fs::read_dir(&controller.config().command_dir)
                .unwrap()
                .count(),
            0
        );
    }

    #[test]
    fn stale_cleanup_spares_fresh_commands() {
        let (controller, _dir) = controller();
        let command = ExecutionCommand::new("print(1)".to_string(), Language::Python, 5);
        controller.submit(&command).unwrap();
        assert_eq!(controller.cleanup_stale(Duration::from_secs(60)).unwrap(), 0);
        assert_eq!(controller.cleanup_stale(Duration::ZERO).unwrap(), 1);
        assert_eq!(
            std::fs::read_dir(&controller.config().command_dir)
                .unwrap()
                .count(),
            0
        );
    }

    #[test]
    fn stale_cleanup_sweeps_abandoned_results() {
        // a result that lands after its waiter timed out has no other
        // collector; the sweep covers the outbox too
        let (controller, _dir) = controller();
        let orphan = controller.config().result_dir.join("orphan.json");
        std::fs::write(
            &orphan,
            serde_json::to_string(&ExecutionResult::default()).unwrap(),
        )
        .unwrap();
        assert_eq!(controller.cleanup_stale(Duration::ZERO).unwrap(), 1);
        assert!(!orphan.exists());
    }
}
