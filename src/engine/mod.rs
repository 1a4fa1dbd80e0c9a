//! Code execution with kernel-enforced resource limits.
//!
//! The engine owns the full lifecycle of one execution: validate, write a
//! scratch file, spawn the interpreter in its own session with rlimits
//! applied pre-exec, drain output under a cap, enforce the wall-clock
//! deadline, and always come back with a well-formed [`ExecutionResult`].
//! Plumbing failures become results with the `-1` sentinel exit code, not
//! errors; the command channel must be able to report anything.

pub mod limits;
pub mod runtimes;
pub mod scratch;

use std::io::Read;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::Child;
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;

use crate::audit::events;
use crate::config::types::{unix_now, ExecutionCommand, ExecutionResult, Result, SandboxConfig};
use crate::validator::{rejection_summary, CodeValidator};

use scratch::ScratchFile;

/// Poll interval while waiting for the child to exit
const WAIT_POLL: Duration = Duration::from_millis(50);

pub struct ExecutionEngine {
    config: SandboxConfig,
    validator: CodeValidator,
}

impl ExecutionEngine {
    /// Build an engine for `config`. Fails only when the configured rule
    /// overlay cannot be loaded or compiled.
    pub fn new(config: SandboxConfig) -> Result<Self> {
        let validator = CodeValidator::from_config(&config)?;
        Ok(Self { config, validator })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Validate and run one command. Infallible by contract: every
    /// failure mode maps to a result.
    pub fn execute(&self, command: &ExecutionCommand) -> ExecutionResult {
        let validation = self.validator.validate(&command.code, command.language);
        if !validation.is_accepted() {
            return ExecutionResult {
                stderr: rejection_summary(&validation.violations),
                exit_code: 1,
                timestamp: unix_now(),
                security_error: true,
                ..Default::default()
            };
        }

        // 0 and oversized requests both collapse onto the hard ceiling
        let timeout = match command.timeout {
            0 => self.config.max_execution_time,
            t => t.min(self.config.max_execution_time),
        };

        events::execution_started(&command.id, command.language, timeout);
        let result = self.run(command, timeout);
        match result.exit_code {
            ExecutionResult::EXIT_TIMEOUT => events::execution_timeout(&command.id, timeout),
            code => events::execution_finished(&command.id, code, result.execution_time),
        }
        result
    }

    fn run(&self, command: &ExecutionCommand, timeout: u64) -> ExecutionResult {
        let scratch = match ScratchFile::create(
            &self.config.workspace_dir,
            command.language,
            &command.code,
        ) {
            Ok(scratch) => scratch,
            Err(err) => return internal_error(format!("scratch file: {}", err)),
        };

        let mut cmd = runtimes::build_command(
            command.language,
            scratch.path(),
            &self.config.workspace_dir,
        );
        let child_limits = self.config.limits;
        // SAFETY: the closure only calls async-signal-safe libc wrappers
        unsafe {
            cmd.pre_exec(move || {
                limits::detach_session()?;
                limits::apply_child_limits(&child_limits)
            });
        }

        let (_, cpu_before) = children_rusage();
        let started = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => return internal_error(format!("spawn: {}", err)),
        };

        let cap = self.config.limits.max_output_bytes;
        let stdout_handle = child.stdout.take().map(|pipe| {
            thread::spawn(move || drain_capped(pipe, cap))
        });
        let stderr_handle = child.stderr.take().map(|pipe| {
            thread::spawn(move || drain_capped(pipe, cap))
        });

        let deadline = Duration::from_secs(timeout);
        let mut timed_out = false;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {
                    if started.elapsed() >= deadline {
                        timed_out = true;
                        kill_group(&child);
                        break child.wait().ok();
                    }
                    thread::sleep(WAIT_POLL);
                }
                Err(err) => {
                    kill_group(&child);
                    let _ = child.wait();
                    return internal_error(format!("wait: {}", err));
                }
            }
        };

        let execution_time = started.elapsed().as_secs_f64();
        let stdout = stdout_handle
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        let stderr = stderr_handle
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        // the counter accumulates across every reaped child, so the CPU
        // charged to this execution is the delta over its window
        let (memory_usage, cpu_after) = children_rusage();
        let cpu_usage = (cpu_after - cpu_before).max(0.0);

        if timed_out {
            return ExecutionResult {
                stdout,
                stderr: format!("EXECUTION TIMEOUT: exceeded {}s limit", timeout),
                exit_code: ExecutionResult::EXIT_TIMEOUT,
                execution_time,
                memory_usage,
                cpu_usage,
                timestamp: unix_now(),
                security_error: false,
            };
        }

        let exit_code = status
            .map(|s| s.code().or_else(|| s.signal().map(|sig| -sig)))
            .flatten()
            .unwrap_or(ExecutionResult::EXIT_INTERNAL);

        ExecutionResult {
            stdout,
            stderr,
            exit_code,
            execution_time,
            memory_usage,
            cpu_usage,
            timestamp: unix_now(),
            security_error: false,
        }
    }
}

/// SIGKILL the child's whole process group. The child called setsid, so
/// its pid is the pgid.
fn kill_group(child: &Child) {
    let pgid = Pid::from_raw(child.id() as i32);
    if let Err(err) = killpg(pgid, Signal::SIGKILL) {
        log::warn!("killpg({}) failed: {}", pgid, err);
    }
}

fn internal_error(detail: String) -> ExecutionResult {
    log::error!("execution plumbing failure: {}", detail);
    ExecutionResult {
        stderr: format!("EXECUTION ERROR: {}", detail),
        exit_code: ExecutionResult::EXIT_INTERNAL,
        timestamp: unix_now(),
        ..Default::default()
    }
}

/// Read a pipe to EOF, keeping only the first `cap` bytes. Draining past
/// the cap keeps the child from blocking on a full pipe.
fn drain_capped<R: Read>(mut reader: R, cap: usize) -> String {
    let mut kept: Vec<u8> = Vec::new();
    let mut buf = [0u8; 4096];
    let mut truncated = false;

    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if kept.len() < cap {
                    let take = n.min(cap - kept.len());
                    kept.extend_from_slice(&buf[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(_) => break,
        }
    }

    let mut text = String::from_utf8_lossy(&kept).into_owned();
    if truncated {
        text.push_str("\n... [output truncated]");
    }
    text
}

/// Peak RSS (bytes) and CPU seconds accumulated by reaped children.
/// Both counters span every child this process has waited on: CPU is
/// made per-execution by differencing two samples, while the RSS figure
/// stays a process-lifetime high-water mark.
fn children_rusage() -> (u64, f64) {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    // SAFETY: usage is a valid zeroed rusage for the call to fill
    let rc = unsafe { libc::getrusage(libc::RUSAGE_CHILDREN, &mut usage) };
    if rc != 0 {
        return (0, 0.0);
    }
    let memory = (usage.ru_maxrss as u64) * 1024;
    let cpu = usage.ru_utime.tv_sec as f64
        + usage.ru_utime.tv_usec as f64 / 1e6
        + usage.ru_stime.tv_sec as f64
        + usage.ru_stime.tv_usec as f64 / 1e6;
    (memory, cpu)
}
