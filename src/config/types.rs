/// Core types and structures for the sealbox system
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Supported sandbox languages - closed set
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Language {
    #[serde(rename = "python")]
    Python,
    #[serde(rename = "javascript")]
    JavaScript,
    /// Restricted shell (`bash -r`)
    #[serde(rename = "bash")]
    Bash,
}

impl Language {
    /// Source file extension for scratch files
    pub fn extension(&self) -> &'static str {
        match self {
            Language::Python => "py",
            Language::JavaScript => "js",
            Language::Bash => "sh",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Bash => "bash",
        }
    }
}

impl FromStr for Language {
    type Err = SandboxError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "python" | "py" => Ok(Language::Python),
            "javascript" | "js" | "node" => Ok(Language::JavaScript),
            "bash" | "sh" | "shell" => Ok(Language::Bash),
            other => Err(SandboxError::UnsupportedLanguage(other.to_string())),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single queued execution request.
///
/// Immutable once created; owned exclusively by the command channel until the
/// worker consumes it. Serialized as the command file payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionCommand {
    /// Opaque unique token; uniqueness is the caller's contract
    pub id: String,
    /// Untrusted source text, bounded by `SandboxConfig::max_code_bytes`
    pub code: String,
    pub language: Language,
    /// Requested wall-clock timeout in seconds (clamped by the engine)
    pub timeout: u64,
    /// Unix timestamp at submission
    pub timestamp: f64,
}

impl ExecutionCommand {
    pub fn new(code: String, language: Language, timeout: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            code,
            language,
            timeout,
            timestamp: unix_now(),
        }
    }
}

/// Result of one execution attempt.
///
/// The engine never surfaces plumbing failures as errors: every exit path
/// produces a well-formed result. Negative exit codes are sentinels
/// (`-9` timeout / resource kill, `-1` engine error).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Wall-clock seconds spent executing
    pub execution_time: f64,
    /// Peak memory in bytes (0 when accounting is unavailable)
    pub memory_usage: u64,
    pub cpu_usage: f64,
    pub timestamp: f64,
    /// Set when the result reports a validation rejection rather than an
    /// execution outcome
    #[serde(default)]
    pub security_error: bool,
}

impl ExecutionResult {
    /// Sentinel exit code for timeout / resource-limit kills
    pub const EXIT_TIMEOUT: i32 = -9;
    /// Sentinel exit code for engine plumbing failures
    pub const EXIT_INTERNAL: i32 = -1;
}

/// Declarative resource limit set, applied atomically to the child process
/// before any untrusted instruction runs. Configuration only; never mutated
/// at runtime.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Address-space ceiling in bytes
    pub max_memory_bytes: u64,
    /// CPU-time ceiling in seconds
    pub max_cpu_seconds: u64,
    /// Per-stream stdout/stderr cap in bytes
    pub max_output_bytes: usize,
    /// Largest file the child may create
    pub max_file_size_bytes: u64,
    /// Process-count ceiling (1 = no forking)
    pub max_process_count: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_bytes: 128 * 1024 * 1024, // 128 MiB
            max_cpu_seconds: 30,
            max_output_bytes: 10_000,
            max_file_size_bytes: 1024 * 1024, // 1 MiB
            max_process_count: 1,
        }
    }
}

/// Sandbox configuration shared by the engine, the command channel, and the
/// CLI. Replaces the fixed global directories of earlier deployments with an
/// explicit struct whose lifecycle is tied to process start.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Command inbox: controller writes, worker claims
    pub command_dir: PathBuf,
    /// Result outbox: worker writes, controller reads and deletes
    pub result_dir: PathBuf,
    /// Scratch directory for throwaway source files
    pub workspace_dir: PathBuf,
    /// Engine-wide hard ceiling on wall-clock execution time (seconds);
    /// per-request timeouts are clamped to this
    pub max_execution_time: u64,
    /// Largest accepted code payload in bytes
    pub max_code_bytes: usize,
    /// Worker inbox poll interval
    pub poll_interval: Duration,
    /// Fixed processing overhead added to the controller's result wait
    pub result_wait_overhead: Duration,
    /// Optional JSON rule overlay applied on top of the built-in lists
    pub rules_file: Option<PathBuf>,
    pub limits: ResourceLimits,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            command_dir: PathBuf::from("/app/commands"),
            result_dir: PathBuf::from("/app/results"),
            workspace_dir: PathBuf::from("/home/sandbox/workspace"),
            max_execution_time: 30,
            max_code_bytes: 5 * 1024,
            poll_interval: Duration::from_millis(100),
            result_wait_overhead: Duration::from_secs(5),
            rules_file: None,
            limits: ResourceLimits::default(),
        }
    }
}

impl SandboxConfig {
    /// Load configuration from `SEALBOX_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(dir) = std::env::var_os("SEALBOX_COMMAND_DIR") {
            config.command_dir = PathBuf::from(dir);
        }
        if let Some(dir) = std::env::var_os("SEALBOX_RESULT_DIR") {
            config.result_dir = PathBuf::from(dir);
        }
        if let Some(dir) = std::env::var_os("SEALBOX_WORKSPACE_DIR") {
            config.workspace_dir = PathBuf::from(dir);
        }
        if let Ok(val) = std::env::var("SEALBOX_MAX_EXECUTION_TIME") {
            if let Ok(secs) = val.parse() {
                config.max_execution_time = secs;
            }
        }
        if let Ok(val) = std::env::var("SEALBOX_MAX_CODE_BYTES") {
            if let Ok(bytes) = val.parse() {
                config.max_code_bytes = bytes;
            }
        }
        if let Ok(val) = std::env::var("SEALBOX_MAX_MEMORY_MB") {
            if let Ok(mb) = val.parse::<u64>() {
                config.limits.max_memory_bytes = mb * 1024 * 1024;
            }
        }
        if let Ok(val) = std::env::var("SEALBOX_MAX_OUTPUT_BYTES") {
            if let Ok(bytes) = val.parse() {
                config.limits.max_output_bytes = bytes;
            }
        }
        if let Some(path) = std::env::var_os("SEALBOX_RULES_FILE") {
            config.rules_file = Some(PathBuf::from(path));
        }

        config
    }

    /// Create the inbox/outbox/workspace directories with owner-only
    /// permissions. Idempotent.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.command_dir, &self.result_dir, &self.workspace_dir] {
            make_private_dir(dir)?;
        }
        Ok(())
    }

    /// Create only the workspace directory. Local one-shot execution
    /// never touches the channel directories, whose defaults may not be
    /// writable outside a deployed container.
    pub fn ensure_workspace(&self) -> Result<()> {
        make_private_dir(&self.workspace_dir)
    }
}

fn make_private_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| {
        SandboxError::Config(format!("failed to create {}: {}", dir.display(), e))
    })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        std::fs::set_permissions(dir, perms).map_err(|e| {
            SandboxError::Config(format!(
                "failed to set permissions on {}: {}",
                dir.display(),
                e
            ))
        })?;
    }
    Ok(())
}

/// Custom error types for sealbox
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Validation rejected: {0}")]
    ValidationRejected(String),

    #[error("Rule set error: {0}")]
    RuleSet(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("No result within {waited_secs}s for command {command_id}")]
    ChannelTimeout { command_id: String, waited_secs: u64 },
}

impl From<nix::errno::Errno> for SandboxError {
    fn from(err: nix::errno::Errno) -> Self {
        SandboxError::Process(err.to_string())
    }
}

/// Result type alias for sealbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Seconds since the Unix epoch as f64, matching the wire schema.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
