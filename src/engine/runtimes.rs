//! Per-language interpreter invocation.
//!
//! Each supported language is a [`Runtime`] that turns a scratch file into
//! a ready-to-spawn [`Command`]. Every runtime starts from the same
//! scrubbed environment: the child inherits nothing from the controller
//! process beyond an explicit minimal set.

use std::path::Path;
use std::process::{Command, Stdio};

use crate::config::types::Language;

pub trait Runtime: Send + Sync {
    fn language(&self) -> Language;

    /// Interpreter command line for `script`, without environment or
    /// working-directory setup.
    fn command(&self, script: &Path) -> Command;
}

struct PythonRuntime;

impl Runtime for PythonRuntime {
    fn language(&self) -> Language {
        Language::Python
    }

    fn command(&self, script: &Path) -> Command {
        let mut cmd = Command::new("python3");
        // -I: isolated mode, no user site or PYTHONPATH; -B: no .pyc files
        cmd.arg("-I").arg("-B").arg(script);
        cmd
    }
}

struct NodeRuntime;

impl Runtime for NodeRuntime {
    fn language(&self) -> Language {
        Language::JavaScript
    }

    fn command(&self, script: &Path) -> Command {
        let mut cmd = Command::new("node");
        cmd.arg("--disallow-code-generation-from-strings").arg(script);
        cmd
    }
}

struct BashRuntime;

impl Runtime for BashRuntime {
    fn language(&self) -> Language {
        Language::Bash
    }

    fn command(&self, script: &Path) -> Command {
        let mut cmd = Command::new("bash");
        // restricted mode: no cd, no PATH changes, no redirection clobber
        cmd.arg("-r").arg(script);
        cmd
    }
}

static PYTHON: PythonRuntime = PythonRuntime;
static NODE: NodeRuntime = NodeRuntime;
static BASH: BashRuntime = BashRuntime;

pub fn runtime_for(language: Language) -> &'static dyn Runtime {
    match language {
        Language::Python => &PYTHON,
        Language::JavaScript => &NODE,
        Language::Bash => &BASH,
    }
}

/// Build the full child command: interpreter line, scrubbed environment,
/// workspace as cwd, pipes on every stdio stream.
pub fn build_command(language: Language, script: &Path, workspace: &Path) -> Command {
    let mut cmd = runtime_for(language).command(script);
    cmd.env_clear()
        .env("PATH", "/usr/bin:/bin")
        .env("HOME", workspace)
        .env("SHELL", "/bin/false")
        .env("TERM", "dumb")
        .env("LANG", "C.UTF-8")
        .env("PYTHONDONTWRITEBYTECODE", "1")
        .current_dir(workspace)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}
