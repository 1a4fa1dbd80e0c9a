//! Layer 4: import policy.
//!
//! Two lists per language: an allowlist of modules safe to load and a
//! denylist of modules that must never load. Deny wins over allow, so a
//! module appearing on both lists stays blocked. Anything on neither list
//! is blocked too; the allowlist is the whole permitted surface.

use once_cell::sync::Lazy;
use regex::Regex;

use super::violation::{Severity, Violation, ViolationKind};
use crate::config::types::Language;

/// Pure-computation Python stdlib modules
const PYTHON_ALLOWED: &[&str] = &[
    "math",
    "random",
    "datetime",
    "json",
    "re",
    "collections",
    "itertools",
    "functools",
    "string",
    "statistics",
    "decimal",
    "fractions",
    "heapq",
    "bisect",
    "copy",
    "enum",
    "dataclasses",
    "typing",
    "textwrap",
    "unicodedata",
];

/// Modules that reach outside the interpreter
const PYTHON_DENIED: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "socket",
    "shutil",
    "pathlib",
    "glob",
    "tempfile",
    "io",
    "pickle",
    "marshal",
    "shelve",
    "ctypes",
    "cffi",
    "importlib",
    "builtins",
    "urllib",
    "requests",
    "http",
    "httpx",
    "ftplib",
    "smtplib",
    "telnetlib",
    "asyncio",
    "threading",
    "multiprocessing",
    "concurrent",
    "signal",
    "resource",
    "pty",
    "fcntl",
    "termios",
    "pwd",
    "grp",
    "sqlite3",
    "webbrowser",
    "code",
    "codeop",
    "inspect",
    "gc",
    "traceback",
    "platform",
    "getpass",
];

/// Node builtins that reach outside the runtime
const JAVASCRIPT_DENIED: &[&str] = &[
    "child_process",
    "fs",
    "net",
    "http",
    "https",
    "http2",
    "dgram",
    "dns",
    "tls",
    "os",
    "cluster",
    "worker_threads",
    "vm",
    "v8",
    "repl",
    "process",
    "inspector",
    "module",
];

static PYTHON_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*import\s+([A-Za-z_][\w.]*(?:\s*,\s*[A-Za-z_][\w.]*)*)").unwrap());
static PYTHON_FROM_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*from\s+([A-Za-z_][\w.]*)\s+import\s+(.+)").unwrap());
static JS_REQUIRE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"require\s*\(\s*["']([^"']+)["']\s*\)"#).unwrap());
static JS_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*import\b.*?\bfrom\s+["']([^"']+)["']"#).unwrap());

fn root_module(name: &str) -> &str {
    let name = name.trim().trim_start_matches("node:");
    name.split(['.', '/']).next().unwrap_or(name)
}

fn judge_python_module(module: &str, line_no: usize, violations: &mut Vec<Violation>) {
    let root = root_module(module);
    if PYTHON_DENIED.contains(&root) {
        violations.push(
            Violation::new(
                ViolationKind::ForbiddenImport,
                Severity::Critical,
                format!("forbidden import: {}", root),
            )
            .at_line(line_no),
        );
    } else if !PYTHON_ALLOWED.contains(&root) {
        violations.push(
            Violation::new(
                ViolationKind::ForbiddenImport,
                Severity::High,
                format!("import outside the allowlist: {}", root),
            )
            .at_line(line_no),
        );
    }
}

fn check_python_imports(code: &str) -> Vec<Violation> {
    let mut violations = Vec::new();

    for (idx, line) in code.lines().enumerate() {
        let line_no = idx + 1;

        if let Some(caps) = PYTHON_FROM_IMPORT.captures(line) {
            judge_python_module(&caps[1], line_no, &mut violations);
            if caps[2].trim_start().starts_with('*') {
                violations.push(
                    Violation::new(
                        ViolationKind::WildcardImport,
                        Severity::High,
                        format!("wildcard import from {}", root_module(&caps[1])),
                    )
                    .at_line(line_no),
                );
            }
        } else if let Some(caps) = PYTHON_IMPORT.captures(line) {
            for module in caps[1].split(',') {
                judge_python_module(module, line_no, &mut violations);
            }
        }
    }

    violations
}

fn check_javascript_imports(code: &str) -> Vec<Violation> {
    let mut violations = Vec::new();

    for (idx, line) in code.lines().enumerate() {
        let line_no = idx + 1;
        let modules = JS_REQUIRE
            .captures_iter(line)
            .map(|c| c.get(1))
            .chain(JS_IMPORT.captures(line).map(|c| c.get(1)))
            .flatten();

        for module in modules {
            let root = root_module(module.as_str());
            if JAVASCRIPT_DENIED.contains(&root) {
                violations.push(
                    Violation::new(
                        ViolationKind::ForbiddenImport,
                        Severity::Critical,
                        format!("forbidden module: {}", root),
                    )
                    .at_line(line_no),
                );
            } else if module.as_str().starts_with('.') || module.as_str().starts_with('/') {
                violations.push(
                    Violation::new(
                        ViolationKind::ForbiddenImport,
                        Severity::High,
                        format!("filesystem module path: {}", module.as_str()),
                    )
                    .at_line(line_no),
                );
            }
        }
    }

    violations
}

/// Apply the import policy for `language`. Bash has no import construct;
/// its command surface is handled by the shell layer.
pub fn check_imports(code: &str, language: Language) -> Vec<Violation> {
    match language {
        Language::Python => check_python_imports(code),
        Language::JavaScript => check_javascript_imports(code),
        Language::Bash => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::violation::{decide, Verdict};

    fn verdict(code: &str, language: Language) -> Verdict {
        decide(&check_imports(code, language))
    }

    #[test]
    fn math_import_allowed() {
        assert_eq!(verdict("import math\nprint(math.pi)", Language::Python), Verdict::Accept);
    }

    #[test]
    fn from_import_of_allowed_module() {
        assert_eq!(
            verdict("from collections import Counter", Language::Python),
            Verdict::Accept
        );
    }

    #[test]
    fn os_import_is_critical() {
        let violations = check_imports("import os", Language::Python);
        assert_eq!(violations[0].severity, Severity::Critical);
    }

    #[test]
    fn comma_import_checks_every_module() {
        let violations = check_imports("import math, os", Language::Python);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("os"));
    }

    #[test]
    fn submodule_judged_by_root() {
        assert_eq!(
            verdict("import os.path", Language::Python),
            Verdict::Reject
        );
    }

    #[test]
    fn unknown_module_blocked_by_allowlist() {
        assert_eq!(verdict("import numpy", Language::Python), Verdict::Reject);
    }

    #[test]
    fn wildcard_import_flagged() {
        let violations = check_imports("from math import *", Language::Python);
        assert!(violations
            .iter()
            .any(|v| v.kind == ViolationKind::WildcardImport));
        assert_eq!(decide(&violations), Verdict::Reject);
    }

    #[test]
    fn js_require_fs_rejected() {
        assert_eq!(
            verdict("const fs = require('fs');", Language::JavaScript),
            Verdict::Reject
        );
    }

    #[test]
    fn js_node_prefix_normalized() {
        assert_eq!(
            verdict("const cp = require('node:child_process');", Language::JavaScript),
            Verdict::Reject
        );
    }

    #[test]
    fn js_esm_import_checked() {
        assert_eq!(
            verdict("import { exec } from 'child_process';", Language::JavaScript),
            Verdict::Reject
        );
    }

    #[test]
    fn js_relative_path_rejected() {
        assert_eq!(
            verdict("const x = require('../secrets');", Language::JavaScript),
            Verdict::Reject
        );
    }

    #[test]
    fn bash_has_no_import_layer() {
        assert!(check_imports("ls -la", Language::Bash).is_empty());
    }
}
