//! Layer 5 (Bash): command-surface policy.
//!
//! Shell submissions run under `bash -r`, but the restricted mode still
//! leaves a wide command surface, so the validator narrows it first. Each
//! pipeline segment's command word is judged against an allowlist of text
//! utilities; command substitution and interpreter re-entry are blocked
//! outright.

use once_cell::sync::Lazy;
use regex::Regex;

use super::violation::{Severity, Violation, ViolationKind};

/// Text-processing commands a sandboxed script may run
const ALLOWED_COMMANDS: &[&str] = &[
    "echo", "printf", "pwd", "date", "seq", "expr", "ls", "wc", "head", "tail", "sort", "uniq",
    "grep", "cut", "tr", "rev", "basename", "dirname", "true", "false", "test", "[", "let",
    "sleep", "cat",
];

/// Shell builtins with no external effect
const ALLOWED_BUILTINS: &[&str] = &[
    "if", "then", "else", "elif", "fi", "for", "while", "until", "do", "done", "case", "esac",
    "in", "break", "continue", "return", "local", "declare", "shift", "read", "exit", ":",
];

/// Commands whose mere invocation is an escape or destruction attempt
const CRITICAL_COMMANDS: &[&str] = &[
    "curl", "wget", "nc", "ncat", "netcat", "ssh", "scp", "ftp", "telnet", "rm", "dd", "mkfs",
    "mount", "umount", "sudo", "su", "chmod", "chown", "kill", "pkill", "killall", "reboot",
    "shutdown", "bash", "sh", "zsh", "dash", "python", "python3", "perl", "ruby", "node", "eval",
    "exec", "source", ".", "env", "export", "iptables", "crontab", "nohup", "setsid",
];

// $(( is arithmetic expansion, which is harmless; only $( followed by
// anything else opens a subshell
static COMMAND_SUBSTITUTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"`|\$\((?:[^(]|$)").unwrap());
static PROCESS_SUBSTITUTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"[<>]\(").unwrap());
static ABSOLUTE_REDIRECT: Lazy<Regex> = Lazy::new(|| Regex::new(r">>?\s*/").unwrap());
static DEV_TCP: Lazy<Regex> = Lazy::new(|| Regex::new(r"/dev/(tcp|udp)/").unwrap());

/// First command word of each pipeline/list segment: VAR=val prefixes are
/// skipped, surrounding quotes stripped, and bare digits (fd numbers left
/// over from splitting a `>&2` redirect) ignored.
fn command_words(line: &str) -> Vec<&str> {
    let mut words = Vec::new();
    for segment in line.split(|c| c == ';' || c == '|' || c == '&') {
        let word = segment
            .split_whitespace()
            .find(|w| !(w.contains('=') && !w.starts_with('=')));
        let Some(word) = word else { continue };
        let word = word.trim_matches(|c| c == '"' || c == '\'');
        if word.is_empty() || word.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            continue;
        }
        words.push(word);
    }
    words
}

pub fn check_shell_commands(code: &str) -> Vec<Violation> {
    let mut violations = Vec::new();

    for (idx, raw) in code.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if COMMAND_SUBSTITUTION.is_match(line) {
            violations.push(
                Violation::new(
                    ViolationKind::DangerousPattern,
                    Severity::Critical,
                    "command substitution",
                )
                .at_line(line_no),
            );
        }
        if PROCESS_SUBSTITUTION.is_match(line) {
            violations.push(
                Violation::new(
                    ViolationKind::DangerousPattern,
                    Severity::Critical,
                    "process substitution",
                )
                .at_line(line_no),
            );
        }
        if ABSOLUTE_REDIRECT.is_match(line) {
            violations.push(
                Violation::new(
                    ViolationKind::DangerousPattern,
                    Severity::Critical,
                    "redirection to absolute path",
                )
                .at_line(line_no),
            );
        }
        if DEV_TCP.is_match(line) {
            violations.push(
                Violation::new(
                    ViolationKind::DangerousPattern,
                    Severity::Critical,
                    "network pseudo-device",
                )
                .at_line(line_no),
            );
        }

        for word in command_words(line) {
            if ALLOWED_BUILTINS.contains(&word) {
                continue;
            }
            if CRITICAL_COMMANDS.contains(&word) {
                violations.push(
                    Violation::new(
                        ViolationKind::DangerousCall,
                        Severity::Critical,
                        format!("forbidden command: {}", word),
                    )
                    .at_line(line_no),
                );
            } else if !ALLOWED_COMMANDS.contains(&word) {
                violations.push(
                    Violation::new(
                        ViolationKind::DangerousCall,
                        Severity::High,
                        format!("command outside the allowlist: {}", word),
                    )
                    .at_line(line_no),
                );
            }
        }
    }

    violations
}
