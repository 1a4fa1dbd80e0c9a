//! Security audit logging.
//!
//! Two sinks: the `log` facade for operator-facing lines, and an optional
//! JSON-lines audit file for machine review. The logger is a process-wide
//! singleton; call [`init`] once at startup to attach the file sink, or
//! skip it to log through the facade only. Audit failures never interrupt
//! sandbox operation.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use serde_json::json;

use crate::config::types::unix_now;

pub struct SecurityLogger {
    sink: Mutex<Option<File>>,
}

impl SecurityLogger {
    fn new(sink: Option<File>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    /// Append one JSON event line. Best effort.
    pub fn record(&self, event: &str, fields: serde_json::Value) {
        let mut entry = json!({
            "timestamp": unix_now(),
            "event": event,
        });
        if let (Some(map), Some(extra)) = (entry.as_object_mut(), fields.as_object()) {
            for (key, value) in extra {
                map.insert(key.clone(), value.clone());
            }
        }

        if let Ok(mut guard) = self.sink.lock() {
            if let Some(file) = guard.as_mut() {
                let _ = writeln!(file, "{}", entry);
            }
        }
    }
}

static AUDIT: OnceLock<SecurityLogger> = OnceLock::new();

/// Attach the JSON audit file. Safe to call once; later calls are ignored.
pub fn init(path: &Path) {
    let sink = OpenOptions::new().create(true).append(true).open(path);
    match sink {
        Ok(file) => {
            let _ = AUDIT.set(SecurityLogger::new(Some(file)));
        }
        Err(err) => {
            log::warn!("audit file {} unavailable: {}", path.display(), err);
            let _ = AUDIT.set(SecurityLogger::new(None));
        }
    }
}

pub fn logger() -> &'static SecurityLogger {
    AUDIT.get_or_init(|| SecurityLogger::new(None))
}

/// Event helpers. Every security-relevant transition in the sandbox goes
/// through one of these so the event vocabulary stays in one place.
pub mod events {
    use super::logger;
    use crate::config::types::Language;
    use crate::validator::violation::{Severity, Violation};
    use serde_json::json;

    pub fn validation_finding(language: Language, violation: &Violation) {
        match violation.severity {
            Severity::Medium => log::info!("validation finding ({}): {}", language, violation),
            _ => log::warn!("validation finding ({}): {}", language, violation),
        }
        logger().record(
            "validation_finding",
            json!({
                "language": language.as_str(),
                "kind": violation.kind,
                "severity": violation.severity.to_string(),
                "message": violation.message,
                "line": violation.line,
            }),
        );
    }

    pub fn validation_rejected(language: Language, violations: &[Violation]) {
        log::warn!(
            "submission rejected ({}) with {} findings",
            language,
            violations.len()
        );
        logger().record(
            "validation_rejected",
            json!({
                "language": language.as_str(),
                "finding_count": violations.len(),
            }),
        );
    }

    pub fn execution_started(command_id: &str, language: Language, timeout: u64) {
        log::info!(
            "executing command {} ({}, timeout {}s)",
            command_id,
            language,
            timeout
        );
        logger().record(
            "execution_started",
            json!({
                "command_id": command_id,
                "language": language.as_str(),
                "timeout": timeout,
            }),
        );
    }

    pub fn execution_finished(command_id: &str, exit_code: i32, execution_time: f64) {
        log::info!(
            "command {} finished: exit {} in {:.3}s",
            command_id,
            exit_code,
            execution_time
        );
        logger().record(
            "execution_finished",
            json!({
                "command_id": command_id,
                "exit_code": exit_code,
                "execution_time": execution_time,
            }),
        );
    }

    pub fn execution_timeout(command_id: &str, timeout: u64) {
        log::warn!("command {} killed after {}s timeout", command_id, timeout);
        logger().record(
            "execution_timeout",
            json!({
                "command_id": command_id,
                "timeout": timeout,
            }),
        );
    }

    pub fn command_claimed(command_id: &str) {
        log::debug!("claimed command {}", command_id);
        logger().record("command_claimed", json!({ "command_id": command_id }));
    }

    pub fn command_discarded(command_id: &str, reason: &str) {
        log::warn!("discarded command {}: {}", command_id, reason);
        logger().record(
            "command_discarded",
            json!({
                "command_id": command_id,
                "reason": reason,
            }),
        );
    }

    pub fn result_written(command_id: &str, security_error: bool) {
        log::debug!(
            "result written for {} (security_error={})",
            command_id,
            security_error
        );
        logger().record(
            "result_written",
            json!({
                "command_id": command_id,
                "security_error": security_error,
            }),
        );
    }

    pub fn netcheck_probe(name: &str, isolated: bool, detail: &str) {
        if isolated {
            log::info!("netcheck {}: isolated ({})", name, detail);
        } else {
            log::warn!("netcheck {}: NOT isolated ({})", name, detail);
        }
        logger().record(
            "netcheck_probe",
            json!({
                "probe": name,
                "isolated": isolated,
                "detail": detail,
            }),
        );
    }

    pub fn lockdown_applied(container: &str, applied: bool) {
        log::info!(
            "iptables lockdown on {}: {}",
            container,
            if applied { "applied" } else { "skipped" }
        );
        logger().record(
            "lockdown_applied",
            json!({
                "container": container,
                "applied": applied,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_without_sink_is_a_noop() {
        let logger = SecurityLogger::new(None);
        logger.record("test_event", json!({ "k": "v" }));
    }

    #[test]
    fn record_appends_one_json_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let file = File::create(&path).unwrap();
        let logger = SecurityLogger::new(Some(file));

        logger.record("probe", json!({ "isolated": true }));
        logger.record("probe", json!({ "isolated": false }));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "probe");
        assert_eq!(first["isolated"], true);
        assert!(first["timestamp"].as_f64().unwrap() > 0.0);
    }
}
