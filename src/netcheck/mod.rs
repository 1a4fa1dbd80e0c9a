//! Network isolation audit.
//!
//! Validates from the outside that a sandbox container cannot reach
//! anything: each probe runs a connectivity attempt inside the container
//! via `docker exec` and treats success as an isolation failure. Probes
//! that fail to run, exit nonzero, or hang until killed all count as
//! isolated; only demonstrated connectivity is a finding. A best-effort
//! iptables lockdown is available for containers that turn out open.

use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::audit::events;
use crate::config::types::{Result, SandboxError};

/// What a successful probe command proves
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ProbeKind {
    /// Exit 0 means a connection or lookup succeeded
    Connectivity,
    /// Non-empty stdout means ports are published
    Exposure,
}

struct Probe {
    name: &'static str,
    kind: ProbeKind,
    /// Command run inside the container (Connectivity) or on the host
    /// (Exposure)
    argv: &'static [&'static str],
}

const CONTAINER_PROBES: &[Probe] = &[
    Probe {
        name: "http_egress",
        kind: ProbeKind::Connectivity,
        argv: &["curl", "-s", "-o", "/dev/null", "http://example.com"],
    },
    Probe {
        name: "tcp_egress",
        kind: ProbeKind::Connectivity,
        argv: &["nc", "-z", "-w", "2", "1.1.1.1", "80"],
    },
    Probe {
        name: "icmp_egress",
        kind: ProbeKind::Connectivity,
        argv: &["ping", "-c", "1", "-W", "2", "8.8.8.8"],
    },
    Probe {
        name: "rfc1918_10",
        kind: ProbeKind::Connectivity,
        argv: &["nc", "-z", "-w", "2", "10.0.0.1", "80"],
    },
    Probe {
        name: "rfc1918_172",
        kind: ProbeKind::Connectivity,
        argv: &["nc", "-z", "-w", "2", "172.16.0.1", "80"],
    },
    Probe {
        name: "rfc1918_192",
        kind: ProbeKind::Connectivity,
        argv: &["nc", "-z", "-w", "2", "192.168.1.1", "80"],
    },
    Probe {
        name: "loopback",
        kind: ProbeKind::Connectivity,
        argv: &["nc", "-z", "-w", "2", "127.0.0.1", "80"],
    },
    Probe {
        name: "dns_nslookup",
        kind: ProbeKind::Connectivity,
        argv: &["nslookup", "example.com"],
    },
    Probe {
        name: "dns_getent",
        kind: ProbeKind::Connectivity,
        argv: &["getent", "hosts", "example.com"],
    },
];

/// Outbound chains dropped inside the container, best effort
const LOCKDOWN_RULES: &[&[&str]] = &[
    &["iptables", "-P", "OUTPUT", "DROP"],
    &["iptables", "-P", "FORWARD", "DROP"],
    &["iptables", "-A", "OUTPUT", "-o", "lo", "-j", "ACCEPT"],
];

#[derive(Clone, Debug, Serialize)]
pub struct ProbeOutcome {
    pub name: String,
    pub isolated: bool,
    pub detail: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct AuditReport {
    pub container: String,
    pub outcomes: Vec<ProbeOutcome>,
}

impl AuditReport {
    /// The container is isolated only if every probe came back isolated.
    pub fn isolated(&self) -> bool {
        self.outcomes.iter().all(|o| o.isolated)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ProbeOutcome> {
        self.outcomes.iter().filter(|o| !o.isolated)
    }
}

pub struct NetworkAuditor {
    container: String,
    probe_timeout: Duration,
}

impl NetworkAuditor {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            probe_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Run the full probe battery plus the host-side port-exposure check.
    /// A target that is not running is an error; a dead container must not
    /// audit as isolated.
    pub fn run_audit(&self) -> Result<AuditReport> {
        self.ensure_running()?;

        let mut report = AuditReport {
            container: self.container.clone(),
            outcomes: Vec::new(),
        };

        for probe in CONTAINER_PROBES {
            let mut cmd = Command::new("docker");
            cmd.arg("exec").arg(&self.container).args(probe.argv);
            let outcome = self.judge(probe, cmd);
            events::netcheck_probe(&outcome.name, outcome.isolated, &outcome.detail);
            report.outcomes.push(outcome);
        }

        let mut port_cmd = Command::new("docker");
        port_cmd.arg("port").arg(&self.container);
        let exposure = Probe {
            name: "published_ports",
            kind: ProbeKind::Exposure,
            argv: &[],
        };
        let outcome = self.judge(&exposure, port_cmd);
        events::netcheck_probe(&outcome.name, outcome.isolated, &outcome.detail);
        report.outcomes.push(outcome);

        Ok(report)
    }

    fn ensure_running(&self) -> Result<()> {
        let mut cmd = Command::new("docker");
        cmd.arg("inspect")
            .arg("-f")
            .arg("{{.State.Running}}")
            .arg(&self.container);
        match run_with_timeout(cmd, self.probe_timeout) {
            ProbeRun::Completed { success: true, stdout } if stdout.trim() == "true" => Ok(()),
            ProbeRun::Completed { .. } => Err(SandboxError::Config(format!(
                "container {} is not running",
                self.container
            ))),
            ProbeRun::TimedOut => Err(SandboxError::Process(
                "docker inspect did not respond".to_string(),
            )),
            ProbeRun::Unrunnable(err) => {
                Err(SandboxError::Process(format!("docker unavailable: {}", err)))
            }
        }
    }

    fn judge(&self, probe: &Probe, cmd: Command) -> ProbeOutcome {
        match run_with_timeout(cmd, self.probe_timeout) {
            ProbeRun::Completed { success, stdout } => match probe.kind {
                ProbeKind::Connectivity => ProbeOutcome {
                    name: probe.name.to_string(),
                    isolated: !success,
                    detail: if success {
                        "connection succeeded".to_string()
                    } else {
                        "connection refused or failed".to_string()
                    },
                },
                ProbeKind::Exposure => {
                    let exposed = success && !stdout.trim().is_empty();
                    ProbeOutcome {
                        name: probe.name.to_string(),
                        isolated: !exposed,
                        detail: if exposed {
                            format!("published: {}", stdout.trim())
                        } else {
                            "no published ports".to_string()
                        },
                    }
                }
            },
            ProbeRun::TimedOut => ProbeOutcome {
                name: probe.name.to_string(),
                isolated: true,
                detail: "probe hung and was killed".to_string(),
            },
            ProbeRun::Unrunnable(err) => ProbeOutcome {
                name: probe.name.to_string(),
                isolated: true,
                detail: format!("probe unavailable: {}", err),
            },
        }
    }

    /// Drop outbound traffic inside the container. Requires iptables and
    /// NET_ADMIN in the container; anything missing is logged and skipped.
    pub fn apply_lockdown(&self) -> Result<bool> {
        let mut all_applied = true;
        for rule in LOCKDOWN_RULES {
            let mut cmd = Command::new("docker");
            cmd.arg("exec").arg(&self.container).args(*rule);
            match run_with_timeout(cmd, self.probe_timeout) {
                ProbeRun::Completed { success: true, .. } => {}
                ProbeRun::Completed { success: false, .. } => {
                    log::warn!("lockdown rule {:?} rejected", rule);
                    all_applied = false;
                }
                ProbeRun::TimedOut | ProbeRun::Unrunnable(_) => {
                    log::warn!("lockdown rule {:?} could not run", rule);
                    all_applied = false;
                }
            }
        }
        events::lockdown_applied(&self.container, all_applied);
        Ok(all_applied)
    }
}

enum ProbeRun {
    Completed { success: bool, stdout: String },
    TimedOut,
    Unrunnable(std::io::Error),
}

/// Spawn, poll, and kill at the deadline. Probes must not be able to hang
/// the audit.
fn run_with_timeout(mut cmd: Command, timeout: Duration) -> ProbeRun {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => return ProbeRun::Unrunnable(err),
    };

    let stdout_handle = child.stdout.take().map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = String::new();
            use std::io::Read;
            let _ = pipe.read_to_string(&mut buf);
            buf
        })
    });

    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let stdout = stdout_handle
                    .and_then(|h| h.join().ok())
                    .unwrap_or_default();
                return ProbeRun::Completed {
                    success: status.success(),
                    stdout,
                };
            }
            Ok(None) => {
                if started.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return ProbeRun::TimedOut;
                }
                thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return ProbeRun::Unrunnable(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_success_is_captured() {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg("echo reachable");
        match run_with_timeout(cmd, Duration::from_secs(5)) {
            ProbeRun::Completed { success, stdout } => {
                assert!(success);
                assert_eq!(stdout.trim(), "reachable");
            }
            _ => panic!("expected completion"),
        }
    }

    #[test]
    fn nonzero_exit_is_not_success() {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg("exit 7");
        match run_with_timeout(cmd, Duration::from_secs(5)) {
            ProbeRun::Completed { success, .. } => assert!(!success),
            _ => panic!("expected completion"),
        }
    }

    #[test]
    fn hung_probe_is_killed() {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg("sleep 30");
        let started = Instant::now();
        assert!(matches!(
            run_with_timeout(cmd, Duration::from_millis(100)),
            ProbeRun::TimedOut
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn missing_binary_counts_as_isolated() {
        let auditor = NetworkAuditor::new("nonexistent-container");
        let probe = Probe {
            name: "test",
            kind: ProbeKind::Connectivity,
            argv: &[],
        };
        let outcome = auditor.judge(&probe, Command::new("/definitely/not/a/binary"));
        assert!(outcome.isolated);
        assert!(outcome.detail.contains("unavailable"));
    }

    #[test]
    fn audit_of_missing_container_errors() {
        // errors whether docker is absent or the container does not exist
        let auditor = NetworkAuditor::new("sealbox-test-no-such-container")
            .with_probe_timeout(Duration::from_secs(5));
        assert!(auditor.run_audit().is_err());
    }

    #[test]
    fn report_is_isolated_only_when_every_probe_is() {
        let mut report = AuditReport {
            container: "c".to_string(),
            outcomes: vec![ProbeOutcome {
                name: "a".to_string(),
                isolated: true,
                detail: String::new(),
            }],
        };
        assert!(report.isolated());
        report.outcomes.push(ProbeOutcome {
            name: "b".to_string(),
            isolated: false,
            detail: "published: 8080".to_string(),
        });
        assert!(!report.isolated());
        assert_eq!(report.failures().count(), 1);
    }
}
