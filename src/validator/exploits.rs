//! Layer 7: known-exploit corpus.
//!
//! Payloads seen in the wild are recorded as sha256 digests over a
//! normalized form of the source, so cosmetic edits (casing, indentation,
//! comment padding) do not produce a fresh payload. The corpus is data;
//! adding an entry is one line.

use sha2::{Digest, Sha256};

use super::violation::{Severity, Violation, ViolationKind};

/// (sha256 of normalized source, label) pairs
const KNOWN_EXPLOITS: &[(&str, &str)] = &[
    (
        "a499c441d6f3e3c9e9e0b60f9335eb7c3366e1c61df283dd5f05aea0c2da2129",
        "subclasses object walk",
    ),
    (
        "2c717b82500330d5e306e5f4a3814f32181858dc66d6c5668c209de47df7edb0",
        "dunder import shell",
    ),
    (
        "9e966fb4ca175a10a3112cc6db2ab75aceab3b2c3c3b3837f283ff06e355839c",
        "passwd file read",
    ),
    (
        "2a16682df0c264d37f3de9548fd179f1b0f4353ce48ebb308e9f40897de5be34",
        "os shell one-liner",
    ),
    (
        "56c41ff8e16f44d03c5d901cd4782ef1d4d671205e32a97be83979533c172107",
        "constructor chain to child_process",
    ),
    (
        "8891306e7a6993a2b5591c8f7c4dc24399366097f578f6b8a9fce055aaeecdd8",
        "base64 exec stager",
    ),
];

/// Payload fragments matched as substrings of the normalized source, for
/// partial reuse of a recorded exploit inside a larger submission
const EXPLOIT_FRAGMENTS: &[(&str, &str)] = &[
    ("__class__.__bases__", "class-graph walk fragment"),
    ("__mro__[1]", "mro walk fragment"),
    (".__subclasses__()[", "subclass index fragment"),
    ("__builtins__['__import__']", "builtins table import fragment"),
    ("constructor.constructor(", "double constructor fragment"),
    ("mainmodule.require(", "node main-module escape fragment"),
    ("/dev/tcp/", "bash network device fragment"),
];

/// Trim every line, drop blanks and comment lines, lowercase, join with
/// newlines. Matches how corpus entries are digested.
pub(crate) fn normalize(code: &str) -> String {
    code.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with("//"))
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Normalized-source digest, the form corpus entries are recorded in.
pub(crate) fn fingerprint(code: &str) -> String {
    digest_normalized(&normalize(code))
}

fn digest_normalized(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn check_known_exploits(code: &str) -> Vec<Violation> {
    let normalized = normalize(code);
    let fingerprint = digest_normalized(&normalized);

    let mut violations: Vec<Violation> = KNOWN_EXPLOITS
        .iter()
        .filter(|(hash, _)| *hash == fingerprint)
        .map(|(_, label)| {
            Violation::new(
                ViolationKind::KnownExploit,
                Severity::Critical,
                format!("known exploit payload: {}", label),
            )
        })
        .collect();

    for (fragment, label) in EXPLOIT_FRAGMENTS {
        if normalized.contains(fragment) {
            violations.push(Violation::new(
                ViolationKind::KnownExploit,
                Severity::Critical,
                format!("known exploit fragment: {}", label),
            ));
        }
    }

    violations
}
