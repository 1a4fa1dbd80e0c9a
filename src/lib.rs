//! sealbox: a secure, isolated code-execution sandbox
//!
//! Untrusted source text is statically vetted by a multi-layer validator and,
//! only if approved, executed in a resource-limited, network-less child
//! process whose output is returned over a file-based command channel.
//!
//! # Architecture
//!
//! ## Validation ([`validator`])
//! - [`validator::rules`]: input sanity bounds and the loadable rule overlay
//! - [`validator::charset`]: character-level screening
//! - [`validator::patterns`]: regex denylist and obfuscation detection
//! - [`validator::imports`]: import allow/deny policy
//! - [`validator::python`]: Python token-walk analyzer (per-node policy)
//! - [`validator::javascript`]: JavaScript heuristic analyzer
//! - [`validator::shell`]: restricted-shell heuristic analyzer
//! - [`validator::bypass`]: composed bypass-signature detection
//! - [`validator::exploits`]: known-exploit fingerprint matching
//!
//! ## Execution ([`engine`])
//! - [`engine::limits`]: rlimit set applied before the first user instruction
//! - [`engine::scratch`]: owner-only scratch source files with Drop cleanup
//! - [`engine::runtimes`]: per-language interpreter argv and scrubbed child env
//!
//! ## Command channel ([`channel`])
//! - [`channel::controller`]: controller-side submit and bounded result wait
//! - [`channel::worker`]: worker daemon with claim-by-delete semantics
//!
//! ## Observability ([`audit`])
//! - Structured JSON-lines security audit trail
//!
//! ## Isolation audit ([`netcheck`])
//! - Active network-isolation probes against a deployed sandbox instance
//!
//! # Design principles
//!
//! 1. **Fail closed** - a validator layer that errors is a rejection, never
//!    "no violations found"
//! 2. **Results, not panics** - the engine always returns a well-formed
//!    result; plumbing failures carry a negative exit sentinel
//! 3. **Claim-by-delete** - atomic file deletion is the at-most-once
//!    processing guarantee for the command queue
//! 4. **Lists are data** - deny/allow lists and exploit corpora are static
//!    tables, not traversal code; deployments extend them with a JSON
//!    [`validator::RuleSet`] overlay

pub mod audit;
pub mod channel;
pub mod cli;
pub mod config;
pub mod engine;
pub mod netcheck;
pub mod validator;

pub use config::types::{
    ExecutionCommand, ExecutionResult, Language, ResourceLimits, Result, SandboxConfig,
    SandboxError,
};
pub use channel::{SandboxController, SandboxWorker};
pub use engine::ExecutionEngine;
pub use validator::{decide, CodeValidator, RuleSet, Validation, Verdict};
