//! Configuration and shared types
//!
//! Explicit configuration structs passed into constructors; no module-level
//! globals or import-time side effects.

pub mod types;
