//! Observability subsystem.
//!
//! # Design Decisions
//! - Structured logging via tracing; every request log line carries the
//!   request and hop identifiers set by the authenticator
//! - Sink and level come from the validated policy: stdout by default,
//!   an append-only file when the policy names a log directory

pub mod logging;

pub use logging::init_logging;
