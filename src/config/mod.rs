//! Layered configuration subsystem.
//!
//! # Data Flow
//! ```text
//! layer folders (builtin / plugins / root)
//!     → loader.rs (parse one raw layer)
//!     → merge.rs (fold layers in activation order)
//!     → validation.rs (consistency checks, schema compile + cache)
//!     → Configuration (validated, immutable policy)
//!     → shared via Arc to all subsystems
//!
//! On reload:
//!     watcher.rs detects a root config change
//!     → assets::Assets::reload reassembles and revalidates
//!     → atomic generation swap on success
//!     → previous generation retained on failure
//! ```
//!
//! # Design Decisions
//! - The merged policy is immutable for a process generation; the only
//!   mutation path is the admin-list append/remove in `assets`
//! - Merge is pure and never fails; all consistency checking is deferred
//!   to the validator so layer authors get one coherent error
//! - Unset and zero are distinct everywhere (`Option` scalars, tombstone
//!   map merges)

pub mod jsonschema;
pub mod loader;
pub mod merge;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use jsonschema::{JsonSchemaEngine, SchemaEngine};
pub use loader::ConfigError;
pub use merge::{merge, MergeFrom};
pub use schema::{Configuration, ObjectType, Plugin, RunJob, RunType};
pub use validation::{SchemaCache, ValidationError};
pub use watcher::ConfigWatcher;
