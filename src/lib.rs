//! Hearth: an extensible application host core.
//!
//! Two halves, one trust boundary:
//!
//! ```text
//!  layer folders (builtin / plugins / root)
//!      └─▶ config   merge + validate  ──▶  Policy (immutable generation)
//!      └─▶ assets   overlay fold, atomic generation swap, reload
//!
//!  inbound request
//!      └─▶ server   every path funnels into
//!      └─▶ auth     edge/relay classification, identity context,
//!                   active-request registry, canonical relay headers
//!      └─▶ dispatcher collaborator (plugin routing, outside this core)
//! ```
//!
//! The policy tells the host what exists; the relay protocol makes sure
//! every hop of a request keeps the identity it started with.

pub mod assets;
pub mod auth;
pub mod config;
pub mod observability;
pub mod server;

pub use assets::{AssetOverlay, Assets};
pub use auth::{ActiveRequestRegistry, RelayClient, RequestAuthenticator};
pub use config::{Configuration, ValidationError};
pub use server::HttpServer;
