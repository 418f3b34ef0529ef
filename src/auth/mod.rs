//! Request authentication and relay protocol.
//!
//! # Responsibilities
//! - Classify inbound requests as edge (external caller) or relay
//!   (plugin calling back into the core)
//! - Authenticate both kinds without leaking which check failed
//! - Track in-flight requests so a relay hop can continue the identity
//!   of the request that spawned it
//! - Rewrite the reserved header set to the canonical triplet before
//!   handing off to the dispatcher
//!
//! # Design Decisions
//! - Identity, process lookup, impersonation, and downstream routing are
//!   collaborator traits; this module owns only the protocol
//! - Authentication failures are opaque to the caller: same status, same
//!   artificial delay, generic body, detail in the log only
//! - Protocol violations (unknown hop id, bad impersonation target) get a
//!   400 because they indicate a plugin bug, not an attacker

pub mod context;
pub mod forward;
pub mod handler;
pub mod registry;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, Request};
use axum::response::Response;
use futures_util::future::BoxFuture;
use thiserror::Error;

use context::RequestContext;

pub use context::{
    HEADER_AS, HEADER_ID, HEADER_KEY, HEADER_REQUEST, RESERVED_PREFIX,
};
pub use forward::RelayClient;
pub use handler::RequestAuthenticator;
pub use registry::ActiveRequestRegistry;

/// Credential check failures. Never surfaced to the caller verbatim.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("unknown identity '{0}'")]
    UnknownIdentity(String),
    #[error("identity '{0}' may not act as '{1}'")]
    ImpersonationDenied(String, String),
    #[error("identity backend failure: {0}")]
    Backend(String),
}

/// An authenticated principal. Implementations carry whatever backend
/// handle they need; the protocol layer only ever asks for the id.
pub trait Identity: Send + Sync {
    /// Stable identifier, used as the impersonation target name and the
    /// canonical `X-Heedy-As` value.
    fn id(&self) -> &str;
}

/// Credential store collaborator.
pub trait IdentityStore: Send + Sync {
    /// The superuser identity plugins act as on their first hop.
    fn root(&self) -> Arc<dyn Identity>;

    /// Authenticate an edge request from its headers (cookies, tokens).
    fn authenticate<'a>(
        &'a self,
        headers: &'a HeaderMap,
    ) -> BoxFuture<'a, Result<Arc<dyn Identity>, AuthError>>;

    /// Derive an identity handle acting as `target`, checked against the
    /// rights of `identity`.
    fn act_as<'a>(
        &'a self,
        identity: Arc<dyn Identity>,
        target: &'a str,
    ) -> BoxFuture<'a, Result<Arc<dyn Identity>, AuthError>>;
}

/// The plugin process that presented a relay capability secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub plugin: String,
    pub name: String,
}

/// Registry of running plugin processes and their capability secrets.
pub trait ProcessRegistry: Send + Sync {
    /// Resolve a relay capability secret to its process. `None` means the
    /// secret is not recognized.
    fn lookup_by_capability<'a>(
        &'a self,
        secret: &'a str,
    ) -> BoxFuture<'a, Option<ProcessInfo>>;

    /// The core's own capability secret, attached to outgoing relays that
    /// do not already carry one.
    fn core_capability(&self) -> String;
}

/// Downstream plugin-routing collaborator. Receives the authenticated
/// context and the request with canonical relay headers already set.
pub trait Dispatcher: Send + Sync {
    fn serve(
        &self,
        context: RequestContext,
        request: Request<Body>,
    ) -> BoxFuture<'static, Response>;
}
