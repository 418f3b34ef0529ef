//! The per-request authentication state machine.
//!
//! # Responsibilities
//! - Classify each inbound request as edge or relay
//! - Run the matching authentication path and mint a `RequestContext`
//! - Rewrite reserved headers to the canonical triplet
//! - Register the hop, invoke the dispatcher, deregister, log latency
//!
//! # Design Decisions
//! - Edge and relay credential failures are indistinguishable: both pay
//!   the same fixed delay and return the same opaque 401
//! - An unknown continuation id never falls back to a fresh identity;
//!   that would let a buggy plugin silently escalate to root

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use super::context::{
    RequestContext, HEADER_AS, HEADER_ID, HEADER_KEY, HEADER_REQUEST, RESERVED_PREFIX,
};
use super::registry::ActiveRequestRegistry;
use super::{Dispatcher, IdentityStore, ProcessRegistry};

/// Delay paid by every failed authentication attempt.
pub const DEFAULT_AUTH_FAILURE_DELAY: Duration = Duration::from_secs(1);

/// A rejected request. The code lands in the JSON `error` field.
#[derive(Debug)]
pub struct ProtocolError {
    status: StatusCode,
    code: &'static str,
    description: String,
}

impl ProtocolError {
    pub fn access_denied(status: StatusCode, description: impl Into<String>) -> Self {
        Self {
            status,
            code: "access_denied",
            description: description.into(),
        }
    }

    /// Malformed relay chain: a plugin bug, not an attacker.
    pub fn plugin_error(description: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "plugin_error",
            description: description.into(),
        }
    }

    pub fn bad_request(description: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            description: description.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ProtocolError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "error": self.code,
                "error_description": self.description,
            })),
        )
            .into_response()
    }
}

/// Front door for every request: authenticates, contextualizes, and hands
/// off to the dispatcher.
#[derive(Clone)]
pub struct RequestAuthenticator {
    identities: Arc<dyn IdentityStore>,
    processes: Arc<dyn ProcessRegistry>,
    dispatcher: Arc<dyn Dispatcher>,
    registry: Arc<ActiveRequestRegistry>,
    auth_failure_delay: Duration,
}

impl RequestAuthenticator {
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        processes: Arc<dyn ProcessRegistry>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            identities,
            processes,
            dispatcher,
            registry: Arc::new(ActiveRequestRegistry::new()),
            auth_failure_delay: DEFAULT_AUTH_FAILURE_DELAY,
        }
    }

    /// Override the artificial failure delay. Tests set this to zero.
    pub fn with_auth_failure_delay(mut self, delay: Duration) -> Self {
        self.auth_failure_delay = delay;
        self
    }

    pub fn registry(&self) -> &Arc<ActiveRequestRegistry> {
        &self.registry
    }

    /// Run the full state machine for one request.
    pub async fn handle(&self, mut request: Request<Body>) -> Response {
        let start = Instant::now();

        let context = match self.authenticate(&mut request).await {
            Ok(context) => context,
            Err(e) => return e.into_response(),
        };

        if let Err(e) = set_canonical_headers(request.headers_mut(), &context) {
            return e.into_response();
        }

        self.registry.insert(context.clone());
        let response = self.dispatcher.serve(context.clone(), request).await;
        self.registry.remove(&context.hop_id);

        tracing::debug!(
            request = %context.request_id,
            hop = %context.hop_id,
            identity = %context.identity.id(),
            plugin = ?context.plugin,
            status = %response.status(),
            elapsed = ?start.elapsed(),
            "request complete"
        );
        response
    }

    async fn authenticate(
        &self,
        request: &mut Request<Body>,
    ) -> Result<RequestContext, ProtocolError> {
        // The capability secret must never travel further than this point.
        match take_header(request.headers_mut(), HEADER_KEY)? {
            Some(secret) => self.relay_auth(&secret, request).await,
            None => self.edge_auth(request.headers()).await,
        }
    }

    /// External caller: reserved headers are rejected outright, then the
    /// identity store checks credentials. Takes the header map rather than
    /// the request so the future stays Send; the body is never needed
    /// here.
    async fn edge_auth(&self, headers: &HeaderMap) -> Result<RequestContext, ProtocolError> {
        for name in headers.keys() {
            if name.as_str().starts_with(RESERVED_PREFIX) {
                tracing::warn!(header = %name, "reserved relay header on edge request");
                return Err(ProtocolError::access_denied(
                    StatusCode::FORBIDDEN,
                    "X-Heedy headers are reserved for plugin use",
                ));
            }
        }

        match self.identities.authenticate(headers).await {
            Ok(identity) => Ok(RequestContext::new_edge(identity)),
            Err(e) => {
                tracing::warn!(error = %e, "edge authentication failed");
                Err(self.opaque_failure().await)
            }
        }
    }

    /// Plugin calling back into the core with a capability secret.
    async fn relay_auth(
        &self,
        secret: &str,
        request: &mut Request<Body>,
    ) -> Result<RequestContext, ProtocolError> {
        let Some(process) = self.processes.lookup_by_capability(secret).await else {
            tracing::warn!("relay capability secret not recognized");
            return Err(self.opaque_failure().await);
        };

        let mut context = match take_header(request.headers_mut(), HEADER_ID)? {
            Some(hop_id) => {
                let Some(origin) = self.registry.lookup(&hop_id) else {
                    tracing::warn!(
                        plugin = %process.plugin,
                        hop = %hop_id,
                        "continuation of unknown hop"
                    );
                    return Err(ProtocolError::plugin_error(
                        "no active request with the given id",
                    ));
                };
                RequestContext::continuation(&origin, Some(process.plugin.clone()))
            }
            None => RequestContext::new(
                Uuid::new_v4().to_string(),
                self.identities.root(),
                Some(process.plugin.clone()),
            ),
        };

        if let Some(target) = take_header(request.headers_mut(), HEADER_AS)? {
            if target != context.identity.id() {
                match self.identities.act_as(context.identity.clone(), &target).await {
                    Ok(identity) => context.identity = identity,
                    Err(e) => {
                        tracing::warn!(
                            plugin = %process.plugin,
                            target = %target,
                            error = %e,
                            "impersonation rejected"
                        );
                        return Err(ProtocolError::plugin_error(
                            "cannot act as the requested identity",
                        ));
                    }
                }
            }
        }

        Ok(context)
    }

    async fn opaque_failure(&self) -> ProtocolError {
        tokio::time::sleep(self.auth_failure_delay).await;
        ProtocolError::access_denied(StatusCode::UNAUTHORIZED, "access denied")
    }
}

/// Remove a header, requiring it to be valid text if present.
fn take_header(
    headers: &mut HeaderMap,
    name: &'static str,
) -> Result<Option<String>, ProtocolError> {
    match headers.remove(name) {
        None => Ok(None),
        Some(value) => match value.to_str() {
            Ok(s) => Ok(Some(s.to_string())),
            Err(_) => Err(ProtocolError::bad_request(format!(
                "header {name} is not valid text"
            ))),
        },
    }
}

/// Overwrite the identity/hop/request-id triplet with the authenticated
/// values. Whatever the caller sent in these headers is discarded.
fn set_canonical_headers(
    headers: &mut HeaderMap,
    context: &RequestContext,
) -> Result<(), ProtocolError> {
    let identity = HeaderValue::from_str(context.identity.id())
        .map_err(|_| ProtocolError::bad_request("identity id is not a valid header value"))?;
    let hop = HeaderValue::from_str(&context.hop_id)
        .map_err(|_| ProtocolError::bad_request("hop id is not a valid header value"))?;
    let request = HeaderValue::from_str(&context.request_id)
        .map_err(|_| ProtocolError::bad_request("request id is not a valid header value"))?;

    headers.insert(HeaderName::from_static(HEADER_AS), identity);
    headers.insert(HeaderName::from_static(HEADER_ID), hop);
    headers.insert(HeaderName::from_static(HEADER_REQUEST), request);
    Ok(())
}

#[cfg(test)]
mod tests {
    use futures_util::future::BoxFuture;

    use super::*;
    use crate::auth::{AuthError, Identity, ProcessInfo};

    struct User(&'static str);
    impl Identity for User {
        fn id(&self) -> &str {
            self.0
        }
    }

    struct Identities;
    impl IdentityStore for Identities {
        fn root(&self) -> Arc<dyn Identity> {
            Arc::new(User("root"))
        }
        fn authenticate<'a>(
            &'a self,
            headers: &'a HeaderMap,
        ) -> BoxFuture<'a, Result<Arc<dyn Identity>, AuthError>> {
            Box::pin(async move {
                if headers.get("authorization").is_some() {
                    Ok(Arc::new(User("alice")) as Arc<dyn Identity>)
                } else {
                    Err(AuthError::InvalidCredentials)
                }
            })
        }
        fn act_as<'a>(
            &'a self,
            _identity: Arc<dyn Identity>,
            target: &'a str,
        ) -> BoxFuture<'a, Result<Arc<dyn Identity>, AuthError>> {
            Box::pin(async move {
                if target == "bob" {
                    Ok(Arc::new(User("bob")) as Arc<dyn Identity>)
                } else {
                    Err(AuthError::UnknownIdentity(target.to_string()))
                }
            })
        }
    }

    struct Processes;
    impl ProcessRegistry for Processes {
        fn lookup_by_capability<'a>(
            &'a self,
            secret: &'a str,
        ) -> BoxFuture<'a, Option<ProcessInfo>> {
            Box::pin(async move {
                (secret == "timer-secret").then(|| ProcessInfo {
                    plugin: "timer".to_string(),
                    name: "main".to_string(),
                })
            })
        }
        fn core_capability(&self) -> String {
            "core-secret".to_string()
        }
    }

    /// Echoes the canonical headers back so tests can inspect the rewrite.
    struct EchoDispatcher;
    impl Dispatcher for EchoDispatcher {
        fn serve(
            &self,
            _context: RequestContext,
            request: Request<Body>,
        ) -> BoxFuture<'static, Response> {
            let headers = request.headers().clone();
            Box::pin(async move {
                let mut response = StatusCode::OK.into_response();
                for name in [HEADER_KEY, HEADER_AS, HEADER_ID, HEADER_REQUEST] {
                    if let Some(value) = headers.get(name) {
                        response
                            .headers_mut()
                            .insert(HeaderName::from_static(name), value.clone());
                    }
                }
                response
            })
        }
    }

    fn authenticator() -> RequestAuthenticator {
        RequestAuthenticator::new(
            Arc::new(Identities),
            Arc::new(Processes),
            Arc::new(EchoDispatcher),
        )
        .with_auth_failure_delay(Duration::ZERO)
    }

    fn request() -> axum::http::request::Builder {
        Request::builder().uri("/api/objects")
    }

    #[tokio::test]
    async fn test_edge_with_reserved_header_is_forbidden() {
        let auth = authenticator();
        let req = request()
            .header("authorization", "Bearer tok")
            .header("x-heedy-id", "some-hop")
            .body(Body::empty())
            .unwrap();
        let response = auth.handle(req).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_bad_credentials_are_opaque_401() {
        let auth = authenticator();
        let req = request().body(Body::empty()).unwrap();
        let response = auth.handle(req).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_relay_strips_key_and_sets_triplet() {
        let auth = authenticator();
        let req = request()
            .header("x-heedy-key", "timer-secret")
            .body(Body::empty())
            .unwrap();
        let response = auth.handle(req).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(HEADER_KEY).is_none());
        assert_eq!(response.headers()[HEADER_AS], "root");
        assert!(response.headers().get(HEADER_ID).is_some());
        assert!(response.headers().get(HEADER_REQUEST).is_some());
    }

    #[tokio::test]
    async fn test_unknown_continuation_is_plugin_error() {
        let auth = authenticator();
        let req = request()
            .header("x-heedy-key", "timer-secret")
            .header("x-heedy-id", "never-registered")
            .body(Body::empty())
            .unwrap();
        let response = auth.handle(req).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_impersonation_switches_identity() {
        let auth = authenticator();
        let req = request()
            .header("x-heedy-key", "timer-secret")
            .header("x-heedy-as", "bob")
            .body(Body::empty())
            .unwrap();
        let response = auth.handle(req).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[HEADER_AS], "bob");
    }

    // tokio::spawn requires a Send future; this fails to compile if any
    // borrow held across an await in the state machine is not Send.
    #[tokio::test]
    async fn test_handle_runs_on_a_spawned_task() {
        let auth = authenticator();
        let req = request().body(Body::empty()).unwrap();
        let response = tokio::spawn(async move { auth.handle(req).await })
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_registry_is_empty_after_dispatch() {
        let auth = authenticator();
        let req = request()
            .header("x-heedy-key", "timer-secret")
            .body(Body::empty())
            .unwrap();
        let _ = auth.handle(req).await;
        assert!(auth.registry().is_empty());
    }
}
