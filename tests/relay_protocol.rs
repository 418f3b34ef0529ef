//! End-to-end tests of edge/relay classification, identity continuation,
//! and the canonical header rewrite.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::util::ServiceExt;

use common::{MockIdentityStore, MockProcessRegistry, RecordingDispatcher, TestUser};
use hearth::auth::context::RequestContext;
use hearth::auth::{HEADER_AS, HEADER_ID, HEADER_KEY, HEADER_REQUEST};
use hearth::{HttpServer, RequestAuthenticator};

struct Harness {
    identities: Arc<MockIdentityStore>,
    dispatcher: Arc<RecordingDispatcher>,
    authenticator: RequestAuthenticator,
}

fn harness() -> Harness {
    let identities = Arc::new(MockIdentityStore::new("alice-token", "alice"));
    let dispatcher = RecordingDispatcher::new();
    let authenticator = RequestAuthenticator::new(
        identities.clone(),
        Arc::new(MockProcessRegistry::new(&[("timer-secret", "timer")])),
        dispatcher.clone(),
    )
    .with_auth_failure_delay(Duration::ZERO);
    Harness {
        identities,
        dispatcher,
        authenticator,
    }
}

fn get(uri: &str) -> axum::http::request::Builder {
    Request::builder().uri(uri)
}

async fn error_code(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    body["error"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn reserved_header_without_key_is_rejected_before_authentication() {
    let h = harness();
    let req = get("/api/objects")
        .header("authorization", "Bearer alice-token")
        .header("x-heedy-id", "some-hop")
        .body(Body::empty())
        .unwrap();

    let response = h.authenticator.handle(req).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(response).await, "access_denied");
    // Credential checking never ran.
    assert_eq!(h.identities.authenticate_calls(), 0);
    assert!(h.dispatcher.served().is_empty());
}

#[tokio::test]
async fn edge_credential_failure_is_opaque() {
    let h = harness();
    let req = get("/api/objects")
        .header("authorization", "Bearer wrong")
        .body(Body::empty())
        .unwrap();

    let response = h.authenticator.handle(req).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(response).await, "access_denied");
}

#[tokio::test]
async fn unknown_relay_secret_matches_edge_failure_shape() {
    let h = harness();
    let req = get("/api/objects")
        .header("x-heedy-key", "not-a-secret")
        .body(Body::empty())
        .unwrap();

    let response = h.authenticator.handle(req).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(response).await, "access_denied");
}

#[tokio::test]
async fn edge_request_gets_fresh_context_and_canonical_headers() {
    let h = harness();
    let req = get("/api/objects")
        .header("authorization", "Bearer alice-token")
        .body(Body::empty())
        .unwrap();

    let response = h.authenticator.handle(req).await;
    assert_eq!(response.status(), StatusCode::OK);

    let served = h.dispatcher.last();
    assert_eq!(served.identity, "alice");
    assert_eq!(served.plugin, None);
    assert_eq!(served.headers[HEADER_AS], "alice");
    assert_eq!(served.headers[HEADER_ID], served.hop_id.as_str());
    assert_eq!(served.headers[HEADER_REQUEST], served.request_id.as_str());
}

#[tokio::test]
async fn relay_key_is_stripped_before_dispatch() {
    let h = harness();
    let req = get("/api/objects")
        .header("x-heedy-key", "timer-secret")
        .body(Body::empty())
        .unwrap();

    let response = h.authenticator.handle(req).await;
    assert_eq!(response.status(), StatusCode::OK);

    let served = h.dispatcher.last();
    assert!(served.headers.get(HEADER_KEY).is_none());
    assert_eq!(served.identity, "root");
    assert_eq!(served.plugin.as_deref(), Some("timer"));
}

#[tokio::test]
async fn unregistered_continuation_is_a_hard_400() {
    let h = harness();
    let req = get("/api/objects")
        .header("x-heedy-key", "timer-secret")
        .header("x-heedy-id", "never-registered")
        .body(Body::empty())
        .unwrap();

    let response = h.authenticator.handle(req).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "plugin_error");
    assert!(h.dispatcher.served().is_empty());
}

#[tokio::test]
async fn continuation_inherits_request_id_and_identity() {
    let h = harness();

    // A registered hop, as if an edge request were mid-dispatch.
    let origin = RequestContext::new_edge(Arc::new(TestUser("alice".to_string())));
    h.authenticator.registry().insert(origin.clone());

    let req = get("/api/objects")
        .header("x-heedy-key", "timer-secret")
        .header("x-heedy-id", origin.hop_id.as_str())
        .body(Body::empty())
        .unwrap();

    let response = h.authenticator.handle(req).await;
    assert_eq!(response.status(), StatusCode::OK);

    let served = h.dispatcher.last();
    assert_eq!(served.request_id, origin.request_id);
    assert_eq!(served.identity, "alice");
    assert_eq!(served.plugin.as_deref(), Some("timer"));
    // New hop under the same logical request.
    assert_ne!(served.hop_id, origin.hop_id);
}

#[tokio::test]
async fn impersonation_rewrites_the_identity() {
    let h = harness();
    let req = get("/api/objects")
        .header("x-heedy-key", "timer-secret")
        .header("x-heedy-as", "bob")
        .body(Body::empty())
        .unwrap();

    let response = h.authenticator.handle(req).await;
    assert_eq!(response.status(), StatusCode::OK);

    let served = h.dispatcher.last();
    assert_eq!(served.identity, "bob");
    assert_eq!(served.headers[HEADER_AS], "bob");
}

#[tokio::test]
async fn forbidden_impersonation_target_is_a_400() {
    let h = harness();
    let req = get("/api/objects")
        .header("x-heedy-key", "timer-secret")
        .header("x-heedy-as", "forbidden")
        .body(Body::empty())
        .unwrap();

    let response = h.authenticator.handle(req).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "plugin_error");
}

#[tokio::test]
async fn registry_is_reclaimed_after_every_request() {
    let h = harness();

    let ok = get("/a")
        .header("authorization", "Bearer alice-token")
        .body(Body::empty())
        .unwrap();
    let bad = get("/b").body(Body::empty()).unwrap();

    let _ = h.authenticator.handle(ok).await;
    let _ = h.authenticator.handle(bad).await;
    assert!(h.authenticator.registry().is_empty());
}

#[tokio::test]
async fn server_routes_every_path_through_authentication() {
    let h = harness();
    let server = HttpServer::new(h.authenticator.clone());

    let response = server
        .router()
        .oneshot(
            get("/deeply/nested/path")
                .header("authorization", "Bearer alice-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = server
        .router()
        .oneshot(get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
