//! Shared collaborator doubles for integration testing.

// Each test binary uses a different subset of these.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;

use hearth::auth::context::RequestContext;
use hearth::auth::{AuthError, Dispatcher, Identity, IdentityStore, ProcessInfo, ProcessRegistry};

/// Identity carrying nothing but its id.
pub struct TestUser(pub String);

impl Identity for TestUser {
    fn id(&self) -> &str {
        &self.0
    }
}

/// Identity store double: one valid bearer token, unrestricted
/// impersonation except for the "forbidden" target. Counts how often the
/// edge credential path runs.
pub struct MockIdentityStore {
    pub token: String,
    pub user: String,
    pub authenticate_calls: AtomicUsize,
}

impl MockIdentityStore {
    pub fn new(token: &str, user: &str) -> Self {
        Self {
            token: token.to_string(),
            user: user.to_string(),
            authenticate_calls: AtomicUsize::new(0),
        }
    }

    #[allow(dead_code)]
    pub fn authenticate_calls(&self) -> usize {
        self.authenticate_calls.load(Ordering::SeqCst)
    }
}

impl IdentityStore for MockIdentityStore {
    fn root(&self) -> Arc<dyn Identity> {
        Arc::new(TestUser("root".to_string()))
    }

    fn authenticate<'a>(
        &'a self,
        headers: &'a HeaderMap,
    ) -> BoxFuture<'a, Result<Arc<dyn Identity>, AuthError>> {
        self.authenticate_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            let presented = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "));
            if presented == Some(self.token.as_str()) {
                Ok(Arc::new(TestUser(self.user.clone())) as Arc<dyn Identity>)
            } else {
                Err(AuthError::InvalidCredentials)
            }
        })
    }

    fn act_as<'a>(
        &'a self,
        identity: Arc<dyn Identity>,
        target: &'a str,
    ) -> BoxFuture<'a, Result<Arc<dyn Identity>, AuthError>> {
        Box::pin(async move {
            if target == "forbidden" {
                Err(AuthError::ImpersonationDenied(
                    identity.id().to_string(),
                    target.to_string(),
                ))
            } else {
                Ok(Arc::new(TestUser(target.to_string())) as Arc<dyn Identity>)
            }
        })
    }
}

/// Process registry double backed by a secret-to-plugin map.
pub struct MockProcessRegistry {
    secrets: HashMap<String, ProcessInfo>,
}

impl MockProcessRegistry {
    pub fn new(entries: &[(&str, &str)]) -> Self {
        let secrets = entries
            .iter()
            .map(|(secret, plugin)| {
                (
                    secret.to_string(),
                    ProcessInfo {
                        plugin: plugin.to_string(),
                        name: "main".to_string(),
                    },
                )
            })
            .collect();
        Self { secrets }
    }
}

impl ProcessRegistry for MockProcessRegistry {
    fn lookup_by_capability<'a>(
        &'a self,
        secret: &'a str,
    ) -> BoxFuture<'a, Option<ProcessInfo>> {
        Box::pin(async move { self.secrets.get(secret).cloned() })
    }

    fn core_capability(&self) -> String {
        "core-capability".to_string()
    }
}

/// What the dispatcher saw for one request.
#[derive(Debug, Clone)]
pub struct Served {
    pub request_id: String,
    pub hop_id: String,
    pub identity: String,
    pub plugin: Option<String>,
    pub headers: HeaderMap,
}

/// Dispatcher double recording every context and header set it receives.
#[derive(Default)]
pub struct RecordingDispatcher {
    served: Mutex<Vec<Served>>,
}

impl RecordingDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn served(&self) -> Vec<Served> {
        self.served.lock().unwrap().clone()
    }

    pub fn last(&self) -> Served {
        self.served.lock().unwrap().last().cloned().expect("nothing served")
    }
}

impl Dispatcher for RecordingDispatcher {
    fn serve(
        &self,
        context: RequestContext,
        request: Request<Body>,
    ) -> BoxFuture<'static, Response> {
        self.served.lock().unwrap().push(Served {
            request_id: context.request_id.clone(),
            hop_id: context.hop_id.clone(),
            identity: context.identity.id().to_string(),
            plugin: context.plugin.clone(),
            headers: request.headers().clone(),
        });
        Box::pin(async { StatusCode::OK.into_response() })
    }
}
