//! Outgoing relay: forwarding a contextualized request to a plugin.
//!
//! # Responsibilities
//! - Rewrite the request URI to the plugin's backend address
//! - Stamp outgoing relay headers: the core's capability secret when none
//!   is set, the impersonation default, and always a fresh hop id and the
//!   stable request id
//! - Forward over the shared HTTP client and hand the response back
//!   untouched

use std::str::FromStr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use axum::http::uri::{Authority, Scheme};
use axum::http::{Request, Uri};
use axum::response::Response;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use thiserror::Error;

use super::context::{RequestContext, HEADER_AS, HEADER_ID, HEADER_KEY, HEADER_REQUEST};
use super::ProcessRegistry;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid relay target '{0}'")]
    Target(String),
    #[error("relay header value: {0}")]
    Header(#[from] axum::http::header::InvalidHeaderValue),
    #[error("relay uri: {0}")]
    Uri(#[from] axum::http::uri::InvalidUriParts),
    #[error("upstream: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),
}

/// HTTP client for relaying requests into plugin backends.
#[derive(Clone)]
pub struct RelayClient {
    client: Client<HttpConnector, Body>,
    processes: Arc<dyn ProcessRegistry>,
}

impl RelayClient {
    pub fn new(processes: Arc<dyn ProcessRegistry>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client, processes }
    }

    /// Forward `request` to `authority` (a `host:port` string), carrying
    /// the identity of `context`. The downstream response passes through
    /// unmodified.
    pub async fn relay(
        &self,
        context: &RequestContext,
        mut request: Request<Body>,
        authority: &str,
    ) -> Result<Response, RelayError> {
        let authority = Authority::from_str(authority)
            .map_err(|_| RelayError::Target(authority.to_string()))?;

        let mut parts = request.uri().clone().into_parts();
        parts.scheme = Some(Scheme::HTTP);
        parts.authority = Some(authority);
        *request.uri_mut() = Uri::from_parts(parts)?;

        self.prepare_headers(request.headers_mut(), context)?;

        let response = self.client.request(request).await?;
        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, Body::new(body)))
    }

    /// Stamp the relay header set for one outgoing hop.
    ///
    /// The capability secret and the impersonation target are defaulted
    /// only when absent, so a plugin relaying on its own behalf keeps its
    /// own values. Hop id and request id are always overwritten; a plugin
    /// never picks those.
    pub fn prepare_headers(
        &self,
        headers: &mut HeaderMap,
        context: &RequestContext,
    ) -> Result<(), RelayError> {
        if !headers.contains_key(HEADER_KEY) {
            headers.insert(
                HeaderName::from_static(HEADER_KEY),
                HeaderValue::from_str(&self.processes.core_capability())?,
            );
        }
        if !headers.contains_key(HEADER_AS) {
            headers.insert(
                HeaderName::from_static(HEADER_AS),
                HeaderValue::from_str(context.identity.id())?,
            );
        }
        headers.insert(
            HeaderName::from_static(HEADER_ID),
            HeaderValue::from_str(&context.hop_id)?,
        );
        headers.insert(
            HeaderName::from_static(HEADER_REQUEST),
            HeaderValue::from_str(&context.request_id)?,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures_util::future::BoxFuture;

    use super::*;
    use crate::auth::{Identity, ProcessInfo};

    struct User(&'static str);
    impl Identity for User {
        fn id(&self) -> &str {
            self.0
        }
    }

    struct Processes;
    impl ProcessRegistry for Processes {
        fn lookup_by_capability<'a>(
            &'a self,
            _secret: &'a str,
        ) -> BoxFuture<'a, Option<ProcessInfo>> {
            Box::pin(async { None })
        }
        fn core_capability(&self) -> String {
            "core-secret".to_string()
        }
    }

    fn context() -> RequestContext {
        RequestContext::new_edge(Arc::new(User("alice")))
    }

    #[test]
    fn test_defaults_inserted_when_absent() {
        let client = RelayClient::new(Arc::new(Processes));
        let ctx = context();
        let mut headers = HeaderMap::new();
        client.prepare_headers(&mut headers, &ctx).unwrap();

        assert_eq!(headers[HEADER_KEY], "core-secret");
        assert_eq!(headers[HEADER_AS], "alice");
        assert_eq!(headers[HEADER_ID], ctx.hop_id.as_str());
        assert_eq!(headers[HEADER_REQUEST], ctx.request_id.as_str());
    }

    #[test]
    fn test_caller_key_and_as_preserved_ids_overwritten() {
        let client = RelayClient::new(Arc::new(Processes));
        let ctx = context();
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(HEADER_KEY),
            HeaderValue::from_static("plugin-secret"),
        );
        headers.insert(
            HeaderName::from_static(HEADER_AS),
            HeaderValue::from_static("bob"),
        );
        headers.insert(
            HeaderName::from_static(HEADER_ID),
            HeaderValue::from_static("stale-hop"),
        );
        client.prepare_headers(&mut headers, &ctx).unwrap();

        assert_eq!(headers[HEADER_KEY], "plugin-secret");
        assert_eq!(headers[HEADER_AS], "bob");
        assert_eq!(headers[HEADER_ID], ctx.hop_id.as_str());
    }
}
