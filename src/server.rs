//! HTTP front door.
//!
//! # Responsibilities
//! - Build the Axum router: every path funnels into the request
//!   authentication state machine
//! - Wire up request tracing middleware
//! - Bind the listener and serve with graceful shutdown
//!
//! # Design Decisions
//! - No request timeout at this layer; transports and run types enforce
//!   their own deadlines

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::auth::RequestAuthenticator;

/// HTTP server wrapping the authenticator.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(authenticator: RequestAuthenticator) -> Self {
        Self {
            router: Self::build_router(authenticator),
        }
    }

    fn build_router(authenticator: RequestAuthenticator) -> Router {
        Router::new()
            .route("/{*path}", any(entry))
            .route("/", any(entry))
            .with_state(authenticator)
            .layer(TraceLayer::new_for_http())
    }

    /// The router, for driving requests in tests without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Every request, regardless of path, goes through authentication.
async fn entry(
    State(authenticator): State<RequestAuthenticator>,
    request: Request<Body>,
) -> Response {
    authenticator.handle(request).await
}

/// Wait for shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        return;
    }
    tracing::info!("Shutdown signal received");
}
