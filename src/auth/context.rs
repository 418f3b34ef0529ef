//! Per-request identity context and the reserved header names.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use super::Identity;

/// Relay capability secret. Stripped before any further forwarding.
pub const HEADER_KEY: &str = "x-heedy-key";
/// Hop continuation identifier. Absent means first hop from that caller.
pub const HEADER_ID: &str = "x-heedy-id";
/// Impersonation target; defaults to the current identity.
pub const HEADER_AS: &str = "x-heedy-as";
/// Stable logical-request identifier, set on every outgoing relay.
pub const HEADER_REQUEST: &str = "x-heedy-request";

/// Every header under this prefix is reserved for the relay protocol.
pub const RESERVED_PREFIX: &str = "x-heedy-";

/// Authenticated state of one hop of one logical request.
///
/// `request_id` is shared by every hop of a logical request; `hop_id` is
/// unique per hop and never reused.
#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub hop_id: String,
    pub identity: Arc<dyn Identity>,
    /// Plugin that originated this hop; `None` for edge requests.
    pub plugin: Option<String>,
}

impl RequestContext {
    /// Fresh context for an authenticated edge request.
    pub fn new_edge(identity: Arc<dyn Identity>) -> Self {
        Self::new(Uuid::new_v4().to_string(), identity, None)
    }

    /// Context with a fresh hop identifier under an existing request id.
    pub fn new(request_id: String, identity: Arc<dyn Identity>, plugin: Option<String>) -> Self {
        Self {
            request_id,
            hop_id: Uuid::new_v4().to_string(),
            identity,
            plugin,
        }
    }

    /// Continue an active request: same request id and identity, new hop.
    pub fn continuation(origin: &RequestContext, plugin: Option<String>) -> Self {
        Self::new(origin.request_id.clone(), origin.identity.clone(), plugin)
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("hop_id", &self.hop_id)
            .field("identity", &self.identity.id())
            .field("plugin", &self.plugin)
            .finish()
    }
}
