use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rkyv::AlignedVec;

use crate::rpc::Status;

#[async_trait]
/// A handler for a single protocol endpoint.
///
/// Handlers receive the raw archived payload and are responsible for
/// validating it themselves, see [crate::rpc::decode].
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, payload: AlignedVec) -> Result<AlignedVec, Status>;
}

#[derive(Clone, Default)]
/// A registry linking endpoints with their handlers at runtime.
///
/// The registry is shared between the node and the transport listening on
/// its behalf, handlers added after the node started are picked up
/// immediately.
pub struct ServiceRegistry {
    handlers: Arc<RwLock<BTreeMap<String, Arc<dyn MessageHandler>>>>,
}

impl ServiceRegistry {
    /// Registers a handler for the given endpoint, replacing any existing one.
    pub fn add_handler(&self, endpoint: impl Into<String>, handler: impl MessageHandler) {
        self.handlers
            .write()
            .insert(endpoint.into(), Arc::new(handler));
    }

    /// Removes the handler for the given endpoint.
    pub fn remove_handler(&self, endpoint: &str) {
        self.handlers.write().remove(endpoint);
    }

    /// Returns if a handler is registered for the given endpoint.
    pub fn has_handler(&self, endpoint: &str) -> bool {
        self.handlers.read().contains_key(endpoint)
    }

    /// Routes a payload to the handler registered for the endpoint.
    pub async fn dispatch(
        &self,
        endpoint: &str,
        payload: AlignedVec,
    ) -> Result<AlignedVec, Status> {
        let handler = self.handlers.read().get(endpoint).cloned();

        match handler {
            Some(handler) => handler.handle(payload).await,
            None => Err(Status::unavailable(format!(
                "No handler registered for endpoint {endpoint:?}."
            ))),
        }
    }
}
