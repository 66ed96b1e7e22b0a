//! Handler registry: task kind -> handler, built once at startup

use super::handlers::{HandlerContext, HandlerResult};
use async_trait::async_trait;
use edgebox_shared::codec::{decode_args, CodecError};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;

/// Behaviour of one task kind
///
/// Arguments are decoded before `handle` is called, so a handler never sees
/// a malformed payload. Handlers with no arguments use
/// `serde::de::IgnoredAny`.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    type Args: DeserializeOwned + Send;

    fn kind(&self) -> &'static str;

    async fn handle(&self, ctx: &HandlerContext, args: Self::Args) -> HandlerResult;
}

/// Type-erased handler stored in the registry
#[async_trait]
pub trait ErasedHandler: Send + Sync {
    /// Decode `raw_args` and run the handler
    async fn call(
        &self,
        ctx: &HandlerContext,
        raw_args: Option<&str>,
    ) -> Result<HandlerResult, CodecError>;
}

#[async_trait]
impl<H: TaskHandler> ErasedHandler for H {
    async fn call(
        &self,
        ctx: &HandlerContext,
        raw_args: Option<&str>,
    ) -> Result<HandlerResult, CodecError> {
        let args = decode_args::<H::Args>(raw_args)?;
        Ok(self.handle(ctx, args).await)
    }
}

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn ErasedHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in task kind
    pub fn standard() -> Self {
        let mut registry = Self::new();
        super::handlers::register_all(&mut registry);
        registry
    }

    /// Add a handler; a later registration for the same kind replaces the earlier one
    pub fn register<H: TaskHandler>(&mut self, handler: H) {
        self.handlers.insert(TaskHandler::kind(&handler), Arc::new(handler));
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn ErasedHandler>> {
        self.handlers.get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgebox_shared::kinds;

    #[test]
    fn test_standard_registry_covers_every_kind() {
        let registry = HandlerRegistry::standard();
        for kind in [
            kinds::INSTALL_EDGEAPP,
            kinds::INSTALL_BULK_EDGEAPPS,
            kinds::REMOVE_EDGEAPP,
            kinds::START_EDGEAPP,
            kinds::STOP_EDGEAPP,
            kinds::SET_EDGEAPP_OPTIONS,
            kinds::ENABLE_ONLINE,
            kinds::DISABLE_ONLINE,
            kinds::SETUP_TUNNEL,
            kinds::START_TUNNEL,
            kinds::STOP_TUNNEL,
            kinds::DISABLE_TUNNEL,
            kinds::SETUP_BACKUPS,
            kinds::START_BACKUP,
            kinds::RESTORE_BACKUP,
            kinds::DISABLE_BACKUPS,
            kinds::START_SHELL,
            kinds::CHECK_UPDATES,
            kinds::APPLY_UPDATES,
        ] {
            assert!(registry.get(kind).is_some(), "missing handler for {}", kind);
        }
        assert_eq!(registry.kinds().len(), 19);
        assert!(registry.get("reboot_universe").is_none());
    }
}
