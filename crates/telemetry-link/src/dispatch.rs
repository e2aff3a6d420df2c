//! Routing of decoded inbound messages to registered handlers.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::Arc;

use serde_json::Value;

/// Callback invoked with the full decoded payload of a matching message.
pub type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Registry mapping the `type` discriminant of inbound messages to handlers.
///
/// The last registration for a given type wins. Types without a registered
/// handler fall through to the fallback handler when one is set. Handlers run
/// on the session task and must not block.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, MessageHandler>>,
    fallback: RwLock<Option<MessageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a message type, replacing any previous one.
    pub fn register<F>(&self, msg_type: &str, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .expect("handler registry lock poisoned")
            .insert(msg_type.to_string(), Arc::new(handler));
    }

    /// Register the fallback handler for unrecognized message types.
    pub fn register_fallback<F>(&self, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        *self
            .fallback
            .write()
            .expect("handler registry lock poisoned") = Some(Arc::new(handler));
    }

    /// Route a decoded message to its handler.
    ///
    /// Returns true if a handler (typed or fallback) ran.
    pub fn dispatch(&self, msg_type: &str, payload: Value) -> bool {
        let handler = {
            let handlers = self
                .handlers
                .read()
                .expect("handler registry lock poisoned");
            handlers.get(msg_type).cloned()
        };

        if let Some(handler) = handler {
            handler(payload);
            return true;
        }

        let fallback = self
            .fallback
            .read()
            .expect("handler registry lock poisoned")
            .clone();
        if let Some(handler) = fallback {
            handler(payload);
            return true;
        }

        false
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .handlers
            .read()
            .map(|handlers| handlers.len())
            .unwrap_or(0);
        f.debug_struct("HandlerRegistry")
            .field("registered", &count)
            .finish()
    }
}
