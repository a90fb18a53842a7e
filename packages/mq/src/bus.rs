use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use common::mq::{Message, MessageEnvelope};
use futures::future::BoxFuture;
use tokio::task::JoinHandle;

use crate::error::{HandlerError, MqError};
use crate::topic::topic_matches;

pub type HandlerFuture = BoxFuture<'static, Result<(), HandlerError>>;

/// Type-erased handler invoked once per delivered envelope.
pub type RawHandler = Arc<dyn Fn(MessageEnvelope) -> HandlerFuture + Send + Sync>;

/// Binds a queue to an exchange for routing keys matching `routing_pattern`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub exchange: String,
    pub queue: String,
    pub routing_pattern: String,
}

impl Binding {
    pub fn new(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        routing_pattern: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            routing_pattern: routing_pattern.into(),
        }
    }
}

/// Queues that receive a copy of a message published to `exchange` with
/// `routing_key`, sorted and without duplicates.
pub fn bound_queues(bindings: &[Binding], exchange: &str, routing_key: &str) -> Vec<String> {
    let mut names: Vec<String> = bindings
        .iter()
        .filter(|b| b.exchange == exchange)
        .filter(|b| topic_matches(&b.routing_pattern, routing_key))
        .map(|b| b.queue.clone())
        .collect();
    names.sort();
    names.dedup();
    names
}

/// A running consumer. Dropping it leaves the consumer running.
#[derive(Debug)]
pub struct Subscription {
    queue: String,
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn new(queue: impl Into<String>, handle: JoinHandle<()>) -> Self {
        Self {
            queue: queue.into(),
            handle,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop consuming. In-flight deliveries are abandoned and redelivered
    /// by brokers that track acknowledgements.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

/// Topic-routed publish/subscribe transport.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish_envelope(
        &self,
        exchange: &str,
        envelope: MessageEnvelope,
    ) -> Result<(), MqError>;

    async fn subscribe_raw(
        &self,
        binding: Binding,
        handler: RawHandler,
    ) -> Result<Subscription, MqError>;
}

/// Typed helpers over any [`EventBus`].
#[async_trait]
pub trait EventBusExt: EventBus {
    async fn publish<M: Message + 'static>(&self, exchange: &str, message: &M) -> Result<(), MqError> {
        let envelope = MessageEnvelope::from_message(message)?;
        self.publish_envelope(exchange, envelope).await
    }

    /// Subscribe with a handler that receives decoded messages.
    ///
    /// Envelopes whose payload does not decode as `M` fail permanently.
    async fn subscribe<M, F, Fut>(&self, binding: Binding, handler: F) -> Result<Subscription, MqError>
    where
        M: Message + 'static,
        F: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let raw: RawHandler = Arc::new(move |envelope: MessageEnvelope| -> HandlerFuture {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let message: M = envelope.into_message()?;
                handler(message).await
            })
        });
        self.subscribe_raw(binding, raw).await
    }
}

impl<T: EventBus + ?Sized> EventBusExt for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_bound_queue_gets_a_copy() {
        let bindings = vec![
            Binding::new("mods", "file-service.mod-deleted", "mod.deleted"),
            Binding::new("mods", "search.mod-events", "mod.#"),
            Binding::new("mods", "audit.mods", "mod.deleted"),
            Binding::new("users", "file-service.user-deleted", "user.deleted"),
        ];
        assert_eq!(
            bound_queues(&bindings, "mods", "mod.deleted"),
            vec!["audit.mods", "file-service.mod-deleted", "search.mod-events"]
        );
        assert_eq!(bound_queues(&bindings, "mods", "mod.updated"), vec!["search.mod-events"]);
        assert!(bound_queues(&bindings, "files", "mod.deleted").is_empty());
    }

    #[test]
    fn test_queue_bound_twice_gets_one_copy() {
        let bindings = vec![
            Binding::new("users", "file-service.users", "user.deleted"),
            Binding::new("users", "file-service.users", "user.*"),
        ];
        assert_eq!(bound_queues(&bindings, "users", "user.deleted"), vec!["file-service.users"]);
    }
}
