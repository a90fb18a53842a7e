use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use async_trait::async_trait;
use common::dlq::{DlqEnvelope, dead_letter_queue_name};
use common::mq::MessageEnvelope;
use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::bus::{Binding, EventBus, RawHandler, Subscription, bound_queues};
use crate::delivery::{DeliveryPolicy, Settlement};
use crate::error::{HandlerError, MqError};

#[derive(Default)]
struct QueueState {
    messages: Mutex<VecDeque<MessageEnvelope>>,
    notify: Notify,
}

impl QueueState {
    /// A handler that panicked mid-push must not cost later messages.
    fn messages(&self) -> MutexGuard<'_, VecDeque<MessageEnvelope>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, envelope: MessageEnvelope) {
        self.messages().push_back(envelope);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<MessageEnvelope> {
        self.messages().pop_front()
    }

    fn len(&self) -> usize {
        self.messages().len()
    }
}

struct Inner {
    bindings: RwLock<Vec<Binding>>,
    queues: DashMap<String, Arc<QueueState>>,
    dead_letters: DashMap<String, Vec<DlqEnvelope>>,
    policy: DeliveryPolicy,
}

impl Inner {
    fn queue(&self, name: &str) -> Arc<QueueState> {
        Arc::clone(self.queues.entry(name.to_string()).or_default().value())
    }

    fn dead_letter(&self, dlq: DlqEnvelope) {
        let name = dead_letter_queue_name(&dlq.source_queue);
        self.dead_letters.entry(name).or_default().push(dlq);
    }
}

/// In-process topic exchange.
///
/// Each bound queue gets one consumer task that processes messages one at a
/// time, in publish order. Failed deliveries follow the [`DeliveryPolicy`].
#[derive(Clone)]
pub struct InMemoryEventBus {
    inner: Arc<Inner>,
}

impl InMemoryEventBus {
    pub fn new(policy: DeliveryPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                bindings: RwLock::new(Vec::new()),
                queues: DashMap::new(),
                dead_letters: DashMap::new(),
                policy,
            }),
        }
    }

    /// Messages waiting in `queue`, not counting one being handled.
    pub fn pending(&self, queue: &str) -> usize {
        self.inner.queues.get(queue).map(|q| q.len()).unwrap_or(0)
    }

    /// Dead-lettered messages that came from `queue`.
    pub fn dead_letters(&self, queue: &str) -> Vec<DlqEnvelope> {
        self.inner
            .dead_letters
            .get(&dead_letter_queue_name(queue))
            .map(|d| d.value().clone())
            .unwrap_or_default()
    }

    pub fn drain_dead_letters(&self, queue: &str) -> Vec<DlqEnvelope> {
        self.inner
            .dead_letters
            .remove(&dead_letter_queue_name(queue))
            .map(|(_, d)| d)
            .unwrap_or_default()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(DeliveryPolicy::default())
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish_envelope(
        &self,
        exchange: &str,
        envelope: MessageEnvelope,
    ) -> Result<(), MqError> {
        let targets = {
            let bindings = self
                .inner
                .bindings
                .read()
                .map_err(|_| MqError::Internal("binding table poisoned".into()))?;
            bound_queues(&bindings, exchange, &envelope.routing_key)
        };

        if targets.is_empty() {
            debug!(
                exchange,
                routing_key = %envelope.routing_key,
                message_id = %envelope.message_id,
                "No queue bound for message, dropping"
            );
            return Ok(());
        }

        for name in targets {
            self.inner.queue(&name).push(envelope.clone());
        }
        Ok(())
    }

    async fn subscribe_raw(
        &self,
        binding: Binding,
        handler: RawHandler,
    ) -> Result<Subscription, MqError> {
        let queue_name = binding.queue.clone();
        let queue = self.inner.queue(&queue_name);
        {
            let mut bindings = self
                .inner
                .bindings
                .write()
                .map_err(|_| MqError::Internal("binding table poisoned".into()))?;
            if !bindings.contains(&binding) {
                bindings.push(binding.clone());
            }
        }

        info!(
            exchange = %binding.exchange,
            queue = %queue_name,
            pattern = %binding.routing_pattern,
            "Consumer started"
        );

        let inner = Arc::clone(&self.inner);
        let name = queue_name.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Some(envelope) = queue.pop() else {
                    queue.notify.notified().await;
                    continue;
                };
                consume_one(&inner, &queue, &name, &handler, envelope).await;
            }
        });

        Ok(Subscription::new(queue_name, handle))
    }
}

async fn consume_one(
    inner: &Arc<Inner>,
    queue: &Arc<QueueState>,
    queue_name: &str,
    handler: &RawHandler,
    envelope: MessageEnvelope,
) {
    let now = chrono::Utc::now().timestamp_millis();
    let settlement = if inner.policy.is_expired(&envelope, now) {
        inner.policy.expired(&envelope, queue_name)
    } else {
        let result = AssertUnwindSafe(handler(envelope.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                error!(message_id = %envelope.message_id, queue = queue_name, "Handler panicked");
                Err(HandlerError::permanent("handler panicked"))
            });
        inner.policy.settle(envelope, queue_name, result)
    };

    match settlement {
        Settlement::Ack => {}
        Settlement::Requeue { envelope, delay } => {
            let queue = Arc::clone(queue);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                queue.push(envelope);
            });
        }
        Settlement::DeadLetter(dlq) => inner.dead_letter(dlq),
    }
}
