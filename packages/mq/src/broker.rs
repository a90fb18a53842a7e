use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use broccoli_queue::queue::BroccoliQueueBuilder;
pub use broccoli_queue::{
    brokers::broker::BrokerMessage,
    error::BroccoliError,
    queue::{BroccoliQueue, ConsumeOptions},
};
use common::dlq::dead_letter_queue_name;
use common::mq::MessageEnvelope;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::bus::{Binding, EventBus, RawHandler, Subscription, bound_queues};
use crate::delivery::{DeliveryPolicy, Settlement};
use crate::error::{HandlerError, MqError};

pub type MqQueue = BroccoliQueue;
pub type MqBuilder = BroccoliQueueBuilder;

pub struct MqConfig {
    pub url: String,
    pub pool_size: u8,
}

pub async fn init_mq(config: MqConfig) -> Result<MqQueue, MqError> {
    BroccoliQueue::builder(&config.url)
        .pool_connections(config.pool_size)
        .build()
        .await
        .map_err(MqError::from)
}

/// Event bus over Redis lists managed by broccoli_queue.
///
/// Redis lists have no exchange, so routing happens at publish time: every
/// binding registered on this bus whose pattern matches the routing key gets
/// its own copy on the list named after `binding.queue`. Consumers sharing a
/// queue name compete for its messages. Bindings are per process, so a
/// publisher only reaches queues bound through the same bus.
pub struct BrokerEventBus {
    mq: Arc<MqQueue>,
    policy: DeliveryPolicy,
    bindings: RwLock<Vec<Binding>>,
}

impl BrokerEventBus {
    pub fn new(mq: Arc<MqQueue>, policy: DeliveryPolicy) -> Self {
        Self {
            mq,
            policy,
            bindings: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl EventBus for BrokerEventBus {
    async fn publish_envelope(
        &self,
        exchange: &str,
        envelope: MessageEnvelope,
    ) -> Result<(), MqError> {
        let targets = {
            let bindings = self
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

        for queue in targets {
            self.mq.publish(&queue, None, &envelope, None).await?;
        }
        Ok(())
    }

    async fn subscribe_raw(
        &self,
        binding: Binding,
        handler: RawHandler,
    ) -> Result<Subscription, MqError> {
        {
            let mut bindings = self
                .bindings
                .write()
                .map_err(|_| MqError::Internal("binding table poisoned".into()))?;
            if !bindings.contains(&binding) {
                bindings.push(binding.clone());
            }
        }

        let dlq_queue = dead_letter_queue_name(&binding.queue);
        info!(
            exchange = %binding.exchange,
            queue = %binding.queue,
            pattern = %binding.routing_pattern,
            dlq_queue = %dlq_queue,
            "Consumer started"
        );

        let mq = Arc::clone(&self.mq);
        let policy = self.policy;
        let queue_name = binding.queue.clone();
        let handle = tokio::spawn(async move {
            let mq_for_handler = Arc::clone(&mq);
            let handler_queue = queue_name.clone();
            let result = mq
                .process_messages(
                    &queue_name,
                    Some(1),
                    None,
                    move |message: BrokerMessage<MessageEnvelope>| {
                        let mq = Arc::clone(&mq_for_handler);
                        let handler = Arc::clone(&handler);
                        let queue_name = handler_queue.clone();
                        let dlq_queue = dlq_queue.clone();
                        async move {
                            deliver(message.payload, &mq, &handler, &policy, &queue_name, &dlq_queue)
                                .await
                        }
                    },
                )
                .await;

            if let Err(e) = result {
                error!(error = %e, queue = %queue_name, "Consumer stopped unexpectedly");
            }
        });

        Ok(Subscription::new(binding.queue, handle))
    }
}

async fn deliver(
    envelope: MessageEnvelope,
    mq: &MqQueue,
    handler: &RawHandler,
    policy: &DeliveryPolicy,
    queue_name: &str,
    dlq_queue: &str,
) -> Result<(), BroccoliError> {
    let now = chrono::Utc::now().timestamp_millis();
    let settlement = if policy.is_expired(&envelope, now) {
        policy.expired(&envelope, queue_name)
    } else {
        let result = AssertUnwindSafe(handler(envelope.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                error!(message_id = %envelope.message_id, queue = queue_name, "Handler panicked");
                Err(HandlerError::permanent("handler panicked"))
            });
        policy.settle(envelope, queue_name, result)
    };

    match settlement {
        Settlement::Ack => Ok(()),
        Settlement::Requeue { envelope, delay } => {
            tokio::time::sleep(delay).await;
            mq.publish(queue_name, None, &envelope, None).await?;
            Ok(())
        }
        Settlement::DeadLetter(dlq) => {
            if let Err(pub_err) = mq.publish(dlq_queue, None, &dlq, None).await {
                warn!(error = %pub_err, dlq_queue, "Failed to publish to DLQ");
                return Err(BroccoliError::Publish(format!(
                    "Failed to publish to DLQ: {}",
                    pub_err
                )));
            }
            Ok(())
        }
    }
}
