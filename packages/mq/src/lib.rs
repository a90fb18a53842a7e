pub mod broker;
pub mod bus;
pub mod delivery;
pub mod error;
pub mod memory;
pub mod topic;

use std::sync::Arc;

use common::config::{MqAppConfig, MqBackend};

pub use broker::{BroccoliError, BrokerEventBus, BrokerMessage, MqConfig, MqQueue, init_mq};
pub use bus::{Binding, EventBus, EventBusExt, RawHandler, Subscription};
pub use delivery::{DeliveryPolicy, Settlement};
pub use error::{HandlerError, MqError};
pub use memory::InMemoryEventBus;

pub type Mq = MqQueue;

impl From<&MqAppConfig> for DeliveryPolicy {
    fn from(config: &MqAppConfig) -> Self {
        Self {
            retry: config.retry_policy(),
            message_ttl: (config.message_ttl_secs > 0)
                .then(|| std::time::Duration::from_secs(config.message_ttl_secs)),
        }
    }
}

/// Build the event bus selected by `config.backend`.
pub async fn connect(config: &MqAppConfig) -> Result<Arc<dyn EventBus>, MqError> {
    let policy = DeliveryPolicy::from(config);
    match config.backend {
        MqBackend::Memory => Ok(Arc::new(InMemoryEventBus::new(policy))),
        MqBackend::Redis => {
            let mq = init_mq(MqConfig {
                url: config.url.clone(),
                pool_size: config.pool_size,
            })
            .await?;
            Ok(Arc::new(BrokerEventBus::new(Arc::new(mq), policy)))
        }
    }
}
