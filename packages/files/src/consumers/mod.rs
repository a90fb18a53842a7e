//! Subscribers for Mod and User lifecycle events.
//!
//! Handlers are idempotent per event, so a redelivered message is harmless.

mod mod_events;
mod user_events;

pub use mod_events::ModEventConsumer;
pub use user_events::{EXPORT_SERVICE_NAME, UserEventConsumer};

use std::sync::Arc;

use common::config::MqAppConfig;
use common::event::{
    ModDeleted, ModPublished, ModUpdated, UserDataExportRequested, UserDeleted, UserUpdated,
    routing,
};
use mq::{Binding, EventBus, EventBusExt, HandlerError, MqError, Subscription};

/// Bind the mod consumer to the mods exchange.
pub async fn subscribe_mod_events(
    consumer: Arc<ModEventConsumer>,
    bus: &dyn EventBus,
    config: &MqAppConfig,
) -> Result<Vec<Subscription>, MqError> {
    let exchange = &config.mods_exchange;
    let mut subscriptions = Vec::with_capacity(3);

    let c = Arc::clone(&consumer);
    subscriptions.push(
        bus.subscribe(
            Binding::new(exchange, config.queue_name("mod-deleted"), routing::MOD_DELETED),
            move |event: ModDeleted| {
                let c = Arc::clone(&c);
                async move { c.on_deleted(event).await.map_err(HandlerError::from) }
            },
        )
        .await?,
    );

    let c = Arc::clone(&consumer);
    subscriptions.push(
        bus.subscribe(
            Binding::new(exchange, config.queue_name("mod-updated"), routing::MOD_UPDATED),
            move |event: ModUpdated| {
                let c = Arc::clone(&c);
                async move { c.on_updated(event).await.map_err(HandlerError::from) }
            },
        )
        .await?,
    );

    let c = Arc::clone(&consumer);
    subscriptions.push(
        bus.subscribe(
            Binding::new(exchange, config.queue_name("mod-published"), routing::MOD_PUBLISHED),
            move |event: ModPublished| {
                let c = Arc::clone(&c);
                async move { c.on_published(event).await.map_err(HandlerError::from) }
            },
        )
        .await?,
    );

    Ok(subscriptions)
}

/// Bind the user consumer to the users exchange.
pub async fn subscribe_user_events(
    consumer: Arc<UserEventConsumer>,
    bus: &dyn EventBus,
    config: &MqAppConfig,
) -> Result<Vec<Subscription>, MqError> {
    let exchange = &config.users_exchange;
    let mut subscriptions = Vec::with_capacity(3);

    let c = Arc::clone(&consumer);
    subscriptions.push(
        bus.subscribe(
            Binding::new(exchange, config.queue_name("user-deleted"), routing::USER_DELETED),
            move |event: UserDeleted| {
                let c = Arc::clone(&c);
                async move { c.on_deleted(event).await.map_err(HandlerError::from) }
            },
        )
        .await?,
    );

    let c = Arc::clone(&consumer);
    subscriptions.push(
        bus.subscribe(
            Binding::new(exchange, config.queue_name("user-updated"), routing::USER_UPDATED),
            move |event: UserUpdated| {
                let c = Arc::clone(&c);
                async move { c.on_updated(event).await.map_err(HandlerError::from) }
            },
        )
        .await?,
    );

    let c = Arc::clone(&consumer);
    subscriptions.push(
        bus.subscribe(
            Binding::new(
                exchange,
                config.queue_name("user-data-export"),
                routing::USER_DATA_EXPORT_REQUESTED,
            ),
            move |event: UserDataExportRequested| {
                let c = Arc::clone(&c);
                async move {
                    c.on_export_requested(event)
                        .await
                        .map_err(HandlerError::from)
                }
            },
        )
        .await?,
    );

    Ok(subscriptions)
}
