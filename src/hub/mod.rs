pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod handler;
pub mod liveness;
pub mod net;
pub mod registry;
pub mod rooms;
pub mod store;
pub mod types;

#[cfg(test)]
mod mock;

use std::sync::Arc;

use log::{error, info};
use tokio_util::sync::CancellationToken;

use auth::StaticAuthenticator;
use config::HubConfig;
use handler::Hub;
use net::server::run_entry_point;
use store::MemoryStore;
use types::EntryPoint;

/// Starts the dispatcher and the four entry points, then runs until Ctrl-C
pub async fn init(config: HubConfig) -> std::io::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let auth = Arc::new(StaticAuthenticator::new(&config.tokens));
    let (hub, dispatcher) = Hub::new(store, auth, config.limits.clone());

    let cancel = CancellationToken::new();
    let dispatcher_task = tokio::spawn(dispatcher.run(cancel.clone()));

    let entry_points = [
        (config.listen.chat.clone(), EntryPoint::Chat),
        (config.listen.admin_notifications.clone(), EntryPoint::AdminNotifications),
        (config.listen.admin_conversations.clone(), EntryPoint::AdminConversations),
        (config.listen.technician_notifications.clone(), EntryPoint::TechnicianNotifications),
    ];

    let mut listeners = Vec::with_capacity(entry_points.len());
    for (addr, entry) in entry_points {
        let hub = hub.clone();
        let cancel = cancel.clone();
        listeners.push(tokio::spawn(async move {
            if let Err(e) = run_entry_point(&addr, entry, hub, cancel.clone()).await {
                error!("Entry point {} on {} failed: {}", entry, addr, e);
                // one dead entry point stops the whole hub
                cancel.cancel();
            }
        }));
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();

    for listener in listeners {
        let _ = listener.await;
    }
    let _ = dispatcher_task.await;
    info!("Hub {} stopped", config.id);
    Ok(())
}
