use tokio::net::TcpListener;
use std::sync::Arc;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::hub::handler::Hub;
use crate::hub::net::connection::{ClientConnection, FrameReader};
use crate::hub::net::session::run_session;
use crate::hub::types::EntryPoint;

/// Accepts connections for one entry point until cancelled
pub async fn run_entry_point(
    addr: &str,
    entry: EntryPoint,
    hub: Arc<Hub>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Entry point {} listening on {}", entry, listener.local_addr()?);

    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Entry point {} shutting down", entry);
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Accept failed on {}: {}", entry, e);
                    continue;
                }
            },
        };

        // Set TCP_NODELAY to true to disable Nagle's algorithm
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for connection from {}: {}", peer, e);
        }
        info!("New connection from {} on {}", peer, entry);

        let (reader, writer) = stream.into_split();
        let conn = ClientConnection::spawn(writer, peer.to_string(), &hub.limits);
        tokio::spawn(run_session(hub.clone(), entry, conn, FrameReader::new(reader)));
    }
}
