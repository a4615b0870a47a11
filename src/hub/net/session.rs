use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::io::AsyncRead;
use crate::error::{ErrorCode, HubError, Result};
use crate::hub::handler::Hub;
use crate::hub::net::connection::{ClientConnection, Connection, FrameReader};
use crate::hub::types::{EntryPoint, Identity};
use crate::wire::message::{encode, Envelope, ErrorFrame};

/// Drives one accepted connection from its credential frame to its close
pub async fn run_session<R>(hub: Arc<Hub>, entry: EntryPoint, conn: Arc<ClientConnection>, mut reader: FrameReader<R>)
where
    R: AsyncRead + Unpin + Send,
{
    debug!("Session {} started on {}", conn.id(), entry);

    let (identity, first) = match first_frame(&hub, entry, &conn, &mut reader).await {
        Ok(admitted) => admitted,
        Err(e) => {
            warn!("Rejecting {} on {}: {}", conn.peer(), entry, e);
            reject(&conn, &e);
            return;
        }
    };

    let handle: Arc<dyn Connection> = conn.clone();
    let result = match entry {
        EntryPoint::Chat => {
            // the credential frame may already carry a chat message
            let pending = first.msg_type.is_some().then_some(first);
            chat_loop(&hub, &identity, &conn, &handle, pending, &mut reader).await
        }
        _ => {
            hub.admit(entry, handle.clone());
            drain_loop(&conn, &mut reader).await
        }
    };

    if let Err(e) = result {
        warn!("Session {} ended with error: {}", conn.id(), e);
        reject(&conn, &e);
    } else {
        conn.close();
    }
    info!("Session {} on {} finished", conn.id(), entry);
}

async fn first_frame<R>(
    hub: &Hub,
    entry: EntryPoint,
    conn: &ClientConnection,
    reader: &mut FrameReader<R>,
) -> Result<(Identity, Envelope)>
where
    R: AsyncRead + Unpin + Send,
{
    let frame = tokio::select! {
        _ = conn.closed() => None,
        frame = reader.next_frame() => frame?,
    };

    match frame {
        Some(envelope) => Ok((hub.authenticate(entry, &envelope)?, envelope)),
        None => Err(HubError::new(ErrorCode::ConnectionClosed, "Closed before sending a credential")),
    }
}

/// Read loop of a chat connection; a protocol or auth error ends it
async fn chat_loop<R>(
    hub: &Hub,
    identity: &Identity,
    conn: &ClientConnection,
    handle: &Arc<dyn Connection>,
    mut pending: Option<Envelope>,
    reader: &mut FrameReader<R>,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    loop {
        let envelope = match pending.take() {
            Some(envelope) => envelope,
            None => {
                let frame = tokio::select! {
                    _ = conn.closed() => return Ok(()),
                    frame = reader.next_frame() => frame?,
                };
                match frame {
                    Some(envelope) => envelope,
                    None => {
                        debug!("Peer {} closed its side", conn.peer());
                        return Ok(());
                    }
                }
            }
        };

        if let Err(e) = hub.handle_chat(identity, handle, envelope) {
            if e.is_fatal() {
                return Err(e);
            }
            warn!("Chat frame from account {} failed: {}", identity.account_id, e);
            send_error(conn, &e);
        }
    }
}

/// Role-scoped connections only listen; inbound frames are ignored
async fn drain_loop<R>(conn: &ClientConnection, reader: &mut FrameReader<R>) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    loop {
        let frame = tokio::select! {
            _ = conn.closed() => return Ok(()),
            frame = reader.next_frame() => frame?,
        };

        match frame {
            Some(envelope) => debug!("Ignoring {:?} frame on listen-only connection {}", envelope.msg_type, conn.id()),
            None => return Ok(()),
        }
    }
}

fn send_error(conn: &ClientConnection, err: &HubError) {
    match encode(&ErrorFrame::from_error(err)) {
        Ok(frame) => {
            if let Err(e) = conn.send(&frame) {
                debug!("Could not deliver error frame to {}: {}", conn.id(), e);
            }
        }
        Err(e) => error!("Failed to encode error frame: {}", e),
    }
}

/// Error frame, then close
fn reject(conn: &ClientConnection, err: &HubError) {
    send_error(conn, err);
    conn.close();
}
