use crate::agent::connection::{ConnectionError, ConnectionRef, WsConnection};
use crate::agent::messages::AgentToServer;
use crate::agent::registry::AgentRegistry;
use anyhow::{Context, Result};
use futures_util::StreamExt;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Accept agent connections forever, one task per connection
pub async fn serve(listener: TcpListener, registry: AgentRegistry) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                log::error!("[WebSocket] Failed to accept connection: {err}");
                continue;
            }
        };

        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, peer, registry).await {
                log::error!("[WebSocket] Connection {peer} failed: {err:#}");
            }
        });
    }
}

/// Drive one agent connection until the peer goes away.
///
/// This is the only place a connection leaves the registry: once the read
/// loop ends, for whatever reason, the connection is removed exactly once.
pub async fn handle_connection(stream: TcpStream, peer: SocketAddr, registry: AgentRegistry) -> Result<()> {
    let ws = accept_async(stream).await.with_context(|| format!("WebSocket handshake with {peer} failed"))?;
    let (sink, mut frames) = ws.split();
    let conn = ConnectionRef::new(WsConnection::new(sink, Some(peer)));

    log::info!("[WebSocket] Agent connection from {peer}");

    while let Some(frame) = frames.next().await {
        let report = match frame {
            Ok(Message::Text(text)) => serde_json::from_str::<AgentToServer>(&text),
            Ok(Message::Binary(data)) => serde_json::from_slice::<AgentToServer>(&data),
            Ok(Message::Close(_)) => {
                log::info!("[WebSocket] Agent connection {peer} closed");
                break;
            }
            Ok(_) => continue,
            Err(err) => {
                log::error!("[WebSocket] Error receiving message from {peer}: {err}");
                break;
            }
        };

        let report = match report {
            Ok(report) => report,
            Err(err) => {
                log::error!("[WebSocket] Failed to parse message from {peer}: {err}");
                continue;
            }
        };

        match on_message(&registry, &conn, report).await {
            Ok(()) => {}
            Err(ConnectionError::Closed) => break,
            Err(err) => log::warn!("[WebSocket] Failed to reply to {peer}: {err}"),
        }
    }

    registry.remove_connection(&conn);
    Ok(())
}

async fn on_message(registry: &AgentRegistry, conn: &ConnectionRef, report: AgentToServer) -> Result<(), ConnectionError> {
    let id = report.instance_uid;
    let agent = registry.find_or_create_agent(id, conn);

    if report.agent_disconnect.is_some() {
        log::info!("[WebSocket] Agent {id} is disconnecting");
    }

    let mut response = registry.next_response();
    response.instance_uid = id;
    agent.update_status(&report, &mut response);

    log::debug!("[WebSocket] Status #{} from agent {id}", report.sequence_num);
    conn.send(&response).await
}
