//! Loopback TCP control surface (§6): one listener on `EngineConfig::control_port`,
//! any number of concurrent clients, each reading/writing `0x1E`-terminated
//! `tag`/`tag:json` messages (see `protocol`).
//!
//! Grounded on the teacher's `api/server.rs` Axum listener for the overall
//! "bind, accept, spawn a task per connection" shape, adapted from HTTP to
//! the raw framed TCP protocol this engine's spec calls for.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::events::{CoordinatorCommand, CoordinatorEvent};
use crate::ipc::protocol::{self, Request, RECORD_SEPARATOR};

/// Outbound event broadcast capacity: generous enough that a slow client
/// can miss a burst of position ticks without blocking every other
/// connection, while still surfacing a lag warning if one falls far behind.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Runs the control surface until the listener errors or the process shuts
/// down. `commands` feeds the Coordinator; `events` is its outbound stream,
/// fanned out here to every connected client.
pub async fn run(
    port: u16,
    commands: UnboundedSender<CoordinatorCommand>,
    mut events: UnboundedReceiver<CoordinatorEvent>,
) -> crate::error::Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(|e| crate::error::EngineError::Other(anyhow::anyhow!("ipc bind 127.0.0.1:{port}: {e}")))?;
    info!(port, "ipc control surface listening");

    let (broadcast_tx, _) = broadcast::channel::<CoordinatorEvent>(EVENT_CHANNEL_CAPACITY);
    let broadcast_tx = Arc::new(broadcast_tx);

    let fanout_tx = Arc::clone(&broadcast_tx);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let _ = fanout_tx.send(event);
        }
    });

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "ipc accept failed");
                continue;
            }
        };
        debug!(%addr, "ipc client connected");
        let commands = commands.clone();
        let event_rx = broadcast_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, commands, event_rx).await {
                debug!(%addr, error = %e, "ipc connection ended");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    commands: UnboundedSender<CoordinatorCommand>,
    mut events: broadcast::Receiver<CoordinatorEvent>,
) -> crate::error::Result<()> {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut inbound = Vec::new();
    let mut read_buf = [0u8; 4096];

    loop {
        tokio::select! {
            read_result = read_half.read(&mut read_buf) => {
                let n = read_result.map_err(crate::error::EngineError::Io)?;
                if n == 0 {
                    return Ok(());
                }
                inbound.extend_from_slice(&read_buf[..n]);
                while let Some(pos) = inbound.iter().position(|b| *b == RECORD_SEPARATOR) {
                    let frame: Vec<u8> = inbound.drain(..=pos).collect();
                    let message = String::from_utf8_lossy(&frame[..frame.len() - 1]).into_owned();
                    if message.is_empty() {
                        continue;
                    }
                    let request = protocol::parse_request(&message);
                    if matches!(request, Request::Quit) {
                        write_frame(&mut write_half, "ok").await?;
                        return Ok(());
                    }
                    if matches!(request, Request::AreYouAlive) {
                        write_frame(&mut write_half, &protocol::im_alive(None)).await?;
                        continue;
                    }
                    if let Some(command) = protocol::request_to_command(&request) {
                        let _ = commands.send(command);
                    } else if matches!(request, Request::Unknown { .. } | Request::Malformed { .. }) {
                        debug!(?request, "ipc request not understood");
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => write_frame(&mut write_half, &protocol::encode_event(&event)).await?,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "ipc client fell behind on events");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                }
            }
        }
    }
}

async fn write_frame(write_half: &mut tokio::net::tcp::OwnedWriteHalf, message: &str) -> crate::error::Result<()> {
    write_half
        .write_all(message.as_bytes())
        .await
        .map_err(crate::error::EngineError::Io)?;
    write_half
        .write_all(&[RECORD_SEPARATOR])
        .await
        .map_err(crate::error::EngineError::Io)?;
    Ok(())
}
