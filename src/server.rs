//! WebSocket server for subscriber connections.
//!
//! Accepts persistent connections and wires each one to its own
//! [`SubscriptionHandler`]: a writer task drains the handler's outbound
//! frames into the socket, a read loop feeds inbound text frames to the
//! handler, and lifecycle events are logged. A simulated death tears down
//! that connection only; the accept loop keeps serving everyone else.

use crate::config::Config;
use crate::error::{FleetError, Result};
use crate::handler::delivery::DeliveryChannel;
use crate::handler::{HandlerEvent, SubscriptionHandler};
use crate::registry::SensorRegistry;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Delivery channel writing frames to one WebSocket peer.
///
/// Frames go through an mpsc drained by the connection's writer task, so
/// the handler never blocks on the socket itself.
pub struct WsDeliveryChannel {
    out_tx: mpsc::UnboundedSender<Message>,
}

#[async_trait]
impl DeliveryChannel for WsDeliveryChannel {
    async fn send(&self, payload: String) -> Result<()> {
        self.out_tx
            .send(Message::text(payload))
            .map_err(|_| FleetError::ChannelClosed)
    }

    async fn close(&self) {
        let _ = self.out_tx.send(Message::Close(None));
    }
}

/// Accept subscriber connections until `shutdown` is cancelled.
pub async fn run_ws_server(
    config: Arc<Config>,
    registry: Arc<SensorRegistry>,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.ws_port);
    let listener = TcpListener::bind(&addr).await?;
    info!("[Fleet] WebSocket server listening on ws://{addr}");

    let tracker = TaskTracker::new();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("[Fleet] connection from {peer}");
                    let config = config.clone();
                    let registry = registry.clone();
                    tracker.spawn(async move {
                        if let Err(err) = handle_connection(stream, config, registry).await {
                            warn!("[Fleet] connection from {peer} ended with error: {err}");
                        }
                    });
                }
                Err(err) => warn!("[Fleet] accept failed: {err}"),
            },
        }
    }

    tracker.close();
    tracker.wait().await;
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    config: Arc<Config>,
    registry: Arc<SensorRegistry>,
) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| FleetError::Transport(e.to_string()))?;
    let (mut sink, mut ws_rx) = ws.split();

    // Writer task: drains handler output into the socket. Exits once the
    // handler drops its sender or a close frame goes out.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let closing = matches!(frame, Message::Close(_));
            if sink.send(frame).await.is_err() {
                break;
            }
            if closing {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let handler = SubscriptionHandler::new(
        config.simulation.clone(),
        registry,
        WsDeliveryChannel { out_tx },
    )
    .with_events(event_tx);
    let handle = handler.handle();
    let mut handler_task = tokio::spawn(handler.run());

    // Owner side of the handler's event channel: log only. Ends when the
    // handler drops its sender.
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                HandlerEvent::SubscribedAck => info!("[Fleet] peer subscribed"),
                HandlerEvent::ErrorNotice(text) => debug!("[Fleet] rejected message: {text}"),
                HandlerEvent::FatalFault => warn!("[Fleet] simulated death closed a connection"),
            }
        }
    });

    // Read loop: forward text frames to the handler until the peer goes
    // away or the handler terminates on its own (simulated death).
    let mut handler_done = false;
    loop {
        tokio::select! {
            _ = &mut handler_task, if !handler_done => {
                handler_done = true;
                break;
            }
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => handle.message(text.as_str()),
                Some(Ok(Message::Close(_))) | None => {
                    handle.stop();
                    break;
                }
                Some(Ok(_)) => {} // ping/pong handled by tungstenite
                Some(Err(err)) => {
                    debug!("[Fleet] read error: {err}");
                    handle.stop();
                    break;
                }
            },
        }
    }

    if !handler_done {
        let _ = handler_task.await;
    }
    let _ = writer.await;
    Ok(())
}
