use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};

use super::protocol::{self, InboundEvent, OutboundEvent};
use super::SignalingSink;
use crate::error::SignalingError;

/// Signaling channel over a WebSocket carrying JSON text frames.
///
/// Reconnection is left to the caller: when the socket closes the inbound
/// receiver returned by [`WsSignaling::connect`] yields `None`.
#[derive(Clone)]
pub struct WsSignaling {
    tx: mpsc::UnboundedSender<OutboundEvent>,
}

/// Open signaling connection as returned by [`WsSignaling::connect`]
pub struct WsChannel {
    pub signaling: WsSignaling,
    pub inbound: mpsc::UnboundedReceiver<InboundEvent>,
    /// Completes once every queued frame is written and the socket is
    /// closed, which happens after the last [`WsSignaling`] clone is dropped.
    pub writer: JoinHandle<()>,
}

impl WsSignaling {
    pub async fn connect(url: &str) -> Result<WsChannel, SignalingError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| SignalingError::Connect(e.to_string()))?;
        info!(%url, "signaling websocket connected");

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (send_tx, mut send_rx) = mpsc::unbounded_channel::<OutboundEvent>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<InboundEvent>();

        let writer = tokio::spawn(async move {
            while let Some(event) = send_rx.recv().await {
                let frame = match protocol::encode(&event) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "dropping unencodable event");
                        continue;
                    }
                };
                trace!(len = frame.len(), "ws out");
                if ws_write.send(Message::text(frame)).await.is_err() {
                    break;
                }
            }
            let _ = ws_write.close().await;
            debug!("signaling writer stopped");
        });

        tokio::spawn(async move {
            while let Some(msg) = ws_read.next().await {
                let frame = match msg {
                    Ok(Message::Text(text)) => text.as_str().to_owned(),
                    Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                        Ok(text) => text.to_owned(),
                        Err(_) => {
                            warn!(len = data.len(), "non utf-8 binary frame skipped");
                            continue;
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "signaling websocket error");
                        break;
                    }
                };

                match protocol::decode(&frame) {
                    Ok(event) => {
                        trace!(event = event.name(), "ws in");
                        if inbound_tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, %frame, "unparseable signaling frame skipped"),
                }
            }
            debug!("signaling reader stopped");
        });

        Ok(WsChannel {
            signaling: Self { tx: send_tx },
            inbound: inbound_rx,
            writer,
        })
    }
}

impl SignalingSink for WsSignaling {
    fn send(&self, event: OutboundEvent) -> Result<(), SignalingError> {
        self.tx.send(event).map_err(|_| SignalingError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    use super::*;

    #[tokio::test]
    async fn queued_frames_are_flushed_before_the_writer_finishes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            let mut frames = Vec::new();
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    Message::Text(text) => frames.push(text.as_str().to_owned()),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            frames
        });

        let channel = WsSignaling::connect(&format!("ws://{addr}")).await.unwrap();
        channel
            .signaling
            .send(OutboundEvent::SendMessage("bye".into()))
            .unwrap();
        channel
            .signaling
            .send(OutboundEvent::DisconnectPartner)
            .unwrap();
        drop(channel.signaling);
        channel.writer.await.unwrap();

        assert_eq!(
            server.await.unwrap(),
            vec![
                r#"{"event":"send-message","data":"bye"}"#.to_string(),
                r#"{"event":"disconnect-partner"}"#.to_string(),
            ]
        );
    }
}
