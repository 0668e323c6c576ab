//! WebSocket chat channel

use crate::core::chat::{ChannelHandle, Inbound, InboundFrame};
use crate::core::traits::ChatConnector;
use anyhow::Context;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Connects chat sessions over `ws://` / `wss://`.
///
/// Frames are raw text in both directions. Heartbeats are whatever the WebSocket library does on
/// its own, there is no reconnection.
#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

#[async_trait]
impl ChatConnector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> anyhow::Result<(ChannelHandle, Inbound)> {
        let (socket, _) = connect_async(url.as_str())
            .await
            .with_context(|| format!("failed to connect to {url}"))?;
        info!("connected to {url}");

        let (mut write, mut read) = socket.split();
        let (outbound, mut outbound_queue) = mpsc::unbounded_channel::<String>();
        let (inbound_sender, inbound) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let pump_shutdown = shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = pump_shutdown.cancelled() => {
                        debug!("closing websocket");
                        let _ = write.send(Message::Close(None)).await;
                        let _ = write.close().await;
                        break;
                    }
                    Some(text) = outbound_queue.recv() => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            warn!("websocket send failed: {e}");
                            let _ = inbound_sender.send(InboundFrame::Closed(Some(e.to_string())));
                            break;
                        }
                    }
                    frame = read.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            if inbound_sender.send(InboundFrame::Text(text)).is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame
                                .map(|frame| frame.reason.into_owned())
                                .filter(|reason| !reason.is_empty());
                            let _ = inbound_sender.send(InboundFrame::Closed(reason));
                            break;
                        }
                        Some(Ok(Message::Binary(_))) => debug!("ignoring binary frame"),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("websocket receive failed: {e}");
                            let _ = inbound_sender.send(InboundFrame::Closed(Some(e.to_string())));
                            break;
                        }
                        None => {
                            let _ = inbound_sender.send(InboundFrame::Closed(None));
                            break;
                        }
                    },
                }
            }
        });

        Ok((ChannelHandle::new(outbound, shutdown), inbound))
    }
}
