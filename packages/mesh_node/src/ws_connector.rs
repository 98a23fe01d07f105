//! [`RelayConnector`] over a real WebSocket (tokio-tungstenite).
//!
//! The stream is split: a writer task drains an unbounded queue of outgoing
//! frames, a reader task maps inbound messages onto [`SocketEvent`]s. The
//! queue's unwritten byte count is what the relay transport sees as
//! `buffered_amount`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use mesh_core::transport::relay::{RelayConnector, RelaySocket, SocketEvent, SocketEvents};
use mesh_core::{Frame, MeshError, Result};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tracing::{debug, warn};

enum Outgoing {
    Frame(Frame),
    Close,
}

struct WsSocket {
    tx: mpsc::UnboundedSender<Outgoing>,
    buffered: Arc<AtomicUsize>,
}

impl RelaySocket for WsSocket {
    fn send(&self, frame: Frame) -> Result<()> {
        let len = frame.len();
        self.buffered.fetch_add(len, Ordering::SeqCst);
        self.tx.send(Outgoing::Frame(frame)).map_err(|_| {
            self.buffered.fetch_sub(len, Ordering::SeqCst);
            MeshError::Transport("socket closed".into())
        })
    }

    fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    fn close(&self) {
        let _ = self.tx.send(Outgoing::Close);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl RelayConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<(Arc<dyn RelaySocket>, SocketEvents)> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| MeshError::Transport(format!("connect {url}: {e}")))?;
        debug!(%url, "relay socket connected");

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outgoing>();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let buffered = Arc::new(AtomicUsize::new(0));

        let writer_buffered = buffered.clone();
        let writer_events = ev_tx.clone();
        tokio::spawn(async move {
            while let Some(out) = out_rx.recv().await {
                match out {
                    Outgoing::Frame(frame) => {
                        let len = frame.len();
                        let msg = match frame {
                            Frame::Text(s) => tungstenite::Message::Text(s.into()),
                            Frame::Binary(b) => tungstenite::Message::Binary(b.into()),
                        };
                        let res = ws_write.send(msg).await;
                        writer_buffered.fetch_sub(len, Ordering::SeqCst);
                        if let Err(e) = res {
                            warn!(error = %e, "relay socket write failed");
                            let _ = writer_events.send(SocketEvent::Error(e.to_string()));
                            break;
                        }
                    }
                    Outgoing::Close => {
                        let _ = ws_write.send(tungstenite::Message::Close(None)).await;
                        break;
                    }
                }
            }
            let _ = ws_write.close().await;
        });

        tokio::spawn(async move {
            let reason = loop {
                let event = match ws_read.next().await {
                    Some(Ok(tungstenite::Message::Text(t))) => {
                        SocketEvent::Message(Frame::Text(t.as_str().to_string()))
                    }
                    Some(Ok(tungstenite::Message::Binary(b))) => {
                        SocketEvent::Message(Frame::Binary(b.to_vec()))
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        break frame.map(|f| f.reason.as_str().to_string()).unwrap_or_default();
                    }
                    // Protocol pings are answered by tungstenite itself.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = ev_tx.send(SocketEvent::Error(e.to_string()));
                        break e.to_string();
                    }
                    None => break "eof".to_string(),
                };
                if ev_tx.send(event).is_err() {
                    return;
                }
            };
            debug!(%reason, "relay socket closed");
            let _ = ev_tx.send(SocketEvent::Closed { reason });
        });

        let socket: Arc<dyn RelaySocket> = Arc::new(WsSocket { tx: out_tx, buffered });
        Ok((socket, ev_rx))
    }
}
