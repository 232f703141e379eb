use std::net::SocketAddr;

use futures::SinkExt;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::broadcast::{self, error::RecvError},
};
use tokio_stream::StreamExt;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{core::enums::Message, error::RelayError};

/// JSON body pushed to websocket clients for every received message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub channel: String,
    pub message: String,
}

impl From<&Message> for OutgoingMessage {
    fn from(message: &Message) -> Self {
        Self {
            channel: message.channel.clone(),
            message: message.payload_lossy().into_owned(),
        }
    }
}

pub fn encode(message: &Message) -> Result<String, RelayError> {
    Ok(serde_json::to_string(&OutgoingMessage::from(message))?)
}

/// Accept websocket clients until cancelled. Each peer gets its own receiver
/// on `tx` and a task on `tracker`.
pub async fn serve(
    listener: TcpListener,
    tx: broadcast::Sender<String>,
    token: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        let accepted = select! {
            accepted = listener.accept() => accepted,
            _ = token.cancelled() => break,
        };

        match accepted {
            Ok((stream, peer)) => {
                // subscribe before the handshake so nothing sent after it is missed
                let rx = tx.subscribe();
                let token = token.clone();
                tracker.spawn(async move {
                    if let Err(err) = handle_peer(stream, peer, rx, token).await {
                        error!("({}) {}", peer, err);
                    }
                });
            }
            Err(err) => {
                error!("{}", err);
            }
        }
    }

    debug!("Exiting websocket listener");
}

async fn handle_peer(
    stream: TcpStream,
    peer: SocketAddr,
    mut rx: broadcast::Receiver<String>,
    token: CancellationToken,
) -> Result<(), RelayError> {
    let mut websocket = tokio_tungstenite::accept_async(stream).await?;
    info!("established a new connection: {}", peer);

    loop {
        select! {
            outgoing = rx.recv() => match outgoing {
                Ok(text) => {
                    if websocket.send(WsMessage::Text(text)).await.is_err() {
                        info!("removing disconnected peer: {}", peer);
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("({}) lagging, skipped {} messages", peer, skipped);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = websocket.next() => match incoming {
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => {
                    info!("removing disconnected peer: {}", peer);
                    break;
                }
                Some(Ok(_)) => {}
            },
            _ = token.cancelled() => {
                if let Err(err) = websocket.close(None).await {
                    debug!("({}) close failed: {}", peer, err);
                }
                break;
            }
        }
    }

    Ok(())
}
