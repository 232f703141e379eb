use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::{select, sync::broadcast};
use tokio_util::sync::CancellationToken;

use crate::{
    config::ReconnectPolicy,
    error::RelayError,
    subscription::{Connect, Subscription},
    websocket,
};

use self::{
    enums::{Event, Message},
    stats::Stats,
};

pub mod enums;
pub mod stats;

/// Pattern-subscribes through `connector` and logs everything that arrives.
pub struct Relay<C: Connect> {
    connector: C,
    patterns: Vec<String>,
    policy: ReconnectPolicy,
    stats: Arc<Stats>,
    broadcast: Option<broadcast::Sender<String>>,
}

impl<C: Connect> Relay<C> {
    pub fn new(
        connector: C,
        patterns: Vec<String>,
        policy: ReconnectPolicy,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            connector,
            patterns,
            policy,
            stats,
            broadcast: None,
        }
    }

    /// Also publish every received message, JSON encoded, on `tx`.
    pub fn with_broadcast(mut self, tx: broadcast::Sender<String>) -> Self {
        self.broadcast = Some(tx);
        self
    }

    /// Receive until cancelled. Failing to connect or subscribe the first
    /// time is returned as is; later failures go through the reconnect policy.
    pub async fn run(&self, token: CancellationToken) -> Result<(), RelayError> {
        let mut conn = self.subscribe().await?;

        loop {
            let event = select! {
                event = conn.receive() => event,
                _ = token.cancelled() => {
                    debug!("Relay cancelled");
                    return Ok(());
                }
            };

            match event {
                Event::Message(message) => self.handle_message(&message),
                Event::Error(err) => {
                    error!("{}", err);
                    self.stats.error();
                    self.connector.discard(conn);

                    conn = match self.reconnect(&token).await? {
                        Some(conn) => conn,
                        None => return Ok(()),
                    };
                }
            }
        }
    }

    fn handle_message(&self, message: &Message) {
        self.stats.received(message.payload.len());

        if let Some(pattern) = &message.pattern {
            debug!("{} matched {}", message.channel, pattern);
        }

        info!(
            "recv from {}: {}",
            message.channel,
            message.payload_lossy()
        );

        if let Some(tx) = &self.broadcast {
            match websocket::encode(message) {
                Ok(json) => {
                    if tx.send(json).is_err() {
                        debug!("No websocket peers for {}", message.channel);
                    }
                }
                Err(err) => error!("{}", err),
            }
        }
    }

    async fn subscribe(&self) -> Result<C::Conn, RelayError> {
        let mut conn = self.connector.connect().await?;

        if let Err(err) = conn.psubscribe(&self.patterns).await {
            self.connector.discard(conn);
            return Err(err);
        }

        info!("subscribed to: {}", self.patterns.join(", "));
        Ok(conn)
    }

    /// `Ok(None)` means the token was cancelled while waiting.
    async fn reconnect(&self, token: &CancellationToken) -> Result<Option<C::Conn>, RelayError> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            if self.policy.exhausted(attempt) {
                return Err(RelayError::RetriesExhausted(attempt - 1));
            }

            let delay = self.policy.delay(attempt);
            warn!("Reconnecting in {:?} (attempt {})", delay, attempt);

            let result = select! {
                _ = token.cancelled() => return Ok(None),
                result = async {
                    tokio::time::sleep(delay).await;
                    self.subscribe().await
                } => result,
            };

            match result {
                Ok(conn) => {
                    self.stats.reconnected();
                    return Ok(Some(conn));
                }
                Err(err) => {
                    error!("Reconnect attempt {} failed: {}", attempt, err);
                    self.stats.error();
                }
            }
        }
    }
}
