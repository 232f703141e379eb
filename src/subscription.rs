use bytes::Bytes;
use log::{debug, warn};
use redis::aio::PubSub;
use tokio_stream::StreamExt;

use crate::{
    config::Config,
    core::enums::{Event, Message},
    error::RelayError,
    pool::{Pool, PooledConnection},
};

/// A connection that can be put into pattern-subscribe mode and read from.
pub trait Subscription {
    /// Issue a single pattern-subscribe call covering every pattern.
    async fn psubscribe(&mut self, patterns: &[String]) -> Result<(), RelayError>;

    /// Wait for the next message or error.
    async fn receive(&mut self) -> Event;
}

/// Source of fresh subscription connections.
pub trait Connect {
    type Conn: Subscription;

    async fn connect(&self) -> Result<Self::Conn, RelayError>;

    /// Drop a broken connection so it is never handed out again.
    fn discard(&self, conn: Self::Conn);
}

impl Subscription for PubSub {
    async fn psubscribe(&mut self, patterns: &[String]) -> Result<(), RelayError> {
        PubSub::psubscribe(self, patterns.to_vec()).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Event {
        let stream = self.on_message();
        tokio::pin!(stream);

        // the stream ends once the server side goes away
        match stream.next().await {
            Some(msg) => Event::Message(Message::from(msg)),
            None => Event::Error(RelayError::ConnectionClosed),
        }
    }
}

impl From<redis::Msg> for Message {
    fn from(msg: redis::Msg) -> Self {
        let message = Message::new(
            msg.get_channel_name(),
            Bytes::copy_from_slice(msg.get_payload_bytes()),
        );

        match msg.get_pattern::<String>() {
            Ok(pattern) if msg.from_pattern() => message.with_pattern(pattern),
            _ => message,
        }
    }
}

impl<C: Subscription> Subscription for PooledConnection<C> {
    async fn psubscribe(&mut self, patterns: &[String]) -> Result<(), RelayError> {
        (**self).psubscribe(patterns).await
    }

    async fn receive(&mut self) -> Event {
        (**self).receive().await
    }
}

impl<C: Subscription> Connect for Pool<C> {
    type Conn = PooledConnection<C>;

    async fn connect(&self) -> Result<Self::Conn, RelayError> {
        self.get().await
    }

    fn discard(&self, conn: Self::Conn) {
        conn.discard();

        match self.idle_count() {
            Ok(idle) => debug!("Pool: {} idle, {} active", idle, self.active_count()),
            Err(err) => warn!("{}", err),
        }
    }
}

/// Pool of pub/sub connections dialed against the configured server.
pub fn pubsub_pool(config: &Config) -> Result<Pool<PubSub>, RelayError> {
    let client = redis::Client::open(config.redis_url())?;

    Ok(Pool::new(config.pool, move || {
        let client = client.clone();
        async move { client.get_async_pubsub().await.map_err(RelayError::from) }
    }))
}
