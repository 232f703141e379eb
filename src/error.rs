use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Redis Error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket Error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection pool exhausted ({0} active)")]
    PoolExhausted(usize),

    #[error("Connection pool lock poisoned")]
    PoolPoisoned,

    #[error("Connection closed by server")]
    ConnectionClosed,

    #[error("Gave up after {0} reconnect attempts")]
    RetriesExhausted(u32),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),
}
