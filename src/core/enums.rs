use bytes::Bytes;

use crate::error::RelayError;

/// One delivery read off a subscribed connection.
#[derive(Debug)]
pub enum Event {
    Message(Message),
    Error(RelayError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: String,
    /// Subscription pattern that matched `channel`, when delivered via PSUBSCRIBE.
    pub pattern: Option<String>,
    pub payload: Bytes,
}

impl Message {
    pub fn new(channel: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            channel: channel.into(),
            pattern: None,
            payload: payload.into(),
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Payload as text, with invalid UTF-8 replaced.
    pub fn payload_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}
