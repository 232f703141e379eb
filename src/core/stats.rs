use std::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use log::{debug, info};
use tokio::select;
use tokio_util::sync::CancellationToken;

/// Counters updated by the relay and read by the stats reporter.
#[derive(Debug, Default)]
pub struct Stats {
    /// The total number of messages received since startup.
    messages_received: AtomicUsize,
    /// The total number of payload bytes received since startup.
    bytes_received: AtomicUsize,
    errors: AtomicUsize,
    reconnects: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Snapshot {
    pub messages_received: usize,
    pub bytes_received: usize,
    pub errors: usize,
    pub reconnects: usize,
}

impl Stats {
    pub fn received(&self, payload_len: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(payload_len, Ordering::Relaxed);
    }

    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnected(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "messages={} bytes={} errors={} reconnects={}",
            self.messages_received, self.bytes_received, self.errors, self.reconnects
        )
    }
}

/// Log a stats line every `period` until `token` is cancelled. Returns the
/// number of lines logged.
pub async fn report(stats: &Stats, period: Duration, token: CancellationToken) -> usize {
    let mut reported = 0;
    let mut interval = tokio::time::interval(period);
    // first tick completes immediately
    interval.tick().await;

    loop {
        select! {
            _ = interval.tick() => {
                info!("stats: {}", stats.snapshot());
                reported += 1;
            }
            _ = token.cancelled() => break
        }
    }

    debug!("Exiting stats reporter");
    reported
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = Stats::default();
        stats.received(5);
        stats.received(11);
        stats.error();
        stats.reconnected();

        assert_eq!(
            stats.snapshot(),
            Snapshot {
                messages_received: 2,
                bytes_received: 16,
                errors: 1,
                reconnects: 1,
            }
        );
        assert_eq!(
            stats.snapshot().to_string(),
            "messages=2 bytes=16 errors=1 reconnects=1"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_stops_on_cancel() {
        let stats = Stats::default();
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(35)).await;
            canceller.cancel();
        });

        // ticks at 10s, 20s and 30s
        assert_eq!(report(&stats, Duration::from_secs(10), token).await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_cancelled_before_first_tick() {
        let stats = Stats::default();
        let token = CancellationToken::new();
        token.cancel();

        assert_eq!(report(&stats, Duration::from_secs(10), token).await, 0);
    }
}
