use std::{
    collections::VecDeque,
    future::Future,
    ops::{Deref, DerefMut},
    pin::Pin,
    sync::{Arc, Mutex},
};

use log::debug;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{config::PoolConfig, error::RelayError};

pub type DialFuture<C> = Pin<Box<dyn Future<Output = Result<C, RelayError>> + Send>>;
type DialFn<C> = dyn Fn() -> DialFuture<C> + Send + Sync;

struct Shared<C> {
    config: PoolConfig,
    idle: Mutex<VecDeque<C>>,
    active: Arc<Semaphore>,
    permits: usize,
}

/// Bounded set of reusable connections. Connections are dialed lazily by the
/// callback handed to [`Pool::new`].
pub struct Pool<C> {
    shared: Arc<Shared<C>>,
    dial: Box<DialFn<C>>,
}

impl<C> Pool<C> {
    pub fn new<F, Fut>(config: PoolConfig, dial: F) -> Self
    where
        C: 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<C, RelayError>> + Send + 'static,
    {
        let permits = match config.max_active {
            0 => Semaphore::MAX_PERMITS,
            n => n,
        };

        Self {
            shared: Arc::new(Shared {
                config,
                idle: Mutex::new(VecDeque::with_capacity(config.max_idle)),
                active: Arc::new(Semaphore::new(permits)),
                permits,
            }),
            dial: Box::new(move || -> DialFuture<C> { Box::pin(dial()) }),
        }
    }

    /// Check out a connection, reusing the most recently returned idle one
    /// before dialing. Fails instead of waiting once `max_active` connections
    /// are out.
    pub async fn get(&self) -> Result<PooledConnection<C>, RelayError> {
        let permit = self
            .shared
            .active
            .clone()
            .try_acquire_owned()
            .map_err(|_| RelayError::PoolExhausted(self.active_count()))?;

        let reused = self
            .shared
            .idle
            .lock()
            .map_err(|_| RelayError::PoolPoisoned)?
            .pop_back();

        let conn = match reused {
            Some(conn) => {
                debug!("Reusing idle connection");
                conn
            }
            None => {
                debug!("Dialing new connection");
                // the permit is released on error
                (self.dial)().await?
            }
        };

        Ok(PooledConnection {
            conn: Some(conn),
            shared: self.shared.clone(),
            _permit: permit,
        })
    }

    pub fn config(&self) -> PoolConfig {
        self.shared.config
    }

    pub fn idle_count(&self) -> Result<usize, RelayError> {
        let idle = self
            .shared
            .idle
            .lock()
            .map_err(|_| RelayError::PoolPoisoned)?;
        Ok(idle.len())
    }

    pub fn active_count(&self) -> usize {
        self.shared.permits - self.shared.active.available_permits()
    }
}

/// Checked-out connection. Goes back to the idle list on drop unless the list
/// is already at `max_idle` or the connection was discarded.
pub struct PooledConnection<C> {
    conn: Option<C>,
    shared: Arc<Shared<C>>,
    _permit: OwnedSemaphorePermit,
}

impl<C> PooledConnection<C> {
    /// Close the connection instead of returning it to the pool.
    pub fn discard(mut self) {
        if self.conn.take().is_some() {
            debug!("Discarding connection");
        }
    }
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn.as_ref().expect("Connection already released")
    }
}

impl<C> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().expect("Connection already released")
    }
}

impl<C> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        let Ok(mut idle) = self.shared.idle.lock() else {
            return;
        };

        if idle.len() < self.shared.config.max_idle {
            idle.push_back(conn);
        } else {
            debug!("Idle limit reached, closing connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use tokio_test::assert_ok;

    use super::*;

    fn counting_pool(config: PoolConfig) -> (Pool<usize>, Arc<AtomicUsize>) {
        let dials = Arc::new(AtomicUsize::new(0));
        let counter = dials.clone();
        let pool = Pool::new(config, move || {
            let id = counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(id) }
        });
        (pool, dials)
    }

    #[tokio::test]
    async fn test_dials_lazily() {
        let (pool, dials) = counting_pool(PoolConfig::default());
        assert_eq!(dials.load(Ordering::SeqCst), 0);

        let conn = assert_ok!(pool.get().await);
        assert_eq!(*conn, 0);
        assert_eq!(dials.load(Ordering::SeqCst), 1);
        assert_eq!(pool.active_count(), 1);
    }

    #[tokio::test]
    async fn test_reuses_idle_connection() {
        let (pool, dials) = counting_pool(PoolConfig::default());

        let first = assert_ok!(pool.get().await);
        drop(first);
        assert_eq!(pool.idle_count().unwrap(), 1);
        assert_eq!(pool.active_count(), 0);

        let second = assert_ok!(pool.get().await);
        assert_eq!(*second, 0);
        assert_eq!(dials.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_idle_list_is_capped() {
        let (pool, _) = counting_pool(PoolConfig {
            max_idle: 2,
            max_active: 10,
        });

        let mut held = Vec::new();
        for _ in 0..4 {
            held.push(assert_ok!(pool.get().await));
        }
        drop(held);

        assert_eq!(pool.idle_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_pool_does_not_wait() {
        let (pool, _) = counting_pool(PoolConfig {
            max_idle: 1,
            max_active: 2,
        });

        let _a = assert_ok!(pool.get().await);
        let b = assert_ok!(pool.get().await);

        match pool.get().await {
            Err(RelayError::PoolExhausted(2)) => {}
            Err(err) => panic!("unexpected error: {}", err),
            Ok(_) => panic!("pool handed out more than max_active"),
        }

        drop(b);
        assert_ok!(pool.get().await);
    }

    #[tokio::test]
    async fn test_unbounded_active() {
        let (pool, dials) = counting_pool(PoolConfig {
            max_idle: 0,
            max_active: 0,
        });

        let held: Vec<_> = get_many(&pool, 100).await;
        assert_eq!(held.len(), 100);
        assert_eq!(dials.load(Ordering::SeqCst), 100);
    }

    async fn get_many(pool: &Pool<usize>, n: usize) -> Vec<PooledConnection<usize>> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(pool.get().await.expect("Failed to get connection"));
        }
        out
    }

    #[tokio::test]
    async fn test_failed_dial_releases_slot() {
        let pool: Pool<usize> = Pool::new(
            PoolConfig {
                max_idle: 1,
                max_active: 1,
            },
            || async {
                Err(RelayError::Io(io::Error::from(
                    io::ErrorKind::ConnectionRefused,
                )))
            },
        );

        assert!(pool.get().await.is_err());
        assert_eq!(pool.active_count(), 0);
        assert!(matches!(pool.get().await, Err(RelayError::Io(_))));
    }

    #[tokio::test]
    async fn test_discarded_connection_is_not_reused() {
        let (pool, dials) = counting_pool(PoolConfig::default());

        let conn = assert_ok!(pool.get().await);
        conn.discard();
        assert_eq!(pool.idle_count().unwrap(), 0);
        assert_eq!(pool.active_count(), 0);

        let conn = assert_ok!(pool.get().await);
        assert_eq!(*conn, 1);
        assert_eq!(dials.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_idle_count_reports_poisoned_lock() {
        let (pool, _) = counting_pool(PoolConfig::default());
        let shared = pool.shared.clone();

        let _ = std::thread::spawn(move || {
            let _guard = shared.idle.lock().unwrap();
            panic!("poison the idle list");
        })
        .join();

        assert!(matches!(pool.idle_count(), Err(RelayError::PoolPoisoned)));
        assert!(matches!(pool.get().await, Err(RelayError::PoolPoisoned)));
    }
}
