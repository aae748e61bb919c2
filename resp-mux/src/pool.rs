//! Connection pool over transports.
//!
//! `Pool` manages a fixed set of transports with round-robin dispatch and
//! lazy reconnection. How a transport is opened (TCP, TLS, in-memory, any
//! handshake) is up to the [`Connect`] implementation supplied by the
//! caller. The pool takes `&mut self`; share it behind a lock if several
//! tasks need it, or give each task its own.
//!
//! # Usage
//!
//! ```no_run
//! # use resp_mux::{Connect, Error, Pool, PoolConfig, Transport};
//! # struct Duplexer;
//! # impl Connect for Duplexer {
//! #     async fn connect(&self) -> Result<Transport, Error> {
//! #         let (client, _server) = tokio::io::duplex(1024);
//! #         let (r, w) = tokio::io::split(client);
//! #         Transport::new(r, w)
//! #     }
//! # }
//! # async fn example() -> Result<(), Error> {
//! let mut pool = Pool::new(PoolConfig { pool_size: 4 }, Duplexer);
//! pool.connect_all().await?;
//! let frame = pool.transport().await?.call(&resp_proto::Request::ping()).await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;

use tracing::debug;

use crate::error::Error;
use crate::transport::Transport;

/// Opens new transports for a [`Pool`].
pub trait Connect {
    fn connect(&self) -> impl Future<Output = Result<Transport, Error>> + Send;
}

/// Configuration for a connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of transports in the pool.
    pub pool_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { pool_size: 1 }
    }
}

enum Slot {
    Connected(Transport),
    Disconnected,
}

/// A fixed-size transport pool with round-robin dispatch.
///
/// All slots start disconnected. Call [`connect_all()`](Pool::connect_all)
/// for eager startup, or let [`transport()`](Pool::transport) lazily
/// reconnect on demand. A transport that has closed is treated as
/// disconnected the next time its slot comes up.
pub struct Pool<C> {
    connector: C,
    slots: Vec<Slot>,
    next: usize,
}

impl<C: Connect> Pool<C> {
    /// Create a new pool. All slots start disconnected.
    pub fn new(config: PoolConfig, connector: C) -> Self {
        let mut slots = Vec::with_capacity(config.pool_size);
        for _ in 0..config.pool_size {
            slots.push(Slot::Disconnected);
        }
        Pool {
            connector,
            slots,
            next: 0,
        }
    }

    /// Eagerly connect all slots. Returns an error if any connection fails.
    pub async fn connect_all(&mut self) -> Result<(), Error> {
        for i in 0..self.slots.len() {
            let transport = self.connector.connect().await?;
            self.slots[i] = Slot::Connected(transport);
        }
        Ok(())
    }

    /// The next healthy transport.
    ///
    /// Advances the round-robin cursor. Disconnected or closed slots are
    /// reconnected in passing. If every slot fails, returns
    /// [`Error::AllConnectionsFailed`].
    pub async fn transport(&mut self) -> Result<Transport, Error> {
        let size = self.slots.len();
        for _ in 0..size {
            let idx = self.next;
            self.next = (self.next + 1) % size;

            if let Slot::Connected(transport) = &self.slots[idx] {
                if !transport.is_closed() {
                    return Ok(transport.clone());
                }
                debug!(slot = idx, fault = ?transport.fault(), "replacing closed transport");
                self.slots[idx] = Slot::Disconnected;
            }
            match self.connector.connect().await {
                Ok(transport) => {
                    debug!(slot = idx, "pool reconnected");
                    self.slots[idx] = Slot::Connected(transport.clone());
                    return Ok(transport);
                }
                Err(e) => debug!(slot = idx, error = %e, "pool reconnect failed"),
            }
        }
        Err(Error::AllConnectionsFailed)
    }

    /// Mark a transport's slot as dead so the next pass reconnects it.
    pub fn mark_disconnected(&mut self, transport: &Transport) {
        for slot in &mut self.slots {
            if let Slot::Connected(t) = slot
                && t.same_connection(transport)
            {
                t.abort();
                *slot = Slot::Disconnected;
                return;
            }
        }
    }

    /// Gracefully close every transport and reset slots to disconnected.
    pub async fn close_all(&mut self) {
        for slot in &mut self.slots {
            if let Slot::Connected(transport) = slot
                && let Err(e) = transport.close().await
            {
                debug!(error = %e, "transport closed with fault");
            }
            *slot = Slot::Disconnected;
        }
    }

    /// Number of slots holding a transport that has not closed.
    pub fn connected_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Connected(t) if !t.is_closed()))
            .count()
    }

    /// Total number of slots in the pool.
    pub fn pool_size(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::DuplexStream;

    /// Hands out in-memory transports, keeping the server ends alive.
    #[derive(Default, Clone)]
    struct Loopback {
        opened: Arc<AtomicUsize>,
        fail: Arc<std::sync::atomic::AtomicBool>,
        servers: Arc<parking_lot::Mutex<Vec<DuplexStream>>>,
    }

    impl Connect for Loopback {
        async fn connect(&self) -> Result<Transport, Error> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Closed);
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            let (client, server) = tokio::io::duplex(1024);
            self.servers.lock().push(server);
            let (r, w) = tokio::io::split(client);
            Transport::new(r, w)
        }
    }

    #[tokio::test]
    async fn test_round_robin_after_connect_all() {
        let connector = Loopback::default();
        let mut pool = Pool::new(PoolConfig { pool_size: 3 }, connector.clone());
        assert_eq!(pool.connected_count(), 0);
        pool.connect_all().await.unwrap();
        assert_eq!(pool.connected_count(), 3);

        let a = pool.transport().await.unwrap();
        let b = pool.transport().await.unwrap();
        let c = pool.transport().await.unwrap();
        let again = pool.transport().await.unwrap();
        assert!(!a.same_connection(&b));
        assert!(!b.same_connection(&c));
        assert!(a.same_connection(&again));
        assert_eq!(connector.opened.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_lazy_connect_and_replace_closed() {
        let connector = Loopback::default();
        let mut pool = Pool::new(PoolConfig { pool_size: 1 }, connector.clone());
        let first = pool.transport().await.unwrap();
        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);

        first.abort();
        let second = pool.transport().await.unwrap();
        assert!(!first.same_connection(&second));
        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);

        pool.mark_disconnected(&second);
        assert!(second.is_closed());
        assert_eq!(pool.connected_count(), 0);
    }

    #[tokio::test]
    async fn test_all_connections_failed() {
        let connector = Loopback::default();
        connector.fail.store(true, Ordering::SeqCst);
        let mut pool = Pool::new(PoolConfig { pool_size: 2 }, connector);
        assert!(matches!(
            pool.transport().await,
            Err(Error::AllConnectionsFailed)
        ));
    }

    #[tokio::test]
    async fn test_close_all_resets_slots() {
        let mut pool = Pool::new(PoolConfig { pool_size: 2 }, Loopback::default());
        pool.connect_all().await.unwrap();
        pool.close_all().await;
        assert_eq!(pool.connected_count(), 0);
        assert_eq!(pool.pool_size(), 2);
    }
}
