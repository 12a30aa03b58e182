//! Backend servers and the round-robin pool they are handed out from.

use smoltcp::wire::EthernetAddress;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::{ConfigError, Result};

/// A real server behind the virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Backend {
    pub ip: Ipv4Addr,
    pub mac: EthernetAddress,
    /// Switch port the backend is attached to.
    pub port: u16,
}

impl Backend {
    pub fn new(ip: Ipv4Addr, mac: EthernetAddress, port: u16) -> Self {
        Self { ip, mac, port }
    }
}

/// Fixed, ordered set of backends with a round-robin cursor.
///
/// Membership never changes after construction. The cursor is always a
/// valid index and advances atomically, so the pool can be shared between
/// switch connections without an outer lock.
#[derive(Debug)]
pub struct BackendPool {
    backends: Vec<Backend>,
    cursor: AtomicUsize,
}

impl BackendPool {
    /// Create a pool. Fails if `backends` is empty.
    pub fn new(backends: Vec<Backend>) -> Result<Self> {
        if backends.is_empty() {
            return Err(ConfigError::EmptyPool);
        }
        Ok(Self {
            backends,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Return the backend under the cursor and advance the cursor.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> Backend {
        let len = self.backends.len();
        let index = match self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c + 1) % len))
        {
            Ok(prev) | Err(prev) => prev,
        };
        self.backends[index]
    }

    /// Current cursor position (index of the backend the next call returns).
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Always false; an empty pool cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn backend(last: u8) -> Backend {
        Backend::new(
            Ipv4Addr::new(10, 0, 0, last),
            EthernetAddress([0, 0, 0, 0, 0, last]),
            last as u16,
        )
    }

    #[test]
    fn test_empty_pool_rejected() {
        assert!(matches!(BackendPool::new(vec![]), Err(ConfigError::EmptyPool)));
    }

    #[test]
    fn test_round_robin_wraps() {
        let pool = BackendPool::new(vec![backend(5), backend(6), backend(7)]).unwrap();

        assert_eq!(pool.next(), backend(5));
        assert_eq!(pool.cursor(), 1);
        assert_eq!(pool.next(), backend(6));
        assert_eq!(pool.next(), backend(7));
        assert_eq!(pool.cursor(), 0);
        assert_eq!(pool.next(), backend(5));
    }

    #[test]
    fn test_single_backend() {
        let pool = BackendPool::new(vec![backend(5)]).unwrap();
        for _ in 0..3 {
            assert_eq!(pool.next(), backend(5));
            assert_eq!(pool.cursor(), 0);
        }
    }

    #[test]
    fn test_concurrent_next_is_fair() {
        let pool = Arc::new(BackendPool::new(vec![backend(5), backend(6)]).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || (0..100).map(|_| pool.next()).collect::<Vec<_>>())
            })
            .collect();

        let picked: Vec<Backend> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();

        let fives = picked.iter().filter(|b| b.ip == backend(5).ip).count();
        assert_eq!(picked.len(), 400);
        assert_eq!(fives, 200);
        assert_eq!(pool.cursor(), 0);
    }
}
