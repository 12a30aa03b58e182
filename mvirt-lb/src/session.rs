//! Sticky client → backend assignment.

use serde::{Deserialize, Serialize};
use smoltcp::wire::EthernetAddress;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::backend::{Backend, BackendPool};

/// Which client identity sessions are keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKeyPolicy {
    /// Client network address only.
    ClientIp,
    /// Client network address and link address.
    #[default]
    ClientIpAndMac,
}

impl SessionKeyPolicy {
    pub fn policy(&self) -> SessionKeyPolicy {
        *self
    }

    pub fn key(&self, client_ip: Ipv4Addr, client_mac: EthernetAddress) -> SessionKey {
        SessionKey {
            client_ip,
            client_mac: match self {
                SessionKeyPolicy::ClientIp => None,
                SessionKeyPolicy::ClientIpAndMac => Some(client_mac),
            },
        }
    }
}

/// Identity used to look up a client's backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub client_ip: Ipv4Addr,
    pub client_mac: Option<EthernetAddress>,
}

/// A client pinned to a backend.
///
/// `client_mac` is the link address seen when the session was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub client_ip: Ipv4Addr,
    pub client_mac: EthernetAddress,
    pub backend: Backend,
}

/// Result of [`SessionTable::assign`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub session: Session,
    /// True if this call created the session (and consumed a pool slot).
    pub created: bool,
}

impl Assignment {
    pub fn backend(&self) -> Backend {
        self.session.backend
    }
}

/// Session table with consult-or-create semantics.
///
/// Entries are never evicted or modified once inserted.
pub struct SessionTable {
    policy: SessionKeyPolicy,
    pool: Arc<BackendPool>,
    sessions: Mutex<HashMap<SessionKey, Session>>,
}

impl SessionTable {
    pub fn new(policy: SessionKeyPolicy, pool: Arc<BackendPool>) -> Self {
        Self {
            policy,
            pool,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> SessionKeyPolicy {
        self.policy
    }

    pub fn key(&self, client_ip: Ipv4Addr, client_mac: EthernetAddress) -> SessionKey {
        self.policy.key(client_ip, client_mac)
    }

    /// Return the client's backend, assigning the next pool backend if the
    /// client has no session yet.
    ///
    /// The table lock is held across the pool call so that two concurrent
    /// first packets of the same client cannot both consume a slot.
    pub fn assign(&self, client_ip: Ipv4Addr, client_mac: EthernetAddress) -> Assignment {
        let key = self.key(client_ip, client_mac);
        let mut sessions = self.sessions.lock().unwrap();

        if let Some(session) = sessions.get(&key) {
            return Assignment {
                session: *session,
                created: false,
            };
        }

        let backend = self.pool.next();
        let session = Session {
            client_ip,
            client_mac,
            backend,
        };
        sessions.insert(key, session);

        info!(
            client_ip = %client_ip,
            client_mac = %client_mac,
            backend_ip = %backend.ip,
            backend_port = backend.port,
            "Client assigned to backend"
        );

        Assignment {
            session,
            created: true,
        }
    }

    pub fn get(&self, key: &SessionKey) -> Option<Session> {
        self.sessions.lock().unwrap().get(key).copied()
    }

    /// Find a session by client address, whatever the key policy.
    ///
    /// If several link addresses share the client address, the session with
    /// the lowest link address is returned.
    pub fn find_by_client_ip(&self, client_ip: Ipv4Addr) -> Option<Session> {
        self.sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.client_ip == client_ip)
            .min_by_key(|s| s.client_mac)
            .copied()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of all sessions, ordered by client address.
    pub fn snapshot(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.lock().unwrap().values().copied().collect();
        sessions.sort_by_key(|s| (s.client_ip, s.client_mac));
        sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Arc<BackendPool> {
        Arc::new(
            BackendPool::new(vec![
                Backend::new(
                    Ipv4Addr::new(10, 0, 0, 5),
                    EthernetAddress([0, 0, 0, 0, 0, 5]),
                    5,
                ),
                Backend::new(
                    Ipv4Addr::new(10, 0, 0, 6),
                    EthernetAddress([0, 0, 0, 0, 0, 6]),
                    6,
                ),
            ])
            .unwrap(),
        )
    }

    fn client(last: u8) -> (Ipv4Addr, EthernetAddress) {
        (
            Ipv4Addr::new(10, 0, 0, last),
            EthernetAddress([0x52, 0x54, 0, 0, 0, last]),
        )
    }

    #[test]
    fn test_assign_is_sticky() {
        let pool = pool();
        let table = SessionTable::new(SessionKeyPolicy::ClientIpAndMac, Arc::clone(&pool));
        let (ip, mac) = client(1);

        let first = table.assign(ip, mac);
        assert!(first.created);
        assert_eq!(first.backend().ip, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(pool.cursor(), 1);

        for _ in 0..5 {
            let again = table.assign(ip, mac);
            assert!(!again.created);
            assert_eq!(again.backend(), first.backend());
        }
        assert_eq!(pool.cursor(), 1, "repeat lookups must not consume the pool");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_distinct_clients_round_robin() {
        let table = SessionTable::new(SessionKeyPolicy::ClientIpAndMac, pool());

        let b1 = table.assign(client(1).0, client(1).1).backend();
        let b2 = table.assign(client(2).0, client(2).1).backend();
        let b3 = table.assign(client(3).0, client(3).1).backend();

        assert_ne!(b1, b2);
        assert_eq!(b1, b3);
    }

    #[test]
    fn test_key_policy_ip_only() {
        let table = SessionTable::new(SessionKeyPolicy::ClientIp, pool());
        let ip = Ipv4Addr::new(10, 0, 0, 1);

        let a = table.assign(ip, EthernetAddress([0x52, 0x54, 0, 0, 0, 1]));
        let b = table.assign(ip, EthernetAddress([0x52, 0x54, 0, 0, 0, 2]));

        assert!(a.created);
        assert!(!b.created);
        assert_eq!(a.backend(), b.backend());
        // The recorded link address is the one seen first
        assert_eq!(b.session.client_mac, EthernetAddress([0x52, 0x54, 0, 0, 0, 1]));
    }

    #[test]
    fn test_key_policy_ip_and_mac() {
        let table = SessionTable::new(SessionKeyPolicy::ClientIpAndMac, pool());
        let ip = Ipv4Addr::new(10, 0, 0, 1);

        let a = table.assign(ip, EthernetAddress([0x52, 0x54, 0, 0, 0, 1]));
        let b = table.assign(ip, EthernetAddress([0x52, 0x54, 0, 0, 0, 2]));

        assert!(a.created && b.created);
        assert_ne!(a.backend(), b.backend());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_lookups() {
        let table = SessionTable::new(SessionKeyPolicy::ClientIpAndMac, pool());
        let (ip, mac) = client(7);
        assert!(table.is_empty());
        assert!(table.find_by_client_ip(ip).is_none());

        let assigned = table.assign(ip, mac);
        assert_eq!(table.get(&table.key(ip, mac)), Some(assigned.session));
        assert_eq!(table.find_by_client_ip(ip), Some(assigned.session));
        assert_eq!(table.snapshot(), vec![assigned.session]);
    }

    #[test]
    fn test_find_by_client_ip_picks_lowest_mac() {
        let table = SessionTable::new(SessionKeyPolicy::ClientIpAndMac, pool());
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        let low = EthernetAddress([0x52, 0x54, 0, 0, 0, 0x01]);

        for last in [0x09, 0x05, 0x01, 0x07] {
            table.assign(ip, EthernetAddress([0x52, 0x54, 0, 0, 0, last]));
        }

        for _ in 0..3 {
            assert_eq!(table.find_by_client_ip(ip).unwrap().client_mac, low);
        }
    }

    #[test]
    fn test_concurrent_first_packets_assign_once() {
        let pool = pool();
        let table = Arc::new(SessionTable::new(
            SessionKeyPolicy::ClientIpAndMac,
            Arc::clone(&pool),
        ));
        let (ip, mac) = client(1);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || table.assign(ip, mac))
            })
            .collect();
        let results: Vec<Assignment> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|a| a.created).count(), 1);
        assert!(results.iter().all(|a| a.backend() == results[0].backend()));
        assert_eq!(pool.cursor(), 1);
    }
}
