//! Learned link address → switch port mapping.

use smoltcp::wire::EthernetAddress;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Last-seen switch port per link address. Last write wins.
#[derive(Debug, Default)]
pub struct MacPortTable {
    ports: RwLock<HashMap<EthernetAddress, u16>>,
}

impl MacPortTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `mac` was seen on `port`. Returns the previous port.
    pub fn learn(&self, mac: EthernetAddress, port: u16) -> Option<u16> {
        let previous = self.ports.write().unwrap().insert(mac, port);
        match previous {
            Some(old) if old != port => {
                debug!(mac = %mac, old_port = old, new_port = port, "Link address moved");
            }
            None => debug!(mac = %mac, port, "Link address learned"),
            _ => {}
        }
        previous
    }

    pub fn port_of(&self, mac: &EthernetAddress) -> Option<u16> {
        self.ports.read().unwrap().get(mac).copied()
    }

    pub fn len(&self) -> usize {
        self.ports.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: EthernetAddress = EthernetAddress([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);

    #[test]
    fn test_learn_and_lookup() {
        let table = MacPortTable::new();
        assert!(table.port_of(&MAC).is_none());

        assert_eq!(table.learn(MAC, 1), None);
        assert_eq!(table.port_of(&MAC), Some(1));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_last_write_wins() {
        let table = MacPortTable::new();
        table.learn(MAC, 1);
        assert_eq!(table.learn(MAC, 3), Some(1));
        assert_eq!(table.port_of(&MAC), Some(3));
        assert_eq!(table.len(), 1);
    }
}
