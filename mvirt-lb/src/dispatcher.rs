//! Packet-in classification and dispatch.
//!
//! ```text
//! PacketIn --classify--> ArpForVirtual --> ArpResponder   --> packet-out (ARP reply)
//!                        IpForVirtual  --> FlowProgrammer --> 2x install rule + packet-out
//!                        ArpForClient  --> ArpResponder   --> packet-out (opt-in)
//!                        Ignored
//! ```

use smoltcp::wire::{ArpOperation, EthernetProtocol};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::arp::ArpResponder;
use crate::backend::{Backend, BackendPool};
use crate::channel::{self, SwitchConnection, SwitchEventHandler};
use crate::config::{self, LbConfig, ServiceConfig};
use crate::mac_table::MacPortTable;
use crate::packet::{ArpHeader, DecodedPacket, Ipv4Header, NetworkHeader, PacketIn};
use crate::programmer::FlowProgrammer;
use crate::session::SessionTable;

/// Classification of a packet-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// ARP request for the virtual address.
    ArpForVirtual(ArpHeader),
    /// IPv4 packet addressed to the virtual address.
    IpForVirtual(Ipv4Header),
    /// ARP request for a client that has a session.
    ArpForClient(ArpHeader),
    Ignored,
}

/// Stateless packet classifier.
#[derive(Debug, Clone, Copy)]
pub struct PacketClassifier {
    virtual_ip: Ipv4Addr,
    answer_backend_arp: bool,
}

impl PacketClassifier {
    pub fn new(virtual_ip: Ipv4Addr, answer_backend_arp: bool) -> Self {
        Self {
            virtual_ip,
            answer_backend_arp,
        }
    }

    pub fn classify(&self, packet: &DecodedPacket, sessions: &SessionTable) -> Classification {
        match packet.network {
            NetworkHeader::Arp(arp) if arp.operation == ArpOperation::Request => {
                if arp.target_ip == self.virtual_ip {
                    Classification::ArpForVirtual(arp)
                } else if self.answer_backend_arp
                    && sessions.find_by_client_ip(arp.target_ip).is_some()
                {
                    Classification::ArpForClient(arp)
                } else {
                    Classification::Ignored
                }
            }
            NetworkHeader::Ipv4(ip)
                if packet.eth.ethertype == EthernetProtocol::Ipv4 && ip.dst == self.virtual_ip =>
            {
                Classification::IpForVirtual(ip)
            }
            _ => Classification::Ignored,
        }
    }
}

/// What a packet-in resulted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    ArpReplied { backend: Backend, new_session: bool },
    FlowsInstalled { backend: Backend, new_session: bool },
    ClientArpReplied { client_ip: Ipv4Addr },
    Ignored,
}

/// The load balancer: shared state plus the components operating on it.
///
/// One instance may serve several switches; each shared table has its own
/// lock.
pub struct LoadBalancer {
    pool: Arc<BackendPool>,
    sessions: Arc<SessionTable>,
    macs: Arc<MacPortTable>,
    classifier: PacketClassifier,
    arp: ArpResponder,
    programmer: FlowProgrammer,
}

impl LoadBalancer {
    pub fn new(config: &ServiceConfig) -> config::Result<Self> {
        let pool = Arc::new(BackendPool::new(config.backends.clone())?);
        let sessions = Arc::new(SessionTable::new(config.session_key, Arc::clone(&pool)));
        let macs = Arc::new(MacPortTable::new());

        let arp = ArpResponder::new(
            config.virtual_ip,
            config.virtual_mac,
            config.arp_reply,
            Arc::clone(&sessions),
        );
        let programmer = FlowProgrammer::new(
            config.virtual_ip,
            config.virtual_mac,
            config.arp_reply,
            config.flow_priority,
            Arc::clone(&sessions),
            Arc::clone(&macs),
        );

        info!(
            virtual_ip = %config.virtual_ip,
            backends = pool.len(),
            session_key = ?config.session_key,
            arp_reply = ?config.arp_reply,
            "Load balancer initialized"
        );

        Ok(Self {
            pool,
            sessions,
            macs,
            classifier: PacketClassifier::new(config.virtual_ip, config.answer_backend_arp),
            arp,
            programmer,
        })
    }

    /// Validate `config` and build the load balancer.
    pub fn from_config(config: &LbConfig) -> config::Result<Self> {
        Self::new(&config.validate()?)
    }

    pub fn pool(&self) -> &BackendPool {
        &self.pool
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn mac_table(&self) -> &MacPortTable {
        &self.macs
    }

    pub fn classify(&self, packet: &DecodedPacket) -> Classification {
        self.classifier.classify(packet, &self.sessions)
    }

    /// Install the rules of every known session on `conn`.
    ///
    /// Sessions whose client port has not been learned are skipped.
    /// Returns the number of sessions installed.
    pub fn resync(&self, conn: &dyn SwitchConnection) -> channel::Result<usize> {
        let mut installed = 0;
        for session in self.sessions.snapshot() {
            let Some(rules) = self.programmer.program_session(&session, None) else {
                debug!(client = %session.client_ip, "Client port unknown, not resyncing session");
                continue;
            };
            for rule in rules {
                conn.install_rule(rule)?;
            }
            installed += 1;
        }
        Ok(installed)
    }
}

impl SwitchEventHandler for LoadBalancer {
    fn on_connection_up(&self, conn: &dyn SwitchConnection) -> channel::Result<()> {
        info!(dpid = conn.dpid(), "Switch connected");
        let installed = self.resync(conn)?;
        if installed > 0 {
            info!(dpid = conn.dpid(), sessions = installed, "Resynced sessions");
        }
        Ok(())
    }

    fn on_packet_in(
        &self,
        conn: &dyn SwitchConnection,
        event: &PacketIn,
    ) -> channel::Result<Outcome> {
        let packet = &event.packet;
        let class = self.classify(packet);

        debug!(
            dpid = conn.dpid(),
            in_port = event.in_port,
            src_mac = %packet.eth.src,
            ?class,
            "Packet-in"
        );

        if class == Classification::Ignored {
            return Ok(Outcome::Ignored);
        }
        self.macs.learn(packet.eth.src, event.in_port);

        match class {
            Classification::ArpForVirtual(arp) => {
                let answer = self.arp.handle(&arp, event.in_port);
                conn.send_packet(answer.reply)?;
                Ok(Outcome::ArpReplied {
                    backend: answer.assignment.backend(),
                    new_session: answer.assignment.created,
                })
            }
            Classification::IpForVirtual(ip) => {
                let flow = self.programmer.handle(&packet.eth, &ip, event);
                conn.install_rule(flow.forward_rule)?;
                conn.install_rule(flow.reverse_rule)?;
                conn.send_packet(flow.packet_out)?;
                Ok(Outcome::FlowsInstalled {
                    backend: flow.assignment.backend(),
                    new_session: flow.assignment.created,
                })
            }
            Classification::ArpForClient(arp) => {
                match self.arp.handle_for_client(&arp, event.in_port) {
                    Some((reply, session)) => {
                        conn.send_packet(reply)?;
                        Ok(Outcome::ClientArpReplied {
                            client_ip: session.client_ip,
                        })
                    }
                    None => Ok(Outcome::Ignored),
                }
            }
            Classification::Ignored => Ok(Outcome::Ignored),
        }
    }
}
