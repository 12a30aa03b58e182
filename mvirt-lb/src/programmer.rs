//! Flow programming for accepted sessions.
//!
//! Every session gets two rules:
//!
//! ```text
//! forward: in_port=<client port> [dl_src=<client mac>] ip nw_src=<client> nw_dst=<vip>
//!          -> set_nw_dst:<backend>, set_dl_dst:<backend mac>, output:<backend port>
//! reverse: in_port=<backend port> ip nw_src=<backend> nw_dst=<client>
//!          -> set_nw_src:<vip>, set_dl_src:<virtual identity mac>, output:<client port>
//! ```
//!
//! The reverse rule restores exactly the identity the client addressed, so
//! return traffic never needs the controller.
//!
//! A forward rule matches at least the fields of the session key: the link
//! source is included when sessions are keyed on it, so two sessions never
//! share a flow table slot.

use smoltcp::wire::EthernetAddress;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::debug;

use crate::arp::ArpReplyPolicy;
use crate::flow::{FlowMatch, FlowRule, PacketOut, RewriteAction, RuleDirection};
use crate::mac_table::MacPortTable;
use crate::packet::{EthernetHeader, Ipv4Header, PacketIn};
use crate::session::{Assignment, Session, SessionKeyPolicy, SessionTable};

/// Rules and first-packet forward for one accepted packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgrammedFlow {
    pub forward_rule: FlowRule,
    pub reverse_rule: FlowRule,
    /// The triggering packet, rewritten and sent to the backend.
    pub packet_out: PacketOut,
    pub assignment: Assignment,
}

pub struct FlowProgrammer {
    virtual_ip: Ipv4Addr,
    virtual_mac: EthernetAddress,
    policy: ArpReplyPolicy,
    priority: u16,
    sessions: Arc<SessionTable>,
    macs: Arc<MacPortTable>,
}

impl FlowProgrammer {
    pub fn new(
        virtual_ip: Ipv4Addr,
        virtual_mac: EthernetAddress,
        policy: ArpReplyPolicy,
        priority: u16,
        sessions: Arc<SessionTable>,
        macs: Arc<MacPortTable>,
    ) -> Self {
        Self {
            virtual_ip,
            virtual_mac,
            policy,
            priority,
            sessions,
            macs,
        }
    }

    /// Program the session for an IPv4 packet addressed to the virtual address.
    pub fn handle(&self, eth: &EthernetHeader, ip: &Ipv4Header, event: &PacketIn) -> ProgrammedFlow {
        debug_assert_eq!(ip.dst, self.virtual_ip);

        let assignment = self.sessions.assign(ip.src, eth.src);
        let session = assignment.session;

        let forward_rule = self.forward_rule(&session, event.in_port);
        let reverse_rule = self.reverse_rule(&session, event.in_port);

        // Installed rules do not apply to the buffered first packet
        let packet_out = PacketOut {
            data: event.data.clone(),
            buffer_id: event.buffer_id,
            actions: forward_rule.actions.clone(),
            out_port: forward_rule.out_port,
        };

        debug!(
            client = %ip.src,
            backend = %session.backend.ip,
            client_port = event.in_port,
            backend_port = session.backend.port,
            new_session = assignment.created,
            "Programmed session flows"
        );

        ProgrammedFlow {
            forward_rule,
            reverse_rule,
            packet_out,
            assignment,
        }
    }

    /// Build the rule pair for an existing session.
    ///
    /// Without `client_port`, the port last learned for the client's link
    /// address is used; returns `None` if it was never seen.
    pub fn program_session(&self, session: &Session, client_port: Option<u16>) -> Option<[FlowRule; 2]> {
        let client_port = match client_port {
            Some(port) => port,
            None => self.macs.port_of(&session.client_mac)?,
        };
        Some([
            self.forward_rule(session, client_port),
            self.reverse_rule(session, client_port),
        ])
    }

    /// Link address clients see for the virtual address in this session.
    pub fn virtual_mac_for(&self, session: &Session) -> EthernetAddress {
        self.policy.resolve(self.virtual_mac, &session.backend)
    }

    fn forward_rule(&self, session: &Session, client_port: u16) -> FlowRule {
        let mut matches = FlowMatch::ipv4(client_port)
            .with_src(session.client_ip)
            .with_dst(self.virtual_ip);
        if self.sessions.policy() == SessionKeyPolicy::ClientIpAndMac {
            matches = matches.with_eth_src(session.client_mac);
        }

        FlowRule {
            direction: RuleDirection::Forward,
            priority: self.priority,
            matches,
            actions: vec![
                RewriteAction::SetIpDst(session.backend.ip),
                RewriteAction::SetEthDst(session.backend.mac),
            ],
            out_port: session.backend.port,
        }
    }

    fn reverse_rule(&self, session: &Session, client_port: u16) -> FlowRule {
        FlowRule {
            direction: RuleDirection::Reverse,
            priority: self.priority,
            matches: FlowMatch::ipv4(session.backend.port)
                .with_src(session.backend.ip)
                .with_dst(session.client_ip),
            actions: vec![
                RewriteAction::SetIpSrc(self.virtual_ip),
                RewriteAction::SetEthSrc(self.virtual_mac_for(session)),
            ],
            out_port: client_port,
        }
    }
}
