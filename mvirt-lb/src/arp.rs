//! ARP responder for the virtual address.
//!
//! Clients resolving the virtual address get a reply pinned to the backend
//! their session is assigned to. Optionally, backends resolving a client
//! address are answered from the session table.

use serde::{Deserialize, Serialize};
use smoltcp::wire::{ArpOperation, EthernetAddress};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::debug;

use crate::backend::Backend;
use crate::flow::PacketOut;
use crate::packet::{ArpHeader, build_arp_reply_frame};
use crate::session::{Assignment, Session, SessionTable};

/// Link address the virtual address resolves to.
///
/// Used for ARP replies and for the source rewrite of reverse rules, so
/// clients always see a single link identity for the virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArpReplyPolicy {
    /// The fixed virtual link address.
    #[default]
    VirtualMac,
    /// The link address of the client's assigned backend.
    BackendMac,
}

impl ArpReplyPolicy {
    pub fn resolve(&self, virtual_mac: EthernetAddress, backend: &Backend) -> EthernetAddress {
        match self {
            ArpReplyPolicy::VirtualMac => virtual_mac,
            ArpReplyPolicy::BackendMac => backend.mac,
        }
    }
}

/// ARP reply together with the session it was answered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpAnswer {
    pub reply: PacketOut,
    pub assignment: Assignment,
}

pub struct ArpResponder {
    virtual_ip: Ipv4Addr,
    virtual_mac: EthernetAddress,
    policy: ArpReplyPolicy,
    sessions: Arc<SessionTable>,
}

impl ArpResponder {
    pub fn new(
        virtual_ip: Ipv4Addr,
        virtual_mac: EthernetAddress,
        policy: ArpReplyPolicy,
        sessions: Arc<SessionTable>,
    ) -> Self {
        Self {
            virtual_ip,
            virtual_mac,
            policy,
            sessions,
        }
    }

    /// Answer a request for the virtual address.
    ///
    /// The caller classifies; `request` must be an ARP REQUEST targeting the
    /// virtual address. Assigns (or reuses) the requester's session.
    pub fn handle(&self, request: &ArpHeader, in_port: u16) -> ArpAnswer {
        debug_assert_eq!(request.operation, ArpOperation::Request);
        debug_assert_eq!(request.target_ip, self.virtual_ip);

        let assignment = self
            .sessions
            .assign(request.sender_ip, request.sender_mac);
        let resolved_mac = self.policy.resolve(self.virtual_mac, &assignment.backend());

        debug!(
            requester = %request.sender_ip,
            backend = %assignment.backend().ip,
            reply_mac = %resolved_mac,
            in_port,
            "Answering ARP for virtual address"
        );

        let frame = build_arp_reply_frame(
            resolved_mac,
            self.virtual_ip,
            request.sender_mac,
            request.sender_ip,
        );

        ArpAnswer {
            reply: PacketOut::frame(frame, in_port),
            assignment,
        }
    }

    /// Answer a request for a client address on the client's behalf.
    ///
    /// Returns `None` if the target has no session.
    pub fn handle_for_client(&self, request: &ArpHeader, in_port: u16) -> Option<(PacketOut, Session)> {
        let session = self.sessions.find_by_client_ip(request.target_ip)?;

        debug!(
            requester = %request.sender_ip,
            client = %session.client_ip,
            client_mac = %session.client_mac,
            in_port,
            "Answering ARP for client address"
        );

        let frame = build_arp_reply_frame(
            session.client_mac,
            session.client_ip,
            request.sender_mac,
            request.sender_ip,
        );
        Some((PacketOut::frame(frame, in_port), session))
    }
}
