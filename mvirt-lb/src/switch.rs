//! In-memory switch used by `mvirt-lb simulate` and the tests.
//!
//! Holds a flow table with replace-on-same-slot semantics and records
//! packet-outs. Packets that match no rule go to the controller.

use std::sync::Mutex;
use tracing::{debug, trace};

use crate::channel::{self, SwitchCommand, SwitchConnection};
use crate::flow::{FlowRule, PacketOut};
use crate::packet::DecodedPacket;

/// Ordered set of flow rules.
#[derive(Debug, Default, Clone)]
pub struct FlowTable {
    rules: Vec<FlowRule>,
}

impl FlowTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a rule. A rule with the same match and priority is replaced.
    ///
    /// Returns true if a rule was replaced.
    pub fn install(&mut self, rule: FlowRule) -> bool {
        if let Some(existing) = self.rules.iter_mut().find(|r| r.same_slot(&rule)) {
            *existing = rule;
            return true;
        }
        self.rules.push(rule);
        false
    }

    /// Highest-priority rule matching the packet. Earlier rules win ties.
    pub fn lookup(&self, in_port: u16, packet: &DecodedPacket) -> Option<&FlowRule> {
        self.rules
            .iter()
            .filter(|r| r.matches.matches(in_port, packet))
            .fold(None, |best: Option<&FlowRule>, r| match best {
                Some(b) if b.priority >= r.priority => Some(b),
                _ => Some(r),
            })
    }

    pub fn rules(&self) -> &[FlowRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// What the switch did with a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Matched a rule; rewritten and sent out `out_port`.
    Forwarded { out_port: u16, packet: DecodedPacket },
    /// No rule matched; delivered as a packet-in.
    ToController,
}

pub struct SimSwitch {
    dpid: u64,
    table: Mutex<FlowTable>,
    packet_outs: Mutex<Vec<PacketOut>>,
}

impl SimSwitch {
    pub fn new(dpid: u64) -> Self {
        Self {
            dpid,
            table: Mutex::new(FlowTable::new()),
            packet_outs: Mutex::new(Vec::new()),
        }
    }

    /// Run a packet arriving on `in_port` through the flow table.
    pub fn receive(&self, in_port: u16, packet: &DecodedPacket) -> Verdict {
        let table = self.table.lock().unwrap();
        match table.lookup(in_port, packet) {
            Some(rule) => {
                let mut packet = *packet;
                rule.rewrite(&mut packet);
                trace!(dpid = self.dpid, in_port, rule = %rule, "Flow table hit");
                Verdict::Forwarded {
                    out_port: rule.out_port,
                    packet,
                }
            }
            None => Verdict::ToController,
        }
    }

    /// Apply a command received over a control channel.
    pub fn apply(&self, command: SwitchCommand) {
        match command {
            SwitchCommand::InstallRule(rule) => self.install(rule),
            SwitchCommand::PacketOut(packet) => self.emit(packet),
        }
    }

    pub fn flows(&self) -> Vec<FlowRule> {
        self.table.lock().unwrap().rules().to_vec()
    }

    pub fn flow_count(&self) -> usize {
        self.table.lock().unwrap().len()
    }

    /// Packets emitted so far, in order.
    pub fn packet_outs(&self) -> Vec<PacketOut> {
        self.packet_outs.lock().unwrap().clone()
    }

    fn install(&self, rule: FlowRule) {
        debug!(dpid = self.dpid, rule = %rule, "Installing flow");
        let replaced = self.table.lock().unwrap().install(rule);
        if replaced {
            trace!(dpid = self.dpid, "Replaced existing flow");
        }
    }

    fn emit(&self, packet: PacketOut) {
        trace!(dpid = self.dpid, out_port = packet.out_port, "Packet-out");
        self.packet_outs.lock().unwrap().push(packet);
    }
}

impl SwitchConnection for SimSwitch {
    fn dpid(&self) -> u64 {
        self.dpid
    }

    fn install_rule(&self, rule: FlowRule) -> channel::Result<()> {
        self.install(rule);
        Ok(())
    }

    fn send_packet(&self, packet: PacketOut) -> channel::Result<()> {
        self.emit(packet);
        Ok(())
    }
}
