//! Control channel between the load balancer and switches.
//!
//! Transports deliver [`SwitchEvent`]s into a single control loop, which
//! hands them to a [`SwitchEventHandler`] one at a time. Instructions flow
//! back as [`SwitchCommand`]s over an unbounded channel per switch; sends
//! never wait for the switch.
//!
//! ```text
//! transport --SwitchEvent--> run_control_loop --> SwitchEventHandler
//!     ^                                                  |
//!     +-------------- SwitchCommand (per dpid) ----------+
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dispatcher::Outcome;
use crate::flow::{FlowRule, PacketOut};
use crate::packet::PacketIn;

/// Depth of the event queue feeding the control loop.
pub const EVENT_QUEUE_DEPTH: usize = 1024;

/// Control channel errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Connection to switch {0:#x} closed")]
    Closed(u64),
}

pub type Result<T> = std::result::Result<T, ChannelError>;

/// Instruction sink for one connected switch.
pub trait SwitchConnection: Send + Sync {
    /// Datapath id of the switch.
    fn dpid(&self) -> u64;

    /// Install (or replace) a flow rule.
    fn install_rule(&self, rule: FlowRule) -> Result<()>;

    /// Emit a packet once.
    fn send_packet(&self, packet: PacketOut) -> Result<()>;
}

/// Receiver of switch events.
pub trait SwitchEventHandler: Send + Sync {
    fn on_connection_up(&self, conn: &dyn SwitchConnection) -> Result<()>;

    fn on_packet_in(&self, conn: &dyn SwitchConnection, event: &PacketIn) -> Result<Outcome>;
}

/// Instruction sent to a switch transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchCommand {
    InstallRule(FlowRule),
    PacketOut(PacketOut),
}

/// [`SwitchConnection`] backed by a tokio channel to the transport.
#[derive(Debug, Clone)]
pub struct ChannelConnection {
    dpid: u64,
    tx: mpsc::UnboundedSender<SwitchCommand>,
}

impl ChannelConnection {
    pub fn new(dpid: u64, tx: mpsc::UnboundedSender<SwitchCommand>) -> Self {
        Self { dpid, tx }
    }

    /// Create a connection and the receiver the transport drains.
    pub fn channel(dpid: u64) -> (Self, mpsc::UnboundedReceiver<SwitchCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(dpid, tx), rx)
    }

    fn send(&self, command: SwitchCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| ChannelError::Closed(self.dpid))
    }
}

impl SwitchConnection for ChannelConnection {
    fn dpid(&self) -> u64 {
        self.dpid
    }

    fn install_rule(&self, rule: FlowRule) -> Result<()> {
        self.send(SwitchCommand::InstallRule(rule))
    }

    fn send_packet(&self, packet: PacketOut) -> Result<()> {
        self.send(SwitchCommand::PacketOut(packet))
    }
}

/// Event delivered by a switch transport.
#[derive(Debug)]
pub enum SwitchEvent {
    ConnectionUp {
        dpid: u64,
        commands: mpsc::UnboundedSender<SwitchCommand>,
    },
    ConnectionDown {
        dpid: u64,
    },
    PacketIn {
        dpid: u64,
        packet: PacketIn,
    },
}

/// Create the event queue for [`run_control_loop`].
pub fn event_channel() -> (mpsc::Sender<SwitchEvent>, mpsc::Receiver<SwitchEvent>) {
    mpsc::channel(EVENT_QUEUE_DEPTH)
}

/// Counters reported when the control loop exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    pub connections: u64,
    pub packet_ins: u64,
    pub ignored: u64,
    pub errors: u64,
}

/// Process switch events one at a time until all event senders are dropped.
///
/// A connection whose command channel is closed is forgotten; later
/// packet-ins for it count as errors until it reconnects.
pub async fn run_control_loop<H>(handler: Arc<H>, mut events: mpsc::Receiver<SwitchEvent>) -> LoopStats
where
    H: SwitchEventHandler + ?Sized,
{
    let mut connections: HashMap<u64, ChannelConnection> = HashMap::new();
    let mut stats = LoopStats::default();

    info!("Control loop started");

    while let Some(event) = events.recv().await {
        match event {
            SwitchEvent::ConnectionUp { dpid, commands } => {
                stats.connections += 1;
                let conn = ChannelConnection::new(dpid, commands);
                if let Err(e) = handler.on_connection_up(&conn) {
                    warn!(dpid, error = %e, "Connection setup failed");
                    stats.errors += 1;
                    continue;
                }
                connections.insert(dpid, conn);
            }
            SwitchEvent::ConnectionDown { dpid } => {
                if connections.remove(&dpid).is_some() {
                    info!(dpid, "Switch disconnected");
                }
            }
            SwitchEvent::PacketIn { dpid, packet } => {
                stats.packet_ins += 1;
                let Some(conn) = connections.get(&dpid) else {
                    warn!(dpid, in_port = packet.in_port, "Packet-in from unknown switch");
                    stats.errors += 1;
                    continue;
                };

                match handler.on_packet_in(conn, &packet) {
                    Ok(Outcome::Ignored) => stats.ignored += 1,
                    Ok(outcome) => debug!(dpid, ?outcome, "Packet-in handled"),
                    Err(e) => {
                        warn!(dpid, error = %e, "Failed to deliver instructions to switch");
                        stats.errors += 1;
                        connections.remove(&dpid);
                    }
                }
            }
        }
    }

    info!(
        packet_ins = stats.packet_ins,
        ignored = stats.ignored,
        errors = stats.errors,
        "Control loop stopped"
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_connection_sends_commands() {
        let (conn, mut rx) = ChannelConnection::channel(0x1);
        let packet = PacketOut::frame(vec![1, 2, 3], 4);

        conn.send_packet(packet.clone()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), SwitchCommand::PacketOut(packet));
        assert_eq!(conn.dpid(), 0x1);
    }

    #[test]
    fn test_channel_connection_closed() {
        let (conn, rx) = ChannelConnection::channel(0x2);
        drop(rx);

        let err = conn.send_packet(PacketOut::frame(vec![], 1)).unwrap_err();
        assert!(matches!(err, ChannelError::Closed(0x2)));
        assert_eq!(err.to_string(), "Connection to switch 0x2 closed");
    }
}
