//! mvirt-lb: virtual-IP load balancer control plane for OpenFlow-style switches.
//!
//! Clients address one virtual IP. The controller answers their ARP
//! requests, pins each client to a backend round-robin, and installs a
//! forward and a reverse rewrite rule so that subsequent traffic is
//! translated by the switch without involving the controller.
//!
//! # Architecture
//!
//! ```text
//! switch --packet-in--> channel --> dispatcher --+--> arp        --> packet-out
//!                                                |
//!                                                +--> programmer --> flow rules + packet-out
//!                                                       |
//!                                        session table --+-- backend pool (round robin)
//! ```

pub mod arp;
pub mod backend;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod flow;
pub mod mac_table;
pub mod packet;
pub mod programmer;
pub mod session;
pub mod switch;

#[cfg(any(test, feature = "test-util"))]
pub mod test_util;

// Re-export commonly used types
pub use arp::{ArpReplyPolicy, ArpResponder};
pub use backend::{Backend, BackendPool};
pub use channel::{
    ChannelConnection, ChannelError, LoopStats, SwitchCommand, SwitchConnection, SwitchEvent,
    SwitchEventHandler, event_channel, run_control_loop,
};
pub use config::{ConfigError, LbConfig, ServiceConfig};
pub use dispatcher::{Classification, LoadBalancer, Outcome};
pub use flow::{FlowMatch, FlowRule, PacketOut, RewriteAction};
pub use packet::{DecodedPacket, PacketIn};
pub use session::{Session, SessionKeyPolicy, SessionTable};
pub use switch::{SimSwitch, Verdict};
