//! Test utilities for mvirt-lb integration tests.
//!
//! Provides the reference topology (two backends behind one virtual
//! address), packet-in builders and frame parsers, so the control core can
//! be exercised without a switch.

pub mod packets;

pub use packets::*;

use smoltcp::wire::EthernetAddress;
use std::net::Ipv4Addr;

use crate::config::{BackendConfig, LbConfig, ServiceConfig};
use crate::dispatcher::LoadBalancer;
use crate::packet::PacketIn;

pub const VIRTUAL_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 10);
pub const VIRTUAL_MAC: [u8; 6] = [0x00, 0x00, 0x00, 0x00, 0x00, 0x10];

pub const B1_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
pub const B1_MAC: [u8; 6] = [0x00, 0x00, 0x00, 0x00, 0x00, 0x05];
pub const B1_PORT: u16 = 5;

pub const B2_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 6);
pub const B2_MAC: [u8; 6] = [0x00, 0x00, 0x00, 0x00, 0x00, 0x06];
pub const B2_PORT: u16 = 6;

pub const C1_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
pub const C1_MAC: [u8; 6] = [0x52, 0x54, 0x00, 0x00, 0x00, 0x01];
pub const C1_PORT: u16 = 1;

pub const C2_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
pub const C2_MAC: [u8; 6] = [0x52, 0x54, 0x00, 0x00, 0x00, 0x02];
pub const C2_PORT: u16 = 2;

/// Datapath id used by tests.
pub const TEST_DPID: u64 = 0x1;

/// Two-backend configuration (B1, B2) behind the virtual address.
pub fn test_config() -> LbConfig {
    LbConfig {
        virtual_ip: VIRTUAL_IP,
        virtual_mac: crate::packet::format_mac(&EthernetAddress(VIRTUAL_MAC)),
        backends: vec![
            BackendConfig {
                ip: B1_IP,
                mac: crate::packet::format_mac(&EthernetAddress(B1_MAC)),
                port: B1_PORT,
            },
            BackendConfig {
                ip: B2_IP,
                mac: crate::packet::format_mac(&EthernetAddress(B2_MAC)),
                port: B2_PORT,
            },
        ],
        ..Default::default()
    }
}

/// Validated [`test_config`].
pub fn test_service_config() -> ServiceConfig {
    test_config()
        .validate()
        .expect("test config should be valid")
}

/// Load balancer built from [`test_config`].
pub fn test_load_balancer() -> LoadBalancer {
    LoadBalancer::new(&test_service_config()).expect("test config should build")
}

/// Packet-in carrying an ARP request from a host.
pub fn arp_packet_in(in_port: u16, sender_mac: [u8; 6], sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> PacketIn {
    let frame = create_arp_request(sender_mac, sender_ip.octets(), target_ip.octets());
    PacketIn::from_frame(in_port, frame).expect("ARP frame should decode")
}

/// Packet-in carrying an IPv4 packet from a client to the virtual address.
pub fn ip_packet_in(in_port: u16, client_mac: [u8; 6], client_ip: Ipv4Addr) -> PacketIn {
    let frame = create_ipv4_packet(client_mac, VIRTUAL_MAC, client_ip.octets(), VIRTUAL_IP.octets());
    PacketIn::from_frame(in_port, frame).expect("IPv4 frame should decode")
}
