//! Decoded packet headers and frame building using smoltcp.
//!
//! The control core only ever looks at the handful of header fields it
//! classifies on. Transports that hand over raw frames go through
//! [`decode_frame`]; frames the core emits itself (ARP replies) are built
//! here as well.

use smoltcp::phy::ChecksumCapabilities;
use smoltcp::wire::{
    ArpOperation, ArpPacket, ArpRepr, EthernetAddress, EthernetFrame, EthernetProtocol,
    EthernetRepr, IpProtocol, Ipv4Packet, Ipv4Repr,
};
use std::net::Ipv4Addr;

/// IP protocol number used for opaque test/simulation payloads (RFC 3692).
const EXPERIMENTAL_PROTOCOL: u8 = 253;

/// Ethernet header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub ethertype: EthernetProtocol,
    pub src: EthernetAddress,
    pub dst: EthernetAddress,
}

/// ARP (Ethernet/IPv4) header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpHeader {
    pub operation: ArpOperation,
    pub sender_mac: EthernetAddress,
    pub sender_ip: Ipv4Addr,
    pub target_mac: EthernetAddress,
    pub target_ip: Ipv4Addr,
}

/// IPv4 header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

/// Network layer of a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkHeader {
    Arp(ArpHeader),
    Ipv4(Ipv4Header),
    /// Anything the core does not look into.
    Other,
}

/// A decoded frame: Ethernet header plus the network layer we care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedPacket {
    pub eth: EthernetHeader,
    pub network: NetworkHeader,
}

impl DecodedPacket {
    pub fn arp(&self) -> Option<&ArpHeader> {
        match &self.network {
            NetworkHeader::Arp(arp) => Some(arp),
            _ => None,
        }
    }

    pub fn ipv4(&self) -> Option<&Ipv4Header> {
        match &self.network {
            NetworkHeader::Ipv4(ip) => Some(ip),
            _ => None,
        }
    }
}

/// A packet-in notification from a switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketIn {
    /// Switch port the frame arrived on.
    pub in_port: u16,
    /// Switch-side buffer holding the frame, if the switch buffered it.
    pub buffer_id: Option<u32>,
    /// Raw frame as delivered by the switch.
    pub data: Vec<u8>,
    /// Decoded headers.
    pub packet: DecodedPacket,
}

impl PacketIn {
    /// Build a packet-in from a raw frame, decoding it with smoltcp.
    ///
    /// Returns `None` if the frame is too short to carry an Ethernet header.
    pub fn from_frame(in_port: u16, data: Vec<u8>) -> Option<Self> {
        let packet = decode_frame(&data)?;
        Some(Self {
            in_port,
            buffer_id: None,
            data,
            packet,
        })
    }
}

/// Decode the Ethernet header and, for ARP and IPv4, the network header.
///
/// Malformed ARP or IPv4 payloads decode as [`NetworkHeader::Other`].
pub fn decode_frame(data: &[u8]) -> Option<DecodedPacket> {
    let frame = EthernetFrame::new_checked(data).ok()?;
    let eth = EthernetHeader {
        ethertype: frame.ethertype(),
        src: frame.src_addr(),
        dst: frame.dst_addr(),
    };

    let network = match eth.ethertype {
        EthernetProtocol::Arp => parse_arp(frame.payload())
            .map(NetworkHeader::Arp)
            .unwrap_or(NetworkHeader::Other),
        EthernetProtocol::Ipv4 => match Ipv4Packet::new_checked(frame.payload()) {
            Ok(ip) => NetworkHeader::Ipv4(Ipv4Header {
                src: ip.src_addr(),
                dst: ip.dst_addr(),
            }),
            Err(_) => NetworkHeader::Other,
        },
        _ => NetworkHeader::Other,
    };

    Some(DecodedPacket { eth, network })
}

/// Parse an Ethernet/IPv4 ARP packet from an Ethernet payload.
pub fn parse_arp(data: &[u8]) -> Option<ArpHeader> {
    let packet = ArpPacket::new_checked(data).ok()?;
    match ArpRepr::parse(&packet).ok()? {
        ArpRepr::EthernetIpv4 {
            operation,
            source_hardware_addr,
            source_protocol_addr,
            target_hardware_addr,
            target_protocol_addr,
        } => Some(ArpHeader {
            operation,
            sender_mac: source_hardware_addr,
            sender_ip: source_protocol_addr,
            target_mac: target_hardware_addr,
            target_ip: target_protocol_addr,
        }),
        _ => None,
    }
}

/// Build a complete ARP frame.
///
/// The Ethernet source is the ARP sender hardware address.
pub fn build_arp_frame(dst_mac: EthernetAddress, arp: &ArpHeader) -> Vec<u8> {
    let arp_repr = ArpRepr::EthernetIpv4 {
        operation: arp.operation,
        source_hardware_addr: arp.sender_mac,
        source_protocol_addr: arp.sender_ip,
        target_hardware_addr: arp.target_mac,
        target_protocol_addr: arp.target_ip,
    };
    let eth_repr = EthernetRepr {
        src_addr: arp.sender_mac,
        dst_addr: dst_mac,
        ethertype: EthernetProtocol::Arp,
    };

    let mut buffer = vec![0u8; eth_repr.buffer_len() + arp_repr.buffer_len()];
    let mut frame = EthernetFrame::new_unchecked(&mut buffer);
    eth_repr.emit(&mut frame);
    let mut arp_packet = ArpPacket::new_unchecked(frame.payload_mut());
    arp_repr.emit(&mut arp_packet);
    buffer
}

/// Build an ARP reply telling `target` that `sender_ip` is at `sender_mac`.
pub fn build_arp_reply_frame(
    sender_mac: EthernetAddress,
    sender_ip: Ipv4Addr,
    target_mac: EthernetAddress,
    target_ip: Ipv4Addr,
) -> Vec<u8> {
    build_arp_frame(
        target_mac,
        &ArpHeader {
            operation: ArpOperation::Reply,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        },
    )
}

/// Build a broadcast ARP request asking who has `target_ip`.
pub fn build_arp_request_frame(
    sender_mac: EthernetAddress,
    sender_ip: Ipv4Addr,
    target_ip: Ipv4Addr,
) -> Vec<u8> {
    build_arp_frame(
        EthernetAddress::BROADCAST,
        &ArpHeader {
            operation: ArpOperation::Request,
            sender_mac,
            sender_ip,
            target_mac: EthernetAddress([0; 6]),
            target_ip,
        },
    )
}

/// Build an IPv4 frame carrying an opaque payload.
pub fn build_ipv4_frame(
    src_mac: EthernetAddress,
    dst_mac: EthernetAddress,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    payload: &[u8],
) -> Vec<u8> {
    let eth_repr = EthernetRepr {
        src_addr: src_mac,
        dst_addr: dst_mac,
        ethertype: EthernetProtocol::Ipv4,
    };
    let ip_repr = Ipv4Repr {
        src_addr: src_ip,
        dst_addr: dst_ip,
        next_header: IpProtocol::Unknown(EXPERIMENTAL_PROTOCOL),
        payload_len: payload.len(),
        hop_limit: 64,
    };

    let mut buffer = vec![0u8; eth_repr.buffer_len() + ip_repr.buffer_len() + payload.len()];
    let mut frame = EthernetFrame::new_unchecked(&mut buffer);
    eth_repr.emit(&mut frame);
    let mut ip_packet = Ipv4Packet::new_unchecked(frame.payload_mut());
    ip_repr.emit(&mut ip_packet, &ChecksumCapabilities::default());
    ip_packet.payload_mut().copy_from_slice(payload);
    buffer
}

/// Parse a MAC address in `aa:bb:cc:dd:ee:ff` form.
pub fn parse_mac(mac_str: &str) -> Option<EthernetAddress> {
    let parts: Vec<&str> = mac_str.split(':').collect();
    if parts.len() != 6 {
        return None;
    }
    let mut mac = [0u8; 6];
    for (i, part) in parts.iter().enumerate() {
        if part.len() != 2 {
            return None;
        }
        mac[i] = u8::from_str_radix(part, 16).ok()?;
    }
    Some(EthernetAddress(mac))
}

/// Format a MAC address in `aa:bb:cc:dd:ee:ff` form.
pub fn format_mac(mac: &EthernetAddress) -> String {
    let b = mac.0;
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        b[0], b[1], b[2], b[3], b[4], b[5]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT_MAC: EthernetAddress = EthernetAddress([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);

    #[test]
    fn test_decode_arp_request() {
        let frame = build_arp_request_frame(
            CLIENT_MAC,
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 10),
        );
        let packet = decode_frame(&frame).unwrap();

        assert_eq!(packet.eth.ethertype, EthernetProtocol::Arp);
        assert_eq!(packet.eth.src, CLIENT_MAC);
        assert_eq!(packet.eth.dst, EthernetAddress::BROADCAST);

        let arp = packet.arp().unwrap();
        assert_eq!(arp.operation, ArpOperation::Request);
        assert_eq!(arp.sender_ip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(arp.target_ip, Ipv4Addr::new(10, 0, 0, 10));
    }

    #[test]
    fn test_arp_reply_frame_addressed_to_requester() {
        let virtual_mac = EthernetAddress([0, 0, 0, 0, 0, 0x10]);
        let frame = build_arp_reply_frame(
            virtual_mac,
            Ipv4Addr::new(10, 0, 0, 10),
            CLIENT_MAC,
            Ipv4Addr::new(10, 0, 0, 1),
        );
        let packet = decode_frame(&frame).unwrap();

        assert_eq!(packet.eth.src, virtual_mac);
        assert_eq!(packet.eth.dst, CLIENT_MAC);
        let arp = packet.arp().unwrap();
        assert_eq!(arp.operation, ArpOperation::Reply);
        assert_eq!(arp.sender_mac, virtual_mac);
        assert_eq!(arp.target_mac, CLIENT_MAC);
    }

    #[test]
    fn test_decode_ipv4() {
        let frame = build_ipv4_frame(
            CLIENT_MAC,
            EthernetAddress([0, 0, 0, 0, 0, 0x10]),
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 10),
            b"hello",
        );
        let packet = decode_frame(&frame).unwrap();

        assert_eq!(packet.eth.ethertype, EthernetProtocol::Ipv4);
        let ip = packet.ipv4().unwrap();
        assert_eq!(ip.src, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(ip.dst, Ipv4Addr::new(10, 0, 0, 10));
        assert!(packet.arp().is_none());
    }

    #[test]
    fn test_decode_truncated_frame() {
        assert!(decode_frame(&[0u8; 10]).is_none());

        // Valid Ethernet header with an ARP ethertype but no payload
        let mut data = vec![0u8; 14];
        data[12..14].copy_from_slice(&[0x08, 0x06]);
        let packet = decode_frame(&data).unwrap();
        assert_eq!(packet.network, NetworkHeader::Other);
    }

    #[test]
    fn test_parse_mac() {
        assert_eq!(parse_mac("52:54:00:12:34:56"), Some(CLIENT_MAC));
        assert_eq!(format_mac(&CLIENT_MAC), "52:54:00:12:34:56");
        assert!(parse_mac("52:54:00:12:34").is_none());
        assert!(parse_mac("52:54:00:12:34:zz").is_none());
        assert!(parse_mac("5:54:00:12:34:56").is_none());
    }
}
