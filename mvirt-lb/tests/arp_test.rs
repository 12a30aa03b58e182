//! ARP handling tests.
//!
//! Tests ARP request → reply for the virtual address, under both reply
//! policies, driven through the load balancer's packet-in handler.

use mvirt_lb::test_util::{
    B1_IP, B1_MAC, B2_MAC, C1_IP, C1_MAC, C1_PORT, C2_IP, C2_MAC, C2_PORT, TEST_DPID, VIRTUAL_IP,
    VIRTUAL_MAC, arp_packet_in, parse_arp_reply, test_config, test_load_balancer,
};
use mvirt_lb::{ArpReplyPolicy, LoadBalancer, Outcome, SimSwitch, SwitchEventHandler};
use std::net::Ipv4Addr;

#[test]
fn test_arp_virtual_address_resolution() {
    let lb = test_load_balancer();
    let switch = SimSwitch::new(TEST_DPID);

    lb.on_packet_in(&switch, &arp_packet_in(C1_PORT, C1_MAC, C1_IP, VIRTUAL_IP))
        .unwrap();

    let outs = switch.packet_outs();
    assert_eq!(outs.len(), 1, "Exactly one ARP reply should be emitted");
    assert_eq!(outs[0].out_port, C1_PORT, "Reply goes out the ingress port");

    let reply = parse_arp_reply(&outs[0].data).expect("Should parse as ARP reply");
    assert_eq!(Ipv4Addr::from(reply.sender_ip), VIRTUAL_IP);
    assert_eq!(reply.sender_mac, VIRTUAL_MAC);
    assert_eq!(reply.eth_src, VIRTUAL_MAC);
    assert_eq!(reply.target_mac, C1_MAC, "Target MAC should be the requester");
    assert_eq!(reply.eth_dst, C1_MAC);
    assert_eq!(Ipv4Addr::from(reply.target_ip), C1_IP);
}

#[test]
fn test_arp_backend_mac_policy() {
    let mut config = test_config();
    config.arp_reply = ArpReplyPolicy::BackendMac;
    let lb = LoadBalancer::from_config(&config).unwrap();
    let switch = SimSwitch::new(TEST_DPID);

    lb.on_packet_in(&switch, &arp_packet_in(C1_PORT, C1_MAC, C1_IP, VIRTUAL_IP))
        .unwrap();
    lb.on_packet_in(&switch, &arp_packet_in(C2_PORT, C2_MAC, C2_IP, VIRTUAL_IP))
        .unwrap();

    let outs = switch.packet_outs();
    let c1 = parse_arp_reply(&outs[0].data).unwrap();
    let c2 = parse_arp_reply(&outs[1].data).unwrap();

    // Each client resolves the virtual address to its own backend
    assert_eq!(c1.sender_mac, B1_MAC);
    assert_eq!(c2.sender_mac, B2_MAC);
    assert_eq!(Ipv4Addr::from(c1.sender_ip), VIRTUAL_IP);
    assert_eq!(Ipv4Addr::from(c2.sender_ip), VIRTUAL_IP);
}

#[test]
fn test_arp_assigns_session() {
    let lb = test_load_balancer();
    let switch = SimSwitch::new(TEST_DPID);

    let outcome = lb
        .on_packet_in(&switch, &arp_packet_in(C1_PORT, C1_MAC, C1_IP, VIRTUAL_IP))
        .unwrap();
    assert!(matches!(
        outcome,
        Outcome::ArpReplied { backend, new_session: true } if backend.ip == B1_IP
    ));
    assert_eq!(lb.sessions().len(), 1);
    assert_eq!(switch.flow_count(), 0, "ARP alone must not install rules");
}

#[test]
fn test_arp_repeated_request_is_stable() {
    let lb = test_load_balancer();
    let switch = SimSwitch::new(TEST_DPID);
    let request = arp_packet_in(C1_PORT, C1_MAC, C1_IP, VIRTUAL_IP);

    for _ in 0..3 {
        lb.on_packet_in(&switch, &request).unwrap();
    }

    let outs = switch.packet_outs();
    assert_eq!(outs.len(), 3);
    assert!(outs.iter().all(|o| o == &outs[0]));
    assert_eq!(lb.pool().cursor(), 1, "Only the first request consumes a backend");
}

#[test]
fn test_arp_for_other_address_ignored() {
    let lb = test_load_balancer();
    let switch = SimSwitch::new(TEST_DPID);

    let outcome = lb
        .on_packet_in(
            &switch,
            &arp_packet_in(C1_PORT, C1_MAC, C1_IP, Ipv4Addr::new(10, 0, 0, 254)),
        )
        .unwrap();

    assert_eq!(outcome, Outcome::Ignored);
    assert!(switch.packet_outs().is_empty());
    assert!(lb.sessions().is_empty());
}
