//! mvirt-lb: virtual-IP load balancer controller.
//!
//! `check` validates a configuration. `simulate` drives the control loop
//! against an in-memory switch with a number of synthetic clients and shows
//! the resulting flow table and translations.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use smoltcp::wire::EthernetAddress;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mvirt_lb::packet::{build_arp_request_frame, build_ipv4_frame, decode_frame, format_mac};
use mvirt_lb::{
    LbConfig, LoadBalancer, PacketIn, SimSwitch, SwitchEvent, Verdict, event_channel,
    run_control_loop,
};

/// Datapath id of the simulated switch.
const SIM_DPID: u64 = 0x1;

/// First switch port used by simulated clients.
const SIM_CLIENT_PORT_BASE: u16 = 100;

/// mvirt virtual-IP load balancer
#[derive(Parser, Debug)]
#[command(name = "mvirt-lb", version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a configuration file and print the resolved service
    Check {
        /// Path to the JSON configuration (built-in defaults if omitted)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Run synthetic clients against an in-memory switch
    Simulate {
        /// Path to the JSON configuration (built-in defaults if omitted)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of clients
        #[arg(long, default_value = "2", value_parser = clap::value_parser!(u8).range(1..=250))]
        clients: u8,
    },
}

fn load_config(path: Option<&Path>) -> Result<LbConfig> {
    match path {
        Some(path) => LbConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(LbConfig::default()),
    }
}

fn check(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    let service = config.validate().context("Invalid configuration")?;

    println!(
        "virtual address: {} ({})",
        service.virtual_ip,
        format_mac(&service.virtual_mac)
    );
    println!("session key:     {:?}", service.session_key);
    println!("arp reply:       {:?}", service.arp_reply);
    println!("flow priority:   {}", service.flow_priority);
    println!("backends:");
    for backend in &service.backends {
        println!(
            "  {} {} port {}",
            backend.ip,
            format_mac(&backend.mac),
            backend.port
        );
    }
    Ok(())
}

/// Simulated client `n` (0-based).
fn sim_client(n: u8) -> (Ipv4Addr, EthernetAddress, u16) {
    (
        Ipv4Addr::new(192, 168, 100, n + 1),
        EthernetAddress([0x52, 0x54, 0x00, 0x00, 0x01, n + 1]),
        SIM_CLIENT_PORT_BASE + u16::from(n),
    )
}

async fn simulate(path: Option<&Path>, clients: u8) -> Result<()> {
    let config = load_config(path)?;
    let service = config.validate().context("Invalid configuration")?;
    let lb = Arc::new(LoadBalancer::new(&service)?);

    let (events_tx, events_rx) = event_channel();
    let control_loop = tokio::spawn(run_control_loop(Arc::clone(&lb), events_rx));

    let switch = SimSwitch::new(SIM_DPID);
    let (commands_tx, mut commands_rx) = mpsc::unbounded_channel();
    events_tx
        .send(SwitchEvent::ConnectionUp {
            dpid: SIM_DPID,
            commands: commands_tx,
        })
        .await
        .context("Control loop stopped")?;

    for n in 0..clients {
        let (ip, mac, port) = sim_client(n);
        let arp = build_arp_request_frame(mac, ip, service.virtual_ip);
        let data = build_ipv4_frame(mac, service.virtual_mac, ip, service.virtual_ip, b"sim");

        // The second IP packet models a duplicate first packet racing the
        // rule install.
        for frame in [arp, data.clone(), data] {
            let packet = PacketIn::from_frame(port, frame).context("Failed to decode frame")?;
            events_tx
                .send(SwitchEvent::PacketIn {
                    dpid: SIM_DPID,
                    packet,
                })
                .await
                .context("Control loop stopped")?;
        }
    }
    drop(events_tx);

    let stats = control_loop.await.context("Control loop panicked")?;
    while let Ok(command) = commands_rx.try_recv() {
        switch.apply(command);
    }
    info!(?stats, "Simulation finished");

    println!("sessions:");
    for session in lb.sessions().snapshot() {
        println!(
            "  {} ({}) -> {} port {}",
            session.client_ip,
            format_mac(&session.client_mac),
            session.backend.ip,
            session.backend.port
        );
    }

    println!("flows ({}):", switch.flow_count());
    for rule in switch.flows() {
        println!("  {rule}");
    }
    println!("packet-outs: {}", switch.packet_outs().len());

    println!("translations:");
    for n in 0..clients {
        let (ip, mac, port) = sim_client(n);
        let frame = build_ipv4_frame(mac, service.virtual_mac, ip, service.virtual_ip, b"sim");
        let packet = decode_frame(&frame).context("Failed to decode frame")?;

        let Verdict::Forwarded {
            out_port,
            packet: translated,
        } = switch.receive(port, &packet)
        else {
            bail!("Traffic from {ip} still reaches the controller");
        };
        let Some(header) = translated.ipv4() else {
            bail!("Translated packet from {ip} is not IPv4");
        };
        println!(
            "  {ip} -> {} becomes {} -> {} on port {out_port}",
            service.virtual_ip, header.src, header.dst
        );
    }

    println!(
        "control loop: {} packet-ins, {} ignored, {} errors",
        stats.packet_ins, stats.ignored, stats.errors
    );
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    match args.command {
        Command::Check { config } => check(config.as_deref()),
        Command::Simulate { config, clients } => simulate(config.as_deref(), clients).await,
    }
}
