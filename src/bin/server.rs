use std::error::Error;
use std::net;

use clap::Parser;

/// Accepts one MIC-TCP connection and prints every message it receives.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Local address to bind.
    #[arg(short, long, default_value = "127.0.0.1:8888")]
    bind: net::SocketAddr,

    /// Lowest reliability percentage to agree to.
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=100))]
    reliability_floor: u8,

    /// Percentage of outbound datagrams to drop.
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=100))]
    loss_rate: u8,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args = Args::parse();

    let config = mictcp::Config {
        reliability_floor: args.reliability_floor,
        ..Default::default()
    };

    let socket = mictcp::UdpTransport::bind(args.bind)?;
    let transport = mictcp::LossyTransport::new(socket, args.loss_rate);
    let stack = mictcp::Stack::with_transport(transport, config);

    log::info!("listening on {}", stack.local_addr());

    let handle = stack.open(mictcp::Mode::Server)?;

    let peer_addr = loop {
        match stack.accept(handle) {
            Ok(peer_addr) => break peer_addr,
            Err(mictcp::Error::HandshakeTimeout) => continue,
            Err(err) => return Err(err.into()),
        }
    };

    let info = stack.info(handle)?;
    println!(
        "connected to {} ({}% reliability)",
        peer_addr,
        info.reliability.unwrap_or(100)
    );

    let mut buf = [0; mictcp::frame::serial::PAYLOAD_SIZE_MAX];

    loop {
        let len = stack.recv(handle, &mut buf)?;
        println!("{}", String::from_utf8_lossy(&buf[..len]));
    }
}
