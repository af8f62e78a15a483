use std::error::Error;
use std::io::{self, BufRead};
use std::net;

use clap::Parser;

/// Connects to a MIC-TCP server and sends each line of standard input as one message.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Server address.
    #[arg(short, long, default_value = "127.0.0.1:8888")]
    server: net::SocketAddr,

    /// Local address to bind.
    #[arg(short, long, default_value = "127.0.0.1:0")]
    bind: net::SocketAddr,

    /// Reliability percentage to propose.
    #[arg(short, long, default_value_t = 100, value_parser = clap::value_parser!(u8).range(0..=100))]
    reliability: u8,

    /// Percentage of outbound datagrams to drop.
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=100))]
    loss_rate: u8,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args = Args::parse();

    let config = mictcp::Config {
        reliability: args.reliability,
        ..Default::default()
    };

    let socket = mictcp::UdpTransport::bind(args.bind)?;
    let transport = mictcp::LossyTransport::new(socket, args.loss_rate);
    let stack = mictcp::Stack::with_transport(transport, config);

    let handle = stack.open(mictcp::Mode::Client)?;
    stack.connect(handle, args.server)?;

    log::info!("connected to {} from {}", args.server, stack.local_addr());

    for line in io::stdin().lock().lines() {
        let line = line?;
        stack.send(handle, line.as_bytes())?;
    }

    let info = stack.info(handle)?;
    log::info!(
        "done, {} of the last {} messages written off",
        info.loss_distance,
        stack.config().loss_window
    );

    stack.close(handle)?;

    Ok(())
}
