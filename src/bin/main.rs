use std::error::Error;
use clap::Parser;
use log::info;
use chatserver::{ChatServer, Config};

#[derive(Parser)]
#[command(name = "chatserver", version, about = "In-memory chat room over plain HTTP")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value_t = chatserver::config::DEFAULT_PORT)]
    port: u16,
}

fn main() -> Result<(), Box<dyn Error>> {
    pretty_env_logger::init_timed();

    let cli = Cli::parse();
    let config = Config::with_port(cli.port);
    info!("starting chat server on port {}", config.port);

    ChatServer::bind(&config)?.run();
    Ok(())
}
