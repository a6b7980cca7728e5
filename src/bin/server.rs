use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use clap_derive::Parser;
use ticketnet::config::ServerConfig;
use ticketnet::dispatch::collection::TicketCollection;
use ticketnet::dispatch::commands::CommandRegistry;
use ticketnet::dispatch::persistence::FileSnapshot;
use ticketnet::server::ingest::spawn_stdin_reader;
use ticketnet::server::udp_server::UdpServer;
use tracing::{info, Level};

#[derive(Parser)]
struct Args {
    /// address to receive requests on, e.g. 0.0.0.0:9876
    address: String,

    #[clap(long, default_value = "tickets.bin")]
    snapshot: PathBuf,

    #[clap(long)]
    multicast_port: Option<u16>,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let self_addr: SocketAddr = args.address.parse()?;
    let mut config = ServerConfig::new(self_addr);
    if let Some(port) = args.multicast_port {
        config.multicast_port = port;
    }

    let tickets = FileSnapshot::load(&args.snapshot)?;
    info!(count = tickets.len(), snapshot = ?args.snapshot, "loaded collection");
    let collection = Arc::new(TicketCollection::from_tickets(tickets));

    let registry = CommandRegistry::new(collection.clone());
    let persistence = FileSnapshot::new(args.snapshot, collection);

    let server = UdpServer::new(config, Arc::new(registry), Arc::new(persistence))?;
    let handle = server.start().await?;

    println!("Сервер запущен на {}. Команды: save, shutdown.", handle.local_addr());
    spawn_stdin_reader(handle.control());

    handle.join().await
}
