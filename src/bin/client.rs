use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use clap_derive::Parser;
use ticketnet::client::multicast::ConsoleNotificationSink;
use ticketnet::client::session::{render, Client, Outcome};
use ticketnet::config::ClientConfig;
use ticketnet::dispatch::collection::TicketCollection;
use ticketnet::dispatch::commands::CommandRegistry;
use ticketnet::messaging::message::AuthCredentials;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, Level};

#[derive(Parser)]
struct Args {
    /// the server's address, e.g. 127.0.0.1:9876
    server_address: String,

    #[clap(long)]
    multicast_port: Option<u16>,

    #[clap(long)]
    timeout_secs: Option<u64>,

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
        (false, false) => Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let server_addr: SocketAddr = args.server_address.parse()?;
    let mut config = ClientConfig::new(server_addr);
    if let Some(port) = args.multicast_port {
        config.multicast_port = port;
    }
    if let Some(secs) = args.timeout_secs {
        config.request_timeout = std::time::Duration::from_secs(secs);
    }

    // the registry is only used for packaging arguments, its collection stays empty
    let commands = Arc::new(CommandRegistry::new(Arc::new(TicketCollection::default())));
    let mut client = Client::connect(config, commands, Arc::new(ConsoleNotificationSink)).await?;
    if !client.is_listening_for_broadcasts() {
        println!("Не удалось подключиться к группе рассылки, сообщения других пользователей не будут показаны.");
    }

    println!("Введите команду (help для списка, login <имя> <пароль>, exit для выхода).");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        let Some(command_name) = words.next() else {
            continue;
        };
        let args = words.map(str::to_string).collect::<Vec<_>>();

        match command_name {
            "exit" => break,
            "login" => match args.as_slice() {
                [username, password] => {
                    client.login(AuthCredentials::new(username, password));
                    println!("Учётные данные сохранены.");
                }
                _ => println!("Использование: login <имя> <пароль>"),
            },
            "logout" => client.logout(),
            _ => match client.execute(command_name, &args).await {
                Ok(Outcome::Response(response)) => println!("{}", render(&response)),
                Ok(Outcome::Sent) => {}
                Err(e) if e.is_retryable() => println!("{} Попробуйте ещё раз.", e),
                Err(e) => {
                    error!("request failed: {}", e);
                    println!("{}", e);
                }
            },
        }
    }

    client.shutdown().await;
    Ok(())
}
