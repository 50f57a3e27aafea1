use bytes::Bytes;
use clap::Parser;
use futures::StreamExt;
use respwire::{Client, Command, ConnectionConfig, Error, Message, SubscriptionListener};
use tracing::{debug, warn};

#[derive(Parser, Debug)]
#[command(name = "respwire", about = "Sends one command, or listens on channels")]
struct Args {
    #[command(flatten)]
    config: ConnectionConfig,

    /// Channels to subscribe to instead of sending a command
    #[arg(short, long, num_args = 1.., conflicts_with = "command")]
    subscribe: Vec<String>,

    /// The command and its arguments
    #[arg(required_unless_present = "subscribe")]
    command: Vec<String>,
}

struct Printer;

impl SubscriptionListener for Printer {
    fn subscribed(&self, channel: &Bytes, count: i64) {
        println!(
            "subscribed to {} ({} active)",
            String::from_utf8_lossy(channel),
            count
        );
    }

    fn received(&self, message: &Message) {
        println!(
            "{}: {}",
            String::from_utf8_lossy(&message.channel),
            String::from_utf8_lossy(&message.payload)
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let _ = tracing_subscriber::fmt()
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let args = Args::parse();
    let mut client = Client::connect(args.config).await?;

    if !args.subscribe.is_empty() {
        let channels: Vec<&str> = args.subscribe.iter().map(String::as_str).collect();
        let mut subscriber = client.subscribe(&channels, Printer).await?;

        {
            let mut errors = subscriber.errors();
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    err = errors.next() => match err {
                        Some(err) if err.is_connection_error() => return Err(err),
                        Some(err) => warn!(%err, "subscription error"),
                        None => break,
                    },
                }
            }
        }

        subscriber.close().await;
        return Ok(());
    }

    let mut parts = args.command.into_iter();
    let command = match parts.next() {
        Some(name) => parts.fold(Command::new(name), |cmd, arg| cmd.raw(arg)),
        None => return Ok(()),
    };

    let frame = client.query(command).await?;
    println!("{}", frame);

    client.close();
    Ok(())
}
