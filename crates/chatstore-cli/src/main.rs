//! Chat store operator CLI.
//!
//! # Usage
//!
//! ```bash
//! # Post a room message to a durable store
//! chatstore --db chat.redb send --room lobby --user alice "hello"
//!
//! # Leave a direct message for an offline user
//! chatstore --db chat.redb send --room lobby --user alice --to bob "call me"
//!
//! # Inspect and acknowledge
//! chatstore --db chat.redb history --room lobby --limit 20
//! chatstore --db chat.redb unread --user bob
//! chatstore --db chat.redb clear-unread --user bob
//! chatstore --db chat.redb rooms
//! ```

use std::{
    io::{self, Write},
    path::PathBuf,
    time::Duration,
};

use chatstore_core::{
    BackendConfig, ChatStore, Context, Delivery, HubStore, Message, Storage, StoreConfig,
    SystemEnv,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Chat message store
#[derive(Parser, Debug)]
#[command(name = "chatstore")]
#[command(about = "Inspect and operate a chat message store")]
#[command(version)]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long, env = "CHATSTORE_CONFIG")]
    config: Option<PathBuf>,

    /// Use a redb database at this path, overriding the configured backend
    #[arg(long)]
    db: Option<PathBuf>,

    /// Override the configured per-room retention
    #[arg(long)]
    retention: Option<usize>,

    /// Give up on an operation after this many milliseconds
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Save and publish a message
    Send {
        /// Room to post in
        #[arg(short, long)]
        room: String,
        /// Sending user
        #[arg(short, long)]
        user: String,
        /// Send as a direct message to this user
        #[arg(long)]
        to: Option<String>,
        /// Message body
        content: String,
    },

    /// Show a room's recent messages, newest first
    History {
        /// Room to read
        #[arg(short, long)]
        room: String,
        /// Maximum messages to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show a user's unread messages, oldest first
    Unread {
        /// User to read
        #[arg(short, long)]
        user: String,
    },

    /// Remove all of a user's unread messages
    ClearUnread {
        /// User to clear
        #[arg(short, long)]
        user: String,
    },

    /// List rooms with stored history
    Rooms,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(io::stderr)).with(filter).init();

    let mut config = match &args.config {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };
    if let Some(path) = args.db {
        config.backend = BackendConfig::Redb { path };
    }
    if let Some(retention) = args.retention {
        config.retention = retention;
    }
    config.validate()?;

    if config.backend == BackendConfig::Memory {
        tracing::warn!("Using in-memory backend - nothing persists after this command");
    }

    let store = HubStore::from_config(config)?;
    let ctx = Context::with_timeout(Duration::from_millis(args.timeout_ms));
    let mut out = io::stdout().lock();

    match args.command {
        Command::Send { room, user, to, content } => {
            let mut message = Message::new(&SystemEnv::new(), room, user, content);
            if let Some(target) = to {
                message = message.with_target(target);
            }

            match store.route_message(&ctx, &message).await? {
                Delivery::Room { seq, fan_out } => writeln!(
                    out,
                    "saved {} to {} at seq {seq} ({} live subscribers)",
                    message.id, message.room_id, fan_out.delivered
                )?,
                Delivery::Direct { stored_unread: true, .. } => {
                    writeln!(out, "stored {} as unread", message.id)?;
                },
                Delivery::Direct { fan_out, .. } => {
                    writeln!(out, "delivered {} live ({})", message.id, fan_out.delivered)?;
                },
            }
        },

        Command::History { room, limit } => {
            let limit = limit.unwrap_or(store.config().history_limit);
            for message in store.get_messages(&ctx, &room, limit).await? {
                print_message(&mut out, &message)?;
            }
        },

        Command::Unread { user } => {
            for message in store.get_unread_messages(&ctx, &user).await? {
                print_message(&mut out, &message)?;
            }
        },

        Command::ClearUnread { user } => {
            store.clear_unread(&ctx, &user).await?;
            writeln!(out, "cleared unread for {user}")?;
        },

        Command::Rooms => {
            let mut rooms = store.storage().list_rooms()?;
            rooms.sort();
            for room in rooms {
                let count = store.storage().message_count(&room)?;
                writeln!(out, "{room}\t{count}")?;
            }
        },
    }

    Ok(())
}

fn print_message(out: &mut impl Write, message: &Message) -> io::Result<()> {
    match &message.target {
        Some(target) => writeln!(
            out,
            "[{}] {} -> {} ({}): {}",
            message.sent_at_ms, message.user, target, message.room_id, message.content
        ),
        None => writeln!(
            out,
            "[{}] {} ({}): {}",
            message.sent_at_ms, message.user, message.room_id, message.content
        ),
    }
}
