//! Estima - realtime planning poker
//!
//! `estima serve` hosts rooms; `estima create` and `estima join` open an
//! interactive session against a server.

use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use estima_core::{Database, DeckConfig, UserRole, VotingSystem};
use estima_net::{Client, Server};
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

mod config;
mod console;
mod network;
mod session;

use config::Config;
use network::{CommandSender, ConnectionManager};
use session::SessionContext;

#[derive(Parser)]
#[command(name = "estima", version, about = "Realtime planning poker")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Host rooms
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Create a room and moderate it
    Create {
        /// Your display name
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        room_name: Option<String>,
        /// fibonacci, modified-fibonacci, t-shirts or powers-of-2
        #[arg(long, default_value = "fibonacci")]
        deck: String,
        /// Comma-separated custom card labels
        #[arg(long)]
        cards: Option<String>,
        /// Server address, overrides the config
        #[arg(long)]
        server: Option<String>,
    },
    /// Join a room (defaults to the last one)
    Join {
        #[arg(long)]
        room: Option<Uuid>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        server: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log.level))
        .context("invalid log level")?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Command::Serve { port } => serve(&config, port).await,
        Command::Create {
            name,
            room_name,
            deck,
            cards,
            server,
        } => {
            let db = open_database(&config)?;
            let name = resolve_name(&db, name)?;
            let manager = manager(&config, server);

            let (client, room) = manager
                .create_room(&name, room_name.clone())
                .await
                .with_context(|| format!("failed to create a room on {}", manager.server()))?;
            db.preferences()
                .set_last_room(&name, UserRole::Moderator, room.id)?;
            println!("created {} - share this id: {}", room.title(), room.id);

            let deck = DeckConfig {
                room_name,
                voting_system: VotingSystem::from_name(&deck),
                custom_cards: cards,
            };
            let session =
                SessionContext::new(room.id, name, UserRole::Moderator, db).with_deck(deck);
            run_session(&manager, session, Some(client)).await
        }
        Command::Join { room, name, server } => {
            let db = open_database(&config)?;
            let prefs = db.preferences().load()?;
            let room_id = room
                .or(prefs.last_room)
                .context("no room given and no previous room to rejoin")?;
            let name = resolve_name(&db, name)?;

            // Rejoining the room we moderated keeps the moderator role
            let role = match (prefs.last_room, prefs.user_role) {
                (Some(last), Some(UserRole::Moderator)) if last == room_id => UserRole::Moderator,
                _ => UserRole::Participant,
            };
            db.preferences().set_last_room(&name, role, room_id)?;

            let manager = manager(&config, server);
            let session = SessionContext::new(room_id, name, role, db);
            run_session(&manager, session, None).await
        }
    }
}

async fn serve(config: &Config, port: Option<u16>) -> anyhow::Result<()> {
    let server = Server::start(config.server_options(port)?).await?;
    println!("serving rooms on {}", server.addr());

    tokio::signal::ctrl_c().await?;
    server.shutdown();
    tracing::info!(rooms = server.room_count().await, "Stopped");
    Ok(())
}

fn open_database(config: &Config) -> anyhow::Result<Database> {
    let path = config.database_path()?;
    let db = Database::open(&path).with_context(|| format!("failed to open {}", path.display()))?;

    let cutoff = Utc::now() - chrono::Duration::days(i64::from(config.storage.retain_days));
    db.prune_before(cutoff)?;
    Ok(db)
}

fn manager(config: &Config, server: Option<String>) -> ConnectionManager {
    match server {
        Some(server) => ConnectionManager::new(server, config.reconnect_delays()),
        None => ConnectionManager::from_config(config),
    }
}

/// Explicit name, else the remembered one
fn resolve_name(db: &Database, name: Option<String>) -> anyhow::Result<String> {
    let name = match name {
        Some(name) => name,
        None => db
            .preferences()
            .load()?
            .user_name
            .context("--name is required the first time")?,
    };

    let name = name.trim().to_string();
    anyhow::ensure!(!name.is_empty(), "name must not be empty");
    Ok(name)
}

async fn run_session(
    manager: &ConnectionManager,
    mut session: SessionContext<Database>,
    initial: Option<Client>,
) -> anyhow::Result<()> {
    tracing::info!(
        room_id = %session.room_id(),
        me = session.me(),
        role = session.role().as_str(),
        "Joining room"
    );

    let (tx, rx) = mpsc::channel(16);
    let (view_tx, view_rx) = watch::channel(session.view());
    let console = tokio::spawn(console::run(
        CommandSender::new(tx),
        view_rx,
        session.subscribe(),
    ));

    let reason = manager.run(&mut session, rx, view_tx, initial).await;
    console.abort();
    println!("session closed: {reason}");

    // Nothing left to rejoin
    session.cache().preferences().clear_last_room()?;
    Ok(())
}
