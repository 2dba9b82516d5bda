mod config;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use eventchat_core::{EventId, MessageStore, UserId};
use eventchat_gateway::{start_server, GatewayState};
use eventchat_logging::{init_logger, LoggerConfig};
use eventchat_store::SqliteChatStore;

use config::Config;

#[derive(Parser)]
#[command(name = "eventchat")]
#[command(about = "Event chat relay: one shared, persisted chat per event over TCP")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the chat relay
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
        /// Address to bind to
        #[arg(long)]
        bind: Option<String>,
        /// SQLite database path
        #[arg(long)]
        db: Option<String>,
    },
    /// Register (or rename) a user allowed to join chats
    AddUser {
        #[arg(long)]
        id: i64,
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Register (or rename) an event with its own chat
    AddEvent {
        #[arg(long)]
        id: i64,
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Print the ordered chat history of an event
    History {
        #[arg(long)]
        event: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, bind, db } => {
            let config = Config {
                port: port.unwrap_or(config.port),
                bind_address: bind.unwrap_or(config.bind_address),
                db_path: db.unwrap_or(config.db_path),
                ..config
            };
            let _log_guard = init_logger(
                &LoggerConfig::stdout(&config.log_level).with_log_dir(&config.log_dir),
            )?;
            run_server(config).await?;
        }
        Commands::AddUser { id, name } => {
            let _log_guard = init_logger(&LoggerConfig::stderr(&config.log_level))?;
            let store = SqliteChatStore::open(&config.db_path)?;
            store.add_user(UserId(id), &name).await?;
            println!("User {id} registered");
        }
        Commands::AddEvent { id, name } => {
            let _log_guard = init_logger(&LoggerConfig::stderr(&config.log_level))?;
            let store = SqliteChatStore::open(&config.db_path)?;
            store.add_event(EventId(id), &name).await?;
            println!("Event {id} registered");
        }
        Commands::History { event } => {
            let _log_guard = init_logger(&LoggerConfig::stderr(&config.log_level))?;
            let store = SqliteChatStore::open(&config.db_path)?;
            let history = store.fetch_history(EventId(event)).await?;
            println!("{}", serde_json::to_string_pretty(&history)?);
        }
    }

    Ok(())
}

async fn run_server(config: Config) -> Result<()> {
    let addr = config.socket_addr()?;
    info!(
        addr = %addr,
        db = %config.db_path,
        "Starting event chat relay"
    );

    let store = Arc::new(SqliteChatStore::open(&config.db_path)?);
    info!(messages = store.count_messages().await?, "Chat database ready");
    let state = GatewayState::new(store.clone(), store, config.gateway());

    start_server(addr, state, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C; running until killed");
        std::future::pending::<()>().await;
    }
}
