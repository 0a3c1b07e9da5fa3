//! anonbox CLI Application
//!
//! Runs a node on the local network and drops into an interactive prompt.

use anonbox::cli::{self, AppState, ReplCommand};
use anonbox::crypto::{generate_key, EncryptionKey};
use anonbox::network::{
    DiscoveryConfig, InboundEvent, LanDiscovery, MessageReceiver, Node, NodeConfig, TcpHost,
    DEFAULT_CHANNEL_CAPACITY,
};
use anonbox::store::{ChatLog, ChatLogEntry};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "anonbox")]
#[command(author = "Darshan")]
#[command(version = "0.1.0")]
#[command(about = "Anonymous peer-to-peer messaging and file sharing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a node and open the interactive prompt
    Start {
        /// Shared password; messages are sent in the clear without one
        #[arg(short, long, env = "ANONBOX_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Shared key as 64 hex characters (see `keygen`)
        #[arg(short, long, conflicts_with = "password")]
        key: Option<String>,

        /// TCP port to accept streams on (0 picks one)
        #[arg(long, default_value = "0")]
        port: u16,

        /// Directory received files are written to
        #[arg(short, long, default_value = ".")]
        download_dir: PathBuf,

        /// Do not announce ourselves or listen for peers on the LAN
        #[arg(long)]
        no_discovery: bool,

        /// Peer address to connect to on start (repeatable)
        #[arg(short, long)]
        connect: Vec<String>,

        /// Capacity of the inbound event queue
        #[arg(long, default_value_t = DEFAULT_CHANNEL_CAPACITY)]
        channel_capacity: usize,
    },

    /// Print a fresh random key as hex
    Keygen,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen => {
            let key = generate_key();
            println!("{}", key.to_hex());
            eprintln!("fingerprint: {}", key.fingerprint());
            Ok(())
        }

        Commands::Start {
            password,
            key,
            port,
            download_dir,
            no_discovery,
            connect,
            channel_capacity,
        } => {
            let key = match (key, password) {
                (Some(hex_key), _) => Some(EncryptionKey::from_hex(&hex_key)?),
                (None, Some(password)) => EncryptionKey::from_password(&password),
                (None, None) => None,
            };

            let config = NodeConfig {
                port,
                bootstrap_peers: connect,
                download_dir,
                channel_capacity,
                discovery: !no_discovery,
                key,
            };

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_node(config))
        }
    }
}

async fn run_node(config: NodeConfig) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&config.download_dir)?;

    if config.key.is_none() {
        println!("⚠️  No password set: messages will be sent unencrypted");
    }

    let host = TcpHost::bind(config.port).await?;
    let discovery_enabled = config.discovery;
    let (node, events) = Node::new(config, host.clone());
    node.start().await;

    let mut discovery = if discovery_enabled {
        match LanDiscovery::start(
            node.local_id(),
            host.port(),
            DiscoveryConfig::default(),
            node.discovery_callback(),
        )
        .await
        {
            Ok(discovery) => Some(discovery),
            Err(e) => {
                log::warn!("Peer discovery disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    let chat_log = Arc::new(ChatLog::new());
    let consumer = tokio::spawn(consume_events(events, chat_log.clone()));

    let state = AppState::new(node, chat_log);
    cli::commands::cmd_id(&state).await?;
    println!("Type 'help' for commands.");

    run_prompt(&state).await?;

    println!("\n📴 Shutting down node...");
    if let Some(discovery) = discovery.as_mut() {
        discovery.stop();
    }
    state.node.shutdown().await;
    consumer.abort();

    Ok(())
}

/// Read commands from stdin until `exit`, end of input or Ctrl+C
async fn run_prompt(state: &AppState) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            return Ok(());
        };

        let command = match ReplCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(usage) => {
                println!("{}", usage);
                continue;
            }
        };

        match cli::execute(state, command).await {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(e) => println!("❌ {}", e),
        }
    }
}

/// Print inbound events and record them in the history
async fn consume_events(mut events: MessageReceiver, chat_log: Arc<ChatLog>) {
    while let Some(event) = events.recv().await {
        print_event(&event);
        chat_log.add(ChatLogEntry::received(&event)).await;
    }
}

fn print_event(event: &InboundEvent) {
    let who = event.sender.get(..8).unwrap_or(&event.sender);
    if event.is_file {
        println!("\n📥 [{}] {}", who, event.content);
    } else {
        println!("\n💬 [{}] {}", who, event.content);
    }
    print!("> ");
    let _ = std::io::stdout().flush();
}
