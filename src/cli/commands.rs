//! Interactive commands
//!
//! Parses the lines typed at the prompt and runs them against a running node.

use crate::network::{Node, PeerId};
use crate::store::{ChatLog, ChatLogEntry};
use std::path::PathBuf;
use std::sync::Arc;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Application state
pub struct AppState {
    pub node: Node,
    pub chat_log: Arc<ChatLog>,
}

impl AppState {
    pub fn new(node: Node, chat_log: Arc<ChatLog>) -> Self {
        Self { node, chat_log }
    }
}

/// A parsed prompt line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Peers,
    Chat { peer: String, text: String },
    Share { peer: String, path: PathBuf },
    Broadcast { text: String },
    Connect { addr: String },
    Disconnect { peer: String },
    History { peer: Option<String> },
    Clear,
    Id,
    Help,
    Exit,
}

impl ReplCommand {
    /// Parse one line. Returns `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        let command = match verb {
            "peers" => Self::Peers,
            "chat" | "msg" => {
                let (peer, text) = split_target(rest).ok_or("usage: chat <peer> <message>")?;
                Self::Chat {
                    peer,
                    text: text.to_string(),
                }
            }
            "share" | "send" => {
                let (peer, path) = split_target(rest).ok_or("usage: share <peer> <path>")?;
                Self::Share {
                    peer,
                    path: PathBuf::from(path),
                }
            }
            "broadcast" => {
                if rest.is_empty() {
                    return Err("usage: broadcast <message>".to_string());
                }
                Self::Broadcast {
                    text: rest.to_string(),
                }
            }
            "connect" => {
                if rest.is_empty() {
                    return Err("usage: connect <address>".to_string());
                }
                Self::Connect {
                    addr: rest.to_string(),
                }
            }
            "disconnect" => {
                if rest.is_empty() {
                    return Err("usage: disconnect <peer>".to_string());
                }
                Self::Disconnect {
                    peer: rest.to_string(),
                }
            }
            "history" => Self::History {
                peer: (!rest.is_empty()).then(|| rest.to_string()),
            },
            "clear" => Self::Clear,
            "id" | "status" => Self::Id,
            "help" | "?" => Self::Help,
            "exit" | "quit" => Self::Exit,
            other => return Err(format!("unknown command '{}', try 'help'", other)),
        };

        Ok(Some(command))
    }
}

/// Split `<target> <remainder>`; both parts must be non-empty
fn split_target(rest: &str) -> Option<(String, &str)> {
    let (target, remainder) = rest.split_once(char::is_whitespace)?;
    let remainder = remainder.trim();
    if remainder.is_empty() {
        return None;
    }
    Some((target.to_string(), remainder))
}

/// Resolve a full peer ID, or a prefix matching exactly one known peer
pub async fn resolve_peer(state: &AppState, token: &str) -> CliResult<PeerId> {
    if let Ok(id) = token.parse::<PeerId>() {
        return Ok(id);
    }

    let matches: Vec<PeerId> = state
        .node
        .peers()
        .await
        .into_iter()
        .filter(|id| id.to_string().starts_with(token))
        .collect();

    match matches.as_slice() {
        [id] => Ok(*id),
        [] => Err(format!("no known peer matches '{}'", token).into()),
        _ => Err(format!("'{}' matches {} peers, be more specific", token, matches.len()).into()),
    }
}

/// Run one command. Returns `false` when the session should end.
pub async fn execute(state: &AppState, command: ReplCommand) -> CliResult<bool> {
    match command {
        ReplCommand::Peers => cmd_peers(state).await?,
        ReplCommand::Chat { peer, text } => cmd_chat(state, &peer, &text).await?,
        ReplCommand::Share { peer, path } => cmd_share(state, &peer, path).await?,
        ReplCommand::Broadcast { text } => cmd_broadcast(state, &text).await?,
        ReplCommand::Connect { addr } => cmd_connect(state, &addr).await?,
        ReplCommand::Disconnect { peer } => cmd_disconnect(state, &peer).await?,
        ReplCommand::History { peer } => cmd_history(state, peer.as_deref()).await?,
        ReplCommand::Clear => cmd_clear(state).await?,
        ReplCommand::Id => cmd_id(state).await?,
        ReplCommand::Help => cmd_help(),
        ReplCommand::Exit => return Ok(false),
    }
    Ok(true)
}

/// List known peers
pub async fn cmd_peers(state: &AppState) -> CliResult<()> {
    let peers = state.node.peers().await;

    if peers.is_empty() {
        println!("👥 No peers yet. Waiting for discovery, or use 'connect <address>'");
        return Ok(());
    }

    println!("👥 Peers ({}):", peers.len());
    for id in peers {
        println!("   └─ {}", id);
    }
    Ok(())
}

/// Send a text message
pub async fn cmd_chat(state: &AppState, peer: &str, text: &str) -> CliResult<()> {
    let id = resolve_peer(state, peer).await?;
    state.node.send_message(&id, text).await?;
    state
        .chat_log
        .add(ChatLogEntry::mine(id.to_string(), text))
        .await;
    println!("📤 Sent to {}", id.short());
    Ok(())
}

/// Send a file
pub async fn cmd_share(state: &AppState, peer: &str, path: PathBuf) -> CliResult<()> {
    let id = resolve_peer(state, peer).await?;
    println!("📁 Sending {:?} to {}...", path, id.short());

    let size = state.node.send_file(&id, &path).await?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut entry = ChatLogEntry::mine(id.to_string(), format!("Sent file: {}", name));
    entry.is_file = true;
    state.chat_log.add(entry).await;

    println!("✅ Sent {} bytes", size);
    Ok(())
}

/// Send a text message to every known peer
pub async fn cmd_broadcast(state: &AppState, text: &str) -> CliResult<()> {
    let results = state.node.broadcast(text).await;
    if results.is_empty() {
        println!("👥 No peers to broadcast to");
        return Ok(());
    }

    let mut delivered = 0;
    for (id, result) in &results {
        match result {
            Ok(()) => {
                delivered += 1;
                state
                    .chat_log
                    .add(ChatLogEntry::mine(id.to_string(), text))
                    .await;
            }
            Err(e) => println!("   ❌ {}: {}", id.short(), e),
        }
    }

    println!("📢 Broadcast delivered to {}/{} peers", delivered, results.len());
    Ok(())
}

/// Connect to a peer by address
pub async fn cmd_connect(state: &AppState, addr: &str) -> CliResult<()> {
    let id = state.node.connect(addr).await?;
    println!("🔗 Connected to {}", id);
    Ok(())
}

/// Forget a peer
pub async fn cmd_disconnect(state: &AppState, peer: &str) -> CliResult<()> {
    let id = resolve_peer(state, peer).await?;
    if state.node.disconnect(&id).await {
        println!("👋 Removed {}", id);
    } else {
        println!("⚠️  {} was not a known peer", id);
    }
    Ok(())
}

/// Show conversation history
pub async fn cmd_history(state: &AppState, peer: Option<&str>) -> CliResult<()> {
    let entries = match peer {
        Some(token) => {
            let id = resolve_peer(state, token).await?;
            state.chat_log.with_peer(&id.to_string()).await
        }
        None => state.chat_log.messages().await,
    };

    if entries.is_empty() {
        println!("📜 No messages yet");
        return Ok(());
    }

    println!("📜 History ({} messages):", entries.len());
    for entry in entries {
        let direction = if entry.is_mine { "→" } else { "←" };
        let who = entry.sender.get(..8).unwrap_or(&entry.sender);
        println!(
            "   {} {} {} | {}",
            entry.timestamp.format("%H:%M:%S"),
            direction,
            who,
            entry.content
        );
    }
    Ok(())
}

/// Clear conversation history
pub async fn cmd_clear(state: &AppState) -> CliResult<()> {
    state.chat_log.clear().await;
    println!("🧹 History cleared");
    Ok(())
}

/// Show our identity and addresses
pub async fn cmd_id(state: &AppState) -> CliResult<()> {
    let status = state.node.status().await;

    println!("🆔 Node");
    println!("   ├─ Peer ID: {}", status.peer_id);
    match &status.key_fingerprint {
        Some(fp) => println!("   ├─ Encryption: on (key {})", fp),
        None => println!("   ├─ Encryption: OFF"),
    }
    println!("   ├─ Peers: {}", status.peers);
    println!("   ├─ Downloads: {:?}", status.download_dir);
    println!("   └─ Addresses:");
    for addr in status.addresses {
        println!("      {}", addr);
    }
    Ok(())
}

/// Print available commands
pub fn cmd_help() {
    println!("Commands:");
    println!("   peers                    List known peers");
    println!("   chat <peer> <message>    Send a message");
    println!("   share <peer> <path>      Send a file");
    println!("   broadcast <message>      Send a message to every peer");
    println!("   connect <address>        Connect to /ip4/<ip>/tcp/<port>/p2p/<id>");
    println!("   disconnect <peer>        Forget a peer");
    println!("   history [peer]           Show messages");
    println!("   clear                    Clear history");
    println!("   id                       Show our peer ID and addresses");
    println!("   exit                     Quit");
    println!("Peers can be given as a unique prefix of their ID.");
}
