//! Operator Console
//!
//! Line-oriented commands on stdin: `peers`, `help`, `exit`.

use std::io::{BufRead, Write};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::registry::PeerStore;
use crate::types::{Peer, Timestamp};

const HELP: &str = "Commands:\n  peers  list every registered peer\n  help   show this message\n  exit   shut the server down";

/// A parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Peers,
    Help,
    Exit,
    Empty,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "" => Command::Empty,
            "peers" => Command::Peers,
            "help" => Command::Help,
            "exit" => Command::Exit,
            other => Command::Unknown(other.to_string()),
        }
    }
}

/// What the console should do after a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Print(String),
    Silent,
    Exit,
}

pub async fn execute(command: &Command, store: &dyn PeerStore) -> CommandOutcome {
    match command {
        Command::Peers => match store.all().await {
            Ok(peers) => CommandOutcome::Print(format_peer_table(&peers)),
            Err(e) => CommandOutcome::Print(format!("Failed to read peers: {}", e)),
        },
        Command::Help => CommandOutcome::Print(HELP.to_string()),
        Command::Exit => CommandOutcome::Exit,
        Command::Empty => CommandOutcome::Silent,
        Command::Unknown(_) => CommandOutcome::Print("Unknown command".to_string()),
    }
}

/// Render peers as a fixed-width table
pub fn format_peer_table(peers: &[Peer]) -> String {
    if peers.is_empty() {
        return "No peers registered".to_string();
    }

    let mut output = format!(
        "{:<64}  {:<24}  {:<40}  {:<19}  {}\n",
        "PUBLIC KEY", "HOSTNAME", "ADDRESS", "LAST SEEN", "STATUS"
    );
    for peer in peers {
        output.push_str(&format!(
            "{:<64}  {:<24}  {:<40}  {:<19}  {}\n",
            hex::encode(peer.public_key),
            peer.hostname.as_deref().unwrap_or("-"),
            peer.socket_addr(),
            format_timestamp(peer.last_seen_at),
            if peer.is_online { "online" } else { "offline" },
        ));
    }
    output.push_str(&format!("{} peer(s)", peers.len()));
    output
}

fn format_timestamp(ts: Timestamp) -> String {
    i64::try_from(ts)
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn print_prompt() {
    print!("[{}] > ", chrono::Local::now().format("%H:%M:%S"));
    let _ = std::io::stdout().flush();
}

/// Read stdin on a plain thread; a blocked read must not hold up runtime shutdown
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Console input error: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// Run the console until `exit` is typed or shutdown is signalled.
///
/// Returns `true` when the operator asked to exit.
pub async fn run_console(
    store: Arc<dyn PeerStore>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<bool> {
    let mut lines = spawn_stdin_reader();
    print_prompt();

    loop {
        let line = tokio::select! {
            line = lines.recv() => line,
            _ = shutdown.changed() => return Ok(false),
        };

        let Some(line) = line else {
            debug!("Console input closed");
            let _ = shutdown.changed().await;
            return Ok(false);
        };

        match execute(&Command::parse(&line), store.as_ref()).await {
            CommandOutcome::Print(text) => println!("{}", text),
            CommandOutcome::Silent => {}
            CommandOutcome::Exit => return Ok(true),
        }
        print_prompt();
    }
}
