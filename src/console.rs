// Operator console for the tracker process

use crate::core::state::TrackerState;
use crate::utils::time::{age_seconds, current_timestamp};
use std::fmt::Write as _;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};

const USAGE: &str = "Commands: listdata | peer <id> | resource <name> | log | stats | help | quit";

/// What the console should do after evaluating a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleAction {
    Print(String),
    Quit(String),
}

/// Evaluate one console line against the tracker state.
pub fn execute(state: &TrackerState, line: &str) -> ConsoleAction {
    let tokens: Vec<&str> = line.split_whitespace().collect();

    let output = match tokens.as_slice() {
        [] => String::new(),
        ["listdata"] => list_data(state),
        ["peer", id] => peer(state, id),
        ["resource", name] => resource(state, name),
        ["log"] => log(state),
        ["stats"] => stats(state),
        ["help"] => USAGE.to_string(),
        ["quit"] => return ConsoleAction::Quit("Tracker shutting down".to_string()),
        _ => format!("Unknown command. {}", USAGE),
    };

    ConsoleAction::Print(output)
}

fn list_data(state: &TrackerState) -> String {
    let catalog = state.directory.list_all();
    if catalog.is_empty() {
        return "No resources registered".to_string();
    }

    let mut out = String::from("Resources available on the network:");
    for (resource, holders) in catalog {
        let holders: Vec<&str> = holders.iter().map(String::as_str).collect();
        let _ = write!(out, "\n- {} : [{}]", resource, holders.join(", "));
    }
    out
}

fn peer(state: &TrackerState, id: &str) -> String {
    match state.directory.inspect(id) {
        Some(record) => {
            let resources: Vec<&str> = record.resources.iter().map(String::as_str).collect();
            format!(
                "Peer {} @{}:{} - resources: [{}] - last update {}s ago",
                record.id,
                record.ip,
                record.port,
                resources.join(", "),
                age_seconds(record.last_update, current_timestamp())
            )
        }
        None => format!("Peer not found: {}", id),
    }
}

fn resource(state: &TrackerState, name: &str) -> String {
    let holders = state.directory.inspect_holders(name);
    if holders.is_empty() {
        return format!("No peer holds resource: {}", name);
    }
    let holders: Vec<&str> = holders.iter().map(String::as_str).collect();
    format!("Resource {} held by: [{}]", name, holders.join(", "))
}

fn log(state: &TrackerState) -> String {
    let entries = state.download_log.snapshot();
    if entries.is_empty() {
        return "No download attempts recorded".to_string();
    }

    let mut out = String::from("Download attempts:");
    for entry in entries {
        let _ = write!(
            out,
            "\n- {} resource: {} from: {} to: {} success: {}",
            entry.timestamp, entry.resource, entry.from_peer, entry.to_peer, entry.success
        );
    }
    out
}

fn stats(state: &TrackerState) -> String {
    let snapshot = state.snapshot();
    format!(
        "peers: {} resources: {} log entries: {} sessions active: {} commands: {} rejected: {} uptime: {}s",
        snapshot.registered_peers,
        snapshot.indexed_resources,
        snapshot.download_log_entries,
        snapshot.sessions_active,
        snapshot.commands_total,
        snapshot.commands_rejected,
        snapshot.uptime_seconds
    )
}

/// Read console commands from stdin until `quit`, end of input, or shutdown.
/// `quit` flips the shutdown flag.
pub async fn run(state: TrackerState, shutdown: watch::Sender<bool>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut shutdown_rx = shutdown.subscribe();

    info!("Operator console ready");

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown_rx.changed() => return,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Console input closed");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read console input");
                return;
            }
        };

        let (text, quit) = match execute(&state, &line) {
            ConsoleAction::Print(text) => (text, false),
            ConsoleAction::Quit(text) => (text, true),
        };

        if !text.is_empty() {
            let written = stdout.write_all(format!("{}\n", text).as_bytes()).await;
            if let Err(e) = written.and(stdout.flush().await) {
                warn!(error = %e, "Failed to write console output");
            }
        }

        if quit {
            info!("Shutdown requested from console");
            let _ = shutdown.send(true);
            return;
        }
    }
}
