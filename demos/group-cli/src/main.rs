//! A terminal front end for the group manager.
//!
//! ```text
//! group-cli host [config.toml]
//! group-cli peer [config.toml]
//! ```
//!
//! Lines typed on stdin are treated as game output (score lines and
//! prompts) unless they start with a command:
//!
//! ```text
//! /tell <text>     group tell
//! /kick <name>     host only
//! /room <id>       set the current room
//! /name <name>     rename the local character
//! /who             list the group
//! /quit
//! ```

use std::sync::Arc;
use std::time::Duration;

use mudgroup::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn load_config(path: Option<&str>) -> Result<GroupConfig, GroupError> {
    match path {
        Some(path) => Ok(GroupConfig::from_toml_str(&std::fs::read_to_string(path)?)?),
        None => Ok(GroupConfig::default()),
    }
}

fn parse_mode(arg: Option<&str>) -> Option<GroupMode> {
    match arg? {
        "host" => Some(GroupMode::Host),
        "peer" => Some(GroupMode::Peer),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_event(manager: &GroupManager, event: &GroupEvent) {
    match event {
        GroupEvent::Log(line) => println!("[group] {line}"),
        GroupEvent::Warning(text) => println!("[group] !! {text}"),
        GroupEvent::GroupTell { from, text } => println!("{}", manager.format_group_tell(from, text)),
        GroupEvent::Kicked { reason } => println!("[group] kicked: {reason}"),
        GroupEvent::RosterChanged(change) => tracing::debug!(?change, "roster changed"),
        other => tracing::info!(event = ?other, "group event"),
    }
}

fn print_roster(manager: &GroupManager) {
    for record in manager.roster().select_all().iter() {
        println!(
            "  {:<16} {:>4}/{:<4} hp {:>4}/{:<4} mana {:>4}/{:<4} mv  {:<12} room {}",
            record.name,
            record.hp,
            record.maxhp,
            record.mana,
            record.maxmana,
            record.moves,
            record.maxmoves,
            record.position.as_str(),
            record.room.0,
        );
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Returns `false` when the user asked to quit.
fn handle_line(manager: &mut GroupManager, line: &str) -> bool {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    match command {
        "/quit" => return false,
        "/tell" => {
            if !manager.send_group_tell(rest) {
                println!("[group] not connected");
            }
        }
        "/kick" => {
            manager.kick(rest);
        }
        "/room" => match rest.parse() {
            Ok(id) => {
                manager.set_room(RoomId(id));
            }
            Err(_) => println!("[group] usage: /room <id>"),
        },
        "/name" => {
            manager.config().update(|c| c.char_name = rest.to_string());
            manager.update_self();
        }
        "/who" => print_roster(manager),
        _ => {
            if !manager.parse_score(line) {
                manager.parse_prompt(line);
            }
        }
    }
    true
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mudgroup::log=off".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(mode) = parse_mode(args.get(1).map(String::as_str)) else {
        eprintln!("usage: group-cli <host|peer> [config.toml]");
        std::process::exit(2);
    };
    let config = load_config(args.get(2).map(String::as_str))?;

    let (mut manager, mut events) = GroupManager::new(config, Arc::new(MemoryBackend::new()))?;
    println!("[group] your secret: {}", manager.trust().secret());
    manager.start(mode).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut expiry = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                print_event(&manager, &event);
                if event == GroupEvent::NetworkDown {
                    break;
                }
            }
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !handle_line(&mut manager, line.trim_end()) {
                        break;
                    }
                }
                None => break,
            },
            _ = expiry.tick() => {
                for affect in manager.expire_affects() {
                    tracing::debug!(affect = affect.as_str(), "affect expired");
                }
            }
        }
    }

    manager.stop().await;
    Ok(())
}
