use dormant_core::ServerState;

use crate::freeze::FreezeHook;
use crate::status::ServerStats;

const SPAWN_AREA: &str = "Preparing spawn area: ";
// Not just "Done": plugins and mods log task names containing that word.
const DONE: &str = ": Done (";
const PLAYER_JOIN: &str = "UUID of player";
const PLAYER_LEAVE: &str = "lost connection";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Ignored,
    LoadProgress(String),
    // A line can carry both the last spawn progress and the done marker.
    Online { progress: Option<String> },
    ChatMessage,
    PlayerJoined,
    PlayerLeft,
    Stopping,
    UnexpectedFormat,
}

pub fn classify(state: ServerState, line: &str) -> (ServerState, LineEvent) {
    match state {
        ServerState::Starting => classify_starting(line),
        ServerState::Online => classify_online(line),
        ServerState::Stopping | ServerState::Offline => (state, LineEvent::Ignored),
    }
}

fn classify_starting(line: &str) -> (ServerState, LineEvent) {
    // Paper and modded servers don't print "[Server thread/INFO]", so "INFO"
    // and the marker are matched separately.
    if !line.contains("INFO") {
        return (ServerState::Starting, LineEvent::Ignored);
    }

    let progress = line
        .split(SPAWN_AREA)
        .nth(1)
        .and_then(|rest| rest.split(DONE).next())
        .map(|rest| rest.lines().next().unwrap_or_default().trim_end().to_string());

    if line.contains(DONE) {
        return (ServerState::Online, LineEvent::Online { progress });
    }

    match progress {
        Some(progress) => (ServerState::Starting, LineEvent::LoadProgress(progress)),
        None => (ServerState::Starting, LineEvent::Ignored),
    }
}

fn classify_online(line: &str) -> (ServerState, LineEvent) {
    // [14:09:46] [Server thread/INFO]: <player> hello
    // ^-----------header------------^  ^--content--^
    let Some((header, content)) = line.split_once(": ") else {
        return (ServerState::Online, LineEvent::UnexpectedFormat);
    };

    if !header.contains("INFO") {
        return (ServerState::Online, LineEvent::Ignored);
    }

    // Chat is checked first: players can type anything, including the
    // markers below.
    if content.starts_with('<') || content.starts_with('[') {
        return (ServerState::Online, LineEvent::ChatMessage);
    }
    if content.contains(PLAYER_JOIN) {
        return (ServerState::Online, LineEvent::PlayerJoined);
    }
    if content.contains(PLAYER_LEAVE) {
        return (ServerState::Online, LineEvent::PlayerLeft);
    }
    if content.contains("Stopping") && content.contains("server") {
        return (ServerState::Stopping, LineEvent::Stopping);
    }

    (ServerState::Online, LineEvent::Ignored)
}

pub fn apply(stats: &ServerStats, freeze: &dyn FreezeHook, line: &str) -> LineEvent {
    let (next, event) = classify(stats.state(), line);

    match &event {
        LineEvent::Ignored => {}
        LineEvent::LoadProgress(progress) => {
            stats.set_load_progress(progress.clone());
            tracing::debug!(%progress, "server load progress");
        }
        LineEvent::Online { progress } => {
            if let Some(progress) = progress {
                stats.set_load_progress(progress.clone());
            }
            stats.set_state(next);
            tracing::info!("game server is online");
            freeze.schedule();
        }
        LineEvent::ChatMessage => {
            tracing::debug!("chat message");
        }
        LineEvent::PlayerJoined => {
            let players = stats.add_players(1);
            tracing::info!(players, "player joined");
        }
        LineEvent::PlayerLeft => {
            let players = stats.add_players(-1);
            tracing::info!(players, "player left");
            freeze.schedule();
        }
        LineEvent::Stopping => {
            stats.set_state(next);
            tracing::info!("game server is stopping");
        }
        LineEvent::UnexpectedFormat => {
            tracing::warn!(%line, "line does not match the expected log format");
        }
    }

    event
}
