use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Offline,
    Starting,
    Online,
    Stopping,
}

impl ServerState {
    pub fn as_u8(self) -> u8 {
        match self {
            ServerState::Offline => 0,
            ServerState::Starting => 1,
            ServerState::Online => 2,
            ServerState::Stopping => 3,
        }
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => ServerState::Starting,
            2 => ServerState::Online,
            3 => ServerState::Stopping,
            _ => ServerState::Offline,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServerState::Offline => "offline",
            ServerState::Starting => "starting",
            ServerState::Online => "online",
            ServerState::Stopping => "stopping",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StatusSnapshot {
    pub state: ServerState,
    pub load_progress: String,
    pub player_count: i32,
    pub suspended: bool,
    pub active: bool,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GameRawMessage {
    pub text: String,
    pub color: String,
    pub bold: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_u8() {
        for s in [
            ServerState::Offline,
            ServerState::Starting,
            ServerState::Online,
            ServerState::Stopping,
        ] {
            assert_eq!(ServerState::from_u8(s.as_u8()), s);
        }
        assert_eq!(ServerState::from_u8(200), ServerState::Offline);
    }

    #[test]
    fn raw_message_serializes_in_field_order() {
        let msg = GameRawMessage {
            text: "hi".to_string(),
            color: "aqua".to_string(),
            bold: false,
        };
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"text":"hi","color":"aqua","bold":false}"#
        );
    }

    #[test]
    fn state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ServerState::Stopping).unwrap(),
            "\"stopping\""
        );
    }
}
