use std::{
    net::IpAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;

const DEFAULT_SERVER_COMMAND: &str = "java -Xmx1024M -Xms1024M -jar server.jar nogui";
const DEFAULT_EXECUTE_IDLE_MS: u64 = 200;
const DEFAULT_FREEZE_DELAY_SEC: u64 = 30;

pub(crate) fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn env_u64(name: &str) -> Option<u64> {
    env_string(name).and_then(|v| v.parse::<u64>().ok())
}

pub(crate) fn env_bool(name: &str) -> Option<bool> {
    match env_string(name)?.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub server_dir: PathBuf,
    pub server_command: String,
    pub query_host: IpAddr,
    pub query_port: u16,
    pub game_port: u16,
    pub execute_idle: Duration,
    pub freeze_delay: Duration,
    pub motd: String,
    pub server_version: String,
    pub start_on_boot: bool,
}

impl AgentConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let query_host = match env_string("DORMANT_QUERY_HOST") {
            Some(raw) => raw
                .parse::<IpAddr>()
                .with_context(|| format!("invalid DORMANT_QUERY_HOST: {raw}"))?,
            None => IpAddr::from([0, 0, 0, 0]),
        };

        let port = |name: &str, default: u16| -> anyhow::Result<u16> {
            match env_string(name) {
                None => Ok(default),
                Some(raw) => raw
                    .parse::<u16>()
                    .ok()
                    .filter(|p| *p != 0)
                    .ok_or_else(|| anyhow::anyhow!("invalid {name}: {raw} (expected 1..65535)")),
            }
        };

        Ok(Self {
            server_dir: absolute(
                env_string("DORMANT_SERVER_DIR").unwrap_or_else(|| "./server".to_string()),
            ),
            server_command: env_string("DORMANT_SERVER_COMMAND")
                .unwrap_or_else(|| DEFAULT_SERVER_COMMAND.to_string()),
            query_host,
            query_port: port("DORMANT_QUERY_PORT", 25555)?,
            game_port: port("DORMANT_GAME_PORT", 25565)?,
            execute_idle: Duration::from_millis(
                env_u64("DORMANT_EXECUTE_IDLE_MS")
                    .map(|v| v.clamp(50, 5000))
                    .unwrap_or(DEFAULT_EXECUTE_IDLE_MS),
            ),
            freeze_delay: Duration::from_secs(
                env_u64("DORMANT_FREEZE_DELAY_SEC")
                    .map(|v| v.clamp(0, 24 * 60 * 60))
                    .unwrap_or(DEFAULT_FREEZE_DELAY_SEC),
            ),
            motd: env_string("DORMANT_MOTD")
                .unwrap_or_else(|| "Server is hibernating. Join to wake it up!".to_string()),
            server_version: env_string("DORMANT_SERVER_VERSION")
                .unwrap_or_else(|| "1.20.4".to_string()),
            start_on_boot: env_bool("DORMANT_START_ON_BOOT").unwrap_or(true),
        })
    }

    pub fn server_properties(&self) -> ServerProperties {
        ServerProperties::load(&self.server_dir.join("server.properties"))
    }
}

fn absolute(raw: String) -> PathBuf {
    let p = PathBuf::from(raw);
    if p.is_absolute() {
        return p;
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(p)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerProperties {
    pub level_name: String,
    pub max_players: u32,
}

impl Default for ServerProperties {
    fn default() -> Self {
        Self {
            level_name: "world".to_string(),
            max_players: 20,
        }
    }
}

impl ServerProperties {
    pub fn load(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .map(|s| Self::parse(&s))
            .unwrap_or_default()
    }

    pub fn parse(text: &str) -> Self {
        let mut out = Self::default();
        for line in text.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((k, v)) = line.split_once('=') else {
                continue;
            };
            match k.trim() {
                "level-name" if !v.trim().is_empty() => out.level_name = v.trim().to_string(),
                "max-players" => {
                    if let Ok(n) = v.trim().parse() {
                        out.max_players = n;
                    }
                }
                _ => {}
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_level_name_and_max_players() {
        let props = ServerProperties::parse(
            "#Minecraft server properties\nlevel-name=worlds/world\nmax-players=8\nserver-port=25565\n",
        );
        assert_eq!(props.level_name, "worlds/world");
        assert_eq!(props.max_players, 8);
    }

    #[test]
    fn malformed_values_keep_defaults() {
        let props = ServerProperties::parse("level-name=\nmax-players=lots\n");
        assert_eq!(props, ServerProperties::default());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let props = ServerProperties::load(Path::new("/nonexistent/dormant/server.properties"));
        assert_eq!(props, ServerProperties::default());
    }
}
