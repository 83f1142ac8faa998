use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Mutex,
    time::{Duration, Instant},
};

use anyhow::Context;
use rand::Rng;
use tokio::net::UdpSocket;

use crate::config::AgentConfig;
use crate::terminal::Terminal;

const TYPE_HANDSHAKE: u8 = 9;
const TYPE_STAT: u8 = 0;
const CHALLENGE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy)]
struct Challenge {
    value: u32,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct ChallengeLibrary {
    ttl: Duration,
    list: Mutex<Vec<Challenge>>,
}

impl Default for ChallengeLibrary {
    fn default() -> Self {
        Self::with_ttl(CHALLENGE_TTL)
    }
}

impl ChallengeLibrary {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            list: Mutex::new(Vec::new()),
        }
    }

    pub fn issue(&self) -> u32 {
        let value = rand::thread_rng().gen_range(1_000_000..=9_999_999);
        let now = Instant::now();
        let mut list = match self.list.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        list.retain(|c| c.expires_at > now);
        list.push(Challenge {
            value,
            expires_at: now + self.ttl,
        });
        value
    }

    pub fn in_library(&self, value: u32) -> bool {
        self.in_library_at(value, Instant::now())
    }

    fn in_library_at(&self, value: u32, now: Instant) -> bool {
        let mut list = match self.list.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        list.retain(|c| c.expires_at > now);
        list.iter().any(|c| c.value == value)
    }
}

#[derive(Debug, Clone)]
pub struct QueryInfo {
    pub motd: String,
    pub version: String,
    pub map: String,
    pub num_players: u32,
    pub max_players: u32,
    pub host_port: u16,
    pub host_ip: IpAddr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Handshake { session: [u8; 4] },
    BasicStat { session: [u8; 4], challenge: u32 },
    FullStat { session: [u8; 4], challenge: u32 },
}

pub fn parse_request(req: &[u8]) -> anyhow::Result<Request> {
    if req.len() < 7 || req[0] != 0xFE || req[1] != 0xFD {
        anyhow::bail!("not a query packet ({} bytes)", req.len());
    }
    let session = [req[3], req[4], req[5], req[6]];

    match (req[2], req.len()) {
        (TYPE_HANDSHAKE, 7) => Ok(Request::Handshake { session }),
        (TYPE_STAT, 11 | 15) => {
            let challenge = u32::from_be_bytes([req[7], req[8], req[9], req[10]]);
            if req.len() == 11 {
                Ok(Request::BasicStat { session, challenge })
            } else {
                Ok(Request::FullStat { session, challenge })
            }
        }
        (ty, len) => anyhow::bail!("unexpected query request (type {ty}, {len} bytes)"),
    }
}

pub fn handshake_response(session: [u8; 4], challenge: u32) -> Vec<u8> {
    let mut buf = vec![TYPE_HANDSHAKE];
    buf.extend_from_slice(&session);
    buf.extend_from_slice(challenge.to_string().as_bytes());
    buf.push(0);
    buf
}

fn push_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

pub fn basic_stat_response(session: [u8; 4], info: &QueryInfo) -> Vec<u8> {
    let mut buf = vec![TYPE_STAT];
    buf.extend_from_slice(&session);
    push_str(&mut buf, &info.motd);
    push_str(&mut buf, "SMP");
    push_str(&mut buf, &info.map);
    push_str(&mut buf, &info.num_players.to_string());
    push_str(&mut buf, &info.max_players.to_string());
    buf.extend_from_slice(&info.host_port.to_le_bytes());
    push_str(&mut buf, &info.host_ip.to_string());
    buf
}

pub fn full_stat_response(session: [u8; 4], info: &QueryInfo) -> Vec<u8> {
    let mut buf = vec![TYPE_STAT];
    buf.extend_from_slice(&session);
    buf.extend_from_slice(b"splitnum\x00\x80\x00");

    let plugins = format!(
        "dormant/{}: dormant {}",
        info.version,
        env!("CARGO_PKG_VERSION")
    );
    let pairs = [
        ("hostname", info.motd.clone()),
        ("gametype", "SMP".to_string()),
        ("game_id", "MINECRAFT".to_string()),
        ("version", info.version.clone()),
        ("plugins", plugins),
        ("map", info.map.clone()),
        ("numplayers", info.num_players.to_string()),
        ("maxplayers", info.max_players.to_string()),
        ("hostport", info.host_port.to_string()),
        ("hostip", info.host_ip.to_string()),
    ];
    for (k, v) in pairs {
        push_str(&mut buf, k);
        push_str(&mut buf, &v);
    }
    buf.push(0);

    // Player section: header padding then an empty, terminated list.
    buf.extend_from_slice(b"\x01player_\x00\x00");
    buf.push(0);
    buf
}

pub fn handle_request(
    clib: &ChallengeLibrary,
    req: &[u8],
    info: impl FnOnce() -> QueryInfo,
) -> anyhow::Result<Option<Vec<u8>>> {
    match parse_request(req)? {
        Request::Handshake { session } => Ok(Some(handshake_response(session, clib.issue()))),
        Request::BasicStat { challenge, .. } | Request::FullStat { challenge, .. }
            if !clib.in_library(challenge) =>
        {
            tracing::warn!(challenge, "query challenge failed");
            Ok(None)
        }
        Request::BasicStat { session, .. } => Ok(Some(basic_stat_response(session, &info()))),
        Request::FullStat { session, .. } => Ok(Some(full_stat_response(session, &info()))),
    }
}

pub fn outbound_ip4() -> IpAddr {
    std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|s| {
            s.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
            s.local_addr()
        })
        .map(|a| a.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn query_info(cfg: &AgentConfig, terminal: &Terminal, host_ip: IpAddr) -> QueryInfo {
    let props = cfg.server_properties();
    QueryInfo {
        motd: cfg.motd.clone(),
        version: cfg.server_version.clone(),
        map: props.level_name,
        num_players: terminal.stats().player_count().max(0) as u32,
        max_players: props.max_players,
        host_port: cfg.game_port,
        host_ip,
    }
}

pub async fn serve(cfg: AgentConfig, terminal: Terminal) -> anyhow::Result<()> {
    let addr = SocketAddr::new(cfg.query_host, cfg.query_port);
    let socket = UdpSocket::bind(addr)
        .await
        .with_context(|| format!("bind query socket {addr}"))?;
    tracing::info!(%addr, "query responder listening");

    let clib = ChallengeLibrary::default();
    let host_ip = outbound_ip4();
    let mut buf = [0u8; 1024];

    loop {
        let (n, peer) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "query recv failed");
                continue;
            }
        };

        let res = match handle_request(&clib, &buf[..n], || query_info(&cfg, &terminal, host_ip)) {
            Ok(Some(res)) => res,
            Ok(None) => continue,
            Err(e) => {
                tracing::debug!(%peer, error = %e, "dropping query packet");
                continue;
            }
        };

        if let Err(e) = socket.send_to(&res, peer).await {
            tracing::warn!(%peer, error = %e, "query send failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

    fn info() -> QueryInfo {
        QueryInfo {
            motd: "zzz".to_string(),
            version: "1.20.4".to_string(),
            map: "world".to_string(),
            num_players: 0,
            max_players: 20,
            host_port: 25565,
            host_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
        }
    }

    fn stat_request(challenge: u32, full: bool) -> Vec<u8> {
        let mut req = vec![0xFE, 0xFD, TYPE_STAT];
        req.extend_from_slice(&SESSION);
        req.extend_from_slice(&challenge.to_be_bytes());
        if full {
            req.extend_from_slice(&[0, 0, 0, 0]);
        }
        req
    }

    #[test]
    fn challenge_accepted_until_expiry() {
        let clib = ChallengeLibrary::with_ttl(Duration::from_secs(60));
        let c = clib.issue();
        assert!((1_000_000..=9_999_999).contains(&c));
        assert!(clib.in_library(c));

        let later = Instant::now() + Duration::from_secs(61);
        assert!(!clib.in_library_at(c, later));
        // Expired entries are pruned, not just hidden.
        assert!(!clib.in_library(c));
    }

    #[test]
    fn unknown_challenge_rejected() {
        let clib = ChallengeLibrary::default();
        clib.issue();
        assert!(!clib.in_library(42));
    }

    #[test]
    fn handshake_echoes_session_and_issues_challenge() {
        let clib = ChallengeLibrary::default();
        let mut req = vec![0xFE, 0xFD, TYPE_HANDSHAKE];
        req.extend_from_slice(&SESSION);

        let res = handle_request(&clib, &req, info).unwrap().unwrap();
        assert_eq!(res[0], TYPE_HANDSHAKE);
        assert_eq!(&res[1..5], &SESSION);
        assert_eq!(*res.last().unwrap(), 0);

        let challenge: u32 = std::str::from_utf8(&res[5..res.len() - 1])
            .unwrap()
            .parse()
            .unwrap();
        assert!(clib.in_library(challenge));
    }

    #[test]
    fn basic_stat_layout() {
        let clib = ChallengeLibrary::default();
        let c = clib.issue();
        let res = handle_request(&clib, &stat_request(c, false), info)
            .unwrap()
            .unwrap();

        let mut want = vec![TYPE_STAT];
        want.extend_from_slice(&SESSION);
        want.extend_from_slice(b"zzz\0SMP\0world\x000\x0020\0");
        want.extend_from_slice(&25565u16.to_le_bytes());
        want.extend_from_slice(b"10.0.0.2\0");
        assert_eq!(res, want);
    }

    #[test]
    fn full_stat_contains_key_values() {
        let clib = ChallengeLibrary::default();
        let c = clib.issue();
        let res = handle_request(&clib, &stat_request(c, true), info)
            .unwrap()
            .unwrap();

        assert_eq!(&res[5..16], b"splitnum\x00\x80\x00");
        let text = String::from_utf8_lossy(&res);
        assert!(text.contains("hostname\0zzz\0"));
        assert!(text.contains("game_id\0MINECRAFT\0"));
        assert!(text.contains("maxplayers\x0020\0"));
        assert!(res.ends_with(b"\0\x01player_\0\0\0"));
    }

    #[test]
    fn stat_with_bad_challenge_is_dropped() {
        let clib = ChallengeLibrary::default();
        let res = handle_request(&clib, &stat_request(1234567, false), info).unwrap();
        assert!(res.is_none());
    }

    #[test]
    fn malformed_packets_are_errors() {
        let clib = ChallengeLibrary::default();
        assert!(handle_request(&clib, &[0xFE, 0xFD, 9], info).is_err());
        assert!(handle_request(&clib, &[0u8; 7], info).is_err());
        let mut odd = stat_request(1, false);
        odd.push(0);
        assert!(handle_request(&clib, &odd, info).is_err());
    }
}
