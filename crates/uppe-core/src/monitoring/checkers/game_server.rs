use anyhow::{Context, Result, bail};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

use crate::model::MonitorTarget;
use crate::monitoring::checker::{Checker, Probe};

/// Source engine server query (A2S_INFO)
pub struct GameServerChecker;

const HEADER: [u8; 4] = [0xFF; 4];
const A2S_INFO: &[u8] = b"TSource Engine Query\0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    pub map: String,
    pub game: String,
    pub players: u8,
    pub max_players: u8,
}

pub fn info_request(challenge: Option<[u8; 4]>) -> Vec<u8> {
    let mut request = HEADER.to_vec();
    request.extend_from_slice(A2S_INFO);
    if let Some(challenge) = challenge {
        request.extend_from_slice(&challenge);
    }
    request
}

/// A challenge reply (`'A'`) yields the token to resend with
pub fn parse_challenge(reply: &[u8]) -> Option<[u8; 4]> {
    if reply.len() >= 9 && reply[..4] == HEADER && reply[4] == b'A' {
        reply[5..9].try_into().ok()
    } else {
        None
    }
}

pub fn parse_info(reply: &[u8]) -> Result<ServerInfo> {
    if reply.len() < 6 || reply[..4] != HEADER || reply[4] != b'I' {
        bail!("not an A2S_INFO reply");
    }

    let mut cursor = &reply[6..]; // skip header, type and protocol
    let mut read_string = || -> Result<String> {
        let end = cursor.iter().position(|b| *b == 0).context("truncated A2S_INFO reply")?;
        let value = String::from_utf8_lossy(&cursor[..end]).into_owned();
        cursor = &cursor[end + 1..];
        Ok(value)
    };
    let name = read_string()?;
    let map = read_string()?;
    let _folder = read_string()?;
    let game = read_string()?;

    // app id (u16) then players and max players
    let counts = cursor.get(2..4).context("truncated A2S_INFO reply")?;
    Ok(ServerInfo { name, map, game, players: counts[0], max_players: counts[1] })
}

async fn exchange(socket: &UdpSocket, request: &[u8]) -> Result<Vec<u8>> {
    socket.send(request).await?;
    let mut buf = vec![0u8; 1400];
    let len = socket.recv(&mut buf).await.context("no reply from game server")?;
    buf.truncate(len);
    Ok(buf)
}

#[async_trait::async_trait]
impl Checker for GameServerChecker {
    async fn check(&self, target: &MonitorTarget, _timeout: Duration) -> Result<Probe> {
        let MonitorTarget::GameServer(game) = target else {
            bail!("game server checker cannot probe {} targets", target.kind());
        };

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect((game.host.as_str(), game.port)).await.context("failed to resolve game server")?;

        let start = Instant::now();
        let mut reply = exchange(&socket, &info_request(None)).await?;
        if let Some(challenge) = parse_challenge(&reply) {
            reply = exchange(&socket, &info_request(Some(challenge))).await?;
        }
        let latency = start.elapsed().as_millis() as u64;

        let info = parse_info(&reply)?;
        if let Some(min) = game.min_players {
            if info.players < min {
                bail!("{} players online, expected at least {}", info.players, min);
            }
        }
        Ok(Probe::new(latency).with_message(format!(
            "{} on {} ({}/{})",
            info.name, info.map, info.players, info.max_players
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_reply() -> Vec<u8> {
        let mut reply = HEADER.to_vec();
        reply.extend_from_slice(b"I\x11");
        reply.extend_from_slice(b"My Server\0de_dust2\0csgo\0Counter-Strike\0");
        reply.extend_from_slice(&[0xDA, 0x02, 12, 24, 0]);
        reply
    }

    #[test]
    fn parses_info_reply() {
        let info = parse_info(&info_reply()).unwrap();
        assert_eq!(info.name, "My Server");
        assert_eq!(info.map, "de_dust2");
        assert_eq!(info.game, "Counter-Strike");
        assert_eq!((info.players, info.max_players), (12, 24));
        assert!(parse_info(&info_reply()[..12]).is_err());
    }

    #[test]
    fn challenge_round() {
        let mut challenge = HEADER.to_vec();
        challenge.extend_from_slice(b"A\x01\x02\x03\x04");
        let token = parse_challenge(&challenge).unwrap();
        assert_eq!(token, [1, 2, 3, 4]);
        assert!(info_request(Some(token)).ends_with(&[1, 2, 3, 4]));
        assert!(parse_challenge(&info_reply()).is_none());
    }

    #[tokio::test]
    async fn queries_fake_server_with_challenge() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (_, peer) = server.recv_from(&mut buf).await.unwrap();
            server.send_to(b"\xFF\xFF\xFF\xFFA\x09\x08\x07\x06", peer).await.unwrap();
            let (len, peer) = server.recv_from(&mut buf).await.unwrap();
            assert!(buf[..len].ends_with(&[9, 8, 7, 6]));
            server.send_to(&info_reply(), peer).await.unwrap();
        });

        let target = MonitorTarget::GameServer(crate::model::monitor::GameServerTarget {
            host: "127.0.0.1".into(),
            port,
            min_players: Some(10),
        });
        let probe = GameServerChecker.check(&target, Duration::from_secs(2)).await.unwrap();
        assert_eq!(probe.message.as_deref(), Some("My Server on de_dust2 (12/24)"));
    }
}
