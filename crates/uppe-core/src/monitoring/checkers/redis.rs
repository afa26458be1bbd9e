use anyhow::{Context, Result, bail};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::model::MonitorTarget;
use crate::monitoring::checker::{Checker, Probe};

/// Redis checker speaking just enough RESP for `AUTH` and `PING`
pub struct RedisChecker;

/// Encode a command as a RESP array of bulk strings
pub fn resp_command(parts: &[&str]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", parts.len()).into_bytes();
    for part in parts {
        out.extend_from_slice(format!("${}\r\n", part.len()).as_bytes());
        out.extend_from_slice(part.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

async fn roundtrip(
    reader: &mut BufReader<TcpStream>,
    command: &[&str],
) -> Result<String> {
    reader.get_mut().write_all(&resp_command(command)).await?;
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        bail!("connection closed by server");
    }
    Ok(line.trim_end().to_string())
}

#[async_trait::async_trait]
impl Checker for RedisChecker {
    async fn check(&self, target: &MonitorTarget, _timeout: Duration) -> Result<Probe> {
        let MonitorTarget::Redis(redis) = target else {
            bail!("redis checker cannot probe {} targets", target.kind());
        };

        let start = Instant::now();
        let stream = TcpStream::connect((redis.host.as_str(), redis.port))
            .await
            .context("TCP connection failed")?;
        let mut reader = BufReader::new(stream);

        if let Some(password) = &redis.password {
            let reply = roundtrip(&mut reader, &["AUTH", password.as_str()]).await?;
            if reply != "+OK" {
                bail!("AUTH rejected: {}", reply.trim_start_matches('-'));
            }
        }

        let reply = roundtrip(&mut reader, &["PING"]).await?;
        if reply != "+PONG" {
            bail!("unexpected PING reply: {}", reply);
        }
        Ok(Probe::new(start.elapsed().as_millis() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::monitor::RedisTarget;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn encodes_resp_arrays() {
        assert_eq!(resp_command(&["PING"]), b"*1\r\n$4\r\nPING\r\n".to_vec());
        assert_eq!(resp_command(&["AUTH", "s3"]), b"*2\r\n$4\r\nAUTH\r\n$2\r\ns3\r\n".to_vec());
    }

    #[tokio::test]
    async fn ping_against_fake_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = socket.read(&mut buf).await;
            socket.write_all(b"+PONG\r\n").await.unwrap();
        });

        let target = MonitorTarget::Redis(RedisTarget { host: "127.0.0.1".into(), port, password: None });
        assert!(RedisChecker.check(&target, Duration::from_secs(2)).await.is_ok());
    }
}
