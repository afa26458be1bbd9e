use anyhow::{Context, Result, bail};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::model::MonitorTarget;
use crate::monitoring::checker::{Checker, Probe};

/// SMTP checker: greeting plus EHLO
pub struct SmtpChecker;

/// Read a possibly multi-line reply, returning its code and last line
async fn read_reply(reader: &mut BufReader<TcpStream>) -> Result<(u16, String)> {
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            bail!("connection closed by server");
        }
        let line = line.trim_end();
        if line.len() < 3 {
            bail!("malformed SMTP reply {:?}", line);
        }
        // "250-..." continues, "250 ..." ends the reply
        if line.as_bytes().get(3) == Some(&b'-') {
            continue;
        }
        let code = line[..3].parse().with_context(|| format!("malformed SMTP reply {line:?}"))?;
        return Ok((code, line.to_string()));
    }
}

#[async_trait::async_trait]
impl Checker for SmtpChecker {
    async fn check(&self, target: &MonitorTarget, _timeout: Duration) -> Result<Probe> {
        let MonitorTarget::Smtp(smtp) = target else {
            bail!("SMTP checker cannot probe {} targets", target.kind());
        };

        let start = Instant::now();
        let stream = TcpStream::connect((smtp.host.as_str(), smtp.port))
            .await
            .context("TCP connection failed")?;
        let mut reader = BufReader::new(stream);

        let (code, greeting) = read_reply(&mut reader).await?;
        if code != 220 {
            bail!("unexpected greeting: {}", greeting);
        }

        reader.get_mut().write_all(b"EHLO uppe.local\r\n").await?;
        let (code, reply) = read_reply(&mut reader).await?;
        let latency = start.elapsed().as_millis() as u64;
        if code != 250 {
            bail!("EHLO rejected: {}", reply);
        }

        let _ = reader.get_mut().write_all(b"QUIT\r\n").await;
        Ok(Probe::new(latency).with_status(code).with_message(greeting))
    }
}
