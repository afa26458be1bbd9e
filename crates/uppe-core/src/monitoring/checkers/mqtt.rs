use anyhow::{Context, Result, bail};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::model::MonitorTarget;
use crate::model::monitor::MqttTarget;
use crate::monitoring::checker::{Checker, Probe};

/// MQTT broker checker (3.1.1 CONNECT / CONNACK)
pub struct MqttChecker;

fn push_str(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
    buf.extend_from_slice(value.as_bytes());
}

fn push_remaining_length(buf: &mut Vec<u8>, mut len: usize) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if len == 0 {
            break;
        }
    }
}

pub fn connect_packet(target: &MqttTarget) -> Vec<u8> {
    let mut flags = 0x02u8; // clean session
    if target.username.is_some() {
        flags |= 0x80;
    }
    if target.password.is_some() {
        flags |= 0x40;
    }

    let mut body = Vec::new();
    push_str(&mut body, "MQTT");
    body.push(4); // protocol level 3.1.1
    body.push(flags);
    body.extend_from_slice(&30u16.to_be_bytes()); // keep-alive seconds
    push_str(&mut body, &target.client_id);
    if let Some(username) = &target.username {
        push_str(&mut body, username);
    }
    if let Some(password) = &target.password {
        push_str(&mut body, password);
    }

    let mut packet = vec![0x10];
    push_remaining_length(&mut packet, body.len());
    packet.extend_from_slice(&body);
    packet
}

pub fn connack_error(code: u8) -> &'static str {
    match code {
        1 => "unacceptable protocol version",
        2 => "client identifier rejected",
        3 => "server unavailable",
        4 => "bad username or password",
        5 => "not authorized",
        _ => "unknown return code",
    }
}

#[async_trait::async_trait]
impl Checker for MqttChecker {
    async fn check(&self, target: &MonitorTarget, _timeout: Duration) -> Result<Probe> {
        let MonitorTarget::Mqtt(mqtt) = target else {
            bail!("MQTT checker cannot probe {} targets", target.kind());
        };

        let start = Instant::now();
        let mut stream = TcpStream::connect((mqtt.host.as_str(), mqtt.port))
            .await
            .context("TCP connection failed")?;
        stream.write_all(&connect_packet(mqtt)).await?;

        let mut connack = [0u8; 4];
        stream.read_exact(&mut connack).await.context("no CONNACK from broker")?;
        let latency = start.elapsed().as_millis() as u64;
        if connack[0] != 0x20 || connack[1] != 0x02 {
            bail!("unexpected reply from broker: {:02x?}", connack);
        }
        if connack[3] != 0 {
            bail!("connection refused: {}", connack_error(connack[3]));
        }

        // DISCONNECT
        let _ = stream.write_all(&[0xE0, 0x00]).await;
        Ok(Probe::new(latency))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_packet_layout() {
        let target = MqttTarget {
            host: "broker".into(),
            port: 1883,
            client_id: "uppe".into(),
            username: Some("u".into()),
            password: Some("p".into()),
        };
        let packet = connect_packet(&target);
        assert_eq!(packet[0], 0x10);
        assert_eq!(usize::from(packet[1]), packet.len() - 2);
        assert_eq!(&packet[2..8], b"\x00\x04MQTT");
        assert_eq!(packet[8], 4);
        assert_eq!(packet[9], 0xC2);
        assert!(packet.ends_with(b"\x00\x04uppe\x00\x01u\x00\x01p"));
    }

    #[test]
    fn remaining_length_varint() {
        let mut buf = Vec::new();
        push_remaining_length(&mut buf, 321);
        assert_eq!(buf, vec![0xC1, 0x02]);
    }
}
