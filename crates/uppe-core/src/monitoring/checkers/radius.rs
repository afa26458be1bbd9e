use anyhow::{Context, Result, bail};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

use crate::model::MonitorTarget;
use crate::model::monitor::RadiusTarget;
use crate::monitoring::checker::{Checker, Probe};

/// RADIUS checker sending an Access-Request (RFC 2865)
pub struct RadiusChecker;

const ACCESS_REQUEST: u8 = 1;
const ACCESS_ACCEPT: u8 = 2;
const ACCESS_REJECT: u8 = 3;
const ACCESS_CHALLENGE: u8 = 11;

const ATTR_USER_NAME: u8 = 1;
const ATTR_USER_PASSWORD: u8 = 2;
const ATTR_NAS_IDENTIFIER: u8 = 32;

/// User-Password hiding: p_i xor MD5(secret + c_{i-1}), c_0 = request authenticator
pub fn hide_password(password: &[u8], secret: &[u8], authenticator: &[u8; 16]) -> Vec<u8> {
    let mut padded = password.to_vec();
    let blocks = padded.len().div_ceil(16).max(1);
    padded.resize(blocks * 16, 0);

    let mut hidden = Vec::with_capacity(padded.len());
    let mut previous: Vec<u8> = authenticator.to_vec();
    for chunk in padded.chunks(16) {
        let mut ctx = md5::Context::new();
        ctx.consume(secret);
        ctx.consume(&previous);
        let key = ctx.compute();
        let block: Vec<u8> = chunk.iter().zip(key.0.iter()).map(|(p, k)| p ^ k).collect();
        hidden.extend_from_slice(&block);
        previous = block;
    }
    hidden
}

fn push_attribute(packet: &mut Vec<u8>, kind: u8, value: &[u8]) -> Result<()> {
    if value.len() > 253 {
        bail!("RADIUS attribute {} too long", kind);
    }
    packet.push(kind);
    packet.push(value.len() as u8 + 2);
    packet.extend_from_slice(value);
    Ok(())
}

pub fn access_request(target: &RadiusTarget, identifier: u8, authenticator: &[u8; 16]) -> Result<Vec<u8>> {
    let mut packet = vec![ACCESS_REQUEST, identifier, 0, 0];
    packet.extend_from_slice(authenticator);
    push_attribute(&mut packet, ATTR_USER_NAME, target.username.as_bytes())?;
    let hidden = hide_password(target.password.as_bytes(), target.secret.as_bytes(), authenticator);
    push_attribute(&mut packet, ATTR_USER_PASSWORD, &hidden)?;
    push_attribute(&mut packet, ATTR_NAS_IDENTIFIER, target.nas_identifier.as_bytes())?;

    let len = packet.len() as u16;
    packet[2..4].copy_from_slice(&len.to_be_bytes());
    Ok(packet)
}

/// MD5(code + id + length + request authenticator + attributes + secret)
pub fn response_authenticator(response: &[u8], request_authenticator: &[u8; 16], secret: &[u8]) -> [u8; 16] {
    let mut ctx = md5::Context::new();
    ctx.consume(&response[..4]);
    ctx.consume(request_authenticator);
    ctx.consume(&response[20..]);
    ctx.consume(secret);
    ctx.compute().0
}

/// Validate a reply and return its code
pub fn verify_response(
    response: &[u8],
    identifier: u8,
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> Result<u8> {
    if response.len() < 20 {
        bail!("RADIUS reply too short");
    }
    let declared = usize::from(u16::from_be_bytes([response[2], response[3]]));
    if declared < 20 || declared > response.len() {
        bail!("RADIUS reply length mismatch");
    }
    let response = &response[..declared];
    if response[1] != identifier {
        bail!("RADIUS reply identifier mismatch");
    }
    if response_authenticator(response, request_authenticator, secret) != response[4..20] {
        bail!("RADIUS reply authenticator mismatch (wrong shared secret?)");
    }
    Ok(response[0])
}

#[async_trait::async_trait]
impl Checker for RadiusChecker {
    async fn check(&self, target: &MonitorTarget, _timeout: Duration) -> Result<Probe> {
        let MonitorTarget::Radius(radius) = target else {
            bail!("RADIUS checker cannot probe {} targets", target.kind());
        };

        let identifier: u8 = rand::random();
        let authenticator: [u8; 16] = rand::random();
        let request = access_request(radius, identifier, &authenticator)?;

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect((radius.host.as_str(), radius.port)).await.context("failed to resolve RADIUS server")?;

        let start = Instant::now();
        socket.send(&request).await?;
        let mut buf = vec![0u8; 4096];
        let len = socket.recv(&mut buf).await.context("no reply from RADIUS server")?;
        let latency = start.elapsed().as_millis() as u64;

        match verify_response(&buf[..len], identifier, &authenticator, radius.secret.as_bytes())? {
            ACCESS_ACCEPT => Ok(Probe::new(latency).with_message("Access-Accept")),
            ACCESS_REJECT => bail!("Access-Reject"),
            ACCESS_CHALLENGE => bail!("Access-Challenge (multi-step auth not supported)"),
            code => bail!("unexpected RADIUS code {}", code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> RadiusTarget {
        RadiusTarget {
            host: "127.0.0.1".into(),
            port: 1812,
            secret: "s3cret".into(),
            username: "probe".into(),
            password: "hunter2".into(),
            nas_identifier: "uppe".into(),
        }
    }

    /// Build a reply the way a server would sign it
    fn reply(code: u8, identifier: u8, request_authenticator: &[u8; 16], secret: &[u8]) -> Vec<u8> {
        let mut packet = vec![code, identifier, 0, 20];
        packet.extend_from_slice(&[0u8; 16]);
        let auth = response_authenticator(&packet, request_authenticator, secret);
        packet[4..20].copy_from_slice(&auth);
        packet
    }

    #[test]
    fn password_hiding_reverses_with_secret() {
        let authenticator = [7u8; 16];
        let hidden = hide_password(b"hunter2", b"s3cret", &authenticator);
        assert_eq!(hidden.len(), 16);

        let key = {
            let mut ctx = md5::Context::new();
            ctx.consume(b"s3cret");
            ctx.consume(authenticator);
            ctx.compute().0
        };
        let plain: Vec<u8> = hidden.iter().zip(key.iter()).map(|(c, k)| c ^ k).collect();
        assert_eq!(&plain[..7], b"hunter2");
        assert!(plain[7..].iter().all(|b| *b == 0));

        assert_eq!(hide_password(&[b'x'; 17], b"s", &authenticator).len(), 32);
    }

    #[test]
    fn request_layout() {
        let packet = access_request(&target(), 42, &[1u8; 16]).unwrap();
        assert_eq!(packet[0], ACCESS_REQUEST);
        assert_eq!(packet[1], 42);
        assert_eq!(usize::from(u16::from_be_bytes([packet[2], packet[3]])), packet.len());
        assert_eq!(&packet[20..27], b"\x01\x07probe");
    }

    #[test]
    fn verifies_signed_replies() {
        let auth = [3u8; 16];
        let accept = reply(ACCESS_ACCEPT, 9, &auth, b"s3cret");
        assert_eq!(verify_response(&accept, 9, &auth, b"s3cret").unwrap(), ACCESS_ACCEPT);
        assert!(verify_response(&accept, 9, &auth, b"wrong").is_err());
        assert!(verify_response(&accept, 10, &auth, b"s3cret").is_err());
        assert!(verify_response(&accept[..10], 9, &auth, b"s3cret").is_err());
    }

    #[tokio::test]
    async fn reject_is_a_failure() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (_, peer) = server.recv_from(&mut buf).await.unwrap();
            let request_auth: [u8; 16] = buf[4..20].try_into().unwrap();
            server.send_to(&reply(ACCESS_REJECT, buf[1], &request_auth, b"s3cret"), peer).await.unwrap();
        });

        let target = MonitorTarget::Radius(RadiusTarget { port, ..target() });
        let err = RadiusChecker.check(&target, Duration::from_secs(2)).await.unwrap_err();
        assert_eq!(err.to_string(), "Access-Reject");
    }
}
