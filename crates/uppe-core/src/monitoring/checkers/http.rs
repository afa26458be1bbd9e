use anyhow::{Context, Result, anyhow, bail};
use dashmap::DashMap;
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::model::monitor::{HttpTarget, JsonQueryTarget, KeywordTarget};
use crate::model::MonitorTarget;
use crate::monitoring::checker::{Checker, Probe};

/// Inclusive status code range, written `"200-299"` or `"301"`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRange {
    pub start: u16,
    pub end: u16,
}

impl StatusRange {
    pub fn contains(&self, code: u16) -> bool {
        (self.start..=self.end).contains(&code)
    }
}

impl FromStr for StatusRange {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parse = |raw: &str| -> Result<u16> {
            let code: u16 = raw.trim().parse().with_context(|| format!("invalid status code {raw:?}"))?;
            if !(100..=599).contains(&code) {
                bail!("status code {code} outside 100-599");
            }
            Ok(code)
        };

        let range = match s.split_once('-') {
            Some((start, end)) => StatusRange { start: parse(start)?, end: parse(end)? },
            None => {
                let code = parse(s)?;
                StatusRange { start: code, end: code }
            }
        };
        if range.start > range.end {
            bail!("status range {s:?} is reversed");
        }
        Ok(range)
    }
}

/// Whether `code` falls into any of the accepted ranges
pub fn status_accepted(code: u16, accepted: &[String]) -> Result<bool> {
    for raw in accepted {
        if raw.parse::<StatusRange>()?.contains(code) {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn keyword_matches(body: &str, target: &KeywordTarget) -> bool {
    let found = if target.case_sensitive {
        body.contains(&target.keyword)
    } else {
        body.to_lowercase().contains(&target.keyword.to_lowercase())
    };
    found != target.invert
}

/// Value at the pointer rendered as text, compared with the expected value
pub fn json_query_matches(body: &str, target: &JsonQueryTarget) -> Result<(bool, String)> {
    let document: serde_json::Value = serde_json::from_str(body).context("response is not valid JSON")?;
    let value = document
        .pointer(&target.json_pointer)
        .ok_or_else(|| anyhow!("nothing at {}", target.json_pointer))?;
    let actual = match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Ok((actual == target.expected_value, actual))
}

/// HTTP/HTTPS checker, also serving keyword and JSON query monitors
///
/// Clients are cached per TLS/redirect setting.
#[derive(Default)]
pub struct HttpChecker {
    clients: DashMap<(bool, u8), reqwest::Client>,
}

impl HttpChecker {
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self, ignore_tls: bool, max_redirects: u8) -> Result<reqwest::Client> {
        if let Some(client) = self.clients.get(&(ignore_tls, max_redirects)) {
            return Ok(client.clone());
        }

        let redirect = if max_redirects == 0 {
            reqwest::redirect::Policy::none()
        } else {
            reqwest::redirect::Policy::limited(usize::from(max_redirects))
        };
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(ignore_tls)
            .redirect(redirect)
            .user_agent(concat!("uppe/", env!("CARGO_PKG_VERSION")))
            .build()?;
        self.clients.insert((ignore_tls, max_redirects), client.clone());
        Ok(client)
    }

    /// Send the request and return status, body and latency to first byte
    async fn fetch(&self, target: &HttpTarget, timeout: Duration) -> Result<(u16, String, u64)> {
        let client = self.client(target.ignore_tls, target.max_redirects)?;
        let method = reqwest::Method::from_bytes(target.method.to_uppercase().as_bytes())
            .with_context(|| format!("invalid HTTP method {}", target.method))?;

        let mut request = client.request(method, &target.url).timeout(timeout);
        for (name, value) in &target.headers {
            request = request.header(name, value);
        }
        if let Some(auth) = &target.basic_auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }
        if let Some(body) = &target.body {
            request = request.body(body.clone());
        }

        let start = Instant::now();
        let response = request.send().await.map_err(|e| anyhow!("HTTP request failed: {}", e))?;
        let latency = start.elapsed().as_millis() as u64;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| anyhow!("failed to read response body: {}", e))?;
        Ok((status, body, latency))
    }

    async fn check_status(&self, target: &HttpTarget, timeout: Duration) -> Result<(u16, String, u64)> {
        let (status, body, latency) = self.fetch(target, timeout).await?;
        if !status_accepted(status, &target.accepted_status_codes)? {
            bail!("HTTP check failed with status code: {}", status);
        }
        Ok((status, body, latency))
    }

    /// GET a JSON document, used by API-backed checks such as Docker
    pub async fn get_json(&self, url: &str, timeout: Duration) -> Result<(serde_json::Value, u64)> {
        let target = HttpTarget::get(url);
        let (_, body, latency) = self.check_status(&target, timeout).await?;
        let value = serde_json::from_str(&body).context("response is not valid JSON")?;
        Ok((value, latency))
    }
}

#[async_trait::async_trait]
impl Checker for HttpChecker {
    async fn check(&self, target: &MonitorTarget, timeout: Duration) -> Result<Probe> {
        match target {
            MonitorTarget::Http(http) => {
                let (status, _, latency) = self.check_status(http, timeout).await?;
                Ok(Probe::new(latency).with_status(status))
            }
            MonitorTarget::Keyword(keyword) => {
                let (status, body, latency) = self.check_status(&keyword.request, timeout).await?;
                if !keyword_matches(&body, keyword) {
                    if keyword.invert {
                        bail!("keyword {:?} found in response", keyword.keyword);
                    }
                    bail!("keyword {:?} not found in response", keyword.keyword);
                }
                Ok(Probe::new(latency).with_status(status))
            }
            MonitorTarget::JsonQuery(query) => {
                let (status, body, latency) = self.check_status(&query.request, timeout).await?;
                let (matched, actual) = json_query_matches(&body, query)?;
                if !matched {
                    bail!("{} is {:?}, expected {:?}", query.json_pointer, actual, query.expected_value);
                }
                Ok(Probe::new(latency).with_status(status).with_message(actual))
            }
            other => bail!("HTTP checker cannot probe {} targets", other.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve a single canned HTTP response on an ephemeral port
    async fn serve_once(status: u16, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status} X\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{addr}/")
    }

    #[test]
    fn parses_status_ranges() {
        assert_eq!("200-299".parse::<StatusRange>().unwrap(), StatusRange { start: 200, end: 299 });
        assert_eq!("301".parse::<StatusRange>().unwrap(), StatusRange { start: 301, end: 301 });
        assert!("299-200".parse::<StatusRange>().is_err());
        assert!("abc".parse::<StatusRange>().is_err());
        assert!("700".parse::<StatusRange>().is_err());

        let accepted = vec!["200-299".to_string(), "418".to_string()];
        assert!(status_accepted(204, &accepted).unwrap());
        assert!(status_accepted(418, &accepted).unwrap());
        assert!(!status_accepted(500, &accepted).unwrap());
    }

    #[test]
    fn keyword_respects_case_and_invert() {
        let mut target = KeywordTarget {
            request: HttpTarget::get("http://localhost"),
            keyword: "Operational".into(),
            case_sensitive: false,
            invert: false,
        };
        assert!(keyword_matches("all systems operational", &target));

        target.case_sensitive = true;
        assert!(!keyword_matches("all systems operational", &target));

        target.invert = true;
        assert!(keyword_matches("all systems operational", &target));
    }

    #[test]
    fn json_query_compares_rendered_value() {
        let target = JsonQueryTarget {
            request: HttpTarget::get("http://localhost"),
            json_pointer: "/checks/db".into(),
            expected_value: "ok".into(),
        };
        assert!(json_query_matches(r#"{"checks":{"db":"ok"}}"#, &target).unwrap().0);
        assert_eq!(json_query_matches(r#"{"checks":{"db":false}}"#, &target).unwrap(), (false, "false".into()));
        assert!(json_query_matches(r#"{"checks":{}}"#, &target).is_err());
        assert!(json_query_matches("not json", &target).is_err());
    }

    #[tokio::test]
    async fn http_check_against_local_server() {
        let checker = HttpChecker::new();

        let url = serve_once(200, "ok").await;
        let probe = checker.check(&MonitorTarget::http(url), Duration::from_secs(5)).await.unwrap();
        assert_eq!(probe.status_code, Some(200));

        let url = serve_once(503, "down").await;
        let err = checker.check(&MonitorTarget::http(url), Duration::from_secs(5)).await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn keyword_check_against_local_server() {
        let checker = HttpChecker::new();
        let url = serve_once(200, "status: degraded").await;
        let target = MonitorTarget::Keyword(KeywordTarget {
            request: HttpTarget::get(url),
            keyword: "healthy".into(),
            case_sensitive: false,
            invert: false,
        });
        let err = checker.check(&target, Duration::from_secs(5)).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
