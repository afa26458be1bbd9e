//! Monitor validation.
//!
//! Everything here runs before a monitor is stored or scheduled; a monitor
//! that fails validation never reaches a checker.

use std::net::SocketAddr;
use url::Url;

use super::checkers::StatusRange;
use crate::error::ValidationError;
use crate::model::monitor::{HttpTarget, MonitorTarget};
use crate::model::Monitor;

const MIN_INTERVAL: u64 = 10; // 10 seconds
const MAX_INTERVAL: u64 = 86400; // 24 hours
const MIN_TIMEOUT: u64 = 1;
const MAX_TIMEOUT: u64 = 300; // 5 minutes
const MAX_RETRIES: u64 = 10;

type Result<T> = std::result::Result<T, ValidationError>;

/// Validate timing bounds and the target payload of a monitor
pub fn validate_monitor(monitor: &Monitor) -> Result<()> {
    if monitor.name.trim().is_empty() {
        return Err(ValidationError::field("name", "must not be empty"));
    }
    validate_check_interval(monitor.interval_secs)?;
    validate_timeout(monitor.timeout_secs)?;
    if monitor.timeout_secs >= monitor.interval_secs {
        return Err(ValidationError::field(
            "timeout_secs",
            format!("{}s must be shorter than the {}s interval", monitor.timeout_secs, monitor.interval_secs),
        ));
    }
    range("max_retries", u64::from(monitor.max_retries), 0, MAX_RETRIES)?;
    if monitor.max_retries > 0 {
        range("retry_interval_secs", monitor.retry_interval_secs, 1, MAX_INTERVAL)?;
    }
    validate_target(&monitor.target)
}

fn range(field: &'static str, value: u64, min: u64, max: u64) -> Result<()> {
    if value < min || value > max {
        return Err(ValidationError::OutOfRange { field, value, min, max });
    }
    Ok(())
}

pub fn validate_check_interval(interval_secs: u64) -> Result<()> {
    range("interval_secs", interval_secs, MIN_INTERVAL, MAX_INTERVAL)
}

pub fn validate_timeout(timeout_secs: u64) -> Result<()> {
    range("timeout_secs", timeout_secs, MIN_TIMEOUT, MAX_TIMEOUT)
}

/// Validate the payload of one check kind
pub fn validate_target(target: &MonitorTarget) -> Result<()> {
    match target {
        MonitorTarget::Http(http) => validate_http_request(http),
        MonitorTarget::Keyword(keyword) => {
            validate_http_request(&keyword.request)?;
            if keyword.keyword.is_empty() {
                return Err(ValidationError::field("keyword", "must not be empty"));
            }
            Ok(())
        }
        MonitorTarget::JsonQuery(query) => {
            validate_http_request(&query.request)?;
            if !query.json_pointer.is_empty() && !query.json_pointer.starts_with('/') {
                return Err(ValidationError::field("json_pointer", "must be empty or start with '/'"));
            }
            Ok(())
        }
        MonitorTarget::Port(t) => validate_host_port(&t.host, t.port),
        MonitorTarget::Ping(t) => {
            validate_host(&t.host)?;
            range("packet_count", u64::from(t.packet_count), 1, 10)
        }
        MonitorTarget::Dns(t) => {
            validate_host(&t.hostname)?;
            if let Some(resolver) = &t.resolver {
                resolver
                    .parse::<SocketAddr>()
                    .map_err(|_| ValidationError::field("resolver", format!("{resolver:?} is not ip:port")))?;
            }
            Ok(())
        }
        MonitorTarget::Docker(t) => {
            validate_url(&t.engine_url, &["http", "https"])?;
            if t.container.trim().is_empty() {
                return Err(ValidationError::field("container", "must not be empty"));
            }
            Ok(())
        }
        MonitorTarget::Redis(t) => validate_host_port(&t.host, t.port),
        MonitorTarget::Sql(t) => {
            validate_url(&t.url, &["http", "https", "libsql", "ws", "wss"])?;
            if t.query.trim().is_empty() {
                return Err(ValidationError::field("query", "must not be empty"));
            }
            Ok(())
        }
        MonitorTarget::Mqtt(t) => {
            validate_host_port(&t.host, t.port)?;
            if t.client_id.is_empty() || t.client_id.len() > 23 {
                return Err(ValidationError::field("client_id", "must be 1-23 characters"));
            }
            Ok(())
        }
        MonitorTarget::Smtp(t) => validate_host_port(&t.host, t.port),
        MonitorTarget::GameServer(t) => validate_host_port(&t.host, t.port),
        MonitorTarget::Radius(t) => {
            validate_host_port(&t.host, t.port)?;
            if t.secret.is_empty() {
                return Err(ValidationError::field("secret", "must not be empty"));
            }
            if t.username.is_empty() {
                return Err(ValidationError::field("username", "must not be empty"));
            }
            if t.password.len() > 128 {
                return Err(ValidationError::field("password", "longer than 128 bytes"));
            }
            Ok(())
        }
    }
}

fn validate_http_request(request: &HttpTarget) -> Result<()> {
    validate_url(&request.url, &["http", "https"])?;
    if request.accepted_status_codes.is_empty() {
        return Err(ValidationError::field("accepted_status_codes", "must list at least one code or range"));
    }
    for raw in &request.accepted_status_codes {
        raw.parse::<StatusRange>()
            .map_err(|e| ValidationError::field("accepted_status_codes", e.to_string()))?;
    }
    if request.method.is_empty() || !request.method.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ValidationError::field("method", format!("{:?} is not an HTTP method", request.method)));
    }
    Ok(())
}

fn validate_url(raw: &str, schemes: &[&str]) -> Result<()> {
    let url = Url::parse(raw).map_err(|e| ValidationError::target(format!("invalid URL {raw:?}: {e}")))?;
    if !schemes.contains(&url.scheme()) {
        return Err(ValidationError::target(format!("unsupported URL scheme {}", url.scheme())));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ValidationError::target(format!("URL {raw:?} has no host")));
    }
    Ok(())
}

fn validate_host(host: &str) -> Result<()> {
    if host.trim().is_empty() {
        return Err(ValidationError::target("host must not be empty"));
    }
    // Hosts are handed to external tools such as ping
    if host.starts_with('-') || host.chars().any(char::is_whitespace) {
        return Err(ValidationError::target(format!("invalid host {host:?}")));
    }
    Ok(())
}

fn validate_host_port(host: &str, port: u16) -> Result<()> {
    validate_host(host)?;
    if port == 0 {
        return Err(ValidationError::target("Port 0 is not valid"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::monitor::{DnsRecordType, DnsTarget, JsonQueryTarget, RadiusTarget};

    fn http(url: &str) -> Monitor {
        Monitor::new("site", MonitorTarget::http(url))
    }

    #[test]
    fn test_validate_check_interval() {
        assert!(validate_check_interval(10).is_ok());
        assert!(validate_check_interval(86400).is_ok());
        assert_eq!(
            validate_check_interval(5),
            Err(ValidationError::OutOfRange { field: "interval_secs", value: 5, min: 10, max: 86400 })
        );
        assert!(validate_check_interval(100000).is_err());
    }

    #[test]
    fn timeout_must_be_shorter_than_interval() {
        assert!(validate_monitor(&http("https://example.com").with_interval(30, 10)).is_ok());
        assert!(validate_monitor(&http("https://example.com").with_interval(30, 30)).is_err());
        assert!(validate_monitor(&http("https://example.com").with_interval(600, 301)).is_err());
        assert!(validate_monitor(&http("https://example.com").with_retries(11, 30)).is_err());
    }

    #[test]
    fn test_validate_http_target() {
        assert!(validate_monitor(&http("https://example.com")).is_ok());
        assert!(validate_monitor(&http("http://example.com:8080/health")).is_ok());
        assert!(validate_monitor(&http("ftp://example.com")).is_err());
        assert!(validate_monitor(&http("not a url")).is_err());

        let mut monitor = http("https://example.com");
        if let MonitorTarget::Http(t) = &mut monitor.target {
            t.accepted_status_codes = vec!["200-2x9".into()];
        }
        assert!(matches!(
            validate_monitor(&monitor),
            Err(ValidationError::InvalidField { field: "accepted_status_codes", .. })
        ));
    }

    #[test]
    fn host_and_port_targets() {
        assert!(validate_target(&MonitorTarget::port("db.internal", 5432)).is_ok());
        assert!(validate_target(&MonitorTarget::port("db.internal", 0)).is_err());
        assert!(validate_target(&MonitorTarget::port("", 80)).is_err());
        assert!(validate_target(&MonitorTarget::port("-oProxyCommand", 80)).is_err());
    }

    #[test]
    fn dns_resolver_must_be_socket_addr() {
        let mut dns = DnsTarget {
            hostname: "example.com".into(),
            record_type: DnsRecordType::A,
            resolver: Some("1.1.1.1:53".into()),
            expected_values: vec![],
        };
        assert!(validate_target(&MonitorTarget::Dns(dns.clone())).is_ok());
        dns.resolver = Some("1.1.1.1".into());
        assert!(validate_target(&MonitorTarget::Dns(dns)).is_err());
    }

    #[test]
    fn json_pointer_and_radius_secret() {
        let query = JsonQueryTarget {
            request: HttpTarget::get("https://example.com/health"),
            json_pointer: "status".into(),
            expected_value: "ok".into(),
        };
        assert!(validate_target(&MonitorTarget::JsonQuery(query)).is_err());

        let radius = RadiusTarget {
            host: "radius.example.com".into(),
            port: 1812,
            secret: String::new(),
            username: "probe".into(),
            password: "pw".into(),
            nas_identifier: "uppe".into(),
        };
        assert_eq!(
            validate_target(&MonitorTarget::Radius(radius)),
            Err(ValidationError::field("secret", "must not be empty"))
        );
    }
}
