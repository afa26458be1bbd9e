use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use super::incident::Severity;

/// Monitor model - a configured, periodically checked target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    pub id: Uuid,
    pub name: String,
    pub target: MonitorTarget,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_interval_secs: u64,
    /// Treat a passing probe as down and a failing one as up
    #[serde(default)]
    pub upside_down: bool,
    /// Public-facing monitors open incidents with a higher default severity
    #[serde(default)]
    pub public_facing: bool,
    /// Explicit incident severity, overrides the public-facing default
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub tags: Vec<Uuid>,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub maintenance_window_ids: Vec<Uuid>,
    #[serde(default)]
    pub notification_provider_ids: Vec<Uuid>,
    #[serde(default)]
    pub oncall_schedule_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Monitor {
    /// Create a new monitor with default timing (60s interval, 10s timeout, no retries)
    pub fn new(name: impl Into<String>, target: MonitorTarget) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            target,
            interval_secs: 60,
            timeout_secs: 10,
            max_retries: 0,
            retry_interval_secs: 60,
            upside_down: false,
            public_facing: false,
            severity: None,
            tags: Vec::new(),
            paused: false,
            maintenance_window_ids: Vec::new(),
            notification_provider_ids: Vec::new(),
            oncall_schedule_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_interval(mut self, interval_secs: u64, timeout_secs: u64) -> Self {
        self.interval_secs = interval_secs;
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_interval_secs: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_interval_secs = retry_interval_secs;
        self
    }

    pub fn with_providers(mut self, provider_ids: Vec<Uuid>) -> Self {
        self.notification_provider_ids = provider_ids;
        self
    }

    pub fn kind(&self) -> MonitorKind {
        self.target.kind()
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    /// Severity used when this monitor opens an incident
    pub fn incident_severity(&self) -> Severity {
        match self.severity {
            Some(severity) => severity,
            None if self.public_facing => Severity::High,
            None => Severity::Medium,
        }
    }
}

/// Type of monitoring check to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorKind {
    Http,
    Keyword,
    JsonQuery,
    Port,
    Ping,
    Dns,
    Docker,
    Redis,
    Sql,
    Mqtt,
    Smtp,
    GameServer,
    Radius,
}

impl MonitorKind {
    pub const ALL: [MonitorKind; 13] = [
        MonitorKind::Http,
        MonitorKind::Keyword,
        MonitorKind::JsonQuery,
        MonitorKind::Port,
        MonitorKind::Ping,
        MonitorKind::Dns,
        MonitorKind::Docker,
        MonitorKind::Redis,
        MonitorKind::Sql,
        MonitorKind::Mqtt,
        MonitorKind::Smtp,
        MonitorKind::GameServer,
        MonitorKind::Radius,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorKind::Http => "http",
            MonitorKind::Keyword => "keyword",
            MonitorKind::JsonQuery => "json_query",
            MonitorKind::Port => "port",
            MonitorKind::Ping => "ping",
            MonitorKind::Dns => "dns",
            MonitorKind::Docker => "docker",
            MonitorKind::Redis => "redis",
            MonitorKind::Sql => "sql",
            MonitorKind::Mqtt => "mqtt",
            MonitorKind::Smtp => "smtp",
            MonitorKind::GameServer => "game_server",
            MonitorKind::Radius => "radius",
        }
    }
}

impl fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target configuration, one strongly typed payload per check kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorTarget {
    Http(HttpTarget),
    Keyword(KeywordTarget),
    JsonQuery(JsonQueryTarget),
    Port(PortTarget),
    Ping(PingTarget),
    Dns(DnsTarget),
    Docker(DockerTarget),
    Redis(RedisTarget),
    Sql(SqlTarget),
    Mqtt(MqttTarget),
    Smtp(SmtpTarget),
    GameServer(GameServerTarget),
    Radius(RadiusTarget),
}

impl MonitorTarget {
    pub fn kind(&self) -> MonitorKind {
        match self {
            MonitorTarget::Http(_) => MonitorKind::Http,
            MonitorTarget::Keyword(_) => MonitorKind::Keyword,
            MonitorTarget::JsonQuery(_) => MonitorKind::JsonQuery,
            MonitorTarget::Port(_) => MonitorKind::Port,
            MonitorTarget::Ping(_) => MonitorKind::Ping,
            MonitorTarget::Dns(_) => MonitorKind::Dns,
            MonitorTarget::Docker(_) => MonitorKind::Docker,
            MonitorTarget::Redis(_) => MonitorKind::Redis,
            MonitorTarget::Sql(_) => MonitorKind::Sql,
            MonitorTarget::Mqtt(_) => MonitorKind::Mqtt,
            MonitorTarget::Smtp(_) => MonitorKind::Smtp,
            MonitorTarget::GameServer(_) => MonitorKind::GameServer,
            MonitorTarget::Radius(_) => MonitorKind::Radius,
        }
    }

    pub fn http(url: impl Into<String>) -> Self {
        MonitorTarget::Http(HttpTarget::get(url))
    }

    pub fn port(host: impl Into<String>, port: u16) -> Self {
        MonitorTarget::Port(PortTarget { host: host.into(), port })
    }

    /// Short human-readable description used in alerts and logs
    pub fn describe(&self) -> String {
        match self {
            MonitorTarget::Http(t) => t.url.clone(),
            MonitorTarget::Keyword(t) => format!("{} (keyword \"{}\")", t.request.url, t.keyword),
            MonitorTarget::JsonQuery(t) => format!("{} ({})", t.request.url, t.json_pointer),
            MonitorTarget::Port(t) => format!("{}:{}", t.host, t.port),
            MonitorTarget::Ping(t) => t.host.clone(),
            MonitorTarget::Dns(t) => format!("{} {}", t.hostname, t.record_type),
            MonitorTarget::Docker(t) => format!("{} @ {}", t.container, t.engine_url),
            MonitorTarget::Redis(t) => format!("redis://{}:{}", t.host, t.port),
            MonitorTarget::Sql(t) => t.url.clone(),
            MonitorTarget::Mqtt(t) => format!("mqtt://{}:{}", t.host, t.port),
            MonitorTarget::Smtp(t) => format!("smtp://{}:{}", t.host, t.port),
            MonitorTarget::GameServer(t) => format!("{}:{}", t.host, t.port),
            MonitorTarget::Radius(t) => format!("radius://{}:{}", t.host, t.port),
        }
    }
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_accepted_status_codes() -> Vec<String> {
    vec!["200-299".to_string()]
}

fn default_max_redirects() -> u8 {
    10
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// HTTP/HTTPS request and its accepted status codes (e.g. `"200-299"`, `"301"`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpTarget {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default = "default_accepted_status_codes")]
    pub accepted_status_codes: Vec<String>,
    #[serde(default)]
    pub basic_auth: Option<BasicAuth>,
    #[serde(default)]
    pub ignore_tls: bool,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u8,
}

impl HttpTarget {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            headers: BTreeMap::new(),
            body: None,
            accepted_status_codes: default_accepted_status_codes(),
            basic_auth: None,
            ignore_tls: false,
            max_redirects: default_max_redirects(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordTarget {
    #[serde(flatten)]
    pub request: HttpTarget,
    pub keyword: String,
    #[serde(default)]
    pub case_sensitive: bool,
    /// Succeed when the keyword is absent
    #[serde(default)]
    pub invert: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonQueryTarget {
    #[serde(flatten)]
    pub request: HttpTarget,
    /// RFC 6901 pointer into the response body, e.g. `/status/database`
    pub json_pointer: String,
    pub expected_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortTarget {
    pub host: String,
    pub port: u16,
}

fn default_packet_count() -> u8 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingTarget {
    pub host: String,
    #[serde(default = "default_packet_count")]
    pub packet_count: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DnsRecordType {
    A,
    Aaaa,
    Cname,
    Mx,
    Ns,
    Txt,
    Srv,
    Soa,
    Caa,
}

impl fmt::Display for DnsRecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DnsRecordType::A => "A",
            DnsRecordType::Aaaa => "AAAA",
            DnsRecordType::Cname => "CNAME",
            DnsRecordType::Mx => "MX",
            DnsRecordType::Ns => "NS",
            DnsRecordType::Txt => "TXT",
            DnsRecordType::Srv => "SRV",
            DnsRecordType::Soa => "SOA",
            DnsRecordType::Caa => "CAA",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsTarget {
    pub hostname: String,
    pub record_type: DnsRecordType,
    /// Resolver as `ip:port`; the system resolver is used when absent
    #[serde(default)]
    pub resolver: Option<String>,
    /// Every listed value must appear in the answer set
    #[serde(default)]
    pub expected_values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerTarget {
    /// Docker Engine API base URL, e.g. `http://docker-host:2375`
    pub engine_url: String,
    pub container: String,
}

fn default_redis_port() -> u16 {
    6379
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisTarget {
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_sql_query() -> String {
    "SELECT 1".to_string()
}

/// libsql / sqld database reached over its HTTP protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlTarget {
    pub url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_sql_query")]
    pub query: String,
    /// Expected value of the first column of the first row
    #[serde(default)]
    pub expected_value: Option<String>,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_client_id() -> String {
    "uppe-monitor".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttTarget {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_mqtt_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_smtp_port() -> u16 {
    25
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpTarget {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
}

/// Source engine (A2S) game server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameServerTarget {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub min_players: Option<u8>,
}

fn default_radius_port() -> u16 {
    1812
}

fn default_nas_identifier() -> String {
    "uppe".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadiusTarget {
    pub host: String,
    #[serde(default = "default_radius_port")]
    pub port: u16,
    pub secret: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_nas_identifier")]
    pub nas_identifier: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_serializes_with_type_tag() {
        let target = MonitorTarget::port("db.internal", 5432);
        let value = serde_json::to_value(&target).unwrap();
        assert_eq!(value["type"], "port");
        assert_eq!(value["port"], 5432);

        let keyword: MonitorTarget = serde_json::from_value(serde_json::json!({
            "type": "keyword",
            "url": "https://status.example.com",
            "keyword": "operational"
        }))
        .unwrap();
        match keyword {
            MonitorTarget::Keyword(k) => {
                assert_eq!(k.request.method, "GET");
                assert_eq!(k.request.accepted_status_codes, vec!["200-299"]);
                assert!(!k.invert);
            }
            other => panic!("unexpected target {other:?}"),
        }
    }

    #[test]
    fn incident_severity_defaults() {
        let mut monitor = Monitor::new("api", MonitorTarget::http("https://api.example.com"));
        assert_eq!(monitor.incident_severity(), Severity::Medium);

        monitor.public_facing = true;
        assert_eq!(monitor.incident_severity(), Severity::High);

        monitor.severity = Some(Severity::Critical);
        assert_eq!(monitor.incident_severity(), Severity::Critical);
    }
}
