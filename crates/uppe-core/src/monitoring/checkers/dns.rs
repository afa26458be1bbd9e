use anyhow::{Context, Result, bail};
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::{Resolver, TokioResolver};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::model::MonitorTarget;
use crate::model::monitor::DnsRecordType;
use crate::monitoring::checker::{Checker, Probe};

/// DNS record checker
pub struct DnsChecker;

fn record_type(kind: DnsRecordType) -> RecordType {
    match kind {
        DnsRecordType::A => RecordType::A,
        DnsRecordType::Aaaa => RecordType::AAAA,
        DnsRecordType::Cname => RecordType::CNAME,
        DnsRecordType::Mx => RecordType::MX,
        DnsRecordType::Ns => RecordType::NS,
        DnsRecordType::Txt => RecordType::TXT,
        DnsRecordType::Srv => RecordType::SRV,
        DnsRecordType::Soa => RecordType::SOA,
        DnsRecordType::Caa => RecordType::CAA,
    }
}

fn normalize(value: &str) -> String {
    value.trim().trim_end_matches('.').trim_matches('"').to_lowercase()
}

/// Expected values missing from the answer set
pub fn missing_values(answers: &[String], expected: &[String]) -> Vec<String> {
    let answers: Vec<String> = answers.iter().map(|a| normalize(a)).collect();
    expected.iter().filter(|e| !answers.contains(&normalize(e))).cloned().collect()
}

fn build_resolver(resolver: Option<&str>) -> Result<TokioResolver> {
    match resolver {
        None => Ok(TokioResolver::builder_tokio().context("Failed to create DNS resolver")?.build()),
        Some(addr) => {
            let addr: SocketAddr = addr.parse().with_context(|| format!("invalid resolver address {addr}"))?;
            let group = NameServerConfigGroup::from_ips_clear(&[addr.ip()], addr.port(), true);
            let config = ResolverConfig::from_parts(None, vec![], group);
            Ok(Resolver::builder_with_config(config, TokioConnectionProvider::default()).build())
        }
    }
}

#[async_trait::async_trait]
impl Checker for DnsChecker {
    async fn check(&self, target: &MonitorTarget, _timeout: Duration) -> Result<Probe> {
        let MonitorTarget::Dns(dns) = target else {
            bail!("DNS checker cannot probe {} targets", target.kind());
        };

        let resolver = build_resolver(dns.resolver.as_deref())?;
        let start = Instant::now();
        let lookup = resolver
            .lookup(dns.hostname.as_str(), record_type(dns.record_type))
            .await
            .with_context(|| format!("{} lookup for {} failed", dns.record_type, dns.hostname))?;
        let latency = start.elapsed().as_millis() as u64;

        let answers: Vec<String> = lookup.iter().map(|rdata| rdata.to_string()).collect();
        if answers.is_empty() {
            bail!("no {} records for {}", dns.record_type, dns.hostname);
        }

        let missing = missing_values(&answers, &dns.expected_values);
        if !missing.is_empty() {
            bail!("expected {:?} not in answers {:?}", missing, answers);
        }

        Ok(Probe::new(latency).with_message(answers.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_values_compare_loosely() {
        let answers = vec!["10 Mail.Example.com.".to_string(), "\"v=spf1 -all\"".to_string()];
        assert!(missing_values(&answers, &["10 mail.example.com".into()]).is_empty());
        assert!(missing_values(&answers, &["v=spf1 -all".into()]).is_empty());
        assert_eq!(missing_values(&answers, &["20 backup.example.com".into()]).len(), 1);
        assert!(missing_values(&answers, &[]).is_empty());
    }
}
