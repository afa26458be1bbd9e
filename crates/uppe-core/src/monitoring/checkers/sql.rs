use anyhow::{Context, Result, bail};
use std::time::{Duration, Instant};

use crate::model::MonitorTarget;
use crate::monitoring::checker::{Checker, Probe};

/// libsql / sqld connectivity checker
pub struct SqlChecker;

/// Render a cell the way operators write expected values
pub fn render_value(value: &libsql::Value) -> String {
    match value {
        libsql::Value::Null => "NULL".to_string(),
        libsql::Value::Integer(i) => i.to_string(),
        libsql::Value::Real(r) => r.to_string(),
        libsql::Value::Text(t) => t.clone(),
        libsql::Value::Blob(b) => hex::encode(b),
    }
}

#[async_trait::async_trait]
impl Checker for SqlChecker {
    async fn check(&self, target: &MonitorTarget, _timeout: Duration) -> Result<Probe> {
        let MonitorTarget::Sql(sql) = target else {
            bail!("sql checker cannot probe {} targets", target.kind());
        };

        let start = Instant::now();
        let database = libsql::Builder::new_remote(sql.url.clone(), sql.auth_token.clone().unwrap_or_default())
            .build()
            .await
            .context("failed to open database")?;
        let conn = database.connect().context("failed to connect")?;
        let mut rows = conn.query(&sql.query, ()).await.context("query failed")?;
        let first = rows.next().await.context("failed to read result")?;
        let latency = start.elapsed().as_millis() as u64;

        let Some(expected) = &sql.expected_value else {
            return Ok(Probe::new(latency));
        };
        let Some(row) = first else {
            bail!("query returned no rows, expected {:?}", expected);
        };
        let actual = render_value(&row.get_value(0)?);
        if &actual != expected {
            bail!("query returned {:?}, expected {:?}", actual, expected);
        }
        Ok(Probe::new(latency).with_message(actual))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_cells() {
        assert_eq!(render_value(&libsql::Value::Integer(1)), "1");
        assert_eq!(render_value(&libsql::Value::Text("ok".into())), "ok");
        assert_eq!(render_value(&libsql::Value::Null), "NULL");
        assert_eq!(render_value(&libsql::Value::Blob(vec![0xde, 0xad])), "dead");
    }
}
