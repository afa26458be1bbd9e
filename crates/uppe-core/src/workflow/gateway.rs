use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::model::TicketPriority;

/// Write-back channel into the ticketing system that owns the tickets
#[async_trait]
pub trait TicketGateway: Send + Sync {
    async fn change_priority(&self, ticket_id: &str, priority: TicketPriority) -> Result<()>;

    async fn escalate(&self, ticket_id: &str, to: &str) -> Result<()>;
}

/// Gateway for deployments without a ticketing backend; only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingTicketGateway;

#[async_trait]
impl TicketGateway for LoggingTicketGateway {
    async fn change_priority(&self, ticket_id: &str, priority: TicketPriority) -> Result<()> {
        info!(ticket_id, %priority, "ticket priority change requested");
        Ok(())
    }

    async fn escalate(&self, ticket_id: &str, to: &str) -> Result<()> {
        info!(ticket_id, to, "ticket escalation requested");
        Ok(())
    }
}
