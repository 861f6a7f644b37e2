// Database-backed InterruptStore
//
// Resolution goes through a guarded UPDATE (WHERE status = 'pending'), so
// two resolvers racing for the same record cannot both win: the loser's
// update affects zero rows and surfaces as a resolution error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ensemble_core::{AgentError, AgentInterrupt, InterruptStore, Result};

use crate::models::InterruptRow;
use crate::repositories::Database;

#[derive(Clone)]
pub struct DbInterruptStore {
    db: Database,
}

impl DbInterruptStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn to_row(interrupt: &AgentInterrupt) -> InterruptRow {
    InterruptRow {
        id: interrupt.id.clone(),
        session_id: interrupt.session_id.clone(),
        workflow_id: interrupt.workflow_id.clone(),
        step_name: interrupt.step_name.clone(),
        agent_name: interrupt.agent_name.clone(),
        kind: interrupt.kind.to_string(),
        reason: interrupt.reason.clone(),
        data: interrupt.data.clone(),
        status: interrupt.status.to_string(),
        modifications: interrupt.modifications.clone(),
        rejection_reason: interrupt.rejection_reason.clone(),
        user_response: interrupt.user_response.clone(),
        resolved_by: interrupt.resolved_by.clone(),
        resolved_at: interrupt.resolved_at,
        expires_at: interrupt.expires_at,
        created_at: interrupt.created_at,
    }
}

#[async_trait]
impl InterruptStore for DbInterruptStore {
    async fn create(&self, interrupt: AgentInterrupt) -> Result<AgentInterrupt> {
        let row = self
            .db
            .create_interrupt(to_row(&interrupt))
            .await
            .map_err(|e| AgentError::store(e.to_string()))?;
        Ok(row.into_interrupt())
    }

    async fn get(&self, id: &str) -> Result<Option<AgentInterrupt>> {
        let row = self
            .db
            .get_interrupt(id)
            .await
            .map_err(|e| AgentError::store(e.to_string()))?;
        Ok(row.map(InterruptRow::into_interrupt))
    }

    async fn update(&self, interrupt: &AgentInterrupt) -> Result<()> {
        let resolved = self
            .db
            .resolve_interrupt(&to_row(interrupt))
            .await
            .map_err(|e| AgentError::store(e.to_string()))?;
        if !resolved {
            return Err(AgentError::InterruptResolution(format!(
                "interrupt {} is no longer pending",
                interrupt.id
            )));
        }
        Ok(())
    }

    async fn list_pending(&self, session_id: &str) -> Result<Vec<AgentInterrupt>> {
        let rows = self
            .db
            .list_pending_interrupts(session_id)
            .await
            .map_err(|e| AgentError::store(e.to_string()))?;
        Ok(rows.into_iter().map(InterruptRow::into_interrupt).collect())
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired = self
            .db
            .expire_due_interrupts(now)
            .await
            .map_err(|e| AgentError::store(e.to_string()))?;
        Ok(expired as usize)
    }
}
