// Interrupt subsystem - durable "pause for human approval" records
//
// A tool (or agent logic) raises an InterruptSignal; the run loop catches it
// at the loop boundary, persists a pending AgentInterrupt, and ends the run
// with an Interrupted outcome. The run never blocks waiting: resumption is
// the caller's job (re-invoke with the original input plus the resolution
// data).
//
// State machine: pending -> approved | rejected | cancelled (explicit human
// action), or pending -> expired (time-based sweep against expires_at).
// Terminal states never transition. Expiry uses an explicit sweep
// (`InterruptStore::expire_due`) rather than check-on-read, so reads stay
// pure and the sweep is observable.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use crate::error::{AgentError, Result};
use crate::events::{EventSink, ExecutionEvent};

/// What kind of human interaction an interrupt requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptKind {
    Approval,
    Confirmation,
    Input,
    Feedback,
}

impl std::fmt::Display for InterruptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterruptKind::Approval => write!(f, "approval"),
            InterruptKind::Confirmation => write!(f, "confirmation"),
            InterruptKind::Input => write!(f, "input"),
            InterruptKind::Feedback => write!(f, "feedback"),
        }
    }
}

/// Interrupt lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Cancelled,
}

impl InterruptStatus {
    /// Only pending interrupts may transition
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InterruptStatus::Pending)
    }
}

impl std::fmt::Display for InterruptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterruptStatus::Pending => write!(f, "pending"),
            InterruptStatus::Approved => write!(f, "approved"),
            InterruptStatus::Rejected => write!(f, "rejected"),
            InterruptStatus::Expired => write!(f, "expired"),
            InterruptStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The control-flow payload a tool raises to suspend a run.
/// Carried inside `AgentError::Interrupt` until the loop boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptSignal {
    pub kind: InterruptKind,
    pub reason: String,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl InterruptSignal {
    pub fn approval(reason: impl Into<String>, data: Value) -> Self {
        Self {
            kind: InterruptKind::Approval,
            reason: reason.into(),
            data,
            expires_at: None,
        }
    }

    pub fn input(reason: impl Into<String>, data: Value) -> Self {
        Self {
            kind: InterruptKind::Input,
            reason: reason.into(),
            data,
            expires_at: None,
        }
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Wrap into the error carrier tools return to suspend the run
    pub fn into_error(self) -> AgentError {
        AgentError::Interrupt(self)
    }
}

/// Persisted interrupt record. After resolution it is an immutable audit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInterrupt {
    /// ULID identity (sortable, string-stable)
    pub id: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    pub agent_name: String,
    pub kind: InterruptKind,
    pub reason: String,
    pub data: Value,
    pub status: InterruptStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modifications: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AgentInterrupt {
    /// Create a new pending record from a raised signal
    pub fn pending(
        signal: &InterruptSignal,
        session_id: impl Into<String>,
        agent_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Ulid::new().to_string(),
            session_id: session_id.into(),
            workflow_id: None,
            step_name: None,
            agent_name: agent_name.into(),
            kind: signal.kind,
            reason: signal.reason.clone(),
            data: signal.data.clone(),
            status: InterruptStatus::Pending,
            modifications: None,
            rejection_reason: None,
            user_response: None,
            resolved_by: None,
            resolved_at: None,
            expires_at: signal.expires_at,
            created_at: Utc::now(),
        }
    }

    fn ensure_pending(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(AgentError::InterruptResolution(format!(
                "interrupt {} is {}, only pending interrupts may be resolved",
                self.id, self.status
            )));
        }
        Ok(())
    }

    /// Transition pending -> approved, storing resolver metadata
    pub fn approve(&mut self, modifications: Option<Value>, resolved_by: Option<String>) -> Result<()> {
        self.ensure_pending()?;
        self.status = InterruptStatus::Approved;
        self.modifications = modifications;
        self.resolved_by = resolved_by;
        self.resolved_at = Some(Utc::now());
        Ok(())
    }

    /// Transition pending -> rejected, storing the rejection reason
    pub fn reject(
        &mut self,
        rejection_reason: impl Into<String>,
        resolved_by: Option<String>,
    ) -> Result<()> {
        self.ensure_pending()?;
        self.status = InterruptStatus::Rejected;
        self.rejection_reason = Some(rejection_reason.into());
        self.resolved_by = resolved_by;
        self.resolved_at = Some(Utc::now());
        Ok(())
    }

    /// Transition pending -> cancelled
    pub fn cancel(&mut self, resolved_by: Option<String>) -> Result<()> {
        self.ensure_pending()?;
        self.status = InterruptStatus::Cancelled;
        self.resolved_by = resolved_by;
        self.resolved_at = Some(Utc::now());
        Ok(())
    }

    /// Transition pending -> expired when past expires_at
    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<bool> {
        self.ensure_pending()?;
        match self.expires_at {
            Some(at) if at <= now => {
                self.status = InterruptStatus::Expired;
                self.resolved_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ============================================================================
// InterruptStore - persistence collaborator boundary
// ============================================================================

/// Row-oriented store for interrupt records
#[async_trait]
pub trait InterruptStore: Send + Sync {
    /// Persist a new record (created in pending state)
    async fn create(&self, interrupt: AgentInterrupt) -> Result<AgentInterrupt>;

    /// Fetch a record by id
    async fn get(&self, id: &str) -> Result<Option<AgentInterrupt>>;

    /// Persist an updated record (resolution metadata + status)
    async fn update(&self, interrupt: &AgentInterrupt) -> Result<()>;

    /// All pending records for a session
    async fn list_pending(&self, session_id: &str) -> Result<Vec<AgentInterrupt>>;

    /// Sweep: transition every pending record past `expires_at` to expired.
    /// Returns the number of records expired.
    async fn expire_due(&self, now: DateTime<Utc>) -> Result<usize>;
}

// ============================================================================
// InterruptResolver - the human-action entry point
// ============================================================================

/// Applies resolution actions against the store and emits trace events.
/// Only pending interrupts may be resolved; anything else is a reported
/// error, never silently ignored.
pub struct InterruptResolver {
    store: Arc<dyn InterruptStore>,
    events: Arc<dyn EventSink>,
}

impl InterruptResolver {
    pub fn new(store: Arc<dyn InterruptStore>, events: Arc<dyn EventSink>) -> Self {
        Self { store, events }
    }

    async fn load(&self, id: &str) -> Result<AgentInterrupt> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| AgentError::InterruptResolution(format!("interrupt {} not found", id)))
    }

    /// Approve a pending interrupt
    pub async fn approve(
        &self,
        id: &str,
        modifications: Option<Value>,
        resolved_by: Option<String>,
    ) -> Result<AgentInterrupt> {
        let mut interrupt = self.load(id).await?;
        interrupt.approve(modifications, resolved_by.clone())?;
        self.store.update(&interrupt).await?;
        self.events
            .emit(ExecutionEvent::interrupt_approved(id, resolved_by))
            .await;
        Ok(interrupt)
    }

    /// Reject a pending interrupt
    pub async fn reject(
        &self,
        id: &str,
        rejection_reason: impl Into<String>,
        resolved_by: Option<String>,
    ) -> Result<AgentInterrupt> {
        let mut interrupt = self.load(id).await?;
        interrupt.reject(rejection_reason, resolved_by.clone())?;
        self.store.update(&interrupt).await?;
        self.events
            .emit(ExecutionEvent::interrupt_rejected(id, resolved_by))
            .await;
        Ok(interrupt)
    }

    /// Cancel a pending interrupt
    pub async fn cancel(&self, id: &str, resolved_by: Option<String>) -> Result<AgentInterrupt> {
        let mut interrupt = self.load(id).await?;
        interrupt.cancel(resolved_by)?;
        self.store.update(&interrupt).await?;
        Ok(interrupt)
    }

    /// Run the expiry sweep now
    pub async fn expire_due(&self) -> Result<usize> {
        self.store.expire_due(Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pending() -> AgentInterrupt {
        let signal = InterruptSignal::approval("requires approval", json!({"amount": 500}));
        AgentInterrupt::pending(&signal, "s1", "treasurer")
    }

    #[test]
    fn test_approve_sets_terminal_status_and_metadata() {
        let mut interrupt = pending();
        interrupt
            .approve(Some(json!({"amount": 400})), Some("alice".into()))
            .unwrap();
        assert_eq!(interrupt.status, InterruptStatus::Approved);
        assert_eq!(interrupt.modifications, Some(json!({"amount": 400})));
        assert_eq!(interrupt.resolved_by.as_deref(), Some("alice"));
        assert!(interrupt.resolved_at.is_some());
    }

    #[test]
    fn test_reject_stores_reason() {
        let mut interrupt = pending();
        interrupt.reject("too expensive", None).unwrap();
        assert_eq!(interrupt.status, InterruptStatus::Rejected);
        assert_eq!(interrupt.rejection_reason.as_deref(), Some("too expensive"));
    }

    #[test]
    fn test_resolving_non_pending_is_an_error() {
        let mut interrupt = pending();
        interrupt.approve(None, None).unwrap();
        let err = interrupt.reject("late", None).unwrap_err();
        assert!(matches!(err, AgentError::InterruptResolution(_)));

        let err = interrupt.approve(None, None).unwrap_err();
        assert!(matches!(err, AgentError::InterruptResolution(_)));
    }

    #[test]
    fn test_expire_respects_deadline() {
        let now = Utc::now();

        // No deadline: never expires
        let mut interrupt = pending();
        assert!(!interrupt.expire(now).unwrap());
        assert_eq!(interrupt.status, InterruptStatus::Pending);

        // Past deadline: expires
        let signal = InterruptSignal::approval("stale", json!({}))
            .expiring_at(now - chrono::Duration::minutes(1));
        let mut interrupt = AgentInterrupt::pending(&signal, "s1", "treasurer");
        assert!(interrupt.expire(now).unwrap());
        assert_eq!(interrupt.status, InterruptStatus::Expired);
    }

    #[test]
    fn test_pending_record_carries_signal_payload() {
        let interrupt = pending();
        assert_eq!(interrupt.status, InterruptStatus::Pending);
        assert_eq!(interrupt.reason, "requires approval");
        assert_eq!(interrupt.data["amount"], 500);
        assert_eq!(interrupt.kind, InterruptKind::Approval);
        // ULID ids are 26 chars
        assert_eq!(interrupt.id.len(), 26);
    }
}
