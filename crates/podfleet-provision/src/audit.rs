//! Best-effort audit recording.
//!
//! Audit writes run inside their own error boundary: a failed or slow
//! write is logged and dropped, never surfaced to the pipeline step that
//! triggered it.

use std::time::Duration;

use podfleet_core::models::audit::{AuditAction, AuditOutcome, CreateAuditEvent};
use podfleet_core::repository::{AuditRepository, Store};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::validation::Rejection;

/// Who is acting and on what, shared by every event of one operation.
#[derive(Debug, Clone, Copy)]
pub struct AuditScope {
    pub tenant_id: Uuid,
    pub actor_user_id: Option<Uuid>,
    pub pod_id: Option<Uuid>,
}

impl AuditScope {
    pub fn system(tenant_id: Uuid) -> Self {
        Self {
            tenant_id,
            actor_user_id: None,
            pod_id: None,
        }
    }

    pub fn with_pod(mut self, pod_id: Uuid) -> Self {
        self.pod_id = Some(pod_id);
        self
    }

    pub fn with_actor(mut self, actor_user_id: Option<Uuid>) -> Self {
        self.actor_user_id = actor_user_id;
        self
    }

    /// Event skeleton carrying this scope's actor and pod reference.
    pub fn event(&self, action: AuditAction, outcome: AuditOutcome) -> CreateAuditEvent {
        let event = CreateAuditEvent::new(self.tenant_id, action, outcome).actor(self.actor_user_id);
        match self.pod_id {
            Some(pod_id) => event.resource("pod", pod_id),
            None => event,
        }
    }
}

#[derive(Clone)]
pub struct AuditRecorder<S: Store> {
    store: S,
    timeout: Duration,
}

impl<S: Store> AuditRecorder<S> {
    pub fn new(store: S, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Append `event`. Never fails.
    pub async fn record(&self, event: CreateAuditEvent) {
        let action = event.action.as_str();
        let tenant_id = event.tenant_id;
        match tokio::time::timeout(self.timeout, self.store.audit().append(event)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!(%tenant_id, action, error = %e, "Audit write failed");
            }
            Err(_) => {
                warn!(%tenant_id, action, "Audit write timed out");
            }
        }
    }

    pub async fn transition(
        &self,
        scope: &AuditScope,
        action: AuditAction,
        metadata: serde_json::Value,
    ) {
        self.record(scope.event(action, AuditOutcome::Success).metadata(metadata))
            .await;
    }

    pub async fn failure(&self, scope: &AuditScope, action: AuditAction, error: &str) {
        self.record(
            scope
                .event(action, AuditOutcome::Failure)
                .metadata(json!({ "error": error })),
        )
        .await;
    }

    /// Record a refused input. `context` names the operation that was
    /// refused (a script name or a job type).
    pub async fn input_rejected(&self, scope: &AuditScope, rejection: &Rejection, context: &str) {
        warn!(
            tenant_id = %scope.tenant_id,
            field = rejection.field,
            reason = rejection.reason.as_str(),
            context,
            "Rejected unsafe input"
        );
        self.record(
            scope
                .event(AuditAction::InputRejected, AuditOutcome::Denied)
                .metadata(json!({
                    "field": rejection.field,
                    "reason": rejection.reason.as_str(),
                    "context": context,
                })),
        )
        .await;
    }
}
