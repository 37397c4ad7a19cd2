//! Confirmation-workflow state for actions the chatbot layer stages before
//! executing them (e.g. "deactivate employee #123 — confirm?").
//!
//! The workflow that drives these transitions — the approval UI, the expiry
//! sweeper — lives entirely outside the tunnel core and is treated as an
//! external collaborator. This module only carries the state machine and its
//! invariant so the core's types stay consistent with what callers rely on
//! for confirmation routing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingActionStatus {
    Pending,
    Approved,
    Rejected,
    Executed,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAction {
    pub action_id: String,
    pub status: PendingActionStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingAction {
    pub fn new(action_id: impl Into<String>, created_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            action_id: action_id.into(),
            status: PendingActionStatus::Pending,
            created_at,
            expires_at,
        }
    }

    /// Moves the action to `next`, rejecting any transition that isn't one
    /// of `pending -> {approved, rejected, expired}` or `approved ->
    /// executed`. Returns the prior status on success.
    pub fn transition(&mut self, next: PendingActionStatus) -> Result<PendingActionStatus, String> {
        use PendingActionStatus::*;
        let allowed = matches!(
            (self.status, next),
            (Pending, Approved) | (Pending, Rejected) | (Pending, Expired) | (Approved, Executed)
        );
        if !allowed {
            return Err(format!("illegal transition {:?} -> {next:?}", self.status));
        }
        let prior = self.status;
        self.status = next;
        Ok(prior)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, PendingActionStatus::Pending) && now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn action() -> PendingAction {
        let now = Utc::now();
        PendingAction::new("act-1", now, now + Duration::minutes(5))
    }

    #[test]
    fn pending_approves_then_executes() {
        let mut action = action();
        action.transition(PendingActionStatus::Approved).unwrap();
        action.transition(PendingActionStatus::Executed).unwrap();
        assert_eq!(action.status, PendingActionStatus::Executed);
    }

    #[test]
    fn rejected_cannot_later_execute() {
        let mut action = action();
        action.transition(PendingActionStatus::Rejected).unwrap();
        assert!(action.transition(PendingActionStatus::Executed).is_err());
    }

    #[test]
    fn expiry_is_time_based_and_only_from_pending() {
        let now = Utc::now();
        let action = PendingAction::new("act-2", now, now - Duration::seconds(1));
        assert!(action.is_expired(Utc::now()));
    }
}
