use gloria_core::{ApprovalId, UserId};
use gloria_workflow::{ApprovalRequest, ApprovalStatus};

use super::{AggregateStore, StoreResult};

/// Approval requests by id.
pub type ApprovalStore = AggregateStore<ApprovalRequest>;

impl ApprovalStore {
    pub fn in_memory() -> Self {
        AggregateStore::new(ApprovalRequest::empty)
    }

    /// Requests matching the filters, newest first.
    pub fn search(&self, involving: Option<UserId>, status: Option<ApprovalStatus>) -> StoreResult<Vec<ApprovalRequest>> {
        let mut out: Vec<ApprovalRequest> = self
            .read()?
            .values()
            .filter(|r| involving.is_none_or(|u| r.involves(u)))
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(out)
    }

    /// Pending requests waiting on `approver`.
    pub fn awaiting(&self, approver: UserId) -> StoreResult<Vec<ApprovalId>> {
        Ok(self
            .read()?
            .values()
            .filter(|r| r.current_approver() == Some(approver))
            .map(|r| r.id)
            .collect())
    }
}
