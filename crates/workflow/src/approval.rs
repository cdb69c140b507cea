use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gloria_core::{Aggregate, AggregateRoot, ApprovalId, DomainError, DomainEvent, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    Leave,
    Expense,
    Hiring,
    RoleChange,
    ProfileChange,
    Other,
}

impl ApprovalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalKind::Leave => "leave",
            ApprovalKind::Expense => "expense",
            ApprovalKind::Hiring => "hiring",
            ApprovalKind::RoleChange => "role_change",
            ApprovalKind::ProfileChange => "profile_change",
            ApprovalKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl ApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDecision {
    pub step: usize,
    pub approver: UserId,
    pub outcome: StepOutcome,
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// Aggregate root: a multi-step approval request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    pub kind: ApprovalKind,
    pub title: String,
    pub requester: UserId,
    pub approvers: Vec<UserId>,
    /// Index into `approvers` of the step awaiting a decision.
    pub current_step: usize,
    pub status: ApprovalStatus,
    pub payload: serde_json::Value,
    pub decisions: Vec<StepDecision>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
    #[serde(skip)]
    created: bool,
}

impl ApprovalRequest {
    pub fn empty(id: ApprovalId) -> Self {
        Self {
            id,
            kind: ApprovalKind::Other,
            title: String::new(),
            requester: UserId::default(),
            approvers: Vec::new(),
            current_step: 0,
            status: ApprovalStatus::Pending,
            payload: serde_json::Value::Null,
            decisions: Vec::new(),
            created_at: DateTime::<Utc>::MIN_UTC,
            updated_at: DateTime::<Utc>::MIN_UTC,
            version: 0,
            created: false,
        }
    }

    /// Approver of the step awaiting a decision, while pending.
    pub fn current_approver(&self) -> Option<UserId> {
        if self.status != ApprovalStatus::Pending {
            return None;
        }
        self.approvers.get(self.current_step).copied()
    }

    /// Whether `user` takes part in this request (requester or approver).
    pub fn involves(&self, user: UserId) -> bool {
        self.requester == user || self.approvers.contains(&user)
    }

    fn ensure_open(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("approval {}", self.id)));
        }
        if self.status.is_terminal() {
            return Err(DomainError::invariant(format!(
                "approval request is already {}",
                self.status.as_str()
            )));
        }
        Ok(())
    }

    fn ensure_current_approver(&self, actor: UserId) -> Result<usize, DomainError> {
        match self.current_approver() {
            Some(approver) if approver == actor => Ok(self.current_step),
            _ => Err(DomainError::unauthorized("only the current step's approver can decide")),
        }
    }
}

impl AggregateRoot for ApprovalRequest {
    type Id = ApprovalId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub approval_id: ApprovalId,
    pub kind: ApprovalKind,
    pub title: String,
    pub requester: UserId,
    pub approvers: Vec<UserId>,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveStep {
    pub actor: UserId,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectRequest {
    pub actor: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ApprovalCommand {
    Submit(SubmitRequest),
    Approve(ApproveStep),
    Reject(RejectRequest),
    Cancel(CancelRequest),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApprovalEvent {
    Submitted {
        approval_id: ApprovalId,
        kind: ApprovalKind,
        title: String,
        requester: UserId,
        approvers: Vec<UserId>,
        payload: serde_json::Value,
        occurred_at: DateTime<Utc>,
    },
    StepApproved {
        approval_id: ApprovalId,
        step: usize,
        approver: UserId,
        comment: Option<String>,
        next_approver: Option<UserId>,
        occurred_at: DateTime<Utc>,
    },
    Approved {
        approval_id: ApprovalId,
        requester: UserId,
        occurred_at: DateTime<Utc>,
    },
    Rejected {
        approval_id: ApprovalId,
        step: usize,
        approver: UserId,
        requester: UserId,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    Cancelled {
        approval_id: ApprovalId,
        actor: UserId,
        /// Approver who was waiting on the request, if any.
        pending_approver: Option<UserId>,
        occurred_at: DateTime<Utc>,
    },
}

impl ApprovalEvent {
    /// Users to notify about this event.
    pub fn recipients(&self) -> Vec<UserId> {
        match self {
            ApprovalEvent::Submitted { approvers, .. } => approvers.first().copied().into_iter().collect(),
            ApprovalEvent::StepApproved { next_approver, .. } => next_approver.iter().copied().collect(),
            ApprovalEvent::Approved { requester, .. } | ApprovalEvent::Rejected { requester, .. } => {
                vec![*requester]
            }
            ApprovalEvent::Cancelled { pending_approver, .. } => pending_approver.iter().copied().collect(),
        }
    }
}

impl DomainEvent for ApprovalEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ApprovalEvent::Submitted { .. } => "approval.submitted",
            ApprovalEvent::StepApproved { .. } => "approval.step_approved",
            ApprovalEvent::Approved { .. } => "approval.approved",
            ApprovalEvent::Rejected { .. } => "approval.rejected",
            ApprovalEvent::Cancelled { .. } => "approval.cancelled",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ApprovalEvent::Submitted { occurred_at, .. }
            | ApprovalEvent::StepApproved { occurred_at, .. }
            | ApprovalEvent::Approved { occurred_at, .. }
            | ApprovalEvent::Rejected { occurred_at, .. }
            | ApprovalEvent::Cancelled { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for ApprovalRequest {
    type Command = ApprovalCommand;
    type Event = ApprovalEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ApprovalEvent::Submitted {
                approval_id,
                kind,
                title,
                requester,
                approvers,
                payload,
                occurred_at,
            } => {
                self.id = *approval_id;
                self.kind = *kind;
                self.title = title.clone();
                self.requester = *requester;
                self.approvers = approvers.clone();
                self.payload = payload.clone();
                self.current_step = 0;
                self.status = ApprovalStatus::Pending;
                self.created_at = *occurred_at;
                self.created = true;
            }
            ApprovalEvent::StepApproved {
                step,
                approver,
                comment,
                occurred_at,
                ..
            } => {
                self.decisions.push(StepDecision {
                    step: *step,
                    approver: *approver,
                    outcome: StepOutcome::Approved,
                    comment: comment.clone(),
                    decided_at: *occurred_at,
                });
                self.current_step = step + 1;
            }
            ApprovalEvent::Approved { .. } => self.status = ApprovalStatus::Approved,
            ApprovalEvent::Rejected {
                step,
                approver,
                reason,
                occurred_at,
                ..
            } => {
                self.decisions.push(StepDecision {
                    step: *step,
                    approver: *approver,
                    outcome: StepOutcome::Rejected,
                    comment: Some(reason.clone()),
                    decided_at: *occurred_at,
                });
                self.status = ApprovalStatus::Rejected;
            }
            ApprovalEvent::Cancelled { .. } => self.status = ApprovalStatus::Cancelled,
        }
        self.updated_at = event.occurred_at();
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ApprovalCommand::Submit(cmd) => self.handle_submit(cmd),
            ApprovalCommand::Approve(cmd) => self.handle_approve(cmd),
            ApprovalCommand::Reject(cmd) => self.handle_reject(cmd),
            ApprovalCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl ApprovalRequest {
    fn handle_submit(&self, cmd: &SubmitRequest) -> Result<Vec<ApprovalEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("approval request already submitted"));
        }

        let title = cmd.title.trim();
        if title.is_empty() {
            return Err(DomainError::validation("title cannot be empty"));
        }
        if cmd.approvers.is_empty() {
            return Err(DomainError::validation("at least one approver is required"));
        }
        let mut seen = HashSet::new();
        if !cmd.approvers.iter().all(|a| seen.insert(*a)) {
            return Err(DomainError::validation("approvers must be distinct"));
        }
        if cmd.approvers.contains(&cmd.requester) {
            return Err(DomainError::validation("requester cannot approve their own request"));
        }

        Ok(vec![ApprovalEvent::Submitted {
            approval_id: cmd.approval_id,
            kind: cmd.kind,
            title: title.to_string(),
            requester: cmd.requester,
            approvers: cmd.approvers.clone(),
            payload: cmd.payload.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_approve(&self, cmd: &ApproveStep) -> Result<Vec<ApprovalEvent>, DomainError> {
        self.ensure_open()?;
        let step = self.ensure_current_approver(cmd.actor)?;
        let next_approver = self.approvers.get(step + 1).copied();

        let mut events = vec![ApprovalEvent::StepApproved {
            approval_id: self.id,
            step,
            approver: cmd.actor,
            comment: cmd.comment.clone().filter(|c| !c.trim().is_empty()),
            next_approver,
            occurred_at: cmd.occurred_at,
        }];
        if next_approver.is_none() {
            events.push(ApprovalEvent::Approved {
                approval_id: self.id,
                requester: self.requester,
                occurred_at: cmd.occurred_at,
            });
        }
        Ok(events)
    }

    fn handle_reject(&self, cmd: &RejectRequest) -> Result<Vec<ApprovalEvent>, DomainError> {
        self.ensure_open()?;
        let step = self.ensure_current_approver(cmd.actor)?;
        let reason = cmd.reason.trim();
        if reason.is_empty() {
            return Err(DomainError::validation("a rejection reason is required"));
        }

        Ok(vec![ApprovalEvent::Rejected {
            approval_id: self.id,
            step,
            approver: cmd.actor,
            requester: self.requester,
            reason: reason.to_string(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_cancel(&self, cmd: &CancelRequest) -> Result<Vec<ApprovalEvent>, DomainError> {
        self.ensure_open()?;
        if cmd.actor != self.requester {
            return Err(DomainError::unauthorized("only the requester can cancel a request"));
        }

        Ok(vec![ApprovalEvent::Cancelled {
            approval_id: self.id,
            actor: cmd.actor,
            pending_approver: self.current_approver(),
            occurred_at: cmd.occurred_at,
        }])
    }
}
