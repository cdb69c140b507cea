//! Workflow approvals.
//!
//! An [`ApprovalRequest`] walks an ordered list of approvers; each step is
//! decided by exactly one user. Deterministic domain logic only.

pub mod approval;

pub use approval::{
    ApprovalCommand, ApprovalEvent, ApprovalKind, ApprovalRequest, ApprovalStatus, ApproveStep,
    CancelRequest, RejectRequest, StepDecision, StepOutcome, SubmitRequest,
};
