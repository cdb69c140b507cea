//! `gloria-core`: domain foundation building blocks.
//!
//! Identifiers, the domain error model, aggregate/event traits and
//! pagination. No infrastructure concerns live here.

pub mod aggregate;
pub mod error;
pub mod event;
pub mod id;
pub mod page;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use event::DomainEvent;
pub use id::{ApprovalId, DepartmentId, PermissionId, PositionId, RoleId, SchoolId, UserId};
pub use page::{Page, PageRequest};
