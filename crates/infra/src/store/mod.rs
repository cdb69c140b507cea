//! In-process stores for directory, organization and workflow state.
//!
//! Every store keeps its state behind an `RwLock`; locks are held only for
//! the duration of a single operation and never across an `.await`.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;

use gloria_core::{Aggregate, DomainError, DomainResult, ExpectedVersion};

pub mod approvals;
pub mod directory;
pub mod org;

pub use approvals::ApprovalStore;
pub use directory::{DirectorySnapshot, InMemoryDirectory, RolePatch, SeedReport};
pub use org::OrgStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The backing storage failed; the operation may be retried.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::Domain(DomainError::not_found(what))
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Domain(DomainError::conflict(msg))
    }
}

impl<T> From<PoisonError<T>> for StoreError {
    fn from(_: PoisonError<T>) -> Self {
        StoreError::Unavailable("store lock poisoned".to_string())
    }
}

/// Result of running a command against a stored aggregate.
#[derive(Debug, Clone)]
pub struct Executed<A: Aggregate> {
    /// State before the command; `None` when the command created it.
    pub before: Option<A>,
    pub after: A,
    pub events: Vec<A::Event>,
}

impl<A: Aggregate> Executed<A> {
    pub fn changed(&self) -> bool {
        !self.events.is_empty()
    }
}

/// Current-state store for command/event aggregates.
///
/// Commands run under the write lock: load (or start blank), `execute`,
/// then replace the stored copy if any event was produced.
pub struct AggregateStore<A: Aggregate> {
    items: RwLock<HashMap<A::Id, A>>,
    blank: fn(A::Id) -> A,
}

impl<A> AggregateStore<A>
where
    A: Aggregate<Error = DomainError> + Clone,
{
    /// `blank` builds the empty aggregate a creating command runs against.
    pub fn new(blank: fn(A::Id) -> A) -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            blank,
        }
    }

    pub(crate) fn read(&self) -> StoreResult<RwLockReadGuard<'_, HashMap<A::Id, A>>> {
        Ok(self.items.read()?)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, HashMap<A::Id, A>>> {
        Ok(self.items.write()?)
    }

    pub fn get(&self, id: &A::Id) -> StoreResult<Option<A>> {
        Ok(self.read()?.get(id).cloned())
    }

    pub fn list(&self) -> StoreResult<Vec<A>> {
        Ok(self.read()?.values().cloned().collect())
    }

    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.read()?.is_empty())
    }

    /// Copy of every stored aggregate, for [`restore`](Self::restore).
    pub fn snapshot(&self) -> StoreResult<HashMap<A::Id, A>> {
        Ok(self.read()?.clone())
    }

    /// Replace the stored aggregates with an earlier snapshot.
    pub fn restore(&self, items: HashMap<A::Id, A>) -> StoreResult<()> {
        *self.write()? = items;
        Ok(())
    }

    pub fn execute(&self, id: A::Id, command: &A::Command, expected: ExpectedVersion) -> StoreResult<Executed<A>> {
        self.execute_guarded(id, command, expected, |_, _| Ok(()))
    }

    /// Like [`execute`](Self::execute), but `guard` sees the other stored
    /// aggregates and the new state before it is committed.
    pub fn execute_guarded<G>(
        &self,
        id: A::Id,
        command: &A::Command,
        expected: ExpectedVersion,
        guard: G,
    ) -> StoreResult<Executed<A>>
    where
        G: FnOnce(&HashMap<A::Id, A>, &A) -> DomainResult<()>,
    {
        let mut items = self.write()?;
        let before = items.get(&id).cloned();
        let mut current = before.clone().unwrap_or_else(|| (self.blank)(id.clone()));
        expected.check(current.version())?;

        let events = current.execute(command)?;
        if events.is_empty() {
            return Ok(Executed {
                before: before.clone(),
                after: current,
                events,
            });
        }

        guard(&items, &current)?;
        items.insert(id, current.clone());

        Ok(Executed {
            before,
            after: current,
            events,
        })
    }
}

impl<A: Aggregate> std::fmt::Debug for AggregateStore<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateStore").finish_non_exhaustive()
    }
}
