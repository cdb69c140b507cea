//! Employee account aggregate.
//!
//! Lifecycle: created `Active`, may be suspended and reactivated any number
//! of times, and terminated once (terminal). Role and grant bookkeeping lives
//! in the directory store; this aggregate owns identity and profile data.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use gloria_core::{
    Aggregate, AggregateRoot, DepartmentId, DomainError, DomainEvent, PositionId, SchoolId, UserId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    #[default]
    Active,
    Suspended,
    /// Terminal.
    Terminated,
}

impl core::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            UserStatus::Active => write!(f, "active"),
            UserStatus::Suspended => write!(f, "suspended"),
            UserStatus::Terminated => write!(f, "terminated"),
        }
    }
}

/// Org placement and HR details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub school_id: Option<SchoolId>,
    pub department_id: Option<DepartmentId>,
    pub position_id: Option<PositionId>,
    pub manager_id: Option<UserId>,
    pub hire_date: Option<NaiveDate>,
    pub phone: Option<String>,
}

/// Partial profile change; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school_id: Option<SchoolId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department_id: Option<DepartmentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_id: Option<PositionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hire_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        *self == ProfileUpdate::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    pub employee_number: String,
    pub status: UserStatus,
    pub profile: UserProfile,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
    #[serde(skip)]
    pub created: bool,
}

impl User {
    /// Blank aggregate that only accepts [`UserCommand::Create`].
    pub fn empty(id: UserId) -> Self {
        Self {
            id,
            email: String::new(),
            display_name: String::new(),
            employee_number: String::new(),
            status: UserStatus::Active,
            profile: UserProfile::default(),
            created_at: DateTime::<Utc>::MIN_UTC,
            updated_at: DateTime::<Utc>::MIN_UTC,
            version: 0,
            created: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.created && self.status == UserStatus::Active
    }

    fn ensure_exists(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("user {}", self.id)));
        }
        Ok(())
    }

    fn ensure_not_terminated(&self) -> Result<(), DomainError> {
        if self.status == UserStatus::Terminated {
            return Err(DomainError::invariant("user is terminated"));
        }
        Ok(())
    }

    fn ensure_not_self(&self, actor: UserId, what: &str) -> Result<(), DomainError> {
        if actor == self.id {
            return Err(DomainError::invariant(format!("users cannot {what} themselves")));
        }
        Ok(())
    }
}

impl AggregateRoot for User {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// Commands

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    pub user_id: UserId,
    pub email: String,
    pub display_name: String,
    pub employee_number: String,
    #[serde(default)]
    pub profile: UserProfile,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateProfile {
    pub actor: UserId,
    pub changes: ProfileUpdate,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspendUser {
    pub actor: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivateUser {
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminateUser {
    pub actor: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UserCommand {
    Create(CreateUser),
    UpdateProfile(UpdateProfile),
    Suspend(SuspendUser),
    Activate(ActivateUser),
    Terminate(TerminateUser),
}

// Events

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserEvent {
    Created {
        user_id: UserId,
        email: String,
        display_name: String,
        employee_number: String,
        profile: UserProfile,
        occurred_at: DateTime<Utc>,
    },
    ProfileUpdated {
        user_id: UserId,
        actor: UserId,
        changes: ProfileUpdate,
        occurred_at: DateTime<Utc>,
    },
    Suspended {
        user_id: UserId,
        actor: UserId,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    Activated {
        user_id: UserId,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    },
    Terminated {
        user_id: UserId,
        actor: UserId,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
}

impl DomainEvent for UserEvent {
    fn event_type(&self) -> &'static str {
        match self {
            UserEvent::Created { .. } => "user.created",
            UserEvent::ProfileUpdated { .. } => "user.profile_updated",
            UserEvent::Suspended { .. } => "user.suspended",
            UserEvent::Activated { .. } => "user.activated",
            UserEvent::Terminated { .. } => "user.terminated",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            UserEvent::Created { occurred_at, .. }
            | UserEvent::ProfileUpdated { occurred_at, .. }
            | UserEvent::Suspended { occurred_at, .. }
            | UserEvent::Activated { occurred_at, .. }
            | UserEvent::Terminated { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for User {
    type Command = UserCommand;
    type Event = UserEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            UserEvent::Created {
                user_id,
                email,
                display_name,
                employee_number,
                profile,
                occurred_at,
            } => {
                self.id = *user_id;
                self.email = email.clone();
                self.display_name = display_name.clone();
                self.employee_number = employee_number.clone();
                self.profile = profile.clone();
                self.status = UserStatus::Active;
                self.created_at = *occurred_at;
                self.created = true;
            }
            UserEvent::ProfileUpdated { changes, .. } => self.apply_profile(changes),
            UserEvent::Suspended { .. } => self.status = UserStatus::Suspended,
            UserEvent::Activated { .. } => self.status = UserStatus::Active,
            UserEvent::Terminated { .. } => self.status = UserStatus::Terminated,
        }
        self.updated_at = event.occurred_at();
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            UserCommand::Create(cmd) => self.handle_create(cmd),
            UserCommand::UpdateProfile(cmd) => self.handle_update(cmd),
            UserCommand::Suspend(cmd) => self.handle_suspend(cmd),
            UserCommand::Activate(cmd) => self.handle_activate(cmd),
            UserCommand::Terminate(cmd) => self.handle_terminate(cmd),
        }
    }
}

impl User {
    fn handle_create(&self, cmd: &CreateUser) -> Result<Vec<UserEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("user already exists"));
        }

        let email = cmd.email.trim().to_lowercase();
        if !is_plausible_email(&email) {
            return Err(DomainError::validation("invalid email format"));
        }
        let display_name = validate_display_name(&cmd.display_name)?;

        let employee_number = cmd.employee_number.trim().to_uppercase();
        if employee_number.is_empty()
            || employee_number.len() > 32
            || !employee_number
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(DomainError::validation(
                "employee number must be 1-32 characters of A-Z, 0-9 and '-'",
            ));
        }

        if cmd.profile.manager_id == Some(cmd.user_id) {
            return Err(DomainError::invariant("a user cannot be their own manager"));
        }

        Ok(vec![UserEvent::Created {
            user_id: cmd.user_id,
            email,
            display_name,
            employee_number,
            profile: cmd.profile.clone(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_update(&self, cmd: &UpdateProfile) -> Result<Vec<UserEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_not_terminated()?;

        let mut changes = cmd.changes.clone();
        if let Some(name) = &changes.display_name {
            changes.display_name = Some(validate_display_name(name)?);
        }
        if changes.manager_id == Some(self.id) {
            return Err(DomainError::invariant("a user cannot be their own manager"));
        }

        // Drop fields that already hold the requested value.
        let p = &self.profile;
        if changes.display_name.as_deref() == Some(self.display_name.as_str()) {
            changes.display_name = None;
        }
        if changes.school_id.is_some() && changes.school_id == p.school_id {
            changes.school_id = None;
        }
        if changes.department_id.is_some() && changes.department_id == p.department_id {
            changes.department_id = None;
        }
        if changes.position_id.is_some() && changes.position_id == p.position_id {
            changes.position_id = None;
        }
        if changes.manager_id.is_some() && changes.manager_id == p.manager_id {
            changes.manager_id = None;
        }
        if changes.hire_date.is_some() && changes.hire_date == p.hire_date {
            changes.hire_date = None;
        }
        if changes.phone.is_some() && changes.phone == p.phone {
            changes.phone = None;
        }

        if changes.is_empty() {
            return Ok(vec![]);
        }

        Ok(vec![UserEvent::ProfileUpdated {
            user_id: self.id,
            actor: cmd.actor,
            changes,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_suspend(&self, cmd: &SuspendUser) -> Result<Vec<UserEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_not_terminated()?;
        self.ensure_not_self(cmd.actor, "suspend")?;

        if self.status == UserStatus::Suspended {
            return Err(DomainError::invariant("user already suspended"));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("suspension reason is required"));
        }

        Ok(vec![UserEvent::Suspended {
            user_id: self.id,
            actor: cmd.actor,
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_activate(&self, cmd: &ActivateUser) -> Result<Vec<UserEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_not_terminated()?;

        if self.status == UserStatus::Active {
            return Err(DomainError::invariant("user already active"));
        }

        Ok(vec![UserEvent::Activated {
            user_id: self.id,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        }])
    }

    fn handle_terminate(&self, cmd: &TerminateUser) -> Result<Vec<UserEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_not_terminated()?;
        self.ensure_not_self(cmd.actor, "terminate")?;

        Ok(vec![UserEvent::Terminated {
            user_id: self.id,
            actor: cmd.actor,
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
        }])
    }

    fn apply_profile(&mut self, changes: &ProfileUpdate) {
        if let Some(name) = &changes.display_name {
            self.display_name = name.clone();
        }
        let p = &mut self.profile;
        if changes.school_id.is_some() {
            p.school_id = changes.school_id;
        }
        if changes.department_id.is_some() {
            p.department_id = changes.department_id;
        }
        if changes.position_id.is_some() {
            p.position_id = changes.position_id;
        }
        if changes.manager_id.is_some() {
            p.manager_id = changes.manager_id;
        }
        if changes.hire_date.is_some() {
            p.hire_date = changes.hire_date;
        }
        if changes.phone.is_some() {
            p.phone = changes.phone.clone();
        }
    }
}

fn validate_display_name(name: &str) -> Result<String, DomainError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation("display name cannot be empty"));
    }
    if name.chars().count() > 120 {
        return Err(DomainError::validation("display name is longer than 120 characters"));
    }
    Ok(name.to_string())
}

fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created(email: &str) -> User {
        let id = UserId::new();
        let mut user = User::empty(id);
        user.execute(&UserCommand::Create(CreateUser {
            user_id: id,
            email: email.to_string(),
            display_name: "Alice Smith".to_string(),
            employee_number: "e-1001".to_string(),
            profile: UserProfile::default(),
            occurred_at: Utc::now(),
        }))
        .unwrap();
        user
    }

    fn suspend(actor: UserId) -> UserCommand {
        UserCommand::Suspend(SuspendUser {
            actor,
            reason: "Policy violation".to_string(),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn create_normalizes_fields() {
        let user = created(" Alice@Example.COM ");
        assert!(user.is_active());
        assert_eq!(user.email, "alice@example.com");
        assert_eq!(user.employee_number, "E-1001");
        assert_eq!(user.version, 1);
    }

    #[test]
    fn create_rejects_invalid_email() {
        let id = UserId::new();
        for email in ["invalid-email", "a@b", "a@@b.com", "a b@c.com"] {
            let err = User::empty(id)
                .handle(&UserCommand::Create(CreateUser {
                    user_id: id,
                    email: email.to_string(),
                    display_name: "A".to_string(),
                    employee_number: "E1".to_string(),
                    profile: UserProfile::default(),
                    occurred_at: Utc::now(),
                }))
                .unwrap_err();
            assert!(matches!(err, DomainError::Validation(_)), "{email}");
        }
    }

    #[test]
    fn create_twice_conflicts() {
        let user = created("bob@example.com");
        let err = user
            .handle(&UserCommand::Create(CreateUser {
                user_id: user.id,
                email: "bob@example.com".to_string(),
                display_name: "Bob".to_string(),
                employee_number: "E2".to_string(),
                profile: UserProfile::default(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn suspend_and_reactivate() {
        let admin = UserId::new();
        let mut user = created("dave@example.com");

        user.execute(&suspend(admin)).unwrap();
        assert_eq!(user.status, UserStatus::Suspended);
        assert!(!user.is_active());

        let err = user.handle(&suspend(admin)).unwrap_err();
        assert!(err.to_string().contains("already suspended"));

        user.execute(&UserCommand::Activate(ActivateUser {
            actor: admin,
            occurred_at: Utc::now(),
        }))
        .unwrap();
        assert!(user.is_active());
    }

    #[test]
    fn users_cannot_suspend_themselves() {
        let user = created("eve@example.com");
        let err = user.handle(&suspend(user.id)).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn termination_is_terminal() {
        let admin = UserId::new();
        let mut user = created("frank@example.com");
        user.execute(&UserCommand::Terminate(TerminateUser {
            actor: admin,
            reason: "contract ended".to_string(),
            occurred_at: Utc::now(),
        }))
        .unwrap();

        assert_eq!(user.status, UserStatus::Terminated);
        let err = user
            .handle(&UserCommand::Activate(ActivateUser {
                actor: admin,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(err.to_string().contains("terminated"));
    }

    #[test]
    fn profile_update_keeps_only_real_changes() {
        let mut user = created("grace@example.com");
        let school = SchoolId::new();

        let events = user
            .execute(&UserCommand::UpdateProfile(UpdateProfile {
                actor: user.id,
                changes: ProfileUpdate {
                    display_name: Some("Alice Smith".to_string()),
                    school_id: Some(school),
                    ..Default::default()
                },
                occurred_at: Utc::now(),
            }))
            .unwrap();

        let [UserEvent::ProfileUpdated { changes, .. }] = events.as_slice() else {
            panic!("expected one ProfileUpdated event, got {events:?}");
        };
        assert_eq!(changes.display_name, None);
        assert_eq!(changes.school_id, Some(school));
        assert_eq!(user.profile.school_id, Some(school));
    }

    #[test]
    fn noop_profile_update_emits_nothing() {
        let user = created("henry@example.com");
        let events = user
            .handle(&UserCommand::UpdateProfile(UpdateProfile {
                actor: user.id,
                changes: ProfileUpdate::default(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn commands_on_missing_user_are_not_found() {
        let err = User::empty(UserId::new()).handle(&suspend(UserId::new())).unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }
}
