use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Organizational breadth of a permission grant.
///
/// Ordered from narrowest to broadest; the derived `Ord` follows declaration
/// order: `Own < Team < Department < School < Organization < System`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scope {
    /// Only records belonging to the user themself.
    #[serde(rename = "SELF")]
    Own,
    Team,
    Department,
    School,
    Organization,
    System,
}

impl Scope {
    pub const ALL: [Scope; 6] = [
        Scope::Own,
        Scope::Team,
        Scope::Department,
        Scope::School,
        Scope::Organization,
        Scope::System,
    ];

    /// Whether a grant at `self` satisfies a request at `requested`.
    pub fn covers(self, requested: Scope) -> bool {
        self >= requested
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Own => "SELF",
            Scope::Team => "TEAM",
            Scope::Department => "DEPARTMENT",
            Scope::School => "SCHOOL",
            Scope::Organization => "ORGANIZATION",
            Scope::System => "SYSTEM",
        }
    }
}

impl core::fmt::Display for Scope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown scope '{0}' (expected one of SELF, TEAM, DEPARTMENT, SCHOOL, ORGANIZATION, SYSTEM)")]
pub struct ParseScopeError(pub String);

impl FromStr for Scope {
    type Err = ParseScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scope::ALL
            .into_iter()
            .find(|scope| scope.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseScopeError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ordering_follows_org_breadth() {
        assert!(Scope::Own < Scope::Team);
        assert!(Scope::Team < Scope::Department);
        assert!(Scope::Department < Scope::School);
        assert!(Scope::School < Scope::Organization);
        assert!(Scope::Organization < Scope::System);
    }

    #[test]
    fn broader_grant_covers_narrower_request() {
        assert!(Scope::School.covers(Scope::Department));
        assert!(Scope::School.covers(Scope::School));
        assert!(!Scope::Team.covers(Scope::Department));
    }

    #[test]
    fn parses_case_insensitively_and_serializes_as_self() {
        assert_eq!("self".parse::<Scope>().unwrap(), Scope::Own);
        assert_eq!("Department".parse::<Scope>().unwrap(), Scope::Department);
        assert!("GALAXY".parse::<Scope>().is_err());

        assert_eq!(serde_json::to_string(&Scope::Own).unwrap(), "\"SELF\"");
        assert_eq!(serde_json::to_string(&Scope::Organization).unwrap(), "\"ORGANIZATION\"");
    }

    fn any_scope() -> impl Strategy<Value = Scope> {
        (0usize..Scope::ALL.len()).prop_map(|i| Scope::ALL[i])
    }

    proptest! {
        #[test]
        fn covers_is_transitive(a in any_scope(), b in any_scope(), c in any_scope()) {
            if a.covers(b) && b.covers(c) {
                prop_assert!(a.covers(c));
            }
        }

        #[test]
        fn system_covers_everything(s in any_scope()) {
            prop_assert!(Scope::System.covers(s));
            prop_assert!(s.covers(Scope::Own));
        }
    }
}
