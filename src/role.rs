use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    Eq,
    PartialEq,
    Hash,
    Serialize,
    Deserialize,
    FromFormField,
    ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    #[field(value = "student")]
    Student,
    #[field(value = "advisor")]
    Advisor,
    #[field(value = "admin")]
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Advisor => "advisor",
            Role::Admin => "admin",
        }
    }

    /// Landing page of the client application after login.
    pub fn home(self) -> &'static str {
        match self {
            Role::Admin => "/admin",
            Role::Advisor | Role::Student => "/home",
        }
    }

    pub fn is_admin(self) -> bool {
        self == Role::Admin
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<Role> for bson::Bson {
    fn from(role: Role) -> Self {
        bson::Bson::String(role.as_str().to_string())
    }
}

/// Audience of a broadcast notification.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RoleTarget {
    All,
    Student,
    Advisor,
    Admin,
}

impl RoleTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            RoleTarget::All => "all",
            RoleTarget::Student => "student",
            RoleTarget::Advisor => "advisor",
            RoleTarget::Admin => "admin",
        }
    }

    pub fn includes(self, role: Role) -> bool {
        match self {
            RoleTarget::All => true,
            other => other == RoleTarget::from(role),
        }
    }
}

impl From<Role> for RoleTarget {
    fn from(role: Role) -> Self {
        match role {
            Role::Student => RoleTarget::Student,
            Role::Advisor => RoleTarget::Advisor,
            Role::Admin => RoleTarget::Admin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_routes_by_role() {
        assert_eq!(Role::Admin.home(), "/admin");
        assert_eq!(Role::Advisor.home(), "/home");
        assert_eq!(Role::Student.home(), "/home");
    }

    #[test]
    fn new_accounts_are_students() {
        assert_eq!(Role::default(), Role::Student);
    }

    #[test]
    fn role_targets() {
        assert!(RoleTarget::All.includes(Role::Student));
        assert!(RoleTarget::All.includes(Role::Admin));
        assert!(RoleTarget::Advisor.includes(Role::Advisor));
        assert!(!RoleTarget::Advisor.includes(Role::Student));
    }

    #[test]
    fn serialized_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Advisor).unwrap(), "\"advisor\"");
        assert_eq!(
            serde_json::from_str::<RoleTarget>("\"all\"").unwrap(),
            RoleTarget::All
        );
    }
}
