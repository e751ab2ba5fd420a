use chrono::{DateTime, Utc};
use utoipa::ToSchema;

use crate::data::group::Group;
use crate::data::user::{MemberRef, User};
use crate::resp::problem::{problems, Problem};
use crate::role::Role;
use crate::util;

pub mod db;

pub static ADVISOR_REQUEST_COLLECTION_NAME: &str = "advisorRequests";

pub mod problem {
    use crate::resp::problem::{problems, Problem};

    #[inline]
    pub fn not_found(id: &str) -> Problem {
        problems::not_found("Advisor request", id)
    }

    #[inline]
    pub fn not_an_advisor(id: &str) -> Problem {
        problems::bad_request(
            "Not an advisor.",
            format!("User {} can't advise groups.", id),
        )
    }

    #[inline]
    pub fn not_addressed() -> Problem {
        problems::forbidden("Only the requested advisor can answer this request.")
    }
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AdvisorStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl AdvisorStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AdvisorStatus::Pending => "pending",
            AdvisorStatus::Approved => "approved",
            AdvisorStatus::Rejected => "rejected",
        }
    }
}

impl From<AdvisorStatus> for bson::Bson {
    fn from(status: AdvisorStatus) -> Self {
        bson::Bson::String(status.as_str().to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AdvisorRequest {
    #[serde(rename = "_id")]
    pub id: String,
    pub group_id: String,
    #[serde(default)]
    pub group_name: Option<String>,
    pub advisor: MemberRef,
    pub requested_by: String,
    #[serde(default)]
    pub status: AdvisorStatus,
    #[serde(with = "chrono::serde::ts_milliseconds", default = "util::now")]
    #[schema(value_type = i64)]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    #[schema(value_type = Option<i64>)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl AdvisorRequest {
    pub fn new(group: &Group, advisor: MemberRef, requested_by: &str) -> AdvisorRequest {
        AdvisorRequest {
            id: util::new_id(),
            group_id: group.id.clone(),
            group_name: group.name.clone(),
            advisor,
            requested_by: requested_by.to_string(),
            status: AdvisorStatus::Pending,
            created_at: util::now(),
            resolved_at: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AdvisorChoice {
    pub advisor_id: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AdvisorAnswer {
    pub approve: bool,
}

/// Pending request together with the group it's about.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AdvisorRequestDetails {
    pub request: AdvisorRequest,
    pub group: Option<Group>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AdvisorOutcome {
    pub request: AdvisorRequest,
    pub group: Group,
}

/// Validates that `requester` may ask `advisor` to advise `group`.
pub fn check_request(group: &Group, requester: &str, advisor: &User) -> Result<(), Problem> {
    group.require_member(requester)?;
    if advisor.role != Role::Advisor {
        return Err(problem::not_an_advisor(&advisor.id));
    }
    if !group.can_request_advisor() {
        return Err(problems::conflict(
            "Can't request an advisor.",
            match group.status.step() {
                0 | 1 => "Need final idea approval before selecting an advisor.",
                3 => "An advisor request is already pending.",
                _ => "The group already has an advisor.",
            },
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::group::{GroupStatus, Ideas};
    use rocket::http::Status;

    fn user(id: &str, role: Role) -> User {
        let mut user = User::new(format!("User {}", id), format!("{}@uni.edu", id), role);
        user.id = id.to_string();
        user
    }

    fn group(status: GroupStatus) -> Group {
        let mut group = Group::new(vec![user("a", Role::Student).member_ref()]);
        group.ideas = Ideas {
            idea1: "1".to_string(),
            idea2: "2".to_string(),
            idea3: "3".to_string(),
            idea4: "4".to_string(),
            idea5: "5".to_string(),
        };
        group.status = status;
        group
    }

    #[test]
    fn approved_group_may_request() {
        let group = group(GroupStatus::IdeaApproved);
        assert!(check_request(&group, "a", &user("adv", Role::Advisor)).is_ok());
    }

    #[test]
    fn request_needs_final_idea() {
        let group = group(GroupStatus::IdeasSubmitted);
        let err = check_request(&group, "a", &user("adv", Role::Advisor)).unwrap_err();

        assert_eq!(err.status, Status::Conflict);
        assert_eq!(
            err.detail.as_deref(),
            Some("Need final idea approval before selecting an advisor.")
        );
    }

    #[test]
    fn only_members_request() {
        let group = group(GroupStatus::IdeaApproved);
        let err = check_request(&group, "z", &user("adv", Role::Advisor)).unwrap_err();
        assert_eq!(err.status, Status::Forbidden);
    }

    #[test]
    fn target_must_be_advisor() {
        let group = group(GroupStatus::IdeaApproved);
        let err = check_request(&group, "a", &user("b", Role::Student)).unwrap_err();
        assert_eq!(err.status, Status::BadRequest);
    }

    #[test]
    fn pending_request_blocks_another() {
        let group = group(GroupStatus::AdvisorRequested);
        let err = check_request(&group, "a", &user("adv", Role::Advisor)).unwrap_err();
        assert_eq!(
            err.detail.as_deref(),
            Some("An advisor request is already pending.")
        );
    }
}
