use chrono::{DateTime, Utc};
use utoipa::ToSchema;

use crate::data::group::{self, Group};
use crate::data::user::{MemberRef, User};
use crate::resp::problem::{problems, Problem};
use crate::role::Role;
use crate::util;

pub mod db;

pub static JOIN_REQUEST_COLLECTION_NAME: &str = "groupJoinRequests";

pub mod problem {
    use crate::resp::problem::{problems, Problem};

    #[inline]
    pub fn not_found(id: &str) -> Problem {
        problems::not_found("Join request", id)
    }

    #[inline]
    pub fn duplicate() -> Problem {
        problems::conflict(
            "Request already sent.",
            "A pending join request for this group already exists.",
        )
    }

    #[inline]
    pub fn not_receiver() -> Problem {
        problems::forbidden("Only the user the request was sent to can answer it.")
    }

    #[inline]
    pub fn already_resolved(status: &str) -> Problem {
        problems::conflict(
            "Request already answered.",
            format!("The request was already {}.", status),
        )
    }
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JoinStatus {
    #[default]
    Pending,
    Accepted,
    Declined,
}

impl JoinStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JoinStatus::Pending => "pending",
            JoinStatus::Accepted => "accepted",
            JoinStatus::Declined => "declined",
        }
    }
}

impl From<JoinStatus> for bson::Bson {
    fn from(status: JoinStatus) -> Self {
        bson::Bson::String(status.as_str().to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JoinRequest {
    #[serde(rename = "_id")]
    pub id: String,
    pub sender: MemberRef,
    pub receiver: MemberRef,
    /// Group the sender asked to join; `None` asks the receiver to start a group together.
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub status: JoinStatus,
    pub notification_id: String,
    /// Present while pending; a unique index allows one pending request per key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub pending_key: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds", default = "util::now")]
    #[schema(value_type = i64)]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    #[schema(value_type = Option<i64>)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl JoinRequest {
    pub fn new(
        sender: MemberRef,
        receiver: MemberRef,
        group_id: Option<String>,
        notification_id: String,
    ) -> JoinRequest {
        let pending_key = pending_key(&sender.id, &receiver.id, group_id.as_deref());
        JoinRequest {
            id: util::new_id(),
            sender,
            receiver,
            group_id,
            status: JoinStatus::Pending,
            notification_id,
            pending_key: Some(pending_key),
            created_at: util::now(),
            resolved_at: None,
        }
    }
}

/// Key shared by every pending request for the same join or the same pair of partners.
pub fn pending_key(sender: &str, receiver: &str, group: Option<&str>) -> String {
    match group {
        Some(group) => format!("group:{}:{}", group, sender),
        None => format!("partner:{}:{}", sender, receiver),
    }
}

/// What answering a request does, given its current status.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Answer {
    Accept,
    Decline,
    /// Repeated accept; report the current group without changing anything.
    AlreadyAccepted,
}

pub fn decide_answer(status: JoinStatus, accept: bool) -> Result<Answer, Problem> {
    match (status, accept) {
        (JoinStatus::Pending, true) => Ok(Answer::Accept),
        (JoinStatus::Pending, false) => Ok(Answer::Decline),
        (JoinStatus::Accepted, true) => Ok(Answer::AlreadyAccepted),
        (status, _) => Err(problem::already_resolved(status.as_str())),
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct JoinAnswer {
    pub accept: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct JoinOutcome {
    pub request: JoinRequest,
    /// Group the sender is now part of, when accepted.
    pub group: Option<Group>,
}

/// Validates a request to join `group` and returns the member it's routed to.
pub fn check_join<'g>(
    sender: &User,
    group: &'g Group,
    max_members: usize,
) -> Result<&'g MemberRef, Problem> {
    if sender.role != Role::Student {
        return Err(problems::forbidden("Only students can join groups."));
    }
    if group.has_member(&sender.id) {
        return Err(group::problem::already_member(&sender.id));
    }
    if sender.is_joined {
        return Err(group::problem::already_grouped(&sender.id));
    }
    if group.is_full(max_members) {
        return Err(group::problem::group_full(&group.id, max_members));
    }

    group
        .first_member()
        .ok_or_else(|| group::problem::bad_state("The group has no members to ask."))
}

/// Validates a request asking `receiver` to form a new group with `sender`.
pub fn check_partner(sender: &User, receiver: &User) -> Result<(), Problem> {
    if sender.id == receiver.id {
        return Err(problems::bad_request(
            "Bad partner.",
            "You can't send a group request to yourself.",
        ));
    }
    if sender.role != Role::Student || receiver.role != Role::Student {
        return Err(problems::forbidden("Only students can form groups."));
    }
    if sender.is_joined {
        return Err(group::problem::already_grouped(&sender.id));
    }
    if receiver.is_joined {
        return Err(group::problem::already_grouped(&receiver.id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocket::http::Status;

    fn student(id: &str) -> User {
        let mut user = User::new(format!("Student {}", id), format!("{}@uni.edu", id), Role::Student);
        user.id = id.to_string();
        user
    }

    fn group_of(ids: &[&str]) -> Group {
        Group::new(ids.iter().map(|it| student(it).member_ref()).collect())
    }

    #[test]
    fn join_routes_to_first_member() {
        let group = group_of(&["a", "b"]);
        let receiver = check_join(&student("c"), &group, 3).unwrap();
        assert_eq!(receiver.id, "a");
    }

    #[test]
    fn full_group_rejects_join() {
        let group = group_of(&["a", "b", "c"]);
        let err = check_join(&student("d"), &group, 3).unwrap_err();
        assert_eq!(err.status, Status::Conflict);
        assert_eq!(err.title, "Group is full.");
    }

    #[test]
    fn members_and_joined_students_cannot_request() {
        let group = group_of(&["a"]);
        assert!(check_join(&student("a"), &group, 3).is_err());

        let mut joined = student("z");
        joined.is_joined = true;
        assert!(check_join(&joined, &group, 3).is_err());
    }

    #[test]
    fn advisors_cannot_join() {
        let group = group_of(&["a"]);
        let mut advisor = student("adv");
        advisor.role = Role::Advisor;

        assert_eq!(
            check_join(&advisor, &group, 3).unwrap_err().status,
            Status::Forbidden
        );
    }

    #[test]
    fn partner_checks() {
        assert!(check_partner(&student("a"), &student("b")).is_ok());
        assert!(check_partner(&student("a"), &student("a")).is_err());

        let mut joined = student("b");
        joined.is_joined = true;
        assert_eq!(
            check_partner(&student("a"), &joined).unwrap_err().status,
            Status::Conflict
        );
    }

    #[test]
    fn resolved_at_is_optional_millis() {
        let request = JoinRequest::new(
            student("a").member_ref(),
            student("b").member_ref(),
            None,
            "n-1".to_string(),
        );
        let doc = bson::to_document(&request).unwrap();

        assert_eq!(doc.get_str("status").unwrap(), "pending");
        assert!(doc.get("resolved_at").map(|it| it == &bson::Bson::Null).unwrap_or(true));
    }

    #[test]
    fn pending_key_ignores_receiver_for_group_joins() {
        let request = JoinRequest::new(
            student("c").member_ref(),
            student("a").member_ref(),
            Some("g1".to_string()),
            "n1".to_string(),
        );
        assert_eq!(request.pending_key.as_deref(), Some("group:g1:c"));
        assert_eq!(pending_key("c", "b", Some("g1")), "group:g1:c");
        assert_ne!(pending_key("c", "a", None), pending_key("a", "c", None));
    }

    #[test]
    fn answers_follow_request_status() {
        assert_eq!(decide_answer(JoinStatus::Pending, true).unwrap(), Answer::Accept);
        assert_eq!(decide_answer(JoinStatus::Pending, false).unwrap(), Answer::Decline);
        assert_eq!(
            decide_answer(JoinStatus::Accepted, true).unwrap(),
            Answer::AlreadyAccepted
        );

        let declined_again = decide_answer(JoinStatus::Accepted, false).unwrap_err();
        assert_eq!(declined_again.status, Status::Conflict);
        assert!(decide_answer(JoinStatus::Declined, true).is_err());
    }

}
