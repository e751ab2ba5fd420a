use bson::{doc, Document};
use chrono::{DateTime, Utc};
use utoipa::ToSchema;

use crate::data::user::User;
use crate::resp::problem::{problems, Problem};
use crate::role::{Role, RoleTarget};
use crate::util;

pub mod db;

pub static NOTIFICATION_COLLECTION_NAME: &str = "notifications";

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    #[default]
    General,
    GroupRequest,
    GroupJoinRequest,
    AdvisorRequest,
    AdvisorResponse,
}

/// Audience of a notification.
///
/// Requests meant for a single person are always [`Target::User`], so role broadcasts can never
/// leak them to other users.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    User(String),
    Role(RoleTarget),
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    #[default]
    Unread,
    Read,
    Accepted,
    Declined,
}

impl NotificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationStatus::Unread => "unread",
            NotificationStatus::Read => "read",
            NotificationStatus::Accepted => "accepted",
            NotificationStatus::Declined => "declined",
        }
    }
}

impl From<NotificationStatus> for bson::Bson {
    fn from(status: NotificationStatus) -> Self {
        bson::Bson::String(status.as_str().to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Notification {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub kind: NotificationKind,
    pub target: Target,
    /// Sender user id.
    pub from: String,
    pub sender_name: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub status: NotificationStatus,
    #[serde(with = "chrono::serde::ts_milliseconds", default = "util::now")]
    #[schema(value_type = i64)]
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn to_user(
        kind: NotificationKind,
        from: &User,
        to: impl ToString,
        title: impl ToString,
        message: impl ToString,
    ) -> Notification {
        Notification {
            id: util::new_id(),
            kind,
            target: Target::User(to.to_string()),
            from: from.id.clone(),
            sender_name: from.name.clone(),
            title: title.to_string(),
            message: message.to_string(),
            status: NotificationStatus::Unread,
            created_at: util::now(),
        }
    }

    pub fn broadcast(
        from: &User,
        audience: RoleTarget,
        title: impl ToString,
        message: impl ToString,
    ) -> Notification {
        Notification {
            id: util::new_id(),
            kind: NotificationKind::General,
            target: Target::Role(audience),
            from: from.id.clone(),
            sender_name: from.name.clone(),
            title: title.to_string(),
            message: message.to_string(),
            status: NotificationStatus::Unread,
            created_at: util::now(),
        }
    }

    pub fn visible_to(&self, user: &str, role: Role) -> bool {
        match &self.target {
            Target::User(id) => id == user,
            Target::Role(audience) => audience.includes(role),
        }
    }
}

/// Query matching every notification a user may see.
pub fn visibility_filter(user: &str, role: Role) -> Document {
    doc! {
        "$or": [
            { "target.user": user },
            { "target.role": { "$in": [RoleTarget::All.as_str(), RoleTarget::from(role).as_str()] } },
        ]
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct BroadcastData {
    pub target: RoleTarget,
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct GroupMessage {
    pub title: String,
    pub message: String,
}

pub fn validate_message(title: &str, message: &str) -> Result<(), Problem> {
    if util::is_blank(title) || util::is_blank(message) {
        return Err(problems::bad_request(
            "Bad notification.",
            "Both title and message are required.",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> User {
        User::new("Admin", "admin@uni.edu", Role::Admin)
    }

    #[test]
    fn user_target_is_private() {
        let notification = Notification::to_user(
            NotificationKind::GroupJoinRequest,
            &sender(),
            "student-1",
            "Join request",
            "Someone wants to join",
        );

        assert!(notification.visible_to("student-1", Role::Student));
        assert!(!notification.visible_to("student-2", Role::Student));
        assert!(!notification.visible_to("admin-1", Role::Admin));
    }

    #[test]
    fn role_broadcast_reaches_matching_roles() {
        let to_advisors = Notification::broadcast(&sender(), RoleTarget::Advisor, "t", "m");
        assert!(to_advisors.visible_to("x", Role::Advisor));
        assert!(!to_advisors.visible_to("x", Role::Student));

        let to_all = Notification::broadcast(&sender(), RoleTarget::All, "t", "m");
        assert!(to_all.visible_to("x", Role::Student));
        assert!(to_all.visible_to("x", Role::Admin));
    }

    #[test]
    fn target_is_stored_as_tagged_document() {
        let doc = bson::to_document(&Notification::broadcast(
            &sender(),
            RoleTarget::Student,
            "t",
            "m",
        ))
        .unwrap();

        let target = doc.get_document("target").unwrap();
        assert_eq!(target.get_str("role").unwrap(), "student");
        assert_eq!(doc.get_str("status").unwrap(), "unread");
    }

    #[test]
    fn filter_covers_user_and_role_targets() {
        let filter = visibility_filter("u-1", Role::Advisor);
        let alternatives = filter.get_array("$or").unwrap();
        assert_eq!(alternatives.len(), 2);

        let roles = alternatives[1]
            .as_document()
            .and_then(|it| it.get_document("target.role").ok())
            .and_then(|it| it.get_array("$in").ok())
            .unwrap();
        assert!(roles.contains(&bson::Bson::from("advisor")));
        assert!(roles.contains(&bson::Bson::from("all")));
    }

    #[test]
    fn blank_messages_are_rejected() {
        assert!(validate_message("Deadline", "Friday").is_ok());
        assert!(validate_message(" ", "Friday").is_err());
        assert!(validate_message("Deadline", "").is_err());
    }
}
