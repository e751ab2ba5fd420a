use chrono::{DateTime, Utc};
use rocket::request::FromParam;
use utoipa::ToSchema;

use crate::resp::problem::{problems, Problem};
use crate::util;

pub mod db;

pub static CHAT_READ_COLLECTION_NAME: &str = "chatReads";

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ChatKind {
    Private,
    Group,
    AdminGroup,
    AdvisorGroup,
}

impl ChatKind {
    pub const ALL: [ChatKind; 4] = [
        ChatKind::Private,
        ChatKind::Group,
        ChatKind::AdminGroup,
        ChatKind::AdvisorGroup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
            ChatKind::AdminGroup => "admin-group",
            ChatKind::AdvisorGroup => "advisor-group",
        }
    }

    /// Parent collection holding the rooms of this kind.
    pub fn collection(self) -> &'static str {
        match self {
            ChatKind::Private => "messages",
            ChatKind::Group => "groupMessages",
            ChatKind::AdminGroup => "adminGroupMessages",
            ChatKind::AdvisorGroup => "advisorGroupMessages",
        }
    }

    pub fn rooms_collection(self) -> String {
        self.collection().to_string()
    }

    pub fn messages_collection(self) -> String {
        format!("{}.chats", self.collection())
    }

    pub fn is_group_room(self) -> bool {
        self != ChatKind::Private
    }
}

impl<'a> FromParam<'a> for ChatKind {
    type Error = &'a str;

    fn from_param(param: &'a str) -> Result<Self, Self::Error> {
        ChatKind::ALL
            .into_iter()
            .find(|it| it.as_str() == param)
            .ok_or(param)
    }
}

impl From<ChatKind> for bson::Bson {
    fn from(kind: ChatKind) -> Self {
        bson::Bson::String(kind.as_str().to_string())
    }
}

/// Room id shared by two users regardless of who opens it first.
pub fn private_room_id(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}_{}", a, b)
    } else {
        format!("{}_{}", b, a)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatRoom {
    #[serde(rename = "_id")]
    pub id: String,
    pub kind: ChatKind,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(with = "chrono::serde::ts_milliseconds", default = "util::now")]
    #[schema(value_type = i64)]
    pub created_at: DateTime<Utc>,
}

impl ChatRoom {
    pub fn has_member(&self, user: &str) -> bool {
        self.members.iter().any(|it| it == user)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: String,
    pub room: String,
    pub sender: String,
    pub display_name: String,
    #[serde(default)]
    pub photo_url: String,
    pub text: String,
    #[serde(with = "chrono::serde::ts_milliseconds", default = "util::now")]
    #[schema(value_type = i64)]
    pub sent_at: DateTime<Utc>,
}

/// Point up to which a user has read a room.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatRead {
    #[serde(rename = "_id")]
    pub id: String,
    pub kind: ChatKind,
    pub room: String,
    pub user: String,
    #[serde(with = "chrono::serde::ts_milliseconds", default = "util::now")]
    #[schema(value_type = i64)]
    pub last_read: DateTime<Utc>,
}

impl ChatRead {
    pub fn id_for(kind: ChatKind, room: &str, user: &str) -> String {
        format!("{}:{}:{}", kind.as_str(), room, user)
    }

    pub fn new(kind: ChatKind, room: &str, user: &str) -> ChatRead {
        ChatRead {
            id: ChatRead::id_for(kind, room, user),
            kind,
            room: room.to_string(),
            user: user.to_string(),
            last_read: util::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UnreadMessages {
    pub kind: ChatKind,
    pub room: String,
    pub unread: u64,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct MessageData {
    pub text: String,
}

impl MessageData {
    pub fn validate(&self) -> Result<(), Problem> {
        if util::is_blank(&self.text) {
            return Err(problems::bad_request(
                "Bad message.",
                "Message text can't be empty.",
            ));
        }
        if self.text.len() > 4096 {
            return Err(problems::bad_request(
                "Bad message.",
                "Messages are limited to 4096 characters (bytes).",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_room_id_is_order_independent() {
        assert_eq!(private_room_id("bob", "alice"), "alice_bob");
        assert_eq!(private_room_id("alice", "bob"), "alice_bob");
    }

    #[test]
    fn kinds_parse_from_path() {
        assert_eq!(ChatKind::from_param("admin-group"), Ok(ChatKind::AdminGroup));
        assert_eq!(ChatKind::from_param("private"), Ok(ChatKind::Private));
        assert!(ChatKind::from_param("everyone").is_err());
    }

    #[test]
    fn messages_live_under_parent_collection() {
        assert_eq!(ChatKind::Group.messages_collection(), "groupMessages.chats");
        assert_eq!(
            ChatKind::AdvisorGroup.messages_collection(),
            "advisorGroupMessages.chats"
        );
    }

    #[test]
    fn kind_serializes_like_path() {
        assert_eq!(
            serde_json::to_string(&ChatKind::AdvisorGroup).unwrap(),
            "\"advisor-group\""
        );
    }

    #[test]
    fn read_marker_is_per_user_and_room() {
        let read = ChatRead::new(ChatKind::Group, "g1", "a");
        assert_eq!(read.id, "group:g1:a");
        assert_ne!(read.id, ChatRead::id_for(ChatKind::AdminGroup, "g1", "a"));
        assert_ne!(read.id, ChatRead::id_for(ChatKind::Group, "g1", "b"));
    }

    #[test]
    fn blank_message_is_rejected() {
        let blank = MessageData {
            text: " \n ".to_string(),
        };
        assert!(blank.validate().is_err());
        assert!(MessageData {
            text: "hi".to_string()
        }
        .validate()
        .is_ok());
    }
}
