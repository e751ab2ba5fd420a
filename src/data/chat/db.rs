use bson::{doc, Document};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument};
use mongodb::Database;
use rocket::futures::TryStreamExt;

use crate::data::{filter, is_duplicate_key};
use crate::data::group::db::GroupDbExt;
use crate::data::group::Group;
use crate::data::user::db::UserDbExt;
use crate::data::user::User;
use crate::resp::problem::{problems, Problem};
use crate::role::Role;
use crate::store::Transaction;
use crate::util;

use super::{
    private_room_id, ChatKind, ChatRead, ChatRoom, Message, MessageData, UnreadMessages,
    CHAT_READ_COLLECTION_NAME,
};

pub mod problem {
    use crate::resp::problem::{problems, Problem};

    #[inline]
    pub fn not_found(room: &str) -> Problem {
        problems::not_found("Chat room", room)
    }

    #[inline]
    pub fn no_access() -> Problem {
        problems::forbidden("You aren't a member of this chat room.")
    }
}

fn upsert_room(kind: ChatKind, members: &[String]) -> (Document, FindOneAndUpdateOptions) {
    let update = doc! {
        "$setOnInsert": {
            "kind": kind,
            "created_at": util::now().timestamp_millis(),
        },
        "$addToSet": { "members": { "$each": members.to_vec() } },
    };
    let options = FindOneAndUpdateOptions::builder()
        .upsert(true)
        .return_document(ReturnDocument::After)
        .build();
    (update, options)
}

/// Creates the room if missing and makes sure `members` belong to it.
pub async fn ensure_room(
    db: &Database,
    kind: ChatKind,
    id: &str,
    members: &[String],
) -> Result<ChatRoom, Problem> {
    let rooms = db.collection::<ChatRoom>(&kind.rooms_collection());

    let mut attempt = 0;
    loop {
        let (update, options) = upsert_room(kind, members);
        match rooms
            .find_one_and_update(filter::by_id(id), update, options)
            .await
        {
            Ok(Some(room)) => return Ok(room),
            Ok(None) => return Err(problem::not_found(id)),
            // two upserts racing on the same id; the loser retries as an update
            Err(e) if attempt == 0 && is_duplicate_key(&e) => {
                tracing::debug!("Room {} was created concurrently, retrying", id);
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

pub(crate) async fn ensure_room_in(
    tx: &mut Transaction<'_>,
    kind: ChatKind,
    id: &str,
    members: &[String],
) -> Result<ChatRoom, Problem> {
    let rooms = tx.collection::<ChatRoom>(&kind.rooms_collection());
    let (update, options) = upsert_room(kind, members);

    rooms
        .find_one_and_update_with_session(filter::by_id(id), update, options, tx.session())
        .await?
        .ok_or_else(|| problem::not_found(id))
}

pub(crate) async fn leave_group_rooms_in(
    tx: &mut Transaction<'_>,
    group: &str,
    user: &str,
) -> Result<(), Problem> {
    for kind in ChatKind::ALL.into_iter().filter(|it| it.is_group_room()) {
        let rooms = tx.collection::<ChatRoom>(&kind.rooms_collection());
        rooms
            .update_one_with_session(
                filter::by_id(group),
                doc! { "$pull": { "members": user } },
                None,
                tx.session(),
            )
            .await?;
    }
    Ok(())
}

/// Drops the rooms of a dissolved group together with their messages.
pub(crate) async fn close_group_rooms_in(tx: &mut Transaction<'_>, group: &str) -> Result<(), Problem> {
    for kind in ChatKind::ALL.into_iter().filter(|it| it.is_group_room()) {
        let rooms = tx.collection::<ChatRoom>(&kind.rooms_collection());
        rooms
            .delete_one_with_session(filter::by_id(group), None, tx.session())
            .await?;

        let messages = tx.collection::<Message>(&kind.messages_collection());
        messages
            .delete_many_with_session(doc! { "room": group }, None, tx.session())
            .await?;
    }
    Ok(())
}

/// Explicit member list for a group room.
pub fn group_room_members(kind: ChatKind, group: &Group, caller: &User) -> Vec<String> {
    let mut members = group.member_ids.clone();
    match kind {
        ChatKind::AdminGroup if caller.role.is_admin() => members.push(caller.id.clone()),
        ChatKind::AdvisorGroup => {
            if let Some(advisor) = &group.advisor {
                members.push(advisor.id.clone());
            }
        }
        _ => {}
    }
    members
}

/// Whether `caller` may open a room of `kind` for `group`.
pub fn may_open_group_room(kind: ChatKind, group: &Group, caller: &User) -> Result<(), Problem> {
    let member = group.has_member(&caller.id);
    let allowed = match kind {
        ChatKind::Private => false,
        ChatKind::Group => member,
        ChatKind::AdminGroup => member || caller.role.is_admin(),
        ChatKind::AdvisorGroup => {
            if group.advisor.is_none() {
                return Err(problems::conflict(
                    "No advisor assigned.",
                    "The group has no advisor to chat with yet.",
                ));
            }
            member || group.is_advised_by(&caller.id)
        }
    };

    if allowed {
        Ok(())
    } else {
        Err(problem::no_access())
    }
}

fn may_post(kind: ChatKind, room: &ChatRoom, user: &str, role: Role) -> bool {
    room.has_member(user) || (kind == ChatKind::AdminGroup && role.is_admin())
}

pub trait ChatDbExt {
    async fn open_room(&self, kind: ChatKind, key: &str, caller: &User) -> Result<ChatRoom, Problem>;
    async fn require_room(
        &self,
        kind: ChatKind,
        room: &str,
        user: &str,
        role: Role,
    ) -> Result<ChatRoom, Problem>;
    async fn send_message(
        &self,
        kind: ChatKind,
        room: &str,
        sender: &User,
        data: &MessageData,
    ) -> Result<Message, Problem>;
    async fn list_messages(
        &self,
        kind: ChatKind,
        room: &str,
        user: &str,
        role: Role,
    ) -> Result<Vec<Message>, Problem>;
    async fn list_rooms(&self, user: &str) -> Result<Vec<ChatRoom>, Problem>;

    async fn mark_read(
        &self,
        kind: ChatKind,
        room: &str,
        user: &str,
        role: Role,
    ) -> Result<ChatRead, Problem>;
    async fn unread_count(
        &self,
        kind: ChatKind,
        room: &str,
        user: &str,
        role: Role,
    ) -> Result<UnreadMessages, Problem>;
}

/// Messages from other people sent after the user's read marker.
pub fn unread_filter(room: &str, user: &str, last_read: Option<&ChatRead>) -> Document {
    let mut query = doc! {
        "room": room,
        "sender": { "$ne": user },
    };
    if let Some(read) = last_read {
        query.insert("sent_at", doc! { "$gt": read.last_read.timestamp_millis() });
    }
    query
}

impl ChatDbExt for Database {
    async fn open_room(&self, kind: ChatKind, key: &str, caller: &User) -> Result<ChatRoom, Problem> {
        match kind {
            ChatKind::Private => {
                if key == caller.id {
                    return Err(problems::bad_request(
                        "Bad chat partner.",
                        "You can't open a private chat with yourself.",
                    ));
                }
                let other = self.require_user(key).await?;
                let id = private_room_id(&caller.id, &other.id);
                ensure_room(self, kind, &id, &[caller.id.clone(), other.id]).await
            }
            _ => {
                let group = self.require_group(key).await?;
                may_open_group_room(kind, &group, caller)?;
                let members = group_room_members(kind, &group, caller);
                ensure_room(self, kind, &group.id, &members).await
            }
        }
    }

    async fn require_room(
        &self,
        kind: ChatKind,
        room: &str,
        user: &str,
        role: Role,
    ) -> Result<ChatRoom, Problem> {
        let found = self
            .collection::<ChatRoom>(&kind.rooms_collection())
            .find_one(filter::by_id(room), None)
            .await?
            .ok_or_else(|| problem::not_found(room))?;

        if !may_post(kind, &found, user, role) {
            return Err(problem::no_access());
        }
        Ok(found)
    }

    async fn send_message(
        &self,
        kind: ChatKind,
        room: &str,
        sender: &User,
        data: &MessageData,
    ) -> Result<Message, Problem> {
        data.validate()?;
        let room = self.require_room(kind, room, &sender.id, sender.role).await?;

        let message = Message {
            id: util::new_id(),
            room: room.id,
            sender: sender.id.clone(),
            display_name: sender.name.clone(),
            photo_url: sender.image.clone().unwrap_or_default(),
            text: data.text.trim().to_string(),
            sent_at: util::now(),
        };

        self.collection::<Message>(&kind.messages_collection())
            .insert_one(&message, None)
            .await?;
        Ok(message)
    }

    async fn list_messages(
        &self,
        kind: ChatKind,
        room: &str,
        user: &str,
        role: Role,
    ) -> Result<Vec<Message>, Problem> {
        let room = self.require_room(kind, room, user, role).await?;

        let messages = self
            .collection::<Message>(&kind.messages_collection())
            .find(
                doc! { "room": room.id.as_str() },
                FindOptions::builder().sort(doc! { "sent_at": 1 }).build(),
            )
            .await?
            .try_collect()
            .await?;

        Ok(messages)
    }

    async fn list_rooms(&self, user: &str) -> Result<Vec<ChatRoom>, Problem> {
        let mut rooms = Vec::new();
        for kind in ChatKind::ALL {
            let mut found: Vec<ChatRoom> = self
                .collection::<ChatRoom>(&kind.rooms_collection())
                .find(doc! { "members": user }, None)
                .await?
                .try_collect()
                .await?;
            rooms.append(&mut found);
        }
        Ok(rooms)
    }

    async fn mark_read(
        &self,
        kind: ChatKind,
        room: &str,
        user: &str,
        role: Role,
    ) -> Result<ChatRead, Problem> {
        let room = self.require_room(kind, room, user, role).await?;
        let read = ChatRead::new(kind, &room.id, user);

        self.collection::<ChatRead>(CHAT_READ_COLLECTION_NAME)
            .update_one(
                filter::by_id(&read.id),
                doc! {
                    "$set": { "last_read": read.last_read.timestamp_millis() },
                    "$setOnInsert": {
                        "kind": kind,
                        "room": read.room.as_str(),
                        "user": user,
                    },
                },
                mongodb::options::UpdateOptions::builder().upsert(true).build(),
            )
            .await?;

        tracing::debug!("User {} read {} room {}", user, kind.as_str(), read.room);
        Ok(read)
    }

    async fn unread_count(
        &self,
        kind: ChatKind,
        room: &str,
        user: &str,
        role: Role,
    ) -> Result<UnreadMessages, Problem> {
        let room = self.require_room(kind, room, user, role).await?;

        let read = self
            .collection::<ChatRead>(CHAT_READ_COLLECTION_NAME)
            .find_one(filter::by_id(&ChatRead::id_for(kind, &room.id, user)), None)
            .await?;
        let unread = self
            .collection::<Message>(&kind.messages_collection())
            .count_documents(unread_filter(&room.id, user, read.as_ref()), None)
            .await?;

        Ok(UnreadMessages {
            kind,
            room: room.id,
            unread,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::user::MemberRef;
    use rocket::http::Status;

    fn user(id: &str, role: Role) -> User {
        let mut user = User::new(id, format!("{}@uni.edu", id), role);
        user.id = id.to_string();
        user
    }

    fn group_with_advisor() -> Group {
        let mut group = Group::new(vec![user("a", Role::Student).member_ref()]);
        group.advisor = Some(MemberRef {
            id: "adv".to_string(),
            name: "Advisor".to_string(),
            image: String::new(),
        });
        group
    }

    #[test]
    fn advisor_room_includes_advisor() {
        let group = group_with_advisor();
        let members = group_room_members(ChatKind::AdvisorGroup, &group, &user("a", Role::Student));
        assert_eq!(members, vec!["a".to_string(), "adv".to_string()]);
    }

    #[test]
    fn admin_room_adds_opening_admin() {
        let group = group_with_advisor();
        let members = group_room_members(ChatKind::AdminGroup, &group, &user("root", Role::Admin));
        assert_eq!(members, vec!["a".to_string(), "root".to_string()]);
    }

    #[test]
    fn outsiders_cannot_open_group_rooms() {
        let group = group_with_advisor();
        let outsider = user("z", Role::Student);

        let err = may_open_group_room(ChatKind::Group, &group, &outsider).unwrap_err();
        assert_eq!(err.status, Status::Forbidden);
        assert!(may_open_group_room(ChatKind::AdvisorGroup, &group, &user("adv", Role::Advisor)).is_ok());
        assert!(may_open_group_room(ChatKind::AdminGroup, &group, &user("root", Role::Admin)).is_ok());
    }

    #[test]
    fn advisor_room_needs_assigned_advisor() {
        let group = Group::new(vec![user("a", Role::Student).member_ref()]);
        let err = may_open_group_room(ChatKind::AdvisorGroup, &group, &user("a", Role::Student))
            .unwrap_err();
        assert_eq!(err.status, Status::Conflict);
    }

    #[test]
    fn unread_skips_own_and_already_read_messages() {
        let never_read = unread_filter("a_b", "a", None);
        assert_eq!(never_read.get_document("sender").unwrap().get_str("$ne").unwrap(), "a");
        assert!(!never_read.contains_key("sent_at"));

        let read = ChatRead::new(ChatKind::Private, "a_b", "a");
        let after = unread_filter("a_b", "a", Some(&read));
        assert_eq!(
            after.get_document("sent_at").unwrap().get_i64("$gt").unwrap(),
            read.last_read.timestamp_millis()
        );
    }

    #[test]
    fn upsert_only_sets_creation_fields_once() {
        let (update, _) = upsert_room(ChatKind::Private, &["a".to_string(), "b".to_string()]);
        let on_insert = update.get_document("$setOnInsert").unwrap();

        assert!(on_insert.contains_key("created_at"));
        assert!(!on_insert.contains_key("members"));
        assert!(update.get_document("$addToSet").is_ok());
    }

    #[rocket::async_test]
    async fn racing_room_creation_yields_one_room() {
        let Some(store) = crate::store::test_store().await else { return };
        let members = vec!["a".to_string(), "b".to_string()];
        let id = private_room_id("a", "b");

        let (first, second) = rocket::tokio::join!(
            ensure_room(&store, ChatKind::Private, &id, &members),
            ensure_room(&store, ChatKind::Private, &id, &members),
        );
        let (first, second) = (first.unwrap(), second.unwrap());
        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);

        let rooms = store
            .collection::<ChatRoom>(&ChatKind::Private.rooms_collection())
            .count_documents(None, None)
            .await
            .unwrap();
        assert_eq!(rooms, 1);

        crate::store::drop_test_store(store).await;
    }
}
