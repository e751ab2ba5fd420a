use rocket::serde::json::Json;
use rocket::State;

use crate::data::chat::db::ChatDbExt;
use crate::data::chat::{ChatKind, ChatRead, ChatRoom, Message, MessageData, UnreadMessages};
use crate::data::user::db::UserDbExt;
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::Problem;
use crate::store::Store;

#[utoipa::path(
    responses((status = 200, description = "Rooms the caller belongs to", body = Vec<ChatRoom>)),
    security(("jwt" = []))
)]
#[get("/chats")]
#[tracing::instrument(skip(store))]
pub async fn chat_rooms(
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<Vec<ChatRoom>>, Problem> {
    Ok(Json(store.list_rooms(&auth.user).await?))
}

/// Open (creating if needed) a room.
///
/// `key` is the other user's id for private rooms and the group id otherwise.
#[utoipa::path(
    params(
        ("kind" = ChatKind, Path, description = "private, group, admin-group or advisor-group"),
        ("key" = String, Path, description = "Other user id or group id"),
    ),
    responses(
        (status = 200, description = "The room", body = ChatRoom),
        (status = 403, description = "Caller can't access the room", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/chats/<kind>/<key>")]
#[tracing::instrument(skip(store))]
pub async fn chat_open(
    kind: ChatKind,
    key: &str,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<ChatRoom>, Problem> {
    let caller = store.require_user(&auth.user).await?;
    Ok(Json(store.open_room(kind, key, &caller).await?))
}

#[utoipa::path(
    params(
        ("kind" = ChatKind, Path, description = "private, group, admin-group or advisor-group"),
        ("room" = String, Path, description = "Room id"),
    ),
    responses(
        (status = 200, description = "Messages in send order", body = Vec<Message>),
        (status = 403, description = "Not a member of the room", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/chats/<kind>/<room>/messages")]
#[tracing::instrument(skip(store))]
pub async fn chat_messages(
    kind: ChatKind,
    room: &str,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<Vec<Message>>, Problem> {
    let role = store.current_role(&auth).await?;
    Ok(Json(
        store
            .list_messages(kind, room, &auth.user, role)
            .await?,
    ))
}

#[utoipa::path(
    params(
        ("kind" = ChatKind, Path, description = "private, group, admin-group or advisor-group"),
        ("room" = String, Path, description = "Room id"),
    ),
    request_body = MessageData,
    responses(
        (status = 200, description = "Stored message", body = Message),
        (status = 400, description = "Empty message", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/chats/<kind>/<room>/messages", format = "json", data = "<data>")]
#[tracing::instrument(skip(store))]
pub async fn chat_send(
    kind: ChatKind,
    room: &str,
    data: Json<MessageData>,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<Message>, Problem> {
    data.validate()?;

    let sender = store.require_user(&auth.user).await?;
    Ok(Json(store.send_message(kind, room, &sender, &data).await?))
}

#[utoipa::path(
    params(
        ("kind" = ChatKind, Path, description = "private, group, admin-group or advisor-group"),
        ("room" = String, Path, description = "Room id"),
    ),
    responses(
        (status = 200, description = "The caller's read marker", body = ChatRead),
        (status = 403, description = "Not a member of the room", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/chats/<kind>/<room>/read")]
#[tracing::instrument(skip(store))]
pub async fn chat_mark_read(
    kind: ChatKind,
    room: &str,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<ChatRead>, Problem> {
    let role = store.current_role(&auth).await?;
    Ok(Json(
        store.mark_read(kind, room, &auth.user, role).await?,
    ))
}

/// Messages from others since the caller last marked the room read.
#[utoipa::path(
    params(
        ("kind" = ChatKind, Path, description = "private, group, admin-group or advisor-group"),
        ("room" = String, Path, description = "Room id"),
    ),
    responses(
        (status = 200, description = "Unread message count", body = UnreadMessages),
        (status = 403, description = "Not a member of the room", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/chats/<kind>/<room>/unread")]
#[tracing::instrument(skip(store))]
pub async fn chat_unread(
    kind: ChatKind,
    room: &str,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<UnreadMessages>, Problem> {
    let role = store.current_role(&auth).await?;
    Ok(Json(
        store.unread_count(kind, room, &auth.user, role).await?,
    ))
}
