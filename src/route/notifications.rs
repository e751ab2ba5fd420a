use rocket::response::stream::{Event, EventStream};
use rocket::serde::json::Json;
use rocket::tokio::select;
use rocket::tokio::sync::broadcast::error::RecvError;
use rocket::{Shutdown, State};
use utoipa::ToSchema;

use crate::data::notification::db::{NotificationDbExt, NotificationFanOutExt};
use crate::data::notification::{BroadcastData, GroupMessage, Notification, NotificationStatus};
use crate::data::user::db::UserDbExt;
use crate::middleware::paging::PageState;
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::{problems, Problem};
use crate::store::Store;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UnreadCount {
    pub unread: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MarkedRead {
    pub marked: u64,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct StatusUpdate {
    pub status: NotificationStatus,
}

#[utoipa::path(
    responses((status = 200, description = "Notifications visible to the caller, newest first", body = Vec<Notification>)),
    security(("jwt" = []))
)]
#[get("/notifications")]
#[tracing::instrument(skip(store))]
pub async fn notification_list(
    page: PageState,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<Vec<Notification>>, Problem> {
    let role = store.current_role(&auth).await?;
    Ok(Json(
        store.list_for_user(&auth.user, role, page).await?,
    ))
}

#[utoipa::path(
    responses((status = 200, description = "Unread notification count", body = UnreadCount)),
    security(("jwt" = []))
)]
#[get("/notifications/unread")]
#[tracing::instrument(skip(store))]
pub async fn notification_unread(
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<UnreadCount>, Problem> {
    let role = store.current_role(&auth).await?;
    Ok(Json(UnreadCount {
        unread: store.unread_count(&auth.user, role).await?,
    }))
}

#[utoipa::path(
    responses((status = 200, description = "Number of notifications marked read", body = MarkedRead)),
    security(("jwt" = []))
)]
#[post("/notifications/read")]
#[tracing::instrument(skip(store))]
pub async fn notification_mark_read(
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<MarkedRead>, Problem> {
    let role = store.current_role(&auth).await?;
    Ok(Json(MarkedRead {
        marked: store.mark_all_read(&auth.user, role).await?,
    }))
}

/// Accepted and declined are set by the request workflows only.
#[utoipa::path(
    request_body = StatusUpdate,
    responses(
        (status = 200, description = "Status changed"),
        (status = 400, description = "Status can't be set directly", body = Problem),
        (status = 404, description = "No such notification visible to the caller", body = Problem),
    ),
    security(("jwt" = []))
)]
#[put("/notifications/<id>/status", format = "json", data = "<update>")]
#[tracing::instrument(skip(store))]
pub async fn notification_set_status(
    id: &str,
    update: Json<StatusUpdate>,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<(), Problem> {
    if !matches!(update.status, NotificationStatus::Read | NotificationStatus::Unread) {
        return Err(problems::bad_request(
            "Bad notification status.",
            "Only read and unread can be set directly.",
        ));
    }

    let role = store.current_role(&auth).await?;
    store
        .set_status(id, &auth.user, role, update.status)
        .await
}

/// Broadcast to every user of a role.
#[utoipa::path(
    request_body = BroadcastData,
    responses(
        (status = 200, description = "Stored notification", body = Notification),
        (status = 400, description = "Missing title or message", body = Problem),
        (status = 403, description = "Not an admin", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/notifications", format = "json", data = "<data>")]
#[tracing::instrument(skip(store))]
pub async fn notification_broadcast(
    data: Json<BroadcastData>,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<Notification>, Problem> {
    let sender = store
        .confirm_admin(&auth, "broadcast notifications")
        .await?;
    Ok(Json(store.broadcast(&sender, &data).await?))
}

/// Message every member of an advised group.
#[utoipa::path(
    request_body = GroupMessage,
    responses(
        (status = 200, description = "One notification per member", body = Vec<Notification>),
        (status = 403, description = "Not the group's advisor", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/groups/<id>/notify", format = "json", data = "<data>")]
#[tracing::instrument(skip(store))]
pub async fn notification_group(
    id: &str,
    data: Json<GroupMessage>,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<Vec<Notification>>, Problem> {
    let sender = store.require_user(&auth.user).await?;
    Ok(Json(store.notify_group(&sender, id, &data).await?))
}

/// Live feed of new notifications visible to the caller.
#[utoipa::path(
    responses((status = 200, description = "Server-sent notification events", content_type = "text/event-stream")),
    security(("jwt" = []))
)]
#[get("/notifications/stream")]
pub async fn notification_stream(
    auth: UserRoleToken,
    store: &State<Store>,
    mut end: Shutdown,
) -> Result<EventStream![], Problem> {
    let role = store.current_role(&auth).await?;
    let mut events = store.subscribe();
    tracing::debug!("User {} subscribed to notifications", auth.user);

    Ok(EventStream! {
        loop {
            let notification = select! {
                received = events.recv() => match received {
                    Ok(notification) => notification,
                    Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Notification stream of {} lagged by {}", auth.user, skipped);
                        continue;
                    }
                },
                _ = &mut end => break,
            };

            if notification.visible_to(&auth.user, role) {
                yield Event::json(&notification).event("notification");
            }
        }
    })
}
