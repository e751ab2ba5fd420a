use rocket::serde::json::Json;
use rocket::State;

use crate::config::Config;
use crate::data::advisor::db::{AdvisorDbExt, AdvisorWorkflowExt};
use crate::data::advisor::{
    AdvisorAnswer, AdvisorChoice, AdvisorOutcome, AdvisorRequest, AdvisorRequestDetails,
};
use crate::data::join::db::{JoinDbExt, JoinWorkflowExt};
use crate::data::join::{JoinAnswer, JoinOutcome, JoinRequest};
use crate::data::user::db::UserDbExt;
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::Problem;
use crate::role::Role;
use crate::store::Store;

/// Ask an existing group to take the caller in.
#[utoipa::path(
    responses(
        (status = 200, description = "Request sent to the group's first member", body = JoinRequest),
        (status = 409, description = "Group full, already grouped or duplicate request", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/groups/<id>/join")]
#[tracing::instrument(skip(store, config))]
pub async fn join_group(
    id: &str,
    auth: UserRoleToken,
    store: &State<Store>,
    config: &State<Config>,
) -> Result<Json<JoinRequest>, Problem> {
    let sender = store.require_user(&auth.user).await?;
    Ok(Json(
        store
            .request_join(&sender, id, config.max_group_members)
            .await?,
    ))
}

/// Ask another unjoined student to form a group.
#[utoipa::path(
    responses(
        (status = 200, description = "Request sent", body = JoinRequest),
        (status = 409, description = "Already grouped or duplicate request", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/users/<id>/partner")]
#[tracing::instrument(skip(store))]
pub async fn partner_request(
    id: &str,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<JoinRequest>, Problem> {
    let sender = store.require_user(&auth.user).await?;
    Ok(Json(store.request_partner(&sender, id).await?))
}

#[utoipa::path(
    responses((status = 200, description = "Pending requests addressed to the caller", body = Vec<JoinRequest>)),
    security(("jwt" = []))
)]
#[get("/requests/join/incoming")]
#[tracing::instrument(skip(store))]
pub async fn join_incoming(
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<Vec<JoinRequest>>, Problem> {
    Ok(Json(store.list_incoming(&auth.user).await?))
}

#[utoipa::path(
    responses((status = 200, description = "Requests the caller sent", body = Vec<JoinRequest>)),
    security(("jwt" = []))
)]
#[get("/requests/join/outgoing")]
#[tracing::instrument(skip(store))]
pub async fn join_outgoing(
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<Vec<JoinRequest>>, Problem> {
    Ok(Json(store.list_outgoing(&auth.user).await?))
}

#[utoipa::path(
    request_body = JoinAnswer,
    responses(
        (status = 200, description = "Resolved request and resulting group", body = JoinOutcome),
        (status = 403, description = "Not the receiver", body = Problem),
        (status = 409, description = "Group full or request already answered", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/requests/join/<id>", format = "json", data = "<answer>")]
#[tracing::instrument(skip(store, config))]
pub async fn join_respond(
    id: &str,
    answer: Json<JoinAnswer>,
    auth: UserRoleToken,
    store: &State<Store>,
    config: &State<Config>,
) -> Result<Json<JoinOutcome>, Problem> {
    let responder = store.require_user(&auth.user).await?;
    Ok(Json(
        store
            .respond_join(id, &responder, answer.accept, config.max_group_members)
            .await?,
    ))
}

#[utoipa::path(
    request_body = AdvisorChoice,
    responses(
        (status = 200, description = "Request sent to the advisor", body = AdvisorRequest),
        (status = 409, description = "Group can't request an advisor yet", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/groups/<id>/advisor", format = "json", data = "<choice>")]
#[tracing::instrument(skip(store))]
pub async fn advisor_request(
    id: &str,
    choice: Json<AdvisorChoice>,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<AdvisorRequest>, Problem> {
    let requester = store.require_user(&auth.user).await?;
    Ok(Json(
        store
            .request_advisor(&requester, id, &choice.advisor_id)
            .await?,
    ))
}

#[utoipa::path(
    responses((status = 200, description = "Pending requests for the advisor", body = Vec<AdvisorRequestDetails>)),
    security(("jwt" = []))
)]
#[get("/requests/advisor")]
#[tracing::instrument(skip(store))]
pub async fn advisor_incoming(
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<Vec<AdvisorRequestDetails>>, Problem> {
    store
        .confirm_role(&auth, Role::Advisor, "review advisor requests")
        .await?;
    Ok(Json(store.list_for_advisor(&auth.user).await?))
}

#[utoipa::path(
    request_body = AdvisorAnswer,
    responses(
        (status = 200, description = "Resolved request and updated group", body = AdvisorOutcome),
        (status = 403, description = "Not the requested advisor", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/requests/advisor/<id>", format = "json", data = "<answer>")]
#[tracing::instrument(skip(store))]
pub async fn advisor_respond(
    id: &str,
    answer: Json<AdvisorAnswer>,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<AdvisorOutcome>, Problem> {
    let advisor = store
        .confirm_role(&auth, Role::Advisor, "answer advisor requests")
        .await?;
    Ok(Json(
        store
            .respond_advisor(id, &advisor, answer.approve)
            .await?,
    ))
}
