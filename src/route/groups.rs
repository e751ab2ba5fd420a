use rocket::serde::json::Json;
use rocket::State;

use crate::config::Config;
use crate::data::group::db::{
    GroupDbExt, GroupModerationExt, IdeaSelection, ProgressUpload, RenameGroup,
};
use crate::data::group::{Group, Ideas};
use crate::data::user::db::UserDbExt;
use crate::middleware::paging::PageState;
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::Problem;
use crate::role::Role;
use crate::store::Store;

#[utoipa::path(
    responses(
        (status = 200, description = "Caller's group, if any", body = Option<Group>),
    ),
    security(("jwt" = []))
)]
#[get("/groups/mine")]
#[tracing::instrument(skip(store))]
pub async fn group_mine(
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<Option<Group>>, Problem> {
    Ok(Json(store.group_of_member(&auth.user).await?))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Group", body = Group),
        (status = 404, description = "No such group", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/groups/<id>")]
#[tracing::instrument(skip(store))]
pub async fn group_get(
    id: &str,
    _auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<Group>, Problem> {
    Ok(Json(store.require_group(id).await?))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Page of groups", body = Vec<Group>),
        (status = 403, description = "Not an admin", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/groups")]
#[tracing::instrument(skip(store))]
pub async fn group_list(
    page: PageState,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<Vec<Group>>, Problem> {
    store.confirm_admin(&auth, "list all groups").await?;
    Ok(Json(store.list_groups(page).await?))
}

/// Groups with a free seat.
#[utoipa::path(
    responses((status = 200, description = "Open groups", body = Vec<Group>)),
    security(("jwt" = []))
)]
#[get("/groups/open")]
#[tracing::instrument(skip(store, config))]
pub async fn group_open(
    _auth: UserRoleToken,
    store: &State<Store>,
    config: &State<Config>,
) -> Result<Json<Vec<Group>>, Problem> {
    Ok(Json(store.list_open_groups(config.max_group_members).await?))
}

#[utoipa::path(
    request_body = RenameGroup,
    responses(
        (status = 200, description = "Renamed group", body = Group),
        (status = 403, description = "Not a member", body = Problem),
    ),
    security(("jwt" = []))
)]
#[put("/groups/<id>/name", format = "json", data = "<rename>")]
#[tracing::instrument(skip(store))]
pub async fn group_rename(
    id: &str,
    rename: Json<RenameGroup>,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<Group>, Problem> {
    Ok(Json(store.rename_group(id, &auth.user, &rename.name).await?))
}

/// Overwrite all five idea slots.
#[utoipa::path(
    request_body = Ideas,
    responses(
        (status = 200, description = "Group with saved ideas", body = Group),
        (status = 409, description = "Ideas are locked", body = Problem),
    ),
    security(("jwt" = []))
)]
#[put("/groups/<id>/ideas", format = "json", data = "<ideas>")]
#[tracing::instrument(skip(store))]
pub async fn group_ideas(
    id: &str,
    ideas: Json<Ideas>,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<Group>, Problem> {
    Ok(Json(store.save_ideas(id, &auth.user, ideas.into_inner()).await?))
}

#[utoipa::path(
    request_body = IdeaSelection,
    responses(
        (status = 200, description = "Group with its final idea", body = Group),
        (status = 400, description = "Bad selection", body = Problem),
        (status = 403, description = "Not an admin", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/groups/<id>/approve", format = "json", data = "<selection>")]
#[tracing::instrument(skip(store))]
pub async fn group_approve(
    id: &str,
    selection: Json<IdeaSelection>,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<Group>, Problem> {
    store.confirm_admin(&auth, "approve ideas").await?;
    Ok(Json(store.approve_idea(id, &selection.ideas).await?))
}

#[utoipa::path(
    request_body = ProgressUpload,
    responses(
        (status = 200, description = "Group with recorded upload", body = Group),
        (status = 404, description = "Unknown semester or task", body = Problem),
    ),
    security(("jwt" = []))
)]
#[put("/groups/<id>/progress", format = "json", data = "<upload>")]
#[tracing::instrument(skip(store))]
pub async fn group_progress(
    id: &str,
    upload: Json<ProgressUpload>,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<Group>, Problem> {
    Ok(Json(store.record_progress(id, &auth.user, &upload).await?))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Remaining group, none when it was dissolved", body = Option<Group>),
        (status = 403, description = "Not an admin", body = Problem),
    ),
    security(("jwt" = []))
)]
#[delete("/groups/<id>/members/<user>")]
#[tracing::instrument(skip(store))]
pub async fn group_remove_member(
    id: &str,
    user: &str,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<Option<Group>>, Problem> {
    store.confirm_admin(&auth, "remove group members").await?;
    Ok(Json(store.remove_member(id, user).await?))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Deleted group", body = Group),
        (status = 403, description = "Not an admin", body = Problem),
    ),
    security(("jwt" = []))
)]
#[delete("/groups/<id>")]
#[tracing::instrument(skip(store))]
pub async fn group_delete(
    id: &str,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<Group>, Problem> {
    store.confirm_admin(&auth, "delete groups").await?;
    Ok(Json(store.delete_group(id).await?))
}

/// Groups waiting for final idea approval.
#[utoipa::path(
    responses((status = 200, description = "Groups with five submitted ideas", body = Vec<Group>)),
    security(("jwt" = []))
)]
#[get("/groups/ideas/pending")]
#[tracing::instrument(skip(store))]
pub async fn group_pending_ideas(
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<Vec<Group>>, Problem> {
    store.confirm_admin(&auth, "review ideas").await?;
    Ok(Json(store.pending_ideas().await?))
}

#[utoipa::path(
    responses((status = 200, description = "Groups advised by the caller", body = Vec<Group>)),
    security(("jwt" = []))
)]
#[get("/groups/advised")]
#[tracing::instrument(skip(store))]
pub async fn group_advised(
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<Vec<Group>>, Problem> {
    store
        .confirm_role(&auth, Role::Advisor, "view advised groups")
        .await?;
    Ok(Json(store.advised_groups(&auth.user).await?))
}
