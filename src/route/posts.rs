use rocket::serde::json::Json;
use rocket::State;

use crate::data::post::db::PostDbExt;
use crate::data::post::{LikeState, Post, PostCreate};
use crate::data::user::db::UserDbExt;
use crate::middleware::paging::PageState;
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::Problem;
use crate::store::Store;

#[derive(Debug, Responder)]
pub enum PostCreated {
    #[response(status = 201, content_type = "json")]
    Created(Json<Post>),
    /// Nothing to post; no document was stored.
    #[response(status = 204)]
    Skipped(()),
}

#[utoipa::path(
    request_body = PostCreate,
    responses(
        (status = 201, description = "Stored post", body = Post),
        (status = 204, description = "Empty post ignored"),
    ),
    security(("jwt" = []))
)]
#[post("/posts", format = "json", data = "<create>")]
#[tracing::instrument(skip(store))]
pub async fn post_create(
    create: Json<PostCreate>,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<PostCreated, Problem> {
    if create.is_empty() {
        return Ok(PostCreated::Skipped(()));
    }

    let author = store.require_user(&auth.user).await?;
    Ok(match store.create_post(&author, create.into_inner()).await? {
        Some(post) => PostCreated::Created(Json(post)),
        None => PostCreated::Skipped(()),
    })
}

#[utoipa::path(
    responses((status = 200, description = "Feed page, newest first", body = Vec<Post>)),
    security(("jwt" = []))
)]
#[get("/posts")]
#[tracing::instrument(skip(store))]
pub async fn post_list(
    page: PageState,
    _auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<Vec<Post>>, Problem> {
    Ok(Json(store.list_posts(page).await?))
}

#[utoipa::path(
    responses((status = 200, description = "Posts written by the user", body = Vec<Post>)),
    security(("jwt" = []))
)]
#[get("/users/<id>/posts")]
#[tracing::instrument(skip(store))]
pub async fn post_by_user(
    id: &str,
    _auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<Vec<Post>>, Problem> {
    Ok(Json(store.posts_by_user(id).await?))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Deleted post", body = Post),
        (status = 403, description = "Not the author or an admin", body = Problem),
    ),
    security(("jwt" = []))
)]
#[delete("/posts/<id>")]
#[tracing::instrument(skip(store))]
pub async fn post_delete(
    id: &str,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<Post>, Problem> {
    let caller = store.require_user(&auth.user).await?;
    Ok(Json(store.delete_post(id, &caller).await?))
}

#[utoipa::path(
    responses((status = 200, description = "Like state after toggling", body = LikeState)),
    security(("jwt" = []))
)]
#[post("/posts/<id>/like")]
#[tracing::instrument(skip(store))]
pub async fn post_like(
    id: &str,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<LikeState>, Problem> {
    Ok(Json(store.toggle_like(id, &auth.user).await?))
}
