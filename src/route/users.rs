use rocket::http::{Cookie, CookieJar};
use rocket::serde::json::Json;
use rocket::State;
use utoipa::ToSchema;

use crate::config::Config;
use crate::data::user::db::{UserAccountExt, UserDbExt, UserLoginData, UserSignupData};
use crate::data::user::{ProfileUpdate, UserResponse};
use crate::middleware::paging::PageState;
use crate::resp::jwt::{UserRoleToken, AUTH_COOKIE_NAME};
use crate::resp::problem::{problems, Problem};
use crate::role::Role;
use crate::security::Security;
use crate::store::Store;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub user: UserResponse,
    pub token: String,
    /// Client route to land on.
    pub home: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AvatarUpdate {
    pub image: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RoleUpdate {
    pub role: Role,
}

fn session(
    user: UserResponse,
    cookies: &CookieJar<'_>,
    security: &Security,
) -> Result<Json<LoginResponse>, Problem> {
    let urt = UserRoleToken::for_user(&user.id, user.role);
    let token = urt.encode_jwt(&security.jwt_secret)?;
    cookies.add(urt.cookie(&security.jwt_secret)?);

    Ok(Json(LoginResponse {
        home: user.role.home().to_string(),
        user,
        token,
    }))
}

/// Register a new account and log it in.
#[utoipa::path(
    request_body = UserSignupData,
    responses(
        (status = 200, description = "Account created", body = LoginResponse),
        (status = 400, description = "Invalid signup data", body = Problem),
        (status = 409, description = "Email already registered", body = Problem),
    )
)]
#[post("/users", format = "json", data = "<signup>")]
#[tracing::instrument(skip(store, config, security, cookies))]
pub async fn user_create(
    signup: Json<UserSignupData>,
    caller: Option<UserRoleToken>,
    cookies: &CookieJar<'_>,
    store: &State<Store>,
    config: &State<Config>,
    security: &State<Security>,
) -> Result<Json<LoginResponse>, Problem> {
    signup.validate()?;

    let caller_is_admin = match &caller {
        Some(token) if token.is_admin() => {
            store.confirm_admin(token, "register other accounts").await?;
            true
        }
        _ => false,
    };
    let role = if config.is_admin_email(&signup.email) {
        Role::Admin
    } else {
        match signup.role {
            Some(role) if caller_is_admin => role,
            _ => Role::Student,
        }
    };

    let user = store
        .create_user(signup.into_inner(), role, config.password_cost)
        .await?;

    if caller_is_admin {
        // admins registering accounts keep their own session
        let user = UserResponse::from(user);
        return Ok(Json(LoginResponse {
            home: user.role.home().to_string(),
            token: String::new(),
            user,
        }));
    }

    session(user.into(), cookies, security)
}

#[utoipa::path(
    request_body = UserLoginData,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 401, description = "Bad email or password", body = Problem),
    )
)]
#[post("/login", format = "json", data = "<login>")]
#[tracing::instrument(skip(store, security, cookies))]
pub async fn login_submit(
    login: Json<UserLoginData>,
    cookies: &CookieJar<'_>,
    store: &State<Store>,
    security: &State<Security>,
) -> Result<Json<LoginResponse>, Problem> {
    login.validate()?;

    let user = store.login(&login).await?;
    tracing::info!("User {} logged in", user.id);

    session(user.into(), cookies, security)
}

#[utoipa::path(responses((status = 200, description = "Session cookie removed")))]
#[post("/logout")]
pub fn logout(cookies: &CookieJar<'_>) {
    cookies.remove(Cookie::build(AUTH_COOKIE_NAME).path("/").build());
}

#[utoipa::path(
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Not logged in", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/users/me")]
#[tracing::instrument(skip(store))]
pub async fn user_me(auth: UserRoleToken, store: &State<Store>) -> Result<Json<UserResponse>, Problem> {
    Ok(Json(store.require_user(&auth.user).await?.into()))
}

#[utoipa::path(
    responses(
        (status = 200, description = "User profile", body = UserResponse),
        (status = 404, description = "No such user", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/users/<id>")]
#[tracing::instrument(skip(store))]
pub async fn user_get(
    id: &str,
    _auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<UserResponse>, Problem> {
    Ok(Json(store.require_user(id).await?.into()))
}

#[utoipa::path(
    params(("role" = Option<Role>, Query, description = "Only users with this role")),
    responses(
        (status = 200, description = "Page of users", body = Vec<UserResponse>),
        (status = 403, description = "Not an admin", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/users?<role>")]
#[tracing::instrument(skip(store))]
pub async fn user_list(
    role: Option<Role>,
    page: PageState,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<Vec<UserResponse>>, Problem> {
    store.confirm_admin(&auth, "list all users").await?;

    let users = store.list_users(role, page).await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

/// Students without a group, for building teams.
#[utoipa::path(
    params(("skill" = Option<String>, Query, description = "Only students listing this skill")),
    responses((status = 200, description = "Available students", body = Vec<UserResponse>)),
    security(("jwt" = []))
)]
#[get("/users/available?<skill>")]
#[tracing::instrument(skip(store))]
pub async fn user_available(
    skill: Option<&str>,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<Vec<UserResponse>>, Problem> {
    let users = store.list_available(&auth.user, skill).await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

#[utoipa::path(
    responses((status = 200, description = "Advisors", body = Vec<UserResponse>)),
    security(("jwt" = []))
)]
#[get("/advisors")]
#[tracing::instrument(skip(store))]
pub async fn advisor_list(
    _auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<Vec<UserResponse>>, Problem> {
    let advisors = store
        .list_users(Some(Role::Advisor), PageState::new(0, 100))
        .await?;
    Ok(Json(advisors.into_iter().map(UserResponse::from).collect()))
}

#[utoipa::path(
    request_body = ProfileUpdate,
    responses(
        (status = 200, description = "Updated profile", body = UserResponse),
        (status = 400, description = "Invalid profile data", body = Problem),
    ),
    security(("jwt" = []))
)]
#[put("/users/me", format = "json", data = "<update>")]
#[tracing::instrument(skip(store))]
pub async fn user_update(
    update: Json<ProfileUpdate>,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<UserResponse>, Problem> {
    Ok(Json(store.update_profile(&auth.user, &update).await?.into()))
}

#[utoipa::path(
    request_body = AvatarUpdate,
    responses((status = 200, description = "Updated profile", body = UserResponse)),
    security(("jwt" = []))
)]
#[put("/users/me/image", format = "json", data = "<avatar>")]
#[tracing::instrument(skip(store))]
pub async fn user_avatar(
    avatar: Json<AvatarUpdate>,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<UserResponse>, Problem> {
    if avatar.image.trim().is_empty() {
        return Err(problems::bad_request("Bad image.", "An image URL is required."));
    }

    let update = ProfileUpdate {
        image: Some(avatar.into_inner().image),
        ..Default::default()
    };
    Ok(Json(store.update_profile(&auth.user, &update).await?.into()))
}

#[utoipa::path(
    request_body = RoleUpdate,
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 403, description = "Not an admin", body = Problem),
    ),
    security(("jwt" = []))
)]
#[put("/users/<id>/role", format = "json", data = "<update>")]
#[tracing::instrument(skip(store))]
pub async fn user_set_role(
    id: &str,
    update: Json<RoleUpdate>,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<UserResponse>, Problem> {
    store.confirm_admin(&auth, "change roles").await?;
    Ok(Json(store.set_role(id, update.role).await?.into()))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Id of the deleted user", body = String),
        (status = 403, description = "Not permitted", body = Problem),
    ),
    security(("jwt" = []))
)]
#[delete("/users/<id>")]
#[tracing::instrument(skip(store, cookies))]
pub async fn user_delete(
    id: &str,
    auth: UserRoleToken,
    cookies: &CookieJar<'_>,
    store: &State<Store>,
) -> Result<String, Problem> {
    if auth.user != id {
        store.confirm_admin(&auth, "delete other users").await?;
    }

    let removed = store.delete_account(id).await?;

    if auth.user == id {
        cookies.remove(Cookie::build(AUTH_COOKIE_NAME).path("/").build());
    }
    Ok(removed.id)
}
