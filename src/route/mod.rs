use std::collections::BTreeMap;

use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{Build, Catcher, Request, Rocket, Route};

pub mod chats;
pub mod files;
pub mod groups;
pub mod notifications;
pub mod posts;
pub mod requests;
pub mod semesters;
pub mod users;

use chats::*;
use files::*;
use groups::*;
use notifications::*;
use posts::*;
use requests::*;
use semesters::*;
use users::*;

use utoipa::OpenApi;

use crate::{
    data::{
        advisor as ad, chat as cd, group as gd, join as jd, notification as nd, post as pd,
        semester as sd,
        user::db::{UserLoginData, UserSignupData},
        user::{MemberRef, ProfileUpdate, UserResponse},
    },
    resp::{jwt::doc::JWTAuth, problem::Problem},
    role::{Role, RoleTarget},
};

#[derive(OpenApi)]
#[openapi(
    paths(
        user_create,
        login_submit,
        logout,
        user_me,
        user_get,
        user_list,
        user_available,
        advisor_list,
        user_update,
        user_avatar,
        user_set_role,
        user_delete,
        group_mine,
        group_get,
        group_list,
        group_open,
        group_rename,
        group_ideas,
        group_approve,
        group_progress,
        group_remove_member,
        group_delete,
        group_pending_ideas,
        group_advised,
        join_group,
        partner_request,
        join_incoming,
        join_outgoing,
        join_respond,
        advisor_request,
        advisor_incoming,
        advisor_respond,
        notification_list,
        notification_unread,
        notification_mark_read,
        notification_set_status,
        notification_broadcast,
        notification_group,
        notification_stream,
        chat_rooms,
        chat_open,
        chat_messages,
        chat_send,
        chat_mark_read,
        chat_unread,
        semester_define,
        semester_list,
        semester_get,
        semester_progress,
        post_create,
        post_list,
        post_by_user,
        post_delete,
        post_like,
    ),
    components(schemas(
        Role,
        RoleTarget,
        MemberRef,
        UserResponse,
        UserLoginData,
        UserSignupData,
        ProfileUpdate,
        LoginResponse,
        AvatarUpdate,
        RoleUpdate,
        gd::Group,
        gd::GroupStatus,
        gd::Ideas,
        gd::TaskUpload,
        gd::db::RenameGroup,
        gd::db::IdeaSelection,
        gd::db::ProgressUpload,
        jd::JoinRequest,
        jd::JoinStatus,
        jd::JoinAnswer,
        jd::JoinOutcome,
        ad::AdvisorRequest,
        ad::AdvisorStatus,
        ad::AdvisorChoice,
        ad::AdvisorAnswer,
        ad::AdvisorRequestDetails,
        ad::AdvisorOutcome,
        nd::Notification,
        nd::NotificationKind,
        nd::NotificationStatus,
        nd::Target,
        nd::BroadcastData,
        nd::GroupMessage,
        UnreadCount,
        MarkedRead,
        StatusUpdate,
        cd::ChatKind,
        cd::ChatRoom,
        cd::Message,
        cd::MessageData,
        cd::ChatRead,
        cd::UnreadMessages,
        sd::TaskDef,
        sd::SemesterTasks,
        sd::SemesterDefinition,
        sd::TaskStatus,
        sd::GroupProgress,
        sd::ProgressReport,
        pd::Post,
        pd::Media,
        pd::PostCreate,
        pd::LikeState,
        Problem
    )),
    modifiers(&JWTAuth, &V1_PREFIX)
)]
pub struct ApiDocV1;

pub struct PathPrefix(pub &'static str);
static V1_PREFIX: PathPrefix = PathPrefix("/api/v1");

impl utoipa::Modify for PathPrefix {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let mut new_paths = BTreeMap::new();

        for (path, item) in std::mem::take(&mut openapi.paths.paths) {
            new_paths.insert(self.0.to_string() + path.as_ref(), item);
        }

        openapi.paths.paths = new_paths;
    }
}

#[get("/openapi.json")]
pub fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDocV1::openapi())
}

pub fn api_v1() -> Vec<Route> {
    routes![
        openapi_json,
        user_create,
        login_submit,
        logout,
        user_me,
        user_get,
        user_list,
        user_available,
        advisor_list,
        user_update,
        user_avatar,
        user_set_role,
        user_delete,
        group_mine,
        group_get,
        group_list,
        group_open,
        group_rename,
        group_ideas,
        group_approve,
        group_progress,
        group_remove_member,
        group_delete,
        group_pending_ideas,
        group_advised,
        join_group,
        partner_request,
        join_incoming,
        join_outgoing,
        join_respond,
        advisor_request,
        advisor_incoming,
        advisor_respond,
        notification_list,
        notification_unread,
        notification_mark_read,
        notification_set_status,
        notification_broadcast,
        notification_group,
        notification_stream,
        chat_rooms,
        chat_open,
        chat_messages,
        chat_send,
        chat_mark_read,
        chat_unread,
        semester_define,
        semester_list,
        semester_get,
        semester_progress,
        post_create,
        post_list,
        post_by_user,
        post_delete,
        post_like,
    ]
}

fn status_problem(status: Status, req: &Request<'_>) -> Problem {
    Problem::new_untyped(status, status.reason().unwrap_or("Request failed."))
        .instance_uri(req.uri().to_string())
        .to_owned()
}

#[catch(default)]
fn default_catcher(status: Status, req: &Request<'_>) -> Problem {
    status_problem(status, req)
}

/// Guard failures carry no body; authentication failures get a useful one.
#[catch(401)]
fn unauthorized(req: &Request<'_>) -> Problem {
    status_problem(Status::Unauthorized, req)
        .detail("Log in or send a valid bearer token.")
        .to_owned()
}

#[catch(422)]
fn unprocessable(req: &Request<'_>) -> Problem {
    status_problem(Status::UnprocessableEntity, req)
        .detail("The request body doesn't match the expected shape.")
        .to_owned()
}

pub fn catchers() -> Vec<Catcher> {
    catchers![default_catcher, unauthorized, unprocessable]
}

pub fn mount_api(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket
        .mount("/api/v1", api_v1())
        .register("/api/v1", catchers())
        .mount("/", routes![app, app_path])
}

#[cfg(test)]
mod tests {
    use mongodb::Client as MongoClient;
    use rocket::http::{ContentType, Header, Status};
    use rocket::local::asynchronous::Client;

    use crate::config::Config;
    use crate::resp::jwt::UserRoleToken;
    use crate::role::Role;
    use crate::security::Security;
    use crate::store::Store;

    const SECRET: &[u8] = b"route test secret that is long enough for HS256";

    async fn client() -> Client {
        // connects lazily; none of these requests reach the database
        let mongo = MongoClient::with_uri_str("mongodb://localhost:27017")
            .await
            .expect("valid mongodb uri");
        let config = Config::default();
        let store = Store::new(mongo, &config.mongodb_db, false);
        let rocket = crate::build(config, Security::from_secret(SECRET), store)
            .expect("valid rocket");

        Client::untracked(rocket).await.expect("valid client")
    }

    fn bearer(role: Role) -> Header<'static> {
        let token = UserRoleToken::for_user("test-user", role)
            .encode_jwt(SECRET)
            .expect("encodable token");
        Header::new("Authorization", format!("Bearer {}", token))
    }

    #[rocket::async_test]
    async fn requests_without_token_are_unauthorized() {
        let client = client().await;
        let response = client.get("/api/v1/groups/mine").dispatch().await;

        assert_eq!(response.status(), Status::Unauthorized);
        assert_eq!(
            response.content_type(),
            Some(ContentType::new("application", "problem+json"))
        );
    }

    #[rocket::async_test]
    async fn students_cannot_broadcast() {
        let client = client().await;
        let response = client
            .post("/api/v1/notifications")
            .header(ContentType::JSON)
            .header(bearer(Role::Student))
            .body(r#"{"target":"all","title":"Hi","message":"Everyone"}"#)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Forbidden);
    }

    #[rocket::async_test]
    async fn students_cannot_approve_ideas() {
        let client = client().await;
        let response = client
            .post("/api/v1/groups/some-group/approve")
            .header(ContentType::JSON)
            .header(bearer(Role::Student))
            .body(r#"{"ideas":[1]}"#)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Forbidden);
    }

    #[rocket::async_test]
    async fn empty_post_is_a_no_op() {
        let client = client().await;
        let response = client
            .post("/api/v1/posts")
            .header(ContentType::JSON)
            .header(bearer(Role::Student))
            .body(r#"{"text":"   ","media":[]}"#)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::NoContent);
    }

    #[rocket::async_test]
    async fn register_rejects_bad_email() {
        let client = client().await;
        let response = client
            .post("/api/v1/users")
            .header(ContentType::JSON)
            .body(r#"{"name":"Mona","email":"not-an-email","password":"long enough"}"#)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::BadRequest);
    }

    #[rocket::async_test]
    async fn login_with_short_password_fails_without_cookie() {
        let client = client().await;
        let response = client
            .post("/api/v1/login")
            .header(ContentType::JSON)
            .body(r#"{"email":"mona@uni.edu","password":"short"}"#)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Unauthorized);
        assert!(response.cookies().get("jwt_auth").is_none());
    }

    #[rocket::async_test]
    async fn semester_names_are_validated() {
        let client = client().await;
        let response = client
            .post("/api/v1/semesters")
            .header(ContentType::JSON)
            .header(bearer(Role::Admin))
            .body(r#"{"semester":"fall.2024","tasks":["Proposal"]}"#)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::BadRequest);
    }

    #[rocket::async_test]
    async fn blank_chat_message_is_rejected() {
        let client = client().await;
        let response = client
            .post("/api/v1/chats/private/room-1/messages")
            .header(ContentType::JSON)
            .header(bearer(Role::Student))
            .body(r#"{"text":"  "}"#)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::BadRequest);
    }

    #[rocket::async_test]
    async fn workflow_statuses_cannot_be_set_directly() {
        let client = client().await;
        let response = client
            .put("/api/v1/notifications/some-notification/status")
            .header(ContentType::JSON)
            .header(bearer(Role::Student))
            .body(r#"{"status":"accepted"}"#)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::BadRequest);
    }

    #[rocket::async_test]
    async fn openapi_document_lists_prefixed_paths() {
        let client = client().await;
        let response = client.get("/api/v1/openapi.json").dispatch().await;
        assert_eq!(response.status(), Status::Ok);

        let body: serde_json::Value = response.into_json().await.expect("json document");
        assert!(body["paths"].get("/api/v1/groups/{id}/join").is_some());
        assert!(body["components"]["securitySchemes"].get("jwt").is_some());
    }

    #[rocket::async_test]
    async fn configured_admin_lands_on_admin_home() {
        let Some(store) = crate::store::test_store().await else { return };
        let mut config = Config::default();
        config.admin_emails = vec!["dean@uni.edu".to_string()];
        config.password_cost = 4;
        let rocket = crate::build(config, Security::from_secret(SECRET), store.clone())
            .expect("valid rocket");
        let client = Client::untracked(rocket).await.expect("valid client");

        let response = client
            .post("/api/v1/users")
            .header(ContentType::JSON)
            .body(r#"{"name":"Dean","email":"Dean@Uni.edu","password":"long enough"}"#)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let response = client
            .post("/api/v1/login")
            .header(ContentType::JSON)
            .body(r#"{"email":"dean@uni.edu","password":"long enough"}"#)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body: serde_json::Value = response.into_json().await.expect("json document");
        assert_eq!(body["home"], "/admin");
        assert_eq!(body["user"]["role"], "admin");

        crate::store::drop_test_store(store).await;
    }
}
