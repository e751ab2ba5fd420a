use rocket::serde::json::Json;
use rocket::State;

use crate::data::group::db::GroupDbExt;
use crate::data::semester::db::SemesterDbExt;
use crate::data::semester::{
    progress_report, validate_semester_name, ProgressReport, SemesterDefinition, SemesterTasks,
};
use crate::data::user::db::UserDbExt;
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::{problems, Problem};
use crate::role::Role;
use crate::store::Store;

/// Define or rename the tasks of a semester.
#[utoipa::path(
    request_body = SemesterDefinition,
    responses(
        (status = 200, description = "Stored semester with task keys", body = SemesterTasks),
        (status = 400, description = "Bad semester name or task list", body = Problem),
        (status = 403, description = "Not an admin", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/semesters", format = "json", data = "<definition>")]
#[tracing::instrument(skip(store))]
pub async fn semester_define(
    definition: Json<SemesterDefinition>,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<SemesterTasks>, Problem> {
    auth.require_admin("define semester tasks")?;
    definition.validate()?;
    store.confirm_admin(&auth, "define semester tasks").await?;

    Ok(Json(store.define_tasks(&definition).await?))
}

#[utoipa::path(
    responses((status = 200, description = "Every defined semester", body = Vec<SemesterTasks>)),
    security(("jwt" = []))
)]
#[get("/semesters")]
#[tracing::instrument(skip(store))]
pub async fn semester_list(
    _auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<Vec<SemesterTasks>>, Problem> {
    Ok(Json(store.list_semesters().await?))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Semester tasks", body = SemesterTasks),
        (status = 404, description = "Unknown semester", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/semesters/<name>")]
#[tracing::instrument(skip(store))]
pub async fn semester_get(
    name: &str,
    _auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<SemesterTasks>, Problem> {
    validate_semester_name(name)?;
    Ok(Json(store.require_semester(name).await?))
}

/// Per group upload status of every task in a semester.
#[utoipa::path(
    responses(
        (status = 200, description = "Progress of every group", body = ProgressReport),
        (status = 403, description = "Not an admin or advisor", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/semesters/<name>/progress")]
#[tracing::instrument(skip(store))]
pub async fn semester_progress(
    name: &str,
    auth: UserRoleToken,
    store: &State<Store>,
) -> Result<Json<ProgressReport>, Problem> {
    validate_semester_name(name)?;

    let semester = store.require_semester(name).await?;
    let groups = match store.current_role(&auth).await? {
        Role::Admin => store.all_groups().await?,
        Role::Advisor => store.advised_groups(&auth.user).await?,
        Role::Student => {
            return Err(problems::forbidden(
                "Only admins and advisors can view progress reports.",
            ))
        }
    };

    Ok(Json(progress_report(&semester, &groups)))
}
