use bson::doc;
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument};
use mongodb::Database;
use rocket::futures::TryStreamExt;
use utoipa::ToSchema;

use crate::data::group::db::{find_group_in, release_advisor_in, remove_member_in};
use crate::data::join::db::decline_pending_in;
use crate::data::{filter, is_duplicate_key};
use crate::middleware::paging::PageState;
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::{problems, Problem};
use crate::role::Role;
use crate::store::{Store, Transaction};
use crate::util;

use super::{PasswordHash, ProfileUpdate, User, USER_COLLECTION_NAME};

pub mod problem {
    use crate::resp::problem::Problem;
    use rocket::http::Status;

    #[inline]
    pub fn bad_email(email: impl ToString, detail: impl ToString) -> Problem {
        Problem::new_untyped(Status::BadRequest, "Bad email.")
            .insert_str("email", email)
            .detail(detail)
            .to_owned()
    }

    #[inline]
    pub fn email_taken(email: impl ToString) -> Problem {
        Problem::new_untyped(Status::Conflict, "Bad email.")
            .insert_str("email", email)
            .detail("Email already registered.")
            .to_owned()
    }

    #[inline]
    pub fn bad_name(name: impl ToString, detail: impl ToString) -> Problem {
        Problem::new_untyped(Status::BadRequest, "Bad name.")
            .insert_str("name", name)
            .detail(detail)
            .to_owned()
    }

    #[inline]
    pub fn bad_password(detail: impl ToString) -> Problem {
        Problem::new_untyped(Status::BadRequest, "Bad password.")
            .detail(detail)
            .to_owned()
    }

    #[inline]
    pub fn not_found(id: &str) -> Problem {
        Problem::new_untyped(Status::NotFound, "User doesn't exist.")
            .insert("id", id)
            .clone()
    }

    #[inline]
    pub fn bad_login() -> Problem {
        Problem::new_untyped(Status::Unauthorized, "Bad email or password.")
    }
}

pub fn validate_name(name: &str) -> Result<(), Problem> {
    let trimmed = name.trim();
    if trimmed.len() < 2 {
        return Err(problem::bad_name(
            name,
            "Name must be at least 2 characters (bytes) long.",
        ));
    }
    if trimmed.len() > 64 {
        return Err(problem::bad_name(
            name,
            "Name can't be longer than 64 (bytes) characters.",
        ));
    }
    Ok(())
}

#[derive(Clone, Deserialize, ToSchema)]
pub struct UserSignupData {
    pub name: String,
    #[schema(format = "email")]
    pub email: String,
    #[schema(format = "password")]
    pub password: String,
    /// Only honoured when an admin registers the account.
    #[serde(default)]
    pub role: Option<Role>,
}

impl std::fmt::Debug for UserSignupData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UserSignupData:{}", self.email)
    }
}

impl UserSignupData {
    /// One account per address: the id is derived from the normalised email.
    pub fn id(&self) -> String {
        util::stable_id(&self.email.trim().to_lowercase())
    }

    pub fn validate(&self) -> Result<(), Problem> {
        let email = self.email.trim();
        if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
            return Err(problem::bad_email(
                self.email.to_string(),
                "Not a valid e-mail address.",
            ));
        }

        validate_name(&self.name)?;

        if self.password.len() < 8 {
            return Err(problem::bad_password(
                "Password must be at least 8 characters (bytes) long.",
            ));
        }

        if self.password.len() > 1024 {
            return Err(problem::bad_password(
                "Passwords longer than 1024 characters aren't supported.",
            ));
        }

        Ok(())
    }
}

#[derive(Clone, Deserialize, ToSchema)]
pub struct UserLoginData {
    #[schema(format = "email")]
    pub email: String,
    #[schema(format = "password")]
    pub password: String,
}

impl std::fmt::Debug for UserLoginData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UserLoginData:{}", self.email)
    }
}

impl UserLoginData {
    pub fn validate(&self) -> Result<(), Problem> {
        if !self.email.contains('@') || self.password.len() < 8 || self.password.len() > 1024 {
            return Err(problem::bad_login());
        }

        Ok(())
    }
}

pub trait UserDbExt {
    async fn create_user(
        &self,
        signup: UserSignupData,
        role: Role,
        password_cost: u32,
    ) -> Result<User, Problem>;

    async fn login(&self, login: &UserLoginData) -> Result<User, Problem>;

    async fn get_user(&self, id: &str) -> Result<Option<User>, Problem>;
    async fn require_user(&self, id: &str) -> Result<User, Problem>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, Problem>;

    async fn list_users(&self, role: Option<Role>, page: PageState) -> Result<Vec<User>, Problem>;
    async fn list_available(
        &self,
        exclude: &str,
        skill: Option<&str>,
    ) -> Result<Vec<User>, Problem>;

    async fn update_profile(&self, id: &str, update: &ProfileUpdate) -> Result<User, Problem>;
    async fn set_role(&self, id: &str, role: Role) -> Result<User, Problem>;

    /// Token role checked against the stored user, so a role change applies before the token expires.
    async fn confirm_role(
        &self,
        auth: &UserRoleToken,
        role: Role,
        action: &str,
    ) -> Result<User, Problem>;
    async fn confirm_admin(&self, auth: &UserRoleToken, action: &str) -> Result<User, Problem>;
    /// Role used for visibility checks; only elevated tokens cost a lookup.
    async fn current_role(&self, auth: &UserRoleToken) -> Result<Role, Problem>;
}

impl UserDbExt for Database {
    async fn create_user(
        &self,
        signup: UserSignupData,
        role: Role,
        password_cost: u32,
    ) -> Result<User, Problem> {
        if self.find_user_by_email(&signup.email).await?.is_some() {
            return Err(problem::email_taken(signup.email.trim()));
        }

        let mut user = User::new(&signup.name, &signup.email, role);
        user.id = signup.id();
        user.pw_hash = Some(PasswordHash::new(&signup.password, password_cost)?);

        match self
            .collection::<User>(USER_COLLECTION_NAME)
            .insert_one(&user, None)
            .await
        {
            Ok(_) => Ok(user),
            Err(e) if is_duplicate_key(&e) => Err(problem::email_taken(&user.email)),
            Err(e) => Err(e.into()),
        }
    }

    async fn login(&self, login: &UserLoginData) -> Result<User, Problem> {
        let user = self
            .find_user_by_email(&login.email)
            .await?
            .ok_or_else(problem::bad_login)?;

        match &user.pw_hash {
            Some(hash) if hash.verify(&login.password) => Ok(user),
            _ => {
                tracing::debug!("password mismatch for {}", user.id);
                Err(problem::bad_login())
            }
        }
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, Problem> {
        self.collection::<User>(USER_COLLECTION_NAME)
            .find_one(filter::by_id(id), None)
            .await
            .map_err(Problem::from)
    }

    async fn require_user(&self, id: &str) -> Result<User, Problem> {
        self.get_user(id)
            .await?
            .ok_or_else(|| problem::not_found(id))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, Problem> {
        self.collection::<User>(USER_COLLECTION_NAME)
            .find_one(filter::by_email(email), None)
            .await
            .map_err(Problem::from)
    }

    async fn list_users(&self, role: Option<Role>, page: PageState) -> Result<Vec<User>, Problem> {
        let query = match role {
            Some(role) => doc! { "role": role },
            None => doc! {},
        };

        let users = self
            .collection::<User>(USER_COLLECTION_NAME)
            .find(query, page.find_options(doc! { "name": 1 }))
            .await?
            .try_collect()
            .await?;

        Ok(users)
    }

    async fn list_available(
        &self,
        exclude: &str,
        skill: Option<&str>,
    ) -> Result<Vec<User>, Problem> {
        let users: Vec<User> = self
            .collection::<User>(USER_COLLECTION_NAME)
            .find(
                doc! {
                    "_id": { "$ne": exclude },
                    "role": Role::Student,
                    "is_joined": { "$ne": true },
                },
                None,
            )
            .await?
            .try_collect()
            .await?;

        Ok(match skill {
            Some(skill) if !skill.trim().is_empty() => {
                users.into_iter().filter(|it| it.has_skill(skill)).collect()
            }
            _ => users,
        })
    }

    async fn update_profile(&self, id: &str, update: &ProfileUpdate) -> Result<User, Problem> {
        update.validate()?;

        let changes = match update.to_update() {
            Some(changes) => changes,
            None => return self.require_user(id).await,
        };

        self.collection::<User>(USER_COLLECTION_NAME)
            .find_one_and_update(
                filter::by_id(id),
                changes,
                FindOneAndUpdateOptions::builder()
                    .return_document(ReturnDocument::After)
                    .build(),
            )
            .await?
            .ok_or_else(|| problem::not_found(id))
    }

    async fn set_role(&self, id: &str, role: Role) -> Result<User, Problem> {
        tracing::info!("Changing role of user {} to {}", id, role);

        self.collection::<User>(USER_COLLECTION_NAME)
            .find_one_and_update(
                filter::by_id(id),
                doc! { "$set": { "role": role } },
                FindOneAndUpdateOptions::builder()
                    .return_document(ReturnDocument::After)
                    .build(),
            )
            .await?
            .ok_or_else(|| problem::not_found(id))
    }

    async fn confirm_role(
        &self,
        auth: &UserRoleToken,
        role: Role,
        action: &str,
    ) -> Result<User, Problem> {
        auth.require_role(role, action)?;

        let user = self.require_user(&auth.user).await?;
        stored_role_allows(&user, role, action)?;
        Ok(user)
    }

    async fn confirm_admin(&self, auth: &UserRoleToken, action: &str) -> Result<User, Problem> {
        self.confirm_role(auth, Role::Admin, action).await
    }

    async fn current_role(&self, auth: &UserRoleToken) -> Result<Role, Problem> {
        if auth.role == Role::Student {
            return Ok(auth.role);
        }
        Ok(self.require_user(&auth.user).await?.role)
    }
}

pub trait UserAccountExt {
    /// Deletes the account and takes the user out of every group and pending request.
    async fn delete_account(&self, id: &str) -> Result<User, Problem>;
}

impl UserAccountExt for Store {
    async fn delete_account(&self, id: &str) -> Result<User, Problem> {
        let mut tx = self.begin().await?;
        let result = delete_account_in(&mut tx, id).await;
        tx.finish(result).await
    }
}

async fn delete_account_in(tx: &mut Transaction<'_>, id: &str) -> Result<User, Problem> {
    let users = tx.collection::<User>(USER_COLLECTION_NAME);
    let user = users
        .find_one_with_session(filter::by_id(id), None, tx.session())
        .await?
        .ok_or_else(|| problem::not_found(id))?;

    if let Some(group) = find_group_in(tx, doc! { "member_ids": id }).await? {
        remove_member_in(tx, &group.id, id).await?;
    }
    decline_pending_in(
        tx,
        doc! { "$or": [ { "sender.id": id }, { "receiver.id": id } ] },
    )
    .await?;
    if user.role == Role::Advisor {
        release_advisor_in(tx, id).await?;
    }

    users
        .delete_one_with_session(filter::by_id(id), None, tx.session())
        .await?;

    tracing::info!("Deleted user {}", id);
    Ok(user)
}

pub fn stored_role_allows(user: &User, role: Role, action: &str) -> Result<(), Problem> {
    if user.role != role {
        tracing::info!("Stale token role for {}, stored role is {}", user.id, user.role);
        return Err(problems::forbidden(format!(
            "Only {} users can {}.",
            role, action
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocket::http::Status;

    fn signup(name: &str, email: &str, password: &str) -> UserSignupData {
        UserSignupData {
            name: name.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            role: None,
        }
    }

    #[test]
    fn signup_validation() {
        assert!(signup("Mona", "mona@uni.edu", "long enough").validate().is_ok());

        let bad_email = signup("Mona", "mona.uni.edu", "long enough").validate();
        assert_eq!(bad_email.unwrap_err().title, "Bad email.");

        let bad_name = signup(" M ", "mona@uni.edu", "long enough").validate();
        assert_eq!(bad_name.unwrap_err().title, "Bad name.");

        let bad_password = signup("Mona", "mona@uni.edu", "short").validate();
        assert_eq!(bad_password.unwrap_err().status, Status::BadRequest);
    }

    #[test]
    fn login_validation_hides_which_field_failed() {
        let login = UserLoginData {
            email: "mona@uni.edu".to_string(),
            password: "short".to_string(),
        };
        let err = login.validate().unwrap_err();

        assert_eq!(err.status, Status::Unauthorized);
        assert_eq!(err.title, "Bad email or password.");
    }

    #[test]
    fn signup_id_follows_normalised_email() {
        let first = signup("Mona", "Mona@Uni.edu ", "long enough");
        let second = signup("Mona Lisa", "mona@uni.edu", "other password");
        assert_eq!(first.id(), second.id());
        assert_ne!(first.id(), signup("Mona", "mona2@uni.edu", "long enough").id());
    }

    #[test]
    fn demoted_admin_is_refused() {
        let demoted = User::new("Former Admin", "dean@uni.edu", Role::Advisor);
        let err = stored_role_allows(&demoted, Role::Admin, "delete groups").unwrap_err();
        assert_eq!(err.status, Status::Forbidden);

        let admin = User::new("Dean", "dean@uni.edu", Role::Admin);
        assert!(stored_role_allows(&admin, Role::Admin, "delete groups").is_ok());
    }

    #[test]
    fn debug_hides_password() {
        let data = signup("Mona", "mona@uni.edu", "secret password");
        assert!(!format!("{:?}", data).contains("secret"));
    }

    #[rocket::async_test]
    async fn deleting_members_frees_seats_and_dissolves_group() {
        use crate::data::chat::ChatKind;
        use crate::data::group::db::GroupDbExt;
        use crate::data::join::db::JoinWorkflowExt;
        use crate::data::join::{JoinRequest, JoinStatus, JOIN_REQUEST_COLLECTION_NAME};
        use crate::store::{drop_test_store, test_store};

        let Some(store) = test_store().await else { return };
        let mut students = vec![];
        let people = [
            ("Sara", "sara@uni.edu"),
            ("Rami", "rami@uni.edu"),
            ("Lina", "lina@uni.edu"),
        ];
        for (name, email) in people {
            let user = store
                .create_user(signup(name, email, "long enough"), Role::Student, 4)
                .await
                .unwrap();
            students.push(user);
        }

        let partner = store.request_partner(&students[0], &students[1].id).await.unwrap();
        let group = store
            .respond_join(&partner.id, &students[1], true, 3)
            .await
            .unwrap()
            .group
            .unwrap();
        let waiting = store.request_join(&students[2], &group.id, 3).await.unwrap();

        let first = waiting.receiver.id.clone();
        let other = group.member_ids.iter().find(|it| **it != first).unwrap().clone();
        store.delete_account(&first).await.unwrap();

        let remaining = store.require_group(&group.id).await.unwrap();
        assert_eq!(remaining.member_ids, vec![other.clone()]);
        let waiting = store
            .collection::<JoinRequest>(JOIN_REQUEST_COLLECTION_NAME)
            .find_one(filter::by_id(&waiting.id), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(waiting.status, JoinStatus::Declined);
        assert!(waiting.pending_key.is_none());

        store.delete_account(&other).await.unwrap();
        assert!(store.get_group(&group.id).await.unwrap().is_none());
        let rooms = store
            .collection::<bson::Document>(&ChatKind::Group.rooms_collection())
            .count_documents(filter::by_id(&group.id), None)
            .await
            .unwrap();
        assert_eq!(rooms, 0);
        assert!(!store.require_user(&students[2].id).await.unwrap().is_joined);

        drop_test_store(store).await;
    }
}
