use bson::{doc, Document};
use chrono::{DateTime, Utc};
use utoipa::ToSchema;

use crate::resp::problem::Problem;
use crate::role::Role;
use crate::util;

pub mod db;

pub static USER_COLLECTION_NAME: &str = "users";

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PasswordHash(String);

impl PasswordHash {
    pub fn new(password: &str, cost: u32) -> Result<PasswordHash, Problem> {
        Ok(PasswordHash(bcrypt::hash(password, cost)?))
    }

    pub fn verify(&self, password: &str) -> bool {
        bcrypt::verify(password, &self.0).unwrap_or(false)
    }
}

/// Display snapshot of a user stored inside other documents.
///
/// Snapshots are only ever used for display; membership checks compare ids.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MemberRef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub is_joined: bool,

    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub about: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub speciality: Option<String>,

    #[serde(with = "chrono::serde::ts_milliseconds", default = "util::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub pw_hash: Option<PasswordHash>,
}

impl User {
    pub fn new(name: impl ToString, email: impl ToString, role: Role) -> User {
        let id = util::new_id();
        tracing::info!("Creating a new {} user with id: {}", role, id);

        User {
            id,
            name: name.to_string().trim().to_string(),
            email: email.to_string().trim().to_lowercase(),
            role,
            image: None,
            is_joined: false,
            skills: vec![],
            interests: vec![],
            projects: vec![],
            urls: vec![],
            about: None,
            phone: None,
            speciality: None,
            created_at: util::now(),
            pw_hash: None,
        }
    }

    pub fn member_ref(&self) -> MemberRef {
        MemberRef {
            id: self.id.clone(),
            name: self.name.clone(),
            image: self.image.clone().unwrap_or_default(),
        }
    }

    pub fn has_skill(&self, skill: &str) -> bool {
        self.skills.iter().any(|it| it.eq_ignore_ascii_case(skill.trim()))
    }
}

/// Public view of a [`User`]; never exposes the password hash.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub image: Option<String>,
    pub is_joined: bool,
    pub skills: Vec<String>,
    pub interests: Vec<String>,
    pub projects: Vec<String>,
    pub urls: Vec<String>,
    pub about: Option<String>,
    pub phone: Option<String>,
    pub speciality: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    #[schema(value_type = i64)]
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        UserResponse {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            image: user.image,
            is_joined: user.is_joined,
            skills: user.skills,
            interests: user.interests,
            projects: user.projects,
            urls: user.urls,
            about: user.about,
            phone: user.phone,
            speciality: user.speciality,
            created_at: user.created_at,
        }
    }
}

/// Profile edit. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub image: Option<String>,
    pub about: Option<String>,
    pub phone: Option<String>,
    pub speciality: Option<String>,
    pub skills: Option<Vec<String>>,
    pub interests: Option<Vec<String>>,
    pub projects: Option<Vec<String>>,
    pub urls: Option<Vec<String>>,
}

impl ProfileUpdate {
    pub fn validate(&self) -> Result<(), Problem> {
        if let Some(name) = &self.name {
            db::validate_name(name)?;
        }
        Ok(())
    }

    /// `$set` document covering only the provided fields; `None` when nothing changes.
    pub fn to_update(&self) -> Option<Document> {
        let mut set = Document::new();

        if let Some(name) = &self.name {
            set.insert("name", name.trim());
        }
        for (key, value) in [
            ("image", &self.image),
            ("about", &self.about),
            ("phone", &self.phone),
            ("speciality", &self.speciality),
        ] {
            if let Some(value) = value {
                set.insert(key, value.trim());
            }
        }
        for (key, value) in [
            ("skills", &self.skills),
            ("interests", &self.interests),
            ("projects", &self.projects),
            ("urls", &self.urls),
        ] {
            if let Some(value) = value {
                set.insert(key, util::clean_list(value.clone()));
            }
        }

        if set.is_empty() {
            None
        } else {
            Some(doc! { "$set": set })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_user_defaults() {
        let user = User::new("  Mona ", " Mona@Uni.EDU", Role::Student);

        assert_eq!(user.name, "Mona");
        assert_eq!(user.email, "mona@uni.edu");
        assert!(!user.is_joined);
        assert!(user.pw_hash.is_none());
    }

    #[test]
    fn member_ref_defaults_missing_image() {
        let user = User::new("Mona", "mona@uni.edu", Role::Student);
        let member = user.member_ref();

        assert_eq!(member.id, user.id);
        assert_eq!(member.image, "");
    }

    #[test]
    fn password_hash_verifies() {
        let hash = PasswordHash::new("correct horse", 4).unwrap();

        assert!(hash.verify("correct horse"));
        assert!(!hash.verify("battery staple"));
    }

    #[test]
    fn response_omits_password_hash() {
        let mut user = User::new("Mona", "mona@uni.edu", Role::Student);
        user.pw_hash = Some(PasswordHash::new("correct horse", 4).unwrap());

        let json = serde_json::to_value(UserResponse::from(user)).unwrap();
        assert!(json.get("pw_hash").is_none());
        assert_eq!(json["role"], "student");
    }

    #[test]
    fn profile_update_sets_only_present_fields() {
        let update = ProfileUpdate {
            about: Some(" backend person ".to_string()),
            skills: Some(vec!["rust ".to_string(), "".to_string()]),
            ..Default::default()
        };

        let set = update.to_update().unwrap();
        let set = set.get_document("$set").unwrap();
        assert_eq!(set.get_str("about").unwrap(), "backend person");
        assert_eq!(set.get_array("skills").unwrap().len(), 1);
        assert!(!set.contains_key("name"));
    }

    #[test]
    fn empty_profile_update_is_noop() {
        assert!(ProfileUpdate::default().to_update().is_none());
    }

    #[test]
    fn skills_match_case_insensitively() {
        let mut user = User::new("Mona", "mona@uni.edu", Role::Student);
        user.skills = vec!["Rust".to_string()];

        assert!(user.has_skill("rust"));
        assert!(!user.has_skill("go"));
    }
}
