use crate::error::ConfigurationError;
use crate::util;
use std::env;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

fn default_mongodb_uri() -> String {
    env::var("MONGODB_URI").unwrap_or("mongodb://localhost:27017".to_string())
}

fn default_mongodb_db() -> String {
    env::var("MONGODB_DB_NAME").unwrap_or("capstone".to_string())
}

fn default_public_content() -> PathBuf {
    PathBuf::from(env::var("PUBLIC_CONTENT_PATH").unwrap_or("./public".to_string()))
}

#[cfg(debug_assertions)]
fn default_admin_emails() -> Vec<String> {
    vec![String::from("admin@example.com")]
}
#[cfg(not(debug_assertions))]
fn default_admin_emails() -> Vec<String> {
    vec![]
}

fn default_password_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

fn default_max_group_members() -> usize {
    3
}

fn default_use_transactions() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip)]
    file_path: PathBuf,

    #[serde(default = "default_mongodb_uri")]
    pub mongodb_uri: String,
    #[serde(default = "default_mongodb_db")]
    pub mongodb_db: String,

    #[serde(default = "default_public_content")]
    pub public_content: PathBuf,

    /// Accounts registered with one of these addresses get the admin role.
    #[serde(default = "default_admin_emails")]
    pub admin_emails: Vec<String>,

    #[serde(default = "default_password_cost")]
    pub password_cost: u32,

    #[serde(default = "default_max_group_members")]
    pub max_group_members: usize,

    /// Standalone MongoDB servers can't run multi-document transactions.
    #[serde(default = "default_use_transactions")]
    pub use_transactions: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            file_path: config_dir().join("settings.yml"),
            mongodb_uri: default_mongodb_uri(),
            mongodb_db: default_mongodb_db(),
            public_content: default_public_content(),
            admin_emails: default_admin_emails(),
            password_cost: default_password_cost(),
            max_group_members: default_max_group_members(),
            use_transactions: default_use_transactions(),
        }
    }
}

#[inline]
fn config_dir() -> PathBuf {
    PathBuf::from(env::var("CONFIG_DIR").unwrap_or("./config".to_string()))
}

impl Config {
    pub fn load() -> Result<Config, ConfigurationError> {
        let config_file = util::find_first_subpath(
            config_dir(),
            &["settings.yml", "settings.yaml"],
            Path::exists,
        )
        .ok_or_else(|| ConfigurationError::NotFound(config_dir()))?;

        let file = File::open(&config_file)?;
        let mut config: Config = serde_yaml::from_reader(BufReader::new(file))?;
        config.file_path = config_file;

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigurationError> {
        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&self.file_path)?;
        let mut out = BufWriter::new(file);
        serde_yaml::to_writer(&mut out, self)?;
        out.flush()?;
        Ok(())
    }

    pub fn is_admin_email(&self, email: &str) -> bool {
        self.admin_emails
            .iter()
            .any(|it| it.eq_ignore_ascii_case(email.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: Config = serde_yaml::from_str("mongodb_db: portal_test\n").unwrap();

        assert_eq!(config.mongodb_db, "portal_test");
        assert_eq!(config.max_group_members, 3);
        assert_eq!(config.password_cost, bcrypt::DEFAULT_COST);
        assert!(config.use_transactions);
    }

    #[test]
    fn admin_emails_match_case_insensitively() {
        let mut config = Config::default();
        config.admin_emails = vec!["Dean@Uni.edu".to_string()];

        assert!(config.is_admin_email("dean@uni.edu"));
        assert!(config.is_admin_email(" DEAN@UNI.EDU "));
        assert!(!config.is_admin_email("student@uni.edu"));
    }
}
