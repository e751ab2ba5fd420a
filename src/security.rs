use std::path::PathBuf;
use std::{env, fs};

use crate::error::BackendError;

const JWT_SECRET: &str = "jwt.secret";
const MIN_SECRET_LEN: usize = 32;

/// Secret material used to sign session tokens.
#[derive(Clone)]
pub struct Security {
    pub jwt_secret: Vec<u8>,
}

impl std::fmt::Debug for Security {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Security").finish_non_exhaustive()
    }
}

#[inline]
fn security_dir() -> PathBuf {
    PathBuf::from(env::var("SECURITY_DIR").unwrap_or("./security".to_string()))
}

impl Security {
    pub fn from_secret(secret: impl Into<Vec<u8>>) -> Security {
        Security {
            jwt_secret: secret.into(),
        }
    }

    pub fn load() -> Result<Security, BackendError> {
        let dir = security_dir();
        let secret_path = dir.join(JWT_SECRET);

        tracing::info!("Loading JWT signing secret...");
        let secret = fs::read(&secret_path)
            .ok()
            .filter(|it| it.len() >= MIN_SECRET_LEN);

        let jwt_secret = match secret {
            Some(secret) => {
                tracing::info!("JWT secret found and loaded.");
                secret
            }
            #[cfg(feature = "generate-security")]
            None => {
                tracing::info!(
                    "JWT secret not found in '{}'. Generating a new one.",
                    secret_path.display()
                );
                fs::create_dir_all(&dir)?;

                let secret: Vec<u8> = (0..64).map(|_| rand::random::<u8>()).collect();
                fs::write(&secret_path, &secret)?;
                secret
            }
            #[cfg(not(feature = "generate-security"))]
            None => {
                return Err(BackendError::Security(format!(
                    "missing or short JWT secret in '{}'",
                    secret_path.display()
                )));
            }
        };

        Ok(Security { jwt_secret })
    }
}
