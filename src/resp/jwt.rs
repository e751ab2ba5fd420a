use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rocket::http::{Cookie, CookieJar, Status};
use rocket::outcome::Outcome::{Error, Success};
use rocket::request::{self, FromRequest, Request};
use rocket::time::OffsetDateTime;
use serde::{Deserialize, Serialize};

use super::util::date_time_as_unix_seconds;
use crate::resp::problem::{problems, Problem};
use crate::role::Role;
use crate::security::Security;

pub static AUTH_COOKIE_NAME: &str = "jwt_auth";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRoleToken {
    #[serde(with = "date_time_as_unix_seconds")]
    iat: DateTime<Utc>,
    #[serde(with = "date_time_as_unix_seconds")]
    exp: DateTime<Utc>,
    pub user: String,
    pub role: Role,
}

impl UserRoleToken {
    pub fn for_user(user: impl ToString, role: Role) -> UserRoleToken {
        let now = Utc::now();
        UserRoleToken {
            iat: now,
            exp: now + Duration::weeks(1),
            user: user.to_string(),
            role,
        }
    }

    pub fn encode_jwt(&self, secret: &[u8]) -> Result<String, jsonwebtoken::errors::Error> {
        let header = Header::new(Algorithm::HS256);
        encode(&header, &self, &EncodingKey::from_secret(secret))
    }

    pub fn cookie(&self, secret: &[u8]) -> Result<Cookie<'static>, jsonwebtoken::errors::Error> {
        Ok(Cookie::build((AUTH_COOKIE_NAME, self.encode_jwt(secret)?))
            .secure(true)
            .expires(OffsetDateTime::from_unix_timestamp(self.exp.timestamp()).ok())
            .path("/")
            .http_only(true)
            .build())
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    pub fn require_role(&self, role: Role, action: &str) -> Result<(), Problem> {
        if self.role != role {
            tracing::debug!("{} ({}) denied: {}", self.user, self.role, action);
            return Err(problems::forbidden(format!(
                "Only {} users can {}.",
                role, action
            )));
        }
        Ok(())
    }

    pub fn require_admin(&self, action: &str) -> Result<(), Problem> {
        self.require_role(Role::Admin, action)
    }
}

pub fn auth_problem(detail: impl ToString) -> Problem {
    Problem::new_untyped(Status::Unauthorized, "Unable to authorize user.")
        .detail(detail)
        .clone()
}

pub fn decode_token(token: &str, secret: &[u8]) -> Result<UserRoleToken, Problem> {
    match decode::<UserRoleToken>(
        token,
        &DecodingKey::from_secret(secret),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
    {
        Ok(it) => {
            tracing::debug!("decoded user roles token for user: {}", it.user);
            Ok(it)
        }
        Err(e) => {
            let problem = Problem::from(e);
            if problem.title.starts_with("Expired") {
                Err(problem)
            } else {
                Err(auth_problem("JWT was malformed."))
            }
        }
    }
}

pub fn extract_claims(
    cookies: &CookieJar,
    authorization: Option<&str>,
    secret: &[u8],
) -> Result<UserRoleToken, Problem> {
    let token = match cookies.get(AUTH_COOKIE_NAME) {
        Some(jwt) => {
            tracing::trace!("extracted jwt auth from cookie");
            jwt.value().to_owned()
        }
        None => match authorization.and_then(|it| it.strip_prefix("Bearer ")) {
            Some(bearer) => {
                tracing::trace!("extracted jwt auth from authorization header");
                bearer.trim().to_owned()
            }
            None => return Err(auth_problem("No JWT auth cookie or bearer token.")),
        },
    };

    decode_token(&token, secret)
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for UserRoleToken {
    type Error = Problem;

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let security = match req.rocket().state::<Security>() {
            Some(it) => it,
            None => {
                return Error((
                    Status::InternalServerError,
                    auth_problem("Security isn't configured."),
                ))
            }
        };

        let authorization = req.headers().get_one("Authorization");
        match extract_claims(req.cookies(), authorization, &security.jwt_secret) {
            Ok(claims) => Success(claims),
            Err(e) => {
                tracing::debug!("unable to extract claims from request");
                Error((Status::Unauthorized, e))
            }
        }
    }
}

pub mod doc {
    use utoipa::openapi::security::*;

    #[derive(Clone, Copy)]
    pub struct JWTAuth;

    impl From<JWTAuth> for SecurityScheme {
        fn from(_: JWTAuth) -> Self {
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            )
        }
    }

    impl utoipa::Modify for JWTAuth {
        fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
            if let Some(c) = openapi.components.as_mut() {
                c.add_security_scheme("jwt", *self)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::SubsecRound;

    const SECRET: &[u8] = b"test secret that is long enough to sign tokens";

    #[test]
    fn jwt_configured_properly() {
        let now = Utc::now().round_subsecs(0);

        let urt = UserRoleToken {
            iat: now,
            exp: now + Duration::weeks(1),
            user: "user-1".to_string(),
            role: Role::Admin,
        };

        let token = urt.encode_jwt(SECRET).expect("encoding should work for example");
        let decoded = decode_token(&token, SECRET).expect("unable to decode encoded token");

        assert_eq!(now, decoded.iat);
        assert_eq!(now + Duration::weeks(1), decoded.exp);
        assert_eq!("user-1", decoded.user);
        assert_eq!(decoded.role, Role::Admin);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = UserRoleToken::for_user("user-1", Role::Student)
            .encode_jwt(SECRET)
            .unwrap();

        let err = decode_token(&token, b"some other secret of sufficient length").unwrap_err();
        assert_eq!(err.status, Status::Unauthorized);
    }

    #[test]
    fn expired_token_is_reported() {
        let long_ago = Utc::now() - Duration::weeks(3);
        let urt = UserRoleToken {
            iat: long_ago,
            exp: long_ago + Duration::weeks(1),
            user: "user-1".to_string(),
            role: Role::Student,
        };
        let token = urt.encode_jwt(SECRET).unwrap();

        let err = decode_token(&token, SECRET).unwrap_err();
        assert_eq!(err.title, "Expired JWT signature.");
    }

    #[test]
    fn role_requirements() {
        let student = UserRoleToken::for_user("s", Role::Student);
        let admin = UserRoleToken::for_user("a", Role::Admin);

        assert_eq!(
            student.require_admin("approve ideas").unwrap_err().status,
            Status::Forbidden
        );
        assert!(admin.require_admin("approve ideas").is_ok());
        assert!(student.require_role(Role::Student, "join groups").is_ok());
    }
}
