use std::{sync::Arc, time::Duration};

use argon2::Argon2;
use axum::{
    async_trait,
    extract::{FromRequest, RequestParts},
    headers::{authorization::Bearer, Authorization},
    http::StatusCode,
    Extension, TypedHeader,
};
use jsonwebtoken::{
    errors::Result as JwtResult, DecodingKey, EncodingKey, Header, TokenData, Validation,
};
use password_hash::{
    self, rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, AppResult},
    models::Role,
};

pub const TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

pub fn hash_password(password: impl AsRef<[u8]>) -> password_hash::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_ref(), &salt)
        .map(|h| h.to_string())
}

pub fn verify_password(
    password: impl AsRef<[u8]>,
    password_hash: impl AsRef<str>,
) -> password_hash::Result<bool> {
    let parsed_hash = PasswordHash::new(password_hash.as_ref())?;
    Ok(Argon2::default()
        .verify_password(password.as_ref(), &parsed_hash)
        .is_ok())
}

pub struct AuthKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i32,
    pub role: Role,
    pub exp: u64,
}

impl AuthKeys {
    pub fn from_base64_secret(secret: &str) -> JwtResult<AuthKeys> {
        Ok(AuthKeys {
            encoding: EncodingKey::from_base64_secret(secret)?,
            decoding: DecodingKey::from_base64_secret(secret)?,
        })
    }

    pub fn generate(&self, user_id: i32, role: Role, exp: Duration) -> JwtResult<String> {
        jsonwebtoken::encode(
            &Header::default(),
            &Claims {
                user_id,
                role,
                exp: jsonwebtoken::get_current_timestamp() + exp.as_secs(),
            },
            &self.encoding,
        )
    }

    pub fn validate(&self, token: &str) -> JwtResult<TokenData<Claims>> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &Validation::default())
    }
}

/// The caller identified by a bearer token.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: i32,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Users may act on their own records; admins on anyone's.
    pub fn is_authorized(&self, user_id: i32) -> AppResult<()> {
        if self.user_id == user_id || self.is_admin() {
            Ok(())
        } else {
            Err(AppError::forbidden("not allowed to act for another user"))
        }
    }
}

#[async_trait]
impl<B: Send> FromRequest<B> for AuthUser {
    type Rejection = AppError;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request(req)
                .await
                .map_err(|_| AppError::from(StatusCode::UNAUTHORIZED, "missing bearer token"))?;
        let Extension(keys) = Extension::<Arc<AuthKeys>>::from_request(req)
            .await
            .map_err(|e| anyhow::anyhow!("auth keys are not installed: {e}"))?;

        let claims = keys
            .validate(bearer.token())
            .map_err(|_| AppError::from(StatusCode::UNAUTHORIZED, "invalid or expired token"))?
            .claims;

        Ok(AuthUser {
            user_id: claims.user_id,
            role: claims.role,
        })
    }
}

/// Clubs and admins.
pub struct ClubOnly(pub AuthUser);

#[async_trait]
impl<B: Send> FromRequest<B> for ClubOnly {
    type Rejection = AppError;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request(req).await?;
        match user.role {
            Role::Club | Role::Admin => Ok(ClubOnly(user)),
            Role::Student => Err(AppError::forbidden("only clubs can do this")),
        }
    }
}

pub struct AdminOnly(pub AuthUser);

#[async_trait]
impl<B: Send> FromRequest<B> for AdminOnly {
    type Rejection = AppError;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request(req).await?;
        if user.is_admin() {
            Ok(AdminOnly(user))
        } else {
            Err(AppError::forbidden("admin only"))
        }
    }
}
