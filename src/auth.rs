//! Bearer credential verification and caller extractors
//!
//! The engine shares an HS256 signing secret with the platform's identity
//! surface. A credential carries the subject id, a role, and the entity
//! kind — the kind names what the subject *is* (user or volunteer), the
//! role names what it may do. Request handlers declare the caller they
//! need by extractor type; the push channel verifies the same credential
//! at connect time.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// What the subject may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Volunteer,
    Admin,
}

/// What the subject is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    User,
    Volunteer,
}

/// Verified credential contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject id (volunteer id for volunteer subjects).
    pub sub: String,
    pub role: Role,
    #[serde(rename = "type")]
    pub kind: SubjectKind,
    /// Expiry, seconds since epoch.
    pub exp: usize,
}

/// Signing and verification keys, shared via app state.
#[derive(Clone)]
pub struct AuthKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expiry_hours: u64,
}

impl AuthKeys {
    pub fn new(secret: &str, expiry_hours: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            expiry_hours,
        }
    }

    /// Issue a credential for a subject.
    pub fn issue(
        &self,
        subject: &str,
        role: Role,
        kind: SubjectKind,
    ) -> Result<String, EngineError> {
        let exp = chrono::Utc::now()
            + chrono::Duration::hours(self.expiry_hours as i64);
        let claims = Claims {
            sub: subject.to_string(),
            role,
            kind,
            exp: exp.timestamp() as usize,
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| EngineError::Storage(format!("token signing failed: {e}")))
    }

    /// Verify a bearer token and return its claims.
    pub fn verify(&self, token: &str) -> Result<Claims, EngineError> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|_| EngineError::Unauthenticated("Invalid or expired credential".into()))
    }
}

fn bearer_token(parts: &Parts) -> Result<String, EngineError> {
    parts
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
        .ok_or_else(|| EngineError::Unauthenticated("Missing Bearer token".into()))
}

/// Any authenticated subject.
pub struct Authed(pub Claims);

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for Authed
where
    AuthKeys: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = EngineError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = AuthKeys::from_ref(state);
        let claims = keys.verify(&bearer_token(parts)?)?;
        Ok(Authed(claims))
    }
}

/// A caller that is a volunteer, both by role and by entity kind.
pub struct VolunteerAuth {
    pub volunteer_id: String,
}

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for VolunteerAuth
where
    AuthKeys: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = EngineError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Authed(claims) = Authed::from_request_parts(parts, state).await?;
        if claims.role != Role::Volunteer || claims.kind != SubjectKind::Volunteer {
            return Err(EngineError::Forbidden(
                "This action requires a volunteer credential".into(),
            ));
        }
        Ok(VolunteerAuth {
            volunteer_id: claims.sub,
        })
    }
}

/// A caller with the admin role.
pub struct AdminAuth(pub Claims);

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for AdminAuth
where
    AuthKeys: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = EngineError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Authed(claims) = Authed::from_request_parts(parts, state).await?;
        if claims.role != Role::Admin {
            return Err(EngineError::Forbidden(
                "This action requires an admin credential".into(),
            ));
        }
        Ok(AdminAuth(claims))
    }
}
