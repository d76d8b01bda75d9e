use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub role: Role,
}

/// Identity taken from a verified bearer token, stored in request extensions.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser {
    pub id: Uuid,
    pub role: Role,
}

pub fn issue_token(secret: &str, user_id: Uuid, role: Role, ttl: Duration) -> Result<String> {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (Utc::now() + ttl).timestamp().max(0) as usize,
        role,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| Error::Internal(format!("token encoding failed: {}", e)))
}

fn current_user(req: &Request, secret: &str) -> Result<CurrentUser> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .ok_or_else(|| Error::Unauthorized("missing authorization header".to_string()))?;
    let token = header
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| Error::Unauthorized("unsupported authorization scheme".to_string()))?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|_| Error::Unauthorized("invalid token".to_string()))?;

    let id = Uuid::parse_str(&data.claims.sub)
        .map_err(|_| Error::Unauthorized("invalid token subject".to_string()))?;
    Ok(CurrentUser {
        id,
        role: data.claims.role,
    })
}

async fn authorize(state: AppState, mut req: Request, next: Next, role: Role) -> Response {
    let user = match current_user(&req, &state.jwt_secret) {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };
    if user.role != role {
        tracing::debug!(user_id = %user.id, ?role, "role rejected");
        return Error::Forbidden("insufficient role".to_string()).into_response();
    }
    req.extensions_mut().insert(user);
    next.run(req).await
}

pub async fn require_student(State(state): State<AppState>, req: Request, next: Next) -> Response {
    authorize(state, req, next, Role::Student).await
}

pub async fn require_admin(State(state): State<AppState>, req: Request, next: Next) -> Response {
    authorize(state, req, next, Role::Admin).await
}
