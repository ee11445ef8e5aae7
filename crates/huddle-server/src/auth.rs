//! Authentication gate for `/ws`.
//!
//! A connection is admitted only with an HS256 JWT whose `sub` names an
//! existing user. The token comes from the `token` query parameter, falling
//! back to `Authorization: Bearer`. Rejections happen before the upgrade.

use std::collections::HashSet;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use huddle_core::UserId;
use huddle_store::{Directory, StoreError};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::server::AppState;

/// Why a connection attempt was refused.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Neither the query parameter nor the header carried a token.
    #[error("No token provided")]
    MissingToken,

    /// Signature, algorithm or shape is wrong.
    #[error("Invalid token")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),

    /// `exp` is in the past.
    #[error("Token expired")]
    ExpiredToken,

    /// `sub` is empty.
    #[error("Invalid user ID in token")]
    MissingSubject,

    /// `sub` names no active user.
    #[error("User not found")]
    UnknownUser,

    /// The directory could not be queried.
    #[error("directory lookup failed: {0}")]
    Directory(#[from] StoreError),

    /// The blocking lookup task failed.
    #[error("directory lookup aborted")]
    LookupAborted,
}

impl AuthError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Directory(_) | Self::LookupAborted => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "authentication failed on directory lookup");
            "Internal server error".to_owned()
        } else {
            debug!(error = %self, "connection rejected");
            self.to_string()
        };
        (status, Json(serde_json::json!({ "message": message }))).into_response()
    }
}

/// The user a request was authenticated as, stored in request extensions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedUser(pub UserId);

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

#[derive(Debug, Default, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Verifies connection tokens.
pub struct TokenValidator {
    key: DecodingKey,
    validation: Validation,
}

impl TokenValidator {
    /// Validator for tokens signed with `secret`. `exp` is checked when
    /// present but not required.
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims = HashSet::from(["sub".to_owned()]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// The user id carried by a valid token.
    pub fn validate(&self, token: &str) -> Result<UserId, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation).map_err(
            |e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                _ => AuthError::InvalidToken(e),
            },
        )?;
        let sub = data.claims.sub.trim();
        if sub.is_empty() {
            return Err(AuthError::MissingSubject);
        }
        Ok(UserId::from_raw(sub))
    }
}

/// Token from the query parameter, or else from a Bearer header. Empty
/// values count as absent.
pub fn extract_token(query: Option<&str>, headers: &HeaderMap) -> Option<String> {
    query
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_owned)
        })
}

/// Validate `token` and confirm the user exists.
pub async fn authenticate(
    validator: &TokenValidator,
    directory: Arc<dyn Directory>,
    token: Option<String>,
) -> Result<UserId, AuthError> {
    let token = token.ok_or(AuthError::MissingToken)?;
    let user = validator.validate(&token)?;

    let lookup = user.clone();
    let exists = tokio::task::spawn_blocking(move || directory.user_exists(&lookup))
        .await
        .map_err(|_| AuthError::LookupAborted)??;
    if exists {
        Ok(user)
    } else {
        Err(AuthError::UnknownUser)
    }
}

/// Middleware in front of `/ws`: admits the request with an
/// [`AuthenticatedUser`] extension or answers with the rejection.
pub async fn require_user(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let query = Query::<TokenQuery>::try_from_uri(request.uri())
        .map(|Query(q)| q)
        .unwrap_or_default();
    let token = extract_token(query.token.as_deref(), request.headers());

    match authenticate(&state.validator, Arc::clone(&state.directory), token).await {
        Ok(user) => {
            let _ = request.extensions_mut().insert(AuthenticatedUser(user));
            Ok(next.run(request).await)
        }
        Err(e) => {
            if e.status() == StatusCode::UNAUTHORIZED {
                warn!(reason = %e, "websocket authentication failed");
            }
            Err(e)
        }
    }
}
