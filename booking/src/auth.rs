//! Caller authentication.
//!
//! Requests carry `Authorization: Bearer <session>`. A [`SessionVerifier`]
//! turns the session into an [`Actor`]; the account service is the source
//! of truth and holders of the `admin` label are administrators.

use crate::types::{Actor, StudentId};
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{StatusCode, request::Parts},
};
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use studio_web::{AppError, BearerToken};
use thiserror::Error;
use tracing::{debug, warn};

/// Label that grants the administrator role.
pub const ADMIN_LABEL: &str = "admin";

/// Session verification errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The session is unknown, expired or revoked.
    #[error("Invalid session")]
    InvalidSession,

    /// The account service could not be reached or answered unexpectedly.
    #[error("Account service unavailable: {0}")]
    Unavailable(String),
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidSession => Self::unauthorized("Invalid or expired session"),
            AuthError::Unavailable(detail) => {
                Self::unavailable("Authentication temporarily unavailable")
                    .with_source(anyhow::anyhow!(detail))
            }
        }
    }
}

/// Future returned by [`SessionVerifier::verify`].
pub type VerifyFuture<'a> = Pin<Box<dyn Future<Output = Result<Actor, AuthError>> + Send + 'a>>;

/// Resolves a session token to the calling actor.
pub trait SessionVerifier: Send + Sync {
    /// Verify `token` and return who it belongs to.
    fn verify<'a>(&'a self, token: &'a str) -> VerifyFuture<'a>;
}

/// Account as returned by the account service.
#[derive(Debug, Deserialize)]
struct Account {
    #[serde(alias = "$id")]
    id: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    labels: Vec<String>,
}

impl From<Account> for Actor {
    fn from(account: Account) -> Self {
        Self {
            is_admin: account.labels.iter().any(|l| l == ADMIN_LABEL),
            id: StudentId::new(account.id),
            email: account.email,
            name: account.name,
        }
    }
}

/// Verifies sessions against the remote account service (`GET /account`).
#[derive(Clone, Debug)]
pub struct RemoteSessionVerifier {
    http_client: reqwest::Client,
    account_url: String,
}

impl RemoteSessionVerifier {
    /// Create a verifier for the service at `service_url`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unavailable`] if the HTTP client cannot be built.
    pub fn new(service_url: &str, timeout: Duration) -> Result<Self, AuthError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;
        Ok(Self {
            http_client,
            account_url: format!("{}/account", service_url.trim_end_matches('/')),
        })
    }

    async fn fetch_account(&self, token: &str) -> Result<Actor, AuthError> {
        let response = self
            .http_client
            .get(&self.account_url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {}
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                debug!("Session rejected by account service");
                return Err(AuthError::InvalidSession);
            }
            status => {
                warn!(%status, "Account service returned an unexpected status");
                return Err(AuthError::Unavailable(format!("status {status}")));
            }
        }

        let account: Account = response
            .json()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;
        Ok(account.into())
    }
}

impl SessionVerifier for RemoteSessionVerifier {
    fn verify<'a>(&'a self, token: &'a str) -> VerifyFuture<'a> {
        Box::pin(self.fetch_account(token))
    }
}

/// Fixed token table, for tests and local development.
#[derive(Clone, Debug, Default)]
pub struct StaticSessionVerifier {
    sessions: HashMap<String, Actor>,
}

impl StaticSessionVerifier {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` as `actor`.
    #[must_use]
    pub fn with_session(mut self, token: impl Into<String>, actor: Actor) -> Self {
        self.sessions.insert(token.into(), actor);
        self
    }
}

impl SessionVerifier for StaticSessionVerifier {
    fn verify<'a>(&'a self, token: &'a str) -> VerifyFuture<'a> {
        let result = self.sessions.get(token).cloned().ok_or(AuthError::InvalidSession);
        Box::pin(async move { result })
    }
}

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct SessionUser(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for SessionUser
where
    S: Send + Sync,
    Arc<dyn SessionVerifier>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let BearerToken(token) = BearerToken::from_request_parts(parts, state).await?;
        let verifier = Arc::<dyn SessionVerifier>::from_ref(state);
        let actor = verifier.verify(&token).await?;
        Ok(Self(actor))
    }
}

/// An authenticated caller holding the admin label.
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for RequireAdmin
where
    S: Send + Sync,
    Arc<dyn SessionVerifier>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let SessionUser(actor) = SessionUser::from_request_parts(parts, state).await?;
        if !actor.is_admin {
            return Err(AppError::rule_violation(
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "Administrator role required",
            ));
        }
        Ok(Self(actor))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::{Request, header};
    use serde_json::json;

    fn verifier() -> Arc<dyn SessionVerifier> {
        Arc::new(
            StaticSessionVerifier::new()
                .with_session("student-token", Actor::student("s1", "Sam", "sam@example.com"))
                .with_session("admin-token", Actor::admin("a1", "Ada", "ada@example.com")),
        )
    }

    fn parts(token: Option<&str>) -> Parts {
        let mut builder = Request::builder();
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(()).expect("Valid request").into_parts().0
    }

    #[test]
    fn account_labels_map_to_admin() {
        let account: Account = serde_json::from_value(json!({
            "$id": "u1",
            "email": "u1@example.com",
            "name": "U One",
            "labels": ["admin"]
        }))
        .unwrap();
        let actor = Actor::from(account);
        assert_eq!(actor.id, StudentId::new("u1"));
        assert!(actor.is_admin);

        let account: Account = serde_json::from_value(json!({ "id": "u2" })).unwrap();
        assert!(!Actor::from(account).is_admin);
    }

    #[tokio::test]
    async fn session_user_resolves_token() {
        let state = verifier();
        let SessionUser(actor) = SessionUser::from_request_parts(&mut parts(Some("student-token")), &state)
            .await
            .expect("Should authenticate");
        assert_eq!(actor.id, StudentId::new("s1"));
    }

    #[tokio::test]
    async fn unknown_or_missing_token_is_unauthorized() {
        let state = verifier();
        for token in [Some("nope"), None] {
            let err = SessionUser::from_request_parts(&mut parts(token), &state)
                .await
                .expect_err("Should reject");
            assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn require_admin_checks_label() {
        let state = verifier();
        let err = RequireAdmin::from_request_parts(&mut parts(Some("student-token")), &state)
            .await
            .expect_err("Should reject");
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let RequireAdmin(admin) = RequireAdmin::from_request_parts(&mut parts(Some("admin-token")), &state)
            .await
            .expect("Should authorize");
        assert!(admin.is_admin);
    }
}
