//! Accounts, sessions and role resolution.
//!
//! An [`IdentityProvider`] owns credentials and yields an [`Identity`]
//! (uid + email). [`RoleResolver`] turns that into [`Claims`] carrying the
//! caller's role and classroom, which every ledger operation checks.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

use crate::config::AuthConfig;
use crate::model::ClassroomId;

mod memory;

pub use memory::MemoryIdentityProvider;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("auth/invalid-email: '{0}' is not a valid email address")]
    InvalidEmail(String),

    #[error("auth/weak-password: password must be at least {min_length} characters")]
    WeakPassword { min_length: usize },

    #[error("auth/email-already-in-use: {0}")]
    EmailAlreadyInUse(String),

    #[error("auth/invalid-credential: email or password is incorrect")]
    InvalidCredential,

    #[error("auth/user-not-found: {0}")]
    UserNotFound(String),
}

/// An authenticated account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Teacher => f.write_str("teacher"),
            Role::Student => f.write_str("student"),
        }
    }
}

/// Who is calling, in which role, for which classroom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub uid: String,
    pub email: String,
    pub role: Role,
    pub classroom: ClassroomId,
}

impl Claims {
    pub fn is_teacher(&self) -> bool {
        self.role == Role::Teacher
    }
}

/// Interface for account storage and credential checks.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create an account and return its identity.
    async fn create_account(&self, email: &str, password: &str) -> Result<Identity, AuthError>;

    /// Check credentials and return the account's identity.
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError>;

    /// End any session held for `uid`.
    async fn sign_out(&self, uid: &str) -> Result<(), AuthError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, AuthError>;

    /// Remove the account for `uid` and end its session.
    async fn delete_account(&self, uid: &str) -> Result<(), AuthError>;
}

/// Maps an account email to a role.
#[derive(Debug, Clone)]
pub struct RoleResolver {
    teacher_emails: HashSet<String>,
}

impl RoleResolver {
    pub fn new(teacher_emails: impl IntoIterator<Item = String>) -> Self {
        Self {
            teacher_emails: teacher_emails.into_iter().collect(),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.teacher_emails.iter().cloned())
    }

    /// Exact, case-sensitive match against the teacher list.
    pub fn resolve(&self, email: &str) -> Role {
        if self.teacher_emails.contains(email) {
            Role::Teacher
        } else {
            Role::Student
        }
    }

    pub fn claims(&self, identity: Identity, classroom: &ClassroomId) -> Claims {
        Claims {
            role: self.resolve(&identity.email),
            uid: identity.uid,
            email: identity.email,
            classroom: classroom.clone(),
        }
    }
}

/// Session front end: signs users in and publishes the current claims.
///
/// Observers get the current value immediately on subscribe and every
/// change afterwards, `None` meaning signed out.
pub struct AuthService {
    provider: Arc<dyn IdentityProvider>,
    resolver: RoleResolver,
    classroom: ClassroomId,
    current: watch::Sender<Option<Claims>>,
}

impl AuthService {
    pub fn new(provider: Arc<dyn IdentityProvider>, resolver: RoleResolver, classroom: ClassroomId) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            provider,
            resolver,
            classroom,
            current,
        }
    }

    pub fn resolver(&self) -> &RoleResolver {
        &self.resolver
    }

    pub fn classroom(&self) -> &ClassroomId {
        &self.classroom
    }

    #[tracing::instrument(name = "auth.sign_in", skip_all, fields(email = %email))]
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Claims, AuthError> {
        let identity = self.provider.sign_in(email, password).await?;
        let claims = self.resolver.claims(identity, &self.classroom);
        info!(uid = %claims.uid, role = %claims.role, "Signed in");
        self.current.send_replace(Some(claims.clone()));
        Ok(claims)
    }

    /// Create an account and sign it in.
    #[tracing::instrument(name = "auth.create_account", skip_all, fields(email = %email))]
    pub async fn create_account(&self, email: &str, password: &str) -> Result<Claims, AuthError> {
        let identity = self.provider.create_account(email, password).await?;
        let claims = self.resolver.claims(identity, &self.classroom);
        info!(uid = %claims.uid, role = %claims.role, "Account created");
        self.current.send_replace(Some(claims.clone()));
        Ok(claims)
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let previous = self.current.send_replace(None);
        if let Some(claims) = previous {
            self.provider.sign_out(&claims.uid).await?;
            info!(uid = %claims.uid, "Signed out");
        }
        Ok(())
    }

    /// Remove an account created in this session, signing it out first
    /// when it is the current identity.
    #[tracing::instrument(name = "auth.discard_account", skip_all, fields(uid = %claims.uid))]
    pub async fn discard_account(&self, claims: &Claims) -> Result<(), AuthError> {
        self.current.send_if_modified(|current| {
            if current.as_ref().map(|c| c.uid.as_str()) == Some(claims.uid.as_str()) {
                *current = None;
                true
            } else {
                false
            }
        });
        self.provider.delete_account(&claims.uid).await?;
        info!("Account discarded");
        Ok(())
    }

    pub fn current(&self) -> Option<Claims> {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Claims>> {
        self.current.subscribe()
    }
}
