//! In-memory identity provider.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AuthError, Identity, IdentityProvider};
use crate::config::DEFAULT_MIN_PASSWORD_LENGTH;

struct Account {
    uid: String,
    salt: String,
    password_digest: String,
}

/// Accounts kept in process memory, passwords stored as salted SHA-256.
///
/// For development and tests only.
///
/// A uid is derived from the account email, so the same email maps to the
/// same uid in every process and records keyed by uid survive restarts.
pub struct MemoryIdentityProvider {
    accounts: RwLock<HashMap<String, Account>>,
    sessions: RwLock<HashSet<String>>,
    min_password_length: usize,
}

impl Default for MemoryIdentityProvider {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_PASSWORD_LENGTH)
    }
}

impl MemoryIdentityProvider {
    pub fn new(min_password_length: usize) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashSet::new()),
            min_password_length,
        }
    }

    /// Whether `uid` currently holds a session.
    pub async fn is_signed_in(&self, uid: &str) -> bool {
        self.sessions.read().await.contains(uid)
    }

    /// Stable uid for an email address.
    pub fn uid_for(email: &str) -> String {
        Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("mailto:{}", email).as_bytes())
            .simple()
            .to_string()
    }

    fn digest(salt: &str, password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(password.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Accepts `local@domain.tld` with no whitespace.
fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn create_account(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        if !is_valid_email(email) {
            return Err(AuthError::InvalidEmail(email.to_string()));
        }
        if password.chars().count() < self.min_password_length {
            return Err(AuthError::WeakPassword {
                min_length: self.min_password_length,
            });
        }

        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(email) {
            return Err(AuthError::EmailAlreadyInUse(email.to_string()));
        }

        let uid = Self::uid_for(email);
        let salt = Uuid::new_v4().simple().to_string();
        let password_digest = Self::digest(&salt, password);
        accounts.insert(
            email.to_string(),
            Account {
                uid: uid.clone(),
                salt,
                password_digest,
            },
        );
        drop(accounts);

        self.sessions.write().await.insert(uid.clone());
        Ok(Identity {
            uid,
            email: email.to_string(),
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let uid = {
            let accounts = self.accounts.read().await;
            let account = accounts.get(email).ok_or(AuthError::InvalidCredential)?;
            let digest = Self::digest(&account.salt, password);
            let matches: bool = digest
                .as_bytes()
                .ct_eq(account.password_digest.as_bytes())
                .into();
            if !matches {
                return Err(AuthError::InvalidCredential);
            }
            account.uid.clone()
        };

        self.sessions.write().await.insert(uid.clone());
        Ok(Identity {
            uid,
            email: email.to_string(),
        })
    }

    async fn sign_out(&self, uid: &str) -> Result<(), AuthError> {
        let known = self
            .accounts
            .read()
            .await
            .values()
            .any(|account| account.uid == uid);
        if !known {
            return Err(AuthError::UserNotFound(uid.to_string()));
        }
        self.sessions.write().await.remove(uid);
        Ok(())
    }

    async fn delete_account(&self, uid: &str) -> Result<(), AuthError> {
        let mut accounts = self.accounts.write().await;
        let email = accounts
            .iter()
            .find(|(_, account)| account.uid == uid)
            .map(|(email, _)| email.clone())
            .ok_or_else(|| AuthError::UserNotFound(uid.to_string()))?;
        accounts.remove(&email);
        drop(accounts);

        self.sessions.write().await.remove(uid);
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, AuthError> {
        Ok(self.accounts.read().await.get(email).map(|account| Identity {
            uid: account.uid.clone(),
            email: email.to_string(),
        }))
    }
}
