//! Identity and classroom configuration.

use serde::Deserialize;

/// Default minimum password length accepted at account creation.
pub const DEFAULT_MIN_PASSWORD_LENGTH: usize = 6;

/// Role resolution settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Accounts with these emails resolve to the teacher role. Matching is
    /// exact and case-sensitive.
    pub teacher_emails: Vec<String>,
    pub min_password_length: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            teacher_emails: vec!["teacher@example.com".to_string()],
            min_password_length: DEFAULT_MIN_PASSWORD_LENGTH,
        }
    }
}

/// The classroom this deployment serves.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassroomConfig {
    pub id: String,
    pub name: String,
}

impl Default for ClassroomConfig {
    fn default() -> Self {
        Self {
            id: "main-class".to_string(),
            name: "Main Class".to_string(),
        }
    }
}
