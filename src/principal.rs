//! The authenticated identity the core hands out and consumes.

use std::collections::BTreeSet;

use serde::Serialize;

/// Language reported when an account has none set.
pub const DEFAULT_LANGUAGE: &str = "en";

/// An authenticated caller: opaque identifier, role set, and display
/// attributes that are carried through tokens but never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    /// Account UUID.
    pub id: String,
    pub roles: BTreeSet<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub preferred_language: Option<String>,
}

impl Principal {
    pub fn new<I, S>(id: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            roles: roles.into_iter().map(Into::into).collect(),
            username: None,
            email: None,
            preferred_language: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.preferred_language = language;
        self
    }

    pub fn language(&self) -> &str {
        self.preferred_language
            .as_deref()
            .unwrap_or(DEFAULT_LANGUAGE)
    }
}
