//! User directory: the registered-users collection.
//!
//! Holds one [`User`] record per verified email. Records are created once,
//! after the identity provider has issued the caller's id and email, and
//! enforce two uniqueness rules: one record per email (emails are already
//! canonical lowercase) and one record per username, case-insensitively.
//! Both checks happen under a single write lock so concurrent registrations
//! cannot both succeed.

use std::collections::HashMap;

use tokio::sync::RwLock;

use parley_proto::user::{Email, User, UserId, UserProfile};

/// Errors that can occur during directory operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// A record for this email already exists.
    #[error("an account with this email already exists")]
    EmailTaken,
    /// Another user already holds this username.
    #[error("username is already taken")]
    UsernameTaken,
    /// The username is empty after trimming.
    #[error("username must not be empty")]
    EmptyUsername,
    /// No record exists for the given user.
    #[error("no such user")]
    UnknownUser,
}

/// In-memory registered-users collection, keyed by canonical email.
pub struct UserDirectory {
    users: RwLock<HashMap<Email, User>>,
}

impl Default for UserDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl UserDirectory {
    /// Creates a new, empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a user record.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::EmptyUsername`] for a blank username,
    /// [`DirectoryError::EmailTaken`] if the email already has a record, or
    /// [`DirectoryError::UsernameTaken`] if another user holds the username
    /// (case-insensitive).
    pub async fn register(&self, user: User) -> Result<(), DirectoryError> {
        if user.profile.username.trim().is_empty() {
            return Err(DirectoryError::EmptyUsername);
        }

        let mut users = self.users.write().await;
        if users.contains_key(&user.email) {
            return Err(DirectoryError::EmailTaken);
        }
        let username_lower = user.profile.username.to_lowercase();
        for existing in users.values() {
            if existing.profile.username.to_lowercase() == username_lower {
                return Err(DirectoryError::UsernameTaken);
            }
        }

        tracing::info!(email = %user.email, username = %user.profile.username, "user registered");
        users.insert(user.email.clone(), user);
        drop(users);

        Ok(())
    }

    /// Looks up a registered user by email.
    pub async fn lookup(&self, email: &Email) -> Option<User> {
        let users = self.users.read().await;
        users.get(email).cloned()
    }

    /// Replaces the profile of an existing user.
    ///
    /// Only the owning user may call this; the gateway enforces that by
    /// passing the session's own id. Username uniqueness is re-checked
    /// against every other record.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::UnknownUser`] if no record matches `id`,
    /// [`DirectoryError::EmptyUsername`] or [`DirectoryError::UsernameTaken`]
    /// as in [`register`](Self::register).
    pub async fn update_profile(
        &self,
        id: &UserId,
        profile: UserProfile,
    ) -> Result<(), DirectoryError> {
        if profile.username.trim().is_empty() {
            return Err(DirectoryError::EmptyUsername);
        }

        let mut users = self.users.write().await;
        let username_lower = profile.username.to_lowercase();
        for existing in users.values() {
            if existing.id != *id && existing.profile.username.to_lowercase() == username_lower {
                return Err(DirectoryError::UsernameTaken);
            }
        }
        let user = users
            .values_mut()
            .find(|u| u.id == *id)
            .ok_or(DirectoryError::UnknownUser)?;
        user.profile = profile;
        drop(users);

        Ok(())
    }
}
