//! User identity and profile types.
//!
//! User identifiers are issued by the external identity provider and are
//! opaque to Parley. Emails are stored in canonical lowercase form so that
//! equality and hashing are case-insensitive everywhere.

use serde::{Deserialize, Serialize};

/// Opaque, stable user identifier issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Wraps a provider-issued identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when an email address fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmailError {
    /// The address is not of the form `local@domain`.
    #[error("malformed email address: {0:?}")]
    Malformed(String),
}

/// A canonicalized (trimmed, lowercased) email address.
///
/// Construct via [`Email::parse`]; the canonical form is the only
/// representation that ever exists, so `Eq`/`Hash` are case-insensitive
/// by construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Email(String);

impl Email {
    /// Parses and canonicalizes an email address.
    ///
    /// # Errors
    ///
    /// Returns [`EmailError::Malformed`] unless the trimmed input contains
    /// exactly one `@` with a non-empty local part and domain.
    pub fn parse(raw: &str) -> Result<Self, EmailError> {
        let canonical = raw.trim().to_lowercase();
        let mut parts = canonical.splitn(2, '@');
        let local = parts.next().unwrap_or_default();
        let domain = parts.next().unwrap_or_default();
        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return Err(EmailError::Malformed(raw.to_string()));
        }
        Ok(Self(canonical))
    }

    /// Returns the canonical address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Email {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Display profile attached to a user record.
///
/// The username is globally unique (case-insensitive); uniqueness is
/// enforced by the user directory, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub surname: String,
    /// Globally unique handle.
    pub username: String,
}

/// A registered user: provider-issued id, verified email, display profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable identifier from the identity provider.
    pub id: UserId,
    /// Verified, canonicalized email address.
    pub email: Email,
    /// Display profile chosen at signup.
    pub profile: UserProfile,
}
