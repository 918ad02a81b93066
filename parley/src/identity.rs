//! Caller identity and the consumed authentication interface.
//!
//! Credential issuance and verification belong to an external identity
//! provider; this module defines the contract Parley consumes — a stable
//! user id plus a verified email — and passes identity explicitly into
//! every operation that needs it. There is no ambient "current user"
//! global, so authorization is testable without a live session.

use std::collections::HashMap;

use parking_lot::Mutex;
use uuid::Uuid;

use parley_proto::user::{Email, UserId};

/// Minimum accepted password length, matching the identity provider's rule.
pub const MIN_PASSWORD_LEN: usize = 6;

/// The resolved identity of a signed-in caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable identifier issued by the provider.
    pub user_id: UserId,
    /// Verified, canonicalized email.
    pub email: Email,
}

/// Error returned when no identity is available.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// No caller is signed in.
    #[error("not signed in")]
    Unauthenticated,
}

/// Source of the caller's identity, passed into operations explicitly.
pub trait IdentityContext: Send + Sync {
    /// Returns the current identity.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Unauthenticated`] when nobody is signed in.
    fn current(&self) -> Result<Identity, IdentityError>;
}

/// An already-resolved identity is its own context.
impl IdentityContext for Identity {
    fn current(&self) -> Result<Identity, IdentityError> {
        Ok(self.clone())
    }
}

/// A mutable identity slot for interactive sign-in/sign-out flows.
#[derive(Default)]
pub struct SessionIdentity {
    slot: Mutex<Option<Identity>>,
}

impl SessionIdentity {
    /// Creates an empty (signed-out) slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the identity returned by a successful sign-in.
    pub fn set(&self, identity: Identity) {
        *self.slot.lock() = Some(identity);
    }

    /// Clears the slot on sign-out.
    pub fn clear(&self) {
        *self.slot.lock() = None;
    }
}

impl IdentityContext for SessionIdentity {
    fn current(&self) -> Result<Identity, IdentityError> {
        self.slot
            .lock()
            .clone()
            .ok_or(IdentityError::Unauthenticated)
    }
}

/// Errors surfaced by the authentication provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The email address is badly formatted.
    #[error("the email address is badly formatted")]
    InvalidEmail,
    /// An account with this email already exists.
    #[error("an account with this email already exists")]
    EmailInUse,
    /// The password does not meet the minimum length.
    #[error("the password is too weak (minimum {MIN_PASSWORD_LEN} characters)")]
    WeakPassword,
    /// The email/password pair did not match an account.
    ///
    /// Deliberately does not distinguish unknown email from wrong password.
    #[error("invalid email or password")]
    InvalidCredentials,
    /// The provider could not be reached; safe to retry.
    #[error("authentication service unavailable: {0}")]
    Unavailable(String),
}

/// The authentication operations Parley consumes from the provider.
pub trait AuthGateway: Send + Sync {
    /// Creates an account and returns the issued identity.
    fn sign_up(
        &self,
        email: &str,
        password: &str,
    ) -> impl std::future::Future<Output = Result<Identity, AuthError>> + Send;

    /// Verifies credentials and returns the identity.
    fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> impl std::future::Future<Output = Result<Identity, AuthError>> + Send;
}

/// In-memory [`AuthGateway`] for tests and local demos.
///
/// Applies the same surface rules as the real provider: email format,
/// minimum password length, one account per email.
#[derive(Default)]
pub struct LocalAuth {
    accounts: Mutex<HashMap<Email, LocalAccount>>,
}

struct LocalAccount {
    user_id: UserId,
    password: String,
}

impl LocalAuth {
    /// Creates an empty account store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuthGateway for LocalAuth {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let email = Email::parse(email).map_err(|_| AuthError::InvalidEmail)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }

        let mut accounts = self.accounts.lock();
        if accounts.contains_key(&email) {
            return Err(AuthError::EmailInUse);
        }
        let user_id = UserId::new(format!("local-{}", Uuid::now_v7()));
        accounts.insert(
            email.clone(),
            LocalAccount {
                user_id: user_id.clone(),
                password: password.to_string(),
            },
        );
        drop(accounts);

        tracing::debug!(email = %email, "account created");
        Ok(Identity { user_id, email })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let email = Email::parse(email).map_err(|_| AuthError::InvalidCredentials)?;
        let accounts = self.accounts.lock();
        let account = accounts
            .get(&email)
            .ok_or(AuthError::InvalidCredentials)?;
        if account.password != password {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(Identity {
            user_id: account.user_id.clone(),
            email: email.clone(),
        })
    }
}
