//! Contact registry: directed "I added you" relations.
//!
//! Each relation is an (owner id, contact email) pair. Relations are
//! one-directional and not required to be mutual. Per owner, a contact
//! email is unique, and an owner can never add their own email. The
//! check-and-insert runs under a single write lock, so concurrent
//! duplicate adds from the same owner yield exactly one success.

use std::collections::HashMap;

use tokio::sync::RwLock;

use parley_proto::user::{Email, UserId};

/// Errors that can occur when adding a contact.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContactError {
    /// The contact email is the owner's own address.
    #[error("cannot add your own email as a contact")]
    SelfAdd,
    /// The relation already exists for this owner.
    #[error("contact is already added")]
    AlreadyAdded,
}

/// In-memory directed contact relations, keyed by owner.
pub struct ContactRegistry {
    relations: RwLock<HashMap<UserId, Vec<Email>>>,
}

impl Default for ContactRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ContactRegistry {
    /// Creates a new, empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            relations: RwLock::new(HashMap::new()),
        }
    }

    /// Adds `contact` to `owner`'s list.
    ///
    /// `owner_email` is the owner's own verified address, used for the
    /// self-add check. Existence of the contact as a registered user is
    /// the caller's responsibility (the gateway resolves the email through
    /// the directory first).
    ///
    /// # Errors
    ///
    /// Returns [`ContactError::SelfAdd`] if `contact` equals `owner_email`,
    /// or [`ContactError::AlreadyAdded`] if the relation exists. Neither
    /// failure writes anything.
    pub async fn add(
        &self,
        owner: &UserId,
        owner_email: &Email,
        contact: Email,
    ) -> Result<(), ContactError> {
        if contact == *owner_email {
            return Err(ContactError::SelfAdd);
        }

        let mut relations = self.relations.write().await;
        let list = relations.entry(owner.clone()).or_default();
        if list.contains(&contact) {
            return Err(ContactError::AlreadyAdded);
        }
        tracing::info!(owner = %owner, contact = %contact, "contact added");
        list.push(contact);
        drop(relations);

        Ok(())
    }

    /// Returns `owner`'s contacts in insertion order; empty if none.
    pub async fn list(&self, owner: &UserId) -> Vec<Email> {
        let relations = self.relations.read().await;
        relations.get(owner).cloned().unwrap_or_default()
    }

    /// Removes a relation, returning `true` if it existed.
    ///
    /// Not reachable from the current client surface; kept so the
    /// uniqueness invariant composes with removal (a removed contact can
    /// be re-added).
    pub async fn remove(&self, owner: &UserId, contact: &Email) -> bool {
        let mut relations = self.relations.write().await;
        let Some(list) = relations.get_mut(owner) else {
            return false;
        };
        let before = list.len();
        list.retain(|e| e != contact);
        before != list.len()
    }
}
