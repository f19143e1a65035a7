//! Privileged-caller checks
//!
//! Administrative operations call [`AccessControl::require_owner`] as their
//! first step; the ownership-registry hook calls
//! [`AccessControl::require_registry`]. Both return a typed error instead of
//! panicking so the caller sees exactly why it was refused.

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{info, warn};

use crate::error::{Classify, ErrorClass};
use crate::types::account::AccountId;

/// Authorization failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AccessError {
    #[error("Caller {caller} is not the owner")]
    NotOwner { caller: AccountId },

    #[error("Caller {caller} is not the ownership registry")]
    NotRegistry { caller: AccountId },
}

impl Classify for AccessError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Access
    }
}

/// Owner and registry identities shared by every component
#[derive(Debug)]
pub struct AccessControl {
    owner: RwLock<AccountId>,
    registry: RwLock<AccountId>,
}

impl AccessControl {
    pub fn new(owner: AccountId, registry: AccountId) -> Self {
        Self {
            owner: RwLock::new(owner),
            registry: RwLock::new(registry),
        }
    }

    pub fn owner(&self) -> AccountId {
        self.owner.read().clone()
    }

    pub fn registry(&self) -> AccountId {
        self.registry.read().clone()
    }

    pub fn is_owner(&self, caller: &AccountId) -> bool {
        *self.owner.read() == *caller
    }

    pub fn require_owner(&self, caller: &AccountId) -> Result<(), AccessError> {
        if self.is_owner(caller) {
            Ok(())
        } else {
            warn!(caller = %caller, "Privileged operation refused");
            Err(AccessError::NotOwner {
                caller: caller.clone(),
            })
        }
    }

    pub fn require_registry(&self, caller: &AccountId) -> Result<(), AccessError> {
        if *self.registry.read() == *caller {
            Ok(())
        } else {
            warn!(caller = %caller, "Registry hook called by non-registry");
            Err(AccessError::NotRegistry {
                caller: caller.clone(),
            })
        }
    }

    /// Hand ownership to another account
    pub fn transfer_ownership(
        &self,
        caller: &AccountId,
        new_owner: AccountId,
    ) -> Result<(), AccessError> {
        self.require_owner(caller)?;
        info!(from = %caller, to = %new_owner, "Ownership transferred");
        *self.owner.write() = new_owner;
        Ok(())
    }

    /// Point the ownership hook at a different registry
    pub fn set_registry(&self, caller: &AccountId, registry: AccountId) -> Result<(), AccessError> {
        self.require_owner(caller)?;
        info!(registry = %registry, "Ownership registry changed");
        *self.registry.write() = registry;
        Ok(())
    }
}
