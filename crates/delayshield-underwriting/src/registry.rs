//! Policy ownership registry contract
//!
//! The registry mints one token per sold policy and, whenever a token
//! changes hands, tells the policy manager through [`OwnershipHook`].

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use delayshield_common::{AccountId, PolicyId, TokenId};
use parking_lot::RwLock;
use tracing::info;

use crate::error::{OwnershipError, RegistryError};

/// Mints ownership tokens
pub trait OwnershipRegistry: Send + Sync {
    fn mint(&self, owner: &AccountId, policy_id: &PolicyId) -> Result<TokenId, RegistryError>;

    /// Policy a minted token stands for
    fn policy_of(&self, token: TokenId) -> Option<PolicyId>;
}

/// Receives ownership changes from the registry
pub trait OwnershipHook: Send + Sync {
    fn policy_owner_transfer(
        &self,
        caller: &AccountId,
        token_id: TokenId,
        old_owner: &AccountId,
        new_owner: &AccountId,
    ) -> Result<(), OwnershipError>;
}

#[derive(Default)]
struct Tokens {
    next: u64,
    holders: BTreeMap<TokenId, (AccountId, PolicyId)>,
}

/// In-process registry for tests and single-node deployments
///
/// Holds the hook weakly so a registry and its manager can point at each
/// other without leaking.
pub struct InMemoryRegistry {
    address: AccountId,
    tokens: RwLock<Tokens>,
    hook: RwLock<Option<Weak<dyn OwnershipHook>>>,
}

impl InMemoryRegistry {
    /// `address` is the identity the registry uses when calling the hook
    pub fn new(address: AccountId) -> Self {
        Self {
            address,
            tokens: RwLock::new(Tokens::default()),
            hook: RwLock::new(None),
        }
    }

    pub fn address(&self) -> &AccountId {
        &self.address
    }

    pub fn attach(&self, hook: &Arc<dyn OwnershipHook>) {
        *self.hook.write() = Some(Arc::downgrade(hook));
    }

    pub fn owner_of(&self, token: TokenId) -> Option<AccountId> {
        self.tokens.read().holders.get(&token).map(|(o, _)| o.clone())
    }

    pub fn minted(&self) -> usize {
        self.tokens.read().holders.len()
    }

    /// Move `token` from `from` to `to` and notify the policy manager
    ///
    /// The registry's own record changes only after the hook accepted the
    /// transfer.
    pub fn transfer(
        &self,
        from: &AccountId,
        to: &AccountId,
        token: TokenId,
    ) -> Result<(), RegistryError> {
        let holder = self
            .owner_of(token)
            .ok_or(RegistryError::UnknownToken(token))?;
        if holder != *from {
            return Err(RegistryError::NotHolder {
                token,
                holder,
                claimed: from.clone(),
            });
        }

        let hook = self
            .hook
            .read()
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(RegistryError::Detached)?;
        hook.policy_owner_transfer(&self.address, token, from, to)?;

        if let Some(entry) = self.tokens.write().holders.get_mut(&token) {
            entry.0 = to.clone();
        }
        info!(token = %token, from = %from, to = %to, "Ownership token transferred");
        Ok(())
    }
}

impl OwnershipRegistry for InMemoryRegistry {
    fn mint(&self, owner: &AccountId, policy_id: &PolicyId) -> Result<TokenId, RegistryError> {
        let mut tokens = self.tokens.write();
        tokens.next += 1;
        let token = TokenId(tokens.next);
        tokens.holders.insert(token, (owner.clone(), *policy_id));
        Ok(token)
    }

    fn policy_of(&self, token: TokenId) -> Option<PolicyId> {
        self.tokens.read().holders.get(&token).map(|(_, p)| *p)
    }
}
