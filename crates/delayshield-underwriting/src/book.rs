//! Policy storage, lookup indexes and the oracle request table

use std::collections::{BTreeSet, HashMap};

use delayshield_common::{AccountId, PolicyId, RequestId, TokenId};

use crate::oracle::OracleRequest;
use crate::policy::Policy;

/// Where an oracle request stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Consumed,
    Unknown,
}

/// All policies plus the request table, guarded together by the manager
#[derive(Debug, Default)]
pub struct PolicyBook {
    policies: HashMap<PolicyId, Policy>,
    by_order: Vec<PolicyId>,
    by_token: HashMap<TokenId, u64>,
    by_buyer: HashMap<AccountId, BTreeSet<u64>>,
    sequence: u64,
    pending: HashMap<RequestId, OracleRequest>,
    consumed: BTreeSet<RequestId>,
}

impl PolicyBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next sequence number for policy id derivation
    pub fn next_sequence(&mut self) -> u64 {
        let seq = self.sequence;
        self.sequence += 1;
        seq
    }

    /// Order the next inserted policy will receive
    pub fn next_order(&self) -> u64 {
        self.by_order.len() as u64
    }

    pub fn insert(&mut self, policy: Policy) {
        self.by_buyer
            .entry(policy.buyer.clone())
            .or_default()
            .insert(policy.order);
        self.by_order.push(policy.policy_id);
        self.policies.insert(policy.policy_id, policy);
    }

    pub fn len(&self) -> usize {
        self.by_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_order.is_empty()
    }

    pub fn get(&self, id: &PolicyId) -> Option<&Policy> {
        self.policies.get(id)
    }

    pub fn by_order(&self, order: u64) -> Option<&Policy> {
        let id = self.by_order.get(usize::try_from(order).ok()?)?;
        self.policies.get(id)
    }

    pub fn by_order_mut(&mut self, order: u64) -> Option<&mut Policy> {
        let id = self.by_order.get(usize::try_from(order).ok()?)?;
        self.policies.get_mut(id)
    }

    pub fn order_of_token(&self, token: TokenId) -> Option<u64> {
        self.by_token.get(&token).copied()
    }

    pub fn bind_token(&mut self, order: u64, token: TokenId) {
        if let Some(policy) = self.by_order_mut(order) {
            policy.token_id = Some(token);
            self.by_token.insert(token, order);
        }
    }

    /// Rebind the buyer of record, keeping the buyer index in step
    pub fn rebind_buyer(&mut self, order: u64, new_buyer: &AccountId) {
        let Some(policy) = self.by_order_mut(order) else {
            return;
        };
        let old = std::mem::replace(&mut policy.buyer, new_buyer.clone());

        if let Some(orders) = self.by_buyer.get_mut(&old) {
            orders.remove(&order);
            if orders.is_empty() {
                self.by_buyer.remove(&old);
            }
        }
        self.by_buyer
            .entry(new_buyer.clone())
            .or_default()
            .insert(order);
    }

    pub fn orders_of(&self, buyer: &AccountId) -> Vec<u64> {
        self.by_buyer
            .get(buyer)
            .map(|orders| orders.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Policy> {
        self.by_order.iter().filter_map(|id| self.policies.get(id))
    }

    // ----- oracle requests -----

    pub fn register_request(&mut self, request: OracleRequest) {
        self.pending.insert(request.request_id, request);
    }

    pub fn request_state(&self, id: &RequestId) -> RequestState {
        if self.pending.contains_key(id) {
            RequestState::Pending
        } else if self.consumed.contains(id) {
            RequestState::Consumed
        } else {
            RequestState::Unknown
        }
    }

    pub fn pending_request(&self, id: &RequestId) -> Option<&OracleRequest> {
        self.pending.get(id)
    }

    /// Close a request so later deliveries are recognised as duplicates
    pub fn consume_request(&mut self, id: &RequestId) -> Option<OracleRequest> {
        let request = self.pending.remove(id)?;
        self.consumed.insert(*id);
        Some(request)
    }

    /// Forget a request that never reached the oracle
    pub fn drop_request(&mut self, id: &RequestId) -> Option<OracleRequest> {
        self.pending.remove(id)
    }

    pub fn pending_requests(&self) -> Vec<OracleRequest> {
        let mut requests: Vec<OracleRequest> = self.pending.values().cloned().collect();
        requests.sort_by_key(|r| r.request_id);
        requests
    }
}
