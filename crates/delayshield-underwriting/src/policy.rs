//! Policy records and their state machine

use delayshield_common::{AccountId, PolicyId, RequestId, Timestamp, TokenId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Policy status
///
/// `Initial → {Sold, Declined}`, `Sold → {Claimed, Expired}`. Claimed,
/// Declined and Expired are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyStatus {
    Initial,
    Sold,
    Declined,
    Claimed,
    Expired,
}

impl PolicyStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PolicyStatus::Declined | PolicyStatus::Claimed | PolicyStatus::Expired
        )
    }

    /// Whether `self → next` is a legal transition
    pub fn can_transition_to(self, next: PolicyStatus) -> bool {
        matches!(
            (self, next),
            (PolicyStatus::Initial, PolicyStatus::Sold)
                | (PolicyStatus::Initial, PolicyStatus::Declined)
                | (PolicyStatus::Sold, PolicyStatus::Claimed)
                | (PolicyStatus::Sold, PolicyStatus::Expired)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PolicyStatus::Initial => "initial",
            PolicyStatus::Sold => "sold",
            PolicyStatus::Declined => "declined",
            PolicyStatus::Claimed => "claimed",
            PolicyStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for PolicyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A flight-delay policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub policy_id: PolicyId,
    /// Dense enumeration index
    pub order: u64,
    pub product_id: String,
    /// Buyer of record; rebound only through the ownership registry
    pub buyer: AccountId,
    pub flight_number: String,
    pub premium: Decimal,
    /// Maximum payout, reserved in the pool while the policy is sold
    pub payoff: Decimal,
    pub purchase_date: Timestamp,
    pub departure_date: Timestamp,
    pub landing_date: Timestamp,
    pub status: PolicyStatus,
    pub is_claim_requested: bool,
    /// Delay reported by the oracle, in minutes
    pub delay_result: Option<i64>,
    pub paid_out: Decimal,
    pub token_id: Option<TokenId>,
    /// Oracle request currently awaiting a result
    pub outstanding_request: Option<RequestId>,
}

impl Policy {
    pub fn view(&self) -> PolicyView {
        PolicyView {
            policy_id: self.policy_id.to_hex(),
            order: self.order,
            product_id: self.product_id.clone(),
            buyer: self.buyer.to_string(),
            flight_number: self.flight_number.clone(),
            premium: self.premium,
            payoff: self.payoff,
            purchase_date: self.purchase_date,
            departure_date: self.departure_date,
            landing_date: self.landing_date,
            status: self.status.as_str(),
            is_claim_requested: self.is_claim_requested,
            delay_result: self.delay_result,
            paid_out: self.paid_out,
            token_id: self.token_id.map(|t| t.0),
        }
    }
}

/// Flat read model for UIs and audit exports
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyView {
    pub policy_id: String,
    pub order: u64,
    pub product_id: String,
    pub buyer: String,
    pub flight_number: String,
    pub premium: Decimal,
    pub payoff: Decimal,
    pub purchase_date: Timestamp,
    pub departure_date: Timestamp,
    pub landing_date: Timestamp,
    pub status: &'static str,
    pub is_claim_requested: bool,
    pub delay_result: Option<i64>,
    pub paid_out: Decimal,
    pub token_id: Option<u64>,
}

impl PolicyView {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
