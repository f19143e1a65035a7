//! Notifications for observers and audits
//!
//! Every state transition the core commits is announced as an
//! [`InsuranceEvent`]. Outflows of collateral (claim payouts, withdrawals)
//! are announced the same way; the external token adapter subscribes as a
//! sink and moves the actual tokens.
//!
//! Sinks run synchronously after the core has committed its bookkeeping.
//! They are observers: a sink must not call back into the pool or the
//! policy manager.

use std::sync::Arc;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::types::account::{AccountId, SignerId};
use crate::types::ids::{PolicyId, RequestId, TokenId};
use crate::types::Timestamp;

/// Event severity, used by sinks to pick a log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventSeverity {
    Info,
    Warning,
    Critical,
}

/// Everything the core announces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum InsuranceEvent {
    /// Signed application accepted for underwriting
    ApplicationSubmitted {
        policy_id: PolicyId,
        order: u64,
        buyer: AccountId,
        flight_number: String,
        premium: Decimal,
        payoff: Decimal,
    },
    /// Capital reserved, policy active
    PolicySold {
        policy_id: PolicyId,
        order: u64,
        buyer: AccountId,
        token_id: Option<TokenId>,
    },
    /// Pool lacked capacity; record kept for audit
    PolicyDeclined {
        policy_id: PolicyId,
        order: u64,
        buyer: AccountId,
        required: Decimal,
        available: Decimal,
    },
    PolicyClaimed {
        policy_id: PolicyId,
        order: u64,
        buyer: AccountId,
        delay_minutes: i64,
        payout: Decimal,
    },
    PolicyExpired {
        policy_id: PolicyId,
        order: u64,
        delay_minutes: i64,
    },
    /// Ownership token could not be minted; owner may retry
    OwnershipMintFailed { order: u64, reason: String },
    ClaimRequested {
        order: u64,
        request_id: RequestId,
        url: String,
        forced: bool,
    },
    OracleResultFulfilled {
        request_id: RequestId,
        order: u64,
        delay_minutes: i64,
    },
    OwnershipTransferred {
        order: u64,
        token_id: TokenId,
        from: AccountId,
        to: AccountId,
    },
    SignerAdded { signer: SignerId },
    SignerRemoved { signer: SignerId },
    CollateralFactorChanged { previous: Decimal, current: Decimal },
    /// Administrative parameter update (lead time, threshold, oracle job)
    ParameterChanged { name: String, value: String },
    Staked { underwriter: AccountId, amount: Decimal },
    UnstakeQueued {
        underwriter: AccountId,
        ticket: u64,
        amount: Decimal,
        available_at: Timestamp,
    },
    /// Collateral released to an underwriter
    UnstakePaid {
        underwriter: AccountId,
        ticket: Option<u64>,
        amount: Decimal,
    },
    /// Collateral released to a policy buyer
    ClaimPaid { buyer: AccountId, amount: Decimal },
    /// Ledger integrity fault; mutation halted
    PoolHalted { reason: String },
    PoolResumed,
}

impl InsuranceEvent {
    /// Stable event name for logs and filters
    pub fn name(&self) -> &'static str {
        match self {
            InsuranceEvent::ApplicationSubmitted { .. } => "ApplicationSubmitted",
            InsuranceEvent::PolicySold { .. } => "PolicySold",
            InsuranceEvent::PolicyDeclined { .. } => "PolicyDeclined",
            InsuranceEvent::PolicyClaimed { .. } => "PolicyClaimed",
            InsuranceEvent::PolicyExpired { .. } => "PolicyExpired",
            InsuranceEvent::OwnershipMintFailed { .. } => "OwnershipMintFailed",
            InsuranceEvent::ClaimRequested { .. } => "ClaimRequested",
            InsuranceEvent::OracleResultFulfilled { .. } => "OracleResultFulfilled",
            InsuranceEvent::OwnershipTransferred { .. } => "OwnershipTransferred",
            InsuranceEvent::SignerAdded { .. } => "SignerAdded",
            InsuranceEvent::SignerRemoved { .. } => "SignerRemoved",
            InsuranceEvent::CollateralFactorChanged { .. } => "CollateralFactorChanged",
            InsuranceEvent::ParameterChanged { .. } => "ParameterChanged",
            InsuranceEvent::Staked { .. } => "Staked",
            InsuranceEvent::UnstakeQueued { .. } => "UnstakeQueued",
            InsuranceEvent::UnstakePaid { .. } => "UnstakePaid",
            InsuranceEvent::ClaimPaid { .. } => "ClaimPaid",
            InsuranceEvent::PoolHalted { .. } => "PoolHalted",
            InsuranceEvent::PoolResumed => "PoolResumed",
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            InsuranceEvent::PoolHalted { .. } => EventSeverity::Critical,
            InsuranceEvent::PolicyDeclined { .. } | InsuranceEvent::OwnershipMintFailed { .. } => {
                EventSeverity::Warning
            }
            _ => EventSeverity::Info,
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Notification sink
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &InsuranceEvent);
}

/// Writes every event through `tracing`
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: &InsuranceEvent) {
        let payload = event.to_json();
        match event.severity() {
            EventSeverity::Info => info!(event = event.name(), %payload, "notification"),
            EventSeverity::Warning => warn!(event = event.name(), %payload, "notification"),
            EventSeverity::Critical => error!(event = event.name(), %payload, "CRITICAL notification"),
        }
    }
}

/// Buffers events in memory (tests, audit exporters)
#[derive(Default)]
pub struct MemoryEventSink {
    events: RwLock<Vec<InsuranceEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<InsuranceEvent> {
        self.events.read().clone()
    }

    /// Take all buffered events
    pub fn drain(&self) -> Vec<InsuranceEvent> {
        std::mem::take(&mut *self.events.write())
    }

    /// Number of buffered events with the given name
    pub fn count(&self, name: &str) -> usize {
        self.events.read().iter().filter(|e| e.name() == name).count()
    }
}

impl EventSink for MemoryEventSink {
    fn publish(&self, event: &InsuranceEvent) {
        self.events.write().push(event.clone());
    }
}

/// Fans events out to every registered sink
pub struct EventBus {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl EventBus {
    /// Bus with the tracing sink attached
    pub fn new() -> Self {
        Self {
            sinks: RwLock::new(vec![Arc::new(TracingEventSink)]),
        }
    }

    /// Bus with no sinks
    pub fn empty() -> Self {
        Self {
            sinks: RwLock::new(Vec::new()),
        }
    }

    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    pub fn publish(&self, event: InsuranceEvent) {
        // Clone the sink list so a slow sink never holds the lock
        let sinks = self.sinks.read().clone();
        for sink in &sinks {
            sink.publish(&event);
        }
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = InsuranceEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
