//! Policy lifecycle manager
//!
//! Takes signed applications, reserves pool capital for them, issues oracle
//! requests for claims and settles each policy exactly once when the oracle
//! answers.
//!
//! ## Locking
//!
//! The policy book sits behind one mutex. Pool calls are made while it is
//! held, so the lock order is always book then pool. External hooks (oracle
//! dispatch, token minting) run only after the book lock is released and
//! the bookkeeping they depend on is committed.

use std::sync::Arc;

use delayshield_common::{
    AccessControl, AccountId, ApplicationMessage, ClaimMessage, Clock, EventBus, InsuranceEvent,
    OracleSettings, PolicyId, RequestId, SignableFields, SignatureAuthorizer, Timestamp, TokenId,
    UnderwritingSettings,
};
use delayshield_pool::{Disbursement, PoolError, RiskPool};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::book::{PolicyBook, RequestState};
use crate::error::{AdminError, ApplicationError, ClaimError, OwnershipError, SettlementError};
use crate::oracle::{OracleClient, OracleRequest};
use crate::payoff::{PayoffSchedule, Settlement};
use crate::policy::{Policy, PolicyStatus, PolicyView};
use crate::registry::{OwnershipHook, OwnershipRegistry};

/// A priced, signed application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyApplication {
    pub buyer: AccountId,
    pub product_id: String,
    pub flight_number: String,
    pub premium: Decimal,
    pub payoff: Decimal,
    pub departure_date: Timestamp,
    pub landing_date: Timestamp,
    /// Quote expiry
    pub deadline: Timestamp,
    /// Quote signature over flight number, buyer, premium and deadline
    pub signature: Vec<u8>,
}

/// A request to ask the oracle about a policy's flight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimTrigger {
    pub caller: AccountId,
    pub policy_order: u64,
    pub flight_number: String,
    /// Departure date in the provider's path format
    pub date: String,
    /// Overrides the configured JSON path
    pub path: Option<String>,
    /// Owner only; replaces a stuck outstanding request
    pub force_update: bool,
    pub deadline: Timestamp,
    /// Claim-trigger signature; not needed when the owner calls
    pub signature: Option<Vec<u8>>,
}

/// Result of a settled oracle callback
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementOutcome {
    pub request_id: RequestId,
    pub policy_order: u64,
    pub policy_id: PolicyId,
    pub status: PolicyStatus,
    pub delay_minutes: i64,
    pub payout: Decimal,
    /// Collateral the pool released in this step (claim payout first)
    pub disbursements: Vec<Disbursement>,
}

/// Collaborators the manager is wired to
pub struct Collaborators {
    pub pool: Arc<RiskPool>,
    pub authorizer: Arc<SignatureAuthorizer>,
    pub access: Arc<AccessControl>,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<EventBus>,
    pub oracle: Arc<dyn OracleClient>,
    pub registry: Arc<dyn OwnershipRegistry>,
}

#[derive(Debug, Clone)]
struct Parameters {
    min_lead_time_secs: i64,
    schedule: PayoffSchedule,
    max_payoff: Option<Decimal>,
    oracle: OracleSettings,
}

/// The policy lifecycle manager
pub struct PolicyManager {
    book: Mutex<PolicyBook>,
    params: RwLock<Parameters>,
    pool: Arc<RiskPool>,
    authorizer: Arc<SignatureAuthorizer>,
    access: Arc<AccessControl>,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
    oracle: Arc<dyn OracleClient>,
    registry: Arc<dyn OwnershipRegistry>,
}

impl PolicyManager {
    pub fn new(
        settings: &UnderwritingSettings,
        oracle_settings: &OracleSettings,
        deps: Collaborators,
    ) -> Result<Self, AdminError> {
        oracle_settings.validate()?;

        Ok(Self {
            book: Mutex::new(PolicyBook::new()),
            params: RwLock::new(Parameters {
                min_lead_time_secs: settings.min_lead_time_secs,
                schedule: PayoffSchedule::from(settings),
                max_payoff: settings.max_payoff,
                oracle: oracle_settings.clone(),
            }),
            pool: deps.pool,
            authorizer: deps.authorizer,
            access: deps.access,
            clock: deps.clock,
            events: deps.events,
            oracle: deps.oracle,
            registry: deps.registry,
        })
    }

    // ============ APPLICATIONS ============

    /// Underwrite a signed application
    ///
    /// On success the policy is Sold and its payoff is reserved in the pool.
    /// When the pool lacks capacity the policy is kept as Declined and
    /// `ApplicationError::InsufficientCapacity` is returned.
    #[instrument(skip(self, application), fields(buyer = %application.buyer, flight = %application.flight_number))]
    pub fn new_application(&self, application: PolicyApplication) -> Result<PolicyId, ApplicationError> {
        let now = self.clock.now();
        let (min_lead, max_payoff) = {
            let params = self.params.read();
            (params.min_lead_time_secs, params.max_payoff)
        };

        validate_application(&application, max_payoff)?;

        let earliest = now.saturating_add(min_lead);
        if application.departure_date < earliest {
            warn!(departure = application.departure_date, earliest, "Application too close to departure");
            return Err(ApplicationError::TooLate {
                departure: application.departure_date,
                earliest,
            });
        }

        let message = SignableFields::Application(ApplicationMessage {
            flight_number: application.flight_number.clone(),
            buyer: application.buyer.clone(),
            premium: application.premium,
            deadline: application.deadline,
        });
        let signer = self
            .authorizer
            .verify(&message, &application.signature, now)
            .map_err(|e| {
                warn!(error = %e, "Application signature rejected");
                ApplicationError::Unauthorized(e)
            })?;

        let (policy, declined) = {
            let mut book = self.book.lock();
            let sequence = book.next_sequence();
            let policy_id = PolicyId::derive(
                &application.buyer,
                &application.product_id,
                application.departure_date,
                sequence,
            );
            let mut policy = Policy {
                policy_id,
                order: book.next_order(),
                product_id: application.product_id,
                buyer: application.buyer,
                flight_number: application.flight_number,
                premium: application.premium,
                payoff: application.payoff,
                purchase_date: now,
                departure_date: application.departure_date,
                landing_date: application.landing_date,
                status: PolicyStatus::Initial,
                is_claim_requested: false,
                delay_result: None,
                paid_out: Decimal::ZERO,
                token_id: None,
                outstanding_request: None,
            };

            let reserved = if self.pool.check_capacity(policy.payoff) {
                self.pool.reserve(policy.premium, policy.payoff, &policy.buyer)
            } else {
                Err(PoolError::InsufficientCapacity {
                    required: policy.payoff,
                    available: self.pool.snapshot().available_capacity,
                })
            };

            let declined = match reserved {
                Ok(()) => {
                    policy.status = PolicyStatus::Sold;
                    None
                }
                Err(PoolError::InsufficientCapacity {
                    required,
                    available,
                }) => {
                    policy.status = PolicyStatus::Declined;
                    Some((required, available))
                }
                Err(e) => return Err(e.into()),
            };

            book.insert(policy.clone());
            (policy, declined)
        };

        info!(
            policy_id = %policy.policy_id,
            order = policy.order,
            signer = %signer,
            status = %policy.status,
            "Application recorded"
        );
        self.events.publish(InsuranceEvent::ApplicationSubmitted {
            policy_id: policy.policy_id,
            order: policy.order,
            buyer: policy.buyer.clone(),
            flight_number: policy.flight_number.clone(),
            premium: policy.premium,
            payoff: policy.payoff,
        });

        if let Some((required, available)) = declined {
            self.events.publish(InsuranceEvent::PolicyDeclined {
                policy_id: policy.policy_id,
                order: policy.order,
                buyer: policy.buyer.clone(),
                required,
                available,
            });
            return Err(ApplicationError::InsufficientCapacity {
                policy_id: policy.policy_id,
                required,
                available,
            });
        }

        let token_id = self.mint_token(&policy).ok();
        self.events.publish(InsuranceEvent::PolicySold {
            policy_id: policy.policy_id,
            order: policy.order,
            buyer: policy.buyer,
            token_id,
        });
        Ok(policy.policy_id)
    }

    /// Mint the ownership token for a committed policy
    fn mint_token(&self, policy: &Policy) -> Result<TokenId, AdminError> {
        match self.registry.mint(&policy.buyer, &policy.policy_id) {
            Ok(token) => {
                self.book.lock().bind_token(policy.order, token);
                info!(order = policy.order, token = %token, "Ownership token minted");
                Ok(token)
            }
            Err(e) => {
                warn!(order = policy.order, error = %e, "Ownership token mint failed");
                self.events.publish(InsuranceEvent::OwnershipMintFailed {
                    order: policy.order,
                    reason: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    // ============ CLAIMS ============

    /// Ask the oracle for the delay of a policy's flight
    ///
    /// The owner may always trigger; anyone else needs a claim-trigger
    /// signature from an authorized signer. `force_update` is owner only
    /// and replaces a request that never came back. Returns once the
    /// request is handed to the oracle; settlement happens in
    /// [`PolicyManager::on_oracle_result`].
    #[instrument(skip(self, trigger), fields(caller = %trigger.caller, order = trigger.policy_order, forced = trigger.force_update))]
    pub async fn new_claim_request(&self, trigger: ClaimTrigger) -> Result<RequestId, ClaimError> {
        let now = self.clock.now();
        self.authorize_claim(&trigger, now)?;

        let settings = self.params.read().oracle.clone();
        let order = trigger.policy_order;

        let request = {
            let mut book = self.book.lock();
            let policy = book
                .by_order(order)
                .ok_or(ClaimError::UnknownPolicy(order))?;

            if now < policy.landing_date {
                return Err(ClaimError::TooEarly {
                    order,
                    landing: policy.landing_date,
                    now,
                });
            }
            if policy.flight_number != trigger.flight_number {
                return Err(ClaimError::Mismatch {
                    given: trigger.flight_number.clone(),
                    stored: policy.flight_number.clone(),
                });
            }
            if policy.status != PolicyStatus::Sold
                || (policy.is_claim_requested && !trigger.force_update)
            {
                return Err(ClaimError::AlreadySettled {
                    order,
                    status: policy.status,
                });
            }

            let retired = policy.outstanding_request;
            let request = OracleRequest::build(
                &settings,
                RequestId::new(),
                order,
                &trigger.flight_number,
                &trigger.date,
                trigger.path.as_deref(),
            );

            if let Some(old) = retired {
                book.consume_request(&old);
                warn!(old_request = %old, "Outstanding oracle request retired by force update");
            }
            book.register_request(request.clone());
            if let Some(policy) = book.by_order_mut(order) {
                policy.is_claim_requested = true;
                policy.outstanding_request = Some(request.request_id);
            }
            request
        };

        info!(request_id = %request.request_id, url = %request.url, "Claim requested");
        self.events.publish(InsuranceEvent::ClaimRequested {
            order,
            request_id: request.request_id,
            url: request.url.clone(),
            forced: trigger.force_update,
        });

        if let Err(e) = self.oracle.dispatch(&request).await {
            error!(request_id = %request.request_id, error = %e, "Oracle dispatch failed");
            self.rollback_request(order, request.request_id);
            return Err(e.into());
        }

        Ok(request.request_id)
    }

    fn authorize_claim(&self, trigger: &ClaimTrigger, now: Timestamp) -> Result<(), ClaimError> {
        if trigger.force_update {
            self.access.require_owner(&trigger.caller)?;
            return Ok(());
        }
        if self.access.is_owner(&trigger.caller) {
            return Ok(());
        }

        let signature = trigger
            .signature
            .as_deref()
            .ok_or_else(|| ClaimError::NotPermitted {
                caller: trigger.caller.clone(),
            })?;
        let message = SignableFields::Claim(ClaimMessage {
            policy_order: trigger.policy_order,
            requester: trigger.caller.clone(),
            deadline: trigger.deadline,
        });
        self.authorizer.verify(&message, signature, now)?;
        Ok(())
    }

    /// Undo a request that never reached the oracle, unless something
    /// already replaced or settled it
    fn rollback_request(&self, order: u64, request_id: RequestId) {
        let mut book = self.book.lock();
        if book.drop_request(&request_id).is_none() {
            return;
        }
        if let Some(policy) = book.by_order_mut(order) {
            if policy.outstanding_request == Some(request_id) {
                policy.outstanding_request = None;
                policy.is_claim_requested = false;
            }
        }
    }

    /// Oracle callback
    ///
    /// Idempotent per request id: a request that was already consumed
    /// yields `DuplicateFulfillment` and changes nothing. If the pool
    /// refuses the settlement the request stays pending so it can be
    /// delivered again once the pool is resumed.
    #[instrument(skip(self, request_id), fields(request_id = %request_id))]
    pub fn on_oracle_result(
        &self,
        request_id: RequestId,
        raw_delay: i64,
    ) -> Result<SettlementOutcome, SettlementError> {
        let schedule = self.params.read().schedule;
        let mut events = Vec::new();

        let outcome = {
            let mut book = self.book.lock();
            let request = match book.request_state(&request_id) {
                RequestState::Consumed => {
                    warn!("Duplicate oracle fulfillment ignored");
                    return Err(SettlementError::DuplicateFulfillment(request_id));
                }
                RequestState::Unknown => {
                    warn!("Oracle result for unknown request");
                    return Err(SettlementError::UnknownRequest(request_id));
                }
                RequestState::Pending => book
                    .pending_request(&request_id)
                    .cloned()
                    .ok_or(SettlementError::UnknownRequest(request_id))?,
            };

            let order = request.policy_order;
            let policy = book
                .by_order(order)
                .cloned()
                .ok_or(SettlementError::UnknownRequest(request_id))?;

            let delay = request.decode(raw_delay);
            let settlement = schedule.settle(delay, policy.payoff);
            let status = match settlement {
                Settlement::Expire => PolicyStatus::Expired,
                Settlement::Payout(_) => PolicyStatus::Claimed,
            };
            if !policy.status.can_transition_to(status) {
                book.consume_request(&request_id);
                warn!(order, status = %policy.status, "Oracle result for settled policy ignored");
                return Err(SettlementError::DuplicateFulfillment(request_id));
            }

            let (payout, disbursements) = match settlement {
                Settlement::Expire => {
                    let paid = self.pool.release(policy.premium, policy.payoff, &policy.buyer)?;
                    (Decimal::ZERO, paid)
                }
                Settlement::Payout(amount) => {
                    let paid =
                        self.pool
                            .pay_claim(policy.premium, policy.payoff, amount, &policy.buyer)?;
                    (amount, paid)
                }
            };

            book.consume_request(&request_id);
            if let Some(record) = book.by_order_mut(order) {
                record.status = status;
                record.delay_result = Some(delay);
                record.paid_out = payout;
                record.outstanding_request = None;
            }

            events.push(InsuranceEvent::OracleResultFulfilled {
                request_id,
                order,
                delay_minutes: delay,
            });
            events.push(match status {
                PolicyStatus::Claimed => InsuranceEvent::PolicyClaimed {
                    policy_id: policy.policy_id,
                    order,
                    buyer: policy.buyer.clone(),
                    delay_minutes: delay,
                    payout,
                },
                _ => InsuranceEvent::PolicyExpired {
                    policy_id: policy.policy_id,
                    order,
                    delay_minutes: delay,
                },
            });

            SettlementOutcome {
                request_id,
                policy_order: order,
                policy_id: policy.policy_id,
                status,
                delay_minutes: delay,
                payout,
                disbursements,
            }
        };

        info!(
            order = outcome.policy_order,
            status = %outcome.status,
            delay = outcome.delay_minutes,
            payout = %outcome.payout,
            "Policy settled"
        );
        self.events.publish_all(events);
        Ok(outcome)
    }

    // ============ OWNERSHIP ============

    /// Rebind a policy's buyer after a registry transfer
    ///
    /// Only the registry may call this, and `old_owner` must match the
    /// buyer of record.
    #[instrument(skip(self, caller, old_owner, new_owner), fields(token = %token_id))]
    pub fn policy_owner_transfer(
        &self,
        caller: &AccountId,
        token_id: TokenId,
        old_owner: &AccountId,
        new_owner: &AccountId,
    ) -> Result<(), OwnershipError> {
        self.access.require_registry(caller)?;
        let minted_for = self.registry.policy_of(token_id);

        let order = {
            let mut book = self.book.lock();
            let order = match book.order_of_token(token_id) {
                Some(order) => order,
                None => {
                    // Minted, but the sale has not recorded the token yet
                    let order = minted_for
                        .and_then(|id| book.get(&id))
                        .filter(|p| p.token_id.is_none())
                        .map(|p| p.order)
                        .ok_or(OwnershipError::UnknownToken(token_id))?;
                    book.bind_token(order, token_id);
                    order
                }
            };
            let recorded = book
                .by_order(order)
                .map(|p| p.buyer.clone())
                .ok_or(OwnershipError::UnknownToken(token_id))?;
            if recorded != *old_owner {
                warn!(stated = %old_owner, recorded = %recorded, "Ownership transfer out of sync");
                return Err(OwnershipError::OwnerMismatch {
                    token: token_id,
                    stated: old_owner.clone(),
                    recorded,
                });
            }
            book.rebind_buyer(order, new_owner);
            order
        };

        info!(order, from = %old_owner, to = %new_owner, "Buyer of record changed");
        self.events.publish(InsuranceEvent::OwnershipTransferred {
            order,
            token_id,
            from: old_owner.clone(),
            to: new_owner.clone(),
        });
        Ok(())
    }

    // ============ ADMINISTRATION ============

    pub fn set_min_lead_time(&self, caller: &AccountId, secs: i64) -> Result<(), AdminError> {
        self.access.require_owner(caller)?;
        if secs < 0 {
            return Err(out_of_range("underwriting.min_lead_time_secs", "must not be negative"));
        }
        self.params.write().min_lead_time_secs = secs;
        self.parameter_changed("min_lead_time_secs", secs.to_string());
        Ok(())
    }

    pub fn set_delay_threshold(&self, caller: &AccountId, minutes: i64) -> Result<(), AdminError> {
        self.access.require_owner(caller)?;
        if minutes < 0 {
            return Err(out_of_range(
                "underwriting.delay_threshold_minutes",
                "must not be negative",
            ));
        }
        self.params.write().schedule.delay_threshold_minutes = minutes;
        self.parameter_changed("delay_threshold_minutes", minutes.to_string());
        Ok(())
    }

    pub fn set_max_payoff(&self, caller: &AccountId, max: Option<Decimal>) -> Result<(), AdminError> {
        self.access.require_owner(caller)?;
        if matches!(max, Some(m) if m <= Decimal::ZERO) {
            return Err(out_of_range("underwriting.max_payoff", "must be positive"));
        }
        self.params.write().max_payoff = max;
        let value = max.map(|m| m.to_string()).unwrap_or_else(|| "none".into());
        self.parameter_changed("max_payoff", value);
        Ok(())
    }

    /// Replace the oracle endpoint and job parameters
    pub fn set_oracle_job(&self, caller: &AccountId, settings: OracleSettings) -> Result<(), AdminError> {
        self.access.require_owner(caller)?;
        settings.validate()?;
        let value = format!("{} ({})", settings.job_id, settings.endpoint_template);
        self.params.write().oracle = settings;
        self.parameter_changed("oracle_job", value);
        Ok(())
    }

    /// Mint the ownership token of a sold policy whose first mint failed
    pub fn retry_mint(&self, caller: &AccountId, order: u64) -> Result<TokenId, AdminError> {
        self.access.require_owner(caller)?;

        let policy = self
            .book
            .lock()
            .by_order(order)
            .cloned()
            .ok_or(AdminError::UnknownPolicy(order))?;
        if let Some(token) = policy.token_id {
            return Ok(token);
        }
        if policy.status == PolicyStatus::Declined || policy.status == PolicyStatus::Initial {
            return Err(AdminError::NotMintable {
                order,
                status: policy.status,
            });
        }
        self.mint_token(&policy)
    }

    fn parameter_changed(&self, name: &str, value: String) {
        info!(parameter = name, %value, "Parameter changed");
        self.events.publish(InsuranceEvent::ParameterChanged {
            name: name.to_string(),
            value,
        });
    }

    // ============ READS ============

    pub fn policy(&self, id: &PolicyId) -> Option<Policy> {
        self.book.lock().get(id).cloned()
    }

    pub fn policy_by_order(&self, order: u64) -> Option<Policy> {
        self.book.lock().by_order(order).cloned()
    }

    pub fn policies_of(&self, buyer: &AccountId) -> Vec<Policy> {
        let book = self.book.lock();
        book.orders_of(buyer)
            .into_iter()
            .filter_map(|order| book.by_order(order).cloned())
            .collect()
    }

    /// Every policy in order, declined ones included
    pub fn policies(&self) -> Vec<Policy> {
        self.book.lock().iter().cloned().collect()
    }

    pub fn policy_count(&self) -> usize {
        self.book.lock().len()
    }

    pub fn policy_view(&self, order: u64) -> Option<PolicyView> {
        self.book.lock().by_order(order).map(Policy::view)
    }

    /// Oracle requests still waiting for an answer
    pub fn pending_requests(&self) -> Vec<OracleRequest> {
        self.book.lock().pending_requests()
    }

    pub fn oracle_settings(&self) -> OracleSettings {
        self.params.read().oracle.clone()
    }

    pub fn payoff_schedule(&self) -> PayoffSchedule {
        self.params.read().schedule
    }

    pub fn min_lead_time_secs(&self) -> i64 {
        self.params.read().min_lead_time_secs
    }
}

impl OwnershipHook for PolicyManager {
    fn policy_owner_transfer(
        &self,
        caller: &AccountId,
        token_id: TokenId,
        old_owner: &AccountId,
        new_owner: &AccountId,
    ) -> Result<(), OwnershipError> {
        PolicyManager::policy_owner_transfer(self, caller, token_id, old_owner, new_owner)
    }
}

fn validate_application(
    application: &PolicyApplication,
    max_payoff: Option<Decimal>,
) -> Result<(), ApplicationError> {
    let invalid = |reason: &str| Err(ApplicationError::InvalidInput(reason.to_string()));

    if application.flight_number.trim().is_empty() {
        return invalid("flight number is empty");
    }
    if application.premium <= Decimal::ZERO {
        return invalid("premium must be positive");
    }
    if application.payoff <= Decimal::ZERO {
        return invalid("payoff must be positive");
    }
    if application.landing_date < application.departure_date {
        return invalid("landing precedes departure");
    }
    if let Some(max) = max_payoff {
        if application.payoff > max {
            return Err(ApplicationError::PayoffTooLarge {
                payoff: application.payoff,
                max,
            });
        }
    }
    Ok(())
}

fn out_of_range(key: &str, reason: &str) -> AdminError {
    AdminError::Config(delayshield_common::ConfigError::OutOfRange {
        key: key.to_string(),
        reason: reason.to_string(),
    })
}
