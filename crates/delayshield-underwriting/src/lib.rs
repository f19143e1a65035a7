//! # DelayShield Underwriting
//!
//! Policy lifecycle for parametric flight-delay insurance.
//!
//! ```text
//! application ──▶ Sold ──▶ claim request ──▶ oracle result ──▶ Claimed
//!      │                                                  └──▶ Expired
//!      └──▶ Declined (no pool capacity)
//! ```
//!
//! - [`lifecycle`]: signed applications, claim triggers and settlement
//! - [`payoff`]: delay-to-payout schedule
//! - [`oracle`]: asynchronous flight-status provider contract
//! - [`registry`]: ownership tokens and transfer notifications
//!
//! [`DelayShield`] wires a pool, a policy manager and their shared
//! collaborators from one [`DelayShieldConfig`].

pub mod book;
pub mod error;
pub mod lifecycle;
pub mod oracle;
pub mod payoff;
pub mod policy;
pub mod registry;

use std::sync::Arc;

use anyhow::Context;
use delayshield_common::{
    AccessControl, AccountId, Clock, DelayShieldConfig, EventBus, SignatureAuthorizer,
};
use delayshield_pool::RiskPool;
use tracing::info;

pub use error::{
    AdminError, ApplicationError, ClaimError, OracleError, OwnershipError, RegistryError,
    SettlementError,
};
pub use lifecycle::{
    ClaimTrigger, Collaborators, PolicyApplication, PolicyManager, SettlementOutcome,
};
pub use oracle::{ChannelOracle, OracleClient, OracleRequest};
pub use payoff::{PayoffSchedule, Settlement};
pub use policy::{Policy, PolicyStatus, PolicyView};
pub use registry::{InMemoryRegistry, OwnershipHook, OwnershipRegistry};

/// A fully wired DelayShield instance
pub struct DelayShield {
    pub config: DelayShieldConfig,
    pub access: Arc<AccessControl>,
    pub events: Arc<EventBus>,
    pub authorizer: Arc<SignatureAuthorizer>,
    pub pool: Arc<RiskPool>,
    pub manager: Arc<PolicyManager>,
    pub clock: Arc<dyn Clock>,
}

impl DelayShield {
    /// Wire pool and policy manager around the given collaborators
    ///
    /// `registry_address` is the only caller allowed to report ownership
    /// transfers.
    pub fn new(
        config: DelayShieldConfig,
        owner: AccountId,
        registry_address: AccountId,
        clock: Arc<dyn Clock>,
        oracle: Arc<dyn OracleClient>,
        registry: Arc<dyn OwnershipRegistry>,
    ) -> anyhow::Result<Self> {
        config.validate().context("invalid DelayShield configuration")?;

        let events = Arc::new(EventBus::new());
        let access = Arc::new(AccessControl::new(owner, registry_address));
        let authorizer = Arc::new(SignatureAuthorizer::new(access.clone(), events.clone()));

        let pool = Arc::new(
            RiskPool::new(&config.pool, access.clone(), clock.clone(), events.clone())
                .context("failed to create risk pool")?,
        );

        let manager = Arc::new(
            PolicyManager::new(
                &config.underwriting,
                &config.oracle,
                Collaborators {
                    pool: pool.clone(),
                    authorizer: authorizer.clone(),
                    access: access.clone(),
                    clock: clock.clone(),
                    events: events.clone(),
                    oracle,
                    registry,
                },
            )
            .context("failed to create policy manager")?,
        );

        info!(
            collateral_factor = %config.pool.collateral_factor,
            min_lead_time_secs = config.underwriting.min_lead_time_secs,
            "DelayShield initialized"
        );

        Ok(Self {
            config,
            access,
            events,
            authorizer,
            pool,
            manager,
            clock,
        })
    }

    /// Wire an instance with an in-process ownership registry
    ///
    /// The registry is attached to the manager so token transfers rebind
    /// the buyer of record.
    pub fn in_memory(
        config: DelayShieldConfig,
        owner: AccountId,
        clock: Arc<dyn Clock>,
        oracle: Arc<dyn OracleClient>,
    ) -> anyhow::Result<(Self, Arc<InMemoryRegistry>)> {
        let registry = Arc::new(InMemoryRegistry::new(AccountId::from("registry")));
        let shield = Self::new(
            config,
            owner,
            registry.address().clone(),
            clock,
            oracle,
            registry.clone(),
        )?;

        let hook: Arc<dyn OwnershipHook> = shield.manager.clone();
        registry.attach(&hook);
        Ok((shield, registry))
    }
}
