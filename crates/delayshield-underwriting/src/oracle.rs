//! Flight-status oracle contract
//!
//! The policy manager hands an [`OracleRequest`] to an [`OracleClient`] and
//! returns without waiting for the answer. Whoever drives the provider
//! later calls `PolicyManager::on_oracle_result` with the same request id.

use async_trait::async_trait;
use delayshield_common::{OracleSettings, RequestId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::OracleError;

/// One outstanding question to the flight-status provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleRequest {
    pub request_id: RequestId,
    pub policy_order: u64,
    pub job_id: String,
    /// `endpoint_template + flight + "/dep/" + date`
    pub url: String,
    /// Where the delay sits in the provider's JSON response
    pub json_path: String,
    /// The provider multiplies its answer by this before returning it
    pub result_multiplier: i64,
}

impl OracleRequest {
    /// Build a request for a flight on `date` (provider format, e.g. `2024/05/01`)
    ///
    /// `path` overrides the configured JSON path when present.
    pub fn build(
        settings: &OracleSettings,
        request_id: RequestId,
        policy_order: u64,
        flight_number: &str,
        date: &str,
        path: Option<&str>,
    ) -> Self {
        let json_path = match path {
            Some(p) if !p.trim().is_empty() => p.to_string(),
            _ => settings.json_path.clone(),
        };
        Self {
            request_id,
            policy_order,
            job_id: settings.job_id.clone(),
            url: format!("{}{}/dep/{}", settings.endpoint_template, flight_number, date),
            json_path,
            result_multiplier: settings.result_multiplier,
        }
    }

    /// Convert the provider's raw integer back to minutes
    pub fn decode(&self, raw: i64) -> i64 {
        if self.result_multiplier > 1 {
            raw / self.result_multiplier
        } else {
            raw
        }
    }
}

/// Asynchronous channel to the flight-status provider
#[async_trait]
pub trait OracleClient: Send + Sync {
    /// Hand off a request; must not wait for the provider's answer
    async fn dispatch(&self, request: &OracleRequest) -> Result<(), OracleError>;
}

/// Oracle client backed by a tokio channel
///
/// The receiving half belongs to the provider adapter, which answers each
/// request through the policy manager's result callback.
#[derive(Clone)]
pub struct ChannelOracle {
    tx: mpsc::Sender<OracleRequest>,
}

impl ChannelOracle {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<OracleRequest>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl OracleClient for ChannelOracle {
    async fn dispatch(&self, request: &OracleRequest) -> Result<(), OracleError> {
        debug!(request_id = %request.request_id, url = %request.url, "Dispatching oracle request");
        self.tx
            .send(request.clone())
            .await
            .map_err(|_| OracleError::ChannelClosed)
    }
}
