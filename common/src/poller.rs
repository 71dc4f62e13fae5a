//! Waits for out-of-band approval of a signed key request.
//!
//! `Idle -> Pending -> Completed | Abandoned`. Every attempt sleeps for the
//! configured interval, then issues one status read. The loop ends on a
//! `completed` state, on cancellation, or when the optional timeout elapses.

use std::future;

use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::Authority;
use crate::config::PollConfig;
use crate::error::{Error, Result};
use crate::wire::{PollOutcome, ProvisioningToken, SignerRecord};

/// Consecutive responses without a usable state between two warnings.
const MALFORMED_WARN_EVERY: u32 = 5;

fn malformed_warning_due(streak: u32) -> bool {
    streak > 0 && streak % MALFORMED_WARN_EVERY == 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Pending,
    Completed,
    Abandoned,
}

#[derive(Debug)]
pub struct ApprovalPoller {
    config: PollConfig,
    state: PollState,
    attempts: u32,
    malformed: u32,
}

async fn elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}

impl ApprovalPoller {
    pub fn new(config: PollConfig) -> Self {
        Self {
            config,
            state: PollState::Idle,
            attempts: 0,
            malformed: 0,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Status requests issued so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Consecutive status responses that carried no usable state.
    pub fn malformed_streak(&self) -> u32 {
        self.malformed
    }

    async fn attempt(&self, authority: &dyn Authority, token: &ProvisioningToken) -> PollOutcome {
        sleep(self.config.interval).await;
        match authority.signed_key_request_status(&token.token).await {
            Ok(envelope) => PollOutcome::classify(envelope, token),
            Err(e) => {
                warn!("status request failed, retrying next interval: {e}");
                PollOutcome::Pending(None)
            }
        }
    }

    /// Polls until approval. Cancellation and timeout both end in
    /// [`Error::ProvisioningTimedOut`].
    pub async fn wait(
        &mut self,
        authority: &dyn Authority,
        token: &ProvisioningToken,
        cancel: &CancellationToken,
    ) -> Result<SignerRecord> {
        let deadline = self.config.timeout.map(|t| Instant::now() + t);
        self.state = PollState::Pending;
        self.malformed = 0;

        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                _ = elapsed(deadline) => None,
                outcome = self.attempt(authority, token) => Some(outcome),
            };
            let Some(outcome) = outcome else {
                self.state = PollState::Abandoned;
                info!(attempts = self.attempts, "stopped waiting for signer approval");
                return Err(Error::ProvisioningTimedOut);
            };
            self.attempts += 1;

            match outcome {
                PollOutcome::Completed(record) => {
                    self.state = PollState::Completed;
                    info!(attempts = self.attempts, "signer approved");
                    return Ok(record);
                }
                PollOutcome::Pending(Some(state)) => {
                    self.malformed = 0;
                    debug!(attempt = self.attempts, ?state, "signer request still pending");
                }
                PollOutcome::Pending(None) => {
                    self.malformed += 1;
                    if malformed_warning_due(self.malformed) {
                        warn!(
                            attempt = self.attempts,
                            streak = self.malformed,
                            "status responses keep arriving without a usable state"
                        );
                    } else {
                        debug!(attempt = self.attempts, streak = self.malformed, "no usable state in status response");
                    }
                }
            }
        }
    }
}
