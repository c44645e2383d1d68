//! Bounded retry against the peer's controller capability.
//!
//! Each attempt dials a fresh connection, probes the controller's config
//! line, and tears the connection down again. On the second-to-last attempt
//! the controller commits the configuration back; the final attempt is a
//! plain verification probe. Every attempt is followed by the configured
//! delay, including the last one.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use tether_interface::Controller;
use tether_link::{ConnectionManager, Endpoint, Transport};

use crate::error::RetryError;
use crate::proxy::Proxy;

const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(3);

/// How many attempts to make and how long to pause between them.
#[derive(Debug, Clone)]
pub struct RetryPlan {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPlan {
    pub fn new(max_attempts: u32, delay: Duration) -> Result<Self, RetryError> {
        if max_attempts == 0 {
            return Err(RetryError::InvalidPlan("max_attempts must be at least 1".into()));
        }
        Ok(Self { max_attempts, delay })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// Whether the committing action ran, and how it went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The config was read back and substituted successfully.
    Applied,
    /// The commit ran and the peer refused it, or the read-back failed.
    Failed(String),
    /// The commit slot never came around with a reachable controller, or
    /// the plan had no room for one (a single attempt is probe-only).
    NeverAttempted,
}

/// What a full retry run accomplished.
#[derive(Debug, Clone)]
pub struct RetryReport {
    pub attempts_made: u32,
    pub probes_ok: u32,
    pub commit: CommitOutcome,
}

impl RetryReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.commit, CommitOutcome::Applied)
    }
}

/// Drives a bounded reconnect-probe-commit loop against one endpoint.
pub struct RetryController {
    transport: Arc<dyn Transport>,
    endpoint: Endpoint,
    plan: RetryPlan,
    dial_timeout: Duration,
    acquire_timeout: Duration,
}

impl RetryController {
    pub fn new(transport: Arc<dyn Transport>, endpoint: Endpoint, plan: RetryPlan) -> Self {
        Self {
            transport,
            endpoint,
            plan,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }

    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Run the loop to completion. Never fails: unreachable attempts are
    /// recorded in the report, not raised.
    pub async fn run(&self) -> RetryReport {
        let max = self.plan.max_attempts();
        let mut report = RetryReport {
            attempts_made: 0,
            probes_ok: 0,
            commit: CommitOutcome::NeverAttempted,
        };

        for attempt in 1..=max {
            debug!(attempt, max, "controller access attempt");
            let manager =
                ConnectionManager::new(Arc::clone(&self.transport), self.endpoint.clone());
            if let Err(error) = manager.open(self.dial_timeout).await {
                debug!(attempt, %error, "dial rejected; the attempt counts anyway");
            }

            if let Some(session) = manager.session().await {
                if let Some(proxy) =
                    Proxy::<Arc<dyn Controller>>::bind(&session, self.acquire_timeout).await
                {
                    let controller = proxy.interface();
                    if max - attempt == 1 {
                        report.commit = self.commit(controller).await;
                    } else if controller.config_line().await.is_ok() {
                        report.probes_ok += 1;
                    }
                    proxy.release();
                }
            }
            report.attempts_made = attempt;

            // Each attempt gets a fresh connection, so the peer re-announces
            // its state every time around.
            if let Err(error) = manager.close(self.dial_timeout).await {
                debug!(attempt, %error, "close did not quiesce cleanly");
            }

            // The pause follows every attempt, the final one included.
            tokio::time::sleep(self.plan.delay()).await;
        }

        info!(
            attempts = report.attempts_made,
            probes_ok = report.probes_ok,
            commit = ?report.commit,
            "retry run finished"
        );
        report
    }

    /// The committing action: read the config line back and substitute it.
    /// Attempted at most once per run, one attempt before the budget runs
    /// out, leaving the final attempt free to verify the peer still answers.
    async fn commit(&self, controller: &Arc<dyn Controller>) -> CommitOutcome {
        let config = match controller.config_line().await {
            Ok(config) => config,
            Err(error) => return CommitOutcome::Failed(error.to_string()),
        };
        match controller.substitute(&config).await {
            Ok(()) => CommitOutcome::Applied,
            Err(error) => CommitOutcome::Failed(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_attempts_is_an_invalid_plan() {
        assert!(RetryPlan::new(0, Duration::from_millis(10)).is_err());
        assert!(RetryPlan::new(1, Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn commit_slot_sits_one_before_the_last_attempt() {
        // The loop commits when max - attempt == 1.
        let slot = |max: u32| (1..=max).find(|attempt| max - attempt == 1);
        assert_eq!(slot(1), None);
        assert_eq!(slot(2), Some(1));
        assert_eq!(slot(5), Some(4));
    }
}
