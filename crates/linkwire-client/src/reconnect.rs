use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ReconnectConfig;

/// Bounded retry budget of one reconnect campaign.
///
/// A campaign starts when the connection is lost and ends on success,
/// exhaustion or cancellation. The next loss starts a fresh campaign.
#[derive(Debug, Clone)]
pub struct ReconnectCampaign {
    attempts: u32,
    max_attempts: u32,
}

impl ReconnectCampaign {
    /// `max_attempts == 0` means unlimited.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            max_attempts,
        }
    }

    /// Claim the next attempt number, or `None` once the budget is spent.
    pub fn next_attempt(&mut self) -> Option<u32> {
        if self.max_attempts != 0 && self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts = self.attempts.saturating_add(1);
        Some(self.attempts)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_attempts == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignOutcome {
    Reconnected { attempts: u32 },
    Exhausted { attempts: u32 },
    Cancelled,
}

/// Drive one campaign: wait the interval, try, repeat.
///
/// `try_open` returns whether the attempt produced a live connection.
/// Cancellation is honored both while waiting and while an attempt runs.
pub(crate) async fn run_campaign<F, Fut>(
    config: &ReconnectConfig,
    cancel: &CancellationToken,
    mut try_open: F,
) -> CampaignOutcome
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<(), String>>,
{
    let mut campaign = ReconnectCampaign::new(config.max_attempts);
    while let Some(attempt) = campaign.next_attempt() {
        if !wait(cancel, config.interval).await {
            return CampaignOutcome::Cancelled;
        }

        debug!(attempt, max_attempts = config.max_attempts, "reconnect attempt");
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return CampaignOutcome::Cancelled,
            result = try_open(attempt) => result,
        };
        match result {
            Ok(()) => return CampaignOutcome::Reconnected { attempts: attempt },
            Err(err) => warn!(attempt, error = %err, "reconnect attempt failed"),
        }
    }
    CampaignOutcome::Exhausted {
        attempts: campaign.attempts(),
    }
}

async fn wait(cancel: &CancellationToken, interval: Duration) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(interval) => true,
    }
}
