//! Waiting on asynchronous cloud resources
//!
//! [`wait_until_active`] polls a status probe with exponential backoff until
//! the resource becomes active, fails, runs past its deadline, or the run is
//! cancelled. [`settle`] performs the fixed propagation delays some provider
//! operations need before dependent calls succeed.

use crate::cloud::{ResourceKind, ResourceStatus};
use crate::error::{ProvisionError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Backoff and deadline for one wait
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// Wait after the first unsettled read
    pub initial_interval: Duration,
    /// Upper bound for the wait between reads
    pub max_interval: Duration,
    /// Growth factor applied after every unsettled read
    pub multiplier: f64,
    /// Total time the wait may take
    pub deadline: Duration,
}

impl PollPolicy {
    fn next_interval(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier).min(self.max_interval)
    }
}

/// Poll `probe` until the resource is active
///
/// The probe runs immediately, then after each backoff interval. An active
/// status returns the number of probes made; a failed status returns
/// [`ProvisionError::TerminalFailure`] without probing again.
///
/// # Arguments
/// * `kind` - Kind of the resource, for logs and errors
/// * `name` - Name or id of the resource, for logs and errors
/// * `policy` - Backoff and deadline
/// * `cancel` - Token that aborts the wait
/// * `probe` - Reads the current lifecycle status
///
/// # Returns
/// * `Ok(polls)` - The resource is active
/// * `Err(ProvisionError)` - Terminal failure, timeout, cancellation, or a probe error
pub async fn wait_until_active<F, Fut>(
    kind: ResourceKind,
    name: &str,
    policy: &PollPolicy,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<u32>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ResourceStatus>>,
{
    let started = Instant::now();
    let mut interval = policy.initial_interval;
    let mut polls = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled(format!("waiting for {} {}", kind, name)));
        }

        polls += 1;
        let status = probe().await?;
        tracing::debug!(
            resource = %kind,
            name = %name,
            status = %status,
            poll = polls,
            "Polled resource status"
        );

        match status {
            ResourceStatus::Active => {
                tracing::info!(
                    resource = %kind,
                    name = %name,
                    polls = polls,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Resource is active"
                );
                return Ok(polls);
            }
            ResourceStatus::Failed => {
                tracing::error!(resource = %kind, name = %name, "Resource reached a failed status");
                return Err(ProvisionError::TerminalFailure {
                    kind,
                    name: name.to_string(),
                    status: status.to_string(),
                });
            }
            ResourceStatus::Creating => {}
        }

        let elapsed = started.elapsed();
        if elapsed >= policy.deadline {
            tracing::error!(
                resource = %kind,
                name = %name,
                elapsed_ms = elapsed.as_millis() as u64,
                "Gave up waiting for resource"
            );
            return Err(ProvisionError::Timeout {
                kind,
                name: name.to_string(),
                elapsed,
            });
        }

        let wait = interval.min(policy.deadline - elapsed);
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ProvisionError::Cancelled(format!("waiting for {} {}", kind, name)));
            }
            _ = tokio::time::sleep(wait) => {}
        }
        interval = policy.next_interval(interval);
    }
}

/// Sleep for a fixed propagation delay unless cancelled
pub async fn settle(delay: Duration, cancel: &CancellationToken, reason: &str) -> Result<()> {
    if delay.is_zero() {
        return Ok(());
    }
    tracing::info!(delay_ms = delay.as_millis() as u64, reason = %reason, "Waiting for propagation");
    tokio::select! {
        _ = cancel.cancelled() => Err(ProvisionError::Cancelled(reason.to_string())),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> PollPolicy {
        PollPolicy {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(4),
            multiplier: 2.0,
            deadline: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn test_wait_returns_after_transition() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let polls = wait_until_active(
            ResourceKind::Collection,
            "c",
            &fast_policy(),
            &CancellationToken::new(),
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    Ok(if n < 3 {
                        ResourceStatus::Creating
                    } else {
                        ResourceStatus::Active
                    })
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(polls, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_failed_status_stops_polling() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = wait_until_active(
            ResourceKind::KnowledgeBase,
            "kb",
            &fast_policy(),
            &CancellationToken::new(),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(ResourceStatus::Failed) }
            },
        )
        .await;

        assert!(matches!(
            result,
            Err(ProvisionError::TerminalFailure { kind: ResourceKind::KnowledgeBase, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deadline_produces_timeout() {
        let policy = PollPolicy {
            deadline: Duration::from_millis(20),
            ..fast_policy()
        };
        let result = wait_until_active(
            ResourceKind::Agent,
            "a",
            &policy,
            &CancellationToken::new(),
            || async { Ok(ResourceStatus::Creating) },
        )
        .await;

        assert!(matches!(result, Err(ProvisionError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_wait() {
        let cancel = CancellationToken::new();
        let policy = PollPolicy {
            initial_interval: Duration::from_secs(60),
            max_interval: Duration::from_secs(60),
            multiplier: 1.0,
            deadline: Duration::from_secs(600),
        };

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result = wait_until_active(ResourceKind::Collection, "c", &policy, &cancel, || async {
            Ok(ResourceStatus::Creating)
        })
        .await;

        assert!(matches!(result, Err(ProvisionError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_probe_error_propagates() {
        let result = wait_until_active(
            ResourceKind::DataSource,
            "ds",
            &fast_policy(),
            &CancellationToken::new(),
            || async {
                Err(ProvisionError::from(crate::cloud::CloudError::Throttled(
                    "rate".to_string(),
                )))
            },
        )
        .await;

        assert!(matches!(result, Err(ProvisionError::Cloud(_))));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = fast_policy();
        let mut interval = policy.initial_interval;
        for _ in 0..10 {
            interval = policy.next_interval(interval);
        }
        assert_eq!(interval, policy.max_interval);
    }

    #[tokio::test]
    async fn test_settle_zero_returns_immediately() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(settle(Duration::ZERO, &cancel, "nothing").await.is_ok());
    }

    #[tokio::test]
    async fn test_settle_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = settle(Duration::from_secs(30), &cancel, "role propagation").await;
        assert!(matches!(result, Err(ProvisionError::Cancelled(_))));
    }
}
