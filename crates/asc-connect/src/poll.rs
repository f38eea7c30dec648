//! Poll-to-terminal loop shared by screenshot delivery and notarization

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ConnectError, Result};

/// Poll interval and overall deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollConfig {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// 2 second interval, 10 minute deadline
    pub fn screenshots() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(10 * 60))
    }

    /// 30 second interval, 1 hour deadline
    pub fn notarization() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(60 * 60))
    }
}

/// Outcome of one status check.
#[derive(Debug)]
pub enum PollStatus<T> {
    /// Not terminal yet; carries the observed state for logging
    Pending(String),
    /// Terminal success
    Done(T),
    /// Terminal failure
    Failed(ConnectError),
}

fn timed_out(operation: &str, id: &str) -> ConnectError {
    ConnectError::Timeout {
        operation: operation.to_string(),
        id: id.to_string(),
    }
}

fn canceled(operation: &str, id: &str) -> ConnectError {
    ConnectError::Canceled {
        operation: operation.to_string(),
        id: id.to_string(),
    }
}

/// Runs `fut` unless `cancel` fires or `deadline` passes first.
pub async fn with_deadline<T, Fut>(
    operation: &str,
    id: &str,
    deadline: Instant,
    cancel: &CancellationToken,
    fut: Fut,
) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(canceled(operation, id)),
        res = timeout_at(deadline, fut) => match res {
            Ok(result) => result,
            Err(_) => Err(timed_out(operation, id)),
        },
    }
}

/// Calls `check` every `config.interval` until it reports a terminal status,
/// `config.timeout` elapses, or `cancel` fires.
pub async fn poll_until_terminal<T, F, Fut>(
    operation: &str,
    id: &str,
    config: &PollConfig,
    cancel: &CancellationToken,
    check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollStatus<T>>>,
{
    let deadline = Instant::now() + config.timeout;
    poll_until_deadline(operation, id, config.interval, deadline, cancel, check).await
}

/// Same as [`poll_until_terminal`] with an absolute deadline, for callers
/// whose deadline also covers work done before polling started.
pub async fn poll_until_deadline<T, F, Fut>(
    operation: &str,
    id: &str,
    interval: Duration,
    deadline: Instant,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollStatus<T>>>,
{
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        match with_deadline(operation, id, deadline, cancel, check()).await? {
            PollStatus::Done(value) => {
                debug!(operation, id, attempt, "reached terminal state");
                return Ok(value);
            }
            PollStatus::Failed(err) => {
                debug!(operation, id, attempt, error = %err, "terminal failure");
                return Err(err);
            }
            PollStatus::Pending(state) => {
                debug!(operation, id, attempt, state = %state, "not terminal yet");
            }
        }

        let wake = std::cmp::min(Instant::now() + interval, deadline);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(canceled(operation, id)),
            _ = sleep_until(wake) => {}
        }

        if Instant::now() >= deadline {
            return Err(timed_out(operation, id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn config() -> PollConfig {
        PollConfig::new(Duration::from_secs(2), Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_after_pending_states() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let counter = calls.clone();
        let result = poll_until_terminal("delivery", "a1", &config(), &cancel, || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok(if n < 2 {
                    PollStatus::Pending("IN_PROGRESS".to_string())
                } else {
                    PollStatus::Done(n)
                })
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_status_is_returned() {
        let cancel = CancellationToken::new();
        let err = poll_until_terminal::<(), _, _>("delivery", "a1", &config(), &cancel, || async {
            Ok(PollStatus::Failed(ConnectError::DeliveryFailed {
                asset_id: "a1".to_string(),
                detail: "bad image".to_string(),
            }))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ConnectError::DeliveryFailed { ref detail, .. } if detail == "bad image"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_never_terminal() {
        let cancel = CancellationToken::new();
        let start = Instant::now();
        let err = poll_until_terminal::<(), _, _>("delivery", "asset-42", &config(), &cancel, || async {
            Ok(PollStatus::Pending("IN_PROGRESS".to_string()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ConnectError::Timeout { ref id, .. } if id == "asset-42"));
        assert!(err.to_string().contains("asset-42"));
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_wait() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let err = poll_until_terminal::<(), _, _>("notarization", "sub-1", &config(), &cancel, || async {
            Ok(PollStatus::Pending("In Progress".to_string()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ConnectError::Canceled { .. }));
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_error_propagates() {
        let cancel = CancellationToken::new();
        let err = poll_until_terminal::<(), _, _>("delivery", "a1", &config(), &cancel, || async {
            Err(ConnectError::Api {
                status: 500,
                message: "boom".to_string(),
            })
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ConnectError::Api { status: 500, .. }));
    }
}
