//! Cancellable waiting on reader conditions.
//!
//! A [`WaitSet`] blocks until one of its conditions triggers, the timeout
//! elapses, or its guard token is cancelled. Cancelling the guard wakes a
//! blocked wait immediately.
//!
//! Each reader wakes a single waiter, so a reader's conditions should be
//! attached to one wait set at a time.

use crate::reader::{DataState, ReaderShared};
use futures_util::future::select_all;
use huddle_protocol::Record;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Something a [`WaitSet`] can wait on.
pub trait Condition: Send + Sync {
    /// Whether the condition currently holds.
    fn is_triggered(&self) -> bool;

    /// Notified whenever the condition may have changed.
    fn signal(&self) -> &Notify;
}

/// Triggers while a reader caches samples matching a state mask.
pub struct ReadCondition<T> {
    reader: Arc<ReaderShared<T>>,
    mask: DataState,
}

impl<T: Record> ReadCondition<T> {
    pub(crate) fn new(reader: Arc<ReaderShared<T>>, mask: DataState) -> Self {
        Self { reader, mask }
    }
}

impl<T: Record> Condition for ReadCondition<T> {
    fn is_triggered(&self) -> bool {
        !self.reader.is_closed() && self.reader.has_matching(self.mask)
    }

    fn signal(&self) -> &Notify {
        self.reader.signal()
    }
}

/// Result of [`WaitSet::wait`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Indices (in attach order) of the conditions that triggered.
    Ready(Vec<usize>),
    /// Nothing triggered before the timeout.
    TimedOut,
    /// The guard token was cancelled.
    Cancelled,
}

/// A set of conditions plus a cancellation guard.
pub struct WaitSet {
    conditions: Vec<Box<dyn Condition>>,
    guard: CancellationToken,
}

impl WaitSet {
    /// Create an empty wait set guarded by `guard`.
    #[must_use]
    pub fn new(guard: CancellationToken) -> Self {
        Self {
            conditions: Vec::new(),
            guard,
        }
    }

    /// Attach a condition, returning its index.
    pub fn attach(&mut self, condition: impl Condition + 'static) -> usize {
        self.conditions.push(Box::new(condition));
        self.conditions.len() - 1
    }

    /// Number of attached conditions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    /// Whether no conditions are attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    fn triggered(&self) -> Vec<usize> {
        self.conditions
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_triggered())
            .map(|(i, _)| i)
            .collect()
    }

    async fn any_signal(&self) {
        if self.conditions.is_empty() {
            return std::future::pending().await;
        }
        let notified = self
            .conditions
            .iter()
            .map(|c| Box::pin(c.signal().notified()));
        select_all(notified).await;
    }

    /// Wait until a condition triggers, `timeout` elapses, or the guard is
    /// cancelled. The guard takes precedence over ready conditions.
    pub async fn wait(&self, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;

        loop {
            if self.guard.is_cancelled() {
                return WaitOutcome::Cancelled;
            }
            let ready = self.triggered();
            if !ready.is_empty() {
                return WaitOutcome::Ready(ready);
            }

            tokio::select! {
                biased;
                _ = self.guard.cancelled() => return WaitOutcome::Cancelled,
                _ = tokio::time::sleep_until(deadline) => return WaitOutcome::TimedOut,
                _ = self.any_signal() => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qos::QosProfile;
    use crate::reader::InstanceState;
    use huddle_protocol::MessageRecord;

    fn reader() -> Arc<ReaderShared<MessageRecord>> {
        Arc::new(ReaderShared::new(
            1,
            QosProfile::default(),
            String::new(),
            None,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let shared = reader();
        let mut waitset = WaitSet::new(CancellationToken::new());
        waitset.attach(ReadCondition::new(shared, DataState::not_read()));

        let outcome = waitset.wait(Duration::from_secs(1)).await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_wait_ready_when_data_arrives() {
        let shared = reader();
        let mut waitset = WaitSet::new(CancellationToken::new());
        waitset.attach(ReadCondition::new(Arc::clone(&shared), DataState::not_read()));

        let writer = Arc::clone(&shared);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.offer(
                &MessageRecord::group("alice", "teamA", "hi"),
                "",
                InstanceState::Alive,
                1,
            );
        });

        let outcome = waitset.wait(Duration::from_secs(5)).await;
        assert_eq!(outcome, WaitOutcome::Ready(vec![0]));
    }

    #[tokio::test]
    async fn test_cancel_wakes_blocked_wait() {
        let token = CancellationToken::new();
        let mut waitset = WaitSet::new(token.clone());
        waitset.attach(ReadCondition::new(reader(), DataState::not_read()));

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let outcome = waitset.wait(Duration::from_secs(30)).await;
        assert_eq!(outcome, WaitOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancel_takes_precedence_over_ready() {
        let shared = reader();
        shared.offer(
            &MessageRecord::group("alice", "teamA", "hi"),
            "",
            InstanceState::Alive,
            1,
        );

        let token = CancellationToken::new();
        let mut waitset = WaitSet::new(token.clone());
        waitset.attach(ReadCondition::new(shared, DataState::not_read()));
        assert_eq!(waitset.len(), 1);

        token.cancel();
        assert_eq!(
            waitset.wait(Duration::from_secs(1)).await,
            WaitOutcome::Cancelled
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_waitset_times_out() {
        let waitset = WaitSet::new(CancellationToken::new());
        assert!(waitset.is_empty());
        assert_eq!(
            waitset.wait(Duration::from_millis(100)).await,
            WaitOutcome::TimedOut
        );
    }
}
