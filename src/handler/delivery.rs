//! Outbound delivery with simulated transient failures.
//!
//! The subscription handler never touches the socket directly: everything it
//! emits goes through the [`DeliveryChannel`] trait, wrapped by a
//! [`Dispatcher`] that injects probabilistic send deferrals and retries them
//! under an explicit [`RetryPolicy`].

use crate::error::{FleetError, Result};
use async_trait::async_trait;
use log::debug;
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

/// Abstraction over the outbound transport of one connection.
#[async_trait]
pub trait DeliveryChannel: Send + Sync + 'static {
    /// Write one text payload to the peer.
    async fn send(&self, payload: String) -> Result<()>;

    /// Close the underlying transport.
    async fn close(&self);
}

/// Randomized duration within ±`ratio` of `base`.
///
/// Spreads poll and retry timing so a crowd of handlers polling the same
/// registry does not synchronize into a thundering herd.
pub fn jitter(base: Duration, ratio: f64) -> Duration {
    let base_ms = base.as_millis() as f64;
    let spread = base_ms * ratio;
    let ms = rand::thread_rng().gen_range(base_ms - spread..=base_ms + spread);
    Duration::from_millis(ms.max(0.0) as u64)
}

/// Retry timing for deferred sends.
///
/// The production policy is unbounded: a persistently unlucky draw can defer
/// a message indefinitely, which is accepted simulation behavior. Tests use
/// the bounded constructor to terminate.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base: Duration,
    ratio: f64,
    max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn unbounded(base: Duration, ratio: f64) -> Self {
        Self {
            base,
            ratio,
            max_attempts: None,
        }
    }

    pub fn bounded(base: Duration, ratio: f64, max_attempts: u32) -> Self {
        Self {
            base,
            ratio,
            max_attempts: Some(max_attempts),
        }
    }

    fn delay(&self) -> Duration {
        jitter(self.base, self.ratio)
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// Failure-injecting send path.
pub struct Dispatcher<C: DeliveryChannel> {
    channel: C,
    failures_enabled: bool,
    error_prob: f64,
    retry: RetryPolicy,
}

impl<C: DeliveryChannel> Dispatcher<C> {
    pub fn new(channel: C, failures_enabled: bool, error_prob: f64, retry: RetryPolicy) -> Self {
        Self {
            channel,
            failures_enabled,
            error_prob,
            retry,
        }
    }

    /// Whether this attempt is deferred, modeling a transient outage.
    fn should_defer(&self) -> bool {
        self.failures_enabled && rand::thread_rng().gen_range(0.0..1.0) < self.error_prob
    }

    /// Deliver `payload`, deferring with the configured probability.
    ///
    /// A deferred attempt sleeps for a jittered interval and re-enters the
    /// same contract. Awaiting the retry in place keeps later messages
    /// queued behind this one, which is what preserves per-connection flush
    /// order.
    pub async fn dispatch(&self, payload: String) -> Result<()> {
        let mut attempts: u32 = 0;
        loop {
            if !self.should_defer() {
                return self.channel.send(payload).await;
            }
            attempts += 1;
            if self.retry.exhausted(attempts) {
                return Err(FleetError::RetriesExhausted(attempts));
            }
            debug!("[Delivery] send deferred (attempt {attempts}), retrying after jitter");
            sleep(self.retry.delay()).await;
        }
    }

    /// Close the wrapped transport. Closing is not failure-injected.
    pub async fn close(&self) {
        self.channel.close().await;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Delivery channel that records payloads in memory.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingChannel {
        sent: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    impl RecordingChannel {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn sent(&self) -> Vec<String> {
            self.sent.lock().clone()
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DeliveryChannel for RecordingChannel {
        async fn send(&self, payload: String) -> Result<()> {
            self.sent.lock().push(payload);
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingChannel;
    use super::*;

    #[test]
    fn test_jitter_stays_within_ratio() {
        let base = Duration::from_millis(1000);
        for _ in 0..200 {
            let drawn = jitter(base, 0.2);
            assert!(drawn >= Duration::from_millis(800), "drawn {drawn:?}");
            assert!(drawn <= Duration::from_millis(1200), "drawn {drawn:?}");
        }
    }

    #[test]
    fn test_deferral_fraction_converges_to_error_prob() {
        let dispatcher = Dispatcher::new(
            RecordingChannel::new(),
            true,
            0.3,
            RetryPolicy::unbounded(Duration::from_millis(10), 0.2),
        );

        let n = 10_000;
        let deferred = (0..n).filter(|_| dispatcher.should_defer()).count();
        let fraction = deferred as f64 / n as f64;
        // ~6.5 sigma of sampling tolerance around p = 0.3
        assert!((fraction - 0.3).abs() < 0.03, "fraction {fraction}");
    }

    #[test]
    fn test_never_defers_when_failures_disabled() {
        let dispatcher = Dispatcher::new(
            RecordingChannel::new(),
            false,
            1.0,
            RetryPolicy::unbounded(Duration::from_millis(10), 0.2),
        );
        assert!((0..1000).all(|_| !dispatcher.should_defer()));
    }

    #[tokio::test]
    async fn test_dispatch_writes_through_when_failures_disabled() {
        let channel = RecordingChannel::new();
        let dispatcher = Dispatcher::new(
            channel.clone(),
            false,
            1.0,
            RetryPolicy::unbounded(Duration::from_millis(10), 0.2),
        );

        dispatcher.dispatch("hello".to_string()).await.unwrap();
        assert_eq!(channel.sent(), vec!["hello".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_retries_until_bound() {
        let channel = RecordingChannel::new();
        let dispatcher = Dispatcher::new(
            channel.clone(),
            true,
            1.0,
            RetryPolicy::bounded(Duration::from_millis(10), 0.2, 3),
        );

        let err = dispatcher.dispatch("doomed".to_string()).await.unwrap_err();
        assert!(matches!(err, FleetError::RetriesExhausted(3)));
        assert!(channel.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_eventually_sends_under_partial_failure() {
        let channel = RecordingChannel::new();
        let dispatcher = Dispatcher::new(
            channel.clone(),
            true,
            0.5,
            RetryPolicy::bounded(Duration::from_millis(10), 0.2, 1000),
        );

        // With p = 0.5 and 1000 allowed retries, failure to deliver is
        // astronomically unlikely.
        dispatcher.dispatch("persistent".to_string()).await.unwrap();
        assert_eq!(channel.sent(), vec!["persistent".to_string()]);
    }
}
