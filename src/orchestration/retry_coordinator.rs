//! # Retry Coordinator
//!
//! Decides whether a failed attempt gets another one and owns the delay timers of retries
//! that are waiting to be re-queued.
//!
//! Delays grow exponentially from the base delay, `base * 2^(attempt - 1)`, and are capped
//! at the configured maximum. Timers can be cancelled individually (the user cancelled the
//! request while it waited) or all at once during shutdown.

use crate::config::RetryConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-queue as retry number `attempt` after `delay`
    Retry { attempt: u32, delay: Duration },
    /// No retries left; `attempts` is the number of retries already made
    Exhausted { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct RetryCoordinator {
    config: RetryConfig,
    timers: Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>>,
}

impl RetryCoordinator {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// `retry_count` is the number of retries the execution already had
    pub fn evaluate(&self, retry_count: u32) -> RetryDecision {
        if retry_count < self.config.max_retry_attempts {
            let attempt = retry_count + 1;
            RetryDecision::Retry {
                attempt,
                delay: self.backoff_delay(attempt),
            }
        } else {
            RetryDecision::Exhausted {
                attempts: retry_count,
            }
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.config
            .base_delay()
            .saturating_mul(1u32 << exponent)
            .min(self.config.max_delay())
    }

    /// Run `on_ready` once `delay` has elapsed, unless cancelled first
    pub fn schedule<F>(&self, request_id: Uuid, delay: Duration, on_ready: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // Holding the lock while spawning keeps the task from removing its entry before it exists
        let mut timers = self.timers.lock();
        let registry = Arc::clone(&self.timers);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            registry.lock().remove(&request_id);
            on_ready.await;
        });

        if let Some(previous) = timers.insert(request_id, handle) {
            previous.abort();
        }
        debug!(
            request_id = %request_id,
            delay_ms = delay.as_millis(),
            "Retry timer armed"
        );
    }

    /// Cancel a pending retry. Returns false when no timer was waiting.
    pub fn cancel(&self, request_id: Uuid) -> bool {
        match self.timers.lock().remove(&request_id) {
            Some(handle) => {
                handle.abort();
                debug!(request_id = %request_id, "Retry timer cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, request_id: Uuid) -> bool {
        self.timers.lock().contains_key(&request_id)
    }

    pub fn pending(&self) -> usize {
        self.timers.lock().len()
    }

    /// Abort every timer and return the ids whose retry will never run
    pub fn shutdown(&self) -> Vec<Uuid> {
        let drained: Vec<(Uuid, JoinHandle<()>)> = self.timers.lock().drain().collect();
        if !drained.is_empty() {
            info!(pending_retries = drained.len(), "Discarding pending retries");
        }
        drained
            .into_iter()
            .map(|(request_id, handle)| {
                handle.abort();
                request_id
            })
            .collect()
    }
}
