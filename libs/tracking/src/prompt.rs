//! Periodic location re-prompts, one loop per reporting principal.
//!
//! The registry owns a record per principal with explicit start and stop
//! transitions. A loop asks the reporting channel for a fresh location on
//! every tick, stops as soon as it is cancelled, and ends itself on the
//! first failed send instead of retrying.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::ChannelError;
use crate::model::{DriverId, Principal};

/// Outbound side of the reporting channel.
#[async_trait]
pub trait ReportingChannel: Send + Sync {
    /// Ask `principal` to share its current location for `driver_id`.
    async fn request_location(
        &self,
        principal: &Principal,
        driver_id: &DriverId,
    ) -> Result<(), ChannelError>;
}

struct PromptTask {
    driver_id: DriverId,
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Registry {
    tasks: HashMap<Principal, PromptTask>,
    generation: u64,
}

/// Per-principal re-prompt loops
#[derive(Clone)]
pub struct PromptRegistry {
    channel: Arc<dyn ReportingChannel>,
    interval: Duration,
    registry: Arc<Mutex<Registry>>,
    shutdown: CancellationToken,
}

impl PromptRegistry {
    pub fn new(channel: Arc<dyn ReportingChannel>, interval: Duration) -> Self {
        Self {
            channel,
            interval,
            registry: Arc::new(Mutex::new(Registry::default())),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start prompting `principal` for `driver_id`.
    ///
    /// Returns `false` if a loop for the same principal and driver is
    /// already running, or if the registry has been shut down. A loop for a
    /// different driver is replaced.
    pub async fn start(&self, principal: &Principal, driver_id: &DriverId) -> bool {
        let mut registry = self.registry.lock().await;
        if self.shutdown.is_cancelled() {
            return false;
        }

        if let Some(existing) = registry.tasks.get(principal) {
            if &existing.driver_id == driver_id && !existing.cancel.is_cancelled() {
                return false;
            }
            existing.cancel.cancel();
        }

        registry.generation += 1;
        let generation = registry.generation;
        let cancel = self.shutdown.child_token();

        registry.tasks.insert(
            principal.clone(),
            PromptTask {
                driver_id: driver_id.clone(),
                generation,
                cancel: cancel.clone(),
            },
        );
        drop(registry);

        info!(
            "Starting location prompts for principal {} (driver {}) every {:?}",
            principal, driver_id, self.interval
        );

        tokio::spawn(run_loop(
            self.clone(),
            principal.clone(),
            driver_id.clone(),
            generation,
            cancel,
        ));

        true
    }

    /// Stop prompting `principal`. Returns `false` if no loop was running.
    pub async fn stop(&self, principal: &Principal) -> bool {
        let mut registry = self.registry.lock().await;
        match registry.tasks.remove(principal) {
            Some(task) => {
                task.cancel.cancel();
                info!("Stopped location prompts for principal {}", principal);
                true
            }
            None => false,
        }
    }

    /// Stop prompting `principal` only if its loop is for `driver_id`.
    pub async fn stop_for(&self, principal: &Principal, driver_id: &DriverId) -> bool {
        let mut registry = self.registry.lock().await;
        if !registry
            .tasks
            .get(principal)
            .is_some_and(|task| &task.driver_id == driver_id)
        {
            return false;
        }
        if let Some(task) = registry.tasks.remove(principal) {
            task.cancel.cancel();
            info!(
                "Stopped location prompts for principal {} (driver {})",
                principal, driver_id
            );
        }
        true
    }

    pub async fn is_running(&self, principal: &Principal) -> bool {
        self.registry.lock().await.tasks.contains_key(principal)
    }

    pub async fn running_count(&self) -> usize {
        self.registry.lock().await.tasks.len()
    }

    /// Cancel every loop. Loops started afterwards are cancelled immediately.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.registry.lock().await.tasks.clear();
    }

    /// Drop the record for `principal` if it still belongs to `generation`.
    async fn retire(&self, principal: &Principal, generation: u64) {
        let mut registry = self.registry.lock().await;
        if registry
            .tasks
            .get(principal)
            .is_some_and(|task| task.generation == generation)
        {
            registry.tasks.remove(principal);
        }
    }
}

async fn run_loop(
    registry: PromptRegistry,
    principal: Principal,
    driver_id: DriverId,
    generation: u64,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(registry.interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let sent = tokio::select! {
            _ = cancel.cancelled() => break,
            sent = registry.channel.request_location(&principal, &driver_id) => sent,
        };

        if let Err(e) = sent {
            error!(
                "Location prompt to principal {} failed, ending prompt loop: {}",
                principal, e
            );
            registry.retire(&principal, generation).await;
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingChannel {
        sent: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ReportingChannel for CountingChannel {
        async fn request_location(
            &self,
            _principal: &Principal,
            _driver_id: &DriverId,
        ) -> Result<(), ChannelError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ChannelError::Unreachable("blocked by user".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn prompts_immediately_then_every_interval() {
        let channel = Arc::new(CountingChannel::default());
        let prompts = PromptRegistry::new(channel.clone(), Duration::from_secs(30));
        let alice = Principal::from("alice");

        assert!(prompts.start(&alice, &DriverId::from("d-1")).await);
        tokio::time::sleep(Duration::from_secs(65)).await;

        assert_eq!(channel.sent.load(Ordering::SeqCst), 3);
        assert!(prompts.is_running(&alice).await);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_start_is_ignored() {
        let channel = Arc::new(CountingChannel::default());
        let prompts = PromptRegistry::new(channel, Duration::from_secs(30));
        let alice = Principal::from("alice");
        let driver = DriverId::from("d-1");

        assert!(prompts.start(&alice, &driver).await);
        assert!(!prompts.start(&alice, &driver).await);
        assert_eq!(prompts.running_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_loop() {
        let channel = Arc::new(CountingChannel::default());
        let prompts = PromptRegistry::new(channel.clone(), Duration::from_secs(30));
        let alice = Principal::from("alice");

        prompts.start(&alice, &DriverId::from("d-1")).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(prompts.stop(&alice).await);
        assert!(!prompts.stop(&alice).await);

        let before = channel.sent.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(channel.sent.load(Ordering::SeqCst), before);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_ends_loop() {
        let channel = Arc::new(CountingChannel {
            fail: true,
            ..Default::default()
        });
        let prompts = PromptRegistry::new(channel.clone(), Duration::from_secs(30));
        let alice = Principal::from("alice");

        prompts.start(&alice, &DriverId::from("d-1")).await;
        tokio::time::sleep(Duration::from_secs(90)).await;

        assert_eq!(channel.sent.load(Ordering::SeqCst), 1);
        assert!(!prompts.is_running(&alice).await);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_for_leaves_other_driver_alone() {
        let channel = Arc::new(CountingChannel::default());
        let prompts = PromptRegistry::new(channel, Duration::from_secs(30));
        let alice = Principal::from("alice");

        prompts.start(&alice, &DriverId::from("d-2")).await;

        assert!(!prompts.stop_for(&alice, &DriverId::from("d-1")).await);
        assert!(prompts.is_running(&alice).await);
        assert!(prompts.stop_for(&alice, &DriverId::from("d-2")).await);
        assert!(!prompts.is_running(&alice).await);
    }

    #[tokio::test(start_paused = true)]
    async fn start_after_shutdown_is_refused() {
        let channel = Arc::new(CountingChannel::default());
        let prompts = PromptRegistry::new(channel.clone(), Duration::from_secs(30));
        prompts.shutdown().await;

        assert!(!prompts.start(&Principal::from("a"), &DriverId::from("1")).await);
        assert!(!prompts.is_running(&Principal::from("a")).await);
        assert_eq!(prompts.running_count().await, 0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(channel.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_everything() {
        let channel = Arc::new(CountingChannel::default());
        let prompts = PromptRegistry::new(channel.clone(), Duration::from_secs(30));

        prompts.start(&Principal::from("a"), &DriverId::from("1")).await;
        prompts.start(&Principal::from("b"), &DriverId::from("2")).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        prompts.shutdown().await;

        let before = channel.sent.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(channel.sent.load(Ordering::SeqCst), before);
        assert_eq!(prompts.running_count().await, 0);
    }
}
