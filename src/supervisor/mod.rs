//! A tree of restartable long-lived services.
//!
//! A process-restart loop with equal-jitter exponential backoff, generalized
//! from "one shell command" to "any [`Service`] implementation" so that
//! supervisors can themselves be supervised — the composition root nests the
//! always-on cluster (controller, status aggregator, pinger) and the
//! process-dependent cluster (the child process) as two children of one
//! root supervisor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::events::Bus;

mod restart;
pub use restart::RestartPolicy;

/// Why a service's `run` returned.
#[derive(Debug)]
pub enum ExitReason {
    /// Ordinary, expected completion. Not restarted.
    Normal,
    /// Unrecoverable for this service; do not restart it.
    Fatal(anyhow::Error),
    /// Unwind the whole supervisor tree (reserved for the controller's clean
    /// shutdown path).
    TerminateTree,
    /// Anything else: transient failure, restartable with backoff.
    Other(anyhow::Error),
}

impl ExitReason {
    fn is_restartable(&self) -> bool {
        matches!(self, ExitReason::Other(_))
    }
}

/// A named long-lived activity. `run` must return promptly once `cancel` is
/// signalled.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    async fn run(&self, cancel: CancellationToken) -> ExitReason;
}

/// Structured lifecycle events the supervisor publishes on the event bus,
/// one per spawn/exit/backoff transition.
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    Started { service: String },
    Timeout { service: String },
    Panic { service: String, error: String },
    Terminated { service: String, error: Option<String> },
    Backoff { service: String },
    Resumed { service: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceLifecycle {
    Pending,
    Running,
    BackoffWaiting,
    Terminated,
}

/// Opaque handle returned by [`Supervisor::add`], used to [`Supervisor::remove`]
/// that service later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceToken(u64);

struct Entry {
    name: String,
    handle: JoinHandle<()>,
    cancel: CancellationToken,
    lifecycle: Arc<Mutex<ServiceLifecycle>>,
}

struct Inner {
    bus: Bus,
    cancel: CancellationToken,
    entries: Mutex<HashMap<u64, Entry>>,
    next_id: std::sync::atomic::AtomicU64,
    terminate: tokio_util::sync::CancellationToken,
}

/// Owns a set of named services, restarting them per [`RestartPolicy`] and
/// publishing [`ServiceEvent`]s for every transition.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(bus: Bus, cancel: CancellationToken) -> Self {
        Self {
            inner: Arc::new(Inner {
                bus,
                cancel,
                entries: Mutex::new(HashMap::new()),
                next_id: std::sync::atomic::AtomicU64::new(0),
                terminate: CancellationToken::new(),
            }),
        }
    }

    /// Insert a service and schedule it immediately with the default
    /// restart policy.
    pub async fn add(&self, name: impl Into<String>, service: impl Service) -> ServiceToken {
        self.add_with_policy(name, service, RestartPolicy::default())
            .await
    }

    pub async fn add_with_policy(
        &self,
        name: impl Into<String>,
        service: impl Service,
        policy: RestartPolicy,
    ) -> ServiceToken {
        let name = name.into();
        let id = self
            .inner
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let cancel = self.inner.cancel.child_token();
        let lifecycle = Arc::new(Mutex::new(ServiceLifecycle::Pending));

        let handle = tokio::spawn(Self::drive(
            self.inner.clone(),
            name.clone(),
            Arc::new(service),
            policy,
            cancel.clone(),
            lifecycle.clone(),
        ));

        self.inner.entries.lock().await.insert(
            id,
            Entry {
                name,
                handle,
                cancel,
                lifecycle,
            },
        );

        ServiceToken(id)
    }

    /// Request cancellation of a service and wait up to `timeout` for it to
    /// exit. Returns whether it stopped in time.
    pub async fn remove(&self, token: ServiceToken, timeout: Duration) -> bool {
        let entry = self.inner.entries.lock().await.remove(&token.0);
        let Some(entry) = entry else { return true };
        entry.cancel.cancel();
        match tokio::time::timeout(timeout, entry.handle).await {
            Ok(_) => true,
            Err(_) => {
                warn!(service = %entry.name, "stop-timeout");
                false
            }
        }
    }

    /// Block until the root cancellation fires or a child requests
    /// `TerminateTree`. All children have exited by the time this returns.
    pub async fn serve(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = self.inner.terminate.cancelled() => {}
        }
        self.inner.cancel.cancel();

        let handles: Vec<JoinHandle<()>> = {
            let mut entries = self.inner.entries.lock().await;
            entries.drain().map(|(_, e)| e.handle).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }

    async fn drive(
        inner: Arc<Inner>,
        name: String,
        service: Arc<dyn Service>,
        policy: RestartPolicy,
        cancel: CancellationToken,
        lifecycle: Arc<Mutex<ServiceLifecycle>>,
    ) {
        let mut restart_count: u32 = 0;
        let mut failures_in_window: Vec<Instant> = Vec::new();

        loop {
            if cancel.is_cancelled() {
                *lifecycle.lock().await = ServiceLifecycle::Terminated;
                return;
            }

            *lifecycle.lock().await = ServiceLifecycle::Running;
            inner
                .bus
                .dispatch(ServiceEvent::Started {
                    service: name.clone(),
                })
                .await;
            info!(service = %name, attempt = restart_count + 1, "service.start");

            let started_at = Instant::now();
            let reason = service.run(cancel.clone()).await;

            match reason {
                ExitReason::Normal => {
                    debug!(service = %name, "service.exit.normal");
                    inner
                        .bus
                        .dispatch(ServiceEvent::Terminated {
                            service: name.clone(),
                            error: None,
                        })
                        .await;
                    *lifecycle.lock().await = ServiceLifecycle::Terminated;
                    return;
                }
                ExitReason::Fatal(err) => {
                    error!(service = %name, error = %err, "service.exit.fatal");
                    inner
                        .bus
                        .dispatch(ServiceEvent::Terminated {
                            service: name.clone(),
                            error: Some(err.to_string()),
                        })
                        .await;
                    *lifecycle.lock().await = ServiceLifecycle::Terminated;
                    return;
                }
                ExitReason::TerminateTree => {
                    info!(service = %name, "service.exit.terminate_tree");
                    *lifecycle.lock().await = ServiceLifecycle::Terminated;
                    inner.terminate.cancel();
                    return;
                }
                ExitReason::Other(ref err) => {
                    warn!(service = %name, error = %err, "service.exit.restartable");
                    if cancel.is_cancelled() {
                        *lifecycle.lock().await = ServiceLifecycle::Terminated;
                        return;
                    }

                    let now = Instant::now();
                    failures_in_window.retain(|t| now.duration_since(*t) <= policy.failure_window);
                    failures_in_window.push(now);

                    if failures_in_window.len() as u32 > policy.max_fast_failures {
                        *lifecycle.lock().await = ServiceLifecycle::BackoffWaiting;
                        inner
                            .bus
                            .dispatch(ServiceEvent::Backoff {
                                service: name.clone(),
                            })
                            .await;
                        error!(service = %name, "service.backoff_wait");
                    }

                    if started_at.elapsed() >= policy.reset_after {
                        restart_count = 0;
                    }

                    let delay = policy.backoff_delay(restart_count);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            *lifecycle.lock().await = ServiceLifecycle::Terminated;
                            return;
                        }
                    }
                    inner
                        .bus
                        .dispatch(ServiceEvent::Resumed {
                            service: name.clone(),
                        })
                        .await;
                    restart_count += 1;
                    let _ = reason.is_restartable();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyService {
        fail_times: u32,
        attempts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Service for FlakyService {
        async fn run(&self, _cancel: CancellationToken) -> ExitReason {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_times {
                ExitReason::Other(anyhow::anyhow!("boom"))
            } else {
                ExitReason::Normal
            }
        }
    }

    #[tokio::test]
    async fn restarts_until_normal_exit() {
        let bus = Bus::default();
        let cancel = CancellationToken::new();
        let supervisor = Supervisor::new(bus, cancel.clone());

        let attempts = Arc::new(AtomicU32::new(0));
        let policy = RestartPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RestartPolicy::default()
        };
        supervisor
            .add_with_policy(
                "flaky",
                FlakyService {
                    fail_times: 2,
                    attempts: attempts.clone(),
                },
                policy,
            )
            .await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(attempts.load(Ordering::SeqCst) >= 3);
    }

    struct ForeverService;

    #[async_trait]
    impl Service for ForeverService {
        async fn run(&self, cancel: CancellationToken) -> ExitReason {
            cancel.cancelled().await;
            ExitReason::Normal
        }
    }

    #[tokio::test]
    async fn remove_waits_for_cancellation() {
        let bus = Bus::default();
        let cancel = CancellationToken::new();
        let supervisor = Supervisor::new(bus, cancel.clone());

        let token = supervisor.add("forever", ForeverService).await;
        let stopped = supervisor.remove(token, Duration::from_secs(2)).await;
        assert!(stopped);
    }

    struct TerminateService;

    #[async_trait]
    impl Service for TerminateService {
        async fn run(&self, _cancel: CancellationToken) -> ExitReason {
            ExitReason::TerminateTree
        }
    }

    #[tokio::test]
    async fn terminate_tree_unwinds_serve() {
        let bus = Bus::default();
        let cancel = CancellationToken::new();
        let supervisor = Supervisor::new(bus, cancel.clone());

        supervisor.add("terminator", TerminateService).await;
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            supervisor.serve(CancellationToken::new()),
        )
        .await;
        assert!(result.is_ok());
    }
}
